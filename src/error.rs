//! Error types for hkp-share.

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP connection error.
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// mDNS daemon error.
    #[error("mDNS error: {0}")]
    Mdns(#[from] mdns_sd::Error),

    /// Key store backend error.
    #[error("Key store error: {0}")]
    KeyStore(String),

    /// Discovery provider error.
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// Operation not valid in the current state.
    #[error("Invalid state: {0}")]
    State(String),
}

impl Error {
    /// Create a key store error.
    pub fn keystore<S: Into<String>>(msg: S) -> Self {
        Self::KeyStore(msg.into())
    }

    /// Create a discovery error.
    pub fn discovery<S: Into<String>>(msg: S) -> Self {
        Self::Discovery(msg.into())
    }

    /// Create an invalid state error.
    pub fn state<S: Into<String>>(msg: S) -> Self {
        Self::State(msg.into())
    }
}
