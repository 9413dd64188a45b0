//! Key records and the key store abstraction the HKP server reads from.

use crate::error::Result;

/// Public key algorithm class of a subkey.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    /// RSA (any usage).
    Rsa,
    /// ElGamal (any usage).
    ElGamal,
    /// DSA.
    Dsa,
    /// Anything else.
    Unknown,
}

impl Algorithm {
    /// Map an OpenPGP public key algorithm id (RFC 4880 9.1).
    pub fn from_openpgp_id(id: u8) -> Self {
        match id {
            1..=3 => Self::Rsa,
            16 | 20 => Self::ElGamal,
            17 => Self::Dsa,
            _ => Self::Unknown,
        }
    }

    /// Single letter used in HKP index listings.
    pub fn letter(self) -> &'static str {
        match self {
            Self::Rsa => "R",
            Self::ElGamal => "E",
            Self::Dsa => "D",
            Self::Unknown => "?",
        }
    }
}

/// A primary key or subkey.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subkey {
    /// Algorithm class.
    pub algorithm: Algorithm,
    /// Key length in bits.
    pub bits: u32,
    /// Creation time, unix seconds.
    pub created: i64,
}

/// A certification on a user id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signature {
    /// Signer key id (hex).
    pub key_id: String,
    /// Signer name, if known.
    pub name: Option<String>,
    /// Signer email, if known.
    pub email: Option<String>,
}

/// A user id on a key, with the signatures made over it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserId {
    /// Display name.
    pub name: Option<String>,
    /// Email address.
    pub email: Option<String>,
    /// Certifications on this user id. Only filled when signatures are requested.
    pub signatures: Vec<Signature>,
}

impl UserId {
    /// Build a user id from a name and email.
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            email: Some(email.into()),
            signatures: Vec::new(),
        }
    }
}

/// One key as returned by a [`KeyStore`] query.
///
/// The first subkey is the primary key. Stores guarantee at least one subkey
/// and at least one user id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRecord {
    /// Primary key fingerprint (hex).
    pub fingerprint: String,
    /// Primary key followed by its subkeys.
    pub subkeys: Vec<Subkey>,
    /// User ids in key order.
    pub uids: Vec<UserId>,
    /// Whether the key has been revoked.
    pub revoked: bool,
}

impl KeyRecord {
    /// The primary key, or an unknown 0-bit key if the record has none.
    pub fn primary(&self) -> &Subkey {
        static MISSING: Subkey = Subkey {
            algorithm: Algorithm::Unknown,
            bits: 0,
            created: 0,
        };
        self.subkeys.first().unwrap_or(&MISSING)
    }

    /// Whether any user id or fingerprint matches `pattern`, case-insensitively.
    ///
    /// A `0x` prefix matches against the tail of the fingerprint.
    pub fn matches(&self, pattern: &str) -> bool {
        if let Some(hex) = pattern
            .strip_prefix("0x")
            .or_else(|| pattern.strip_prefix("0X"))
        {
            return self
                .fingerprint
                .to_ascii_lowercase()
                .ends_with(&hex.to_ascii_lowercase());
        }

        let needle = pattern.to_lowercase();
        if self.fingerprint.to_lowercase().contains(&needle) {
            return true;
        }
        self.uids.iter().any(|uid| {
            uid.name
                .as_deref()
                .into_iter()
                .chain(uid.email.as_deref())
                .any(|part| part.to_lowercase().contains(&needle))
        })
    }
}

/// Read access to the operator's public keys.
pub trait KeyStore {
    /// List keys matching `pattern`, with signatures on each user id when
    /// `include_signatures` is set.
    fn query(&self, pattern: &str, include_signatures: bool) -> Result<Vec<KeyRecord>>;

    /// Export keys matching `pattern` as an ASCII armored block. Empty when
    /// nothing matches.
    fn export_armored(&self, pattern: &str) -> Result<Vec<u8>>;
}

/// In-memory key store.
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyStore {
    keys: Vec<(KeyRecord, Vec<u8>)>,
}

impl MemoryKeyStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key along with its armored export.
    pub fn with_key(mut self, record: KeyRecord, armored: impl Into<Vec<u8>>) -> Self {
        self.keys.push((record, armored.into()));
        self
    }
}

impl KeyStore for MemoryKeyStore {
    fn query(&self, pattern: &str, include_signatures: bool) -> Result<Vec<KeyRecord>> {
        Ok(self
            .keys
            .iter()
            .filter(|(record, _)| record.matches(pattern))
            .map(|(record, _)| {
                let mut record = record.clone();
                if !include_signatures {
                    for uid in &mut record.uids {
                        uid.signatures.clear();
                    }
                }
                record
            })
            .collect())
    }

    fn export_armored(&self, pattern: &str) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for (_, armored) in self.keys.iter().filter(|(r, _)| r.matches(pattern)) {
            if !out.is_empty() && !out.ends_with(b"\n") {
                out.push(b'\n');
            }
            out.extend_from_slice(armored);
        }
        Ok(out)
    }
}
