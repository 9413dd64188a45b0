//! Share OpenPGP public keys on the local network.
//!
//! An HKP keyserver answers `/pks/lookup` requests from a [`KeyStore`] and
//! is advertised over multicast DNS as a `_pgpkey-hkp._tcp` service.
//! [`Sharing`] ties the two together.

#![deny(missing_docs)]

pub mod advertise;
pub mod discovery;
pub mod error;
pub mod gpg;
pub mod hkp;
pub mod html;
pub mod keystore;
pub mod sharing;
pub mod transport;

// Re-export key types
pub use advertise::{AdvertState, Advertisement, LogNotifier, Notifier, Publisher};
pub use discovery::{DiscoveryProvider, MdnsProvider, ProviderEvent, ServiceRecord};
pub use error::{Error, Result};
pub use gpg::{GpgConfig, GpgKeyStore};
pub use hkp::{HkpDispatcher, HkpResponse};
pub use keystore::{KeyRecord, KeyStore, MemoryKeyStore};
pub use sharing::{Sharing, SharingConfig};
pub use transport::HttpTransport;
