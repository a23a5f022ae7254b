//! Persistent preferences for the Attractap reader.
//!
//! Values are strings grouped by namespace, mirroring the flash preference
//! partitions of the device. [`JsonFileStore`] keeps them on disk,
//! [`MemoryStore`] keeps them in memory for tests. The typed accessors in
//! [`prefs`] are what the rest of the workspace uses.
//!
//! # Examples
//!
//! ```
//! use attractap_core::DeviceIdentity;
//! use attractap_storage::{IdentityPrefs, MemoryStore};
//! use std::sync::Arc;
//!
//! let prefs = IdentityPrefs::new(Arc::new(MemoryStore::new()));
//! prefs.save(&DeviceIdentity::new("12", "token"))?;
//! assert_eq!(prefs.load()?.map(|identity| identity.id), Some("12".to_string()));
//! # Ok::<(), attractap_storage::StorageError>(())
//! ```

pub mod error;
pub mod prefs;
pub mod store;

pub use error::{StorageError, StorageResult};
pub use prefs::{
    CertificatePrefs, IdentityPrefs, RememberedCertificate, ServerPrefs, SharedStore,
    WifiCredentials, WifiPrefs,
};
pub use store::{JsonFileStore, KeyValueStore, MemoryStore};
