//! Typed accessors over the raw key-value store.
//!
//! Each accessor owns one namespace:
//!
//! | Accessor | Namespace | Keys |
//! |---|---|---|
//! | [`IdentityPrefs`] | `attraccess` | `deviceId`, `authToken` |
//! | [`ServerPrefs`] | `attraccess` | `hostname`, `port` |
//! | [`WifiPrefs`] | `wifi` | `ssid`, `password`, `has_creds` |
//! | [`CertificatePrefs`] | `cert_mgr` | `success_cert`, `success_fail` |

use crate::error::{StorageError, StorageResult};
use crate::store::KeyValueStore;
use attractap_core::{DeviceIdentity, ServerConfig};
use std::sync::Arc;

pub const NAMESPACE_ATTRACCESS: &str = "attraccess";
pub const NAMESPACE_WIFI: &str = "wifi";
pub const NAMESPACE_CERTIFICATES: &str = "cert_mgr";

const KEY_DEVICE_ID: &str = "deviceId";
const KEY_AUTH_TOKEN: &str = "authToken";
const KEY_HOSTNAME: &str = "hostname";
const KEY_PORT: &str = "port";
const KEY_SSID: &str = "ssid";
const KEY_PASSWORD: &str = "password";
const KEY_HAS_CREDS: &str = "has_creds";
const KEY_SUCCESS_CERT: &str = "success_cert";
const KEY_SUCCESS_FAIL: &str = "success_fail";

/// Shared handle to a store.
pub type SharedStore = Arc<dyn KeyValueStore>;

/// Device id and token assigned by the server.
#[derive(Clone)]
pub struct IdentityPrefs {
    store: SharedStore,
}

impl IdentityPrefs {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Stored identity, `None` unless both halves are present.
    pub fn load(&self) -> StorageResult<Option<DeviceIdentity>> {
        let id = self.store.get(NAMESPACE_ATTRACCESS, KEY_DEVICE_ID)?;
        let token = self.store.get(NAMESPACE_ATTRACCESS, KEY_AUTH_TOKEN)?;
        Ok(match (id, token) {
            (Some(id), Some(token)) => {
                Some(DeviceIdentity::new(id, token)).filter(DeviceIdentity::is_complete)
            }
            _ => None,
        })
    }

    pub fn save(&self, identity: &DeviceIdentity) -> StorageResult<()> {
        self.store
            .set(NAMESPACE_ATTRACCESS, KEY_DEVICE_ID, &identity.id)?;
        self.store
            .set(NAMESPACE_ATTRACCESS, KEY_AUTH_TOKEN, &identity.token)
    }

    pub fn clear(&self) -> StorageResult<()> {
        self.store.remove(NAMESPACE_ATTRACCESS, KEY_DEVICE_ID)?;
        self.store.remove(NAMESPACE_ATTRACCESS, KEY_AUTH_TOKEN)
    }
}

/// Server host and port.
#[derive(Clone)]
pub struct ServerPrefs {
    store: SharedStore,
}

impl ServerPrefs {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub fn load(&self) -> StorageResult<Option<ServerConfig>> {
        let Some(hostname) = self.store.get(NAMESPACE_ATTRACCESS, KEY_HOSTNAME)? else {
            return Ok(None);
        };
        let Some(port) = self.store.get(NAMESPACE_ATTRACCESS, KEY_PORT)? else {
            return Ok(None);
        };
        let port: u16 = port
            .trim()
            .parse()
            .map_err(|_| StorageError::invalid_value(NAMESPACE_ATTRACCESS, KEY_PORT, port))?;
        Ok(Some(ServerConfig::new(hostname, port)))
    }

    pub fn save(&self, config: &ServerConfig) -> StorageResult<()> {
        self.store
            .set(NAMESPACE_ATTRACCESS, KEY_HOSTNAME, &config.hostname)?;
        self.store
            .set(NAMESPACE_ATTRACCESS, KEY_PORT, &config.port.to_string())
    }
}

/// Saved local network credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct WifiCredentials {
    pub ssid: String,
    pub password: String,
}

impl std::fmt::Debug for WifiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WifiCredentials")
            .field("ssid", &self.ssid)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Clone)]
pub struct WifiPrefs {
    store: SharedStore,
}

impl WifiPrefs {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub fn has_credentials(&self) -> StorageResult<bool> {
        Ok(self.store.get(NAMESPACE_WIFI, KEY_HAS_CREDS)?.as_deref() == Some("true"))
    }

    pub fn load(&self) -> StorageResult<Option<WifiCredentials>> {
        if !self.has_credentials()? {
            return Ok(None);
        }
        let Some(ssid) = self.store.get(NAMESPACE_WIFI, KEY_SSID)? else {
            return Ok(None);
        };
        let password = self
            .store
            .get(NAMESPACE_WIFI, KEY_PASSWORD)?
            .unwrap_or_default();
        Ok(Some(WifiCredentials { ssid, password }))
    }

    pub fn save(&self, credentials: &WifiCredentials) -> StorageResult<()> {
        self.store.set(NAMESPACE_WIFI, KEY_SSID, &credentials.ssid)?;
        self.store
            .set(NAMESPACE_WIFI, KEY_PASSWORD, &credentials.password)?;
        self.store.set(NAMESPACE_WIFI, KEY_HAS_CREDS, "true")
    }

    pub fn clear(&self) -> StorageResult<()> {
        self.store.clear(NAMESPACE_WIFI)
    }
}

/// Remembered trust anchor and its consecutive failure count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RememberedCertificate {
    pub index: Option<usize>,
    pub failures: u8,
}

#[derive(Clone)]
pub struct CertificatePrefs {
    store: SharedStore,
}

impl CertificatePrefs {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Missing keys read as "nothing remembered". A negative index is the
    /// stored form of "none".
    pub fn load(&self) -> StorageResult<RememberedCertificate> {
        let index = match self.store.get(NAMESPACE_CERTIFICATES, KEY_SUCCESS_CERT)? {
            None => None,
            Some(raw) => {
                let value: i64 = raw.trim().parse().map_err(|_| {
                    StorageError::invalid_value(NAMESPACE_CERTIFICATES, KEY_SUCCESS_CERT, &raw)
                })?;
                usize::try_from(value).ok()
            }
        };
        let failures = match self.store.get(NAMESPACE_CERTIFICATES, KEY_SUCCESS_FAIL)? {
            None => 0,
            Some(raw) => raw.trim().parse().map_err(|_| {
                StorageError::invalid_value(NAMESPACE_CERTIFICATES, KEY_SUCCESS_FAIL, &raw)
            })?,
        };
        Ok(RememberedCertificate { index, failures })
    }

    pub fn save(&self, remembered: RememberedCertificate) -> StorageResult<()> {
        let index = remembered
            .index
            .map_or_else(|| "-1".to_string(), |i| i.to_string());
        self.store
            .set(NAMESPACE_CERTIFICATES, KEY_SUCCESS_CERT, &index)?;
        self.store.set(
            NAMESPACE_CERTIFICATES,
            KEY_SUCCESS_FAIL,
            &remembered.failures.to_string(),
        )
    }

    pub fn clear(&self) -> StorageResult<()> {
        self.save(RememberedCertificate::default())
    }
}
