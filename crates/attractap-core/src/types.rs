use crate::{
    Result,
    constants::{KEY_LENGTH, MAX_KEY_NUMBER, SECURE_PORT, WEBSOCKET_PATH},
    error::Error,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use subtle::ConstantTimeEq;

/// Server endpoint the terminal connects to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    pub hostname: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
        }
    }

    /// A configuration is usable when it names a host and a non-zero port.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.hostname.trim().is_empty() && self.port > 0
    }

    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns `Error::InvalidServerConfig` when the hostname is empty or the
    /// port is zero.
    pub fn validate(&self) -> Result<()> {
        if self.hostname.trim().is_empty() {
            return Err(Error::invalid_server_config("hostname is empty"));
        }
        if self.port == 0 {
            return Err(Error::invalid_server_config("port must be greater than 0"));
        }
        Ok(())
    }

    /// Port 443 selects the secure scheme.
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.port == SECURE_PORT
    }

    #[must_use]
    pub fn scheme(&self) -> &'static str {
        if self.is_secure() { "wss" } else { "ws" }
    }

    /// Full websocket URL of the reader endpoint.
    ///
    /// ```
    /// use attractap_core::ServerConfig;
    ///
    /// let config = ServerConfig::new("attraccess.example.org", 443);
    /// assert_eq!(
    ///     config.websocket_url(),
    ///     "wss://attraccess.example.org:443/api/attractap/websocket"
    /// );
    /// ```
    #[must_use]
    pub fn websocket_url(&self) -> String {
        format!(
            "{}://{}:{}{}",
            self.scheme(),
            self.hostname.trim(),
            self.port,
            WEBSOCKET_PATH
        )
    }
}

impl fmt::Display for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.hostname, self.port)
    }
}

/// Identity the server assigned to this reader at registration.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub id: String,
    pub token: String,
}

impl DeviceIdentity {
    pub fn new(id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            token: token.into(),
        }
    }

    /// Both halves must be present for the identity to be usable.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.id.is_empty() && !self.token.is_empty()
    }
}

// The token is a secret; keep it out of logs.
impl fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("id", &self.id)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Application key slot on the card (0-4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct KeyNumber(u8);

impl KeyNumber {
    /// The master key; changing any key requires authenticating with it.
    pub const MASTER: KeyNumber = KeyNumber(0);

    /// # Errors
    /// Returns `Error::InvalidKeyNumber` for values above 4.
    pub fn new(number: u8) -> Result<Self> {
        if number > MAX_KEY_NUMBER {
            return Err(Error::InvalidKeyNumber(number));
        }
        Ok(KeyNumber(number))
    }

    #[must_use]
    pub fn as_u8(&self) -> u8 {
        self.0
    }

    #[must_use]
    pub fn is_master(&self) -> bool {
        self.0 == 0
    }
}

impl TryFrom<u8> for KeyNumber {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        KeyNumber::new(value)
    }
}

impl From<KeyNumber> for u8 {
    fn from(value: KeyNumber) -> Self {
        value.0
    }
}

impl fmt::Display for KeyNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for KeyNumber {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let number: u8 = s
            .trim()
            .parse()
            .map_err(|_| Error::invalid_key(format!("Invalid key number: {s}")))?;
        KeyNumber::new(number)
    }
}

/// 16-byte application key.
///
/// # Security
/// Comparison is constant-time and the `Debug` output never contains key
/// material.
#[derive(Clone, Copy, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AesKey([u8; KEY_LENGTH]);

impl AesKey {
    /// Factory default key of a blank card.
    pub const ZERO: AesKey = AesKey([0u8; KEY_LENGTH]);

    pub fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        AesKey(bytes)
    }

    /// Parse a key from 32 hexadecimal characters.
    ///
    /// # Errors
    /// Returns `Error::InvalidKey` when the input is not valid hex or does not
    /// decode to exactly 16 bytes.
    ///
    /// ```
    /// use attractap_core::AesKey;
    ///
    /// let key = AesKey::from_hex("000102030405060708090a0b0c0d0e0f").unwrap();
    /// assert_eq!(key.as_bytes()[15], 0x0f);
    /// assert!(AesKey::from_hex("0011").is_err());
    /// ```
    pub fn from_hex(input: &str) -> Result<Self> {
        let bytes = hex::decode(input.trim())
            .map_err(|e| Error::invalid_key(format!("not a hex string: {e}")))?;
        let bytes: [u8; KEY_LENGTH] = bytes.try_into().map_err(|b: Vec<u8>| {
            Error::invalid_key(format!("expected {KEY_LENGTH} bytes, got {}", b.len()))
        })?;
        Ok(AesKey(bytes))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }

    /// Lowercase hex encoding.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl PartialEq for AesKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl fmt::Debug for AesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AesKey(..{:02x})", self.0[KEY_LENGTH - 1])
    }
}

impl std::str::FromStr for AesKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        AesKey::from_hex(s)
    }
}

impl TryFrom<String> for AesKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        AesKey::from_hex(&value)
    }
}

impl From<AesKey> for String {
    fn from(value: AesKey) -> Self {
        value.to_hex()
    }
}

/// Unique identifier read from a contactless card.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CardUid(Vec<u8>);

impl CardUid {
    /// Minimum UID length in bytes (single size UID).
    pub const MIN_LENGTH: usize = 4;
    /// Maximum UID length in bytes (triple size UID).
    pub const MAX_LENGTH: usize = 10;

    /// # Errors
    /// Returns `Error::InvalidCardUid` when the length is outside 4-10 bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes = bytes.into();
        if !(Self::MIN_LENGTH..=Self::MAX_LENGTH).contains(&bytes.len()) {
            return Err(Error::invalid_card_uid(format!(
                "UID must be {}-{} bytes, got {}",
                Self::MIN_LENGTH,
                Self::MAX_LENGTH,
                bytes.len()
            )));
        }
        Ok(CardUid(bytes))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Lowercase hex, two digits per byte. This is the form the server
    /// expects in tap events.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

// Array lengths that are valid UID sizes (single, double, triple).
macro_rules! card_uid_from_array {
    ($($len:literal),*) => {
        $(
            impl From<[u8; $len]> for CardUid {
                fn from(bytes: [u8; $len]) -> Self {
                    CardUid(bytes.to_vec())
                }
            }
        )*
    };
}

card_uid_from_array!(4, 7, 10);

impl fmt::Display for CardUid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Firmware identification reported to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareInfo {
    pub name: String,
    pub variant: String,
    pub version: String,
}

impl FirmwareInfo {
    pub fn new(
        name: impl Into<String>,
        variant: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            variant: variant.into(),
            version: version.into(),
        }
    }
}

impl Default for FirmwareInfo {
    fn default() -> Self {
        Self::new("attractap", "emulator", crate::VERSION)
    }
}
