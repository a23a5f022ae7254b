//! Terminal configuration file.
//!
//! A JSON document; every field is optional:
//!
//! ```json
//! {
//!   "data_dir": "attractap-data",
//!   "server": { "hostname": "attraccess.local", "port": 3000 },
//!   "transport": "websocket",
//!   "device_type": "ESP32_CYD",
//!   "certificates": "roots.pem",
//!   "display": { "columns": 32, "idle_message": "Attractap" },
//!   "abort_failed_updates": false
//! }
//! ```

use crate::display::VirtualDisplay;
use crate::error::{EmulatorError, Result};
use attractap_core::ServerConfig;
use attractap_firmware::{FirmwareConfig, RetryExhaustedPolicy};
use attractap_session::SessionConfig;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TerminalConfig {
    /// Preferences and firmware images live here.
    pub data_dir: PathBuf,
    /// Server to use instead of the stored one. Not persisted.
    pub server: Option<ServerConfig>,
    pub transport: TransportKind,
    pub device_type: String,
    /// PEM bundle replacing the platform trust anchors.
    pub certificates: Option<PathBuf>,
    pub display: DisplaySettings,
    /// Keep running the current firmware when a transfer stalls instead of
    /// restarting.
    pub abort_failed_updates: bool,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("attractap-data"),
            server: None,
            transport: TransportKind::default(),
            device_type: SessionConfig::default().device_type,
            certificates: None,
            display: DisplaySettings::default(),
            abort_failed_updates: false,
        }
    }
}

/// How the terminal reaches the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    WebSocket,
    /// Length-prefixed frames over TCP, for a local development bridge.
    Tcp,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DisplaySettings {
    pub columns: usize,
    pub idle_message: String,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            columns: 32,
            idle_message: "Attractap".to_string(),
        }
    }
}

impl TerminalConfig {
    /// Read a configuration file.
    ///
    /// # Errors
    /// `ConfigIo` when the file cannot be read, `ConfigParse` when it is not
    /// a valid configuration.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| EmulatorError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| EmulatorError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn session_config(&self) -> SessionConfig {
        let policy = if self.abort_failed_updates {
            RetryExhaustedPolicy::Abort
        } else {
            RetryExhaustedPolicy::RestartDevice
        };
        SessionConfig::default()
            .with_device_type(self.device_type.clone())
            .with_firmware(FirmwareConfig::default().with_exhausted_policy(policy))
    }

    pub fn virtual_display(&self) -> VirtualDisplay {
        VirtualDisplay::builder()
            .with_columns(self.display.columns)
            .with_idle_message(self.display.idle_message.clone())
            .build()
    }

    pub fn firmware_dir(&self) -> PathBuf {
        self.data_dir.join("firmware")
    }
}
