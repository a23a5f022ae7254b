//! Session timing and identity settings.

use attractap_core::FirmwareInfo;
use attractap_core::constants::{
    CERTIFICATE_FAILURE_WINDOW_MS, CONNECTION_READY_DELAY_MS, CONNECTION_RETRY_INTERVAL_MS,
    CONNECTION_TIMEOUT_MS, DEVICE_TYPE, HEARTBEAT_INTERVAL_MS, MAX_MESSAGE_SIZE,
};
use attractap_firmware::FirmwareConfig;
use std::time::Duration;

/// Configuration for a [`SessionManager`](crate::SessionManager).
///
/// # Example
///
/// ```
/// use attractap_session::SessionConfig;
/// use std::time::Duration;
///
/// let config = SessionConfig::default().with_heartbeat_interval(Duration::from_secs(5));
/// assert_eq!(config.retry_interval, Duration::from_secs(1));
/// assert_eq!(config.max_message_size, 1024);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Minimum spacing between connection attempts
    pub retry_interval: Duration,

    /// Bound on the transport handshake and on the wait for an auth answer
    pub connect_timeout: Duration,

    /// Pause between `Connected` and the first auth/registration request
    pub ready_delay: Duration,

    pub heartbeat_interval: Duration,

    /// A secure connection dropped within this window before authentication
    /// counts as a certificate failure
    pub certificate_failure_window: Duration,

    /// Period of the session's housekeeping tick
    pub tick_interval: Duration,

    /// Largest serialized outbound message
    pub max_message_size: usize,

    /// `deviceType` sent with a registration request
    pub device_type: String,

    /// Reported in `READER_FIRMWARE_INFO` and used as the update baseline
    pub firmware_info: FirmwareInfo,

    pub firmware: FirmwareConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_millis(CONNECTION_RETRY_INTERVAL_MS),
            connect_timeout: Duration::from_millis(CONNECTION_TIMEOUT_MS),
            ready_delay: Duration::from_millis(CONNECTION_READY_DELAY_MS),
            heartbeat_interval: Duration::from_millis(HEARTBEAT_INTERVAL_MS),
            certificate_failure_window: Duration::from_millis(CERTIFICATE_FAILURE_WINDOW_MS),
            tick_interval: Duration::from_millis(100),
            max_message_size: MAX_MESSAGE_SIZE,
            device_type: DEVICE_TYPE.to_string(),
            firmware_info: FirmwareInfo::default(),
            firmware: FirmwareConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_device_type(mut self, device_type: impl Into<String>) -> Self {
        self.device_type = device_type.into();
        self
    }

    pub fn with_firmware_info(mut self, info: FirmwareInfo) -> Self {
        self.firmware_info = info;
        self
    }

    pub fn with_firmware(mut self, firmware: FirmwareConfig) -> Self {
        self.firmware = firmware;
        self
    }
}
