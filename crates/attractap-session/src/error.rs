//! Error types for the session manager.

use attractap_firmware::FirmwareError;
use attractap_hardware::HardwareError;
use attractap_network::NetworkError;
use attractap_protocol::ProtocolError;
use attractap_storage::StorageError;

/// Result type alias for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Nothing can be sent before the transport is connected
    #[error("Not connected to server")]
    NotConnected,

    /// The server rejected the registration request
    #[error("Registration failed: {message}")]
    RegistrationFailed { message: String },

    /// The session task is gone
    #[error("Session stopped")]
    Stopped,

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Card error: {0}")]
    Hardware(#[from] HardwareError),

    #[error("Firmware error: {0}")]
    Firmware(#[from] FirmwareError),

    #[error(transparent)]
    Core(#[from] attractap_core::Error),
}

impl SessionError {
    pub fn registration_failed(message: impl Into<String>) -> Self {
        Self::RegistrationFailed {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_failed_display() {
        let error = SessionError::registration_failed("device type unknown");
        assert_eq!(error.to_string(), "Registration failed: device type unknown");
    }

    #[test]
    fn test_protocol_error_converts() {
        let error: SessionError = ProtocolError::MessageTooLarge {
            size: 2048,
            max_size: 1024,
        }
        .into();
        assert!(matches!(error, SessionError::Protocol(_)));
    }
}
