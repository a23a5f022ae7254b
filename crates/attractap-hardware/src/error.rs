//! Error types for reader chip and card operations.
//!
//! Errors fall into two groups. Chip faults (timeouts, bus errors, a chip
//! that does not answer) count towards the controller's consecutive-error
//! limit. Card-level outcomes (wrong key, no card in the field) are reported
//! to the caller and leave the fault counter alone; see
//! [`HardwareError::is_fault`].

/// Result type alias for hardware operations.
pub type Result<T> = std::result::Result<T, HardwareError>;

/// Errors that can occur during reader chip and card operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HardwareError {
    /// Chip is not connected or stopped answering.
    #[error("Device disconnected: {device}")]
    Disconnected { device: String },

    /// Operation timed out after specified duration.
    #[error("Operation timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Bus-level communication error.
    #[error("Communication error: {message}")]
    CommunicationError { message: String },

    /// Chip initialization failed.
    #[error("Initialization failed: {message}")]
    InitializationFailed { message: String },

    /// No card in the field.
    #[error("No card present")]
    NoCard,

    /// Card is not of the supported family.
    #[error("Unsupported card: {message}")]
    UnsupportedCard { message: String },

    /// Card rejected the key.
    #[error("Authentication failed for key {key_number}")]
    AuthenticationFailed { key_number: u8 },

    /// Card refused a command.
    #[error("Card command failed: {message}")]
    CommandFailed { message: String },

    /// Write payload exceeds the card buffer.
    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// Controller cannot accept requests in its current state.
    #[error("Card controller not ready: {status}")]
    NotReady { status: String },

    /// Controller task has stopped.
    #[error("Card controller stopped")]
    ControllerStopped,
}

impl HardwareError {
    /// Create a new disconnected error.
    pub fn disconnected(device: impl Into<String>) -> Self {
        Self::Disconnected {
            device: device.into(),
        }
    }

    /// Create a new timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create a new communication error.
    pub fn communication(message: impl Into<String>) -> Self {
        Self::CommunicationError {
            message: message.into(),
        }
    }

    /// Create a new initialization failed error.
    pub fn initialization_failed(message: impl Into<String>) -> Self {
        Self::InitializationFailed {
            message: message.into(),
        }
    }

    pub fn unsupported_card(message: impl Into<String>) -> Self {
        Self::UnsupportedCard {
            message: message.into(),
        }
    }

    pub fn command_failed(message: impl Into<String>) -> Self {
        Self::CommandFailed {
            message: message.into(),
        }
    }

    pub fn not_ready(status: impl ToString) -> Self {
        Self::NotReady {
            status: status.to_string(),
        }
    }

    /// Whether this error indicates a misbehaving chip rather than a card
    /// outcome.
    pub fn is_fault(&self) -> bool {
        matches!(
            self,
            Self::Disconnected { .. }
                | Self::Timeout { .. }
                | Self::CommunicationError { .. }
                | Self::InitializationFailed { .. }
        )
    }
}
