use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Invalid server configuration: {message}")]
    InvalidServerConfig { message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    // Card data errors
    #[error("Invalid key: {message}")]
    InvalidKey { message: String },

    #[error("Invalid key number: {0} (expected 0-4)")]
    InvalidKeyNumber(u8),

    #[error("Invalid card UID: {message}")]
    InvalidCardUid { message: String },

    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    // State machine errors
    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn invalid_server_config(message: impl Into<String>) -> Self {
        Self::InvalidServerConfig {
            message: message.into(),
        }
    }

    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }

    pub fn invalid_card_uid(message: impl Into<String>) -> Self {
        Self::InvalidCardUid {
            message: message.into(),
        }
    }

    pub fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidStateTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
