//! Error types for the emulator.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EmulatorError>;

#[derive(Debug, Error)]
pub enum EmulatorError {
    #[error("Invalid display line {line} (max {max})")]
    InvalidLine { line: usize, max: usize },

    #[error("Cannot read {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration in {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Invalid argument for {command}: {reason}")]
    InvalidArgument {
        command: String,
        reason: String,
    },
}

impl EmulatorError {
    pub fn invalid_argument(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            command: command.into(),
            reason: reason.into(),
        }
    }
}
