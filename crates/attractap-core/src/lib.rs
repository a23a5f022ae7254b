//! Shared building blocks for the Attractap terminal.
//!
//! Errors, timing constants, validated domain types and the interfaces of the
//! collaborators (display, local network, platform) the core talks to.

pub mod collaborators;
pub mod constants;
pub mod content;
pub mod error;
pub mod types;

pub use collaborators::{AlwaysReachable, DeviceControl, DisplaySink, LocalNetwork, TapListener};
pub use content::{ConnectionStatus, ContentKind, DisplayContent, SelectItemPrompt, SelectOption};
pub use error::{Error, Result};
pub use types::*;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
