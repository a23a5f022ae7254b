//! Over-the-air firmware installation for the Attractap terminal.
//!
//! [`FirmwareUpdater`] drives a chunked transfer from the server into an
//! [`ImageSlot`] and tells the session which chunk to request next, what to
//! show and when to restart.

pub mod error;
pub mod slot;
pub mod updater;

pub use error::{FirmwareError, Result};
pub use slot::{FileImageSlot, ImageSlot, MemoryImageSlot, SlotPhase};
pub use updater::{
    FirmwareAction, FirmwareConfig, FirmwareUpdater, RestartReason, RetryExhaustedPolicy,
    TransferProgress, failure_content,
};
