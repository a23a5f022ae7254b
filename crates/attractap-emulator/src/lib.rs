//! Desktop terminal for the Attractap reader core.
//!
//! Runs the session against a real server over WebSocket, with an emulated card
//! reader driven from the console and the screen drawn as text.

pub mod config;
pub mod console;
pub mod display;
pub mod error;
pub mod network;

pub use config::{DisplaySettings, TerminalConfig, TransportKind};
pub use console::{ConsoleCommand, HELP};
pub use display::{Alignment, ScreenSink, VirtualDisplay, VirtualDisplayBuilder, align_text, truncate_text};
pub use error::{EmulatorError, Result};
pub use network::SimulatedWifi;
