//! Session manager of the Attractap reader.
//!
//! Keeps the connection to the Attraccess server alive, authenticates the
//! reader, dispatches server requests to the card controller and the
//! firmware updater, and forwards card taps.
//!
//! # Components
//!
//! - [`SessionManager`]: owns the transport and runs the session loop
//! - [`SessionHandle`]: cloneable handle for local intents and status
//! - [`StateMachine`]: connection states with transition history
//! - [`testing`]: recording collaborators for tests

pub mod config;
pub mod content;
pub mod error;
pub mod handle;
pub mod inbound;
pub mod manager;
pub mod state;
pub mod testing;

pub use config::SessionConfig;
pub use error::{Result, SessionError};
pub use handle::{SessionHandle, SessionStatus};
pub use inbound::Inbound;
pub use manager::{SessionBuilder, SessionManager};
pub use state::{SessionState, StateMachine, StateTransition};
