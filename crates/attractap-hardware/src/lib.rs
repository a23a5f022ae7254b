//! NFC reader abstraction and card controller for the Attractap terminal.
//!
//! The crate is split into three layers:
//!
//! - [`traits::CardReaderChip`]: one bounded transaction per call against the
//!   reader chip (NTAG 424 DNA cards)
//! - [`controller::CardController`]: a non-blocking state machine that
//!   detects taps, runs card operations and isolates chip faults with
//!   backoff and a cooldown
//! - [`service::CardControllerService`]: the tokio task that owns the
//!   controller, with a cloneable [`CardControllerHandle`] for requests
//!
//! ```no_run
//! use attractap_hardware::{CardControllerConfig, CardControllerService};
//! use attractap_hardware::mock::MockChip;
//!
//! #[tokio::main]
//! async fn main() -> attractap_hardware::Result<()> {
//!     let (chip, _handle) = MockChip::new();
//!     let (service, mut taps) = CardControllerService::spawn(chip, CardControllerConfig::default());
//!     service.handle().set_card_checking(true).await?;
//!
//!     while let Some(uid) = taps.recv().await {
//!         println!("Card tapped: {uid}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod controller;
pub mod devices;
pub mod error;
pub mod mock;
pub mod service;
pub mod traits;
pub mod types;

pub use controller::{
    CardController, CardControllerConfig, CardOperation, CardPhase, CardRequest, backoff_delay,
};
pub use devices::AnyCardReader;
pub use error::{HardwareError, Result};
pub use service::{CardControllerHandle, CardControllerService, TapReceiver};
pub use traits::CardReaderChip;
pub use types::{ChipVersion, ControllerStatus, DetectedCard};
