//! Mock device implementations for testing and development.
//!
//! This module provides a simulated reader chip that can be controlled
//! programmatically without requiring physical hardware.

pub mod chip;

pub use chip::{MOCK_FIRMWARE_VERSION, MockCall, MockCard, MockChip, MockChipHandle, MockOperation};
