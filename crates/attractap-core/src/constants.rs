//! Core constants for the Attractap terminal.
//!
//! Timing values are expressed in milliseconds and converted with
//! [`Duration::from_millis`](std::time::Duration::from_millis) at the point of
//! use. They match the behaviour the access-control server expects from a
//! reader; changing them changes how quickly a terminal reconnects, retries and
//! gives up.
//!
//! # Usage
//!
//! ```
//! use attractap_core::constants::*;
//! use std::time::Duration;
//!
//! let heartbeat = Duration::from_millis(HEARTBEAT_INTERVAL_MS);
//! assert_eq!(heartbeat.as_secs(), 25);
//! assert_eq!(MAX_MESSAGE_SIZE, 1024);
//! ```

// ============================================================================
// Session
// ============================================================================

/// Minimum time between two connection attempts.
///
/// The session manager never starts a new attempt while less than this
/// amount of time has passed since the previous one. Error states relax back
/// to disconnected after the same window.
pub const CONNECTION_RETRY_INTERVAL_MS: u64 = 1_000;

/// Upper bound for a transport handshake, and for an unanswered
/// authentication request.
pub const CONNECTION_TIMEOUT_MS: u64 = 10_000;

/// Delay between the transport reporting "connected" and the first
/// authentication or registration request.
pub const CONNECTION_READY_DELAY_MS: u64 = 100;

/// Interval between client heartbeats while authenticated.
pub const HEARTBEAT_INTERVAL_MS: u64 = 25_000;

/// A secure connection that drops within this window after the handshake,
/// before authentication completes, counts as a certificate failure.
pub const CERTIFICATE_FAILURE_WINDOW_MS: u64 = 5_000;

/// Maximum serialized size of an outbound JSON message in bytes.
///
/// Larger messages are rejected locally before they reach the transport.
pub const MAX_MESSAGE_SIZE: usize = 1024;

/// Port that selects the secure websocket scheme.
pub const SECURE_PORT: u16 = 443;

/// Path of the reader websocket endpoint on the server.
pub const WEBSOCKET_PATH: &str = "/api/attractap/websocket";

/// Device type announced in registration requests.
pub const DEVICE_TYPE: &str = "ESP32_CYD";

// ============================================================================
// Certificate selection
// ============================================================================

/// Consecutive failures tolerated for the remembered certificate before the
/// selector falls back to a linear scan.
pub const MAX_REMEMBERED_CERT_FAILURES: u8 = 5;

// ============================================================================
// Firmware update
// ============================================================================

/// Time to wait for a requested firmware chunk before requesting it again.
pub const FIRMWARE_CHUNK_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Consecutive chunk timeouts after which the transfer is considered
/// unrecoverable.
pub const MAX_FIRMWARE_CHUNK_DOWNLOAD_RETRY_ATTEMPTS: u8 = 10;

/// Delay between a successfully installed image and the reboot.
pub const FIRMWARE_REBOOT_DELAY_MS: u64 = 3_000;

/// Progress is reported to the display in steps of this many percent.
pub const FIRMWARE_PROGRESS_STEP_PERCENT: u8 = 5;

// ============================================================================
// Card controller
// ============================================================================

/// Consecutive hardware errors that disable the card controller.
pub const MAX_CONSECUTIVE_ERRORS: u32 = 10;

/// How long the card controller stays disabled once the error threshold is
/// reached.
pub const NFC_DISABLE_DURATION_MS: u64 = 60_000;

/// First retry delay after a hardware error. Doubles per consecutive error.
pub const NFC_BASE_BACKOFF_MS: u64 = 1_000;

/// Upper bound for the hardware retry delay.
pub const NFC_MAX_BACKOFF_MS: u64 = 30_000;

/// Minimum dwell time in `Ready` before the next scan starts.
pub const NFC_SCAN_DWELL_MS: u64 = 200;

/// Timeout handed to the chip for one passive-detect poll.
pub const NFC_SCAN_TIMEOUT_MS: u64 = 200;

/// Safety bound layered on top of the chip's own poll timeout.
pub const NFC_SCAN_SAFETY_TIMEOUT_MS: u64 = 300;

/// Safety bound for chip detection during initialization.
pub const NFC_INIT_TIMEOUT_MS: u64 = 1_000;

/// Maximum payload of a card write operation.
pub const MAX_WRITE_DATA_LENGTH: usize = 64;

/// File on the card that receives custom data writes.
pub const CUSTOM_DATA_FILE: u8 = 0x03;

/// Highest application key number on the supported card family.
pub const MAX_KEY_NUMBER: u8 = 4;

/// Length of an application key in bytes.
pub const KEY_LENGTH: usize = 16;

// ============================================================================
// Display colors
// ============================================================================

pub const COLOR_WHITE: u32 = 0xFFFFFF;
pub const COLOR_LIGHT_GRAY: u32 = 0xAAAAAA;
pub const COLOR_RED: u32 = 0xF44336;
pub const COLOR_GREEN: u32 = 0x4CAF50;
pub const COLOR_BLUE: u32 = 0x2196F3;
pub const COLOR_PURPLE: u32 = 0x9C27B0;
pub const COLOR_YELLOW: u32 = 0xFFFF00;
pub const COLOR_CYAN: u32 = 0x00FFFF;
pub const COLOR_ERROR_RED: u32 = 0xFF0000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_bounds() {
        assert!(NFC_BASE_BACKOFF_MS < NFC_MAX_BACKOFF_MS);
        assert!(NFC_SCAN_TIMEOUT_MS < NFC_SCAN_SAFETY_TIMEOUT_MS);
    }

    #[test]
    fn test_timeouts() {
        assert_eq!(CONNECTION_TIMEOUT_MS, 10_000);
        assert_eq!(FIRMWARE_CHUNK_REQUEST_TIMEOUT_MS, 10_000);
        assert_eq!(NFC_DISABLE_DURATION_MS, 60_000);
    }
}
