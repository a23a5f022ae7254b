//! Chunked firmware transfer state machine.
//!
//! The updater does no I/O of its own apart from writing to its
//! [`ImageSlot`]. Every input (update announcement, received chunk, timer
//! poll) returns the [`FirmwareAction`]s the session has to carry out:
//! request a chunk, show something, or restart the device.
//!
//! ```text
//! start ──► RequestChunk(0)
//! chunk i ──► write ──► i < last: RequestChunk(i + 1)
//!                   └─► i = last: finalize, boot target, Restart(3 s)
//! poll ──► 10 s without chunk: RequestChunk(i) again, 10th time: policy
//! ```
//!
//! # Examples
//!
//! ```
//! use attractap_firmware::{FirmwareAction, FirmwareConfig, FirmwareUpdater, MemoryImageSlot};
//! use tokio::time::Instant;
//!
//! let slot = MemoryImageSlot::new();
//! let mut updater = FirmwareUpdater::new(FirmwareConfig::default(), "1.0.0", Box::new(slot.clone()));
//!
//! let actions = updater.start("1.1.0", 2, Instant::now()).unwrap();
//! assert!(actions.contains(&FirmwareAction::RequestChunk { index: 0 }));
//!
//! let actions = updater.handle_chunk(b"first", Instant::now());
//! assert!(actions.contains(&FirmwareAction::RequestChunk { index: 1 }));
//! ```

use crate::error::{FirmwareError, Result};
use crate::slot::ImageSlot;
use attractap_core::DisplayContent;
use attractap_core::constants::{
    COLOR_CYAN, COLOR_ERROR_RED, COLOR_GREEN, COLOR_LIGHT_GRAY, FIRMWARE_CHUNK_REQUEST_TIMEOUT_MS,
    FIRMWARE_PROGRESS_STEP_PERCENT, FIRMWARE_REBOOT_DELAY_MS,
    MAX_FIRMWARE_CHUNK_DOWNLOAD_RETRY_ATTEMPTS,
};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// What to do when chunk requests keep timing out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryExhaustedPolicy {
    /// Restart the device; the server re-announces the update after boot.
    #[default]
    RestartDevice,
    /// Abort the transfer and keep running the current firmware.
    Abort,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareConfig {
    pub chunk_timeout: Duration,
    /// Consecutive timeouts that end the transfer.
    pub max_retries: u8,
    pub reboot_delay: Duration,
    pub progress_step_percent: u8,
    pub exhausted_policy: RetryExhaustedPolicy,
}

impl Default for FirmwareConfig {
    fn default() -> Self {
        Self {
            chunk_timeout: Duration::from_millis(FIRMWARE_CHUNK_REQUEST_TIMEOUT_MS),
            max_retries: MAX_FIRMWARE_CHUNK_DOWNLOAD_RETRY_ATTEMPTS,
            reboot_delay: Duration::from_millis(FIRMWARE_REBOOT_DELAY_MS),
            progress_step_percent: FIRMWARE_PROGRESS_STEP_PERCENT,
            exhausted_policy: RetryExhaustedPolicy::default(),
        }
    }
}

impl FirmwareConfig {
    pub fn with_chunk_timeout(mut self, timeout: Duration) -> Self {
        self.chunk_timeout = timeout;
        self
    }

    pub fn with_exhausted_policy(mut self, policy: RetryExhaustedPolicy) -> Self {
        self.exhausted_policy = policy;
        self
    }
}

/// Why the updater asks for a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    UpdateInstalled,
    TransferFailed,
}

impl fmt::Display for RestartReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartReason::UpdateInstalled => f.write_str("update installed"),
            RestartReason::TransferFailed => f.write_str("firmware transfer failed"),
        }
    }
}

/// Side effect requested by the updater.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirmwareAction {
    /// Send a chunk request for `index`.
    RequestChunk { index: u32 },
    Display(DisplayContent),
    /// Restart the device after `delay`.
    Restart { delay: Duration, reason: RestartReason },
}

/// Snapshot of an active transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferProgress {
    pub target_version: String,
    pub total_chunks: u32,
    /// Index of the chunk currently requested.
    pub current_chunk: u32,
    pub retries: u8,
}

impl TransferProgress {
    pub fn percent(&self) -> u8 {
        percent(self.current_chunk, self.total_chunks)
    }
}

#[derive(Debug)]
struct Transfer {
    target_version: String,
    total_chunks: u32,
    current_chunk: u32,
    retries: u8,
    last_request_at: Instant,
    shown_step: u8,
}

fn percent(done: u32, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    (u64::from(done) * 100 / u64::from(total)).min(100) as u8
}

/// Firmware update driver.
pub struct FirmwareUpdater {
    config: FirmwareConfig,
    current_version: String,
    slot: Box<dyn ImageSlot>,
    transfer: Option<Transfer>,
}

impl fmt::Debug for FirmwareUpdater {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FirmwareUpdater")
            .field("config", &self.config)
            .field("current_version", &self.current_version)
            .field("transfer", &self.transfer)
            .finish()
    }
}

impl FirmwareUpdater {
    pub fn new(
        config: FirmwareConfig,
        current_version: impl Into<String>,
        slot: Box<dyn ImageSlot>,
    ) -> Self {
        Self {
            config,
            current_version: current_version.into(),
            slot,
            transfer: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.transfer.is_some()
    }

    pub fn progress(&self) -> Option<TransferProgress> {
        self.transfer.as_ref().map(|transfer| TransferProgress {
            target_version: transfer.target_version.clone(),
            total_chunks: transfer.total_chunks,
            current_chunk: transfer.current_chunk,
            retries: transfer.retries,
        })
    }

    /// Begin transferring `total_chunks` chunks of `target_version`.
    ///
    /// # Errors
    /// `TransferInProgress` while another transfer runs, `NoChunks` for an
    /// empty image, or the slot's error if it cannot be opened (a failure
    /// display is still worth showing; see [`failure_content`]).
    pub fn start(
        &mut self,
        target_version: &str,
        total_chunks: u32,
        now: Instant,
    ) -> Result<Vec<FirmwareAction>> {
        if self.transfer.is_some() {
            return Err(FirmwareError::TransferInProgress);
        }
        if total_chunks == 0 {
            return Err(FirmwareError::NoChunks);
        }

        self.slot.begin().inspect_err(|e| {
            error!(error = %e, "Failed to open image slot");
        })?;

        info!(
            current = %self.current_version,
            target = %target_version,
            chunks = total_chunks,
            "Firmware update started"
        );
        self.transfer = Some(Transfer {
            target_version: target_version.to_string(),
            total_chunks,
            current_chunk: 0,
            retries: 0,
            last_request_at: now,
            shown_step: 0,
        });

        let announce = DisplayContent::firmware("Firmware Update Available")
            .with_sub_message(format!(
                "Current: v{} → Available: v{}",
                self.current_version, target_version
            ))
            .with_text_color(COLOR_CYAN)
            .with_sub_text_color(COLOR_LIGHT_GRAY)
            .with_progress(0);
        Ok(vec![
            FirmwareAction::Display(announce),
            FirmwareAction::RequestChunk { index: 0 },
        ])
    }

    /// Write one received chunk and decide what comes next.
    pub fn handle_chunk(&mut self, data: &[u8], now: Instant) -> Vec<FirmwareAction> {
        let Some(transfer) = self.transfer.as_mut() else {
            warn!(len = data.len(), "Firmware chunk received with no transfer in progress");
            return Vec::new();
        };
        transfer.retries = 0;
        let index = transfer.current_chunk;
        let total = transfer.total_chunks;
        debug!(chunk = index, total, len = data.len(), "Firmware chunk received");

        if let Err(e) = self.slot.write(data) {
            return self.fail(&format!("OTA Write Error: {e}"));
        }

        let mut actions = Vec::new();
        let done = index + 1;
        let step = self.config.progress_step_percent.max(1);
        let reached = percent(done, total) / step;
        if let Some(transfer) = self.transfer.as_mut()
            && reached > transfer.shown_step
        {
            transfer.shown_step = reached;
            actions.push(FirmwareAction::Display(
                DisplayContent::firmware("Installing...")
                    .with_sub_message(format!("{done} / {total} chunks"))
                    .with_text_color(COLOR_CYAN)
                    .with_progress(percent(done, total)),
            ));
        }

        if done == total {
            actions.extend(self.complete());
            return actions;
        }

        if let Some(transfer) = self.transfer.as_mut() {
            transfer.current_chunk = done;
            transfer.last_request_at = now;
        }
        actions.push(FirmwareAction::RequestChunk { index: done });
        actions
    }

    /// Check the chunk timeout.
    pub fn poll(&mut self, now: Instant) -> Vec<FirmwareAction> {
        let timeout = self.config.chunk_timeout;
        let max_retries = self.config.max_retries;
        let Some(transfer) = self.transfer.as_mut() else {
            return Vec::new();
        };
        if now.duration_since(transfer.last_request_at) < timeout {
            return Vec::new();
        }

        transfer.retries += 1;
        if transfer.retries < max_retries {
            warn!(
                chunk = transfer.current_chunk,
                attempt = transfer.retries,
                max = max_retries,
                "Firmware chunk request timed out, requesting again"
            );
            transfer.last_request_at = now;
            return vec![FirmwareAction::RequestChunk {
                index: transfer.current_chunk,
            }];
        }

        error!(
            chunk = transfer.current_chunk,
            retries = transfer.retries,
            policy = ?self.config.exhausted_policy,
            "Firmware chunk download failed"
        );
        let mut actions = self.fail("Chunk download timed out");
        if self.config.exhausted_policy == RetryExhaustedPolicy::RestartDevice {
            actions.push(FirmwareAction::Restart {
                delay: Duration::ZERO,
                reason: RestartReason::TransferFailed,
            });
        }
        actions
    }

    fn complete(&mut self) -> Vec<FirmwareAction> {
        let activated = self
            .slot
            .finalize()
            .and_then(|()| self.slot.set_boot_target());
        if let Err(e) = activated {
            return self.fail(&e.to_string());
        }

        let total = self.transfer.take().map_or(0, |transfer| transfer.total_chunks);
        info!(
            chunks = total,
            delay_ms = self.config.reboot_delay.as_millis() as u64,
            "Firmware update installed, rebooting"
        );
        vec![
            FirmwareAction::Display(
                DisplayContent::firmware("Firmware Update Complete!")
                    .with_sub_message("Rebooting...")
                    .with_text_color(COLOR_GREEN)
                    .with_progress(100),
            ),
            FirmwareAction::Restart {
                delay: self.config.reboot_delay,
                reason: RestartReason::UpdateInstalled,
            },
        ]
    }

    /// Abort the transfer and release the slot.
    fn fail(&mut self, reason: &str) -> Vec<FirmwareAction> {
        error!(reason, "Firmware update failed");
        self.slot.abort();
        self.transfer = None;
        vec![FirmwareAction::Display(failure_content(reason))]
    }
}

/// Content shown when an update fails.
pub fn failure_content(reason: &str) -> DisplayContent {
    DisplayContent::firmware("Firmware Update Failed")
        .with_sub_message(reason)
        .with_text_color(COLOR_ERROR_RED)
}
