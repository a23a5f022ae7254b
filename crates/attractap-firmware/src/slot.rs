//! Writable firmware image slots.
//!
//! A slot receives one image at a time: `begin`, any number of `write`
//! calls, then either `finalize` + `set_boot_target` or `abort`.

use crate::error::{FirmwareError, Result};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Storage the next firmware image is written into.
pub trait ImageSlot: Send {
    /// Open the slot for a new image, discarding any partial one.
    fn begin(&mut self) -> Result<()>;

    /// Append `data` to the image.
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Complete and validate the written image.
    fn finalize(&mut self) -> Result<()>;

    /// Boot the finalized image on next start.
    fn set_boot_target(&mut self) -> Result<()>;

    /// Drop the partial image and release the slot.
    fn abort(&mut self);
}

/// Phase of a [`MemoryImageSlot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlotPhase {
    #[default]
    Idle,
    Writing,
    Finalized,
    BootTarget,
    Aborted,
}

#[derive(Debug, Default)]
struct MemorySlotState {
    phase: SlotPhase,
    image: Vec<u8>,
    writes: usize,
    fail_write_at: Option<usize>,
    fail_begin: bool,
}

/// In-memory slot. Clones share the same image, so a test can keep one
/// clone for inspection and hand the other to the updater.
#[derive(Debug, Clone, Default)]
pub struct MemoryImageSlot {
    state: Arc<Mutex<MemorySlotState>>,
}

impl MemoryImageSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemorySlotState> {
        // Only a panicking test thread can poison the lock.
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Make the write with zero-based number `write` fail.
    pub fn fail_write_at(&self, write: usize) {
        self.state().fail_write_at = Some(write);
    }

    pub fn fail_begin(&self, fail: bool) {
        self.state().fail_begin = fail;
    }

    pub fn image(&self) -> Vec<u8> {
        self.state().image.clone()
    }

    pub fn phase(&self) -> SlotPhase {
        self.state().phase
    }

    pub fn writes(&self) -> usize {
        self.state().writes
    }
}

impl ImageSlot for MemoryImageSlot {
    fn begin(&mut self) -> Result<()> {
        let mut state = self.state();
        if state.fail_begin {
            return Err(FirmwareError::slot_unavailable("no update partition"));
        }
        state.phase = SlotPhase::Writing;
        state.image.clear();
        state.writes = 0;
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        let mut state = self.state();
        if state.phase != SlotPhase::Writing {
            return Err(FirmwareError::write("slot not open"));
        }
        if state.fail_write_at == Some(state.writes) {
            return Err(FirmwareError::write("flash write error"));
        }
        state.image.extend_from_slice(data);
        state.writes += 1;
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        let mut state = self.state();
        if state.phase != SlotPhase::Writing || state.image.is_empty() {
            return Err(FirmwareError::finalize("no image written"));
        }
        state.phase = SlotPhase::Finalized;
        Ok(())
    }

    fn set_boot_target(&mut self) -> Result<()> {
        let mut state = self.state();
        if state.phase != SlotPhase::Finalized {
            return Err(FirmwareError::finalize("image not finalized"));
        }
        state.phase = SlotPhase::BootTarget;
        Ok(())
    }

    fn abort(&mut self) {
        let mut state = self.state();
        state.phase = SlotPhase::Aborted;
        state.image.clear();
    }
}

const PARTIAL_IMAGE: &str = "firmware.bin.part";
const IMAGE: &str = "firmware.bin";
const BOOT_TARGET: &str = "boot_target";

/// Slot backed by a directory.
///
/// The image is streamed into `firmware.bin.part`, renamed to
/// `firmware.bin` on finalize, and `boot_target` names the image to boot.
#[derive(Debug)]
pub struct FileImageSlot {
    dir: PathBuf,
    file: Option<File>,
    written: u64,
}

impl FileImageSlot {
    /// Use `dir` for images, creating it if needed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            file: None,
            written: 0,
        })
    }

    pub fn image_path(&self) -> PathBuf {
        self.dir.join(IMAGE)
    }

    pub fn boot_target_path(&self) -> PathBuf {
        self.dir.join(BOOT_TARGET)
    }

    fn partial_path(&self) -> PathBuf {
        self.dir.join(PARTIAL_IMAGE)
    }
}

impl ImageSlot for FileImageSlot {
    fn begin(&mut self) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(self.partial_path())
            .map_err(|e| FirmwareError::slot_unavailable(e.to_string()))?;
        self.file = Some(file);
        self.written = 0;
        debug!(path = %self.partial_path().display(), "Image slot opened");
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| FirmwareError::write("slot not open"))?;
        file.write_all(data)
            .map_err(|e| FirmwareError::write(e.to_string()))?;
        self.written += data.len() as u64;
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        let mut file = self
            .file
            .take()
            .ok_or_else(|| FirmwareError::finalize("slot not open"))?;
        if self.written == 0 {
            return Err(FirmwareError::finalize("no image written"));
        }
        file.flush()?;
        file.sync_all()?;
        drop(file);
        fs::rename(self.partial_path(), self.image_path())?;
        info!(bytes = self.written, path = %self.image_path().display(), "Image finalized");
        Ok(())
    }

    fn set_boot_target(&mut self) -> Result<()> {
        if !self.image_path().exists() {
            return Err(FirmwareError::finalize("image not finalized"));
        }
        fs::write(self.boot_target_path(), IMAGE)?;
        Ok(())
    }

    fn abort(&mut self) {
        self.file = None;
        self.written = 0;
        if let Err(e) = fs::remove_file(self.partial_path())
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(error = %e, "Failed to remove partial image");
        }
    }
}
