//! Recording collaborators for tests and headless runs.

use attractap_core::{
    CardUid, ConnectionStatus, DeviceControl, DisplayContent, DisplaySink, LocalNetwork,
    SelectItemPrompt, TapListener,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Only a panicking test can poison the lock.
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Display that records everything it is asked to show.
#[derive(Debug, Default)]
pub struct RecordingDisplay {
    contents: Mutex<Vec<DisplayContent>>,
    statuses: Mutex<Vec<ConnectionStatus>>,
    prompts: Mutex<Vec<SelectItemPrompt>>,
    prompt_open: AtomicBool,
}

impl RecordingDisplay {
    pub fn contents(&self) -> Vec<DisplayContent> {
        lock(&self.contents).clone()
    }

    pub fn last_content(&self) -> Option<DisplayContent> {
        lock(&self.contents).last().cloned()
    }

    pub fn statuses(&self) -> Vec<ConnectionStatus> {
        lock(&self.statuses).clone()
    }

    pub fn last_status(&self) -> Option<ConnectionStatus> {
        lock(&self.statuses).last().cloned()
    }

    pub fn prompts(&self) -> Vec<SelectItemPrompt> {
        lock(&self.prompts).clone()
    }

    /// Whether a selection dialog is currently open.
    pub fn prompt_open(&self) -> bool {
        self.prompt_open.load(Ordering::SeqCst)
    }
}

impl DisplaySink for RecordingDisplay {
    fn show_content(&self, content: DisplayContent) {
        lock(&self.contents).push(content);
    }

    fn show_connection_status(&self, status: &ConnectionStatus) {
        lock(&self.statuses).push(status.clone());
    }

    fn show_select_item(&self, prompt: SelectItemPrompt) {
        lock(&self.prompts).push(prompt);
        self.prompt_open.store(true, Ordering::SeqCst);
    }

    fn close_select_item(&self) {
        self.prompt_open.store(false, Ordering::SeqCst);
    }
}

/// Device control that counts restarts.
#[derive(Debug, Default)]
pub struct RecordingDevice {
    restarts: AtomicUsize,
}

impl RecordingDevice {
    pub fn restarts(&self) -> usize {
        self.restarts.load(Ordering::SeqCst)
    }
}

impl DeviceControl for RecordingDevice {
    fn restart(&self) {
        self.restarts.fetch_add(1, Ordering::SeqCst);
    }
}

/// Local network whose reachability a test flips.
#[derive(Debug)]
pub struct SwitchableNetwork {
    reachable: AtomicBool,
    saved_credentials: bool,
    auto_connects: AtomicUsize,
}

impl SwitchableNetwork {
    pub fn new(reachable: bool, saved_credentials: bool) -> Self {
        Self {
            reachable: AtomicBool::new(reachable),
            saved_credentials,
            auto_connects: AtomicUsize::new(0),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn auto_connects(&self) -> usize {
        self.auto_connects.load(Ordering::SeqCst)
    }
}

impl LocalNetwork for SwitchableNetwork {
    fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    fn has_saved_credentials(&self) -> bool {
        self.saved_credentials
    }

    fn try_auto_connect(&self) -> bool {
        self.auto_connects.fetch_add(1, Ordering::SeqCst);
        true
    }
}

/// Tap listener that records every UID.
#[derive(Debug, Default)]
pub struct RecordingTaps {
    taps: Mutex<Vec<CardUid>>,
}

impl RecordingTaps {
    pub fn taps(&self) -> Vec<CardUid> {
        lock(&self.taps).clone()
    }
}

impl TapListener for RecordingTaps {
    fn on_card_tapped(&self, uid: &CardUid) {
        lock(&self.taps).push(uid.clone());
    }
}
