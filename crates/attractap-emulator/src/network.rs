//! Simulated Wi-Fi link backed by the stored credentials.
//!
//! The desktop always has a network, so the link is a flag the console can
//! drop (`wifi down`). The session then asks for an auto-connect, which
//! succeeds only while credentials are saved in the `wifi` namespace.

use attractap_core::LocalNetwork;
use attractap_storage::{SharedStore, StorageResult, WifiCredentials, WifiPrefs};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

pub struct SimulatedWifi {
    prefs: WifiPrefs,
    link_up: AtomicBool,
}

impl SimulatedWifi {
    /// Starts with the link up.
    pub fn new(store: SharedStore) -> Self {
        Self {
            prefs: WifiPrefs::new(store),
            link_up: AtomicBool::new(true),
        }
    }

    /// Save credentials and bring the link up.
    pub fn join(&self, credentials: &WifiCredentials) -> StorageResult<()> {
        self.prefs.save(credentials)?;
        info!(ssid = %credentials.ssid, "Joined network");
        self.link_up.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn forget(&self) -> StorageResult<()> {
        info!("Saved network forgotten");
        self.prefs.clear()
    }

    pub fn drop_link(&self) {
        warn!("Wi-Fi link lost");
        self.link_up.store(false, Ordering::SeqCst);
    }

    pub fn saved_ssid(&self) -> Option<String> {
        match self.prefs.load() {
            Ok(credentials) => credentials.map(|c| c.ssid),
            Err(e) => {
                warn!(error = %e, "Cannot read Wi-Fi credentials");
                None
            }
        }
    }
}

impl LocalNetwork for SimulatedWifi {
    fn is_reachable(&self) -> bool {
        self.link_up.load(Ordering::SeqCst)
    }

    fn has_saved_credentials(&self) -> bool {
        self.saved_ssid().is_some()
    }

    fn try_auto_connect(&self) -> bool {
        let Some(ssid) = self.saved_ssid() else {
            return false;
        };
        info!(%ssid, "Reconnecting with saved credentials");
        self.link_up.store(true, Ordering::SeqCst);
        true
    }
}
