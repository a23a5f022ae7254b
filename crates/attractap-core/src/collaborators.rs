//! Interfaces of the components that live outside the core.
//!
//! The screen layer, the local network service and the platform are handed to
//! the core as trait objects at construction time. All methods are
//! synchronous and must return quickly; implementations that need to do real
//! work should queue it.
//!
//! Plain closures implement [`TapListener`] and [`DeviceControl`], so tests
//! and small binaries can wire them without defining a type:
//!
//! ```
//! use attractap_core::{CardUid, collaborators::TapListener};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! let taps = AtomicUsize::new(0);
//! let listener = |_uid: &CardUid| {
//!     taps.fetch_add(1, Ordering::SeqCst);
//! };
//! listener.on_card_tapped(&CardUid::new(vec![1, 2, 3, 4]).unwrap());
//! assert_eq!(taps.load(Ordering::SeqCst), 1);
//! ```

use crate::CardUid;
use crate::content::{ConnectionStatus, DisplayContent, SelectItemPrompt};

/// Receives everything the core wants to show.
pub trait DisplaySink: Send + Sync {
    /// Replace the main content area.
    fn show_content(&self, content: DisplayContent);

    /// Update the connection indicator.
    fn show_connection_status(&self, status: &ConnectionStatus);

    /// Open a selection dialog. The user's choice comes back to the session
    /// as a select-item intent.
    fn show_select_item(&self, prompt: SelectItemPrompt);

    /// Close a selection dialog that is still open.
    fn close_select_item(&self);
}

/// Local network (Wi-Fi) service.
///
/// Connection changes are pushed to the session as intents; the session
/// additionally polls [`is_reachable`](LocalNetwork::is_reachable) before
/// each connection attempt.
pub trait LocalNetwork: Send + Sync {
    fn is_reachable(&self) -> bool;

    fn has_saved_credentials(&self) -> bool;

    /// Start connecting with saved credentials. Returns `false` when no
    /// attempt could be started.
    fn try_auto_connect(&self) -> bool;
}

/// Raw card-tap notifications for UI feedback.
pub trait TapListener: Send + Sync {
    fn on_card_tapped(&self, uid: &CardUid);
}

impl<F> TapListener for F
where
    F: Fn(&CardUid) + Send + Sync,
{
    fn on_card_tapped(&self, uid: &CardUid) {
        self(uid)
    }
}

/// Platform hooks.
pub trait DeviceControl: Send + Sync {
    /// Restart the device. On hardware this does not return.
    fn restart(&self);
}

impl<F> DeviceControl for F
where
    F: Fn() + Send + Sync,
{
    fn restart(&self) {
        self()
    }
}

/// Local network that is always reachable. Used by hosts where the network
/// is managed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysReachable;

impl LocalNetwork for AlwaysReachable {
    fn is_reachable(&self) -> bool {
        true
    }

    fn has_saved_credentials(&self) -> bool {
        true
    }

    fn try_auto_connect(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_closure_device_control() {
        let restarted = AtomicBool::new(false);
        let control = || restarted.store(true, Ordering::SeqCst);
        control.restart();
        assert!(restarted.load(Ordering::SeqCst));
    }

    #[test]
    fn test_always_reachable() {
        let network = AlwaysReachable;
        assert!(network.is_reachable());
        assert!(network.try_auto_connect());
    }
}
