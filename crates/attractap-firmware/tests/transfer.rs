use attractap_firmware::{
    FirmwareAction, FirmwareConfig, FirmwareUpdater, MemoryImageSlot, RestartReason, SlotPhase,
};
use proptest::prelude::*;
use std::time::Duration;
use tokio::time::Instant;

fn new_updater(slot: &MemoryImageSlot) -> FirmwareUpdater {
    FirmwareUpdater::new(FirmwareConfig::default(), "1.0.0", Box::new(slot.clone()))
}

fn requested(actions: &[FirmwareAction]) -> Option<u32> {
    actions.iter().find_map(|action| match action {
        FirmwareAction::RequestChunk { index } => Some(*index),
        _ => None,
    })
}

fn restart(actions: &[FirmwareAction]) -> Option<(Duration, RestartReason)> {
    actions.iter().find_map(|action| match action {
        FirmwareAction::Restart { delay, reason } => Some((*delay, *reason)),
        _ => None,
    })
}

#[test]
fn test_tenth_timeout_restarts_device() {
    let slot = MemoryImageSlot::new();
    let mut updater = new_updater(&slot);
    let mut now = Instant::now();
    updater.start("2.0.0", 8, now).unwrap();
    updater.handle_chunk(b"chunk-0", now);

    for attempt in 1..=9u8 {
        now += Duration::from_secs(10);
        let actions = updater.poll(now);
        assert_eq!(requested(&actions), Some(1), "attempt {attempt}");
        assert_eq!(restart(&actions), None);
        assert_eq!(updater.progress().unwrap().retries, attempt);
    }

    now += Duration::from_secs(10);
    let actions = updater.poll(now);
    assert_eq!(requested(&actions), None);
    assert_eq!(
        restart(&actions),
        Some((Duration::ZERO, RestartReason::TransferFailed))
    );
    assert!(!updater.is_active());
    assert_eq!(slot.phase(), SlotPhase::Aborted);
}

#[test]
fn test_polls_between_timeouts_do_nothing() {
    let slot = MemoryImageSlot::new();
    let mut updater = new_updater(&slot);
    let start = Instant::now();
    updater.start("2.0.0", 2, start).unwrap();

    for ms in (0..10_000).step_by(500) {
        assert!(updater.poll(start + Duration::from_millis(ms)).is_empty());
    }
    assert_eq!(updater.progress().unwrap().retries, 0);
}

#[test]
fn test_restart_after_install_uses_reboot_delay() {
    let slot = MemoryImageSlot::new();
    let mut updater = new_updater(&slot);
    let now = Instant::now();
    updater.start("2.0.0", 1, now).unwrap();

    let actions = updater.handle_chunk(&[0xAB; 32], now);
    assert_eq!(
        restart(&actions),
        Some((Duration::from_millis(3000), RestartReason::UpdateInstalled))
    );
    assert_eq!(slot.image(), vec![0xAB; 32]);
}

#[test]
fn test_new_transfer_after_failure() {
    let slot = MemoryImageSlot::new();
    slot.fail_write_at(0);
    let mut updater = new_updater(&slot);
    let now = Instant::now();
    updater.start("2.0.0", 2, now).unwrap();
    let actions = updater.handle_chunk(b"x", now);
    assert_eq!(restart(&actions), None);
    assert!(!updater.is_active());

    slot.fail_write_at(usize::MAX);
    let actions = updater.start("2.0.0", 2, now).unwrap();
    assert_eq!(requested(&actions), Some(0));
}

proptest! {
    /// Requested chunk indices never go backwards and never skip.
    #[test]
    fn prop_chunk_requests_are_monotonic(
        total in 1u32..40,
        events in prop::collection::vec(any::<bool>(), 0..120),
    ) {
        let slot = MemoryImageSlot::new();
        let mut updater = new_updater(&slot);
        let mut now = Instant::now();
        let actions = updater.start("2.0.0", total, now).unwrap();
        let mut last = requested(&actions).unwrap();

        for deliver in events {
            if !updater.is_active() {
                break;
            }
            let actions = if deliver {
                now += Duration::from_millis(100);
                updater.handle_chunk(&[1, 2, 3], now)
            } else {
                now += Duration::from_secs(10);
                updater.poll(now)
            };
            if let Some(index) = requested(&actions) {
                prop_assert!(index == last || index == last + 1);
                prop_assert!(index < total);
                last = index;
            }
        }
    }
}
