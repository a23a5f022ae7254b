//! Server requests routed to the card controller, the display and the
//! firmware updater, plus trust anchor selection for secure servers.

mod common;

use attractap_core::{AesKey, CardUid, ContentKind, KeyNumber};
use attractap_firmware::SlotPhase;
use attractap_hardware::mock::{MockCall, MockCard};
use attractap_network::mock::ConnectOutcome;
use attractap_protocol::EventKind;
use attractap_session::SessionState;
use attractap_storage::{CertificatePrefs, MemoryStore, RememberedCertificate, SharedStore};
use common::{Harness, HarnessBuilder};
use rstest::rstest;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

const UID: [u8; 7] = [0x04, 0xA1, 0xB2, 0xC3, 0xD4, 0xE5, 0xF6];
const ZERO_KEY: &str = "00000000000000000000000000000000";
const KEY_0: &str = "000102030405060708090a0b0c0d0e0f";
const KEY_1: &str = "101112131415161718191a1b1c1d1e1f";
const KEY_2: &str = "202122232425262728292a2b2c2d2e2f";

fn key(hex: &str) -> AesKey {
    AesKey::from_hex(hex).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_change_keys_rotates_master_first() {
    let harness = HarnessBuilder::new().identity("1", "t").start();
    harness.chip.present_card(MockCard::ntag424(UID));
    harness.wait_for_card_ready().await;
    harness.authenticate("Enroll Station").await;

    harness.send_event(
        "NFC_CHANGE_KEYS",
        json!({
            "authenticationKey": ZERO_KEY,
            "keys": {"2": KEY_2, "0": KEY_0, "1": KEY_1}
        }),
    );
    let responses = harness.wait_for_sent("CHANGE_KEYS", 1).await;

    assert_eq!(responses[0]["event"], "RESPONSE");
    assert_eq!(
        responses[0]["data"]["payload"],
        json!({
            "failedKeys": [],
            "successfulKeys": [0, 1, 2],
            "authenticationKey": ZERO_KEY
        })
    );
    assert_eq!(
        harness.chip.calls(),
        vec![
            MockCall::Authenticate { key_number: 0 },
            MockCall::ChangeKey { key_number: 0 },
            MockCall::Authenticate { key_number: 0 },
            MockCall::ChangeKey { key_number: 1 },
            MockCall::Authenticate { key_number: 0 },
            MockCall::ChangeKey { key_number: 2 },
        ]
    );

    let card = harness.chip.card().unwrap();
    assert_eq!(card.keys[0], key(KEY_0));
    assert_eq!(card.keys[1], key(KEY_1));
    assert_eq!(card.keys[2], key(KEY_2));
    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_change_keys_with_wrong_master_key_fails_every_key() {
    let harness = HarnessBuilder::new().identity("1", "t").start();
    harness
        .chip
        .present_card(MockCard::ntag424(UID).with_key(KeyNumber::MASTER, key(KEY_2)));
    harness.wait_for_card_ready().await;
    harness.authenticate("Enroll Station").await;

    harness.send_event(
        "NFC_CHANGE_KEYS",
        json!({"authenticationKey": ZERO_KEY, "keys": {"0": KEY_0, "1": KEY_1, "2": KEY_2}}),
    );
    let responses = harness.wait_for_sent("CHANGE_KEYS", 1).await;

    let payload = &responses[0]["data"]["payload"];
    assert_eq!(payload["successfulKeys"], json!([]));
    assert_eq!(payload["failedKeys"], json!([0, 1, 2]));
    assert_eq!(harness.chip.card().unwrap().keys[1], AesKey::ZERO);
    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_change_keys_with_malformed_key_reports_all_failed() {
    let harness = HarnessBuilder::new().identity("1", "t").start();
    harness.wait_for_card_ready().await;
    harness.authenticate("Enroll Station").await;

    harness.send_event(
        "NFC_CHANGE_KEYS",
        json!({"authenticationKey": ZERO_KEY, "keys": {"1": "zz", "3": KEY_0}}),
    );
    let responses = harness.wait_for_sent("CHANGE_KEYS", 1).await;

    let payload = &responses[0]["data"]["payload"];
    assert_eq!(payload["failedKeys"], json!([1, 3]));
    assert!(harness.chip.calls().is_empty());
    harness.shutdown().await;
}

#[rstest]
#[case::matching_key(AesKey::ZERO, true)]
#[case::wrong_key(key(KEY_1), false)]
#[tokio::test(start_paused = true)]
async fn test_nfc_authenticate(#[case] card_key: AesKey, #[case] expected: bool) {
    let harness = HarnessBuilder::new().identity("1", "t").start();
    harness
        .chip
        .present_card(MockCard::ntag424(UID).with_key(KeyNumber::new(2).unwrap(), card_key));
    harness.wait_for_card_ready().await;
    harness.authenticate("Door").await;

    harness.send_event(
        "NFC_AUTHENTICATE",
        json!({"authenticationKey": ZERO_KEY, "keyNumber": 2}),
    );
    let responses = harness.wait_for_sent("NFC_AUTHENTICATE", 1).await;

    assert_eq!(
        responses[0]["data"]["payload"],
        json!({"authenticationSuccessful": expected})
    );
    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_select_item_round_trip() {
    let harness = HarnessBuilder::new().identity("1", "t").start();
    harness.authenticate("Lathe").await;

    harness.send_event(
        "SELECT_ITEM",
        json!({
            "label": "Choose material",
            "options": [{"id": 1, "label": "Oak"}, {"id": "pine", "label": "Pine"}]
        }),
    );
    sleep(Duration::from_millis(50)).await;

    let prompts = harness.display.prompts();
    assert_eq!(prompts.len(), 1);
    assert_eq!(prompts[0].label, "Choose material");
    assert_eq!(prompts[0].options[0].id, "1");
    assert!(harness.display.prompt_open());

    harness.handle.select_item("pine").await.unwrap();
    let sent = harness.wait_for_sent("SELECT_ITEM", 1).await;
    assert_eq!(sent[0]["event"], "EVENT");
    assert_eq!(sent[0]["data"]["payload"], json!({"selectedId": "pine"}));
    assert!(!harness.display.prompt_open());
    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_enroll_prompt_can_be_cancelled() {
    let harness = HarnessBuilder::new().identity("1", "t").start();
    harness.wait_for_card_ready().await;
    harness.authenticate("Enroll Station").await;

    harness.send_event(
        "NFC_ENABLE_CARD_CHECKING",
        json!({"type": "enroll-nfc-card", "user": {"username": "ada"}}),
    );
    sleep(Duration::from_millis(50)).await;

    let prompt = harness.display.last_content().unwrap();
    assert_eq!(prompt.kind, ContentKind::CardChecking);
    assert_eq!(prompt.message, "Tap to enroll NFC card");
    assert_eq!(prompt.sub_message, "(ada)");
    assert!(prompt.show_cancel_button);

    harness.handle.cancel().await.unwrap();
    let sent = harness.wait_for_sent("CANCEL", 1).await;
    assert_eq!(sent[0]["data"]["payload"], json!({}));
    assert_eq!(harness.display.last_content().unwrap().kind, ContentKind::None);
    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_tap_is_forwarded_while_checking() {
    let harness = HarnessBuilder::new().identity("1", "t").start();
    harness.wait_for_card_ready().await;
    harness.authenticate("Drill Press").await;

    harness.send_event(
        "NFC_ENABLE_CARD_CHECKING",
        json!({
            "type": "toggle-resource-usage",
            "resource": {"name": "Drill Press"},
            "isActive": false
        }),
    );
    sleep(Duration::from_millis(50)).await;
    harness.chip.tap_card(MockCard::ntag424(UID));

    let taps = harness.wait_for_sent("NFC_TAP", 1).await;
    assert_eq!(taps[0]["data"]["payload"], json!({"cardUID": "04a1b2c3d4e5f6"}));
    assert_eq!(harness.taps.taps(), vec![CardUid::from(UID)]);
    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_tap_ignored_without_card_checking() {
    let harness = HarnessBuilder::new().identity("1", "t").start();
    harness.wait_for_card_ready().await;
    harness.authenticate("Drill Press").await;

    harness.chip.tap_card(MockCard::ntag424(UID));
    sleep(Duration::from_secs(2)).await;
    assert!(harness.sent_of_type("NFC_TAP").is_empty());
    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_firmware_info_request() {
    let harness = HarnessBuilder::new().identity("1", "t").start();
    harness.authenticate("Door").await;

    harness.send_event("READER_FIRMWARE_INFO", json!({}));
    let sent = harness.wait_for_sent("READER_FIRMWARE_INFO", 1).await;
    assert_eq!(sent[0]["event"], "RESPONSE");
    let payload = &sent[0]["data"]["payload"];
    assert!(payload["version"].is_string());
    assert!(payload["name"].is_string());
    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_firmware_stream_installs_and_restarts() {
    let harness = HarnessBuilder::new().identity("1", "t").start();
    harness.authenticate("Door").await;

    harness.send_event(
        "READER_FIRMWARE_UPDATE_REQUIRED",
        json!({"firmware": {"chunks": 3}, "available": {"version": "9.9.9"}}),
    );
    for (index, chunk) in [b"abc".as_slice(), b"def", b"gh"].into_iter().enumerate() {
        let requests = harness
            .wait_for_sent("READER_FIRMWARE_STREAM_CHUNK", index + 1)
            .await;
        assert_eq!(
            requests[index]["data"]["payload"],
            json!({"chunkIndex": index})
        );
        harness.server.send_binary(chunk.to_vec());
    }

    sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.slot.image(), b"abcdefgh");
    assert_eq!(harness.slot.phase(), SlotPhase::BootTarget);
    assert_eq!(harness.device.restarts(), 0);

    sleep(Duration::from_secs(3)).await;
    assert_eq!(harness.device.restarts(), 1);
    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_firmware_stream_gives_up_after_ten_requests() {
    let harness = HarnessBuilder::new().identity("1", "t").start();
    harness.authenticate("Door").await;

    harness.send_event(
        "READER_FIRMWARE_UPDATE_REQUIRED",
        json!({"firmware": {"chunks": 2}, "available": {"version": "9.9.9"}}),
    );
    sleep(Duration::from_secs(110)).await;

    let requests = harness.sent_of_type("READER_FIRMWARE_STREAM_CHUNK");
    assert_eq!(requests.len(), 10);
    assert!(
        requests
            .iter()
            .all(|request| request["data"]["payload"]["chunkIndex"] == 0)
    );
    assert_eq!(harness.device.restarts(), 1);
    assert_eq!(harness.slot.phase(), SlotPhase::Aborted);
    harness.shutdown().await;
}

fn anchors_tried(harness: &Harness) -> Vec<String> {
    harness
        .server
        .connect_configs()
        .into_iter()
        .map(|config| config.trust_anchor.unwrap().name)
        .collect()
}

fn remember(store: &SharedStore, index: usize) {
    CertificatePrefs::new(store.clone())
        .save(RememberedCertificate {
            index: Some(index),
            failures: 0,
        })
        .unwrap();
}

/// Let the secure handshake succeed, then drop the link before the server
/// answers the credentials.
async fn drop_before_authentication(harness: &Harness) {
    harness.wait_for_state(SessionState::Authenticating).await;
    harness.server.disconnect();
    harness.wait_for_state(SessionState::Disconnected).await;
}

#[tokio::test(start_paused = true)]
async fn test_remembered_anchor_falls_back_after_five_failures() {
    let store: SharedStore = Arc::new(MemoryStore::new());
    remember(&store, 1);

    let harness = HarnessBuilder::new().secure().store(store.clone()).start();
    for _ in 0..5 {
        harness
            .server
            .push_connect_outcome(ConnectOutcome::RejectCertificate);
    }
    harness.wait_for_state(SessionState::Authenticating).await;
    assert_eq!(anchors_tried(&harness), ["CA 1", "CA 1", "CA 1", "CA 1", "CA 1", "CA 0"]);
    assert_eq!(
        CertificatePrefs::new(store.clone()).load().unwrap(),
        RememberedCertificate::default()
    );

    harness.authenticate("Front Door").await;
    assert_eq!(
        CertificatePrefs::new(store).load().unwrap(),
        RememberedCertificate {
            index: Some(0),
            failures: 0,
        }
    );
    assert_eq!(harness.handle.status().certificate.as_deref(), Some("CA 0"));
    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_remembered_anchor_dropping_early_falls_back() {
    let store: SharedStore = Arc::new(MemoryStore::new());
    remember(&store, 1);
    let harness = HarnessBuilder::new().secure().store(store.clone()).start();

    for round in 1..=4u8 {
        drop_before_authentication(&harness).await;
        assert_eq!(
            CertificatePrefs::new(store.clone()).load().unwrap(),
            RememberedCertificate {
                index: Some(1),
                failures: round,
            }
        );
    }
    drop_before_authentication(&harness).await;
    assert_eq!(
        CertificatePrefs::new(store.clone()).load().unwrap(),
        RememberedCertificate::default()
    );

    harness.authenticate("Front Door").await;
    assert_eq!(anchors_tried(&harness), ["CA 1", "CA 1", "CA 1", "CA 1", "CA 1", "CA 0"]);
    assert_eq!(
        CertificatePrefs::new(store).load().unwrap(),
        RememberedCertificate {
            index: Some(0),
            failures: 0,
        }
    );
    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_early_drops_walk_the_anchor_list() {
    let store: SharedStore = Arc::new(MemoryStore::new());
    let harness = HarnessBuilder::new().secure().store(store.clone()).start();

    for _ in 0..3 {
        drop_before_authentication(&harness).await;
    }
    // All three anchors failed; the next window starts over from the top
    harness.wait_for_state(SessionState::Authenticating).await;
    assert_eq!(anchors_tried(&harness), ["CA 0", "CA 1", "CA 2", "CA 0"]);
    assert_eq!(
        CertificatePrefs::new(store).load().unwrap(),
        RememberedCertificate::default()
    );
    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_anchor_is_remembered_once_authenticated() {
    let store: SharedStore = Arc::new(MemoryStore::new());
    let harness = HarnessBuilder::new().secure().store(store.clone()).start();

    drop_before_authentication(&harness).await;
    harness.authenticate("Front Door").await;
    let remembered = RememberedCertificate {
        index: Some(1),
        failures: 0,
    };
    assert_eq!(CertificatePrefs::new(store.clone()).load().unwrap(), remembered);

    // A drop after authentication says nothing about the certificate
    harness.server.disconnect();
    harness.wait_for_state(SessionState::Disconnected).await;
    assert_eq!(CertificatePrefs::new(store).load().unwrap(), remembered);
    assert_eq!(anchors_tried(&harness), ["CA 0", "CA 1"]);
    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_plain_server_uses_no_anchor() {
    let harness = HarnessBuilder::new().start();
    harness.wait_for_state(SessionState::Authenticating).await;
    let configs = harness.server.connect_configs();
    assert!(configs[0].trust_anchor.is_none());
    assert_eq!(harness.handle.status().certificate, None);

    let registers = harness.server.sent_envelopes();
    assert_eq!(registers[0].event, EventKind::Event);
    harness.shutdown().await;
}
