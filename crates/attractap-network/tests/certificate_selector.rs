//! Certificate selector behaviour across reboots and failures.

use attractap_core::ServerConfig;
use attractap_network::{CertificateBundle, CertificateCandidate, CertificateSelector, TransportConfig};
use attractap_storage::{CertificatePrefs, MemoryStore, RememberedCertificate, SharedStore};
use proptest::prelude::*;
use std::sync::Arc;

fn bundle(count: usize) -> CertificateBundle {
    CertificateBundle::new(
        (0..count)
            .map(|i| CertificateCandidate::new(format!("Root {i}"), format!("pem-{i}")))
            .collect(),
    )
}

fn secure_config() -> TransportConfig {
    TransportConfig::new(ServerConfig::new("attraccess.example.org", 443))
}

#[test]
fn test_remembered_certificate_falls_back_after_five_failures() {
    let store: SharedStore = Arc::new(MemoryStore::new());
    let prefs = CertificatePrefs::new(store);
    prefs
        .save(RememberedCertificate {
            index: Some(2),
            failures: 0,
        })
        .unwrap();

    let mut selector = CertificateSelector::new(bundle(4), prefs.clone());
    let mut config = secure_config();

    for attempt in 1..=4u8 {
        assert!(selector.configure(&mut config));
        assert_eq!(selector.current_index(), 2, "attempt {attempt}");
        assert!(selector.try_next());
        assert_eq!(prefs.load().unwrap().failures, attempt);
    }

    // Fifth consecutive failure drops the memory
    assert!(selector.configure(&mut config));
    assert_eq!(selector.current_index(), 2);
    assert!(selector.try_next());
    assert_eq!(prefs.load().unwrap(), RememberedCertificate::default());

    assert!(selector.configure(&mut config));
    assert_eq!(selector.current_index(), 0);
    assert_eq!(config.trust_anchor.unwrap().name, "Root 0");
}

#[test]
fn test_success_resets_failure_count() {
    let store: SharedStore = Arc::new(MemoryStore::new());
    let prefs = CertificatePrefs::new(store);
    prefs
        .save(RememberedCertificate {
            index: Some(1),
            failures: 3,
        })
        .unwrap();

    let mut selector = CertificateSelector::new(bundle(2), prefs.clone());
    let mut config = secure_config();
    assert!(selector.configure(&mut config));
    selector.mark_success();
    assert_eq!(
        prefs.load().unwrap(),
        RememberedCertificate {
            index: Some(1),
            failures: 0
        }
    );
}

#[test]
fn test_persisted_failure_limit_applies_on_boot() {
    let store: SharedStore = Arc::new(MemoryStore::new());
    let prefs = CertificatePrefs::new(store);
    prefs
        .save(RememberedCertificate {
            index: Some(1),
            failures: 5,
        })
        .unwrap();

    let mut selector = CertificateSelector::new(bundle(3), prefs.clone());
    assert!(selector.configure(&mut secure_config()));
    assert_eq!(selector.current_index(), 0);
    assert_eq!(prefs.load().unwrap().index, None);
}

proptest! {
    /// A linear scan visits every candidate once, in order, without wrapping.
    #[test]
    fn linear_scan_walks_each_candidate_once(count in 1usize..12) {
        let prefs = CertificatePrefs::new(Arc::new(MemoryStore::new()));
        let mut selector = CertificateSelector::new(bundle(count), prefs);
        let mut config = secure_config();

        let mut visited = Vec::new();
        loop {
            prop_assert!(selector.configure(&mut config));
            visited.push(selector.current_index());
            if !selector.try_next() {
                break;
            }
        }
        prop_assert_eq!(visited, (0..count).collect::<Vec<_>>());
        prop_assert!(!selector.configure(&mut config));
    }

    /// However many failures happen, the cursor stays inside the bundle.
    #[test]
    fn configured_index_is_always_valid(count in 1usize..8, failures in 0usize..40) {
        let prefs = CertificatePrefs::new(Arc::new(MemoryStore::new()));
        let mut selector = CertificateSelector::new(bundle(count), prefs);
        let mut config = secure_config();

        for _ in 0..failures {
            if selector.configure(&mut config) {
                prop_assert!(selector.current_index() < count);
                selector.try_next();
            }
        }
    }
}
