mod key_exchange;

use crate::config::PairingConfig;
use crate::protocol::messages::{ProtocolVersion, RtsMessage};
use crate::testing::{Inbound, PairingHarness, SharedStore};

fn test_config() -> PairingConfig {
    PairingConfig::builder()
        .robot_name("Vector-T3S7")
        .build_id("v1.8.0")
        .serial_number("00e20100")
        .build()
        .unwrap()
}

fn harness(version: ProtocolVersion) -> (PairingHarness, SharedStore) {
    harness_with(test_config(), version)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn harness_with(config: PairingConfig, version: ProtocolVersion) -> (PairingHarness, SharedStore) {
    init_tracing();
    let store = SharedStore::new();
    let mut h = PairingHarness::new(config, store.boxed(), version).unwrap();
    h.session.set_pairing_mode(true);
    (h, store)
}

/// Harness with a first-time client already authenticated
fn paired(version: ProtocolVersion) -> (PairingHarness, SharedStore) {
    let (mut h, store) = harness(version);
    h.pair_first_time(None).unwrap();
    assert!(h.session.phase().is_confirmed());
    (h, store)
}

fn messages(inbound: &[Inbound]) -> Vec<RtsMessage> {
    inbound.iter().filter_map(|i| i.message().cloned()).collect()
}

fn contains(inbound: &[Inbound], wanted: &RtsMessage) -> bool {
    inbound.iter().any(|i| i.message() == Some(wanted))
}
