//! Common test utilities and fixtures
#![allow(dead_code)]

use std::sync::Once;

use pairlink::PairingConfig;
use pairlink::protocol::messages::{ProtocolVersion, RtsMessage};
use pairlink::testing::{Inbound, PairingHarness, SharedStore};
use tracing_subscriber::{EnvFilter, fmt};

static INIT: Once = Once::new();

/// Initialize test logging (call once per test module)
pub fn init_logging() {
    INIT.call_once(|| {
        let filter = EnvFilter::from_default_env().add_directive("pairlink=debug".parse().unwrap());

        fmt().with_env_filter(filter).with_test_writer().init();
    });
}

/// Configuration for a test robot
pub fn test_config() -> PairingConfig {
    PairingConfig::builder()
        .robot_name("Vector-E5F2")
        .build_id("v1.8.1")
        .serial_number("00a10c3f")
        .build()
        .unwrap()
}

/// Harness in pairing mode over a fresh shared store
pub fn pairing_harness(
    config: PairingConfig,
    version: ProtocolVersion,
) -> (PairingHarness, SharedStore) {
    let store = SharedStore::new();
    let mut harness = PairingHarness::new(config, store.boxed(), version).unwrap();
    harness.session.set_pairing_mode(true);
    (harness, store)
}

/// Messages carried by `inbound`
pub fn messages(inbound: &[Inbound]) -> Vec<RtsMessage> {
    inbound.iter().filter_map(|i| i.message().cloned()).collect()
}
