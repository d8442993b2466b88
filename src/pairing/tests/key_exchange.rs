use proptest::prelude::*;

use crate::pairing::key_exchange::*;
use crate::protocol::crypto::{Role, X25519KeyPair};
use crate::storage::{ClientSessionRecord, MemoryStore, SavedSessions, SessionStore};

#[test]
fn test_generate_pin_zero_digits_is_empty() {
    assert!(generate_pin(0).is_empty());
}

#[test]
fn test_validate_generated_keypair() {
    let pair = generate_identity_keypair();
    assert!(validate_keypair(
        pair.public_key().as_bytes(),
        &pair.secret_bytes()
    ));
}

#[test]
fn test_validate_rejects_mismatched_public_key() {
    let pair = generate_identity_keypair();
    let other = generate_identity_keypair();
    assert!(!validate_keypair(
        other.public_key().as_bytes(),
        &pair.secret_bytes()
    ));
}

#[test]
fn test_session_keys_agree_only_with_same_pin() {
    let robot = X25519KeyPair::generate();
    let app = X25519KeyPair::generate();

    let robot_keys = derive_session_keys(Role::Server, &robot, &app.public_key(), "483920").unwrap();
    let app_keys = derive_session_keys(Role::Client, &app, &robot.public_key(), "483920").unwrap();
    assert_eq!(robot_keys.encrypt_key, app_keys.decrypt_key);
    assert_eq!(robot_keys.decrypt_key, app_keys.encrypt_key);

    let wrong = derive_session_keys(Role::Client, &app, &robot.public_key(), "483921").unwrap();
    assert_ne!(robot_keys.encrypt_key, wrong.decrypt_key);
}

#[test]
fn test_pin_override_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pin");

    std::fs::write(&path, "483920\n").unwrap();
    assert_eq!(read_pin_override(&path, 6).unwrap().as_str(), "483920");

    // Wrong width and non-digits are ignored
    assert!(read_pin_override(&path, 4).is_none());
    std::fs::write(&path, "48a920").unwrap();
    assert!(read_pin_override(&path, 6).is_none());

    assert!(read_pin_override(&dir.path().join("missing"), 6).is_none());
}

#[test]
fn test_load_or_create_identity_persists_new_identity() {
    let mut store = MemoryStore::new();
    let (identity, sessions) = load_or_create_identity(&mut store, "Vector-T3S7").unwrap();

    assert_eq!(sessions.name, "Vector-T3S7");
    let saved = store.load().unwrap();
    assert_eq!(
        &saved.identity.unwrap().public_key,
        identity.public_key().as_bytes()
    );

    // Second load reuses it
    let (again, _) = load_or_create_identity(&mut store, "ignored").unwrap();
    assert_eq!(again.public_key(), identity.public_key());
}

#[test]
fn test_invalid_identity_regenerated_and_clients_dropped() {
    let good = generate_identity_keypair();
    let other = generate_identity_keypair();
    let mut sessions = SavedSessions::placeholder("Vector-T3S7");
    sessions.identity = Some(crate::storage::IdentityRecord {
        public_key: *other.public_key().as_bytes(),
        secret_key: good.secret_bytes(),
    });
    sessions.clients.push(ClientSessionRecord {
        public_key: [1; 32],
        encrypt_key: [2; 32],
        decrypt_key: [3; 32],
    });

    let mut store = MemoryStore::new();
    store.save(&sessions).unwrap();

    let (identity, loaded) = load_or_create_identity(&mut store, "Vector-T3S7").unwrap();
    assert!(loaded.clients.is_empty());
    assert_ne!(identity.public_key(), other.public_key());
    assert!(store.load().unwrap().clients.is_empty());
}

proptest! {
    #[test]
    fn prop_pin_width_and_range(digits in 1usize..=9) {
        let pin = generate_pin(digits);
        prop_assert_eq!(pin.len(), digits);

        let value: u64 = pin.parse().unwrap();
        let exponent = u32::try_from(digits).unwrap();
        prop_assert!(value >= 10u64.pow(exponent - 1));
        prop_assert!(value < 10u64.pow(exponent));
    }
}
