use super::*;

fn record(seed: u8) -> ClientSessionRecord {
    ClientSessionRecord {
        public_key: [seed; 32],
        encrypt_key: [seed.wrapping_add(1); 32],
        decrypt_key: [seed.wrapping_add(2); 32],
    }
}

fn sample() -> SavedSessions {
    SavedSessions {
        identity: Some(IdentityRecord {
            public_key: [0xAA; 32],
            secret_key: [0xBB; 32],
        }),
        name: "Vector-A1B2".to_string(),
        clients: vec![record(1), record(2)],
    }
}

#[test]
fn test_layout_header() {
    let image = sample().encode().unwrap();

    assert_eq!(&image[..8], MAGIC);
    assert_eq!(&image[8..12], &FORMAT_VERSION.to_le_bytes());
    assert_eq!(image[12], 1);
    // magic, version, flags, identity, name, count, two records
    assert_eq!(image.len(), 8 + 4 + 1 + 64 + 1 + 11 + 2 + 2 * 96);
}

#[test]
fn test_decode_matches_encode() {
    let sessions = sample();
    let decoded = SavedSessions::decode(&sessions.encode().unwrap()).unwrap();
    assert_eq!(decoded, sessions);
}

#[test]
fn test_trailing_padding_ignored() {
    let mut image = sample().encode().unwrap();
    image.resize(4096, 0);
    assert_eq!(SavedSessions::decode(&image).unwrap(), sample());
}

#[test]
fn test_rejects_bad_magic_and_version() {
    let mut image = sample().encode().unwrap();
    image[0] = b'X';
    assert!(matches!(
        SavedSessions::decode(&image),
        Err(StorageError::Corrupt("bad magic"))
    ));

    let mut image = sample().encode().unwrap();
    image[8] = 9;
    assert!(matches!(
        SavedSessions::decode(&image),
        Err(StorageError::UnsupportedVersion(9))
    ));
}

#[test]
fn test_rejects_truncated_records() {
    let image = sample().encode().unwrap();
    assert!(SavedSessions::decode(&image[..image.len() - 10]).is_err());
}

#[test]
fn test_rejects_oversized_name() {
    let sessions = SavedSessions::placeholder("n".repeat(MAX_NAME_LEN + 1));
    assert!(matches!(
        sessions.encode(),
        Err(StorageError::NameTooLong(65))
    ));
}

#[test]
fn test_upsert_replaces_same_client() {
    let mut sessions = SavedSessions::default();
    sessions.upsert_client(record(1), DEFAULT_MAX_CLIENTS);
    sessions.upsert_client(record(2), DEFAULT_MAX_CLIENTS);

    let mut again = record(1);
    again.encrypt_key = [0x55; 32];
    sessions.upsert_client(again, DEFAULT_MAX_CLIENTS);

    assert_eq!(sessions.clients.len(), 2);
    assert_eq!(sessions.clients[1].public_key, [1; 32]);
    assert_eq!(sessions.find_client(&[1; 32]).unwrap().encrypt_key, [0x55; 32]);
}

#[test]
fn test_cap_evicts_oldest() {
    let mut sessions = SavedSessions::default();
    for seed in 0..5 {
        sessions.upsert_client(record(seed), 3);
    }

    let kept: Vec<u8> = sessions.clients.iter().map(|c| c.public_key[0]).collect();
    assert_eq!(kept, vec![2, 3, 4]);
}

#[test]
fn test_forget_client() {
    let mut sessions = sample();
    assert!(sessions.forget_client(&[1; 32]));
    assert!(!sessions.forget_client(&[1; 32]));
    assert_eq!(sessions.clients.len(), 1);
}

#[test]
fn test_memory_store_invalid_image_is_no_data() {
    let store = MemoryStore::with_image(vec![1, 2, 3]);
    assert!(store.load().is_none());
    assert!(MemoryStore::new().load().is_none());
}

#[test]
fn test_file_store_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = FileStore::new(dir.path().join("nested").join("sessions.bin"));

    assert!(store.load().is_none());
    store.save(&sample()).unwrap();
    assert_eq!(store.load(), Some(sample()));
}

#[test]
fn test_truncated_tmp_leaves_previous_image() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sessions.bin");
    let mut store = FileStore::new(&path);
    store.save(&sample()).unwrap();

    // Simulate a crash after a partial write of the next image
    let next = SavedSessions::placeholder("other").encode().unwrap();
    std::fs::write(dir.path().join("sessions.bin.tmp"), &next[..5]).unwrap();

    assert_eq!(store.load(), Some(sample()));
}

#[test]
fn test_failed_rename_removes_tmp() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sessions.bin");
    std::fs::create_dir(&path).unwrap();

    let mut store = FileStore::new(&path);
    assert!(matches!(store.save(&sample()), Err(StorageError::Io(_))));
    assert!(!dir.path().join("sessions.bin.tmp").exists());
}

#[test]
fn test_corrupt_file_is_no_data() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sessions.bin");
    std::fs::write(&path, b"PAIRLINK\x02\x00").unwrap();
    assert!(FileStore::new(&path).load().is_none());
}

#[test]
fn test_padded_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("legacy.img");
    let mut store = FileStore::new(&path).with_padding(LEGACY_IMAGE_SIZE);

    store.save(&sample()).unwrap();
    assert_eq!(std::fs::metadata(&path).unwrap().len(), LEGACY_IMAGE_SIZE as u64);
    assert_eq!(store.load(), Some(sample()));
}

#[test]
fn test_migrate_legacy_once() {
    let dir = tempfile::tempdir().unwrap();
    let legacy_path = dir.path().join("legacy.img");
    let mut legacy = FileStore::new(&legacy_path).with_padding(LEGACY_IMAGE_SIZE);
    legacy.save(&sample()).unwrap();

    let mut store = FileStore::new(dir.path().join("sessions.bin"));
    assert!(migrate_legacy(&mut legacy, &mut store).unwrap());
    assert_eq!(store.load(), Some(sample()));

    let placeholder = legacy.load().unwrap();
    assert!(placeholder.identity.is_none());
    assert!(placeholder.clients.is_empty());
    assert_eq!(placeholder.name, "Vector-A1B2");
    assert_eq!(
        std::fs::metadata(&legacy_path).unwrap().len(),
        LEGACY_IMAGE_SIZE as u64
    );

    // Second run finds a valid store and leaves it alone
    assert!(!migrate_legacy(&mut legacy, &mut store).unwrap());
    assert_eq!(store.load(), Some(sample()));
}

#[test]
fn test_migrate_invalid_legacy_saves_empty() {
    let mut legacy = MemoryStore::with_image(vec![0xFF; 16]);
    let mut store = MemoryStore::new();

    assert!(migrate_legacy(&mut legacy, &mut store).unwrap());
    assert_eq!(store.load(), Some(SavedSessions::default()));
}
