use super::kx::{bind_pin, pin_bound_session_keys, session_keys};
use super::*;

fn hex(s: &str) -> Vec<u8> {
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
        .collect()
}

fn hex32(s: &str) -> [u8; 32] {
    hex(s).try_into().unwrap()
}

// RFC 7748 section 6.1 key pairs
const ROBOT_SECRET: &str = "77076d0a7318a57d3c16c17251b26645df4c2f87ebc0992ab177fba51db92c2a";
const ROBOT_PUBLIC: &str = "8520f0098930a754748b7ddcb43ef75a0dbf3a0d26381af4eba4a98eaa9b4e6a";
const APP_SECRET: &str = "5dab087e624a8a4b79e17f8b83800ee66f3bb1292618b6fd1c2f8b27ff88e0eb";
const APP_PUBLIC: &str = "de9edb7d7b7dc1b4d35b61c2ece435373f8343c85b78674dadfc7e146f882b4f";

// --- x25519.rs tests ---

#[test]
fn test_x25519_public_key_from_secret() {
    let pair = X25519KeyPair::from_bytes(&hex(ROBOT_SECRET)).unwrap();
    assert_eq!(pair.public_key().as_bytes(), &hex32(ROBOT_PUBLIC));
}

#[test]
fn test_x25519_shared_secret_matches_rfc() {
    let robot = X25519KeyPair::from_bytes(&hex(ROBOT_SECRET)).unwrap();
    let app = X25519PublicKey::from_bytes(&hex(APP_PUBLIC)).unwrap();

    let shared = robot.diffie_hellman(&app).unwrap();
    assert_eq!(
        shared.as_bytes(),
        &hex32("4a5d9d5ba4ce2de1728e3bf480350f25e07e21c947d19e3376f09b3c1e161742")
    );
}

#[test]
fn test_x25519_rejects_low_order_point() {
    let robot = X25519KeyPair::generate();
    let zero = X25519PublicKey::from([0u8; 32]);

    assert!(matches!(
        robot.diffie_hellman(&zero),
        Err(CryptoError::InvalidPublicKey)
    ));
}

#[test]
fn test_x25519_bad_lengths() {
    assert!(matches!(
        X25519KeyPair::from_bytes(&[0u8; 31]),
        Err(CryptoError::InvalidKeyLength {
            expected: 32,
            actual: 31
        })
    ));
    assert!(X25519PublicKey::from_bytes(&[0u8; 33]).is_err());
}

#[test]
fn test_x25519_secret_roundtrip() {
    let pair = X25519KeyPair::generate();
    let restored = X25519KeyPair::from_bytes(&pair.secret_bytes()).unwrap();
    assert_eq!(pair.public_key(), restored.public_key());
}

// --- kx.rs tests ---

#[test]
fn test_kx_server_keys_match_libsodium() {
    let robot = X25519KeyPair::from_bytes(&hex(ROBOT_SECRET)).unwrap();
    let app = X25519PublicKey::from_bytes(&hex(APP_PUBLIC)).unwrap();

    let keys = session_keys(Role::Server, &robot, &app).unwrap();
    assert_eq!(
        keys.encrypt_key,
        hex32("1ad7d1f6d5270fbb18123f3bc904c7f97283e7d47bbe85606ee5ded0af2608c5")
    );
    assert_eq!(
        keys.decrypt_key,
        hex32("9aede84a8737da34d203e31b6daed56b52c5316a7c9d028621b2717fdaa2d314")
    );
}

#[test]
fn test_kx_client_mirrors_server() {
    let robot = X25519KeyPair::from_bytes(&hex(ROBOT_SECRET)).unwrap();
    let app = X25519KeyPair::from_bytes(&hex(APP_SECRET)).unwrap();

    let server = session_keys(Role::Server, &robot, &app.public_key()).unwrap();
    let client = session_keys(Role::Client, &app, &robot.public_key()).unwrap();

    assert_eq!(server.encrypt_key, client.decrypt_key);
    assert_eq!(server.decrypt_key, client.encrypt_key);
    assert_ne!(server.encrypt_key, server.decrypt_key);
}

#[test]
fn test_bind_pin_keyed_hash() {
    let bound = bind_pin(&[0x42; 32], b"483920").unwrap();
    assert_eq!(
        bound,
        hex32("63d9f9ff950d9b871660ebfa04b5299cb8b17918995729e07d087f3cc881d2a6")
    );
}

#[test]
fn test_bind_pin_empty_is_unkeyed() {
    let bound = bind_pin(&[0x42; 32], b"").unwrap();
    assert_eq!(
        bound,
        hex32("7538b84957fd8dd92c00e3529a664f3366f52b5f7529d7fe5ecaeaeed3fbb9f3")
    );
}

#[test]
fn test_bind_pin_too_long() {
    let pin = [b'1'; 65];
    assert!(matches!(
        bind_pin(&[0u8; 32], &pin),
        Err(CryptoError::PinTooLong(65))
    ));
    assert!(bind_pin(&[0u8; 32], &[b'1'; 64]).is_ok());
}

#[test]
fn test_pin_bound_keys_reject_long_pin() {
    let robot = X25519KeyPair::generate();
    let app = X25519KeyPair::generate().public_key();
    assert!(matches!(
        pin_bound_session_keys(Role::Server, &robot, &app, &[b'7'; 100]),
        Err(CryptoError::PinTooLong(100))
    ));
}

#[test]
fn test_pin_bound_keys_match_vector() {
    let robot = X25519KeyPair::from_bytes(&hex(ROBOT_SECRET)).unwrap();
    let app = X25519PublicKey::from_bytes(&hex(APP_PUBLIC)).unwrap();

    let keys = pin_bound_session_keys(Role::Server, &robot, &app, b"483920").unwrap();
    assert_eq!(
        keys.encrypt_key,
        hex32("a4c12036605c0b5c95dbb14c561479fab151d11424817108bbd4aba37b661892")
    );
}

#[test]
fn test_pin_mismatch_breaks_key_agreement() {
    let robot = X25519KeyPair::generate();
    let app = X25519KeyPair::generate();

    let server = pin_bound_session_keys(Role::Server, &robot, &app.public_key(), b"123456").unwrap();
    let client = pin_bound_session_keys(Role::Client, &app, &robot.public_key(), b"654321").unwrap();

    assert_ne!(server.encrypt_key, client.decrypt_key);
}

// --- xchacha.rs tests ---

#[test]
fn test_xchacha_encrypt_decrypt() {
    let key = [0x42u8; 32];
    let cipher = XChaCha20Poly1305Cipher::new(&key).unwrap();

    let nonce = Nonce::random();
    let plaintext = b"wifi credentials";

    let ciphertext = cipher.encrypt(&nonce, plaintext).unwrap();
    assert_eq!(ciphertext.len(), plaintext.len() + lengths::AEAD_TAG);

    let decrypted = cipher.decrypt(&nonce, &ciphertext).unwrap();
    assert_eq!(decrypted, plaintext);
}

#[test]
fn test_xchacha_wrong_nonce_fails() {
    let cipher = XChaCha20Poly1305Cipher::new(&[7u8; 32]).unwrap();

    let mut nonce = Nonce::from([0u8; 24]);
    let ciphertext = cipher.encrypt(&nonce, b"secret").unwrap();
    nonce.increment();

    assert!(matches!(
        cipher.decrypt(&nonce, &ciphertext),
        Err(CryptoError::DecryptionFailed(_))
    ));
}

#[test]
fn test_xchacha_tamper_detection() {
    let cipher = XChaCha20Poly1305Cipher::new(&[7u8; 32]).unwrap();
    let nonce = Nonce::from([3u8; 24]);

    let mut ciphertext = cipher.encrypt(&nonce, b"data").unwrap();
    ciphertext[0] ^= 0xFF;

    assert!(cipher.decrypt(&nonce, &ciphertext).is_err());
}

#[test]
fn test_xchacha_bad_key_length() {
    assert!(matches!(
        XChaCha20Poly1305Cipher::new(&[0u8; 16]),
        Err(CryptoError::InvalidKeyLength {
            expected: 32,
            actual: 16
        })
    ));
}

#[test]
fn test_nonce_increment_little_endian() {
    let mut nonce = Nonce::from([0u8; 24]);
    nonce.increment();
    assert_eq!(nonce.as_bytes()[0], 1);

    let mut bytes = [0u8; 24];
    bytes[0] = 0xFF;
    bytes[1] = 0xFF;
    let mut nonce = Nonce::from(bytes);
    nonce.increment();
    assert_eq!(&nonce.as_bytes()[..3], &[0, 0, 1]);
}

#[test]
fn test_nonce_increment_wraps() {
    let mut nonce = Nonce::from([0xFF; 24]);
    nonce.increment();
    assert_eq!(nonce.as_bytes(), &[0u8; 24]);
}

#[test]
fn test_nonce_from_bytes_length() {
    assert!(Nonce::from_bytes(&[0u8; 24]).is_ok());
    assert!(matches!(
        Nonce::from_bytes(&[0u8; 12]),
        Err(CryptoError::InvalidNonceLength {
            expected: 24,
            actual: 12
        })
    ));
}
