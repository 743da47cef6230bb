use pawnbook_crypto::{derive_key, generate_random_key, DerivedKey, KdfParams, Salt, MIN_ITERATIONS};

fn test_params() -> KdfParams {
    KdfParams { iterations: 1_000 }
}

// ── derive_key ───────────────────────────────────────────────────

#[test]
fn derive_key_produces_consistent_results() {
    let salt = Salt::from_bytes(b"pawnbook-salt".to_vec());
    let key1 = derive_key("app_secret", &salt, &test_params()).unwrap();
    let key2 = derive_key("app_secret", &salt, &test_params()).unwrap();
    assert_eq!(key1.as_bytes(), key2.as_bytes());
}

#[test]
fn different_secrets_produce_different_keys() {
    let salt = Salt::from_bytes(b"pawnbook-salt".to_vec());
    let key1 = derive_key("secret1", &salt, &test_params()).unwrap();
    let key2 = derive_key("secret2", &salt, &test_params()).unwrap();
    assert_ne!(key1.as_bytes(), key2.as_bytes());
}

#[test]
fn different_salts_produce_different_keys() {
    let key1 = derive_key("same", &Salt::from_bytes([1u8; 16]), &test_params()).unwrap();
    let key2 = derive_key("same", &Salt::from_bytes([2u8; 16]), &test_params()).unwrap();
    assert_ne!(key1.as_bytes(), key2.as_bytes());
}

#[test]
fn different_iteration_counts_produce_different_keys() {
    let salt = Salt::from_bytes([3u8; 16]);
    let key1 = derive_key("same", &salt, &KdfParams { iterations: 1_000 }).unwrap();
    let key2 = derive_key("same", &salt, &KdfParams { iterations: 1_001 }).unwrap();
    assert_ne!(key1.as_bytes(), key2.as_bytes());
}

#[test]
fn pbkdf2_sha256_known_vector() {
    // RFC 7914 section 11, first PBKDF2-HMAC-SHA256 vector (c = 1).
    let key = derive_key("passwd", &Salt::from_bytes(b"salt".to_vec()), &KdfParams { iterations: 1 })
        .unwrap();
    assert_eq!(
        hex(key.as_bytes()),
        "55ac046e56e3089fec1691c22544b605f94185216dde0465e68b9d57c20dacbc"
    );
}

#[test]
fn empty_salt_rejected() {
    assert!(derive_key("s", &Salt::from_bytes(Vec::new()), &test_params()).is_err());
}

#[test]
fn default_iterations_are_at_least_minimum() {
    assert_eq!(KdfParams::default().iterations, MIN_ITERATIONS);
    assert!(MIN_ITERATIONS >= 100_000);
}

// ── DerivedKey / Salt ────────────────────────────────────────────

#[test]
fn derived_key_from_bytes_roundtrip() {
    let bytes = [42u8; 32];
    let key = DerivedKey::from_bytes(bytes);
    assert_eq!(*key.as_bytes(), bytes);
}

#[test]
fn key_debug_does_not_leak_bytes() {
    let key = generate_random_key();
    let debug = format!("{:?}", key);
    assert!(debug.contains("REDACTED"));
    assert!(!debug.contains(&format!("{:?}", key.as_bytes())));
}

#[test]
fn salt_random_produces_unique() {
    assert_ne!(Salt::random().as_bytes(), Salt::random().as_bytes());
}

#[test]
fn generate_random_key_produces_unique_keys() {
    assert_ne!(generate_random_key().as_bytes(), generate_random_key().as_bytes());
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
