use pawnbook_crypto::CryptoError;

#[test]
fn error_display_key_derivation() {
    let err = CryptoError::KeyDerivation("bad params".into());
    assert!(format!("{err}").contains("key derivation failed"));
    assert!(format!("{err}").contains("bad params"));
}

#[test]
fn error_display_encryption() {
    let err = CryptoError::Encryption("oops".into());
    assert!(format!("{err}").contains("encryption failed"));
}

#[test]
fn error_display_decryption() {
    let err = CryptoError::Decryption("tampered".into());
    assert!(format!("{err}").contains("decryption failed"));
}
