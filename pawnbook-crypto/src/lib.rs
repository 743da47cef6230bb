//! Encryption layer for Pawnbook.
//!
//! - PBKDF2-HMAC-SHA256 key derivation from a shared secret
//! - ChaCha20-Poly1305 authenticated encryption for at-rest blobs
//! - SHA-256 digests for tamper evidence

mod cipher;
mod digest;
mod error;
mod key;

pub use cipher::{decrypt, encrypt, open, seal, EncryptedData, NONCE_SIZE, TAG_SIZE};
pub use digest::sha256_hex;
pub use error::{CryptoError, CryptoResult};
pub use key::{
    derive_key, generate_random_key, DerivedKey, KdfParams, Salt, KEY_SIZE, MIN_ITERATIONS,
    SALT_SIZE,
};
