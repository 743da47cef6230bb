//! Encrypted, tamper-evident storage of the local license record.
//!
//! The blob key is derived from constants shipped with the application, so
//! the encryption guards against casual editing and corruption only. A
//! record that fails any check on load is reported exactly like a missing
//! record.

use crate::channel::{
    ChannelChain, FileHandleSlot, FixedPathPicker, GrantedFileChannel, JsonFileKeyValueStore,
    KeyValueChannel, PersistenceChannel, PromptFileChannel,
};
use crate::config::StorageConfig;
use crate::error::{LicenseError, LicenseResult};
use crate::identity::{MachineFingerprint, MachineIdentity};
use crate::record::{key_prefix, LocalLicenseRecord, RemoteLicenseRecord};
use pawnbook_crypto::{derive_key, open, seal, sha256_hex, DerivedKey, KdfParams, Salt};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Application secret the storage key is derived from.
pub const APP_SECRET: &str = "pawnbook-desktop:license-store:v1";

/// Fixed KDF salt.
pub const STORE_SALT: &[u8] = b"pawnbook.license.kdf.v1";

/// Fixed salt mixed into the integrity digest.
pub const DIGEST_SALT: &str = "pawnbook.license.digest.v1";

/// Name of the key/value fallback file inside the data directory.
const SETTINGS_FILE: &str = "settings.json";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DigestInput<'a> {
    license: &'a RemoteLicenseRecord,
    machine_fingerprint: &'a MachineFingerprint,
    salt: &'a str,
}

/// Derives the storage key from the shipped constants.
pub fn derive_store_key(params: &KdfParams) -> LicenseResult<DerivedKey> {
    Ok(derive_key(APP_SECRET, &Salt::from_bytes(STORE_SALT), params)?)
}

/// Builds the desktop channel order: granted file, prompted file, then the
/// key/value file, all under the configured data directory.
pub fn desktop_channels(config: &StorageConfig) -> ChannelChain {
    let data_dir = config.resolve_data_dir();
    let license_path = data_dir.join(&config.file_name);

    let slot = if license_path.exists() {
        Arc::new(FileHandleSlot::granted(license_path.clone()))
    } else {
        Arc::new(FileHandleSlot::new())
    };
    let picker = Arc::new(FixedPathPicker::new(license_path));
    let kv_store = Arc::new(JsonFileKeyValueStore::new(data_dir.join(SETTINGS_FILE)));

    let channels: Vec<Arc<dyn PersistenceChannel>> = vec![
        Arc::new(GrantedFileChannel::new(Arc::clone(&slot))),
        Arc::new(PromptFileChannel::new(slot, picker, config.file_name.clone())),
        Arc::new(KeyValueChannel::new(kv_store, &config.namespace)),
    ];
    ChannelChain::new(channels)
}

/// Holds at most one [`LocalLicenseRecord`].
pub struct EncryptedLocalStore {
    key: DerivedKey,
    chain: Arc<ChannelChain>,
    identity: Arc<MachineIdentity>,
}

impl EncryptedLocalStore {
    /// Derives the storage key and wraps `chain`.
    pub fn new(
        chain: ChannelChain,
        identity: Arc<MachineIdentity>,
        params: &KdfParams,
    ) -> LicenseResult<Self> {
        Ok(Self::with_key(chain, identity, derive_store_key(params)?))
    }

    pub fn with_key(chain: ChannelChain, identity: Arc<MachineIdentity>, key: DerivedKey) -> Self {
        Self {
            key,
            chain: Arc::new(chain),
            identity,
        }
    }

    /// SHA-256 over the canonical JSON of the business fields, the embedded
    /// fingerprint and [`DIGEST_SALT`]. The digest field itself is excluded.
    pub fn compute_integrity_digest(record: &LocalLicenseRecord) -> LicenseResult<String> {
        let canonical = serde_json::to_vec(&DigestInput {
            license: &record.license,
            machine_fingerprint: &record.machine_fingerprint,
            salt: DIGEST_SALT,
        })?;
        Ok(sha256_hex(canonical))
    }

    /// Stamps the digest, encrypts and writes the record. Returns the
    /// stamped record.
    ///
    /// The write runs on its own task and completes even if the caller is
    /// dropped.
    pub async fn save(&self, mut record: LocalLicenseRecord) -> LicenseResult<LocalLicenseRecord> {
        record.integrity_digest = Self::compute_integrity_digest(&record)?;
        let blob = seal(&self.key, &serde_json::to_vec(&record)?)?;

        let chain = Arc::clone(&self.chain);
        let channel = tokio::spawn(async move { chain.write(&blob).await })
            .await
            .map_err(|e| LicenseError::Cancelled(format!("license write task failed: {e}")))??;

        info!(
            key = key_prefix(record.license_key()),
            channel, "Saved local license"
        );
        Ok(record)
    }

    /// Loads the record if it decrypts, parses, carries a matching digest
    /// and belongs to this machine.
    pub async fn load(&self) -> Option<LocalLicenseRecord> {
        let blob = match self.chain.read().await {
            Ok(Some(blob)) => blob,
            Ok(None) => {
                debug!("No local license stored");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read local license");
                return None;
            }
        };

        let plaintext = match open(&self.key, &blob) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                warn!(reason = "decrypt_failed", error = %e, "Rejected local license");
                return None;
            }
        };

        let record: LocalLicenseRecord = match serde_json::from_slice(&plaintext) {
            Ok(record) => record,
            Err(e) => {
                warn!(reason = "malformed", error = %e, "Rejected local license");
                return None;
            }
        };

        match Self::compute_integrity_digest(&record) {
            Ok(digest) if digest == record.integrity_digest => {}
            _ => {
                warn!(
                    reason = "digest_mismatch",
                    key = key_prefix(record.license_key()),
                    "Rejected local license"
                );
                return None;
            }
        }

        if !self.identity.matches_current(&record.machine_fingerprint).await {
            warn!(
                reason = "machine_mismatch",
                key = key_prefix(record.license_key()),
                "Rejected local license"
            );
            return None;
        }

        Some(record)
    }

    /// Same answer as `load().is_some()`.
    pub async fn exists(&self) -> bool {
        self.load().await.is_some()
    }

    /// Removes the record from every channel. Succeeds if nothing existed.
    pub async fn delete(&self) -> LicenseResult<()> {
        let chain = Arc::clone(&self.chain);
        tokio::spawn(async move { chain.remove().await })
            .await
            .map_err(|e| LicenseError::Cancelled(format!("license delete task failed: {e}")))??;
        info!("Deleted local license");
        Ok(())
    }

    /// Channel the last read or write went through.
    pub async fn active_channel(&self) -> Option<&'static str> {
        self.chain.active_channel().await
    }
}
