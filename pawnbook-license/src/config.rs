//! Configuration for the licensing subsystem.
//!
//! Every struct deserializes from JSON with missing fields defaulted, so a
//! host application can ship a partial config document.

use crate::error::LicenseResult;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level license configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LicenseConfig {
    pub authority: AuthorityConfig,
    pub network: NetworkConfig,
    pub storage: StorageConfig,
    /// Lifetime of cached validation results, in seconds.
    pub cache_ttl_secs: u64,
}

impl Default for LicenseConfig {
    fn default() -> Self {
        Self {
            authority: AuthorityConfig::default(),
            network: NetworkConfig::default(),
            storage: StorageConfig::default(),
            cache_ttl_secs: 5 * 60,
        }
    }
}

impl LicenseConfig {
    /// Parses a JSON config document.
    pub fn from_json_str(json: &str) -> LicenseResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    #[must_use]
    pub fn cache_ttl_ms(&self) -> i64 {
        secs_to_ms(self.cache_ttl_secs)
    }
}

/// Remote license authority settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorityConfig {
    /// Base URL of the realtime database.
    pub database_url: String,
    /// Optional database secret or ID token, sent as `?auth=`.
    pub auth_token: Option<String>,
    /// Path of the license collection.
    pub collection: String,
    pub request_timeout_secs: u64,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            database_url: "https://pawnbook-licenses-default-rtdb.firebaseio.com".to_string(),
            auth_token: None,
            collection: "licenses".to_string(),
            request_timeout_secs: 10,
        }
    }
}

impl AuthorityConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Connectivity monitor settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Lightweight endpoint used to detect general internet access.
    pub probe_url: String,
    pub probe_timeout_secs: u64,
    /// Background refresh period.
    pub poll_interval_secs: u64,
    /// Minimum wait between online attempts while offline.
    pub retry_backoff_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            probe_url: "https://clients3.google.com/generate_204".to_string(),
            probe_timeout_secs: 5,
            poll_interval_secs: 30,
            retry_backoff_secs: 5 * 60,
        }
    }
}

impl NetworkConfig {
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    #[must_use]
    pub fn retry_backoff_ms(&self) -> i64 {
        secs_to_ms(self.retry_backoff_secs)
    }
}

/// Encrypted local store settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for the license file and key/value fallback.
    /// Defaults to the platform's local data directory.
    pub data_dir: Option<PathBuf>,
    pub file_name: String,
    /// Namespace for the key/value fallback store.
    pub namespace: String,
    /// PBKDF2 rounds for the store key.
    pub kdf_iterations: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            file_name: "license.dat".to_string(),
            namespace: "pawnbook.license".to_string(),
            kdf_iterations: pawnbook_crypto::MIN_ITERATIONS,
        }
    }
}

impl StorageConfig {
    /// Resolves the data directory.
    #[must_use]
    pub fn resolve_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("Pawnbook")
        })
    }
}

fn secs_to_ms(secs: u64) -> i64 {
    i64::try_from(secs.saturating_mul(1000)).unwrap_or(i64::MAX)
}
