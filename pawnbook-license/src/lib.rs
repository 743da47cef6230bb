//! License validation and machine binding for Pawnbook.
//!
//! This module handles:
//! - Machine fingerprinting from hardware descriptors
//! - Online validation against the license authority
//! - Offline validation from an encrypted, tamper-evident local copy
//! - Binding a license to exactly one machine until it is released
//!
//! # Design Principles
//!
//! - **Offline-first**: after one successful activation the app keeps
//!   working without network access until the license expires
//! - **One machine per license**: the authority record carries the bound
//!   machine id, written once on activation and cleared on deactivation
//! - **No errors at the boundary**: public operations answer with a
//!   [`ValidationResult`] or `bool`
//!
//! # Machine Identity
//!
//! Fingerprint hashes include their generation time, so "same machine" is
//! always decided over stable hardware fields, never by comparing two
//! independently generated machine ids.

mod authority;
mod channel;
mod clock;
mod config;
mod error;
mod hardware;
mod identity;
mod network;
mod probe;
mod record;
mod service;
mod store;

pub use authority::{parse_collection, LicenseAuthority, MAX_SLOT};
pub use channel::{
    ChannelChain, FileHandleSlot, FilePicker, FixedPathPicker, GrantedFileChannel,
    JsonFileKeyValueStore, KeyValueChannel, KeyValueStore, MemoryKeyValueStore,
    PersistenceChannel, PromptFileChannel,
};
pub use clock::{Clock, ManualClock, SystemClock, DAY_MS};
pub use config::{AuthorityConfig, LicenseConfig, NetworkConfig, StorageConfig};
pub use error::{ErrorKind, LicenseError, LicenseResult};
pub use hardware::{DiskInfo, HardwareDescriptor, HardwareProbe, UnavailableProbe};
pub use identity::{describe, MachineFingerprint, MachineIdentity, MACHINE_ID_LEN, PLACEHOLDER_HOSTNAME};
pub use network::{ConnectivityProbe, NetworkState, NetworkStatusMonitor};
pub use probe::SystemProbe;
pub use record::{
    LicensePatch, LicenseStatus, LocalLicenseRecord, RemoteLicenseRecord, ValidationResult,
};
pub use service::{LicenseSummary, LicenseValidationService, ServiceParts};
pub use store::{
    derive_store_key, desktop_channels, EncryptedLocalStore, APP_SECRET, DIGEST_SALT, STORE_SALT,
};

#[cfg(feature = "online")]
pub use authority::RealtimeDbAuthority;
#[cfg(feature = "online")]
pub use network::HttpConnectivityProbe;

#[cfg(feature = "online")]
impl LicenseValidationService {
    /// Builds the desktop service: system hardware probe, realtime-database
    /// authority, HTTP connectivity probes and file-backed storage.
    pub fn from_config(config: &LicenseConfig) -> LicenseResult<Self> {
        use std::sync::Arc;

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let identity = Arc::new(MachineIdentity::new(Arc::new(SystemProbe), Arc::clone(&clock)));

        let authority = RealtimeDbAuthority::new(config.authority.clone())?;
        let connectivity = HttpConnectivityProbe::new(
            config.network.probe_url.clone(),
            authority.collection_url(),
            config.network.probe_timeout(),
        )?;
        let monitor = Arc::new(NetworkStatusMonitor::new(
            Arc::new(connectivity),
            Arc::clone(&clock),
            config.network.clone(),
        ));

        let store = EncryptedLocalStore::new(
            desktop_channels(&config.storage),
            Arc::clone(&identity),
            &pawnbook_crypto::KdfParams {
                iterations: config.storage.kdf_iterations,
            },
        )?;

        Ok(Self::new(ServiceParts {
            identity,
            monitor,
            store,
            authority: Arc::new(authority),
            clock,
            cache_ttl_ms: config.cache_ttl_ms(),
        }))
    }
}
