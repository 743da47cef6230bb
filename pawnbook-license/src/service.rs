//! The license validation orchestrator.
//!
//! One service instance per process, constructed explicitly and shared as
//! `Arc<LicenseValidationService>`. Public operations never return errors:
//! every failure is folded into a [`ValidationResult`] or `false`.

use crate::authority::LicenseAuthority;
use crate::clock::Clock;
use crate::error::{ErrorKind, LicenseError};
use crate::identity::{describe, MachineFingerprint, MachineIdentity};
use crate::network::NetworkStatusMonitor;
use crate::record::{
    key_prefix, LicensePatch, LocalLicenseRecord, RemoteLicenseRecord, ValidationResult,
};
use crate::store::EncryptedLocalStore;
use chrono::DateTime;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// Collaborators the service is assembled from.
pub struct ServiceParts {
    pub identity: Arc<MachineIdentity>,
    pub monitor: Arc<NetworkStatusMonitor>,
    pub store: EncryptedLocalStore,
    pub authority: Arc<dyn LicenseAuthority>,
    pub clock: Arc<dyn Clock>,
    /// Lifetime of cached successful results.
    pub cache_ttl_ms: i64,
}

/// Diagnostics view of the active license.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseSummary {
    pub license_key: String,
    pub shop_name: String,
    pub expires_in_days: i64,
    pub is_trial: bool,
    pub machine_label: String,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    result: ValidationResult,
    slot: Option<usize>,
    cached_at_ms: i64,
}

#[derive(Default)]
struct ServiceState {
    current: Option<LocalLicenseRecord>,
    cache: HashMap<String, CacheEntry>,
}

/// A validation outcome plus what persistence needs to act on it.
struct Checked {
    result: ValidationResult,
    slot: Option<usize>,
    fingerprint: Option<MachineFingerprint>,
    local: Option<LocalLicenseRecord>,
    from_cache: bool,
}

impl Checked {
    fn new(result: ValidationResult) -> Self {
        Self {
            result,
            slot: None,
            fingerprint: None,
            local: None,
            from_cache: false,
        }
    }

    /// An online verdict that only the administrator can change.
    fn is_authority_rejection(&self) -> bool {
        !self.result.is_valid
            && !self.result.is_offline
            && matches!(
                self.result.error_kind,
                Some(
                    ErrorKind::NotFound
                        | ErrorKind::Inactive
                        | ErrorKind::Expired
                        | ErrorKind::MachineBoundElsewhere
                )
            )
    }
}

/// Validates, activates and releases the shop's license.
pub struct LicenseValidationService {
    identity: Arc<MachineIdentity>,
    monitor: Arc<NetworkStatusMonitor>,
    store: EncryptedLocalStore,
    authority: Arc<dyn LicenseAuthority>,
    clock: Arc<dyn Clock>,
    cache_ttl_ms: i64,
    state: RwLock<ServiceState>,
    /// Generation of the last adopted local state.
    persisted: Mutex<u64>,
    generation: AtomicU64,
}

impl LicenseValidationService {
    pub fn new(parts: ServiceParts) -> Self {
        Self {
            identity: parts.identity,
            monitor: parts.monitor,
            store: parts.store,
            authority: parts.authority,
            clock: parts.clock,
            cache_ttl_ms: parts.cache_ttl_ms,
            state: RwLock::new(ServiceState::default()),
            persisted: Mutex::new(0),
            generation: AtomicU64::new(0),
        }
    }

    /// The connectivity monitor, for polling and OS notifications.
    pub fn monitor(&self) -> &Arc<NetworkStatusMonitor> {
        &self.monitor
    }

    pub fn identity(&self) -> &Arc<MachineIdentity> {
        &self.identity
    }

    // ── Public operations ────────────────────────────────────────

    /// Loads a verified local record into memory without network access.
    pub async fn restore(&self) -> bool {
        let generation = self.next_generation();
        match self.store.load().await {
            Some(local) => {
                info!(key = key_prefix(local.license_key()), "Restored local license");
                self.adopt_local(generation, local).await
            }
            None => false,
        }
    }

    /// Validates `key`, online when the network is usable.
    pub async fn validate_license_key(&self, key: &str) -> ValidationResult {
        self.check(key).await.result
    }

    /// Validates `key`, binds it to this machine and stores it locally.
    pub async fn activate_license(&self, key: &str) -> ValidationResult {
        let generation = self.next_generation();
        let mut checked = self.check(key).await;
        if !checked.result.is_valid {
            info!(key = key_prefix(key), kind = ?checked.result.error_kind, "Activation rejected");
            return checked.result;
        }

        if checked.result.is_offline {
            let local = match checked.local.take() {
                Some(local) => Some(local),
                None => self.store.load().await,
            };
            if let Some(local) = local.filter(|local| local.license_key() == key) {
                self.adopt_local(generation, local).await;
            }
            return checked.result;
        }

        match self.adopt_online(generation, &mut checked).await {
            Some(record) => checked.result.record = Some(record),
            None => {
                info!(key = key_prefix(key), "Activation superseded by a newer license operation");
                self.state.write().await.cache.remove(key);
                return ValidationResult::failure(
                    ErrorKind::Internal,
                    "Activation was interrupted by another license operation",
                );
            }
        }
        info!(key = key_prefix(key), "License activated");
        checked.result
    }

    /// The periodic "may the app run" check.
    pub async fn is_license_valid(&self) -> bool {
        let Some(current) = self.current_license().await else {
            return false;
        };
        let key = current.license_key().to_string();
        let generation = self.next_generation();

        let mut checked = self.check(&key).await;
        if checked.result.is_valid {
            if !checked.result.is_offline && !checked.from_cache {
                self.adopt_online(generation, &mut checked).await;
            }
            return true;
        }

        if checked.is_authority_rejection() {
            self.invalidate(generation, &key).await;
        }
        false
    }

    /// Releases this machine's binding and forgets all local state.
    ///
    /// Idempotent.
    pub async fn deactivate_license(&self) {
        let generation = self.next_generation();
        let mut persisted = self.persisted.lock().await;
        *persisted = generation;

        let previous = {
            let mut state = self.state.write().await;
            state.cache.clear();
            state.current.take()
        };

        if let Some(local) = previous {
            if self.monitor.should_attempt_online_validation().await {
                self.release_binding(&local).await;
            } else {
                debug!("Offline, leaving remote binding in place");
            }
            info!(key = key_prefix(local.license_key()), "License deactivated");
        }

        if let Err(e) = self.store.delete().await {
            error!(error = %e, "Failed to delete local license");
        }
    }

    /// Forces a network check and a fresh validation of the held key.
    pub async fn refresh_validation(&self) -> ValidationResult {
        let Some(current) = self.current_license().await else {
            return ValidationResult::failure(ErrorKind::NoLocalLicense, "No license is active");
        };
        let key = current.license_key().to_string();
        let generation = self.next_generation();

        self.monitor.check_online_status().await;
        self.state.write().await.cache.remove(&key);

        let mut checked = self.check(&key).await;
        if checked.result.is_valid && !checked.result.is_offline {
            if let Some(record) = self.adopt_online(generation, &mut checked).await {
                checked.result.record = Some(record);
            }
        } else if checked.is_authority_rejection() {
            self.invalidate(generation, &key).await;
        }
        checked.result
    }

    /// Snapshot of the active license.
    pub async fn current_license(&self) -> Option<LocalLicenseRecord> {
        self.state.read().await.current.clone()
    }

    /// Returns true if the active license lists `feature`.
    pub async fn has_feature(&self, feature: &str) -> bool {
        self.state
            .read()
            .await
            .current
            .as_ref()
            .is_some_and(|local| local.license.has_feature(feature))
    }

    pub async fn status_summary(&self) -> Option<LicenseSummary> {
        let current = self.current_license().await?;
        Some(LicenseSummary {
            license_key: current.license.license_key.clone(),
            shop_name: current.license.shop_name.clone(),
            expires_in_days: current.license.expires_in_days(self.clock.now_ms()),
            is_trial: current.license.is_trial,
            machine_label: describe(&current.machine_fingerprint),
        })
    }

    // ── Validation ───────────────────────────────────────────────

    /// Cache, then online or offline validation. Successes are cached.
    async fn check(&self, key: &str) -> Checked {
        let now = self.clock.now_ms();
        if let Some(hit) = self.cached(key, now).await {
            debug!(key = key_prefix(key), "Validation cache hit");
            return hit;
        }

        let checked = if self.monitor.should_attempt_online_validation().await {
            match self.validate_online(key).await {
                Ok(checked) => checked,
                Err(e) if e.is_connectivity() => {
                    warn!(key = key_prefix(key), error = %e, "Online validation failed, falling back to local license");
                    self.monitor.mark_offline().await;
                    let mut checked = self.validate_offline(key).await;
                    if matches!(
                        checked.result.error_kind,
                        Some(ErrorKind::NoLocalLicense | ErrorKind::LicenseMismatch)
                    ) {
                        checked.result = ValidationResult::failure(
                            e.kind(),
                            "Could not reach the license server",
                        )
                        .offline();
                    }
                    checked
                }
                Err(e) => {
                    error!(key = key_prefix(key), error = %e, "Unexpected validation failure");
                    Checked::new(ValidationResult::failure(
                        ErrorKind::Internal,
                        "License check failed unexpectedly",
                    ))
                }
            }
        } else {
            debug!(key = key_prefix(key), "Network unusable, validating offline");
            self.validate_offline(key).await
        };

        if checked.result.is_valid {
            let entry = CacheEntry {
                result: checked.result.clone(),
                slot: checked.slot,
                cached_at_ms: self.clock.now_ms(),
            };
            self.state.write().await.cache.insert(key.to_string(), entry);
        }
        checked
    }

    async fn cached(&self, key: &str, now: i64) -> Option<Checked> {
        let mut state = self.state.write().await;
        let entry = state.cache.get(key)?;
        if now - entry.cached_at_ms >= self.cache_ttl_ms {
            state.cache.remove(key);
            return None;
        }
        Some(Checked {
            result: entry.result.clone(),
            slot: entry.slot,
            fingerprint: None,
            local: None,
            from_cache: true,
        })
    }

    async fn validate_online(&self, key: &str) -> Result<Checked, LicenseError> {
        let licenses = self.authority.fetch_licenses().await?;
        let found = licenses
            .into_iter()
            .enumerate()
            .find_map(|(slot, record)| record.filter(|r| r.license_key == key).map(|r| (slot, r)));

        let Some((slot, record)) = found else {
            return Ok(Checked::new(ValidationResult::failure(
                ErrorKind::NotFound,
                "License key not found",
            )));
        };

        if !record.is_active() {
            return Ok(Checked::new(ValidationResult::failure(
                ErrorKind::Inactive,
                format!("License is {}", record.status.as_str()),
            )));
        }

        let now = self.clock.now_ms();
        if record.is_expired_at(now) {
            return Ok(Checked::new(ValidationResult::failure(
                ErrorKind::Expired,
                "License has expired",
            )));
        }

        let current = self.identity.generate_fingerprint().await;
        if let Some(bound) = &record.machine_id {
            let local = match self.current_license().await {
                Some(local) => Some(local),
                None => self.store.load().await,
            };
            if !self.binding_is_local(bound, &current, local.as_ref()).await {
                warn!(key = key_prefix(key), "License is bound to another machine");
                return Ok(Checked::new(ValidationResult::failure(
                    ErrorKind::MachineBoundElsewhere,
                    "License is already activated on another machine",
                )));
            }
        }

        Ok(Checked {
            result: ValidationResult::success(record, now, false),
            slot: Some(slot),
            fingerprint: Some(current),
            local: None,
            from_cache: false,
        })
    }

    async fn validate_offline(&self, key: &str) -> Checked {
        let Some(local) = self.store.load().await else {
            return Checked::new(
                ValidationResult::failure(ErrorKind::NoLocalLicense, "No license stored on this machine")
                    .offline(),
            );
        };

        if local.license_key() != key {
            return Checked::new(
                ValidationResult::failure(
                    ErrorKind::LicenseMismatch,
                    "Stored license does not match this key",
                )
                .offline(),
            );
        }

        if !local.license.is_active() {
            return Checked::new(
                ValidationResult::failure(
                    ErrorKind::Inactive,
                    format!("License is {}", local.license.status.as_str()),
                )
                .offline(),
            );
        }

        let now = self.clock.now_ms();
        if local.license.is_expired_at(now) {
            return Checked::new(
                ValidationResult::failure(ErrorKind::Expired, "License has expired").offline(),
            );
        }

        let current = self.identity.generate_fingerprint().await;
        if !self.identity.is_same_machine(&local.machine_fingerprint, &current).await {
            return Checked::new(
                ValidationResult::failure(
                    ErrorKind::InvalidLocalLicense,
                    "Stored license belongs to another machine",
                )
                .offline(),
            );
        }

        Checked {
            result: ValidationResult::success(local.license.clone(), now, true),
            slot: None,
            fingerprint: Some(current),
            local: Some(local),
            from_cache: false,
        }
    }

    /// A binding belongs here when it is the current machine id, or the
    /// id mirrored in a local record whose fingerprint matches this machine.
    async fn binding_is_local(
        &self,
        bound: &str,
        current: &MachineFingerprint,
        local: Option<&LocalLicenseRecord>,
    ) -> bool {
        if bound == current.machine_id {
            return true;
        }
        let Some(local) = local else {
            return false;
        };
        let mirrors_binding = local.license.machine_id.as_deref() == Some(bound)
            || local.machine_fingerprint.machine_id == bound;
        mirrors_binding
            && self
                .identity
                .is_same_machine(&local.machine_fingerprint, current)
                .await
    }

    // ── Persistence ──────────────────────────────────────────────

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Binds an unbound remote record, then stores the local mirror.
    /// Returns the remote record as it stands after binding, or `None` when
    /// a newer operation has superseded this one.
    ///
    /// The generation lock is held across the remote write so a concurrent
    /// deactivation either sees the binding (and releases it) or wins first
    /// and no binding is written.
    async fn adopt_online(&self, generation: u64, checked: &mut Checked) -> Option<RemoteLicenseRecord> {
        let mut persisted = self.persisted.lock().await;
        if generation < *persisted {
            debug!(generation, latest = *persisted, "Skipping binding for superseded validation");
            return None;
        }
        let mut remote = checked.result.record.clone()?;
        let fingerprint = match checked.fingerprint.take() {
            Some(fingerprint) => fingerprint,
            None => self.identity.generate_fingerprint().await,
        };

        if let Some(slot) = checked.slot {
            let now = self.clock.now_ms();
            let patch = if remote.machine_id.is_none() {
                LicensePatch::bind(fingerprint.machine_id.clone(), now)
            } else {
                LicensePatch::touch(now)
            };
            match self.authority.update_license(slot, &patch).await {
                Ok(()) => {
                    if remote.machine_id.is_none() {
                        info!(key = key_prefix(&remote.license_key), machine_id = %fingerprint.machine_id, "Bound license to this machine");
                        remote.machine_id = Some(fingerprint.machine_id.clone());
                    }
                    remote.last_validation = DateTime::from_timestamp_millis(now);
                    remote.updated_at = now;
                }
                Err(e) => {
                    warn!(key = key_prefix(&remote.license_key), error = %e, "Failed to update remote license");
                    if e.is_connectivity() {
                        self.monitor.mark_offline().await;
                    }
                }
            }
        }

        // The in-memory license is set even when the write fails.
        let local = LocalLicenseRecord::from_remote(remote.clone(), fingerprint);
        let local = match self.store.save(local.clone()).await {
            Ok(saved) => saved,
            Err(e) => {
                error!(key = key_prefix(local.license_key()), error = %e, "Failed to save local license");
                local
            }
        };
        *persisted = generation;
        self.state.write().await.current = Some(local);
        Some(remote)
    }

    async fn adopt_local(&self, generation: u64, local: LocalLicenseRecord) -> bool {
        let mut persisted = self.persisted.lock().await;
        if generation < *persisted {
            return false;
        }
        *persisted = generation;
        self.state.write().await.current = Some(local);
        true
    }

    /// Drops local state after the authority rejected the held license.
    async fn invalidate(&self, generation: u64, key: &str) {
        let mut persisted = self.persisted.lock().await;
        if generation < *persisted {
            return;
        }
        *persisted = generation;
        {
            let mut state = self.state.write().await;
            state.cache.remove(key);
            if state.current.as_ref().is_some_and(|c| c.license_key() == key) {
                state.current = None;
            }
        }
        warn!(key = key_prefix(key), "Authority rejected the held license, clearing local state");
        if let Err(e) = self.store.delete().await {
            error!(error = %e, "Failed to delete local license");
        }
    }

    /// Clears the remote binding if it belongs to this machine.
    async fn release_binding(&self, local: &LocalLicenseRecord) {
        let licenses = match self.authority.fetch_licenses().await {
            Ok(licenses) => licenses,
            Err(e) => {
                warn!(error = %e, "Could not reach authority to release binding");
                if e.is_connectivity() {
                    self.monitor.mark_offline().await;
                }
                return;
            }
        };
        let found = licenses.into_iter().enumerate().find_map(|(slot, record)| {
            record
                .filter(|r| r.license_key == local.license_key())
                .map(|r| (slot, r))
        });
        let Some((slot, record)) = found else {
            return;
        };
        let Some(bound) = record.machine_id.as_deref() else {
            return;
        };

        let current = self.identity.generate_fingerprint().await;
        if !self.binding_is_local(bound, &current, Some(local)).await {
            warn!(key = key_prefix(local.license_key()), "Remote binding belongs to another machine, leaving it");
            return;
        }

        match self
            .authority
            .update_license(slot, &LicensePatch::release(self.clock.now_ms()))
            .await
        {
            Ok(()) => info!(key = key_prefix(local.license_key()), "Released remote binding"),
            Err(e) => warn!(error = %e, "Failed to release remote binding"),
        }
    }
}
