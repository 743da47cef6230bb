//! Machine fingerprinting for license binding.
//!
//! A fingerprint is a snapshot: its `hash` covers the generation timestamp,
//! so two fingerprints of the same hardware taken at different instants
//! never share a `machine_id`. "Same machine" decisions therefore always go
//! through [`MachineIdentity::is_same_machine`], which compares the stable
//! hardware fields.

use crate::clock::Clock;
use crate::hardware::{HardwareDescriptor, HardwareProbe};
use crate::probe::os_version;
use pawnbook_crypto::sha256_hex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Hostname recorded by degraded fingerprints.
pub const PLACEHOLDER_HOSTNAME: &str = "unknown-host";

/// Length of `machine_id` in hex characters.
pub const MACHINE_ID_LEN: usize = 16;

/// A derived identifier for this machine at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineFingerprint {
    /// First 16 hex characters of `hash`.
    pub machine_id: String,
    pub platform: String,
    pub arch: String,
    pub hostname: String,
    /// Generation time, epoch milliseconds.
    pub timestamp: i64,
    /// Full SHA-256 hex digest.
    pub hash: String,
    pub hardware_info: HardwareDescriptor,
}

impl MachineFingerprint {
    /// Hashes `(platform, arch, hostname, hardware_info, timestamp)`.
    #[must_use]
    pub fn compute(
        platform: impl Into<String>,
        arch: impl Into<String>,
        hostname: impl Into<String>,
        hardware_info: HardwareDescriptor,
        timestamp: i64,
    ) -> Self {
        let platform = platform.into();
        let arch = arch.into();
        let hostname = hostname.into();

        let canonical =
            serde_json::to_vec(&(&platform, &arch, &hostname, &hardware_info, timestamp))
                .unwrap_or_default();
        let hash = sha256_hex(&canonical);
        let machine_id = hash[..MACHINE_ID_LEN].to_string();

        Self {
            machine_id,
            platform,
            arch,
            hostname,
            timestamp,
            hash,
            hardware_info,
        }
    }

    /// Returns true if this fingerprint was built without the probe.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.hardware_info.is_empty()
    }
}

/// Produces fingerprints and answers "is this the same machine".
pub struct MachineIdentity {
    probe: Arc<dyn HardwareProbe>,
    clock: Arc<dyn Clock>,
}

impl MachineIdentity {
    pub fn new(probe: Arc<dyn HardwareProbe>, clock: Arc<dyn Clock>) -> Self {
        Self { probe, clock }
    }

    /// Generates a fingerprint for the running machine.
    ///
    /// Never fails: when the probe is unavailable a degraded fingerprint
    /// with an empty descriptor is returned instead.
    pub async fn generate_fingerprint(&self) -> MachineFingerprint {
        let timestamp = self.clock.now_ms();
        match self.probe.hardware_info().await {
            Ok(hardware_info) => {
                let fingerprint = MachineFingerprint::compute(
                    std::env::consts::OS,
                    std::env::consts::ARCH,
                    get_hostname(),
                    hardware_info,
                    timestamp,
                );
                debug!(machine_id = %fingerprint.machine_id, "Generated machine fingerprint");
                fingerprint
            }
            Err(e) => {
                warn!(probe = self.probe.name(), error = %e, "Hardware probe failed, using degraded fingerprint");
                Self::fallback_fingerprint(timestamp)
            }
        }
    }

    /// Fingerprint built from the runtime environment alone.
    #[must_use]
    pub fn fallback_fingerprint(timestamp: i64) -> MachineFingerprint {
        MachineFingerprint::compute(
            std::env::consts::OS,
            coarse_arch(std::env::consts::ARCH),
            PLACEHOLDER_HOSTNAME,
            HardwareDescriptor::default(),
            timestamp,
        )
    }

    /// Compares two fingerprints by their stable hardware fields.
    ///
    /// Delegates to the probe's comparator; without one, falls back to
    /// platform, arch and exact equality of the stable fields.
    pub async fn is_same_machine(&self, a: &MachineFingerprint, b: &MachineFingerprint) -> bool {
        match self.probe.compare_fingerprints(a, b).await {
            Ok(same) => same,
            Err(e) => {
                debug!(error = %e, "Probe comparator unavailable, using fallback comparator");
                Self::fallback_same_machine(a, b)
            }
        }
    }

    /// The coarse comparator used when the probe cannot compare.
    #[must_use]
    pub fn fallback_same_machine(a: &MachineFingerprint, b: &MachineFingerprint) -> bool {
        a.platform == b.platform
            && a.arch == b.arch
            && (a.machine_id == b.machine_id || a.hardware_info.stable_eq(&b.hardware_info))
    }

    /// Checks a stored fingerprint against the machine running right now.
    pub async fn matches_current(&self, fingerprint: &MachineFingerprint) -> bool {
        match self.probe.validate_fingerprint(fingerprint).await {
            Ok(valid) => valid,
            Err(_) => {
                let current = self.generate_fingerprint().await;
                self.is_same_machine(fingerprint, &current).await
            }
        }
    }

    /// Human-readable label for diagnostics. Never used for identity.
    pub async fn describe_machine(&self) -> String {
        let fingerprint = self.generate_fingerprint().await;
        describe(&fingerprint)
    }
}

/// Formats a fingerprint for log and UI output.
#[must_use]
pub fn describe(fingerprint: &MachineFingerprint) -> String {
    let hw = &fingerprint.hardware_info;
    if fingerprint.is_degraded() {
        return format!(
            "{} ({}/{}, hardware unavailable) [{}]",
            fingerprint.hostname, fingerprint.platform, fingerprint.arch, fingerprint.machine_id
        );
    }
    format!(
        "{} ({}/{}, {}, {} cores, {} MiB, {}) [{}]",
        fingerprint.hostname,
        fingerprint.platform,
        fingerprint.arch,
        os_version(),
        hw.cpu_cores,
        hw.total_memory / (1024 * 1024),
        if hw.cpu_model.is_empty() { "unknown CPU" } else { hw.cpu_model.as_str() },
        fingerprint.machine_id
    )
}

/// Gets the machine hostname.
fn get_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| PLACEHOLDER_HOSTNAME.to_string())
}

/// Maps a target arch to the coarse family name.
fn coarse_arch(arch: &str) -> &'static str {
    match arch {
        "x86_64" => "x64",
        "x86" => "ia32",
        "aarch64" => "arm64",
        "arm" => "arm",
        _ => "unknown",
    }
}
