//! Hardware descriptors and the privileged probe boundary.
//!
//! The probe is the only component allowed to read hardware identifiers.
//! Everything above it works on the [`HardwareDescriptor`] it returns.

use crate::error::{LicenseError, LicenseResult};
use crate::identity::MachineFingerprint;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A disk as seen by the probe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DiskInfo {
    /// Serial number, or the device name where the platform exposes none.
    pub serial: String,
    /// Capacity in bytes.
    pub size: u64,
}

/// Raw hardware identifiers, best effort per platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareDescriptor {
    pub cpu_model: String,
    pub cpu_cores: u32,
    /// Total memory in bytes.
    pub total_memory: u64,
    pub mac_addresses: Vec<String>,
    pub disks: Vec<DiskInfo>,
    /// OS-level machine GUID.
    pub machine_guid: Option<String>,
    /// BIOS or hardware serial number.
    pub bios_serial: Option<String>,
}

impl HardwareDescriptor {
    /// Returns true for the all-zero descriptor used by degraded fingerprints.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Weighted comparison over stable fields.
    ///
    /// A machine GUID or BIOS serial present on both sides decides the
    /// outcome on its own. Without either, CPU and memory must agree and at
    /// least one MAC address or disk serial must be shared.
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        if let (Some(a), Some(b)) = (normalized_opt(&self.machine_guid), normalized_opt(&other.machine_guid)) {
            return a == b;
        }
        if let (Some(a), Some(b)) = (normalized_opt(&self.bios_serial), normalized_opt(&other.bios_serial)) {
            return a == b;
        }

        if self.cpu_model.trim() != other.cpu_model.trim()
            || self.cpu_cores != other.cpu_cores
            || self.total_memory != other.total_memory
        {
            return false;
        }

        let macs = self.normalized_macs();
        let shared_mac = other
            .normalized_macs()
            .iter()
            .any(|mac| macs.contains(mac));
        let shared_disk = other
            .disks
            .iter()
            .any(|disk| !disk.serial.is_empty() && self.disks.iter().any(|d| d.serial == disk.serial));

        let has_io = !self.is_empty_io() || !other.is_empty_io();
        !has_io || shared_mac || shared_disk
    }

    /// Exact equality of every stable field, ignoring list order and case.
    #[must_use]
    pub fn stable_eq(&self, other: &Self) -> bool {
        let mut disks_a = self.disks.clone();
        let mut disks_b = other.disks.clone();
        disks_a.sort();
        disks_b.sort();

        self.cpu_model.trim() == other.cpu_model.trim()
            && self.cpu_cores == other.cpu_cores
            && self.total_memory == other.total_memory
            && self.normalized_macs() == other.normalized_macs()
            && disks_a == disks_b
            && normalized_opt(&self.machine_guid) == normalized_opt(&other.machine_guid)
            && normalized_opt(&self.bios_serial) == normalized_opt(&other.bios_serial)
    }

    fn normalized_macs(&self) -> Vec<String> {
        let mut macs: Vec<String> = self
            .mac_addresses
            .iter()
            .map(|mac| mac.trim().to_ascii_lowercase().replace('-', ":"))
            .filter(|mac| !mac.is_empty() && mac != "00:00:00:00:00:00")
            .collect();
        macs.sort();
        macs.dedup();
        macs
    }

    fn is_empty_io(&self) -> bool {
        self.normalized_macs().is_empty() && self.disks.is_empty()
    }
}

fn normalized_opt(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
}

/// Request/response boundary to the privileged host process.
#[async_trait]
pub trait HardwareProbe: Send + Sync {
    /// Name used in log output.
    fn name(&self) -> &'static str;

    /// Collects the hardware descriptor of the running machine.
    async fn hardware_info(&self) -> LicenseResult<HardwareDescriptor>;

    /// Checks whether `fingerprint` describes the running machine.
    async fn validate_fingerprint(&self, _fingerprint: &MachineFingerprint) -> LicenseResult<bool> {
        Err(LicenseError::ProbeUnavailable(format!(
            "{} cannot validate fingerprints",
            self.name()
        )))
    }

    /// Platform-specific "same machine" comparison.
    async fn compare_fingerprints(
        &self,
        _a: &MachineFingerprint,
        _b: &MachineFingerprint,
    ) -> LicenseResult<bool> {
        Err(LicenseError::ProbeUnavailable(format!(
            "{} cannot compare fingerprints",
            self.name()
        )))
    }
}

/// Stand-in for sandboxed builds with no privileged host.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableProbe;

#[async_trait]
impl HardwareProbe for UnavailableProbe {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    async fn hardware_info(&self) -> LicenseResult<HardwareDescriptor> {
        Err(LicenseError::ProbeUnavailable(
            "no privileged host process".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desk() -> HardwareDescriptor {
        HardwareDescriptor {
            cpu_model: "Intel(R) Core(TM) i5-8400".into(),
            cpu_cores: 6,
            total_memory: 16 * 1024 * 1024 * 1024,
            mac_addresses: vec!["AA-BB-CC-DD-EE-01".into()],
            disks: vec![DiskInfo { serial: "S3Z9NB0K".into(), size: 500_107_862_016 }],
            machine_guid: None,
            bios_serial: None,
        }
    }

    #[test]
    fn guid_is_decisive() {
        let mut a = desk();
        let mut b = desk();
        a.machine_guid = Some("guid-1".into());
        b.machine_guid = Some("GUID-1".into());
        b.cpu_cores = 12;
        assert!(a.matches(&b));

        b.machine_guid = Some("guid-2".into());
        assert!(!a.matches(&b));
    }

    #[test]
    fn mac_format_is_normalized() {
        let a = desk();
        let mut b = desk();
        b.mac_addresses = vec!["aa:bb:cc:dd:ee:01".into()];
        b.disks.clear();
        assert!(a.matches(&b));
        assert!(!a.stable_eq(&b));
    }

    #[test]
    fn replaced_nic_and_disk_is_a_different_machine() {
        let a = desk();
        let mut b = desk();
        b.mac_addresses = vec!["11:22:33:44:55:66".into()];
        b.disks = vec![DiskInfo { serial: "OTHER".into(), size: 1 }];
        assert!(!a.matches(&b));
    }

    #[test]
    fn empty_descriptor_detected() {
        assert!(HardwareDescriptor::default().is_empty());
        assert!(!desk().is_empty());
    }
}
