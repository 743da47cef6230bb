//! Hardware probe backed by the local operating system.
//!
//! Reads CPU, memory, network and disk identifiers through `sysinfo`, plus
//! the platform machine id and BIOS serial where the OS exposes them.

use crate::error::{LicenseError, LicenseResult};
use crate::hardware::{DiskInfo, HardwareDescriptor, HardwareProbe};
use crate::identity::MachineFingerprint;
use async_trait::async_trait;
use std::collections::BTreeMap;
use sysinfo::{Disks, Networks, System};
use tracing::debug;

/// Probe that queries the running machine directly.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl SystemProbe {
    /// Collects the descriptor synchronously.
    #[must_use]
    pub fn collect() -> HardwareDescriptor {
        let system = System::new_all();

        let cpu_model = system
            .cpus()
            .first()
            .map(|cpu| cpu.brand().trim().to_string())
            .unwrap_or_default();

        let networks = Networks::new_with_refreshed_list();
        let mut mac_addresses: Vec<String> = networks
            .list()
            .iter()
            .filter(|(name, _)| !is_virtual_interface(name))
            .map(|(_, data)| data.mac_address().to_string())
            .filter(|mac| mac != "00:00:00:00:00:00")
            .collect();
        mac_addresses.sort();
        mac_addresses.dedup();

        // Several mounts can share one device; keep one entry per device.
        let disks = Disks::new_with_refreshed_list();
        let by_device: BTreeMap<String, u64> = disks
            .list()
            .iter()
            .map(|disk| (disk.name().to_string_lossy().to_string(), disk.total_space()))
            .filter(|(name, _)| !name.is_empty())
            .collect();
        let disks = by_device
            .into_iter()
            .map(|(serial, size)| DiskInfo { serial, size })
            .collect();

        HardwareDescriptor {
            cpu_model,
            cpu_cores: system.cpus().len() as u32,
            total_memory: system.total_memory(),
            mac_addresses,
            disks,
            machine_guid: get_machine_id(),
            bios_serial: get_bios_serial(),
        }
    }
}

#[async_trait]
impl HardwareProbe for SystemProbe {
    fn name(&self) -> &'static str {
        "system"
    }

    async fn hardware_info(&self) -> LicenseResult<HardwareDescriptor> {
        let descriptor = tokio::task::spawn_blocking(Self::collect)
            .await
            .map_err(|e| LicenseError::ProbeUnavailable(format!("probe task failed: {e}")))?;
        debug!(
            macs = descriptor.mac_addresses.len(),
            disks = descriptor.disks.len(),
            has_guid = descriptor.machine_guid.is_some(),
            "Collected hardware descriptor"
        );
        Ok(descriptor)
    }

    async fn validate_fingerprint(&self, fingerprint: &MachineFingerprint) -> LicenseResult<bool> {
        let current = self.hardware_info().await?;
        Ok(fingerprint.platform == std::env::consts::OS
            && fingerprint.arch == std::env::consts::ARCH
            && fingerprint.hardware_info.matches(&current))
    }

    async fn compare_fingerprints(
        &self,
        a: &MachineFingerprint,
        b: &MachineFingerprint,
    ) -> LicenseResult<bool> {
        Ok(a.platform == b.platform
            && a.arch == b.arch
            && a.hardware_info.matches(&b.hardware_info))
    }
}

/// Gets the OS version string for diagnostics.
pub(crate) fn os_version() -> String {
    System::long_os_version().unwrap_or_else(|| "unknown".to_string())
}

fn is_virtual_interface(name: &str) -> bool {
    const PREFIXES: [&str; 7] = ["lo", "docker", "veth", "br-", "virbr", "vmnet", "utun"];
    PREFIXES.iter().any(|prefix| name.starts_with(prefix))
}

#[cfg(any(target_os = "macos", target_os = "windows"))]
fn run(program: &str, args: &[&str]) -> Option<String> {
    std::process::Command::new(program)
        .args(args)
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
}

/// Gets the machine ID (platform-specific unique identifier).
fn get_machine_id() -> Option<String> {
    #[cfg(target_os = "macos")]
    {
        run("ioreg", &["-rd1", "-c", "IOPlatformExpertDevice"]).and_then(|output| {
            output
                .lines()
                .find(|l| l.contains("IOPlatformUUID"))
                .and_then(|l| l.split('"').nth(3))
                .map(String::from)
        })
    }

    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/etc/machine-id")
            .or_else(|_| std::fs::read_to_string("/var/lib/dbus/machine-id"))
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    #[cfg(target_os = "windows")]
    {
        run(
            "reg",
            &["query", r"HKLM\SOFTWARE\Microsoft\Cryptography", "/v", "MachineGuid"],
        )
        .and_then(|output| {
            output
                .lines()
                .find(|l| l.contains("MachineGuid"))
                .and_then(|l| l.split_whitespace().last())
                .map(String::from)
        })
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows", target_os = "linux")))]
    {
        None
    }
}

/// Gets the BIOS / platform serial number, where readable without elevation.
fn get_bios_serial() -> Option<String> {
    #[cfg(target_os = "macos")]
    {
        run("ioreg", &["-rd1", "-c", "IOPlatformExpertDevice"]).and_then(|output| {
            output
                .lines()
                .find(|l| l.contains("IOPlatformSerialNumber"))
                .and_then(|l| l.split('"').nth(3))
                .map(String::from)
        })
    }

    #[cfg(target_os = "linux")]
    {
        ["/sys/class/dmi/id/product_serial", "/sys/class/dmi/id/board_serial"]
            .iter()
            .find_map(|path| std::fs::read_to_string(path).ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("to be filled by o.e.m."))
    }

    #[cfg(target_os = "windows")]
    {
        run("wmic", &["bios", "get", "serialnumber"]).and_then(|output| {
            output
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.eq_ignore_ascii_case("SerialNumber"))
                .map(String::from)
                .next()
        })
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows", target_os = "linux")))]
    {
        None
    }
}
