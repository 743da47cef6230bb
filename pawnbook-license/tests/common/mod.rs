//! Shared fakes for license tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pawnbook_crypto::KdfParams;
use pawnbook_license::{
    ChannelChain, Clock, ConnectivityProbe, DiskInfo, EncryptedLocalStore, HardwareDescriptor,
    HardwareProbe, KeyValueChannel, KeyValueStore, LicenseAuthority, LicenseError,
    LicensePatch, LicenseResult, LicenseStatus, LicenseValidationService, MachineFingerprint,
    MachineIdentity, ManualClock, MemoryKeyValueStore, NetworkConfig, NetworkStatusMonitor,
    PersistenceChannel, RemoteLicenseRecord, ServiceParts, DAY_MS,
};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// 2025-01-01T00:00:00Z.
pub const NOW_MS: i64 = 1_735_689_600_000;

pub const TTL_MS: i64 = 5 * 60 * 1000;

pub const SCENARIO_KEY: &str = "LICENSE-2024-001";

/// Routes `tracing` output through the test harness; set `RUST_LOG` to see it.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn fast_kdf() -> KdfParams {
    KdfParams { iterations: 1_000 }
}

pub fn date(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).expect("valid timestamp")
}

/// An active, unbound license expiring at `expiry_ms`.
pub fn license(key: &str, expiry_ms: i64) -> RemoteLicenseRecord {
    RemoteLicenseRecord {
        license_key: key.to_string(),
        status: LicenseStatus::Active,
        start_date: date(NOW_MS - 30 * DAY_MS),
        expiry_date: date(expiry_ms),
        created_at: NOW_MS - 30 * DAY_MS,
        updated_at: NOW_MS - 30 * DAY_MS,
        shop_id: "shop-001".to_string(),
        shop_name: "Golden Pawn".to_string(),
        owner_name: "Dana Reyes".to_string(),
        email: "dana@goldenpawn.example".to_string(),
        phone: "555-0100".to_string(),
        is_trial: false,
        machine_id: None,
        max_users: Some(3),
        features: Some(BTreeSet::from(["reports".to_string(), "sms".to_string()])),
        last_validation: None,
    }
}

/// A license valid for one more year.
pub fn yearly(key: &str) -> RemoteLicenseRecord {
    license(key, NOW_MS + 365 * DAY_MS)
}

pub fn machine_a() -> HardwareDescriptor {
    HardwareDescriptor {
        cpu_model: "Intel(R) Core(TM) i5-8400".to_string(),
        cpu_cores: 6,
        total_memory: 16 * 1024 * 1024 * 1024,
        mac_addresses: vec!["aa:bb:cc:dd:ee:01".to_string()],
        disks: vec![DiskInfo {
            serial: "WD-A1".to_string(),
            size: 512_000_000_000,
        }],
        machine_guid: Some("guid-machine-a".to_string()),
        bios_serial: Some("BIOS-A".to_string()),
    }
}

pub fn machine_b() -> HardwareDescriptor {
    HardwareDescriptor {
        cpu_model: "AMD Ryzen 5 5600G".to_string(),
        cpu_cores: 12,
        total_memory: 32 * 1024 * 1024 * 1024,
        mac_addresses: vec!["aa:bb:cc:dd:ee:02".to_string()],
        disks: vec![DiskInfo {
            serial: "WD-B1".to_string(),
            size: 1_000_000_000_000,
        }],
        machine_guid: Some("guid-machine-b".to_string()),
        bios_serial: Some("BIOS-B".to_string()),
    }
}

// ── Hardware ─────────────────────────────────────────────────────

/// Probe returning switchable hardware.
pub struct FakeProbe {
    hardware: Mutex<HardwareDescriptor>,
    failing: AtomicBool,
    comparator: bool,
    pub calls: AtomicUsize,
}

impl FakeProbe {
    pub fn new(hardware: HardwareDescriptor) -> Self {
        Self {
            hardware: Mutex::new(hardware),
            failing: AtomicBool::new(false),
            comparator: true,
            calls: AtomicUsize::new(0),
        }
    }

    /// A probe with no comparator of its own.
    pub fn without_comparator(hardware: HardwareDescriptor) -> Self {
        Self {
            comparator: false,
            ..Self::new(hardware)
        }
    }

    pub fn set_hardware(&self, hardware: HardwareDescriptor) {
        *self.hardware.lock().unwrap() = hardware;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl HardwareProbe for FakeProbe {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn hardware_info(&self) -> LicenseResult<HardwareDescriptor> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(LicenseError::ProbeUnavailable("probe offline".to_string()));
        }
        Ok(self.hardware.lock().unwrap().clone())
    }

    async fn compare_fingerprints(
        &self,
        a: &MachineFingerprint,
        b: &MachineFingerprint,
    ) -> LicenseResult<bool> {
        if !self.comparator || self.failing.load(Ordering::SeqCst) {
            return Err(LicenseError::ProbeUnavailable("no comparator".to_string()));
        }
        Ok(a.platform == b.platform && a.hardware_info.matches(&b.hardware_info))
    }
}

// ── Network ──────────────────────────────────────────────────────

/// Connectivity answering from two switches.
pub struct FakeConnectivity {
    pub internet: AtomicBool,
    pub authority: AtomicBool,
    pub probes: AtomicUsize,
}

impl FakeConnectivity {
    pub fn new(online: bool) -> Self {
        Self {
            internet: AtomicBool::new(online),
            authority: AtomicBool::new(online),
            probes: AtomicUsize::new(0),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.internet.store(online, Ordering::SeqCst);
        self.authority.store(online, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConnectivityProbe for FakeConnectivity {
    async fn probe_internet(&self) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.internet.load(Ordering::SeqCst)
    }

    async fn probe_authority(&self) -> bool {
        self.authority.load(Ordering::SeqCst)
    }
}

/// Probe that never answers.
pub struct HangingConnectivity;

#[async_trait]
impl ConnectivityProbe for HangingConnectivity {
    async fn probe_internet(&self) -> bool {
        std::future::pending::<()>().await;
        true
    }

    async fn probe_authority(&self) -> bool {
        std::future::pending::<()>().await;
        true
    }
}

// ── Authority ────────────────────────────────────────────────────

/// Slot-indexed license collection held in memory.
pub struct InMemoryAuthority {
    slots: Mutex<Vec<Option<RemoteLicenseRecord>>>,
    failing: AtomicBool,
    pub fetches: AtomicUsize,
    pub updates: AtomicUsize,
}

impl InMemoryAuthority {
    /// Slot 0 is left empty.
    pub fn with_licenses(licenses: Vec<RemoteLicenseRecord>) -> Self {
        let mut slots = vec![None];
        slots.extend(licenses.into_iter().map(Some));
        Self {
            slots: Mutex::new(slots),
            failing: AtomicBool::new(false),
            fetches: AtomicUsize::new(0),
            updates: AtomicUsize::new(0),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn record(&self, key: &str) -> Option<RemoteLicenseRecord> {
        self.slots
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .find(|r| r.license_key == key)
            .cloned()
    }

    pub fn edit(&self, key: &str, edit: impl FnOnce(&mut RemoteLicenseRecord)) {
        let mut slots = self.slots.lock().unwrap();
        let record = slots
            .iter_mut()
            .flatten()
            .find(|r| r.license_key == key)
            .expect("license present");
        edit(record);
    }
}

#[async_trait]
impl LicenseAuthority for InMemoryAuthority {
    async fn fetch_licenses(&self) -> LicenseResult<Vec<Option<RemoteLicenseRecord>>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(LicenseError::Network("connection refused".to_string()));
        }
        Ok(self.slots.lock().unwrap().clone())
    }

    async fn update_license(&self, slot: usize, patch: &LicensePatch) -> LicenseResult<()> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(LicenseError::Network("connection refused".to_string()));
        }
        let mut slots = self.slots.lock().unwrap();
        let record = slots
            .get_mut(slot)
            .and_then(Option::as_mut)
            .ok_or_else(|| LicenseError::Authority(format!("no record at slot {slot}")))?;
        if let Some(machine_id) = &patch.machine_id {
            record.machine_id = machine_id.clone();
        }
        if patch.last_validation.is_some() {
            record.last_validation = patch.last_validation;
        }
        if let Some(updated_at) = patch.updated_at {
            record.updated_at = updated_at;
        }
        Ok(())
    }
}

// ── Assembly ─────────────────────────────────────────────────────

/// One simulated installation: its own hardware and storage, a shared
/// authority and clock.
pub struct Machine {
    pub clock: Arc<ManualClock>,
    pub probe: Arc<FakeProbe>,
    pub connectivity: Arc<FakeConnectivity>,
    pub authority: Arc<InMemoryAuthority>,
    pub storage: Arc<MemoryKeyValueStore>,
}

impl Machine {
    pub fn new(hardware: HardwareDescriptor, authority: Arc<InMemoryAuthority>) -> Self {
        Self {
            clock: Arc::new(ManualClock::new(NOW_MS)),
            probe: Arc::new(FakeProbe::new(hardware)),
            connectivity: Arc::new(FakeConnectivity::new(true)),
            authority,
            storage: Arc::new(MemoryKeyValueStore::new()),
        }
    }

    /// A second machine sharing this one's authority and clock.
    pub fn sibling(&self, hardware: HardwareDescriptor) -> Self {
        Self {
            clock: Arc::clone(&self.clock),
            probe: Arc::new(FakeProbe::new(hardware)),
            connectivity: Arc::new(FakeConnectivity::new(true)),
            authority: Arc::clone(&self.authority),
            storage: Arc::new(MemoryKeyValueStore::new()),
        }
    }

    pub fn identity(&self) -> Arc<MachineIdentity> {
        let clock: Arc<dyn Clock> = self.clock.clone();
        Arc::new(MachineIdentity::new(self.probe.clone(), clock))
    }

    pub fn store(&self, identity: Arc<MachineIdentity>) -> EncryptedLocalStore {
        let kv: Arc<dyn KeyValueStore> = self.storage.clone();
        let channels: Vec<Arc<dyn PersistenceChannel>> =
            vec![Arc::new(KeyValueChannel::new(kv, "pawnbook.license"))];
        EncryptedLocalStore::new(ChannelChain::new(channels), identity, &fast_kdf())
            .expect("store key derives")
    }

    pub fn monitor(&self) -> Arc<NetworkStatusMonitor> {
        let clock: Arc<dyn Clock> = self.clock.clone();
        Arc::new(NetworkStatusMonitor::new(
            self.connectivity.clone(),
            clock,
            NetworkConfig::default(),
        ))
    }

    /// A fresh service, as after an application restart.
    pub fn service(&self) -> LicenseValidationService {
        let identity = self.identity();
        LicenseValidationService::new(ServiceParts {
            store: self.store(Arc::clone(&identity)),
            identity,
            monitor: self.monitor(),
            authority: self.authority.clone(),
            clock: self.clock.clone(),
            cache_ttl_ms: TTL_MS,
        })
    }

    pub fn set_offline(&self) {
        self.connectivity.set_online(false);
    }
}

/// One machine with one active unbound yearly license.
pub fn single_license_setup(key: &str) -> Machine {
    let authority = Arc::new(InMemoryAuthority::with_licenses(vec![yearly(key)]));
    Machine::new(machine_a(), authority)
}
