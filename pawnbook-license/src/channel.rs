//! Persistence channels for the encrypted license blob.
//!
//! Channels are tried as an ordered strategy list: a granted file handle,
//! then a user-consented new file, then a namespaced key/value store. The
//! first channel that accepts a write is remembered for later writes.

use crate::error::{LicenseError, LicenseResult};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// A place that can hold the license blob.
#[async_trait]
pub trait PersistenceChannel: Send + Sync {
    /// Name used in log output.
    fn name(&self) -> &'static str;

    /// Reads the blob, `None` if this channel holds nothing.
    async fn read(&self) -> LicenseResult<Option<Vec<u8>>>;

    /// Replaces the blob.
    async fn write(&self, bytes: &[u8]) -> LicenseResult<()>;

    /// Removes the blob. Succeeds when nothing was stored.
    async fn remove(&self) -> LicenseResult<()>;

    /// Identifies the underlying storage. Channels reporting the same id
    /// hold the same blob.
    async fn storage_id(&self) -> Option<String> {
        None
    }
}

// ── File handles ─────────────────────────────────────────────────

/// The file the user has granted access to, shared by the file channels.
#[derive(Debug, Default)]
pub struct FileHandleSlot {
    path: RwLock<Option<PathBuf>>,
}

impl FileHandleSlot {
    /// A slot with no grant yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// A slot holding a grant from an earlier session.
    pub fn granted(path: impl Into<PathBuf>) -> Self {
        Self {
            path: RwLock::new(Some(path.into())),
        }
    }

    pub async fn path(&self) -> Option<PathBuf> {
        self.path.read().await.clone()
    }

    pub async fn grant(&self, path: PathBuf) {
        *self.path.write().await = Some(path);
    }
}

/// Asks the user where the license file may be written.
#[async_trait]
pub trait FilePicker: Send + Sync {
    /// Returns the consented path, or `None` if the user declined.
    async fn pick_save_path(&self, suggested_name: &str) -> Option<PathBuf>;
}

/// Picker that always consents to one path, for hosts without a dialog.
#[derive(Debug, Clone)]
pub struct FixedPathPicker {
    path: PathBuf,
}

impl FixedPathPicker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl FilePicker for FixedPathPicker {
    async fn pick_save_path(&self, _suggested_name: &str) -> Option<PathBuf> {
        Some(self.path.clone())
    }
}

/// Writes through a previously granted file handle.
pub struct GrantedFileChannel {
    slot: Arc<FileHandleSlot>,
}

impl GrantedFileChannel {
    pub fn new(slot: Arc<FileHandleSlot>) -> Self {
        Self { slot }
    }
}

#[async_trait]
impl PersistenceChannel for GrantedFileChannel {
    fn name(&self) -> &'static str {
        "granted-file"
    }

    async fn read(&self) -> LicenseResult<Option<Vec<u8>>> {
        match self.slot.path().await {
            Some(path) => read_optional(&path).await,
            None => Ok(None),
        }
    }

    async fn write(&self, bytes: &[u8]) -> LicenseResult<()> {
        let path = self
            .slot
            .path()
            .await
            .ok_or_else(|| LicenseError::ChannelUnavailable("no granted file handle".to_string()))?;
        write_atomic(&path, bytes).await
    }

    async fn remove(&self) -> LicenseResult<()> {
        match self.slot.path().await {
            Some(path) => remove_optional(&path).await,
            None => Ok(()),
        }
    }

    async fn storage_id(&self) -> Option<String> {
        file_storage_id(&self.slot).await
    }
}

/// Prompts for a new file, records the grant, then writes. Later writes
/// reuse the grant without prompting.
pub struct PromptFileChannel {
    slot: Arc<FileHandleSlot>,
    picker: Arc<dyn FilePicker>,
    suggested_name: String,
}

impl PromptFileChannel {
    pub fn new(slot: Arc<FileHandleSlot>, picker: Arc<dyn FilePicker>, suggested_name: impl Into<String>) -> Self {
        Self {
            slot,
            picker,
            suggested_name: suggested_name.into(),
        }
    }
}

#[async_trait]
impl PersistenceChannel for PromptFileChannel {
    fn name(&self) -> &'static str {
        "prompted-file"
    }

    // Data written here is read back through the granted handle.
    async fn read(&self) -> LicenseResult<Option<Vec<u8>>> {
        Ok(None)
    }

    async fn write(&self, bytes: &[u8]) -> LicenseResult<()> {
        if let Some(path) = self.slot.path().await {
            return write_atomic(&path, bytes).await;
        }
        let path = self
            .picker
            .pick_save_path(&self.suggested_name)
            .await
            .ok_or_else(|| LicenseError::ChannelUnavailable("user declined file access".to_string()))?;
        write_atomic(&path, bytes).await?;
        info!(path = %path.display(), "License file access granted");
        self.slot.grant(path).await;
        Ok(())
    }

    async fn remove(&self) -> LicenseResult<()> {
        Ok(())
    }

    async fn storage_id(&self) -> Option<String> {
        file_storage_id(&self.slot).await
    }
}

// ── Key/value fallback ───────────────────────────────────────────

/// Flat string store, the last-resort persistence channel.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> LicenseResult<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> LicenseResult<()>;
    async fn remove(&self, key: &str) -> LicenseResult<()>;
}

/// In-process key/value store.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> LicenseResult<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> LicenseResult<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> LicenseResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// Key/value store kept as one JSON object on disk.
pub struct JsonFileKeyValueStore {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl JsonFileKeyValueStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    async fn load(&self) -> LicenseResult<BTreeMap<String, String>> {
        match read_optional(&self.path).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(BTreeMap::new()),
        }
    }

    async fn persist(&self, entries: &BTreeMap<String, String>) -> LicenseResult<()> {
        write_atomic(&self.path, &serde_json::to_vec_pretty(entries)?).await
    }
}

#[async_trait]
impl KeyValueStore for JsonFileKeyValueStore {
    async fn get(&self, key: &str) -> LicenseResult<Option<String>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> LicenseResult<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load().await?;
        entries.insert(key.to_string(), value.to_string());
        self.persist(&entries).await
    }

    async fn remove(&self, key: &str) -> LicenseResult<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load().await?;
        if entries.remove(key).is_some() {
            self.persist(&entries).await?;
        }
        Ok(())
    }
}

/// Stores the blob base64-encoded under `"{namespace}.blob"`.
pub struct KeyValueChannel {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl KeyValueChannel {
    pub fn new(store: Arc<dyn KeyValueStore>, namespace: &str) -> Self {
        Self {
            store,
            key: format!("{namespace}.blob"),
        }
    }

    /// The key the blob lives under.
    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl PersistenceChannel for KeyValueChannel {
    fn name(&self) -> &'static str {
        "key-value"
    }

    async fn read(&self) -> LicenseResult<Option<Vec<u8>>> {
        match self.store.get(&self.key).await? {
            Some(encoded) => STANDARD
                .decode(encoded.as_bytes())
                .map(Some)
                .map_err(|e| LicenseError::Storage(format!("invalid base64 blob: {e}"))),
            None => Ok(None),
        }
    }

    async fn write(&self, bytes: &[u8]) -> LicenseResult<()> {
        self.store.set(&self.key, &STANDARD.encode(bytes)).await
    }

    async fn remove(&self) -> LicenseResult<()> {
        self.store.remove(&self.key).await
    }

    async fn storage_id(&self) -> Option<String> {
        Some(format!("kv:{}", self.key))
    }
}

// ── Ordered strategy list ────────────────────────────────────────

/// Ordered list of channels; the first success ends the chain.
pub struct ChannelChain {
    channels: Vec<Arc<dyn PersistenceChannel>>,
    active: RwLock<Option<usize>>,
    // Serializes writes and removals; temp-file names are per target.
    io: tokio::sync::Mutex<()>,
}

impl ChannelChain {
    pub fn new(channels: Vec<Arc<dyn PersistenceChannel>>) -> Self {
        Self {
            channels,
            active: RwLock::new(None),
            io: tokio::sync::Mutex::new(()),
        }
    }

    /// Name of the channel remembered for writes, if any.
    pub async fn active_channel(&self) -> Option<&'static str> {
        self.active
            .read()
            .await
            .and_then(|index| self.channels.get(index))
            .map(|channel| channel.name())
    }

    /// Remembered channel first, then the rest in declared order.
    async fn attempt_order(&self) -> Vec<usize> {
        let active = *self.active.read().await;
        let mut order: Vec<usize> = active.into_iter().collect();
        order.extend((0..self.channels.len()).filter(|i| Some(*i) != active));
        order
    }

    /// Writes through exactly one channel and clears stale copies elsewhere.
    pub async fn write(&self, bytes: &[u8]) -> LicenseResult<&'static str> {
        let _io = self.io.lock().await;
        let mut last_error = None;
        for index in self.attempt_order().await {
            let channel = &self.channels[index];
            match channel.write(bytes).await {
                Ok(()) => {
                    *self.active.write().await = Some(index);
                    self.clear_others(index).await;
                    debug!(channel = channel.name(), "License blob written");
                    return Ok(channel.name());
                }
                Err(e) => {
                    debug!(channel = channel.name(), error = %e, "Channel rejected write");
                    last_error = Some(e);
                }
            }
        }
        Err(LicenseError::Storage(match last_error {
            Some(e) => format!("no persistence channel accepted the write: {e}"),
            None => "no persistence channels configured".to_string(),
        }))
    }

    /// Reads from the first channel that holds data.
    pub async fn read(&self) -> LicenseResult<Option<Vec<u8>>> {
        for index in self.attempt_order().await {
            let channel = &self.channels[index];
            match channel.read().await {
                Ok(Some(bytes)) => {
                    *self.active.write().await = Some(index);
                    return Ok(Some(bytes));
                }
                Ok(None) => {}
                Err(e) => warn!(channel = channel.name(), error = %e, "Channel read failed"),
            }
        }
        Ok(None)
    }

    /// Removes the blob from every channel.
    pub async fn remove(&self) -> LicenseResult<()> {
        let _io = self.io.lock().await;
        let mut first_error = None;
        for channel in &self.channels {
            if let Err(e) = channel.remove().await {
                warn!(channel = channel.name(), error = %e, "Channel remove failed");
                first_error.get_or_insert(e);
            }
        }
        *self.active.write().await = None;
        first_error.map_or(Ok(()), Err)
    }

    async fn clear_others(&self, keep: usize) {
        let kept = self.channels[keep].storage_id().await;
        for (index, channel) in self.channels.iter().enumerate() {
            if index == keep {
                continue;
            }
            let id = channel.storage_id().await;
            if id.is_none() || id != kept {
                if let Err(e) = channel.remove().await {
                    debug!(channel = channel.name(), error = %e, "Could not clear stale copy");
                }
            }
        }
    }
}

// ── File helpers ─────────────────────────────────────────────────

async fn file_storage_id(slot: &FileHandleSlot) -> Option<String> {
    slot.path().await.map(|path| format!("file:{}", path.display()))
}

async fn read_optional(path: &Path) -> LicenseResult<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
        Err(e) => Err(LicenseError::Storage(format!(
            "failed to read {}: {e}",
            path.display()
        ))),
    }
}

async fn remove_optional(path: &Path) -> LicenseResult<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
        Err(e) => Err(LicenseError::Storage(format!(
            "failed to remove {}: {e}",
            path.display()
        ))),
    }
}

/// Writes to a sibling temp file, then renames over the target.
async fn write_atomic(path: &Path, bytes: &[u8]) -> LicenseResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| LicenseError::Storage(format!("failed to create {}: {e}", parent.display())))?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, bytes)
        .await
        .map_err(|e| LicenseError::Storage(format!("failed to write {}: {e}", tmp.display())))?;
    fs::rename(&tmp, path)
        .await
        .map_err(|e| LicenseError::Storage(format!("failed to replace {}: {e}", path.display())))
}
