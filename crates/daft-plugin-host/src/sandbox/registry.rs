//! Sandbox registry.
//!
//! Keeps at most one provisioned sandbox per (format, identifier), cached in
//! memory and mirrored to a [`KeyValueStore`]. The in-memory map is the
//! source of truth; the store is a best-effort cache for fast cold starts.

use super::persist::{DebouncedWriter, PersistTicket, WriteFn};
use crate::backend::DynBackend;
use crate::error::{PluginHostError, Result};
use crate::models::{PluginDescriptor, PluginFormat, SandboxAssignment};
use crate::platform::PermissionGate;
use crate::storage::DynStore;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Composite registry key. Two formats may share an identifier string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SandboxKey {
    pub format: PluginFormat,
    pub identifier: String,
}

impl SandboxKey {
    pub fn new(format: PluginFormat, identifier: impl Into<String>) -> Self {
        Self {
            format,
            identifier: identifier.into(),
        }
    }
}

impl fmt::Display for SandboxKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.format, self.identifier)
    }
}

/// A provisioned sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxRecord {
    pub identifier: String,
    pub format: PluginFormat,
    pub path: PathBuf,
    pub last_accessed: DateTime<Utc>,
    /// Descriptor the sandbox was provisioned for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<PluginDescriptor>,
}

impl SandboxRecord {
    pub fn key(&self) -> SandboxKey {
        SandboxKey::new(self.format, self.identifier.clone())
    }

    pub fn assignment(&self) -> SandboxAssignment {
        SandboxAssignment {
            identifier: self.identifier.clone(),
            path: self.path.clone(),
        }
    }
}

/// Lenient shape used when hydrating; anything may be missing.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredRecord {
    identifier: Option<String>,
    format: Option<String>,
    path: Option<String>,
    last_accessed: Option<String>,
    descriptor: Option<serde_json::Value>,
}

impl StoredRecord {
    fn into_record(self) -> Option<SandboxRecord> {
        let identifier = self.identifier.filter(|s| !s.is_empty())?;
        let path = self.path.filter(|s| !s.is_empty())?;
        let format = PluginFormat::parse(self.format.as_deref()?)?;
        let last_accessed = self
            .last_accessed
            .and_then(|ts| DateTime::parse_from_rfc3339(&ts).ok())
            .map(|ts| ts.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        let descriptor = self
            .descriptor
            .and_then(|value| serde_json::from_value(value).ok());

        Some(SandboxRecord {
            identifier,
            format,
            path: PathBuf::from(path),
            last_accessed,
            descriptor,
        })
    }
}

type RecordMap = HashMap<SandboxKey, SandboxRecord>;

struct RegistryInner {
    backend: DynBackend,
    store: DynStore,
    gate: PermissionGate,
    storage_key: String,
    records: Arc<Mutex<RecordMap>>,
    hydration: OnceCell<()>,
    writer: DebouncedWriter,
}

impl RegistryInner {
    fn records(&self) -> MutexGuard<'_, RecordMap> {
        lock_records(&self.records)
    }

    /// Load the stored record set once. Every public operation awaits this.
    async fn hydrated(&self) {
        self.hydration
            .get_or_init(|| async {
                let loaded = self.load_stored().await;
                let count = loaded.len();
                let mut records = self.records();
                for record in loaded {
                    records.entry(record.key()).or_insert(record);
                }
                debug!("Hydrated {} sandbox records", count);
            })
            .await;
    }

    async fn load_stored(&self) -> Vec<SandboxRecord> {
        let raw = match self.store.get(&self.storage_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!("Failed to read sandbox records: {}", e);
                return Vec::new();
            }
        };

        let entries: Vec<serde_json::Value> = match serde_json::from_str(&raw) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Discarding unreadable sandbox record set: {}", e);
                return Vec::new();
            }
        };

        let total = entries.len();
        let records: Vec<SandboxRecord> = entries
            .into_iter()
            .filter_map(|value| serde_json::from_value::<StoredRecord>(value).ok())
            .filter_map(StoredRecord::into_record)
            .collect();

        if records.len() < total {
            debug!(
                "Dropped {} invalid sandbox records during hydration",
                total - records.len()
            );
        }
        records
    }

    /// Refresh and return a cached record.
    fn touch(&self, key: &SandboxKey) -> Option<SandboxRecord> {
        let mut records = self.records();
        let record = records.get_mut(key)?;
        record.last_accessed = Utc::now();
        Some(record.clone())
    }

    fn upsert(&self, record: SandboxRecord) {
        self.records().insert(record.key(), record);
    }
}

fn lock_records(records: &Mutex<RecordMap>) -> MutexGuard<'_, RecordMap> {
    records.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Durable (format, identifier) → sandbox directory mapping.
///
/// Cloning is cheap and shares the same cache.
#[derive(Clone)]
pub struct SandboxRegistry {
    inner: Arc<RegistryInner>,
}

impl SandboxRegistry {
    /// Create a registry and start hydrating it from `store`.
    ///
    /// Hydration starts immediately when called inside a tokio runtime and
    /// otherwise on first use.
    pub fn new(
        backend: DynBackend,
        store: DynStore,
        gate: PermissionGate,
        storage_key: impl Into<String>,
        debounce: Duration,
    ) -> Self {
        let storage_key = storage_key.into();
        let records: Arc<Mutex<RecordMap>> = Arc::new(Mutex::new(HashMap::new()));

        let write: WriteFn = {
            let store = Arc::clone(&store);
            let records = Arc::clone(&records);
            let key = storage_key.clone();
            Arc::new(move || {
                let store = Arc::clone(&store);
                let key = key.clone();
                let current = snapshot(&records);
                async move {
                    let serialized = serde_json::to_string(&current)?;
                    store.set(&key, &serialized).await?;
                    debug!("Persisted {} sandbox records", current.len());
                    Ok::<_, PluginHostError>(())
                }
                .boxed()
            })
        };

        let registry = Self {
            inner: Arc::new(RegistryInner {
                backend,
                store,
                gate,
                storage_key,
                records,
                hydration: OnceCell::new(),
                writer: DebouncedWriter::new(debounce, write),
            }),
        };

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let inner = Arc::clone(&registry.inner);
            handle.spawn(async move { inner.hydrated().await });
        }

        registry
    }

    /// Return the sandbox for `descriptor`, provisioning one on first use.
    ///
    /// The sandbox identifier is `preferred_id` when given, otherwise the
    /// descriptor identifier. A cache hit refreshes the record without a
    /// backend call. A miss runs the storage permission check (Android-class
    /// platforms), asks the backend for a path, and caches the result.
    ///
    /// Concurrent calls for the same key before provisioning resolves are not
    /// deduplicated; each reaches the backend.
    pub async fn ensure_sandbox(
        &self,
        descriptor: &PluginDescriptor,
        preferred_id: Option<&str>,
    ) -> Result<SandboxRecord> {
        self.inner.hydrated().await;

        let identifier = preferred_id.unwrap_or(descriptor.identifier.as_str());
        let key = SandboxKey::new(descriptor.format, identifier);

        if let Some(record) = self.inner.touch(&key) {
            debug!("Sandbox cache hit for {}", key);
            self.inner.writer.schedule();
            return Ok(record);
        }

        self.inner.gate.check(descriptor, identifier).await?;

        let path = self.inner.backend.provision_sandbox(identifier).await?;
        let record = SandboxRecord {
            identifier: identifier.to_string(),
            format: descriptor.format,
            path,
            last_accessed: Utc::now(),
            descriptor: Some(descriptor.clone()),
        };

        info!(
            "Provisioned sandbox for {} at {}",
            key,
            record.path.display()
        );
        self.inner.upsert(record.clone());
        self.inner.writer.schedule();
        Ok(record)
    }

    /// Upsert a sandbox the caller already knows is valid. Never calls the
    /// backend. Returns the stored record with its refreshed timestamp.
    pub async fn record_sandbox(&self, mut record: SandboxRecord) -> SandboxRecord {
        self.inner.hydrated().await;

        record.last_accessed = Utc::now();
        debug!("Recording sandbox {}", record.key());
        self.inner.upsert(record.clone());
        self.inner.writer.schedule();
        record
    }

    pub async fn get(&self, format: PluginFormat, identifier: &str) -> Option<SandboxRecord> {
        self.inner.hydrated().await;
        self.inner
            .records()
            .get(&SandboxKey::new(format, identifier))
            .cloned()
    }

    /// All records, ordered by key.
    pub async fn records(&self) -> Vec<SandboxRecord> {
        self.inner.hydrated().await;
        snapshot(&self.inner.records)
    }

    pub async fn len(&self) -> usize {
        self.inner.hydrated().await;
        self.inner.records().len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Ticket for the pending (or running) write, if any.
    pub fn pending_persist(&self) -> Option<PersistTicket> {
        self.inner.writer.current()
    }

    /// Wait for the pending write window to complete. `Ok` when idle.
    pub async fn flush(&self) -> Result<()> {
        match self.pending_persist() {
            Some(ticket) => ticket.wait().await,
            None => Ok(()),
        }
    }
}

fn snapshot(records: &Mutex<RecordMap>) -> Vec<SandboxRecord> {
    let mut all: Vec<SandboxRecord> = lock_records(records).values().cloned().collect();
    all.sort_by(|a, b| a.key().cmp(&b.key()));
    all
}
