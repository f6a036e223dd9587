//! Persistent last-known KPI snapshot used for instant first paint.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use contract::Clock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::kpi::KpiRecord;

/// Snapshots older than this are ignored on hydrate.
pub const CACHE_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache io: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache json: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub data: Vec<KpiRecord>,
    /// Milliseconds since the epoch at commit time.
    pub timestamp: i64,
}

impl CacheEntry {
    pub fn is_fresh(&self, now_ms: i64, ttl: Duration) -> bool {
        now_ms.saturating_sub(self.timestamp) < ttl.as_millis() as i64
    }
}

// ------------------------------------------------------------------ //
//  Trait                                                              //
// ------------------------------------------------------------------ //

/// Raw storage for the serialised snapshot.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load(&self) -> Result<Option<String>, CacheError>;
    async fn save(&self, contents: String) -> Result<(), CacheError>;
}

// ------------------------------------------------------------------ //
//  FileSnapshotStore (production)                                     //
// ------------------------------------------------------------------ //

#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn load(&self) -> Result<Option<String>, CacheError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, contents: String) -> Result<(), CacheError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::write(&self.path, contents).await?;
        Ok(())
    }
}

// ------------------------------------------------------------------ //
//  MemorySnapshotStore (for tests)                                    //
// ------------------------------------------------------------------ //

/// In-memory store; clones share the same slot.
#[derive(Debug, Default, Clone)]
pub struct MemorySnapshotStore {
    pub contents: Arc<Mutex<Option<String>>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contents(contents: impl Into<String>) -> Self {
        Self {
            contents: Arc::new(Mutex::new(Some(contents.into()))),
        }
    }

    pub fn get(&self) -> Option<String> {
        self.contents.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn load(&self) -> Result<Option<String>, CacheError> {
        Ok(self.get())
    }

    async fn save(&self, contents: String) -> Result<(), CacheError> {
        *self.contents.lock().unwrap_or_else(|p| p.into_inner()) = Some(contents);
        Ok(())
    }
}

// ------------------------------------------------------------------ //
//  ClientCache                                                        //
// ------------------------------------------------------------------ //

pub struct ClientCache {
    store: Arc<dyn SnapshotStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl ClientCache {
    pub fn new(store: Arc<dyn SnapshotStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            ttl: CACHE_TTL,
        }
    }

    /// Fresh, non-empty snapshot if one exists; anything else is `None`.
    pub async fn hydrate(&self) -> Option<CacheEntry> {
        let raw = match self.store.load().await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "failed to read kpi cache");
                return None;
            }
        };
        let entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "ignoring unreadable kpi cache");
                return None;
            }
        };
        if entry.data.is_empty() {
            return None;
        }
        if !entry.is_fresh(self.clock.now_ms(), self.ttl) {
            debug!(timestamp = entry.timestamp, "kpi cache is stale");
            return None;
        }
        Some(entry)
    }

    /// Persist `items` stamped with the current time. Empty lists are not
    /// written so a failed load never overwrites a good snapshot.
    pub async fn commit(&self, items: &[KpiRecord]) {
        if items.is_empty() {
            return;
        }
        let entry = CacheEntry {
            data: items.to_vec(),
            timestamp: self.clock.now_ms(),
        };
        let result = match serde_json::to_string(&entry) {
            Ok(json) => self.store.save(json).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            warn!(error = %e, "failed to write kpi cache");
        }
    }
}
