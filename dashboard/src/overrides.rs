//! Staged per-endpoint parameter overrides.
//!
//! Values become visible to the very next fetch for that endpoint. An empty
//! string is stored like any other value; treating it as "remove" is up to
//! the caller.

use std::collections::BTreeMap;
use std::sync::RwLock;

use tokio::sync::watch;

pub type ParamMap = BTreeMap<String, String>;

#[derive(Debug)]
pub struct OverrideStore {
    entries: RwLock<BTreeMap<String, ParamMap>>,
    version: watch::Sender<u64>,
}

impl Default for OverrideStore {
    fn default() -> Self {
        Self::new()
    }
}

impl OverrideStore {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            entries: RwLock::new(BTreeMap::new()),
            version,
        }
    }

    pub fn set(&self, endpoint_id: &str, key: &str, value: impl Into<String>) {
        self.entries
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .entry(endpoint_id.to_string())
            .or_default()
            .insert(key.to_string(), value.into());
        self.bump();
    }

    /// Current overrides for one endpoint (empty when none are staged).
    pub fn get(&self, endpoint_id: &str) -> ParamMap {
        self.entries
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(endpoint_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Drop one endpoint's overrides, or all of them.
    pub fn clear(&self, endpoint_id: Option<&str>) {
        {
            let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
            match endpoint_id {
                Some(id) => {
                    entries.remove(id);
                }
                None => entries.clear(),
            }
        }
        self.bump();
    }

    pub fn snapshot(&self) -> BTreeMap<String, ParamMap> {
        self.entries.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Change notifications; the value is a monotonically increasing version.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    fn bump(&self) {
        self.version.send_modify(|v| *v += 1);
    }
}
