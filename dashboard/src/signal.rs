//! Refresh requests raised by filter edits, date changes and timers.
//!
//! Requests that arrive while the orchestrator is busy are coalesced: the
//! next [`RefreshBus::next`] returns their union.

use std::collections::BTreeSet;
use std::sync::Mutex;

use tokio::sync::Notify;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshScope {
    Full,
    Endpoints(BTreeSet<String>),
}

impl RefreshScope {
    pub fn endpoint(id: &str) -> Self {
        Self::Endpoints(BTreeSet::from([id.to_string()]))
    }

    pub fn all_endpoints() -> Self {
        Self::Endpoints(contract::endpoints::ids().map(str::to_string).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshRequest {
    pub scope: RefreshScope,
    pub reasons: Vec<String>,
}

#[derive(Debug, Default)]
struct Pending {
    full: bool,
    endpoints: BTreeSet<String>,
    reasons: Vec<String>,
}

impl Pending {
    fn is_empty(&self) -> bool {
        !self.full && self.endpoints.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct RefreshBus {
    pending: Mutex<Pending>,
    notify: Notify,
}

impl RefreshBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self, scope: RefreshScope, reason: &str) {
        {
            let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
            match scope {
                RefreshScope::Full => pending.full = true,
                RefreshScope::Endpoints(ids) => pending.endpoints.extend(ids),
            }
            pending.reasons.push(reason.to_string());
        }
        debug!(reason, "refresh requested");
        self.notify.notify_one();
    }

    /// Take everything requested so far without waiting.
    pub fn try_next(&self) -> Option<RefreshRequest> {
        let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
        if pending.is_empty() {
            return None;
        }
        let taken = std::mem::take(&mut *pending);
        let scope = if taken.full {
            RefreshScope::Full
        } else {
            RefreshScope::Endpoints(taken.endpoints)
        };
        Some(RefreshRequest {
            scope,
            reasons: taken.reasons,
        })
    }

    /// Wait for at least one request, then take all of them.
    pub async fn next(&self) -> RefreshRequest {
        loop {
            if let Some(req) = self.try_next() {
                return req;
            }
            self.notify.notified().await;
        }
    }
}
