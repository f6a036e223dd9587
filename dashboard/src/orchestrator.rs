//! Full and partial KPI loads.
//!
//! A full load hydrates from the client cache, waits briefly for global
//! filters, warms the gateway token, fetches every endpoint concurrently and
//! merges the results. Partial refreshes re-fetch a subset and splice their
//! records into whatever is currently published. Only full loads are
//! guarded against overlap; partial refreshes may run alongside anything.

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use contract::Clock;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::cache::ClientCache;
use crate::client::{FetchError, KpiGateway, TokenSource};
use crate::filters::{request_params, FilterStore, GlobalFilters};
use crate::kpi::{self, KpiRecord};
use crate::overrides::OverrideStore;
use crate::progress::{Progress, ProgressReporter};
use crate::shaping;
use crate::signal::{RefreshBus, RefreshScope};

pub const NO_DATA_MESSAGE: &str =
    "Unable to load KPI data. Check that the gateway is running and reachable, then refresh.";

// ------------------------------------------------------------------ //
//  View & outcomes                                                    //
// ------------------------------------------------------------------ //

/// Everything a UI needs to render the dashboard.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DashboardView {
    pub kpis: Vec<KpiRecord>,
    pub loading: bool,
    /// KPI ids currently being re-fetched by a partial refresh.
    pub updating: BTreeSet<String>,
    pub error: Option<String>,
    pub progress: Option<Progress>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    /// Another full load was already running.
    Skipped,
    Completed(LoadReport),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    pub succeeded: Vec<String>,
    /// `(endpoint_id, reason)`
    pub failed: Vec<(String, String)>,
    /// Records published after the merge.
    pub kpis: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct Timing {
    /// Upper bound on waiting for global filters before fetching anyway.
    pub filter_wait: Duration,
    pub filter_poll: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            filter_wait: Duration::from_millis(800),
            filter_poll: Duration::from_millis(80),
        }
    }
}

type Fetched = (String, Result<Value, FetchError>);

// ------------------------------------------------------------------ //
//  Orchestrator                                                       //
// ------------------------------------------------------------------ //

pub struct Orchestrator {
    gateway: Arc<dyn KpiGateway>,
    overrides: Arc<OverrideStore>,
    filters: Arc<FilterStore>,
    cache: ClientCache,
    bus: Arc<RefreshBus>,
    clock: Arc<dyn Clock>,
    view: Arc<watch::Sender<DashboardView>>,
    progress: ProgressReporter,
    full_load: Mutex<()>,
    retried_empty: AtomicBool,
    timing: Timing,
}

impl Orchestrator {
    pub fn new(gateway: Arc<dyn KpiGateway>, cache: ClientCache, clock: Arc<dyn Clock>) -> Self {
        let filters = FilterStore::new(GlobalFilters::for_today(clock.today()));
        let (tx, _) = watch::channel(DashboardView::default());
        let view = Arc::new(tx);
        Self {
            gateway,
            overrides: Arc::new(OverrideStore::new()),
            filters: Arc::new(filters),
            cache,
            bus: Arc::new(RefreshBus::new()),
            clock,
            progress: ProgressReporter::new(view.clone()),
            view,
            full_load: Mutex::new(()),
            retried_empty: AtomicBool::new(false),
            timing: Timing::default(),
        }
    }

    pub fn with_filters(mut self, filters: Arc<FilterStore>) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_overrides(mut self, overrides: Arc<OverrideStore>) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    pub fn overrides(&self) -> &Arc<OverrideStore> {
        &self.overrides
    }

    pub fn filters(&self) -> &Arc<FilterStore> {
        &self.filters
    }

    pub fn bus(&self) -> &Arc<RefreshBus> {
        &self.bus
    }

    pub fn subscribe(&self) -> watch::Receiver<DashboardView> {
        self.view.subscribe()
    }

    pub fn view(&self) -> DashboardView {
        self.view.borrow().clone()
    }

    // -------------------------------------------------------------- //
    //  User actions                                                   //
    // -------------------------------------------------------------- //

    /// Stage one override and ask for that endpoint to be refreshed.
    pub fn edit_filter(&self, endpoint_id: &str, key: &str, value: &str) {
        self.overrides.set(endpoint_id, key, value);
        self.bus.request(RefreshScope::endpoint(endpoint_id), "filter-edit");
    }

    /// Change the global window and refresh every endpoint.
    pub fn set_date_range(&self, start: &str, end: &str) {
        self.filters.set_date_range(start, end);
        self.bus.request(RefreshScope::all_endpoints(), "date-range");
    }

    /// Serve refresh requests until the task is dropped. Requests arriving
    /// mid-refresh are coalesced into the next iteration.
    pub async fn run(self: Arc<Self>) {
        loop {
            let req = self.bus.next().await;
            debug!(reasons = ?req.reasons, "handling refresh request");
            match req.scope {
                RefreshScope::Full => {
                    self.full_load().await;
                }
                RefreshScope::Endpoints(ids) => {
                    self.partial_refresh(&ids).await;
                }
            }
        }
    }

    // -------------------------------------------------------------- //
    //  Full load                                                      //
    // -------------------------------------------------------------- //

    pub async fn full_load(&self) -> LoadOutcome {
        let Ok(_guard) = self.full_load.try_lock() else {
            warn!("full load already in progress, dropping request");
            return LoadOutcome::Skipped;
        };
        let span = info_span!("full_load", load_id = %Uuid::new_v4());
        LoadOutcome::Completed(self.run_full_load().instrument(span).await)
    }

    async fn run_full_load(&self) -> LoadReport {
        // The snapshot only seeds an empty screen. Anything already published
        // is at least as new as the last commit.
        let on_screen = self.view.borrow().kpis.iter().any(|k| !shaping::is_placeholder(k));
        let cached = if on_screen {
            debug!("kpis already on screen, not hydrating from cache");
            None
        } else {
            self.cache.hydrate().await
        };
        match cached {
            Some(entry) => {
                info!(kpis = entry.data.len(), "showing cached kpis");
                self.view.send_modify(|v| {
                    v.kpis = entry.data;
                    v.loading = false;
                    v.error = None;
                });
            }
            None => self.view.send_modify(|v| {
                v.loading = !on_screen;
                v.error = None;
            }),
        }

        self.progress.begin("Preparing dashboard");
        self.progress.step(5, "Loading filters");
        self.wait_for_filters().await;

        self.progress.step(12, "Authenticating");
        let token = self.gateway.ensure_token().await;
        if token.source == TokenSource::Failed {
            warn!("token warm-up failed, continuing with per-endpoint auth");
        }
        self.progress.step(18, "Authenticated");

        self.progress.step(25, "Fetching KPI data");
        let ids: Vec<&'static str> = contract::endpoints::ids().collect();
        let total = ids.len();
        let progress = self.progress.clone();
        let ticker = self.progress.start_ticker();
        let fetched = self
            .fetch_all(&ids, move |done| {
                let pct = 25.0 + 70.0 / total as f64 * done as f64;
                progress.step((pct.floor() as u8).min(95), "Fetching KPI data");
            })
            .await;
        drop(ticker);

        let current = self.view.borrow().kpis.clone();
        let (merged, report) = self.merge(&current, fetched);
        let has_real_data = merged.iter().any(|k| !shaping::is_placeholder(k));

        let mut kpis = merged;
        for placeholder in shaping::placeholders() {
            if !kpis.iter().any(|k| k.id == placeholder.id) {
                kpis.push(placeholder);
            }
        }
        let kpis = kpi::sort_and_filter(kpis);

        let error = (!has_real_data && report.succeeded.is_empty()).then(|| NO_DATA_MESSAGE.to_string());
        self.view.send_modify(|v| {
            v.kpis = kpis.clone();
            v.loading = false;
            v.error = error;
        });
        self.progress.finish();

        if !report.succeeded.is_empty() {
            self.cache.commit(&kpis).await;
        }
        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            kpis = kpis.len(),
            "full load finished"
        );

        if !has_real_data && !self.retried_empty.swap(true, Ordering::SeqCst) {
            warn!("full load produced no kpis, scheduling one retry");
            self.bus.request(RefreshScope::all_endpoints(), "empty-result-retry");
        }

        LoadReport {
            kpis: kpis.len(),
            ..report
        }
    }

    async fn wait_for_filters(&self) {
        let deadline = Instant::now() + self.timing.filter_wait;
        while !self.filters.is_loaded() {
            if Instant::now() >= deadline {
                debug!("global filters not loaded in time, using current values");
                return;
            }
            tokio::time::sleep(self.timing.filter_poll).await;
        }
    }

    // -------------------------------------------------------------- //
    //  Partial refresh                                                //
    // -------------------------------------------------------------- //

    /// Re-fetch `endpoints` and splice their records into the published
    /// set. Ids owned by an endpoint that fails keep their old records.
    pub async fn partial_refresh(&self, endpoints: &BTreeSet<String>) -> LoadReport {
        let ids: Vec<&'static str> = contract::endpoints::ids()
            .filter(|id| endpoints.contains(*id))
            .collect();
        if ids.is_empty() {
            warn!(?endpoints, "partial refresh named no known endpoints");
            return LoadReport::default();
        }

        let marked: BTreeSet<String> = ids
            .iter()
            .flat_map(|id| kpi::kpis_for(id))
            .map(|s| s.to_string())
            .collect();
        self.view.send_modify(|v| v.updating.extend(marked.iter().cloned()));

        let span = info_span!("partial_refresh", refresh_id = %Uuid::new_v4(), endpoints = ids.len());
        let report = async {
            let fetched = self.fetch_all(&ids, |_| {}).await;
            // Splice against what is published now, not what was there
            // when the fetch started.
            let current = self.view.borrow().kpis.clone();
            let (merged, report) = self.merge(&current, fetched);
            let count = merged.len();
            self.view.send_modify(|v| {
                v.kpis = merged;
                v.updating.retain(|id| !marked.contains(id));
                if count > 0 {
                    v.error = None;
                }
            });
            info!(succeeded = report.succeeded.len(), failed = report.failed.len(), "partial refresh finished");
            LoadReport { kpis: count, ..report }
        }
        .instrument(span)
        .await;
        report
    }

    // -------------------------------------------------------------- //
    //  Shared steps                                                   //
    // -------------------------------------------------------------- //

    /// Fetch every endpoint in `ids` concurrently. Parameters are built
    /// right before each request so the latest overrides apply. Results come
    /// back in registry order.
    async fn fetch_all(&self, ids: &[&'static str], on_done: impl Fn(usize)) -> Vec<Fetched> {
        let filters = self.filters.snapshot();
        let today = self.clock.today();
        let mut set = JoinSet::new();
        for id in ids {
            let params = request_params(id, &filters, &self.overrides, today);
            let gateway = self.gateway.clone();
            let id = id.to_string();
            set.spawn(async move {
                let result = gateway.fetch(&id, &params).await;
                (id, result)
            });
        }

        let mut out = Vec::with_capacity(ids.len());
        let mut done = 0;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(fetched) => out.push(fetched),
                Err(e) => warn!(error = %e, "kpi fetch task failed"),
            }
            done += 1;
            on_done(done);
        }
        out.sort_by_key(|(id, _)| {
            ids.iter()
                .position(|i| *i == id.as_str())
                .unwrap_or(usize::MAX)
        });
        out
    }

    /// Shape the successful results and splice them over `current`.
    fn merge(&self, current: &[KpiRecord], fetched: Vec<Fetched>) -> (Vec<KpiRecord>, LoadReport) {
        let mut report = LoadReport::default();
        let mut replaced = HashSet::new();
        let mut fresh = Vec::new();
        for (endpoint_id, result) in fetched {
            match result {
                Ok(data) => {
                    let staged = self.overrides.get(&endpoint_id);
                    fresh.extend(shaping::shape(&endpoint_id, &data, &staged));
                    replaced.extend(kpi::kpis_for(&endpoint_id).iter().map(|s| s.to_string()));
                    report.succeeded.push(endpoint_id);
                }
                Err(e) => {
                    warn!(endpoint_id = %endpoint_id, error = %e, "kpi fetch failed, keeping previous records");
                    report.failed.push((endpoint_id, e.to_string()));
                }
            }
        }
        let merged = kpi::splice(current, &replaced, fresh);
        (merged, report)
    }
}
