//! Headless dashboard runner.
//!
//! Performs one full load against the gateway, logs the resulting KPI set,
//! then keeps serving refresh requests until Ctrl-C. See
//! [`dashboard::config`] for the environment it reads.

use std::sync::Arc;

use anyhow::Result;
use contract::{Clock, SystemClock};
use dashboard::{
    cache::{ClientCache, FileSnapshotStore},
    client::HttpGatewayClient,
    config::DashboardConfig,
    filters::{FilterStore, GlobalFilters},
    signal::RefreshScope,
    LoadOutcome, Orchestrator,
};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("dashboard=info".parse()?),
        )
        .json()
        .init();

    let cfg = DashboardConfig::from_env();
    info!(config = ?cfg, "dashboard configuration resolved");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let mut filters = GlobalFilters::for_today(clock.today());
    if let Some(start) = &cfg.start_date {
        filters.start_date = start.clone();
    }
    if let Some(end) = &cfg.end_date {
        filters.end_date = end.clone();
    }

    let http = reqwest::Client::builder().build()?;
    let gateway = Arc::new(HttpGatewayClient::new(http, cfg.gateway_url.clone(), clock.clone()));
    let cache = ClientCache::new(Arc::new(FileSnapshotStore::new(cfg.cache_path.clone())), clock.clone());
    let orch = Arc::new(
        Orchestrator::new(gateway, cache, clock).with_filters(Arc::new(FilterStore::loaded(filters))),
    );

    if let LoadOutcome::Completed(report) = orch.full_load().await {
        info!(
            succeeded = ?report.succeeded,
            failed = report.failed.len(),
            kpis = report.kpis,
            "initial load complete"
        );
    }
    let view = orch.view();
    if let Some(error) = &view.error {
        warn!(%error, "dashboard has no data");
    }
    for kpi in &view.kpis {
        info!(id = %kpi.id, title = %kpi.title, value = %kpi.value, "kpi");
    }

    if let Some(every) = cfg.refresh_every {
        let bus = orch.bus().clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                bus.request(RefreshScope::all_endpoints(), "periodic");
            }
        });
    }

    let mut updates = orch.subscribe();
    tokio::spawn(async move {
        let mut shown = updates.borrow_and_update().kpis.clone();
        while updates.changed().await.is_ok() {
            let kpis = updates.borrow_and_update().kpis.clone();
            if kpis != shown {
                info!(kpis = kpis.len(), "dashboard kpis updated");
                shown = kpis;
            }
        }
    });

    tokio::select! {
        _ = orch.clone().run() => {}
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }

    Ok(())
}
