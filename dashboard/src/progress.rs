//! Loading progress published alongside the KPI view.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::orchestrator::DashboardView;

pub const TICK_EVERY: Duration = Duration::from_millis(120);
pub const TICK_STEP: u8 = 2;
pub const TICK_CAP: u8 = 90;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub label: String,
    pub percent: u8,
}

/// Writes progress into the shared view. Percent never moves backwards
/// within one load and never exceeds 100.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    view: Arc<watch::Sender<DashboardView>>,
}

impl ProgressReporter {
    pub fn new(view: Arc<watch::Sender<DashboardView>>) -> Self {
        Self { view }
    }

    pub fn begin(&self, label: &str) {
        self.view.send_modify(|v| {
            v.progress = Some(Progress {
                label: label.to_string(),
                percent: 0,
            });
        });
    }

    pub fn step(&self, percent: u8, label: &str) {
        let percent = percent.min(100);
        self.view.send_if_modified(|v| match v.progress.as_mut() {
            Some(p) if percent >= p.percent => {
                p.percent = percent;
                p.label = label.to_string();
                true
            }
            _ => false,
        });
    }

    /// Creep forward by `by`, stopping at `cap`.
    pub fn tick(&self, by: u8, cap: u8) {
        self.view.send_if_modified(|v| match v.progress.as_mut() {
            Some(p) if p.percent < cap => {
                p.percent = p.percent.saturating_add(by).min(cap);
                true
            }
            _ => false,
        });
    }

    pub fn finish(&self) {
        self.step(100, "Done");
    }

    pub fn percent(&self) -> Option<u8> {
        self.view.borrow().progress.as_ref().map(|p| p.percent)
    }

    /// Background creep while requests are in flight; stops when dropped.
    pub fn start_ticker(&self) -> Ticker {
        let reporter = self.clone();
        let handle = tokio::spawn(async move {
            let mut every = tokio::time::interval(TICK_EVERY);
            every.tick().await;
            loop {
                every.tick().await;
                reporter.tick(TICK_STEP, TICK_CAP);
            }
        });
        Ticker { handle }
    }
}

pub struct Ticker {
    handle: JoinHandle<()>,
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reporter() -> ProgressReporter {
        let (tx, _) = watch::channel(DashboardView::default());
        ProgressReporter::new(Arc::new(tx))
    }

    #[test]
    fn steps_are_monotonic_and_capped() {
        let r = reporter();
        r.begin("Loading");
        r.step(25, "Fetching");
        r.step(12, "Late");
        assert_eq!(r.percent(), Some(25));
        r.step(250, "Over");
        assert_eq!(r.percent(), Some(100));
    }

    #[test]
    fn tick_stops_at_cap() {
        let r = reporter();
        r.begin("Loading");
        r.step(89, "Fetching");
        r.tick(2, 90);
        r.tick(2, 90);
        assert_eq!(r.percent(), Some(90));
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_creeps_until_dropped() {
        let r = reporter();
        r.begin("Loading");
        r.step(25, "Fetching");
        let ticker = r.start_ticker();
        tokio::time::sleep(TICK_EVERY * 5 + Duration::from_millis(10)).await;
        assert_eq!(r.percent(), Some(35));
        drop(ticker);
        tokio::time::sleep(TICK_EVERY * 5).await;
        assert_eq!(r.percent(), Some(35));
    }
}
