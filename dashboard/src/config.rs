//! Runner configuration.
//!
//! | Env var                  | Default                      |
//! |--------------------------|------------------------------|
//! | `GATEWAY_URL`            | `http://127.0.0.1:8080`      |
//! | `DASHBOARD_CACHE_PATH`   | `./kpi-dashboard-cache.json` |
//! | `DASHBOARD_REFRESH_SECS` | `0` (no periodic refresh)    |
//! | `DASHBOARD_START_DATE`   | first of the current month   |
//! | `DASHBOARD_END_DATE`     | today                        |

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_GATEWAY_URL: &str = "http://127.0.0.1:8080";
pub const DEFAULT_CACHE_PATH: &str = "./kpi-dashboard-cache.json";

#[derive(Debug, Clone)]
pub struct DashboardConfig {
    pub gateway_url: String,
    pub cache_path: PathBuf,
    pub refresh_every: Option<Duration>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

impl DashboardConfig {
    pub fn from_vars<F>(get: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_blank = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        Self {
            gateway_url: non_blank("GATEWAY_URL").unwrap_or_else(|| DEFAULT_GATEWAY_URL.to_string()),
            cache_path: non_blank("DASHBOARD_CACHE_PATH")
                .unwrap_or_else(|| DEFAULT_CACHE_PATH.to_string())
                .into(),
            refresh_every: non_blank("DASHBOARD_REFRESH_SECS")
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            start_date: non_blank("DASHBOARD_START_DATE"),
            end_date: non_blank("DASHBOARD_END_DATE"),
        }
    }

    pub fn from_env() -> Self {
        Self::from_vars(|k| std::env::var(k).ok())
    }
}
