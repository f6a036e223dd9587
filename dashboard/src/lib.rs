//! Client data orchestrator for the KPI dashboard.
//!
//! Talks to the gateway, keeps a short-lived snapshot for instant first
//! paint, stages per-endpoint filter overrides and coordinates full and
//! partial reloads of the ten report endpoints. UI consumers observe a
//! [`orchestrator::DashboardView`] through a `watch` channel.

pub mod cache;
pub mod client;
pub mod config;
pub mod filters;
pub mod kpi;
pub mod orchestrator;
pub mod overrides;
pub mod progress;
pub mod shaping;
pub mod signal;

pub use orchestrator::{DashboardView, LoadOutcome, LoadReport, Orchestrator};
