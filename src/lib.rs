//! riskmap -- deployment risk dashboards from sparse analysis records.
//!
//! Two read-only artifacts are built here: a resolution-adjusted risk heat
//! map and per-transaction metric time series annotated with risk. Data
//! comes from a [`provider::DashboardSource`]; [`storage::SqliteStore`] is
//! the bundled one.

pub mod config;
pub mod error;
pub mod heatmap;
pub mod model;
pub mod provider;
pub mod service;
pub mod storage;
pub mod timeseries;

pub use config::RiskmapConfig;
pub use error::DashboardError;
pub use model::{HeatMapUnit, MetricTimeSeries, ObservedTimeSeries, RiskValue};
pub use service::{DashboardService, TimeSeriesRequest};

/// Tag given to samples collected without one.
pub const DEFAULT_TAG: &str = "_DEFAULT_TAG_";
