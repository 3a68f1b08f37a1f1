//! Capabilities the dashboard builders consume from the rest of the system.
//!
//! All of them are read-only views over data produced elsewhere: the ML
//! analysis job writes records and risk summaries, the collection pipeline
//! writes raw samples.

pub mod memory;

use anyhow::Result;

use crate::model::{AnalysisRecord, MetricSample, RiskSummary};

pub use memory::InMemorySource;

/// Read access to persisted analysis records.
#[async_trait::async_trait]
pub trait AnalysisSource: Send + Sync {
    /// Records with `analysis_minute` in `[start_minute, end_minute]`,
    /// ascending by minute.
    async fn fetch_analysis_records(
        &self,
        config_id: &str,
        start_minute: i64,
        end_minute: i64,
    ) -> Result<Vec<AnalysisRecord>>;

    /// Whether `config_id` names a known verification configuration.
    async fn config_exists(&self, _config_id: &str) -> Result<bool> {
        Ok(true)
    }
}

/// Read access to raw per-minute samples.
#[async_trait::async_trait]
pub trait SampleSource: Send + Sync {
    /// Samples collected in `[window_start_minute, window_end_minute]`,
    /// restricted to `tag` when one is given.
    async fn fetch_metric_samples(
        &self,
        config_id: &str,
        window_start_minute: i64,
        window_end_minute: i64,
        tag: Option<&str>,
    ) -> Result<Vec<MetricSample>>;
}

/// Read access to precomputed per-metric risk summaries.
#[async_trait::async_trait]
pub trait RiskSummarySource: Send + Sync {
    /// Summaries with `analysis_minute` in `[start_minute, end_minute]`,
    /// ascending by minute. `None` selects summaries stored without a tag.
    async fn fetch_risk_summaries(
        &self,
        config_id: &str,
        start_minute: i64,
        end_minute: i64,
        tag: Option<&str>,
    ) -> Result<Vec<RiskSummary>>;
}

/// Provider-specific metric classification, answered from in-memory config.
pub trait MetricTypeResolver: Send + Sync {
    fn classify_metric_type(&self, config_id: &str, metric_name: &str) -> String;
}

/// Metric type reported when a provider has no classification.
pub const UNCLASSIFIED_METRIC_TYPE: &str = "OTHER";

/// Everything [`crate::service::DashboardService`] needs from its store.
pub trait DashboardSource: AnalysisSource + SampleSource + RiskSummarySource + MetricTypeResolver {}

impl<T> DashboardSource for T where T: AnalysisSource + SampleSource + RiskSummarySource + MetricTypeResolver {}
