//! In-process source backed by plain vectors. Used by tests and as a
//! scratch store when wiring the builders into something new.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use anyhow::{anyhow, Result};

use super::{AnalysisSource, MetricTypeResolver, RiskSummarySource, SampleSource, UNCLASSIFIED_METRIC_TYPE};
use crate::model::{AnalysisRecord, MetricSample, RiskSummary};

#[derive(Default)]
struct Contents {
    configs: BTreeSet<String>,
    records: Vec<AnalysisRecord>,
    samples: HashMap<String, Vec<MetricSample>>,
    summaries: Vec<RiskSummary>,
    metric_types: HashMap<(String, String), String>,
    failing_windows: HashSet<i64>,
    window_delays: HashMap<i64, Duration>,
}

#[derive(Default)]
pub struct InMemorySource {
    contents: RwLock<Contents>,
    sample_fetches: AtomicUsize,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a configuration. Configurations are also registered
    /// implicitly by any data added for them.
    pub fn add_config(&self, config_id: &str) {
        self.write().configs.insert(config_id.to_string());
    }

    pub fn add_record(&self, record: AnalysisRecord) {
        let mut contents = self.write();
        contents.configs.insert(record.config_id.clone());
        contents.records.push(record);
    }

    pub fn add_sample(&self, config_id: &str, sample: MetricSample) {
        let mut contents = self.write();
        contents.configs.insert(config_id.to_string());
        contents.samples.entry(config_id.to_string()).or_default().push(sample);
    }

    pub fn add_summary(&self, summary: RiskSummary) {
        let mut contents = self.write();
        contents.configs.insert(summary.config_id.clone());
        contents.summaries.push(summary);
    }

    pub fn set_metric_type(&self, config_id: &str, metric_name: &str, metric_type: &str) {
        self.write()
            .metric_types
            .insert((config_id.to_string(), metric_name.to_string()), metric_type.to_string());
    }

    /// Make every sample fetch for the window starting at `start_minute` fail.
    pub fn fail_window(&self, start_minute: i64) {
        self.write().failing_windows.insert(start_minute);
    }

    /// Hold the window starting at `start_minute` for `delay` before answering.
    pub fn delay_window(&self, start_minute: i64, delay: Duration) {
        self.write().window_delays.insert(start_minute, delay);
    }

    /// Number of sample fetches served so far.
    pub fn sample_fetch_count(&self) -> usize {
        self.sample_fetches.load(Ordering::SeqCst)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Contents> {
        self.contents.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Contents> {
        self.contents.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait::async_trait]
impl AnalysisSource for InMemorySource {
    async fn fetch_analysis_records(
        &self,
        config_id: &str,
        start_minute: i64,
        end_minute: i64,
    ) -> Result<Vec<AnalysisRecord>> {
        let mut records: Vec<AnalysisRecord> = self
            .read()
            .records
            .iter()
            .filter(|r| r.config_id == config_id)
            .filter(|r| r.analysis_minute >= start_minute && r.analysis_minute <= end_minute)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.analysis_minute);
        Ok(records)
    }

    async fn config_exists(&self, config_id: &str) -> Result<bool> {
        Ok(self.read().configs.contains(config_id))
    }
}

#[async_trait::async_trait]
impl SampleSource for InMemorySource {
    async fn fetch_metric_samples(
        &self,
        config_id: &str,
        window_start_minute: i64,
        window_end_minute: i64,
        tag: Option<&str>,
    ) -> Result<Vec<MetricSample>> {
        self.sample_fetches.fetch_add(1, Ordering::SeqCst);

        let (delay, fails) = {
            let contents = self.read();
            (
                contents.window_delays.get(&window_start_minute).copied(),
                contents.failing_windows.contains(&window_start_minute),
            )
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fails {
            return Err(anyhow!(
                "sample store unavailable for window starting at minute {}",
                window_start_minute
            ));
        }

        let samples = self
            .read()
            .samples
            .get(config_id)
            .map(|samples| {
                samples
                    .iter()
                    .filter(|s| s.collection_minute >= window_start_minute && s.collection_minute <= window_end_minute)
                    .filter(|s| tag.map_or(true, |t| s.tag == t))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(samples)
    }
}

#[async_trait::async_trait]
impl RiskSummarySource for InMemorySource {
    async fn fetch_risk_summaries(
        &self,
        config_id: &str,
        start_minute: i64,
        end_minute: i64,
        tag: Option<&str>,
    ) -> Result<Vec<RiskSummary>> {
        let mut summaries: Vec<RiskSummary> = self
            .read()
            .summaries
            .iter()
            .filter(|s| s.config_id == config_id)
            .filter(|s| s.analysis_minute >= start_minute && s.analysis_minute <= end_minute)
            .filter(|s| s.tag.as_deref() == tag)
            .cloned()
            .collect();
        summaries.sort_by_key(|s| s.analysis_minute);
        Ok(summaries)
    }
}

impl MetricTypeResolver for InMemorySource {
    fn classify_metric_type(&self, config_id: &str, metric_name: &str) -> String {
        self.read()
            .metric_types
            .get(&(config_id.to_string(), metric_name.to_string()))
            .cloned()
            .unwrap_or_else(|| UNCLASSIFIED_METRIC_TYPE.to_string())
    }
}
