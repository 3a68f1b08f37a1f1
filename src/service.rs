//! Request-level entry points: fetch from the store, then hand off to the
//! pure heat map and time series builders.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{debug, info};

use crate::config::RiskmapConfig;
use crate::error::{check_range, DashboardError, FetchKind};
use crate::heatmap::{compute_heat_map, validate_request};
use crate::model::{minute_of, HeatMapUnit, ObservedTimeSeries, RiskSummary};
use crate::provider::DashboardSource;
use crate::timeseries::{
    apply_risk_summaries, clamp_history, collect, normalize_range, paginate, rank_transactions, select_riskiest_tag,
    CollectRequest, CollectorSettings, TimeSeriesPage,
};

/// Parameters of one annotated time series request. Timestamps are epoch
/// millis.
#[derive(Debug, Clone, Default)]
pub struct TimeSeriesRequest {
    pub config_id: String,
    pub start: i64,
    pub end: i64,
    /// Earliest sample to show; defaults to `start`.
    pub history_start: Option<i64>,
    /// Risks at or before this instant are history only; defaults to the
    /// normalized `start`.
    pub risk_cutoff: Option<i64>,
    /// Collect a single tag instead of all of them.
    pub tag: Option<String>,
    pub transactions: BTreeSet<String>,
    pub metrics: BTreeSet<String>,
}

impl TimeSeriesRequest {
    pub fn new(config_id: impl Into<String>, start: i64, end: i64) -> Self {
        Self {
            config_id: config_id.into(),
            start,
            end,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub poll_interval_minutes: i64,
    pub collector: CollectorSettings,
    pub max_history_days: i64,
    pub history_fallback_minutes: i64,
}

impl From<&RiskmapConfig> for ServiceSettings {
    fn from(config: &RiskmapConfig) -> Self {
        Self {
            poll_interval_minutes: config.analysis.poll_interval_minutes,
            collector: config.collector_settings(),
            max_history_days: config.collector.max_history_days,
            history_fallback_minutes: config.collector.history_fallback_minutes,
        }
    }
}

/// Builds dashboard artifacts from a [`DashboardSource`].
pub struct DashboardService<S: DashboardSource + ?Sized + 'static> {
    source: Arc<S>,
    settings: ServiceSettings,
}

impl<S: DashboardSource + ?Sized + 'static> DashboardService<S> {
    pub fn new(source: Arc<S>, config: &RiskmapConfig) -> Self {
        Self::with_settings(source, ServiceSettings::from(config))
    }

    pub fn with_settings(source: Arc<S>, settings: ServiceSettings) -> Self {
        Self { source, settings }
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    async fn config_exists(&self, config_id: &str) -> Result<bool, DashboardError> {
        self.source
            .config_exists(config_id)
            .await
            .map_err(|e| DashboardError::fetch(FetchKind::ConfigLookup, config_id.to_string(), e))
    }

    /// Risk heat map of `config_id` over `[start, end]`.
    ///
    /// Unknown configurations and empty stores yield sentinel units.
    pub async fn build_heat_map(&self, config_id: &str, start: i64, end: i64) -> Result<Vec<HeatMapUnit>, DashboardError> {
        let interval = self.settings.poll_interval_minutes;
        validate_request(start, end, interval)?;

        let records = if self.config_exists(config_id).await? {
            let start_minute = minute_of(start) + interval;
            let end_minute = minute_of(end);
            self.source
                .fetch_analysis_records(config_id, start_minute, end_minute)
                .await
                .map_err(|e| {
                    DashboardError::fetch(
                        FetchKind::AnalysisRecords,
                        format!("minutes [{}, {}]", start_minute, end_minute),
                        e,
                    )
                })?
        } else {
            debug!(config_id, "unknown configuration, heat map will be empty");
            Vec::new()
        };

        info!(config_id, start, end, records = records.len(), "building heat map");
        compute_heat_map(records, start, end, interval)
    }

    /// Per-tag, per-transaction, per-metric series over the history range,
    /// annotated with risk. At most one tag survives.
    pub async fn build_annotated_time_series(
        &self,
        request: &TimeSeriesRequest,
    ) -> Result<ObservedTimeSeries, DashboardError> {
        let range = normalize_range(request.start, request.end, request.history_start);
        check_range(range.start, range.end)?;
        check_range(range.history_start, range.end)?;
        let range = clamp_history(
            range,
            self.settings.max_history_days,
            self.settings.history_fallback_minutes,
        );

        if !self.config_exists(&request.config_id).await? {
            debug!(config_id = %request.config_id, "unknown configuration, time series will be empty");
            return Ok(ObservedTimeSeries::new());
        }

        let collect_request = CollectRequest {
            config_id: request.config_id.clone(),
            start: range.history_start,
            end: range.end,
            selector_tag: request.tag.clone(),
            transactions: request.transactions.clone(),
            metrics: request.metrics.clone(),
        };
        let mut observed = collect(Arc::clone(&self.source), &collect_request, &self.settings.collector).await?;

        let risk_cutoff = request.risk_cutoff.unwrap_or(range.start);
        // Summaries strictly after the history start minute.
        let start_minute = minute_of(range.history_start) + 1;
        let end_minute = minute_of(range.end);
        let fetches = observed.keys().map(|tag| {
            let tag_filter = (*tag != self.settings.collector.default_tag).then_some(tag.as_str());
            self.fetch_summaries(&request.config_id, start_minute, end_minute, tag_filter, tag)
        });
        let summaries: Vec<(String, Vec<RiskSummary>)> = try_join_all(fetches).await?;

        for (tag, tag_summaries) in summaries {
            if let Some(series) = observed.get_mut(&tag) {
                apply_risk_summaries(series, &tag_summaries, risk_cutoff);
            }
        }

        let selected = select_riskiest_tag(observed);
        info!(
            config_id = %request.config_id,
            history_start = range.history_start,
            end = range.end,
            risk_cutoff,
            tags = selected.len(),
            "built annotated time series"
        );
        Ok(selected)
    }

    async fn fetch_summaries(
        &self,
        config_id: &str,
        start_minute: i64,
        end_minute: i64,
        tag_filter: Option<&str>,
        tag: &str,
    ) -> Result<(String, Vec<RiskSummary>), DashboardError> {
        let summaries = self
            .source
            .fetch_risk_summaries(config_id, start_minute, end_minute, tag_filter)
            .await
            .map_err(|e| DashboardError::fetch(FetchKind::RiskSummaries, format!("tag {}", tag), e))?;
        Ok((tag.to_string(), summaries))
    }

    /// Annotated time series flattened into ranked rows, one page of them.
    pub async fn time_series_page(
        &self,
        request: &TimeSeriesRequest,
        offset: usize,
        page_size: usize,
    ) -> Result<TimeSeriesPage, DashboardError> {
        let observed = self.build_annotated_time_series(request).await?;
        Ok(paginate(rank_transactions(&observed), offset, page_size))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::model::{minute_to_millis, AnalysisRecord, MetricRisk, MetricSample, RiskValue};
    use crate::provider::InMemorySource;

    fn service(source: Arc<InMemorySource>) -> DashboardService<InMemorySource> {
        let mut config = RiskmapConfig::default();
        config.analysis.poll_interval_minutes = 5;
        DashboardService::new(source, &config)
    }

    fn sample(tag: &str, minute: i64) -> MetricSample {
        MetricSample {
            tag: tag.to_string(),
            transaction: "/login".to_string(),
            metric: "latency".to_string(),
            collection_minute: minute,
            value: 1.0,
            deeplink_url: None,
        }
    }

    fn summary(tag: Option<&str>, minute: i64, level: u32) -> RiskSummary {
        RiskSummary {
            config_id: "cfg".to_string(),
            tag: tag.map(str::to_string),
            analysis_minute: minute,
            metrics: BTreeMap::from([(
                "/login".to_string(),
                BTreeMap::from([(
                    "latency".to_string(),
                    MetricRisk {
                        risk: RiskValue::Level(level),
                        long_term_pattern: None,
                        last_seen_time: None,
                    },
                )]),
            )]),
        }
    }

    #[tokio::test]
    async fn test_unknown_config_heat_map_is_all_sentinels() {
        let svc = service(Arc::new(InMemorySource::new()));
        let units = svc.build_heat_map("missing", 0, minute_to_millis(30)).await.unwrap();
        assert_eq!(units.len(), 6);
        assert!(units.iter().all(|u| !u.has_data));
    }

    #[tokio::test]
    async fn test_heat_map_rejects_bad_range_before_fetching() {
        let svc = service(Arc::new(InMemorySource::new()));
        let err = svc.build_heat_map("cfg", minute_to_millis(30), 0).await.unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[tokio::test]
    async fn test_heat_map_ignores_record_at_start_minute() {
        let source = Arc::new(InMemorySource::new());
        source.add_record(AnalysisRecord {
            config_id: "cfg".to_string(),
            tag: None,
            analysis_minute: 0,
            overall_risk: RiskValue::Level(3),
            transaction_risk: Default::default(),
        });
        let units = service(source).build_heat_map("cfg", 0, minute_to_millis(30)).await.unwrap();
        assert!(units.iter().all(|u| u.overall_score == RiskValue::NoDataYet));
    }

    #[tokio::test]
    async fn test_unknown_config_time_series_is_empty() {
        let source = Arc::new(InMemorySource::new());
        let svc = service(Arc::clone(&source));
        let observed = svc
            .build_annotated_time_series(&TimeSeriesRequest::new("missing", 0, minute_to_millis(30)))
            .await
            .unwrap();
        assert!(observed.is_empty());
        assert_eq!(source.sample_fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_default_tag_uses_untagged_summaries() {
        let source = Arc::new(InMemorySource::new());
        source.add_sample("cfg", sample("", 12));
        source.add_summary(summary(None, 15, 1));
        source.add_summary(summary(Some("canary"), 15, 3));

        let svc = service(source);
        let request = TimeSeriesRequest::new("cfg", minute_to_millis(10), minute_to_millis(30));
        let observed = svc.build_annotated_time_series(&request).await.unwrap();

        let latency = &observed[crate::DEFAULT_TAG]["/login"]["latency"];
        assert_eq!(latency.risk, RiskValue::Level(1));
    }

    #[tokio::test]
    async fn test_cutoff_defaults_to_start() {
        let source = Arc::new(InMemorySource::new());
        source.add_sample("cfg", sample("", 5));
        source.add_summary(summary(None, 8, 3));
        source.add_summary(summary(None, 10, 3));
        source.add_summary(summary(None, 12, 1));

        let svc = service(source);
        let mut request = TimeSeriesRequest::new("cfg", minute_to_millis(10), minute_to_millis(20));
        request.history_start = Some(0);
        let observed = svc.build_annotated_time_series(&request).await.unwrap();

        let latency = &observed[crate::DEFAULT_TAG]["/login"]["latency"];
        assert_eq!(latency.risk, RiskValue::Level(1));
        assert_eq!(latency.risk_history.len(), 3);
        assert_eq!(latency.points.len(), 21);
    }

    #[tokio::test]
    async fn test_summary_at_history_start_minute_is_excluded() {
        let source = Arc::new(InMemorySource::new());
        source.add_sample("cfg", sample("", 12));
        source.add_summary(summary(None, 10, 3));
        source.add_summary(summary(None, 11, 1));

        let svc = service(source);
        let mut request = TimeSeriesRequest::new("cfg", minute_to_millis(10), minute_to_millis(20));
        request.risk_cutoff = Some(0);
        let observed = svc.build_annotated_time_series(&request).await.unwrap();

        let latency = &observed[crate::DEFAULT_TAG]["/login"]["latency"];
        assert_eq!(latency.risk, RiskValue::Level(1));
        assert_eq!(latency.risk_history.len(), 1);
        assert!(latency.risk_history.contains_key(&minute_to_millis(11)));
    }

    #[tokio::test]
    async fn test_page_lists_all_transactions() {
        let source = Arc::new(InMemorySource::new());
        for (i, name) in ["/a", "/b", "/c"].iter().enumerate() {
            let mut s = sample("", 5 + i as i64);
            s.transaction = name.to_string();
            source.add_sample("cfg", s);
        }
        let svc = service(source);
        let page = svc
            .time_series_page(&TimeSeriesRequest::new("cfg", 0, minute_to_millis(10)), 0, 2)
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.rows.len(), 2);
        assert_eq!(page.transactions_in_analysis.len(), 3);
    }
}
