//! Fan-out sample collection over fixed-size time windows.
//!
//! Every window is fetched by its own task; tasks hand their filtered batch
//! back through the join handle and a single reducer folds the batches in
//! window order once all of them are in. No state is shared between tasks
//! apart from the concurrency permit.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::error::{DashboardError, FetchKind};
use crate::model::{minute_of, MetricSample, MetricTimeSeries, ObservedTimeSeries};
use crate::provider::{MetricTypeResolver, SampleSource};

#[derive(Debug, Clone)]
pub struct CollectorSettings {
    /// Width of one fetch window.
    pub window_minutes: i64,
    /// Upper bound on window fetches in flight at once.
    pub max_concurrent_fetches: usize,
    /// Transaction name of the collector's liveness signal; never displayed.
    pub heartbeat_name: String,
    /// Tag assigned to samples collected without one.
    pub default_tag: String,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            window_minutes: 60,
            max_concurrent_fetches: 8,
            heartbeat_name: "Heartbeat".to_string(),
            default_tag: crate::DEFAULT_TAG.to_string(),
        }
    }
}

/// What to collect. `start`/`end` are epoch millis, both inclusive.
#[derive(Debug, Clone, Default)]
pub struct CollectRequest {
    pub config_id: String,
    pub start: i64,
    pub end: i64,
    /// Restrict every fetch to this tag.
    pub selector_tag: Option<String>,
    /// Keep only these transactions (empty keeps all).
    pub transactions: BTreeSet<String>,
    /// Keep only these metrics (empty keeps all).
    pub metrics: BTreeSet<String>,
}

/// Inclusive minute range fetched by one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub index: usize,
    pub start_minute: i64,
    pub end_minute: i64,
}

/// Split `[start_minute, end_minute]` into consecutive windows of at most
/// `window_minutes` minutes.
pub fn partition_windows(start_minute: i64, end_minute: i64, window_minutes: i64) -> Vec<TimeWindow> {
    let width = window_minutes.max(1);
    let mut windows = Vec::new();
    let mut from = start_minute;
    while from <= end_minute {
        let to = (from + width - 1).min(end_minute);
        windows.push(TimeWindow {
            index: windows.len(),
            start_minute: from,
            end_minute: to,
        });
        from = to + 1;
    }
    windows
}

/// Client-side filters applied to every fetched batch.
#[derive(Debug, Clone)]
struct SampleFilter {
    heartbeat_name: String,
    transactions: BTreeSet<String>,
    metrics: BTreeSet<String>,
}

impl SampleFilter {
    fn keeps(&self, sample: &MetricSample) -> bool {
        sample.transaction != self.heartbeat_name
            && (self.transactions.is_empty() || self.transactions.contains(&sample.transaction))
            && (self.metrics.is_empty() || self.metrics.contains(&sample.metric))
    }

    fn apply(&self, mut batch: Vec<MetricSample>) -> Vec<MetricSample> {
        batch.retain(|sample| self.keeps(sample));
        batch
    }
}

/// Fetch every window concurrently and return the filtered batches in
/// window order. The first failing window fails the whole collection and
/// aborts the windows still in flight.
pub async fn fetch_windows<S>(
    source: Arc<S>,
    request: &CollectRequest,
    settings: &CollectorSettings,
) -> Result<Vec<Vec<MetricSample>>, DashboardError>
where
    S: SampleSource + ?Sized + 'static,
{
    let windows = partition_windows(minute_of(request.start), minute_of(request.end), settings.window_minutes);
    let filter = Arc::new(SampleFilter {
        heartbeat_name: settings.heartbeat_name.clone(),
        transactions: request.transactions.clone(),
        metrics: request.metrics.clone(),
    });
    let permits = Arc::new(Semaphore::new(settings.max_concurrent_fetches.max(1)));
    let config_id: Arc<str> = Arc::from(request.config_id.as_str());
    let tag: Option<Arc<str>> = request.selector_tag.as_deref().map(Arc::from);

    debug!(config_id = %request.config_id, windows = windows.len(), "dispatching window fetches");

    let mut tasks = JoinSet::new();
    for window in windows.iter().copied() {
        let source = Arc::clone(&source);
        let filter = Arc::clone(&filter);
        let permits = Arc::clone(&permits);
        let config_id = Arc::clone(&config_id);
        let tag = tag.clone();

        tasks.spawn(async move {
            let _permit = permits.acquire_owned().await.ok();
            let fetched = source
                .fetch_metric_samples(&config_id, window.start_minute, window.end_minute, tag.as_deref())
                .await;
            (window, fetched.map(|batch| filter.apply(batch)))
        });
    }

    let mut batches: Vec<Option<Vec<MetricSample>>> = vec![None; windows.len()];
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((window, Ok(batch))) => {
                batches[window.index] = Some(batch);
            }
            Ok((window, Err(e))) => {
                error!(
                    config_id = %request.config_id,
                    start_minute = window.start_minute,
                    end_minute = window.end_minute,
                    "window fetch failed: {:#}", e
                );
                tasks.abort_all();
                return Err(DashboardError::fetch(
                    FetchKind::MetricSamples,
                    format!("window [{}, {}]", window.start_minute, window.end_minute),
                    e,
                ));
            }
            Err(e) => {
                error!(config_id = %request.config_id, "window fetch task died: {}", e);
                tasks.abort_all();
                return Err(DashboardError::TaskAborted(e.to_string()));
            }
        }
    }

    batches
        .into_iter()
        .enumerate()
        .map(|(index, batch)| {
            batch.ok_or_else(|| DashboardError::TaskAborted(format!("window {} returned no result", index)))
        })
        .collect()
}

/// Fold batches into `tag -> transaction -> metric -> series`.
///
/// Each series spans the whole request range, one point per minute, so
/// minutes without a sample stay visibly empty.
pub fn reduce<R>(
    batches: Vec<Vec<MetricSample>>,
    request: &CollectRequest,
    settings: &CollectorSettings,
    resolver: &R,
) -> ObservedTimeSeries
where
    R: MetricTypeResolver + ?Sized,
{
    let mut observed = ObservedTimeSeries::new();
    let mut samples = 0usize;
    let mut out_of_range = 0usize;

    for sample in batches.into_iter().flatten() {
        let MetricSample {
            tag,
            transaction,
            metric,
            collection_minute,
            value,
            deeplink_url,
        } = sample;
        samples += 1;

        let tag = if tag.is_empty() { settings.default_tag.clone() } else { tag };
        let metrics = observed.entry(tag).or_default().entry(transaction).or_default();
        let series = metrics.entry(metric).or_insert_with_key(|name| {
            let metric_type = resolver.classify_metric_type(&request.config_id, name);
            MetricTimeSeries::new(name.clone(), metric_type, request.start, request.end)
        });

        if !series.set_value(collection_minute, value) {
            out_of_range += 1;
        }
        if deeplink_url.is_some() {
            series.deeplink_url = deeplink_url;
        }
    }

    debug!(samples, out_of_range, tags = observed.len(), "reduced metric samples");
    observed
}

/// Fetch and reduce in one call.
pub async fn collect<S>(
    source: Arc<S>,
    request: &CollectRequest,
    settings: &CollectorSettings,
) -> Result<ObservedTimeSeries, DashboardError>
where
    S: SampleSource + MetricTypeResolver + ?Sized + 'static,
{
    let batches = fetch_windows(Arc::clone(&source), request, settings).await?;
    let observed = reduce(batches, request, settings, source.as_ref());
    info!(
        config_id = %request.config_id,
        tags = observed.len(),
        transactions = observed.values().map(|t| t.len()).sum::<usize>(),
        "collected observed time series"
    );
    Ok(observed)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rand::Rng;

    use super::*;
    use crate::model::minute_to_millis;
    use crate::provider::InMemorySource;

    fn sample(tag: &str, transaction: &str, metric: &str, minute: i64, value: f64) -> MetricSample {
        MetricSample {
            tag: tag.to_string(),
            transaction: transaction.to_string(),
            metric: metric.to_string(),
            collection_minute: minute,
            value,
            deeplink_url: None,
        }
    }

    fn request(start_minute: i64, end_minute: i64) -> CollectRequest {
        CollectRequest {
            config_id: "cfg".to_string(),
            start: minute_to_millis(start_minute),
            end: minute_to_millis(end_minute),
            ..Default::default()
        }
    }

    #[test]
    fn test_partition_windows() {
        let windows = partition_windows(0, 150, 60);
        let bounds: Vec<(i64, i64)> = windows.iter().map(|w| (w.start_minute, w.end_minute)).collect();
        assert_eq!(bounds, vec![(0, 59), (60, 119), (120, 150)]);
        assert_eq!(windows[2].index, 2);

        assert_eq!(partition_windows(10, 10, 60).len(), 1);
        assert!(partition_windows(10, 9, 60).is_empty());
        assert_eq!(partition_windows(0, 119, 60).len(), 2);
    }

    #[test]
    fn test_filter_drops_heartbeat_and_unselected() {
        let filter = SampleFilter {
            heartbeat_name: "Heartbeat".to_string(),
            transactions: BTreeSet::from(["/login".to_string()]),
            metrics: BTreeSet::new(),
        };
        let kept = filter.apply(vec![
            sample("", "/login", "latency", 1, 1.0),
            sample("", "Heartbeat", "latency", 1, 1.0),
            sample("", "/cart", "latency", 1, 1.0),
        ]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].transaction, "/login");
    }

    #[tokio::test]
    async fn test_collect_builds_nested_map() {
        let source = Arc::new(InMemorySource::new());
        source.set_metric_type("cfg", "latency", "RESP_TIME");
        source.add_sample("cfg", sample("", "/login", "latency", 5, 120.0));
        source.add_sample("cfg", sample("", "/login", "errors", 70, 3.0));
        source.add_sample("cfg", sample("canary", "/login", "latency", 100, 80.0));
        let mut linked = sample("", "/cart", "latency", 130, 40.0);
        linked.deeplink_url = Some("https://apm.example/cart".to_string());
        source.add_sample("cfg", linked);

        let settings = CollectorSettings::default();
        let observed = collect(source, &request(0, 150), &settings).await.unwrap();

        assert_eq!(observed.len(), 2);
        let default = &observed[&settings.default_tag];
        let latency = &default["/login"]["latency"];
        assert_eq!(latency.points.len(), 151);
        assert_eq!(latency.points[5].value, Some(120.0));
        assert_eq!(latency.metric_type, "RESP_TIME");
        assert_eq!(default["/login"]["errors"].metric_type, "OTHER");
        assert_eq!(
            default["/cart"]["latency"].deeplink_url.as_deref(),
            Some("https://apm.example/cart")
        );
        assert_eq!(observed["canary"]["/login"]["latency"].points[100].value, Some(80.0));
    }

    #[tokio::test]
    async fn test_metric_filter_and_selector_tag() {
        let source = Arc::new(InMemorySource::new());
        source.add_sample("cfg", sample("a", "/login", "latency", 5, 1.0));
        source.add_sample("cfg", sample("a", "/login", "errors", 5, 1.0));
        source.add_sample("cfg", sample("b", "/login", "latency", 5, 1.0));

        let mut req = request(0, 10);
        req.selector_tag = Some("a".to_string());
        req.metrics = BTreeSet::from(["latency".to_string()]);
        let observed = collect(source, &req, &CollectorSettings::default()).await.unwrap();

        assert_eq!(observed.keys().collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(observed["a"]["/login"].keys().collect::<Vec<_>>(), vec!["latency"]);
    }

    #[tokio::test]
    async fn test_result_independent_of_completion_order() {
        let source = Arc::new(InMemorySource::new());
        for minute in 0..300 {
            let tag = if minute % 3 == 0 { "canary" } else { "" };
            source.add_sample("cfg", sample(tag, "/login", "latency", minute, minute as f64));
            source.add_sample("cfg", sample("", "/cart", "errors", minute, 1.0));
        }
        let settings = CollectorSettings::default();
        let req = request(0, 299);

        let baseline = collect(Arc::clone(&source), &req, &settings).await.unwrap();

        let mut rng = rand::thread_rng();
        for _ in 0..3 {
            for window in partition_windows(0, 299, settings.window_minutes) {
                source.delay_window(window.start_minute, Duration::from_millis(rng.gen_range(0..25)));
            }
            let shuffled = collect(Arc::clone(&source), &req, &settings).await.unwrap();
            assert_eq!(shuffled, baseline);
        }
    }

    #[tokio::test]
    async fn test_failing_window_fails_collection() {
        let source = Arc::new(InMemorySource::new());
        source.add_sample("cfg", sample("", "/login", "latency", 5, 1.0));
        source.fail_window(60);
        source.delay_window(0, Duration::from_millis(20));

        let err = collect(source, &request(0, 150), &CollectorSettings::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DashboardError::SourceFetch { kind: FetchKind::MetricSamples, .. }
        ));
    }

    #[tokio::test]
    async fn test_empty_store_yields_empty_map() {
        let source = Arc::new(InMemorySource::new());
        let observed = collect(source, &request(0, 60), &CollectorSettings::default()).await.unwrap();
        assert!(observed.is_empty());
    }
}
