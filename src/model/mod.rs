//! Records read from the analysis and sample stores, and the dashboard
//! artifacts built from them.

pub mod risk;
pub mod time;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use risk::RiskValue;
pub use time::{minute_of, minute_to_millis, MILLIS_PER_MINUTE};

/// One ML risk computation for a verification configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub config_id: String,
    /// Deployment variant the analysis ran for, if any.
    #[serde(default)]
    pub tag: Option<String>,
    /// End of the polling interval this record summarizes (minutes since epoch).
    pub analysis_minute: i64,
    pub overall_risk: RiskValue,
    #[serde(default)]
    pub transaction_risk: BTreeMap<String, RiskValue>,
}

/// A display bucket of the risk heat map.
///
/// `end_time` is inclusive, so consecutive units satisfy
/// `prev.end_time + 1 == next.start_time`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatMapUnit {
    pub start_time: i64,
    pub end_time: i64,
    pub overall_score: RiskValue,
    pub transaction_scores: BTreeMap<String, RiskValue>,
    /// True if at least one analysis record contributed to this unit.
    pub has_data: bool,
}

impl HeatMapUnit {
    /// A "no data yet" unit covering `[start_time, end_time]`.
    pub fn sentinel(start_time: i64, end_time: i64) -> Self {
        Self {
            start_time,
            end_time,
            overall_score: RiskValue::NoDataYet,
            transaction_scores: BTreeMap::new(),
            has_data: false,
        }
    }

    /// The polling-interval unit ending at the record's analysis minute.
    pub fn from_record(record: &AnalysisRecord, poll_interval_minutes: i64) -> Self {
        let end_time = minute_to_millis(record.analysis_minute);
        let start_time = minute_to_millis(record.analysis_minute - poll_interval_minutes) + 1;
        Self {
            start_time,
            end_time,
            overall_score: record.overall_risk,
            transaction_scores: record.transaction_risk.clone(),
            has_data: true,
        }
    }

    /// Fold `other` into `self`, keeping the worst risk seen. Units without
    /// data contribute nothing.
    pub fn absorb(&mut self, other: &HeatMapUnit) {
        if !other.has_data {
            return;
        }
        self.has_data = true;
        self.overall_score.raise_to(other.overall_score);
        for (transaction, risk) in &other.transaction_scores {
            self.transaction_scores
                .entry(transaction.clone())
                .and_modify(|current| current.raise_to(*risk))
                .or_insert(*risk);
        }
    }
}

/// One raw per-minute value collected from a monitoring provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Deployment variant; empty means the default group.
    #[serde(default)]
    pub tag: String,
    pub transaction: String,
    pub metric: String,
    pub collection_minute: i64,
    pub value: f64,
    /// Link back into the provider's own UI for this metric.
    #[serde(default)]
    pub deeplink_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub timestamp: i64,
    /// `None` until a sample lands on this minute.
    pub value: Option<f64>,
    pub risk: RiskValue,
}

/// Dense per-minute series of one metric of one transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricTimeSeries {
    pub metric_name: String,
    pub metric_type: String,
    pub deeplink_url: Option<String>,
    /// Worst risk reported after the risk cutoff.
    pub risk: RiskValue,
    /// Every risk reported for this metric, keyed by analysis time (ms).
    pub risk_history: BTreeMap<i64, RiskValue>,
    pub long_term_pattern: Option<i32>,
    pub last_seen_time: Option<i64>,
    pub points: Vec<TimeSeriesPoint>,
    start_minute: i64,
}

impl MetricTimeSeries {
    /// One empty point per minute of `[start_ms, end_ms]`.
    pub fn new(metric_name: impl Into<String>, metric_type: impl Into<String>, start_ms: i64, end_ms: i64) -> Self {
        let start_minute = minute_of(start_ms);
        let end_minute = minute_of(end_ms);
        let points = (start_minute..=end_minute)
            .map(|minute| TimeSeriesPoint {
                timestamp: minute_to_millis(minute),
                value: None,
                risk: RiskValue::Unknown,
            })
            .collect();

        Self {
            metric_name: metric_name.into(),
            metric_type: metric_type.into(),
            deeplink_url: None,
            risk: RiskValue::Unknown,
            risk_history: BTreeMap::new(),
            long_term_pattern: None,
            last_seen_time: None,
            points,
            start_minute,
        }
    }

    fn point_mut(&mut self, minute: i64) -> Option<&mut TimeSeriesPoint> {
        let offset = usize::try_from(minute - self.start_minute).ok()?;
        self.points.get_mut(offset)
    }

    /// Write a sample value; minutes outside the series range are ignored.
    pub fn set_value(&mut self, minute: i64, value: f64) -> bool {
        match self.point_mut(minute) {
            Some(point) => {
                point.value = Some(value);
                true
            }
            None => false,
        }
    }

    /// Record a risk reported for `minute`. History always keeps it; the
    /// current risk only moves for minutes strictly after `risk_cutoff`.
    pub fn record_risk(&mut self, minute: i64, risk: RiskValue, risk_cutoff: i64) {
        let timestamp = minute_to_millis(minute);
        self.risk_history.insert(timestamp, risk);
        if let Some(point) = self.point_mut(minute) {
            point.risk = risk;
        }
        if timestamp > risk_cutoff {
            self.risk.raise_to(risk);
        }
    }

    pub fn has_values(&self) -> bool {
        self.points.iter().any(|p| p.value.is_some())
    }
}

/// metric name -> series
pub type MetricMap = BTreeMap<String, MetricTimeSeries>;
/// transaction name -> metrics
pub type TransactionMap = BTreeMap<String, MetricMap>;
/// tag -> transactions
pub type ObservedTimeSeries = BTreeMap<String, TransactionMap>;

/// Risk assessment for one metric inside a [`RiskSummary`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRisk {
    pub risk: RiskValue,
    #[serde(default)]
    pub long_term_pattern: Option<i32>,
    #[serde(default)]
    pub last_seen_time: Option<i64>,
}

/// Precomputed per-(transaction, metric) risks for one analysis minute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskSummary {
    pub config_id: String,
    #[serde(default)]
    pub tag: Option<String>,
    pub analysis_minute: i64,
    /// transaction -> metric -> risk
    pub metrics: BTreeMap<String, BTreeMap<String, MetricRisk>>,
}
