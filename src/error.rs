//! Request-level failures of the dashboard builders.
//!
//! "No data" is never an error: unknown configurations and empty stores
//! produce empty or sentinel-filled results. Boundary misalignment while
//! resampling is logged, not raised.

use thiserror::Error;

/// Which external collaborator a failed fetch went to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    ConfigLookup,
    AnalysisRecords,
    MetricSamples,
    RiskSummaries,
}

impl std::fmt::Display for FetchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchKind::ConfigLookup => write!(f, "config lookup"),
            FetchKind::AnalysisRecords => write!(f, "analysis records"),
            FetchKind::MetricSamples => write!(f, "metric samples"),
            FetchKind::RiskSummaries => write!(f, "risk summaries"),
        }
    }
}

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("invalid time range: end {end} is before start {start}")]
    InvalidRange { start: i64, end: i64 },

    #[error("time range of {range_ms}ms is shorter than the {interval_minutes}-minute polling interval")]
    RangeShorterThanInterval { range_ms: i64, interval_minutes: i64 },

    #[error("no heat map resolution for a range of {range_ms}ms")]
    InvalidResolution { range_ms: i64 },

    #[error("polling interval must be positive, got {0} minutes")]
    InvalidPollInterval(i64),

    #[error("{kind} fetch failed ({detail})")]
    SourceFetch {
        kind: FetchKind,
        detail: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("collection task aborted: {0}")]
    TaskAborted(String),
}

impl DashboardError {
    pub(crate) fn fetch(kind: FetchKind, detail: impl Into<String>, source: anyhow::Error) -> Self {
        DashboardError::SourceFetch {
            kind,
            detail: detail.into(),
            source,
        }
    }

    /// True for errors caused by the request itself rather than a collaborator.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            DashboardError::InvalidRange { .. }
                | DashboardError::RangeShorterThanInterval { .. }
                | DashboardError::InvalidResolution { .. }
                | DashboardError::InvalidPollInterval(_)
        )
    }
}

/// Reject ranges where `end` precedes `start`.
pub fn check_range(start: i64, end: i64) -> Result<(), DashboardError> {
    if end < start {
        return Err(DashboardError::InvalidRange { start, end });
    }
    Ok(())
}
