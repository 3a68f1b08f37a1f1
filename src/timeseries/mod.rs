//! Annotated time series: collect raw samples per window, overlay risk
//! summaries, keep the riskiest tag, then rank for display.

pub mod collector;
pub mod overlay;
pub mod response;

use tracing::debug;

use crate::model::time::{minute_boundary, next_minute_boundary};
use crate::model::MILLIS_PER_MINUTE;

pub use collector::{collect, CollectRequest, CollectorSettings};
pub use overlay::{apply_risk_summaries, select_riskiest_tag};
pub use response::{paginate, rank_transactions, TimeSeriesPage, TransactionTimeSeries};

const MILLIS_PER_DAY: i64 = 24 * 60 * MILLIS_PER_MINUTE;

/// Request bounds after snapping to whole minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizedRange {
    pub start: i64,
    pub end: i64,
    pub history_start: i64,
}

/// Snap `start` and `history_start` up and `end` down to minute
/// boundaries. A missing history start means "no history before `start`".
pub fn normalize_range(start: i64, end: i64, history_start: Option<i64>) -> NormalizedRange {
    let start = next_minute_boundary(start);
    NormalizedRange {
        start,
        end: minute_boundary(end),
        history_start: history_start.map_or(start, next_minute_boundary),
    }
}

/// Pull `history_start` forward when the history span, in whole days,
/// exceeds `max_history_days`; the replacement keeps `fallback_minutes` of
/// history before `start`.
pub fn clamp_history(range: NormalizedRange, max_history_days: i64, fallback_minutes: i64) -> NormalizedRange {
    let span_days = (range.end - range.history_start) / MILLIS_PER_DAY;
    if span_days <= max_history_days {
        return range;
    }

    let history_start = range.start - fallback_minutes * MILLIS_PER_MINUTE + 1;
    debug!(
        requested = range.history_start,
        clamped = history_start,
        max_history_days,
        "history start clamped"
    );
    NormalizedRange { history_start, ..range }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::minute_to_millis;

    #[test]
    fn test_normalize_rounds_outward_to_inward() {
        let range = normalize_range(minute_to_millis(10) + 5, minute_to_millis(20) + 5, Some(minute_to_millis(2) + 1));
        assert_eq!(range.start, minute_to_millis(11));
        assert_eq!(range.end, minute_to_millis(20));
        assert_eq!(range.history_start, minute_to_millis(3));
    }

    #[test]
    fn test_missing_history_defaults_to_start() {
        let range = normalize_range(minute_to_millis(10), minute_to_millis(20), None);
        assert_eq!(range.history_start, range.start);
    }

    #[test]
    fn test_clamp_history() {
        let day = 24 * 60;
        let range = NormalizedRange {
            start: minute_to_millis(40 * day),
            end: minute_to_millis(41 * day),
            history_start: 0,
        };
        let clamped = clamp_history(range, 30, 120);
        assert_eq!(clamped.history_start, minute_to_millis(40 * day - 120) + 1);
        assert_eq!(clamped.start, range.start);

        let recent = NormalizedRange {
            history_start: minute_to_millis(39 * day),
            ..range
        };
        assert_eq!(clamp_history(recent, 30, 120), recent);
    }

    #[test]
    fn test_clamp_counts_whole_days_only() {
        let end = minute_to_millis(60 * 24 * 60);
        let partial_day = NormalizedRange {
            start: end - minute_to_millis(60),
            end,
            history_start: end - 30 * MILLIS_PER_DAY - MILLIS_PER_DAY / 2,
        };
        assert_eq!(clamp_history(partial_day, 30, 120), partial_day);

        let full_days = NormalizedRange {
            history_start: end - 31 * MILLIS_PER_DAY,
            ..partial_day
        };
        assert_ne!(clamp_history(full_days, 30, 120), full_days);
    }
}
