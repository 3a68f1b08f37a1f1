//! Risk overlay onto collected series, and selection of the riskiest tag.

use tracing::debug;

use crate::model::{ObservedTimeSeries, RiskSummary, RiskValue, TransactionMap};

/// Write the risks of `summaries` onto the matching series of one tag.
///
/// Only series that were actually collected are touched; summaries for
/// transactions or metrics without samples are skipped. Risks at or before
/// `risk_cutoff` go into history only, later ones also raise the series'
/// current risk. Long-term pattern and last-seen time apply regardless of
/// the cutoff.
pub fn apply_risk_summaries(series: &mut TransactionMap, summaries: &[RiskSummary], risk_cutoff: i64) {
    let mut applied = 0usize;

    for summary in summaries {
        for (transaction, metric_risks) in &summary.metrics {
            let Some(metrics) = series.get_mut(transaction) else {
                continue;
            };
            for (metric, metric_risk) in metric_risks {
                let Some(metric_series) = metrics.get_mut(metric) else {
                    continue;
                };
                metric_series.record_risk(summary.analysis_minute, metric_risk.risk, risk_cutoff);
                if let Some(pattern) = metric_risk.long_term_pattern {
                    metric_series.long_term_pattern = Some(pattern);
                }
                if let Some(last_seen) = metric_risk.last_seen_time {
                    metric_series.last_seen_time = Some(last_seen);
                }
                applied += 1;
            }
        }
    }

    debug!(summaries = summaries.len(), applied, "applied risk summaries");
}

/// Worst current risk across every series of one tag.
pub fn max_risk(series: &TransactionMap) -> RiskValue {
    series
        .values()
        .flat_map(|metrics| metrics.values())
        .map(|s| s.risk)
        .max()
        .unwrap_or(RiskValue::NoDataYet)
}

/// Keep only the tag with the highest risk when several tags have data.
///
/// Ties go to the tag that sorts first. With at most one non-empty tag the
/// map is returned untouched.
pub fn select_riskiest_tag(observed: ObservedTimeSeries) -> ObservedTimeSeries {
    let populated = observed.values().filter(|series| !series.is_empty()).count();
    if populated <= 1 {
        return observed;
    }

    let mut winner: Option<(&String, RiskValue)> = None;
    for (tag, series) in observed.iter().filter(|(_, series)| !series.is_empty()) {
        let risk = max_risk(series);
        if winner.map_or(true, |(_, best)| risk > best) {
            winner = Some((tag, risk));
        }
    }

    let Some((winning_tag, risk)) = winner.map(|(tag, risk)| (tag.clone(), risk)) else {
        return observed;
    };
    debug!(tag = %winning_tag, %risk, candidates = populated, "selected riskiest tag");

    observed
        .into_iter()
        .filter(|(tag, _)| *tag == winning_tag)
        .collect()
}
