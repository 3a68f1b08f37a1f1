//! Flattening of the nested observed map into ranked, paged rows.

use std::cmp::Reverse;
use std::collections::BTreeSet;

use serde::Serialize;

use crate::model::{MetricTimeSeries, ObservedTimeSeries, RiskValue};

/// One transaction of one tag, with its metrics ordered worst first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionTimeSeries {
    pub tag: String,
    pub transaction: String,
    /// Worst current risk among the metrics.
    pub risk: RiskValue,
    pub metrics: Vec<MetricTimeSeries>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSeriesPage {
    pub rows: Vec<TransactionTimeSeries>,
    /// Rows available before paging.
    pub total: usize,
    /// Every transaction name present, across all pages.
    pub transactions_in_analysis: BTreeSet<String>,
}

/// Flatten `observed` into rows ordered by risk (worst first), then tag,
/// then transaction name.
pub fn rank_transactions(observed: &ObservedTimeSeries) -> Vec<TransactionTimeSeries> {
    let mut rows: Vec<TransactionTimeSeries> = observed
        .iter()
        .flat_map(|(tag, transactions)| {
            transactions.iter().map(move |(transaction, metrics)| {
                let mut metrics: Vec<MetricTimeSeries> = metrics.values().cloned().collect();
                metrics.sort_by(|a, b| {
                    b.risk
                        .cmp(&a.risk)
                        .then_with(|| a.metric_name.cmp(&b.metric_name))
                });
                let risk = metrics.iter().map(|m| m.risk).max().unwrap_or(RiskValue::NoDataYet);
                TransactionTimeSeries {
                    tag: tag.clone(),
                    transaction: transaction.clone(),
                    risk,
                    metrics,
                }
            })
        })
        .collect();

    rows.sort_by(|a, b| {
        (Reverse(a.risk), &a.tag, &a.transaction).cmp(&(Reverse(b.risk), &b.tag, &b.transaction))
    });
    rows
}

/// Slice `rows` to `[offset, offset + page_size)`.
pub fn paginate(rows: Vec<TransactionTimeSeries>, offset: usize, page_size: usize) -> TimeSeriesPage {
    let total = rows.len();
    let transactions_in_analysis = rows.iter().map(|r| r.transaction.clone()).collect();
    let rows = rows.into_iter().skip(offset).take(page_size).collect();
    TimeSeriesPage {
        rows,
        total,
        transactions_in_analysis,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{minute_to_millis, TransactionMap};

    fn series(name: &str, risk: RiskValue) -> MetricTimeSeries {
        let mut s = MetricTimeSeries::new(name, "OTHER", 0, minute_to_millis(5));
        s.risk = risk;
        s
    }

    fn observed() -> ObservedTimeSeries {
        let mut tag = TransactionMap::new();
        tag.insert(
            "/login".to_string(),
            [
                ("errors".to_string(), series("errors", RiskValue::Level(0))),
                ("latency".to_string(), series("latency", RiskValue::Level(2))),
            ]
            .into(),
        );
        tag.insert(
            "/cart".to_string(),
            [("latency".to_string(), series("latency", RiskValue::Unknown))].into(),
        );
        tag.insert(
            "/search".to_string(),
            [("latency".to_string(), series("latency", RiskValue::Level(2)))].into(),
        );
        ObservedTimeSeries::from([("_DEFAULT_TAG_".to_string(), tag)])
    }

    #[test]
    fn test_rows_ranked_by_risk_then_name() {
        let rows = rank_transactions(&observed());
        let names: Vec<&str> = rows.iter().map(|r| r.transaction.as_str()).collect();
        assert_eq!(names, vec!["/login", "/search", "/cart"]);
        assert_eq!(rows[0].risk, RiskValue::Level(2));
        assert_eq!(rows[0].metrics[0].metric_name, "latency");
        assert_eq!(rows[2].risk, RiskValue::Unknown);
    }

    #[test]
    fn test_paginate() {
        let page = paginate(rank_transactions(&observed()), 1, 1);
        assert_eq!(page.total, 3);
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.rows[0].transaction, "/search");
        assert_eq!(page.transactions_in_analysis.len(), 3);

        let past_end = paginate(rank_transactions(&observed()), 10, 5);
        assert!(past_end.rows.is_empty());
        assert_eq!(past_end.total, 3);
    }
}
