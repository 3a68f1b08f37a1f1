//! Sparse analysis records -> dense polling-interval units.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::model::{minute_to_millis, AnalysisRecord, HeatMapUnit, RiskValue, MILLIS_PER_MINUTE};

/// Fold records that share `(config_id, analysis_minute)` into one.
///
/// Several tags can be analyzed for the same configuration and minute. The
/// first record of a group is kept with its per-transaction risks; its
/// overall risk becomes the mean of the group's levels (rounded), or
/// `Unknown` when no record in the group carries a level. First-seen order
/// is preserved.
pub fn merge_same_minute_records(records: Vec<AnalysisRecord>) -> Vec<AnalysisRecord> {
    let mut groups: Vec<Vec<AnalysisRecord>> = Vec::new();
    let mut index: HashMap<(String, i64), usize> = HashMap::new();

    for record in records {
        let key = (record.config_id.clone(), record.analysis_minute);
        match index.get(&key) {
            Some(&slot) => groups[slot].push(record),
            None => {
                index.insert(key, groups.len());
                groups.push(vec![record]);
            }
        }
    }

    groups.into_iter().filter_map(merge_group).collect()
}

fn merge_group(group: Vec<AnalysisRecord>) -> Option<AnalysisRecord> {
    let levels: Vec<u32> = group.iter().filter_map(|r| r.overall_risk.level()).collect();
    let tags = group.len();
    let mut merged = group.into_iter().next()?;
    if tags == 1 {
        return Some(merged);
    }

    merged.overall_risk = if levels.is_empty() {
        RiskValue::Unknown
    } else {
        let mean = levels.iter().map(|&l| f64::from(l)).sum::<f64>() / levels.len() as f64;
        RiskValue::from_score(mean)
    };
    debug!(
        config_id = %merged.config_id,
        minute = merged.analysis_minute,
        tags,
        risk = %merged.overall_risk,
        "merged same-minute analysis records"
    );
    Some(merged)
}

/// Build one unit per polling interval across `[start, end]` (ms).
///
/// Records become units ending at their analysis minute. The grid is
/// anchored on the earliest record so that record boundaries line up with
/// grid steps even when `start` is not aligned; every step without a record
/// becomes a "no data yet" sentinel.
pub fn resample(
    records: &[AnalysisRecord],
    start: i64,
    end: i64,
    poll_interval_minutes: i64,
) -> Vec<HeatMapUnit> {
    let interval_ms = poll_interval_minutes * MILLIS_PER_MINUTE;

    let mut candidates: Vec<HeatMapUnit> = records
        .iter()
        .map(|record| HeatMapUnit::from_record(record, poll_interval_minutes))
        .filter(|unit| unit.start_time >= start && unit.end_time <= end)
        .collect();

    if candidates.len() < records.len() {
        debug!(
            dropped = records.len() - candidates.len(),
            "ignoring analysis records outside the requested range"
        );
    }

    if candidates.is_empty() {
        return sentinel_units(start, end, poll_interval_minutes);
    }

    // Stable: equal start times keep their input order.
    candidates.sort_by_key(|unit| unit.start_time);

    let mut first_step = candidates[0].start_time;
    while start < first_step - interval_ms {
        first_step -= interval_ms;
    }

    let mut units = Vec::new();
    let mut cursor = 0;
    let mut step = first_step;
    while step <= end {
        // Candidates the grid has already passed cannot be placed any more.
        while let Some(candidate) = candidates.get(cursor) {
            if candidate.start_time >= step {
                break;
            }
            warn!(
                candidate_start = candidate.start_time,
                step, "dropping analysis unit that does not align with the polling grid"
            );
            cursor += 1;
        }

        if let Some(candidate) = candidates.get(cursor) {
            let offset = candidate.start_time - step;
            if offset == 0 {
                units.push(candidate.clone());
                cursor += 1;
                step += interval_ms;
                continue;
            }
            if offset < interval_ms {
                warn!(
                    offset_ms = offset,
                    candidate_start = candidate.start_time,
                    step,
                    "analysis unit is offset from the polling grid by less than one interval"
                );
            }
        }

        units.push(HeatMapUnit::sentinel(step, step + interval_ms - 1));
        step += interval_ms;
    }

    units
}

/// All-sentinel units from the start minute to the end minute.
fn sentinel_units(start: i64, end: i64, poll_interval_minutes: i64) -> Vec<HeatMapUnit> {
    let interval_ms = poll_interval_minutes * MILLIS_PER_MINUTE;
    let end_minute = crate::model::minute_of(end);
    let mut minute = crate::model::minute_of(start);

    let mut units = Vec::new();
    while end_minute > minute {
        let unit_start = minute_to_millis(minute);
        units.push(HeatMapUnit::sentinel(unit_start, unit_start + interval_ms - 1));
        minute += poll_interval_minutes;
    }
    units
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    const P: i64 = 5;

    fn record(minute: i64, risk: RiskValue) -> AnalysisRecord {
        AnalysisRecord {
            config_id: "cfg".to_string(),
            tag: None,
            analysis_minute: minute,
            overall_risk: risk,
            transaction_risk: BTreeMap::new(),
        }
    }

    fn assert_contiguous(units: &[HeatMapUnit]) {
        for pair in units.windows(2) {
            assert_eq!(pair[0].end_time + 1, pair[1].start_time);
        }
    }

    #[test]
    fn test_empty_records_yield_sentinels() {
        let units = resample(&[], 0, minute_to_millis(60), P);
        assert_eq!(units.len(), 12);
        assert!(units.iter().all(|u| !u.has_data && u.overall_score == RiskValue::NoDataYet));
        assert_contiguous(&units);
    }

    #[test]
    fn test_gaps_are_filled() {
        // Records ending at minutes 15 and 25 cover (10, 15] and (20, 25].
        let records = vec![record(25, RiskValue::Level(2)), record(15, RiskValue::Level(0))];
        let units = resample(&records, 0, minute_to_millis(30), P);

        let scores: Vec<RiskValue> = units.iter().map(|u| u.overall_score).collect();
        assert_eq!(
            scores,
            vec![
                RiskValue::NoDataYet,
                RiskValue::NoDataYet,
                RiskValue::Level(0),
                RiskValue::NoDataYet,
                RiskValue::Level(2),
                RiskValue::NoDataYet,
            ]
        );
        assert_contiguous(&units);
        assert_eq!(units[2].end_time, minute_to_millis(15));
    }

    #[test]
    fn test_length_matches_range() {
        for hours in [1, 3, 12] {
            let end = minute_to_millis(hours * 60);
            let records: Vec<_> = (1..=hours * 12)
                .step_by(3)
                .map(|i| record(i * P, RiskValue::Level(1)))
                .collect();
            let units = resample(&records, 0, end, P);
            assert_eq!(units.len() as i64, hours * 60 / P);
            assert_contiguous(&units);
        }
    }

    #[test]
    fn test_records_outside_range_ignored() {
        let records = vec![record(200, RiskValue::Level(3)), record(10, RiskValue::Level(1))];
        let units = resample(&records, 0, minute_to_millis(30), P);
        assert_eq!(units.len(), 6);
        assert!(units.iter().all(|u| u.overall_score != RiskValue::Level(3)));
        assert_eq!(units.iter().filter(|u| u.has_data).count(), 1);
    }

    #[test]
    fn test_only_out_of_range_records_fall_back_to_sentinels() {
        let units = resample(&[record(500, RiskValue::Level(1))], 0, minute_to_millis(30), P);
        assert_eq!(units.len(), 6);
        assert!(units.iter().all(|u| !u.has_data));
    }

    #[test]
    fn test_misaligned_record_does_not_stall_grid() {
        // Minute 17 is off the grid anchored by minute 10.
        let records = vec![
            record(10, RiskValue::Level(0)),
            record(17, RiskValue::Level(3)),
            record(25, RiskValue::Level(1)),
        ];
        let units = resample(&records, 0, minute_to_millis(30), P);
        assert_eq!(units.len(), 6);
        assert_contiguous(&units);
        assert!(units.iter().all(|u| u.overall_score != RiskValue::Level(3)));
        assert_eq!(units[4].overall_score, RiskValue::Level(1));
    }

    #[test]
    fn test_merge_same_minute_averages_levels() {
        let mut a = record(10, RiskValue::Level(0));
        a.tag = Some("canary".to_string());
        a.transaction_risk.insert("/login".to_string(), RiskValue::Level(0));
        let mut b = record(10, RiskValue::Level(2));
        b.tag = Some("primary".to_string());
        b.transaction_risk.insert("/login".to_string(), RiskValue::Level(2));
        b.transaction_risk.insert("/cart".to_string(), RiskValue::Level(1));
        let c = record(15, RiskValue::Level(3));

        let merged = merge_same_minute_records(vec![a, b, c]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].analysis_minute, 10);
        assert_eq!(merged[0].overall_risk, RiskValue::Level(1));
        assert_eq!(merged[0].tag.as_deref(), Some("canary"));
        assert_eq!(merged[0].transaction_risk.len(), 1);
        assert_eq!(merged[0].transaction_risk["/login"], RiskValue::Level(0));
        assert_eq!(merged[1].analysis_minute, 15);
        assert_eq!(merged[1].overall_risk, RiskValue::Level(3));
    }

    #[test]
    fn test_merge_same_minute_skips_records_without_level() {
        let merged = merge_same_minute_records(vec![
            record(10, RiskValue::Unknown),
            record(10, RiskValue::Level(3)),
            record(10, RiskValue::Level(1)),
        ]);
        assert_eq!(merged[0].overall_risk, RiskValue::Level(2));

        let merged = merge_same_minute_records(vec![
            record(20, RiskValue::NoDataYet),
            record(20, RiskValue::Unknown),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].overall_risk, RiskValue::Unknown);
    }
}
