//! Raw polling-interval units -> display-resolution units.

use tracing::debug;

use super::resolution::Resolution;
use crate::model::{minute_of, HeatMapUnit};

/// Collapse a run of consecutive units into one, worst risk wins.
///
/// Returns `None` for an empty run.
pub fn merge_run(units: &[HeatMapUnit]) -> Option<HeatMapUnit> {
    let first = units.first()?;
    let last = units.last()?;

    let mut merged = HeatMapUnit::sentinel(first.start_time, last.end_time);
    for unit in units {
        merged.absorb(unit);
    }
    Some(merged)
}

/// Merge `units` into runs of `resolution.events_per_unit`, emitting at most
/// as many units as fit in `[start, end]` at the display resolution.
pub fn resolve_units(
    units: &[HeatMapUnit],
    start: i64,
    end: i64,
    resolution: &Resolution,
) -> Vec<HeatMapUnit> {
    let range_minutes = minute_of(end - start);
    let unit_duration = resolution.unit_duration_minutes.max(1);
    let number_of_units = (range_minutes + unit_duration - 1) / unit_duration;
    let events_per_unit = resolution.events_per_unit.max(1) as usize;

    debug!(
        raw_units = units.len(),
        display_units = number_of_units,
        tier = %resolution.tier,
        "resolving heat map units"
    );

    (0..number_of_units.max(0) as usize)
        .filter_map(|i| {
            let from = i * events_per_unit;
            let to = ((i + 1) * events_per_unit).min(units.len());
            if from >= to {
                return None;
            }
            merge_run(&units[from..to])
        })
        .collect()
}
