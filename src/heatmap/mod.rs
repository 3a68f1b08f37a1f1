//! Risk heat map: resample analysis records onto the polling grid, then
//! merge them down to a display resolution picked from the range length.

pub mod merge;
pub mod resample;
pub mod resolution;

use tracing::info;

use crate::error::{check_range, DashboardError};
use crate::model::{AnalysisRecord, HeatMapUnit, MILLIS_PER_MINUTE};

pub use resolution::{resolve, HeatMapResolution, Resolution};

/// Reject requests that cannot produce a heat map, before anything is fetched.
pub fn validate_request(start: i64, end: i64, poll_interval_minutes: i64) -> Result<Resolution, DashboardError> {
    if poll_interval_minutes <= 0 {
        return Err(DashboardError::InvalidPollInterval(poll_interval_minutes));
    }
    check_range(start, end)?;
    let range_ms = end - start;
    if range_ms < poll_interval_minutes * MILLIS_PER_MINUTE {
        return Err(DashboardError::RangeShorterThanInterval {
            range_ms,
            interval_minutes: poll_interval_minutes,
        });
    }
    resolve(range_ms, poll_interval_minutes)
}

/// Turn already-fetched records into display units for `[start, end]`.
pub fn compute_heat_map(
    records: Vec<AnalysisRecord>,
    start: i64,
    end: i64,
    poll_interval_minutes: i64,
) -> Result<Vec<HeatMapUnit>, DashboardError> {
    let resolution = validate_request(start, end, poll_interval_minutes)?;

    let records = resample::merge_same_minute_records(records);
    let raw_units = resample::resample(&records, start, end, poll_interval_minutes);
    let units = merge::resolve_units(&raw_units, start, end, &resolution);

    info!(
        records = records.len(),
        raw_units = raw_units.len(),
        units = units.len(),
        tier = %resolution.tier,
        "heat map computed"
    );
    Ok(units)
}
