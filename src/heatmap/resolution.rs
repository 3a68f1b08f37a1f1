//! Range length -> display bucket size.

use serde::{Deserialize, Serialize};

use crate::error::DashboardError;

const HOUR_MS: i64 = 60 * 60 * 1000;
const DAY_MS: i64 = 24 * HOUR_MS;

/// Display resolution tiers, finest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeatMapResolution {
    TwelveHours,
    OneDay,
    SevenDays,
    ThirtyDays,
}

impl HeatMapResolution {
    pub const ALL: [HeatMapResolution; 4] = [
        HeatMapResolution::TwelveHours,
        HeatMapResolution::OneDay,
        HeatMapResolution::SevenDays,
        HeatMapResolution::ThirtyDays,
    ];

    /// Longest range (inclusive) this tier serves; the coarsest tier is open-ended.
    pub fn max_range_ms(self) -> Option<i64> {
        match self {
            HeatMapResolution::TwelveHours => Some(12 * HOUR_MS),
            HeatMapResolution::OneDay => Some(DAY_MS),
            HeatMapResolution::SevenDays => Some(7 * DAY_MS),
            HeatMapResolution::ThirtyDays => None,
        }
    }

    /// Number of raw polling-interval units merged into one displayed unit.
    pub fn events_per_unit(self) -> i64 {
        match self {
            HeatMapResolution::TwelveHours => 1,
            HeatMapResolution::OneDay => 2,
            HeatMapResolution::SevenDays => 14,
            HeatMapResolution::ThirtyDays => 60,
        }
    }

    pub fn unit_duration_minutes(self, poll_interval_minutes: i64) -> i64 {
        self.events_per_unit() * poll_interval_minutes
    }

    /// Finest tier whose range covers `range_ms`.
    pub fn for_range(range_ms: i64) -> Result<Self, DashboardError> {
        if range_ms < 0 {
            return Err(DashboardError::InvalidResolution { range_ms });
        }
        Ok(Self::ALL
            .into_iter()
            .find(|tier| tier.max_range_ms().map_or(true, |max| range_ms <= max))
            .unwrap_or(HeatMapResolution::ThirtyDays))
    }
}

impl std::fmt::Display for HeatMapResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HeatMapResolution::TwelveHours => write!(f, "12h"),
            HeatMapResolution::OneDay => write!(f, "1d"),
            HeatMapResolution::SevenDays => write!(f, "7d"),
            HeatMapResolution::ThirtyDays => write!(f, "30d"),
        }
    }
}

/// Resolved bucket geometry for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub tier: HeatMapResolution,
    pub unit_duration_minutes: i64,
    pub events_per_unit: i64,
}

/// Pick the display resolution for a range of `range_ms` milliseconds.
pub fn resolve(range_ms: i64, poll_interval_minutes: i64) -> Result<Resolution, DashboardError> {
    if poll_interval_minutes <= 0 {
        return Err(DashboardError::InvalidPollInterval(poll_interval_minutes));
    }
    let tier = HeatMapResolution::for_range(range_ms)?;
    Ok(Resolution {
        tier,
        unit_duration_minutes: tier.unit_duration_minutes(poll_interval_minutes),
        events_per_unit: tier.events_per_unit(),
    })
}
