use serde::{Deserialize, Serialize};

/// Risk carried by an analysis record, heat map unit or time series point.
///
/// Variant order is significant: the derived `Ord` ranks `NoDataYet` below
/// `Unknown` below any `Level`, so "worst observed wins" is plain `max`.
/// Serialized in the legacy numeric encoding (see [`RiskValue::from_score`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub enum RiskValue {
    /// Nothing has been computed for this instant yet.
    NoDataYet,
    /// Computed, but the analysis could not assign a risk.
    Unknown,
    /// Ordinal risk level, 0 being the lowest.
    Level(u32),
}

impl RiskValue {
    /// Decode the legacy numeric encoding used by the analysis store:
    /// `-2` no data yet, any other negative value unknown, `0..N` a level.
    pub fn from_score(score: f64) -> Self {
        if score.is_nan() {
            RiskValue::Unknown
        } else if score <= -1.5 {
            RiskValue::NoDataYet
        } else if score < 0.0 {
            RiskValue::Unknown
        } else {
            RiskValue::Level(score.round() as u32)
        }
    }

    /// Inverse of [`RiskValue::from_score`].
    pub fn to_score(self) -> f64 {
        match self {
            RiskValue::NoDataYet => -2.0,
            RiskValue::Unknown => -1.0,
            RiskValue::Level(level) => level as f64,
        }
    }

    pub fn level(self) -> Option<u32> {
        match self {
            RiskValue::Level(level) => Some(level),
            _ => None,
        }
    }

    pub fn is_level(self) -> bool {
        matches!(self, RiskValue::Level(_))
    }

    /// Keep the worse of `self` and `other`.
    pub fn raise_to(&mut self, other: RiskValue) {
        if other > *self {
            *self = other;
        }
    }
}

impl From<f64> for RiskValue {
    fn from(score: f64) -> Self {
        RiskValue::from_score(score)
    }
}

impl From<RiskValue> for f64 {
    fn from(risk: RiskValue) -> Self {
        risk.to_score()
    }
}

impl std::fmt::Display for RiskValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskValue::NoDataYet => write!(f, "no-data"),
            RiskValue::Unknown => write!(f, "unknown"),
            RiskValue::Level(level) => write!(f, "{}", level),
        }
    }
}
