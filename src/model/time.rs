//! Millisecond / minute conversions used at the crate boundary.

pub const MILLIS_PER_MINUTE: i64 = 60_000;

/// Minute index of an epoch-millisecond timestamp, truncated toward zero.
pub fn minute_of(millis: i64) -> i64 {
    millis / MILLIS_PER_MINUTE
}

pub fn minute_to_millis(minute: i64) -> i64 {
    minute * MILLIS_PER_MINUTE
}

/// Round down to the start of the minute containing `millis`.
pub fn minute_boundary(millis: i64) -> i64 {
    millis - millis.rem_euclid(MILLIS_PER_MINUTE)
}

/// Round up to the next minute boundary; already-aligned values are kept.
pub fn next_minute_boundary(millis: i64) -> i64 {
    let floor = minute_boundary(millis);
    if floor == millis {
        millis
    } else {
        floor + MILLIS_PER_MINUTE
    }
}
