//! System-wide constants for the CNC motion workspace.
//!
//! Single source of truth for axis/motor counts, the planner pool size and
//! the tuning defaults of the planner and runtime. Time-based values are
//! given in microseconds (or milliseconds where noted) and converted to the
//! planner's native unit, minutes, by the `*_minutes` helpers.
//!
//! Most of the tuning factors are empirical. Change with caution.

use static_assertions::const_assert;

/// Number of Cartesian/rotary axes (X, Y, Z, A, B, C).
pub const AXES: usize = 6;

/// Number of motors driven by the runtime.
pub const MOTORS: usize = 6;

/// Number of coordinate systems: machine (G53) plus G54–G59.
pub const COORDS: usize = 7;

/// Move buffers in the planner ring.
///
/// Should be at least the number of buffers needed for optimal planning of
/// very short lines. 12 minimum, 255 maximum.
pub const PLANNER_BUFFER_POOL_SIZE: usize = 28;

/// Buffers a producer should leave free before accepting a new input line.
pub const PLANNER_BUFFER_HEADROOM: usize = 4;

const_assert!(PLANNER_BUFFER_POOL_SIZE >= 12);
const_assert!(PLANNER_BUFFER_POOL_SIZE <= 255);
const_assert!(PLANNER_BUFFER_HEADROOM < PLANNER_BUFFER_POOL_SIZE);

/// Jerk settings are configured in millions (mm/min³ / 1e6).
pub const JERK_MULTIPLIER: f64 = 1_000_000.0;

/// Precision to which jerk must match to reuse the cached derived terms.
pub const JERK_MATCH_TOLERANCE: f64 = 1000.0;

pub const MICROSECONDS_PER_MINUTE: f64 = 60_000_000.0;

/// Minimum segment time (also minimum move time) [µs].
pub const MIN_SEGMENT_USEC: f64 = 750.0;

/// Nominal segment time [µs].
pub const NOM_SEGMENT_USEC: f64 = 1500.0;

/// Queued time below which the planner must replan immediately [µs].
pub const MIN_PLANNED_USEC: f64 = 20_000.0;

/// Queued time above which replanning may be deferred [µs].
pub const PHAT_CITY_USEC: f64 = 80_000.0;

/// Maximum time between replans [ms].
pub const PLANNER_TIMEOUT_MS: u64 = 50;

/// Centripetal acceleration used for junction velocity limits [mm/min²].
pub const JUNCTION_ACCELERATION: f64 = 100_000.0;

/// Backward/forward pass pairs allowed per replanning call.
pub const REPLAN_PASS_LIMIT: u8 = 3;

/// Minimum probe travel [mm].
pub const MINIMUM_PROBE_TRAVEL: f64 = 0.254;

/// Default probe input (Z-min switch).
pub const DEFAULT_PROBE_INPUT: u8 = 5;

/// Length below which a move is treated as a no-op [mm].
pub const EPSILON_LENGTH: f64 = 0.0001;

/// Generic floating comparison epsilon.
pub const EPSILON: f64 = 0.00001;

/// Convert microseconds to minutes.
#[inline]
pub const fn usec_to_minutes(usec: f64) -> f64 {
    usec / MICROSECONDS_PER_MINUTE
}

/// Convert minutes to microseconds.
#[inline]
pub const fn minutes_to_usec(minutes: f64) -> f64 {
    minutes * MICROSECONDS_PER_MINUTE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_are_consistent() {
        assert!(MIN_SEGMENT_USEC < NOM_SEGMENT_USEC);
        assert!(MIN_PLANNED_USEC < PHAT_CITY_USEC);
        assert!((PLANNER_TIMEOUT_MS as f64) * 1000.0 < PHAT_CITY_USEC);
        assert!(MOTORS >= 1 && AXES >= 3);
    }

    #[test]
    fn time_conversion() {
        assert_eq!(usec_to_minutes(60_000_000.0), 1.0);
        assert!((minutes_to_usec(usec_to_minutes(1500.0)) - 1500.0).abs() < 1e-9);
    }
}
