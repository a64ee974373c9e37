//! Time-base conversion helpers.
//!
//! All pipeline timestamps are microseconds in `i64`. Container timescales
//! are converted once, at the demux boundary.

/// Convert a value in a declared timescale into microseconds.
///
/// Computed in `i128` so large `value × 1_000_000` products cannot wrap.
#[must_use]
pub fn scaled_to_micros(value: u64, timescale: u32) -> i64 {
    if timescale == 0 {
        return 0;
    }
    (i128::from(value) * 1_000_000 / i128::from(timescale)) as i64
}

/// Microseconds to floating seconds (sink-facing unit).
#[must_use]
pub fn micros_to_secs(us: i64) -> f64 {
    us as f64 / 1_000_000.0
}

/// Floating seconds to microseconds, truncating.
#[must_use]
pub fn secs_to_micros(secs: f64) -> i64 {
    (secs * 1_000_000.0) as i64
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::millis(2_000, 1_000, 2_000_000)]
    #[case::track_90k(90_000, 90_000, 1_000_000)]
    #[case::track_48k(1_024, 48_000, 21_333)]
    #[case::zero_timescale(5, 0, 0)]
    fn scaled_conversion(#[case] value: u64, #[case] timescale: u32, #[case] expected: i64) {
        assert_eq!(scaled_to_micros(value, timescale), expected);
    }

    #[test]
    fn large_values_do_not_overflow() {
        // 24 h of a 10 MHz timescale.
        let v = 864_000_000_000u64;
        assert_eq!(scaled_to_micros(v, 10_000_000), 86_400_000_000);
    }

    #[test]
    fn seconds_round_trip_at_micro_precision() {
        let us = 3_100_000;
        assert_eq!(secs_to_micros(micros_to_secs(us)), us);
    }
}
