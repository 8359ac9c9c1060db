//! Timestamp conversion between rational time bases.

use std::fmt;

use serde::Serialize;

/// A time base: one timestamp tick lasts `num / den` seconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Rational {
    num: i32,
    den: i32,
}

impl Rational {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    pub fn numerator(&self) -> i32 {
        self.num
    }

    pub fn denominator(&self) -> i32 {
        self.den
    }

    /// A zero or negative component makes the time base unusable for rescaling.
    pub fn is_valid(&self) -> bool {
        self.num > 0 && self.den > 0
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

#[cfg(feature = "ffmpeg")]
impl From<ffmpeg_next::Rational> for Rational {
    fn from(value: ffmpeg_next::Rational) -> Self {
        Self::new(value.numerator(), value.denominator())
    }
}

#[cfg(feature = "ffmpeg")]
impl From<Rational> for ffmpeg_next::Rational {
    fn from(value: Rational) -> Self {
        ffmpeg_next::Rational::new(value.num, value.den)
    }
}

/// How an inexact quotient is turned into an integer tick count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rounding {
    /// Toward zero.
    Zero,
    /// Away from zero.
    Inf,
    /// Toward negative infinity.
    Down,
    /// Toward positive infinity.
    Up,
    /// To the nearest tick, halfway cases away from zero.
    NearInf,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoundingPolicy {
    pub rounding: Rounding,
    /// Leave `i64::MIN` and `i64::MAX` untouched; they mark unset or
    /// open-ended timestamps in most container libraries.
    pub pass_min_max: bool,
}

/// Policy for pts/dts.
pub const TIMESTAMP_ROUNDING: RoundingPolicy = RoundingPolicy {
    rounding: Rounding::NearInf,
    pass_min_max: true,
};

/// Policy for durations, where 0 already means "unknown".
pub const DURATION_ROUNDING: RoundingPolicy = RoundingPolicy {
    rounding: Rounding::NearInf,
    pass_min_max: false,
};

/// Returned when the result does not fit in an `i64` or a time base is unusable.
pub const INVALID_TIMESTAMP: i64 = i64::MIN;

/// Converts `value` ticks of `from` into ticks of `to`.
///
/// The product `value * from * to⁻¹` is formed in 128-bit arithmetic, so
/// no 64-bit timestamp paired with 32-bit time base components can
/// overflow the intermediate. A result outside the `i64` range, or a non
/// positive time base component, yields [`INVALID_TIMESTAMP`].
pub fn rescale(value: i64, from: Rational, to: Rational, policy: RoundingPolicy) -> i64 {
    if policy.pass_min_max && (value == i64::MIN || value == i64::MAX) {
        return value;
    }
    if !from.is_valid() || !to.is_valid() {
        return INVALID_TIMESTAMP;
    }
    if from == to {
        return value;
    }

    let numer = value as i128 * from.num as i128 * to.den as i128;
    let denom = from.den as i128 * to.num as i128;
    let quotient = divide(numer, denom, policy.rounding);

    i64::try_from(quotient).unwrap_or(INVALID_TIMESTAMP)
}

/// Rescales a presentation or decode timestamp. `None` stays `None`, and a
/// timestamp that cannot be represented in `to` becomes `None`.
pub fn rescale_ts(value: Option<i64>, from: Rational, to: Rational) -> Option<i64> {
    value
        .map(|v| rescale(v, from, to, TIMESTAMP_ROUNDING))
        .filter(|v| *v != INVALID_TIMESTAMP)
}

/// Rescales a packet duration. An unrepresentable duration becomes 0 (unknown).
pub fn rescale_duration(value: i64, from: Rational, to: Rational) -> i64 {
    match rescale(value, from, to, DURATION_ROUNDING) {
        INVALID_TIMESTAMP => 0,
        d => d,
    }
}

// `denom` is always positive here.
fn divide(numer: i128, denom: i128, rounding: Rounding) -> i128 {
    let floor = numer.div_euclid(denom);
    let exact = numer.rem_euclid(denom) == 0;
    let ceil = if exact { floor } else { floor + 1 };

    match rounding {
        Rounding::Zero => numer / denom,
        Rounding::Down => floor,
        Rounding::Up => ceil,
        Rounding::Inf => {
            if numer < 0 {
                floor
            } else {
                ceil
            }
        }
        Rounding::NearInf => {
            let magnitude = (2 * numer.abs() + denom) / (2 * denom);
            if numer < 0 { -magnitude } else { magnitude }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MPEG: Rational = Rational::new(1, 90_000);
    const MILLIS: Rational = Rational::new(1, 1_000);
    const AUDIO: Rational = Rational::new(1, 44_100);

    #[test]
    fn test_identity_is_exact() {
        assert_eq!(rescale_ts(Some(90_000), MPEG, MPEG), Some(90_000));
        assert_eq!(rescale_ts(Some(-7), MPEG, MPEG), Some(-7));
        assert_eq!(rescale_duration(3_003, MPEG, MPEG), 3_003);
    }

    #[test]
    fn test_unset_timestamp_stays_unset() {
        assert_eq!(rescale_ts(None, MPEG, MILLIS), None);
        assert_eq!(rescale(i64::MIN, MPEG, MILLIS, TIMESTAMP_ROUNDING), i64::MIN);
        assert_eq!(rescale(i64::MAX, MPEG, MILLIS, TIMESTAMP_ROUNDING), i64::MAX);
    }

    #[test]
    fn test_simple_conversion() {
        assert_eq!(rescale_ts(Some(90_000), MPEG, MILLIS), Some(1_000));
        assert_eq!(rescale_ts(Some(1_000), MILLIS, MPEG), Some(90_000));
        assert_eq!(rescale_duration(3_600, MPEG, MILLIS), 40);
    }

    #[test]
    fn test_near_inf_ties_away_from_zero() {
        // 45 / 90 ms is exactly half a tick.
        assert_eq!(rescale(45, MPEG, MILLIS, TIMESTAMP_ROUNDING), 1);
        assert_eq!(rescale(-45, MPEG, MILLIS, TIMESTAMP_ROUNDING), -1);
        assert_eq!(rescale(44, MPEG, MILLIS, TIMESTAMP_ROUNDING), 0);
        assert_eq!(rescale(-44, MPEG, MILLIS, TIMESTAMP_ROUNDING), 0);
    }

    #[test]
    fn test_rounding_modes() {
        let policy = |rounding| RoundingPolicy {
            rounding,
            pass_min_max: false,
        };
        // 100 / 90 ticks = 1.11...
        assert_eq!(rescale(100, MPEG, MILLIS, policy(Rounding::Zero)), 1);
        assert_eq!(rescale(100, MPEG, MILLIS, policy(Rounding::Up)), 2);
        assert_eq!(rescale(100, MPEG, MILLIS, policy(Rounding::Down)), 1);
        assert_eq!(rescale(100, MPEG, MILLIS, policy(Rounding::Inf)), 2);
        assert_eq!(rescale(-100, MPEG, MILLIS, policy(Rounding::Zero)), -1);
        assert_eq!(rescale(-100, MPEG, MILLIS, policy(Rounding::Down)), -2);
        assert_eq!(rescale(-100, MPEG, MILLIS, policy(Rounding::Up)), -1);
        assert_eq!(rescale(-100, MPEG, MILLIS, policy(Rounding::Inf)), -2);
    }

    #[test]
    fn test_large_values_do_not_overflow() {
        let value = i64::MAX / 2;
        let micros = Rational::new(1, 1_000_000);
        let nanos = Rational::new(1, 1_000_000_000);
        assert_eq!(rescale_ts(Some(value / 1_000), micros, nanos), Some(value / 1_000 * 1_000));
        assert_eq!(
            rescale(value, nanos, micros, TIMESTAMP_ROUNDING),
            (value + 500) / 1_000
        );
    }

    #[test]
    fn test_out_of_range_result_is_invalid() {
        let seconds = Rational::new(1, 1);
        let nanos = Rational::new(1, 1_000_000_000);
        assert_eq!(
            rescale(i64::MAX - 1, seconds, nanos, TIMESTAMP_ROUNDING),
            INVALID_TIMESTAMP
        );
    }

    #[test]
    fn test_overflowing_timestamp_becomes_unset() {
        let seconds = Rational::new(1, 1);
        let nanos = Rational::new(1, 1_000_000_000);
        assert_eq!(rescale_ts(Some(i64::MAX / 2), seconds, nanos), None);
        assert_eq!(rescale_ts(Some(i64::MIN / 2), seconds, nanos), None);
        assert_eq!(rescale_ts(Some(3_000), Rational::new(0, 0), nanos), None);
    }

    #[test]
    fn test_overflowing_duration_becomes_unknown() {
        let seconds = Rational::new(1, 1);
        let nanos = Rational::new(1, 1_000_000_000);
        assert_eq!(rescale_duration(i64::MAX / 2, seconds, nanos), 0);
        assert_eq!(rescale_duration(3_000, Rational::new(0, 0), nanos), 0);
        assert_eq!(rescale_duration(3_000, MPEG, Rational::new(1, 0)), 0);
    }

    #[test]
    fn test_invalid_time_base() {
        assert_eq!(
            rescale(10, Rational::new(0, 1), MPEG, TIMESTAMP_ROUNDING),
            INVALID_TIMESTAMP
        );
        assert_eq!(
            rescale(10, MPEG, Rational::new(1, 0), DURATION_ROUNDING),
            INVALID_TIMESTAMP
        );
    }

    #[test]
    fn test_round_trip_within_one_tick() {
        let bases = [
            MPEG,
            MILLIS,
            AUDIO,
            Rational::new(1, 48_000),
            Rational::new(1001, 30_000),
            Rational::new(1, 25),
            Rational::new(1, 1_000_000),
        ];
        let values = [0i64, 1, -1, 3_003, 90_000, 123_456_789, -987_654_321, 1 << 40];
        for from in bases {
            for to in bases {
                for value in values {
                    let there = rescale(value, from, to, TIMESTAMP_ROUNDING);
                    let back = rescale(there, to, from, TIMESTAMP_ROUNDING);
                    // One tick of the coarser base, expressed in `from` ticks.
                    let tolerance = rescale(1, to, from, RoundingPolicy {
                        rounding: Rounding::Up,
                        pass_min_max: false,
                    })
                    .max(1);
                    assert!(
                        (back - value).abs() <= tolerance,
                        "{} in {} -> {} in {} -> {}",
                        value,
                        from,
                        there,
                        to,
                        back
                    );
                }
            }
        }
    }
}
