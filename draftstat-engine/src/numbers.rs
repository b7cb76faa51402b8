//! Numeric conversion helpers centralizing safe numeric casts.

use num_traits::cast::cast;

/// Convert a counter to f64 while allowing precision loss in a single location.
#[must_use]
pub fn u64_to_f64(value: u64) -> f64 {
    cast::<u64, f64>(value).unwrap_or(0.0)
}

/// Convert a length to f64, saturating through `u64`.
#[must_use]
pub fn usize_to_f64(value: usize) -> f64 {
    u64_to_f64(cast::<usize, u64>(value).unwrap_or(u64::MAX))
}

/// Divide two counters, returning 0.0 when the denominator is zero.
#[must_use]
pub fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    u64_to_f64(numerator) / u64_to_f64(denominator)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_guards_zero_denominator() {
        assert!((ratio(3, 0) - 0.0).abs() < f64::EPSILON);
        assert!((ratio(1, 4) - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn conversions_cover_ranges() {
        assert!((u64_to_f64(9) - 9.0).abs() < f64::EPSILON);
        assert!((usize_to_f64(12) - 12.0).abs() < f64::EPSILON);
    }
}
