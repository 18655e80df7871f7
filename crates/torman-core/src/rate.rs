//! Mapping from the bounded rate-control input to a transfer rate
//!
//! The rate controls are exposed to the user as sliders over `[0, 1000]`.
//! A linear mapping would waste most of the range on rates nobody picks, so
//! the curve is piecewise: fine-grained at the low end, coarse at the top.

/// Upper bound of the control range.
pub const CONTROL_MAX: u16 = 1000;

/// Convert a control value in `[0, 1000]` to a rate in kilobytes per second.
///
/// Pure and total: out-of-range input is clamped to the control range before
/// evaluation. Each segment's interval is closed on the left, so boundary
/// values use the higher segment.
pub fn rate_from_control(value: u16) -> u64 {
    let v = value.min(CONTROL_MAX) as f64;
    let rate = if v < 250.0 {
        1.0 + (v * 0.124).floor()
    } else if v < 500.0 {
        32.0 + ((v - 250.0) * 0.384).floor()
    } else if v < 750.0 {
        128.0 + ((v - 500.0) * 1.536).floor()
    } else {
        512.0 + ((v - 750.0) * 6.1445).floor()
    };
    rate as u64
}

/// Convert a control value to a rate limit in bytes per second.
pub fn bytes_per_sec_from_control(value: u16) -> u64 {
    rate_from_control(value) * 1024
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_boundaries() {
        // Left edge and right edge of every segment.
        assert_eq!(rate_from_control(0), 1);
        assert_eq!(rate_from_control(249), 31);
        assert_eq!(rate_from_control(250), 32);
        assert_eq!(rate_from_control(499), 127);
        assert_eq!(rate_from_control(500), 128);
        assert_eq!(rate_from_control(749), 510);
        assert_eq!(rate_from_control(750), 512);
        assert_eq!(rate_from_control(1000), 2048);
    }

    #[test]
    fn out_of_range_is_clamped() {
        assert_eq!(rate_from_control(1001), rate_from_control(1000));
        assert_eq!(rate_from_control(u16::MAX), rate_from_control(1000));
    }

    #[test]
    fn bytes_per_sec_scales_by_1024() {
        assert_eq!(bytes_per_sec_from_control(500), 128 * 1024);
        assert_eq!(bytes_per_sec_from_control(1000), 2048 * 1024);
    }
}
