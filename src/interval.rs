//
// Copyright (c) The BFD Contributors
//
// SPDX-License-Identifier: MIT
//

//! Interval arithmetic shared by the Control and Echo timing disciplines:
//! the well-known interval set, jitter, and microsecond/`Duration`
//! conversions (RFC 5880, Section 6.8.7).

use std::time::Duration;

use rand::Rng;

// Well-known BFD transmit intervals, ascending.
pub const COMMON_INTERVALS: [Duration; 6] = [
    Duration::from_micros(3_300),
    Duration::from_millis(10),
    Duration::from_millis(20),
    Duration::from_millis(50),
    Duration::from_millis(100),
    Duration::from_secs(1),
];

// Returns whether `d` is exactly one of the well-known intervals.
pub fn is_common_interval(d: Duration) -> bool {
    COMMON_INTERVALS.contains(&d)
}

// Rounds `d` up to the next well-known interval. Values above 1 second, or
// non-positive, are returned unchanged.
pub fn align_to_common_interval(d: Duration) -> Duration {
    if d.is_zero() || d > *COMMON_INTERVALS.last().unwrap() {
        return d;
    }
    *COMMON_INTERVALS
        .iter()
        .find(|&&interval| interval >= d)
        .unwrap()
}

// Returns the well-known interval closest to `d`. Ties favor the smaller
// interval. Non-positive values map to the smallest entry.
pub fn nearest_common_interval(d: Duration) -> Duration {
    if d.is_zero() {
        return COMMON_INTERVALS[0];
    }
    *COMMON_INTERVALS
        .iter()
        .min_by_key(|&&interval| {
            let diff = if interval > d {
                interval - d
            } else {
                d - interval
            };
            // Bias exact ties toward the smaller candidate by breaking on
            // interval as a secondary key.
            (diff, interval)
        })
        .unwrap()
}

// Applies RFC 5880's transmit jitter: the result is `interval` scaled down
// by a uniformly random percentage in [0, 25) when `detect_mult > 1`, or
// [10, 25) when `detect_mult == 1` (Section 6.8.7 forbids two consecutive
// packets within 75% of the interval when Detect Mult is 1).
pub fn apply_jitter(interval: Duration, detect_mult: u8) -> Duration {
    let percent = if detect_mult > 1 {
        rand::rng().random_range(0..25)
    } else {
        rand::rng().random_range(10..25)
    };
    interval * (100 - percent) / 100
}

// Converts a `Duration` to a wire-format microsecond count, truncating any
// sub-microsecond remainder and saturating at `u32::MAX`.
pub fn microseconds_from_duration(d: Duration) -> u32 {
    u32::try_from(d.as_micros()).unwrap_or(u32::MAX)
}

// Converts a wire-format microsecond count to a `Duration`.
pub fn duration_from_microseconds(us: u32) -> Duration {
    Duration::from_micros(us as u64)
}
