//! Connection quality estimate.
//!
//! A single ping sample: the client records its clock, asks the server for its
//! clock, and scores the difference. Clock skew can make the delta negative;
//! that scores as the best bucket.

/// Quality recorded when the ping round trip fails or the reply is not a timestamp
pub const QUALITY_FAILURE: i32 = -1;

/// Upper bounds (exclusive, milliseconds) and the score for deltas below them
const QUALITY_BUCKETS: &[(i64, i32)] = &[
    (10, 100),
    (50, 90),
    (100, 80),
    (200, 70),
    (500, 60),
    (1_000, 50),
    (2_000, 40),
    (5_000, 30),
    (10_000, 20),
    (20_000, 10),
];

/// Score at or beyond the last bucket
const QUALITY_WORST: i32 = 1;

/// Map a latency sample in milliseconds to a 1-100 quality score
pub fn quality_for_delta(delta_ms: i64) -> i32 {
    QUALITY_BUCKETS
        .iter()
        .find(|(upper, _)| delta_ms < *upper)
        .map(|(_, quality)| *quality)
        .unwrap_or(QUALITY_WORST)
}
