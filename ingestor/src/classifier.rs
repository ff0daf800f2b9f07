//! Motion classification over recent position history.
//!
//! Both the ingest path and the read API call into these functions with a
//! newest-first slice of samples, so the two decision points cannot drift.

use crate::model::{LocationSample, MovementState};
use chrono::{DateTime, Duration, Utc};

/// Fixes at or above this HDOP never count as evidence of motion.
pub const HDOP_THRESHOLD: f64 = 5.5;

pub const WINDOW_LEN: usize = 3;

/// Widest span, oldest to newest, for a window to be considered contiguous.
pub const MAX_WINDOW_SPAN_SECS: i64 = 180;

/// How far back `last_motion_time` looks.
pub const MOTION_SCAN_DEPTH: usize = 50;

/// Classify from the most recent samples, newest first. Only the first
/// `WINDOW_LEN` samples are considered.
pub fn classify(newest_first: &[LocationSample]) -> MovementState {
    match newest_first.get(..WINDOW_LEN) {
        Some(window) if is_moving_window(window) => MovementState::Moving,
        _ => MovementState::Resting,
    }
}

/// A window is moving when it holds exactly `WINDOW_LEN` samples that all
/// report motion with a trustworthy fix, received within
/// `MAX_WINDOW_SPAN_SECS` of each other.
pub fn is_moving_window(window: &[LocationSample]) -> bool {
    if window.len() != WINDOW_LEN {
        return false;
    }

    if !window.iter().all(is_trusted_motion) {
        return false;
    }

    let newest = window[0].received_at;
    let oldest = window[WINDOW_LEN - 1].received_at;
    within_span(newest, oldest)
}

/// Receipt time of the newest sample of the most recent moving window among
/// the last `MOTION_SCAN_DEPTH` samples.
pub fn last_motion_time(newest_first: &[LocationSample]) -> Option<DateTime<Utc>> {
    let depth = newest_first.len().min(MOTION_SCAN_DEPTH);
    newest_first[..depth]
        .windows(WINDOW_LEN)
        .find(|window| is_moving_window(window))
        .map(|window| window[0].received_at)
}

fn is_trusted_motion(sample: &LocationSample) -> bool {
    sample.moving && sample.hdop.is_some_and(|hdop| hdop < HDOP_THRESHOLD)
}

fn within_span(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    let span = a.signed_duration_since(b).abs();
    span <= Duration::seconds(MAX_WINDOW_SPAN_SECS)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::model::LocationSample;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    pub fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    pub fn sample(offset_secs: i64, moving: bool, hdop: Option<f64>) -> LocationSample {
        let received_at = t0() + Duration::seconds(offset_secs);
        LocationSample {
            id: offset_secs,
            device_id: 1,
            device_time: received_at.format("%H:%M:%S").to_string(),
            latitude: 40.4168,
            longitude: -3.7038,
            altitude: Some(650.0),
            hdop,
            moving,
            received_at,
        }
    }

    /// Oldest-first input, returned newest-first as the store would.
    pub fn newest_first(mut samples: Vec<LocationSample>) -> Vec<LocationSample> {
        samples.reverse();
        samples
    }
}
