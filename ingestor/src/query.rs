//! Read side: state, route and distance for a device, recomputed from stored
//! history on every call.

use crate::classifier::{classify, last_motion_time, MOTION_SCAN_DEPTH};
use crate::distance::path_length_km;
use crate::errors::{Error, Result};
use crate::model::{CurrentState, Device, DistanceReport, GeoPoint, LocationSample};
use crate::store::LocationStore;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_ROUTE_LIMIT: usize = 5000;
pub const MAX_ROUTE_LIMIT: usize = 5000;
pub const MAX_DISTANCE_DAYS: u32 = 365;

pub const NO_MOTION_LABEL: &str = "--:--:--";

#[derive(Clone)]
pub struct TrackingQueries {
    store: Arc<dyn LocationStore>,
}

impl TrackingQueries {
    pub fn new(store: Arc<dyn LocationStore>) -> Self {
        Self { store }
    }

    pub async fn current_state(&self, device_id: i64) -> Result<CurrentState> {
        let recent = self.store.recent_samples(device_id, MOTION_SCAN_DEPTH).await?;
        let latest = recent.first().ok_or_else(|| no_data(device_id))?;

        Ok(CurrentState {
            state: classify(&recent),
            last_update: latest.received_at,
            last_motion: last_motion_time(&recent),
        })
    }

    pub async fn latest_sample(&self, device_id: i64) -> Result<LocationSample> {
        self.store
            .recent_samples(device_id, 1)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| no_data(device_id))
    }

    /// Newest first. `limit` defaults to and is clamped at `MAX_ROUTE_LIMIT`.
    pub async fn recent_samples(
        &self,
        device_id: i64,
        limit: Option<usize>,
    ) -> Result<Vec<LocationSample>> {
        let limit = limit.unwrap_or(DEFAULT_ROUTE_LIMIT).clamp(1, MAX_ROUTE_LIMIT);
        let samples = self.store.recent_samples(device_id, limit).await?;
        if samples.is_empty() {
            return Err(no_data(device_id));
        }
        Ok(samples)
    }

    /// Oldest first, both bounds inclusive. An empty window on a known device
    /// is a valid answer.
    pub async fn samples_in_range(
        &self,
        device_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<LocationSample>> {
        if start > end {
            return Err(Error::Validation(format!(
                "range start {} is after end {}",
                start, end
            )));
        }
        self.require_device(device_id).await?;

        let samples = self.store.samples_in_range(device_id, start, end).await?;
        debug!(device_id, count = samples.len(), "Loaded samples in range");
        Ok(samples)
    }

    pub async fn distance_over_window(&self, device_id: i64, days: u32) -> Result<DistanceReport> {
        self.distance_over_window_at(device_id, days, Utc::now()).await
    }

    async fn distance_over_window_at(
        &self,
        device_id: i64,
        days: u32,
        now: DateTime<Utc>,
    ) -> Result<DistanceReport> {
        if days == 0 || days > MAX_DISTANCE_DAYS {
            return Err(Error::Validation(format!(
                "days must be between 1 and {}, got {}",
                MAX_DISTANCE_DAYS, days
            )));
        }
        self.require_device(device_id).await?;

        let since = now - Duration::days(i64::from(days));
        let points: Vec<GeoPoint> = self
            .store
            .samples_since(device_id, since)
            .await?
            .iter()
            .map(LocationSample::point)
            .collect();

        Ok(DistanceReport {
            km: path_length_km(&points),
            days,
        })
    }

    async fn require_device(&self, device_id: i64) -> Result<Device> {
        self.store
            .get_device(device_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("device {}", device_id)))
    }
}

fn no_data(device_id: i64) -> Error {
    Error::NotFound(format!("no location data for device {}", device_id))
}

/// Display form of a timestamp relative to `now`.
pub fn freshness_label(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let age = now - at;
    if age > Duration::days(7) {
        "> 1 week".to_string()
    } else if age > Duration::days(1) {
        "> 1 day".to_string()
    } else {
        at.format("%H:%M:%S").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::fixtures::t0;
    use crate::model::{MovementState, NewLocationSample};
    use crate::store::MemoryStore;

    fn new_sample(device_id: i64, moving: bool, lat: f64) -> NewLocationSample {
        NewLocationSample {
            device_id,
            device_time: "12:00:00".to_string(),
            latitude: lat,
            longitude: -3.7038,
            altitude: None,
            hdop: Some(1.5),
            moving,
        }
    }

    async fn fixture() -> (Arc<MemoryStore>, i64) {
        let store = Arc::new(MemoryStore::new());
        let device = store.create_shadow_device("Nomada").await.unwrap();
        (store, device.id)
    }

    #[tokio::test]
    async fn test_current_state_not_found_without_samples() {
        let (store, id) = fixture().await;
        let queries = TrackingQueries::new(store);

        assert!(matches!(
            queries.current_state(id).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            queries.latest_sample(id).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            queries.recent_samples(id, None).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_current_state_with_past_motion() {
        let (store, id) = fixture().await;
        for (secs, moving) in [(0, true), (30, true), (60, true), (300, false), (330, false)] {
            store
                .insert_received_at(new_sample(id, moving, 40.0), t0() + Duration::seconds(secs))
                .unwrap();
        }
        let queries = TrackingQueries::new(store);

        let state = queries.current_state(id).await.unwrap();
        assert_eq!(state.state, MovementState::Resting);
        assert_eq!(state.last_update, t0() + Duration::seconds(330));
        assert_eq!(state.last_motion, Some(t0() + Duration::seconds(60)));
    }

    #[tokio::test]
    async fn test_current_state_moving() {
        let (store, id) = fixture().await;
        for secs in [0, 30, 60] {
            store
                .insert_received_at(new_sample(id, true, 40.0), t0() + Duration::seconds(secs))
                .unwrap();
        }
        let queries = TrackingQueries::new(store);

        let state = queries.current_state(id).await.unwrap();
        assert_eq!(state.state, MovementState::Moving);
        assert_eq!(state.last_motion, Some(state.last_update));
    }

    #[tokio::test]
    async fn test_recent_samples_limit_clamped() {
        let (store, id) = fixture().await;
        for secs in 0..4 {
            store
                .insert_received_at(new_sample(id, false, 40.0), t0() + Duration::seconds(secs))
                .unwrap();
        }
        let queries = TrackingQueries::new(store);

        assert_eq!(queries.recent_samples(id, Some(0)).await.unwrap().len(), 1);
        let all = queries.recent_samples(id, None).await.unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].received_at, t0() + Duration::seconds(3));
    }

    #[tokio::test]
    async fn test_samples_in_range_straddling_boundaries() {
        let (store, id) = fixture().await;
        for minutes in [-5, 0, 5, 10, 15] {
            store
                .insert_received_at(new_sample(id, false, 40.0), t0() + Duration::minutes(minutes))
                .unwrap();
        }
        let queries = TrackingQueries::new(store);

        let samples = queries
            .samples_in_range(id, t0(), t0() + Duration::minutes(10))
            .await
            .unwrap();
        let times: Vec<_> = samples.iter().map(|s| s.received_at).collect();
        assert_eq!(
            times,
            vec![t0(), t0() + Duration::minutes(5), t0() + Duration::minutes(10)]
        );
    }

    #[tokio::test]
    async fn test_samples_in_range_rejects_inverted_range() {
        let (store, id) = fixture().await;
        let queries = TrackingQueries::new(store);

        let result = queries
            .samples_in_range(id, t0() + Duration::minutes(1), t0())
            .await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_unknown_device_not_found() {
        let queries = TrackingQueries::new(Arc::new(MemoryStore::new()));

        assert!(matches!(
            queries.samples_in_range(5, t0(), t0()).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            queries.distance_over_window(5, 7).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_distance_over_window_ignores_older_samples() {
        let (store, id) = fixture().await;
        let now = t0();
        // 0.001 degrees of latitude is ~0.11 km
        store
            .insert_received_at(new_sample(id, false, 39.0), now - Duration::days(8))
            .unwrap();
        store
            .insert_received_at(new_sample(id, true, 40.000), now - Duration::days(2))
            .unwrap();
        store
            .insert_received_at(new_sample(id, true, 40.001), now - Duration::days(1))
            .unwrap();
        store
            .insert_received_at(new_sample(id, true, 40.002), now - Duration::hours(1))
            .unwrap();
        let queries = TrackingQueries::new(store);

        let week = queries.distance_over_window_at(id, 7, now).await.unwrap();
        assert_eq!(week, DistanceReport { km: 0.22, days: 7 });

        let month = queries.distance_over_window_at(id, 30, now).await.unwrap();
        assert!(month.km > 100.0);
    }

    #[tokio::test]
    async fn test_distance_includes_samples_stamped_after_now() {
        let (store, id) = fixture().await;
        let now = t0();
        store
            .insert_received_at(new_sample(id, true, 40.00), now - Duration::hours(1))
            .unwrap();
        // store clock running a little ahead of ours
        store
            .insert_received_at(new_sample(id, true, 40.01), now + Duration::seconds(2))
            .unwrap();
        let queries = TrackingQueries::new(store);

        let report = queries.distance_over_window_at(id, 7, now).await.unwrap();
        assert_eq!(report, DistanceReport { km: 1.11, days: 7 });
    }

    #[tokio::test]
    async fn test_distance_days_validated() {
        let (store, id) = fixture().await;
        let queries = TrackingQueries::new(store);

        assert!(matches!(
            queries.distance_over_window(id, 0).await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            queries.distance_over_window(id, MAX_DISTANCE_DAYS + 1).await,
            Err(Error::Validation(_))
        ));
        let empty = queries.distance_over_window(id, 7).await.unwrap();
        assert_eq!(
            serde_json::to_string(&empty).unwrap(),
            r#"{"km":0.0,"days":7}"#
        );
    }

    #[test]
    fn test_freshness_label() {
        let now = t0();
        assert_eq!(freshness_label(now - Duration::days(8), now), "> 1 week");
        assert_eq!(freshness_label(now - Duration::hours(30), now), "> 1 day");
        assert_eq!(freshness_label(now - Duration::minutes(5), now), "11:55:00");
    }
}
