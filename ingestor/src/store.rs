use crate::errors::{StoreError, StoreResult};
use crate::model::{Device, LocationSample, NewLocationSample};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;

/// Persistence for devices and their position history.
///
/// Every statement is assumed atomic on its own; callers never rely on a
/// transaction spanning several calls.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LocationStore: Send + Sync {
    async fn find_device_by_name(&self, name: &str) -> StoreResult<Option<Device>>;

    async fn get_device(&self, device_id: i64) -> StoreResult<Option<Device>>;

    /// Auto-provision a device seen only through telemetry. Returns the
    /// existing row if another writer created the name first.
    async fn create_shadow_device(&self, name: &str) -> StoreResult<Device>;

    /// Returns false when the device does not exist.
    async fn set_notification_token(&self, device_id: i64, token: &str) -> StoreResult<bool>;

    /// Persist a sample, stamping its receipt time.
    async fn insert_sample(&self, sample: NewLocationSample) -> StoreResult<LocationSample>;

    /// Newest first.
    async fn recent_samples(&self, device_id: i64, limit: usize)
        -> StoreResult<Vec<LocationSample>>;

    /// Samples with `start <= received_at <= end`, oldest first.
    async fn samples_in_range(
        &self,
        device_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<LocationSample>>;

    /// Samples with `received_at >= since`, oldest first. No upper bound, so
    /// rows stamped by a store clock ahead of ours are still returned.
    async fn samples_since(
        &self,
        device_id: i64,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<LocationSample>>;
}

#[derive(Default)]
struct MemoryState {
    devices: Vec<Device>,
    samples: Vec<LocationSample>,
}

/// Process-local store for broker-only runs and tests. Receipt timestamps are
/// kept strictly increasing so insertion order is the ordering key.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert with an explicit receipt time, for replaying history.
    pub fn insert_received_at(
        &self,
        sample: NewLocationSample,
        received_at: DateTime<Utc>,
    ) -> StoreResult<LocationSample> {
        let mut state = self.lock()?;
        if !state.devices.iter().any(|d| d.id == sample.device_id) {
            return Err(StoreError::Permanent(format!(
                "device {} does not exist",
                sample.device_id
            )));
        }

        let stored = LocationSample {
            id: state.samples.len() as i64 + 1,
            device_id: sample.device_id,
            device_time: sample.device_time,
            latitude: sample.latitude,
            longitude: sample.longitude,
            altitude: sample.altitude,
            hdop: sample.hdop,
            moving: sample.moving,
            received_at,
        };
        state.samples.push(stored.clone());
        Ok(stored)
    }

    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| StoreError::Permanent("memory store lock poisoned".to_string()))
    }

    fn next_received_at(&self) -> StoreResult<DateTime<Utc>> {
        let state = self.lock()?;
        let now = Utc::now();
        Ok(match state.samples.iter().map(|s| s.received_at).max() {
            Some(last) if last >= now => last + Duration::microseconds(1),
            _ => now,
        })
    }

    fn sorted_for(&self, device_id: i64) -> StoreResult<Vec<LocationSample>> {
        let state = self.lock()?;
        let mut samples: Vec<LocationSample> = state
            .samples
            .iter()
            .filter(|s| s.device_id == device_id)
            .cloned()
            .collect();
        samples.sort_by(|a, b| a.received_at.cmp(&b.received_at).then(a.id.cmp(&b.id)));
        Ok(samples)
    }
}

#[async_trait]
impl LocationStore for MemoryStore {
    async fn find_device_by_name(&self, name: &str) -> StoreResult<Option<Device>> {
        let state = self.lock()?;
        Ok(state.devices.iter().find(|d| d.name == name).cloned())
    }

    async fn get_device(&self, device_id: i64) -> StoreResult<Option<Device>> {
        let state = self.lock()?;
        Ok(state.devices.iter().find(|d| d.id == device_id).cloned())
    }

    async fn create_shadow_device(&self, name: &str) -> StoreResult<Device> {
        let mut state = self.lock()?;
        if let Some(existing) = state.devices.iter().find(|d| d.name == name) {
            return Ok(existing.clone());
        }

        let device = Device {
            id: state.devices.len() as i64 + 1,
            name: name.to_string(),
            notification_token: None,
            shadow: true,
            created_at: Utc::now(),
        };
        state.devices.push(device.clone());
        Ok(device)
    }

    async fn set_notification_token(&self, device_id: i64, token: &str) -> StoreResult<bool> {
        let mut state = self.lock()?;
        match state.devices.iter_mut().find(|d| d.id == device_id) {
            Some(device) => {
                device.notification_token = Some(token.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_sample(&self, sample: NewLocationSample) -> StoreResult<LocationSample> {
        let received_at = self.next_received_at()?;
        self.insert_received_at(sample, received_at)
    }

    async fn recent_samples(
        &self,
        device_id: i64,
        limit: usize,
    ) -> StoreResult<Vec<LocationSample>> {
        let mut samples = self.sorted_for(device_id)?;
        samples.reverse();
        samples.truncate(limit);
        Ok(samples)
    }

    async fn samples_in_range(
        &self,
        device_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<LocationSample>> {
        let samples = self.sorted_for(device_id)?;
        Ok(samples
            .into_iter()
            .filter(|s| s.received_at >= start && s.received_at <= end)
            .collect())
    }

    async fn samples_since(
        &self,
        device_id: i64,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<LocationSample>> {
        let samples = self.sorted_for(device_id)?;
        Ok(samples
            .into_iter()
            .filter(|s| s.received_at >= since)
            .collect())
    }
}
