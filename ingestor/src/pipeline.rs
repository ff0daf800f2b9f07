use crate::classifier::{classify, WINDOW_LEN};
use crate::codec::FrameCodec;
use crate::errors::{Error, Result, StoreResult};
use crate::gate::{self, GateDecision, PushNotification};
use crate::metrics::{
    ALERTS_SENT_TOTAL, ALERTS_SUPPRESSED_TOTAL, DECODE_FAILURES_TOTAL, DROPPED_FRAMES_TOTAL,
    FRAMES_TOTAL, INGEST_LATENCY_SECONDS, INVALID_RECORDS_TOTAL, NOTIFY_FAILURES_TOTAL,
    SAMPLES_STORED_TOTAL, STORE_RETRIES_TOTAL,
};
use crate::model::{Device, LocationSample, MovementState, PositionRecord};
use crate::notify::Notifier;
use crate::store::LocationStore;
use crate::validate::parse_record;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

pub const DEFAULT_INSERT_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_INSERT_ATTEMPTS,
            delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }
}

/// What happened on the alerting side after a sample was stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertOutcome {
    NotMoving,
    Suppressed,
    Sent,
    NoToken,
    DeliveryFailed,
    /// History could not be read back, so nothing was classified
    Skipped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ingested {
    pub device: Device,
    pub sample: LocationSample,
    pub state: Option<MovementState>,
    pub alert: AlertOutcome,
}

#[derive(Debug)]
pub enum IngestOutcome {
    Stored(Ingested),
    Dropped(Error),
}

impl IngestOutcome {
    pub fn is_stored(&self) -> bool {
        matches!(self, IngestOutcome::Stored(_))
    }
}

/// Decode → persist → classify → notify, one frame at a time.
pub struct IngestPipeline {
    codec: FrameCodec,
    store: Arc<dyn LocationStore>,
    notifier: Arc<dyn Notifier>,
    retry: RetryPolicy,
}

impl IngestPipeline {
    pub fn new(
        codec: FrameCodec,
        store: Arc<dyn LocationStore>,
        notifier: Arc<dyn Notifier>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            codec,
            store,
            notifier,
            retry,
        }
    }

    /// Handle one frame to completion. Every failure is contained here so the
    /// caller can move on to the next frame.
    pub async fn handle_frame(&self, payload: &[u8]) -> IngestOutcome {
        FRAMES_TOTAL.inc();
        let start = Instant::now();

        let outcome = match self.process(payload).await {
            Ok(ingested) => IngestOutcome::Stored(ingested),
            Err(e) => {
                DROPPED_FRAMES_TOTAL.inc();
                match &e {
                    Error::Decode(decode) => {
                        DECODE_FAILURES_TOTAL.inc();
                        warn!(payload = %decode.payload(), "Dropping undecodable frame: {}", e);
                    }
                    Error::Validation(_) => {
                        INVALID_RECORDS_TOTAL.inc();
                        warn!("Dropping invalid record: {}", e);
                    }
                    _ => error!("Dropping frame: {}", e),
                }
                IngestOutcome::Dropped(e)
            }
        };

        INGEST_LATENCY_SECONDS.observe(start.elapsed().as_secs_f64());
        outcome
    }

    async fn process(&self, payload: &[u8]) -> Result<Ingested> {
        let csv = self.codec.decode(payload)?;
        debug!("Decoded record: {}", csv);

        let record = parse_record(&csv)?;
        let (device, sample) = self.store_with_retry(&record).await?;
        SAMPLES_STORED_TOTAL.inc();
        info!(device = %device.name, device_id = device.id, "Stored location sample");

        let (state, alert) = self.evaluate(&device).await;
        Ok(Ingested {
            device,
            sample,
            state,
            alert,
        })
    }

    async fn store_with_retry(&self, record: &PositionRecord) -> Result<(Device, LocationSample)> {
        let mut attempt = 0;

        loop {
            attempt += 1;

            match self.store_record(record).await {
                Ok(stored) => {
                    if attempt > 1 {
                        info!("Sample stored on attempt {}", attempt);
                    }
                    return Ok(stored);
                }
                Err(e) if !e.is_transient() => {
                    return Err(e.into());
                }
                Err(e) => {
                    if attempt >= self.retry.max_attempts {
                        error!(
                            device = %record.device_name,
                            "Failed to store sample after {} attempts: {}",
                            attempt, e
                        );
                        return Err(e.into());
                    }

                    warn!(
                        attempt,
                        "Store busy (attempt {}/{}): {}. Retrying in {:?}...",
                        attempt,
                        self.retry.max_attempts,
                        e,
                        self.retry.delay
                    );
                    STORE_RETRIES_TOTAL.inc();
                    tokio::time::sleep(self.retry.delay).await;
                }
            }
        }
    }

    async fn store_record(&self, record: &PositionRecord) -> StoreResult<(Device, LocationSample)> {
        let device = self.resolve_device(&record.device_name).await?;
        let sample = self
            .store
            .insert_sample(record.clone().into_sample(device.id))
            .await?;
        Ok((device, sample))
    }

    async fn resolve_device(&self, name: &str) -> StoreResult<Device> {
        if let Some(device) = self.store.find_device_by_name(name).await? {
            return Ok(device);
        }

        let device = self.store.create_shadow_device(name).await?;
        info!(device_id = device.id, "Auto-provisioned shadow device {}", name);
        Ok(device)
    }

    /// Classify the newest window and, on a transition into motion, alert.
    /// Failures here are logged only; the sample is already stored.
    async fn evaluate(&self, device: &Device) -> (Option<MovementState>, AlertOutcome) {
        // One extra sample: the gate looks at what preceded the window.
        let recent = match self.store.recent_samples(device.id, WINDOW_LEN + 1).await {
            Ok(recent) => recent,
            Err(e) => {
                warn!(device_id = device.id, "Could not read history to classify: {}", e);
                return (None, AlertOutcome::Skipped);
            }
        };

        let state = classify(&recent);
        if state != MovementState::Moving {
            return (Some(state), AlertOutcome::NotMoving);
        }

        info!(device = %device.name, "Movement detected");
        let alert = match gate::evaluate(recent.get(WINDOW_LEN)) {
            GateDecision::Suppress => {
                ALERTS_SUPPRESSED_TOTAL.inc();
                info!(device = %device.name, "Already moving before this window, not alerting again");
                AlertOutcome::Suppressed
            }
            GateDecision::Fire => self.notify(device).await,
        };
        (Some(state), alert)
    }

    async fn notify(&self, device: &Device) -> AlertOutcome {
        let token = match self.store.get_device(device.id).await {
            Ok(found) => found.and_then(|d| d.notification_token),
            Err(e) => {
                NOTIFY_FAILURES_TOTAL.inc();
                warn!(device_id = device.id, "Could not fetch notification token: {}", e);
                return AlertOutcome::DeliveryFailed;
            }
        };

        let Some(token) = token else {
            info!(device = %device.name, "No notification token registered");
            return AlertOutcome::NoToken;
        };

        match self
            .notifier
            .send(&PushNotification::movement_alert(token))
            .await
        {
            Ok(()) => {
                ALERTS_SENT_TOTAL.inc();
                info!(device = %device.name, "Movement alert sent");
                AlertOutcome::Sent
            }
            Err(e) => {
                NOTIFY_FAILURES_TOTAL.inc();
                error!(device = %device.name, "Failed to send movement alert: {}", e);
                AlertOutcome::DeliveryFailed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{NotifyError, StoreError};
    use crate::notify::MockNotifier;
    use crate::store::{MemoryStore, MockLocationStore};
    use chrono::Utc;
    use mockall::predicate::eq;

    const KEY: &str = "field-key";

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_millis(1),
        }
    }

    fn frame(record: &str) -> Vec<u8> {
        FrameCodec::new(KEY).unwrap().encode(record).into_bytes()
    }

    fn moving_frame(name: &str) -> Vec<u8> {
        frame(&format!("{},12:00:00,40.4168,-3.7038,650.0,1.2,1", name))
    }

    fn resting_frame(name: &str) -> Vec<u8> {
        frame(&format!("{},12:00:00,40.4168,-3.7038,650.0,1.2,0", name))
    }

    fn pipeline(store: Arc<dyn LocationStore>, notifier: Arc<dyn Notifier>) -> IngestPipeline {
        IngestPipeline::new(FrameCodec::new(KEY).unwrap(), store, notifier, fast_retry())
    }

    fn device(id: i64, token: Option<&str>) -> Device {
        Device {
            id,
            name: "Nomada".to_string(),
            notification_token: token.map(str::to_string),
            shadow: true,
            created_at: Utc::now(),
        }
    }

    fn stored_sample(device_id: i64) -> LocationSample {
        LocationSample {
            id: 1,
            device_id,
            device_time: "12:00:00".to_string(),
            latitude: 40.4168,
            longitude: -3.7038,
            altitude: Some(650.0),
            hdop: Some(1.2),
            moving: true,
            received_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_undecodable_frame_dropped() {
        let p = pipeline(Arc::new(MemoryStore::new()), Arc::new(MockNotifier::new()));

        let outcome = p.handle_frame(b"%%% not a frame %%%").await;
        assert!(matches!(outcome, IngestOutcome::Dropped(Error::Decode(_))));
    }

    #[tokio::test]
    async fn test_invalid_record_dropped() {
        let p = pipeline(Arc::new(MemoryStore::new()), Arc::new(MockNotifier::new()));

        let outcome = p.handle_frame(&frame("Nomada,12:00:00,40.4,-3.7")).await;
        assert!(matches!(outcome, IngestOutcome::Dropped(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_first_frame_provisions_shadow_device() {
        let store = Arc::new(MemoryStore::new());
        let p = pipeline(store.clone(), Arc::new(MockNotifier::new()));

        let IngestOutcome::Stored(ingested) = p.handle_frame(&resting_frame("Nomada")).await else {
            panic!("frame was dropped");
        };

        assert!(ingested.device.shadow);
        assert_eq!(ingested.device.name, "Nomada");
        assert_eq!(ingested.sample.device_id, ingested.device.id);
        assert_eq!(ingested.state, Some(MovementState::Resting));
        assert_eq!(ingested.alert, AlertOutcome::NotMoving);
        assert!(store.find_device_by_name("Nomada").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_transition_into_motion_alerts_once() {
        let store = Arc::new(MemoryStore::new());
        let mut notifier = MockNotifier::new();
        notifier
            .expect_send()
            .withf(|push| push.token == "tok-1")
            .times(1)
            .returning(|_| Ok(()));
        let p = pipeline(store.clone(), Arc::new(notifier));

        let IngestOutcome::Stored(first) = p.handle_frame(&resting_frame("Nomada")).await else {
            panic!("frame was dropped");
        };
        store
            .set_notification_token(first.device.id, "tok-1")
            .await
            .unwrap();

        let mut alerts = Vec::new();
        for _ in 0..5 {
            match p.handle_frame(&moving_frame("Nomada")).await {
                IngestOutcome::Stored(ingested) => alerts.push(ingested.alert),
                IngestOutcome::Dropped(e) => panic!("frame was dropped: {}", e),
            }
        }

        assert_eq!(
            alerts,
            vec![
                AlertOutcome::NotMoving,
                AlertOutcome::NotMoving,
                AlertOutcome::Sent,
                AlertOutcome::Suppressed,
                AlertOutcome::Suppressed,
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_token_is_not_an_error() {
        let p = pipeline(Arc::new(MemoryStore::new()), Arc::new(MockNotifier::new()));

        let mut last = None;
        for _ in 0..3 {
            last = Some(p.handle_frame(&moving_frame("Nomada")).await);
        }

        let Some(IngestOutcome::Stored(ingested)) = last else {
            panic!("frame was dropped");
        };
        assert_eq!(ingested.state, Some(MovementState::Moving));
        assert_eq!(ingested.alert, AlertOutcome::NoToken);
    }

    #[tokio::test]
    async fn test_delivery_failure_does_not_fail_ingestion() {
        let store = Arc::new(MemoryStore::new());
        let device = store.create_shadow_device("Nomada").await.unwrap();
        store.set_notification_token(device.id, "tok").await.unwrap();

        let mut notifier = MockNotifier::new();
        notifier.expect_send().times(1).returning(|_| {
            Err(NotifyError::Rejected {
                status: 500,
                body: "boom".to_string(),
            })
        });
        let p = pipeline(store, Arc::new(notifier));

        let mut outcomes = Vec::new();
        for _ in 0..3 {
            outcomes.push(p.handle_frame(&moving_frame("Nomada")).await);
        }

        assert!(outcomes.iter().all(IngestOutcome::is_stored));
        let IngestOutcome::Stored(last) = outcomes.pop().unwrap() else {
            unreachable!();
        };
        assert_eq!(last.alert, AlertOutcome::DeliveryFailed);
    }

    #[tokio::test]
    async fn test_transient_failures_exhaust_then_next_frame_processed() {
        let mut store = MockLocationStore::new();
        let mut seq = mockall::Sequence::new();

        store
            .expect_find_device_by_name()
            .withf(|name| name == "Nomada")
            .returning(|_| Ok(Some(device(7, None))));
        store
            .expect_insert_sample()
            .times(3)
            .in_sequence(&mut seq)
            .returning(|_| Err(StoreError::Transient("connection reset".to_string())));
        store
            .expect_insert_sample()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|s| Ok(stored_sample(s.device_id)));
        store
            .expect_recent_samples()
            .with(eq(7), eq(WINDOW_LEN + 1))
            .returning(|id, _| Ok(vec![stored_sample(id)]));

        let p = pipeline(Arc::new(store), Arc::new(MockNotifier::new()));

        let dropped = p.handle_frame(&moving_frame("Nomada")).await;
        assert!(matches!(
            dropped,
            IngestOutcome::Dropped(Error::Store(StoreError::Transient(_)))
        ));

        let next = p.handle_frame(&moving_frame("Nomada")).await;
        assert!(next.is_stored());
    }

    #[tokio::test]
    async fn test_transient_failure_recovers_within_budget() {
        let mut store = MockLocationStore::new();
        let mut seq = mockall::Sequence::new();

        store
            .expect_find_device_by_name()
            .returning(|_| Ok(Some(device(7, None))));
        store
            .expect_insert_sample()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_| Err(StoreError::Transient("too many connections".to_string())));
        store
            .expect_insert_sample()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|s| Ok(stored_sample(s.device_id)));
        store
            .expect_recent_samples()
            .returning(|id, _| Ok(vec![stored_sample(id)]));

        let p = pipeline(Arc::new(store), Arc::new(MockNotifier::new()));
        assert!(p.handle_frame(&moving_frame("Nomada")).await.is_stored());
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let mut store = MockLocationStore::new();
        store
            .expect_find_device_by_name()
            .returning(|_| Ok(Some(device(7, None))));
        store
            .expect_insert_sample()
            .times(1)
            .returning(|_| Err(StoreError::Permanent("check constraint".to_string())));

        let p = pipeline(Arc::new(store), Arc::new(MockNotifier::new()));

        let outcome = p.handle_frame(&moving_frame("Nomada")).await;
        assert!(matches!(
            outcome,
            IngestOutcome::Dropped(Error::Store(StoreError::Permanent(_)))
        ));
    }

    #[tokio::test]
    async fn test_history_read_failure_keeps_sample() {
        let mut store = MockLocationStore::new();
        store
            .expect_find_device_by_name()
            .returning(|_| Ok(None));
        store
            .expect_create_shadow_device()
            .times(1)
            .returning(|_| Ok(device(9, None)));
        store
            .expect_insert_sample()
            .times(1)
            .returning(|s| Ok(stored_sample(s.device_id)));
        store
            .expect_recent_samples()
            .returning(|_, _| Err(StoreError::Permanent("relation missing".to_string())));

        let p = pipeline(Arc::new(store), Arc::new(MockNotifier::new()));

        let IngestOutcome::Stored(ingested) = p.handle_frame(&moving_frame("Nomada")).await else {
            panic!("frame was dropped");
        };
        assert_eq!(ingested.device.id, 9);
        assert_eq!(ingested.state, None);
        assert_eq!(ingested.alert, AlertOutcome::Skipped);
    }
}
