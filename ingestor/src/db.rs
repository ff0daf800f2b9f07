use crate::errors::{Result, StoreResult};
use crate::model::{Device, LocationSample, NewLocationSample, SHADOW_CONTACT, SHADOW_CREDENTIAL};
use crate::store::LocationStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{debug, info};

const DEVICE_COLUMNS: &str = "id, name, notification_token, shadow, created_at";
const SAMPLE_COLUMNS: &str =
    "id, device_id, device_time, latitude, longitude, altitude, hdop, moving, received_at";

pub async fn make_pool(database_url: &str) -> Result<PgPool> {
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;

    info!("Database connection established");
    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations completed");

    Ok(pool)
}

#[derive(Clone)]
pub struct PgLocationStore {
    pool: PgPool,
}

impl PgLocationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LocationStore for PgLocationStore {
    async fn find_device_by_name(&self, name: &str) -> StoreResult<Option<Device>> {
        let query = format!("SELECT {} FROM devices WHERE name = $1", DEVICE_COLUMNS);
        let device = sqlx::query_as::<_, Device>(&query)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(device)
    }

    async fn get_device(&self, device_id: i64) -> StoreResult<Option<Device>> {
        let query = format!("SELECT {} FROM devices WHERE id = $1", DEVICE_COLUMNS);
        let device = sqlx::query_as::<_, Device>(&query)
            .bind(device_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(device)
    }

    async fn create_shadow_device(&self, name: &str) -> StoreResult<Device> {
        // The no-op update makes RETURNING yield the row a concurrent writer won with.
        let query = format!(
            r#"
            INSERT INTO devices (name, password_hash, contact_email, shadow)
            VALUES ($1, $2, $3, TRUE)
            ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
            RETURNING {}
            "#,
            DEVICE_COLUMNS
        );
        let device = sqlx::query_as::<_, Device>(&query)
            .bind(name)
            .bind(SHADOW_CREDENTIAL)
            .bind(SHADOW_CONTACT)
            .fetch_one(&self.pool)
            .await?;

        debug!(device_id = device.id, "Provisioned shadow device {}", name);
        Ok(device)
    }

    async fn set_notification_token(&self, device_id: i64, token: &str) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE devices SET notification_token = $2 WHERE id = $1")
            .bind(device_id)
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_sample(&self, sample: NewLocationSample) -> StoreResult<LocationSample> {
        let query = format!(
            r#"
            INSERT INTO location_samples
                (device_id, device_time, latitude, longitude, altitude, hdop, moving, received_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, clock_timestamp())
            RETURNING {}
            "#,
            SAMPLE_COLUMNS
        );
        let stored = sqlx::query_as::<_, LocationSample>(&query)
            .bind(sample.device_id)
            .bind(&sample.device_time)
            .bind(sample.latitude)
            .bind(sample.longitude)
            .bind(sample.altitude)
            .bind(sample.hdop)
            .bind(sample.moving)
            .fetch_one(&self.pool)
            .await?;
        Ok(stored)
    }

    async fn recent_samples(
        &self,
        device_id: i64,
        limit: usize,
    ) -> StoreResult<Vec<LocationSample>> {
        let query = format!(
            "SELECT {} FROM location_samples
             WHERE device_id = $1
             ORDER BY received_at DESC, id DESC
             LIMIT $2",
            SAMPLE_COLUMNS
        );
        let samples = sqlx::query_as::<_, LocationSample>(&query)
            .bind(device_id)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        Ok(samples)
    }

    async fn samples_in_range(
        &self,
        device_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<LocationSample>> {
        let query = format!(
            "SELECT {} FROM location_samples
             WHERE device_id = $1 AND received_at BETWEEN $2 AND $3
             ORDER BY received_at ASC, id ASC",
            SAMPLE_COLUMNS
        );
        let samples = sqlx::query_as::<_, LocationSample>(&query)
            .bind(device_id)
            .bind(start)
            .bind(end)
            .fetch_all(&self.pool)
            .await?;
        Ok(samples)
    }

    async fn samples_since(
        &self,
        device_id: i64,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<LocationSample>> {
        let query = format!(
            "SELECT {} FROM location_samples
             WHERE device_id = $1 AND received_at >= $2
             ORDER BY received_at ASC, id ASC",
            SAMPLE_COLUMNS
        );
        let samples = sqlx::query_as::<_, LocationSample>(&query)
            .bind(device_id)
            .bind(since)
            .fetch_all(&self.pool)
            .await?;
        Ok(samples)
    }
}
