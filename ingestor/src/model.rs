use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder credential for devices provisioned from telemetry alone.
/// Not a valid password hash, so it can never verify a login.
pub const SHADOW_CREDENTIAL: &str = "!shadow";
pub const SHADOW_CONTACT: &str = "shadow@devices.invalid";

/// Owner of a telemetry stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Device {
    pub id: i64,
    pub name: String,
    pub notification_token: Option<String>,
    /// Auto-created on first telemetry, without a real registration
    pub shadow: bool,
    pub created_at: DateTime<Utc>,
}

/// One decoded, validated position report, before the store stamps it
#[derive(Debug, Clone, PartialEq)]
pub struct PositionRecord {
    pub device_name: String,
    pub device_time: String,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub hdop: Option<f64>,
    pub moving: bool,
}

impl PositionRecord {
    pub fn into_sample(self, device_id: i64) -> NewLocationSample {
        NewLocationSample {
            device_id,
            device_time: self.device_time,
            latitude: self.latitude,
            longitude: self.longitude,
            altitude: self.altitude,
            hdop: self.hdop,
            moving: self.moving,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewLocationSample {
    pub device_id: i64,
    pub device_time: String,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub hdop: Option<f64>,
    pub moving: bool,
}

/// Stored position report. `received_at` is server-assigned and is the only
/// ordering key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct LocationSample {
    pub id: i64,
    pub device_id: i64,
    pub device_time: String,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub hdop: Option<f64>,
    pub moving: bool,
    pub received_at: DateTime<Utc>,
}

impl LocationSample {
    pub fn point(&self) -> GeoPoint {
        GeoPoint {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Derived from recent history on every read; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MovementState {
    Resting,
    Moving,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentState {
    pub state: MovementState,
    pub last_update: DateTime<Utc>,
    pub last_motion: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistanceReport {
    pub km: f64,
    pub days: u32,
}
