use chrono::{DateTime, Utc};
use rand::Rng;

/// One GPS fix as a field device would report it
#[derive(Debug, Clone)]
pub struct Fix {
    pub device_name: String,
    pub time: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub hdop: f64,
    pub moving: bool,
}

impl Fix {
    /// `name,HH:MM:SS,lat,lon,alt,hdop,moving`
    pub fn to_csv(&self) -> String {
        format!(
            "{},{},{:.6},{:.6},{:.1},{:.1},{}",
            self.device_name,
            self.time.format("%H:%M:%S"),
            self.latitude,
            self.longitude,
            self.altitude,
            self.hdop,
            u8::from(self.moving)
        )
    }
}

/// Random walk around a starting point
pub struct Walk {
    device_name: String,
    latitude: f64,
    longitude: f64,
    step_deg: f64,
    hdop: f64,
    moving: bool,
}

impl Walk {
    pub fn new(
        device_name: String,
        latitude: f64,
        longitude: f64,
        step_deg: f64,
        hdop: f64,
        moving: bool,
    ) -> Self {
        Self {
            device_name,
            latitude,
            longitude,
            step_deg,
            hdop,
            moving,
        }
    }

    pub fn next_fix(&mut self, rng: &mut impl Rng) -> Fix {
        if self.moving {
            self.latitude += rng.gen_range(-self.step_deg..=self.step_deg);
            self.longitude += rng.gen_range(-self.step_deg..=self.step_deg);
        }

        Fix {
            device_name: self.device_name.clone(),
            time: Utc::now(),
            latitude: self.latitude.clamp(-90.0, 90.0),
            longitude: self.longitude.clamp(-180.0, 180.0),
            altitude: 100.0 + rng.gen_range(-2.0..2.0),
            hdop: self.hdop,
            moving: self.moving,
        }
    }
}
