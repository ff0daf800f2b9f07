use crate::errors::{Error, Result};
use crate::model::PositionRecord;

pub const FIELD_COUNT: usize = 7;

const LAT_MIN: f64 = -90.0;
const LAT_MAX: f64 = 90.0;
const LON_MIN: f64 = -180.0;
const LON_MAX: f64 = 180.0;

/// Parses a decoded `name,HH:MM:SS,lat,lon,alt,hdop,moving` record.
pub fn parse_record(csv: &str) -> Result<PositionRecord> {
    let fields: Vec<&str> = csv.trim().split(',').map(str::trim).collect();
    if fields.len() != FIELD_COUNT {
        return Err(Error::Validation(format!(
            "expected {} fields, got {}: {:?}",
            FIELD_COUNT,
            fields.len(),
            csv
        )));
    }

    let device_name = fields[0];
    if device_name.is_empty() {
        return Err(Error::Validation("Device name cannot be empty".to_string()));
    }

    let latitude = parse_float("latitude", fields[2])?;
    let longitude = parse_float("longitude", fields[3])?;
    let altitude = parse_float("altitude", fields[4])?;
    let hdop = parse_float("hdop", fields[5])?;
    let moving = fields[6]
        .parse::<i64>()
        .map_err(|_| Error::Validation(format!("motion flag {:?} is not an integer", fields[6])))?
        == 1;

    // Validate latitude
    if !(LAT_MIN..=LAT_MAX).contains(&latitude) {
        return Err(Error::Validation(format!(
            "Latitude {} out of range [{}, {}]",
            latitude, LAT_MIN, LAT_MAX
        )));
    }

    // Validate longitude
    if !(LON_MIN..=LON_MAX).contains(&longitude) {
        return Err(Error::Validation(format!(
            "Longitude {} out of range [{}, {}]",
            longitude, LON_MIN, LON_MAX
        )));
    }

    Ok(PositionRecord {
        device_name: device_name.to_string(),
        device_time: fields[1].to_string(),
        latitude,
        longitude,
        altitude: Some(altitude),
        hdop: Some(hdop),
        moving,
    })
}

fn parse_float(name: &str, raw: &str) -> Result<f64> {
    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(Error::Validation(format!(
            "{} {:?} is not a finite number",
            name, raw
        ))),
    }
}
