//! Sample types and the telemetry wire format.
//!
//! The device does not provide a trustworthy per-sensor clock, so every sample is
//! stamped with the local arrival time of the message that carried it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One decoded inertial reading.
///
/// Angles are in degrees, gyro channels are raw delta-angle units as reported by
/// the sensor (in its own mounting frame).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub sensor_id: u32,
    /// Local time at which the carrying message arrived
    pub arrival_time: DateTime<Utc>,
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
    pub gyro_x: f64,
    pub gyro_y: f64,
    pub gyro_z: f64,
}

/// Errors raised while decoding a telemetry message.
///
/// These are always per-message: the message is dropped and the stream goes on.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    Json(String),
    #[error("message is not a JSON object")]
    NotAnObject,
    #[error("`sensors` is not an array")]
    SensorsNotArray,
    #[error("reading {index}: missing field `{field}`")]
    MissingField { index: usize, field: &'static str },
    #[error("reading {index}: field `{field}` is not a valid number")]
    InvalidNumber { index: usize, field: &'static str },
}

const SENSOR_ID_KEYS: [&str; 4] = ["SN", "id", "sensor_id", "sn"];

/// Decode one inbound message into samples stamped with `arrival_time`.
///
/// A message is either a single reading or `{"sensors": [reading, ...]}`. One bad
/// reading rejects the whole message.
pub fn decode_message(text: &str, arrival_time: DateTime<Utc>) -> Result<Vec<Sample>, DecodeError> {
    let value: Value = serde_json::from_str(text).map_err(|e| DecodeError::Json(e.to_string()))?;
    let object = value.as_object().ok_or(DecodeError::NotAnObject)?;

    match object.get("sensors") {
        Some(Value::Array(readings)) => readings
            .iter()
            .enumerate()
            .map(|(index, reading)| {
                let reading = reading.as_object().ok_or(DecodeError::NotAnObject)?;
                decode_reading(reading, index, arrival_time)
            })
            .collect(),
        Some(_) => Err(DecodeError::SensorsNotArray),
        None => Ok(vec![decode_reading(object, 0, arrival_time)?]),
    }
}

fn decode_reading(
    reading: &Map<String, Value>,
    index: usize,
    arrival_time: DateTime<Utc>,
) -> Result<Sample, DecodeError> {
    let raw_id = SENSOR_ID_KEYS
        .iter()
        .find_map(|key| reading.get(*key))
        .ok_or(DecodeError::MissingField { index, field: "SN" })?;
    let sensor_id = parse_sensor_id(raw_id).ok_or(DecodeError::InvalidNumber { index, field: "SN" })?;

    let channel = |field: &'static str| -> Result<f64, DecodeError> {
        let value = reading
            .get(field)
            .or_else(|| reading.get(&field.to_ascii_lowercase()))
            .ok_or(DecodeError::MissingField { index, field })?;
        parse_number(value).ok_or(DecodeError::InvalidNumber { index, field })
    };

    Ok(Sample {
        sensor_id,
        arrival_time,
        roll: channel("ROLL")?,
        pitch: channel("PITCH")?,
        yaw: channel("YAW")?,
        gyro_x: channel("X_DEL_ANG")?,
        gyro_y: channel("Y_DEL_ANG")?,
        gyro_z: channel("Z_DEL_ANG")?,
    })
}

fn parse_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    number.filter(|v| v.is_finite())
}

fn parse_sensor_id(value: &Value) -> Option<u32> {
    let id = parse_number(value)?;
    // Some firmware sends ids as floats ("3.0"); anything fractional is rejected.
    if id < 0.0 || id.fract() != 0.0 || id > u32::MAX as f64 {
        return None;
    }
    Some(id as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_single_reading() {
        let now = Utc::now();
        let text = r#"{"SN": 3, "ROLL": 1.5, "PITCH": -2.0, "YAW": 90.0,
                       "X_DEL_ANG": 0.1, "Y_DEL_ANG": 0.2, "Z_DEL_ANG": 0.3}"#;

        let samples = decode_message(text, now).unwrap();
        assert_eq!(samples.len(), 1);
        let s = samples[0];
        assert_eq!(s.sensor_id, 3);
        assert_eq!(s.arrival_time, now);
        assert_eq!(s.roll, 1.5);
        assert_eq!(s.pitch, -2.0);
        assert_eq!(s.yaw, 90.0);
        assert_eq!(s.gyro_x, 0.1);
        assert_eq!(s.gyro_y, 0.2);
        assert_eq!(s.gyro_z, 0.3);
    }

    #[test]
    fn test_decode_sensor_batch() {
        let now = Utc::now();
        let text = r#"{"sensors": [
            {"id": 0, "ROLL": 0, "PITCH": 0, "YAW": 0, "X_DEL_ANG": 0, "Y_DEL_ANG": 0, "Z_DEL_ANG": 0},
            {"id": 1, "roll": 1, "pitch": 2, "yaw": 3, "x_del_ang": 4, "y_del_ang": 5, "z_del_ang": 6}
        ]}"#;

        let samples = decode_message(text, now).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].sensor_id, 0);
        assert_eq!(samples[1].sensor_id, 1);
        assert_eq!(samples[1].gyro_z, 6.0);
        assert!(samples.iter().all(|s| s.arrival_time == now));
    }

    #[test]
    fn test_decode_numeric_strings() {
        let text = r#"{"SN": "2", "ROLL": "1.25", "PITCH": 0, "YAW": 0,
                       "X_DEL_ANG": 0, "Y_DEL_ANG": 0, "Z_DEL_ANG": 0}"#;
        let samples = decode_message(text, Utc::now()).unwrap();
        assert_eq!(samples[0].sensor_id, 2);
        assert_eq!(samples[0].roll, 1.25);
    }

    #[test]
    fn test_decode_rejects_malformed() {
        let now = Utc::now();
        assert!(matches!(decode_message("not json", now), Err(DecodeError::Json(_))));
        assert_eq!(decode_message("[1, 2]", now), Err(DecodeError::NotAnObject));
        assert_eq!(
            decode_message(r#"{"sensors": 5}"#, now),
            Err(DecodeError::SensorsNotArray)
        );
        assert_eq!(
            decode_message(r#"{"SN": 1, "ROLL": 0}"#, now),
            Err(DecodeError::MissingField { index: 0, field: "PITCH" })
        );
        assert_eq!(
            decode_message(
                r#"{"SN": -1, "ROLL": 0, "PITCH": 0, "YAW": 0, "X_DEL_ANG": 0, "Y_DEL_ANG": 0, "Z_DEL_ANG": 0}"#,
                now
            ),
            Err(DecodeError::InvalidNumber { index: 0, field: "SN" })
        );
    }

    #[test]
    fn test_one_bad_reading_rejects_batch() {
        let text = r#"{"sensors": [
            {"id": 0, "ROLL": 0, "PITCH": 0, "YAW": 0, "X_DEL_ANG": 0, "Y_DEL_ANG": 0, "Z_DEL_ANG": 0},
            {"id": 1, "ROLL": "abc", "PITCH": 0, "YAW": 0, "X_DEL_ANG": 0, "Y_DEL_ANG": 0, "Z_DEL_ANG": 0}
        ]}"#;
        assert_eq!(
            decode_message(text, Utc::now()),
            Err(DecodeError::InvalidNumber { index: 1, field: "ROLL" })
        );
    }
}
