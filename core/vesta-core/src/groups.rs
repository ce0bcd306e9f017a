//! Fixed sensor-to-group policy and relative temperature classification.
//!
//! Group membership is not stored anywhere; it is derived from the numeric
//! suffix of the sensor id. Changing the split point is a configuration
//! change, never a data migration.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::GroupId;

/// Sensors whose suffix cannot be parsed resolve here.
pub const DEFAULT_GROUP: &str = "group_1";

pub const GROUP_FRONT: &str = "group_1";
pub const GROUP_BACK: &str = "group_2";

static SENSOR_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^sensor_(\d+)$").expect("sensor id regex"));

/// Numeric suffix of a `sensor_N` id, if it has one.
pub fn sensor_number(sensor_id: &str) -> Option<u32> {
    SENSOR_SUFFIX
        .captures(sensor_id)
        .and_then(|caps| caps[1].parse().ok())
}

/// Derives a sensor's group: suffix `N <= split` is the front group, the
/// rest the back group. Unparseable ids resolve to [`DEFAULT_GROUP`].
pub fn group_for_sensor(sensor_id: &str, split: u32) -> GroupId {
    match sensor_number(sensor_id) {
        Some(n) if n > split => GROUP_BACK.to_string(),
        Some(_) => GROUP_FRONT.to_string(),
        None => DEFAULT_GROUP.to_string(),
    }
}

/// Where a sensor sits relative to the device average, for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    High,
    Normal,
    Low,
}

/// Threshold in degrees; differences of exactly this much are Normal.
const CLASSIFY_BAND: f64 = 2.0;

/// Classifies a sensor temperature against the device average.
pub fn classify(sensor_temp: f64, avg_temp: f64) -> Classification {
    let diff = sensor_temp - avg_temp;
    if diff > CLASSIFY_BAND {
        Classification::High
    } else if diff < -CLASSIFY_BAND {
        Classification::Low
    } else {
        Classification::Normal
    }
}
