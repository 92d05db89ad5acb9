//! Serde helpers for durations written as (fractional) seconds

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(value.as_secs_f64())
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let secs = f64::deserialize(deserializer)?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(D::Error::custom(format!(
            "duration must be a non-negative number of seconds, got {secs}"
        )));
    }
    Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
}
