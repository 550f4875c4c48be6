//! Durations as explicit-unit text ("30s", "5ms", "150us")
//!
//! Every duration the checkup reads or publishes goes through this module so
//! that inputs, logs and the result sink agree on one representation.

use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

/// Render a duration with explicit units
pub fn format(duration: Duration) -> String {
    humantime::format_duration(duration).to_string()
}

/// Parse text such as `30s`, `1m 30s` or `5ms`
pub fn parse(text: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(text.trim())
}

/// Milliseconds expressed as a float, rounded to the nearest nanosecond
pub fn from_millis_f64(millis: f64) -> Duration {
    Duration::from_nanos((millis * 1_000_000.0).round().max(0.0) as u64)
}

pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format(*duration))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    parse(&text).map_err(serde::de::Error::custom)
}
