//! Adapter over the external append-only stream store.
//!
//! Records are keyed `telemetry:location:<sessionKey>` and
//! `telemetry:cardata:<sessionKey>`, with string fields per record. Range
//! reads are inclusive below and exclusive above, filtered by the `timestamp`
//! field inside each record's payload; the stream's native record id is an
//! ingestion-time id unrelated to sample time.

mod redis;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{CarSample, LocationSample};

pub use redis::RedisTelemetryStore;

const LOCATION_KEY_PREFIX: &str = "telemetry:location:";
const CARDATA_KEY_PREFIX: &str = "telemetry:cardata:";

/// Stream key for a session's position samples.
pub fn location_stream_key(session_key: &str) -> String {
    format!("{LOCATION_KEY_PREFIX}{session_key}")
}

/// Stream key for a session's car performance samples.
pub fn cardata_stream_key(session_key: &str) -> String {
    format!("{CARDATA_KEY_PREFIX}{session_key}")
}

/// Read access to the telemetry stream store.
///
/// Connectivity failures degrade: range reads return empty (never partial),
/// lengths return 0, existence returns false. The adapter enforces its own
/// read deadline and never blocks indefinitely.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// Location samples with `start <= timestamp < end`, ascending by timestamp.
    async fn read_locations(
        &self,
        session_key: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<LocationSample>;

    /// Car samples with `start <= timestamp < end`, ascending by timestamp.
    async fn read_car_data(
        &self,
        session_key: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<CarSample>;

    /// Number of records in a stream, 0 on failure.
    async fn stream_length(&self, stream_key: &str) -> i64;

    /// Whether the stream exists, false on failure.
    async fn stream_exists(&self, stream_key: &str) -> bool;

    /// Timestamp of the oldest record, if any.
    async fn first_timestamp(&self, stream_key: &str) -> Option<DateTime<Utc>>;

    /// Timestamp of the newest record, if any.
    async fn last_timestamp(&self, stream_key: &str) -> Option<DateTime<Utc>>;
}

/// Parse the `timestamp` payload field. `None` means the record is dropped.
pub(crate) fn parse_timestamp(fields: &HashMap<String, String>) -> Option<DateTime<Utc>> {
    fields.get("timestamp")?.parse::<DateTime<Utc>>().ok()
}

fn field_i32(fields: &HashMap<String, String>, name: &str) -> i32 {
    fields.get(name).and_then(|v| v.parse().ok()).unwrap_or(0)
}

fn field_u32(fields: &HashMap<String, String>, name: &str) -> u32 {
    fields.get(name).and_then(|v| v.parse().ok()).unwrap_or(0)
}

fn field_f64(fields: &HashMap<String, String>, name: &str) -> f64 {
    fields.get(name).and_then(|v| v.parse().ok()).unwrap_or(0.0)
}

/// Decode a location record. Malformed numeric fields degrade to 0 / 0.0;
/// a missing or unparseable timestamp drops the record.
pub(crate) fn parse_location(
    session_key: i64,
    fields: &HashMap<String, String>,
) -> Option<LocationSample> {
    let timestamp = parse_timestamp(fields)?;
    Some(LocationSample {
        session_key,
        driver_number: field_u32(fields, "driver_number"),
        x: field_f64(fields, "x"),
        y: field_f64(fields, "y"),
        timestamp,
    })
}

/// Decode a car data record, same degradation policy as locations.
pub(crate) fn parse_car_data(
    session_key: i64,
    fields: &HashMap<String, String>,
) -> Option<CarSample> {
    let timestamp = parse_timestamp(fields)?;
    Some(CarSample {
        session_key,
        driver_number: field_u32(fields, "driver_number"),
        speed: field_i32(fields, "speed"),
        rpm: field_i32(fields, "rpm"),
        gear: field_i32(fields, "gear"),
        throttle: field_i32(fields, "throttle"),
        brake: field_i32(fields, "brake"),
        timestamp,
    })
}
