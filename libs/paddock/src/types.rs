//! Domain types shared across the replay engine.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One recorded car position sample. Immutable once ingested.
///
/// Field order matches the wire shape of a `TELEMETRY_BATCH` entry; the
/// session key lives in the stream name and never goes on the wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationSample {
    #[serde(skip_serializing)]
    pub session_key: i64,
    pub driver_number: u32,
    pub x: f64,
    pub y: f64,
    pub timestamp: DateTime<Utc>,
}

/// One recorded car performance sample. Immutable once ingested.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CarSample {
    #[serde(skip_serializing)]
    pub session_key: i64,
    pub driver_number: u32,
    pub speed: i32,
    pub rpm: i32,
    pub gear: i32,
    pub throttle: i32,
    pub brake: i32,
    pub timestamp: DateTime<Utc>,
}

/// Closed set of supported playback multipliers.
///
/// Anything outside this set is a validation failure at the protocol edge,
/// so the engine itself never sees an invalid speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackSpeed {
    #[default]
    X1,
    X2,
    X5,
    X10,
}

impl PlaybackSpeed {
    /// Logical-time milliseconds covered per wall-clock millisecond.
    pub fn multiplier(self) -> i64 {
        match self {
            PlaybackSpeed::X1 => 1,
            PlaybackSpeed::X2 => 2,
            PlaybackSpeed::X5 => 5,
            PlaybackSpeed::X10 => 10,
        }
    }

    /// Parse a requested multiplier, rejecting anything outside the set.
    pub fn from_multiplier(value: f64) -> Option<Self> {
        match value {
            v if v == 1.0 => Some(PlaybackSpeed::X1),
            v if v == 2.0 => Some(PlaybackSpeed::X2),
            v if v == 5.0 => Some(PlaybackSpeed::X5),
            v if v == 10.0 => Some(PlaybackSpeed::X10),
            _ => None,
        }
    }
}

impl fmt::Display for PlaybackSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x", self.multiplier())
    }
}

/// Playback lifecycle state of a replay session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStatus {
    Idle,
    Playing,
    Paused,
    Stopped,
    Completed,
}

impl PlaybackStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PlaybackStatus::Idle => "IDLE",
            PlaybackStatus::Playing => "PLAYING",
            PlaybackStatus::Paused => "PAUSED",
            PlaybackStatus::Stopped => "STOPPED",
            PlaybackStatus::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A half-open window of samples shipped to subscribers in one frame.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryBatch {
    pub batch_timestamp: DateTime<Utc>,
    pub locations: Vec<LocationSample>,
    pub car_data: Vec<CarSample>,
}

impl TelemetryBatch {
    pub fn is_empty(&self) -> bool {
        self.locations.is_empty() && self.car_data.is_empty()
    }
}

/// Point-in-time snapshot of a replay session, safe to hand to transports.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayState {
    pub session_key: String,
    pub status: PlaybackStatus,
    pub current_time: DateTime<Utc>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub speed: PlaybackSpeed,
}

impl ReplayState {
    pub fn duration_ms(&self) -> i64 {
        (self.end_time - self.start_time).num_milliseconds()
    }

    pub fn elapsed_ms(&self) -> i64 {
        (self.current_time - self.start_time).num_milliseconds().max(0)
    }
}

/// Events broadcast by the engine to all subscribers of one session.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Batch(Arc<TelemetryBatch>),
    Completed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speed_from_multiplier() {
        assert_eq!(PlaybackSpeed::from_multiplier(1.0), Some(PlaybackSpeed::X1));
        assert_eq!(PlaybackSpeed::from_multiplier(2.0), Some(PlaybackSpeed::X2));
        assert_eq!(PlaybackSpeed::from_multiplier(5.0), Some(PlaybackSpeed::X5));
        assert_eq!(PlaybackSpeed::from_multiplier(10.0), Some(PlaybackSpeed::X10));
        assert_eq!(PlaybackSpeed::from_multiplier(3.0), None);
        assert_eq!(PlaybackSpeed::from_multiplier(0.5), None);
        assert_eq!(PlaybackSpeed::from_multiplier(-1.0), None);
    }

    #[test]
    fn status_wire_names() {
        assert_eq!(PlaybackStatus::Playing.as_str(), "PLAYING");
        assert_eq!(PlaybackStatus::Completed.to_string(), "COMPLETED");
    }

    #[test]
    fn state_elapsed_is_clamped() {
        let start: DateTime<Utc> = "2024-05-12T14:00:00Z".parse().unwrap();
        let end: DateTime<Utc> = "2024-05-12T16:00:00Z".parse().unwrap();
        let state = ReplayState {
            session_key: "9140".to_string(),
            status: PlaybackStatus::Idle,
            current_time: start,
            start_time: start,
            end_time: end,
            speed: PlaybackSpeed::X1,
        };
        assert_eq!(state.elapsed_ms(), 0);
        assert_eq!(state.duration_ms(), 2 * 60 * 60 * 1000);
    }
}
