//! Wire codec for the replay protocol.
//!
//! Every frame is a JSON object `{type, data}`. Commands are validated here
//! so the engine only ever sees well-formed input; events are encoded from
//! engine types into the fixed wire shapes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use paddock::{PlaybackSpeed, ReplayError, ReplayState, TelemetryBatch};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Drain message sent to every client at shutdown.
pub const SHUTDOWN_MESSAGE: &str = "server shutting down";

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<Value>,
}

/// Commands a client may send.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    Subscribe,
    Unsubscribe,
    Play { start_time: Option<DateTime<Utc>> },
    Pause,
    Stop,
    Seek { target_time: DateTime<Utc> },
    Speed { speed: PlaybackSpeed },
    GetState,
}

/// Events the server sends.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    ReplayState(Option<ReplayState>),
    TelemetryBatch(Arc<TelemetryBatch>),
    Subscribed { session_key: String },
    Unsubscribed,
    PlaybackComplete,
    Error { message: String },
}

/// Decode one inbound frame into a command.
pub fn decode_command(text: &str) -> Result<ClientCommand, ReplayError> {
    let frame: RawFrame =
        serde_json::from_str(text).map_err(|e| ReplayError::BadFrame(e.to_string()))?;

    match frame.kind.as_str() {
        "SUBSCRIBE" => Ok(ClientCommand::Subscribe),
        "UNSUBSCRIBE" => Ok(ClientCommand::Unsubscribe),
        "PLAY" => {
            let start_time = match frame.data.as_ref().and_then(|d| d.get("startTime")) {
                None | Some(Value::Null) => None,
                Some(value) => Some(parse_instant(value, "startTime")?),
            };
            Ok(ClientCommand::Play { start_time })
        }
        "PAUSE" => Ok(ClientCommand::Pause),
        "STOP" => Ok(ClientCommand::Stop),
        "SEEK" => {
            let value = frame
                .data
                .as_ref()
                .and_then(|d| d.get("targetTime"))
                .ok_or_else(|| ReplayError::BadFrame("SEEK requires data.targetTime".to_string()))?;
            Ok(ClientCommand::Seek {
                target_time: parse_instant(value, "targetTime")?,
            })
        }
        "SPEED" => {
            let value = frame
                .data
                .as_ref()
                .and_then(|d| d.get("speed"))
                .and_then(Value::as_f64)
                .ok_or_else(|| {
                    ReplayError::BadFrame("SPEED requires numeric data.speed".to_string())
                })?;
            let speed =
                PlaybackSpeed::from_multiplier(value).ok_or(ReplayError::InvalidSpeed(value))?;
            Ok(ClientCommand::Speed { speed })
        }
        "GET_STATE" => Ok(ClientCommand::GetState),
        other => Err(ReplayError::BadFrame(format!("Unknown command: {other}"))),
    }
}

fn parse_instant(value: &Value, field: &str) -> Result<DateTime<Utc>, ReplayError> {
    value
        .as_str()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ReplayError::BadFrame(format!("{field} must be an ISO-8601 timestamp")))
}

/// Wire shape of a `REPLAY_STATE` payload.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayStateData {
    pub session_key: String,
    pub status: String,
    pub current_time: DateTime<Utc>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub speed: SpeedData,
    pub duration_ms: i64,
    pub elapsed_ms: i64,
}

#[derive(Debug, Serialize)]
pub struct SpeedData {
    pub multiplier: i64,
}

impl From<&ReplayState> for ReplayStateData {
    fn from(state: &ReplayState) -> Self {
        Self {
            session_key: state.session_key.clone(),
            status: state.status.to_string(),
            current_time: state.current_time,
            start_time: state.start_time,
            end_time: state.end_time,
            speed: SpeedData {
                multiplier: state.speed.multiplier(),
            },
            duration_ms: state.duration_ms(),
            elapsed_ms: state.elapsed_ms(),
        }
    }
}

/// Encode one outbound event as a JSON frame.
pub fn encode_event(event: &ServerEvent) -> String {
    let frame = match event {
        ServerEvent::ReplayState(state) => json!({
            "type": "REPLAY_STATE",
            "data": state.as_ref().map(ReplayStateData::from),
        }),
        ServerEvent::TelemetryBatch(batch) => json!({
            "type": "TELEMETRY_BATCH",
            "data": batch.as_ref(),
        }),
        ServerEvent::Subscribed { session_key } => json!({
            "type": "SUBSCRIBED",
            "data": { "sessionKey": session_key },
        }),
        ServerEvent::Unsubscribed => json!({
            "type": "UNSUBSCRIBED",
            "data": Value::Null,
        }),
        ServerEvent::PlaybackComplete => json!({
            "type": "PLAYBACK_COMPLETE",
            "data": Value::Null,
        }),
        ServerEvent::Error { message } => json!({
            "type": "ERROR",
            "data": { "message": message },
        }),
    };
    frame.to_string()
}
