//! Wire codec tests: command decoding, validation, and event frame shapes.

use std::sync::Arc;

use paddock::{PlaybackSpeed, PlaybackStatus, ReplayError, ReplayState, TelemetryBatch};
use replay_server::ws::protocol::{decode_command, encode_event, ClientCommand, ServerEvent};
use serde_json::{json, Value};

#[test]
fn decodes_bare_commands() {
    assert_eq!(
        decode_command(r#"{"type":"SUBSCRIBE"}"#).unwrap(),
        ClientCommand::Subscribe
    );
    assert_eq!(
        decode_command(r#"{"type":"PAUSE"}"#).unwrap(),
        ClientCommand::Pause
    );
    assert_eq!(
        decode_command(r#"{"type":"STOP"}"#).unwrap(),
        ClientCommand::Stop
    );
    assert_eq!(
        decode_command(r#"{"type":"GET_STATE"}"#).unwrap(),
        ClientCommand::GetState
    );
    assert_eq!(
        decode_command(r#"{"type":"UNSUBSCRIBE","data":{}}"#).unwrap(),
        ClientCommand::Unsubscribe
    );
}

#[test]
fn decodes_play_with_and_without_start() {
    assert_eq!(
        decode_command(r#"{"type":"PLAY"}"#).unwrap(),
        ClientCommand::Play { start_time: None }
    );
    assert_eq!(
        decode_command(r#"{"type":"PLAY","data":{"startTime":null}}"#).unwrap(),
        ClientCommand::Play { start_time: None }
    );

    let cmd = decode_command(r#"{"type":"PLAY","data":{"startTime":"2024-05-12T14:00:00Z"}}"#)
        .unwrap();
    assert_eq!(
        cmd,
        ClientCommand::Play {
            start_time: Some("2024-05-12T14:00:00Z".parse().unwrap())
        }
    );
}

#[test]
fn decodes_seek() {
    let cmd = decode_command(r#"{"type":"SEEK","data":{"targetTime":"2024-05-12T15:30:00Z"}}"#)
        .unwrap();
    assert_eq!(
        cmd,
        ClientCommand::Seek {
            target_time: "2024-05-12T15:30:00Z".parse().unwrap()
        }
    );

    assert!(matches!(
        decode_command(r#"{"type":"SEEK"}"#),
        Err(ReplayError::BadFrame(_))
    ));
    assert!(matches!(
        decode_command(r#"{"type":"SEEK","data":{"targetTime":"tomorrow"}}"#),
        Err(ReplayError::BadFrame(_))
    ));
}

#[test]
fn speed_outside_closed_set_is_rejected() {
    let cmd = decode_command(r#"{"type":"SPEED","data":{"speed":5}}"#).unwrap();
    assert_eq!(
        cmd,
        ClientCommand::Speed {
            speed: PlaybackSpeed::X5
        }
    );

    assert!(matches!(
        decode_command(r#"{"type":"SPEED","data":{"speed":3}}"#),
        Err(ReplayError::InvalidSpeed(v)) if v == 3.0
    ));
    assert!(matches!(
        decode_command(r#"{"type":"SPEED","data":{"speed":"fast"}}"#),
        Err(ReplayError::BadFrame(_))
    ));
    assert!(matches!(
        decode_command(r#"{"type":"SPEED"}"#),
        Err(ReplayError::BadFrame(_))
    ));
}

#[test]
fn unknown_type_is_an_unknown_command() {
    let err = decode_command(r#"{"type":"REWIND"}"#).unwrap_err();
    assert!(matches!(&err, ReplayError::BadFrame(m) if m.contains("Unknown command")));
}

#[test]
fn garbage_is_a_bad_frame() {
    assert!(matches!(
        decode_command("not json"),
        Err(ReplayError::BadFrame(_))
    ));
    assert!(matches!(
        decode_command(r#"{"data":{}}"#),
        Err(ReplayError::BadFrame(_))
    ));
}

#[test]
fn encodes_replay_state() {
    let state = ReplayState {
        session_key: "9140".to_string(),
        status: PlaybackStatus::Playing,
        current_time: "2024-05-12T14:30:00Z".parse().unwrap(),
        start_time: "2024-05-12T14:00:00Z".parse().unwrap(),
        end_time: "2024-05-12T16:00:00Z".parse().unwrap(),
        speed: PlaybackSpeed::X2,
    };
    let frame: Value =
        serde_json::from_str(&encode_event(&ServerEvent::ReplayState(Some(state)))).unwrap();

    assert_eq!(frame["type"], "REPLAY_STATE");
    assert_eq!(frame["data"]["sessionKey"], "9140");
    assert_eq!(frame["data"]["status"], "PLAYING");
    assert_eq!(frame["data"]["speed"]["multiplier"], 2);
    assert_eq!(frame["data"]["durationMs"], 7_200_000);
    assert_eq!(frame["data"]["elapsedMs"], 1_800_000);
}

#[test]
fn encodes_null_replay_state() {
    let frame: Value =
        serde_json::from_str(&encode_event(&ServerEvent::ReplayState(None))).unwrap();
    assert_eq!(frame["type"], "REPLAY_STATE");
    assert!(frame["data"].is_null());
}

#[test]
fn encodes_telemetry_batch() {
    let batch = TelemetryBatch {
        batch_timestamp: "2024-05-12T14:00:00Z".parse().unwrap(),
        locations: vec![paddock::LocationSample {
            session_key: 9140,
            driver_number: 44,
            x: 1.5,
            y: -2.5,
            timestamp: "2024-05-12T14:00:00.050Z".parse().unwrap(),
        }],
        car_data: vec![],
    };
    let frame: Value =
        serde_json::from_str(&encode_event(&ServerEvent::TelemetryBatch(Arc::new(batch))))
            .unwrap();

    assert_eq!(frame["type"], "TELEMETRY_BATCH");
    assert_eq!(frame["data"]["locations"][0]["driverNumber"], 44);
    assert_eq!(frame["data"]["locations"][0]["x"], 1.5);
    // the stream key owns the session; it never appears per sample
    assert!(frame["data"]["locations"][0].get("sessionKey").is_none());
    assert_eq!(frame["data"]["carData"], json!([]));
}

#[test]
fn encodes_terminal_events() {
    let frame: Value =
        serde_json::from_str(&encode_event(&ServerEvent::PlaybackComplete)).unwrap();
    assert_eq!(frame["type"], "PLAYBACK_COMPLETE");
    assert!(frame["data"].is_null());

    let frame: Value = serde_json::from_str(&encode_event(&ServerEvent::Error {
        message: "Unknown session: 1".to_string(),
    }))
    .unwrap();
    assert_eq!(frame["type"], "ERROR");
    assert_eq!(frame["data"]["message"], "Unknown session: 1");
}
