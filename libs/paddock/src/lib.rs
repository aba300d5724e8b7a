//! Paddock, a replay engine for recorded race telemetry.
//!
//! The library owns everything between the stream store and the transport:
//!
//! - **store**: adapter over the external append-only stream store
//! - **catalog**: known sessions and their bounds
//! - **replay**: per-session playback state and the paced replay engine
//! - **types**: samples, batches, playback speed/status and state snapshots

pub mod catalog;
pub mod error;
pub mod replay;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use catalog::{SessionCatalog, SessionInfo};
pub use error::ReplayError;
pub use replay::engine::{DisconnectedState, ReplayEngine, ReplayEngineConfig};
pub use store::{RedisTelemetryStore, TelemetryStore};
pub use types::{
    CarSample, EngineEvent, LocationSample, PlaybackSpeed, PlaybackStatus, ReplayState,
    TelemetryBatch,
};
