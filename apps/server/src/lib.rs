//! Telemetry Replay Server
//!
//! Serves pre-ingested race telemetry to many simultaneous viewers over
//! WebSocket, each able to scrub, pause, resume and speed-adjust a past
//! session as if it were live. This crate provides:
//!
//! - **config**: CLI/env configuration and the session list file
//! - **app**: server orchestration and graceful shutdown
//! - **http**: read-only session API and replay-control aliases
//! - **ws**: the WebSocket protocol and per-connection session manager

pub mod app;
pub mod config;
pub mod http;
pub mod ws;

// Re-export commonly used types
pub use app::{AppState, ReplayServerApp};
pub use config::{CliArgs, Config, ConfigError};
