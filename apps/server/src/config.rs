//! Configuration for the replay server.
//!
//! Settings come from CLI arguments with environment fallbacks; the session
//! list lives in a JSON file. Invalid configuration aborts startup.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::Parser;
use paddock::{ReplayEngineConfig, SessionInfo};
use serde::Deserialize;

/// CLI arguments for the replay server
#[derive(Parser, Debug, Clone)]
#[command(name = "replay-server")]
#[command(version)]
#[command(about = "Replay server for recorded race telemetry")]
pub struct CliArgs {
    /// Address to serve HTTP and WebSocket traffic on
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8080")]
    pub bind: SocketAddr,

    /// Stream store connection URL
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    pub redis_url: String,

    /// Stream store client pool size
    #[arg(long, env = "REDIS_POOL_SIZE", default_value = "4")]
    pub redis_pool_size: usize,

    /// Path to the JSON session list: [{key, name, dateStart, dateEnd}]
    #[arg(long, env = "SESSIONS_FILE")]
    pub sessions_file: PathBuf,

    /// Wall-clock milliseconds between telemetry batches
    #[arg(long, env = "REPLAY_BATCH_INTERVAL_MS", default_value = "100")]
    pub batch_interval_ms: u64,

    /// Seconds of session time to pre-fetch ahead of the playback clock
    #[arg(long, env = "REPLAY_BUFFER_SECONDS", default_value = "30")]
    pub buffer_seconds: u64,

    /// Minutes a disconnected session's resume point is retained
    #[arg(long, env = "REPLAY_STATE_RETENTION_MINUTES", default_value = "5")]
    pub state_retention_minutes: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// One entry of the session list file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEntry {
    pub key: String,
    pub name: String,
    pub date_start: DateTime<Utc>,
    pub date_end: DateTime<Utc>,
}

/// Validated application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: SocketAddr,
    pub redis_url: String,
    pub redis_pool_size: usize,
    pub sessions: Vec<SessionEntry>,
    pub batch_interval: Duration,
    pub buffer_duration: Duration,
    pub state_retention: Duration,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment and CLI.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present
        let _ = dotenvy::dotenv();

        let args = CliArgs::parse();
        Self::from_args(args)
    }

    /// Build and validate configuration from parsed arguments.
    pub fn from_args(args: CliArgs) -> Result<Self, ConfigError> {
        if args.batch_interval_ms == 0 {
            return Err(ConfigError::InvalidBatchInterval);
        }
        if args.buffer_seconds == 0 {
            return Err(ConfigError::InvalidBufferDuration);
        }
        if args.redis_pool_size == 0 {
            return Err(ConfigError::InvalidPoolSize);
        }

        let raw = std::fs::read_to_string(&args.sessions_file)
            .map_err(|_| ConfigError::SessionsFileNotFound(args.sessions_file.clone()))?;
        let sessions: Vec<SessionEntry> = serde_json::from_str(&raw)
            .map_err(|e| ConfigError::SessionsFileInvalid(e.to_string()))?;

        let mut seen = std::collections::HashSet::new();
        for entry in &sessions {
            if entry.date_start >= entry.date_end {
                return Err(ConfigError::InvalidSessionBounds(entry.key.clone()));
            }
            if !seen.insert(entry.key.clone()) {
                return Err(ConfigError::DuplicateSessionKey(entry.key.clone()));
            }
        }

        Ok(Self {
            bind: args.bind,
            redis_url: args.redis_url,
            redis_pool_size: args.redis_pool_size,
            sessions,
            batch_interval: Duration::from_millis(args.batch_interval_ms),
            buffer_duration: Duration::from_secs(args.buffer_seconds),
            state_retention: Duration::from_secs(args.state_retention_minutes * 60),
            log_level: args.log_level,
        })
    }

    /// Catalog seed entries.
    pub fn session_infos(&self) -> Vec<SessionInfo> {
        self.sessions
            .iter()
            .map(|s| SessionInfo::new(s.key.clone(), s.name.clone(), s.date_start, s.date_end))
            .collect()
    }

    /// Engine tuning derived from the configured intervals.
    pub fn engine_config(&self) -> ReplayEngineConfig {
        ReplayEngineConfig {
            batch_interval: self.batch_interval,
            buffer_duration: self.buffer_duration,
            state_retention: self.state_retention,
        }
    }
}

/// Configuration errors, all fatal at startup
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Sessions file not found: {0}")]
    SessionsFileNotFound(PathBuf),

    #[error("Sessions file is not valid JSON: {0}")]
    SessionsFileInvalid(String),

    #[error("Session bounds must satisfy dateStart < dateEnd: {0}")]
    InvalidSessionBounds(String),

    #[error("Duplicate session key: {0}")]
    DuplicateSessionKey(String),

    #[error("Batch interval must be positive")]
    InvalidBatchInterval,

    #[error("Buffer duration must be positive")]
    InvalidBufferDuration,

    #[error("Store pool size must be positive")]
    InvalidPoolSize,
}
