use thiserror::Error;

/// Errors surfaced to clients of the replay engine.
///
/// Every variant except `Internal` is a client error; `Internal` is logged
/// server-side and reported without details.
#[derive(Debug, Clone, Error)]
pub enum ReplayError {
    #[error("Unknown session: {0}")]
    UnknownSession(String),

    #[error("Target time outside session bounds")]
    InvalidTime,

    #[error("Invalid playback speed: {0}. Must be one of 1, 2, 5, 10")]
    InvalidSpeed(f64),

    #[error("No active replay session for {0}")]
    NoActiveSession(String),

    #[error("Malformed frame: {0}")]
    BadFrame(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReplayError {
    /// True for errors caused by client input rather than server state.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, ReplayError::Internal(_))
    }

    /// Message safe to put on the wire. `Internal` details stay in the logs.
    pub fn client_message(&self) -> String {
        match self {
            ReplayError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}
