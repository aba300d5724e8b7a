//! Catalog of known, replayable sessions.
//!
//! Sessions are seeded once at startup from configuration; record counts are
//! best-effort, lazy, and null-tolerant until a `refresh` probes the store.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::{info, warn};

use crate::store::{cardata_stream_key, location_stream_key, TelemetryStore};

/// Metadata for one replayable session.
///
/// Invariant: `date_start < date_end`, enforced at configuration load.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_key: String,
    pub name: String,
    pub date_start: DateTime<Utc>,
    pub date_end: DateTime<Utc>,
    pub duration_ms: Option<i64>,
    pub location_count: Option<i64>,
    pub car_count: Option<i64>,
}

impl SessionInfo {
    /// A fresh entry with unprobed counts.
    pub fn new(
        session_key: impl Into<String>,
        name: impl Into<String>,
        date_start: DateTime<Utc>,
        date_end: DateTime<Utc>,
    ) -> Self {
        Self {
            session_key: session_key.into(),
            name: name.into(),
            date_start,
            date_end,
            duration_ms: Some((date_end - date_start).num_milliseconds()),
            location_count: None,
            car_count: None,
        }
    }
}

/// Read-mostly registry of sessions this server can replay.
pub struct SessionCatalog {
    store: Arc<dyn TelemetryStore>,
    sessions: DashMap<String, SessionInfo>,
}

impl SessionCatalog {
    pub fn new(store: Arc<dyn TelemetryStore>, seed: Vec<SessionInfo>) -> Self {
        let sessions = DashMap::new();
        for info in seed {
            sessions.insert(info.session_key.clone(), info);
        }
        info!(count = sessions.len(), "session catalog loaded");
        Self { store, sessions }
    }

    /// All known sessions, oldest first.
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> =
            self.sessions.iter().map(|e| e.value().clone()).collect();
        sessions.sort_by_key(|s| s.date_start);
        sessions
    }

    pub fn get(&self, session_key: &str) -> Option<SessionInfo> {
        self.sessions.get(session_key).map(|e| e.value().clone())
    }

    pub fn exists(&self, session_key: &str) -> bool {
        self.sessions.contains_key(session_key)
    }

    /// Whether the store holds position data for this session.
    pub async fn has_data(&self, session_key: &str) -> bool {
        self.store
            .stream_exists(&location_stream_key(session_key))
            .await
    }

    /// Re-probe the store and atomically replace the catalog entry.
    ///
    /// Counts stay `None`-tolerant: a failed probe yields 0-length streams,
    /// which are recorded as probed-but-empty rather than left stale.
    pub async fn refresh(&self, session_key: &str) -> Option<SessionInfo> {
        let mut info = self.get(session_key)?;

        let location_key = location_stream_key(session_key);
        let cardata_key = cardata_stream_key(session_key);
        let (location_count, car_count) = tokio::join!(
            self.store.stream_length(&location_key),
            self.store.stream_length(&cardata_key),
        );

        info.location_count = Some(location_count);
        info.car_count = Some(car_count);
        info.duration_ms = Some((info.date_end - info.date_start).num_milliseconds());

        // Data outside the configured bounds never plays back; flag it.
        if let Some(first) = self.store.first_timestamp(&location_key).await {
            if first < info.date_start {
                warn!(session_key, %first, "stream data begins before configured session start");
            }
        }
        if let Some(last) = self.store.last_timestamp(&location_key).await {
            if last > info.date_end {
                warn!(session_key, %last, "stream data extends past configured session end");
            }
        }

        self.sessions.insert(session_key.to_string(), info.clone());
        info!(
            session_key,
            location_count, car_count, "session catalog entry refreshed"
        );
        Some(info)
    }
}
