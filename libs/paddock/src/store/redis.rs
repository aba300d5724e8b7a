//! Redis-backed stream store adapter.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fred::prelude::*;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::{
    cardata_stream_key, location_stream_key, parse_car_data, parse_location, parse_timestamp,
    TelemetryStore,
};
use crate::types::{CarSample, LocationSample};

/// Deadline for any single store read. On expiry the read degrades to empty.
const READ_TIMEOUT: Duration = Duration::from_secs(2);

type StreamEntries = Vec<(String, HashMap<String, String>)>;

/// Telemetry store over Redis streams.
///
/// Records carry their sample time in the `timestamp` payload field; the
/// stream entry id is an ingestion-time id and is ignored for range reads.
pub struct RedisTelemetryStore {
    pool: Pool,
}

impl RedisTelemetryStore {
    /// Connect a client pool and verify the store is reachable.
    ///
    /// Failure here is fatal to the caller: the server must not boot against
    /// an unreachable store.
    pub async fn connect(url: &str, pool_size: usize) -> Result<Self, Error> {
        let config = Config::from_url(url)?;
        let pool = Builder::from_config(config)
            .with_connection_config(|config| {
                config.connection_timeout = Duration::from_secs(5);
            })
            .build_pool(pool_size)?;
        pool.init().await?;
        debug!(url, pool_size, "connected to stream store");
        Ok(Self { pool })
    }

    /// Full-stream scan; filtering by payload timestamp happens at the caller.
    async fn read_entries(&self, stream_key: &str) -> StreamEntries {
        let read = self
            .pool
            .xrange::<StreamEntries, _, _, _>(stream_key, "-", "+", None);
        match timeout(READ_TIMEOUT, read).await {
            Ok(Ok(entries)) => entries,
            Ok(Err(e)) => {
                warn!(stream_key, error = %e, "stream range read failed");
                Vec::new()
            }
            Err(_) => {
                warn!(stream_key, "stream range read timed out");
                Vec::new()
            }
        }
    }

    async fn edge_timestamp(&self, stream_key: &str, newest: bool) -> Option<DateTime<Utc>> {
        let read = if newest {
            timeout(
                READ_TIMEOUT,
                self.pool
                    .xrevrange::<StreamEntries, _, _, _>(stream_key, "+", "-", Some(1)),
            )
            .await
        } else {
            timeout(
                READ_TIMEOUT,
                self.pool
                    .xrange::<StreamEntries, _, _, _>(stream_key, "-", "+", Some(1)),
            )
            .await
        };
        match read {
            Ok(Ok(entries)) => entries.first().and_then(|(_, fields)| parse_timestamp(fields)),
            Ok(Err(e)) => {
                warn!(stream_key, error = %e, "stream edge read failed");
                None
            }
            Err(_) => {
                warn!(stream_key, "stream edge read timed out");
                None
            }
        }
    }
}

fn numeric_session_key(session_key: &str) -> i64 {
    session_key.parse().unwrap_or_default()
}

#[async_trait]
impl TelemetryStore for RedisTelemetryStore {
    async fn read_locations(
        &self,
        session_key: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<LocationSample> {
        let stream_key = location_stream_key(session_key);
        let numeric_key = numeric_session_key(session_key);
        let mut samples: Vec<LocationSample> = self
            .read_entries(&stream_key)
            .await
            .into_iter()
            .filter_map(|(id, fields)| match parse_location(numeric_key, &fields) {
                Some(sample) => Some(sample),
                None => {
                    warn!(stream_key = %stream_key, record_id = %id, "dropping record with unparseable timestamp");
                    None
                }
            })
            .filter(|s| s.timestamp >= start && s.timestamp < end)
            .collect();
        samples.sort_by_key(|s| s.timestamp);
        samples
    }

    async fn read_car_data(
        &self,
        session_key: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<CarSample> {
        let stream_key = cardata_stream_key(session_key);
        let numeric_key = numeric_session_key(session_key);
        let mut samples: Vec<CarSample> = self
            .read_entries(&stream_key)
            .await
            .into_iter()
            .filter_map(|(id, fields)| match parse_car_data(numeric_key, &fields) {
                Some(sample) => Some(sample),
                None => {
                    warn!(stream_key = %stream_key, record_id = %id, "dropping record with unparseable timestamp");
                    None
                }
            })
            .filter(|s| s.timestamp >= start && s.timestamp < end)
            .collect();
        samples.sort_by_key(|s| s.timestamp);
        samples
    }

    async fn stream_length(&self, stream_key: &str) -> i64 {
        match timeout(READ_TIMEOUT, self.pool.xlen::<i64, _>(stream_key)).await {
            Ok(Ok(len)) => len,
            Ok(Err(e)) => {
                warn!(stream_key, error = %e, "stream length read failed");
                0
            }
            Err(_) => {
                warn!(stream_key, "stream length read timed out");
                0
            }
        }
    }

    async fn stream_exists(&self, stream_key: &str) -> bool {
        match timeout(READ_TIMEOUT, self.pool.exists::<i64, _>(stream_key)).await {
            Ok(Ok(count)) => count > 0,
            Ok(Err(e)) => {
                warn!(stream_key, error = %e, "stream existence check failed");
                false
            }
            Err(_) => {
                warn!(stream_key, "stream existence check timed out");
                false
            }
        }
    }

    async fn first_timestamp(&self, stream_key: &str) -> Option<DateTime<Utc>> {
        self.edge_timestamp(stream_key, false).await
    }

    async fn last_timestamp(&self, stream_key: &str) -> Option<DateTime<Utc>> {
        self.edge_timestamp(stream_key, true).await
    }
}
