//! Integration tests for the session catalog.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use paddock::{CarSample, LocationSample, SessionCatalog, SessionInfo, TelemetryStore};

/// Store stub with fixed per-stream record counts.
struct CountingStore {
    location_count: i64,
    car_count: i64,
}

#[async_trait]
impl TelemetryStore for CountingStore {
    async fn read_locations(
        &self,
        _session_key: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Vec<LocationSample> {
        Vec::new()
    }

    async fn read_car_data(
        &self,
        _session_key: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Vec<CarSample> {
        Vec::new()
    }

    async fn stream_length(&self, stream_key: &str) -> i64 {
        if stream_key.starts_with("telemetry:location:") {
            self.location_count
        } else {
            self.car_count
        }
    }

    async fn stream_exists(&self, stream_key: &str) -> bool {
        self.stream_length(stream_key).await > 0
    }

    async fn first_timestamp(&self, _stream_key: &str) -> Option<DateTime<Utc>> {
        None
    }

    async fn last_timestamp(&self, _stream_key: &str) -> Option<DateTime<Utc>> {
        None
    }
}

fn t(iso: &str) -> DateTime<Utc> {
    iso.parse().unwrap()
}

fn catalog(location_count: i64, car_count: i64) -> SessionCatalog {
    let store = Arc::new(CountingStore {
        location_count,
        car_count,
    });
    SessionCatalog::new(
        store,
        vec![
            SessionInfo::new(
                "9141",
                "Qualifying",
                t("2024-05-11T15:00:00Z"),
                t("2024-05-11T16:00:00Z"),
            ),
            SessionInfo::new(
                "9140",
                "Race",
                t("2024-05-12T14:00:00Z"),
                t("2024-05-12T16:00:00Z"),
            ),
        ],
    )
}

#[tokio::test]
async fn list_is_ordered_by_start() {
    let catalog = catalog(0, 0);
    let sessions = catalog.list();
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0].session_key, "9141");
    assert_eq!(sessions[1].session_key, "9140");
}

#[tokio::test]
async fn get_and_exists() {
    let catalog = catalog(0, 0);
    assert!(catalog.exists("9140"));
    assert!(!catalog.exists("1234"));

    let info = catalog.get("9140").unwrap();
    assert_eq!(info.name, "Race");
    assert_eq!(info.duration_ms, Some(2 * 60 * 60 * 1000));
    assert_eq!(info.location_count, None);
    assert_eq!(info.car_count, None);
    assert!(catalog.get("1234").is_none());
}

#[tokio::test]
async fn has_data_follows_location_stream() {
    assert!(catalog(5, 0).has_data("9140").await);
    assert!(!catalog(0, 5).has_data("9140").await);
}

#[tokio::test]
async fn refresh_probes_counts_and_replaces_entry() {
    let catalog = catalog(1_200, 340);
    let refreshed = catalog.refresh("9140").await.unwrap();
    assert_eq!(refreshed.location_count, Some(1_200));
    assert_eq!(refreshed.car_count, Some(340));
    assert_eq!(refreshed.duration_ms, Some(2 * 60 * 60 * 1000));

    // the replacement is visible to subsequent reads
    let info = catalog.get("9140").unwrap();
    assert_eq!(info.location_count, Some(1_200));
}

#[tokio::test]
async fn refresh_unknown_session_is_none() {
    assert!(catalog(0, 0).refresh("1234").await.is_none());
}
