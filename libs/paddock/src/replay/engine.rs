//! The replay engine: lifecycle operations, paced advancement, buffer refill
//! and disconnected-state retention.
//!
//! One `ReplaySession` exists per session key with at least one subscriber.
//! While PLAYING, a spawned ticker task walks the logical clock once per
//! batch interval and broadcasts each consumed window to every subscriber of
//! that session, so concurrent viewers observe the same stream.

use std::cmp;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use tokio::sync::{broadcast, Mutex};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::session::ReplaySession;
use crate::catalog::SessionCatalog;
use crate::error::ReplayError;
use crate::store::TelemetryStore;
use crate::types::{
    CarSample, EngineEvent, LocationSample, PlaybackSpeed, PlaybackStatus, ReplayState,
    TelemetryBatch,
};

/// Async refill fires when less than this much session time is buffered.
const REFILL_LOW_WATER_MS: i64 = 10_000;

/// Per-session event channel capacity (~25 s of batches at 10 Hz).
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Period of the disconnected-state purge sweep.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct ReplayEngineConfig {
    /// Wall-clock period between batches.
    pub batch_interval: Duration,
    /// How much session time a refill pre-fetches.
    pub buffer_duration: Duration,
    /// How long a suspended session's resume point survives.
    pub state_retention: Duration,
}

impl Default for ReplayEngineConfig {
    fn default() -> Self {
        Self {
            batch_interval: Duration::from_millis(100),
            buffer_duration: Duration::from_secs(30),
            state_retention: Duration::from_secs(5 * 60),
        }
    }
}

/// Resume point preserved after the last subscriber of a session leaves.
#[derive(Debug, Clone)]
pub struct DisconnectedState {
    pub current_time: DateTime<Utc>,
    pub speed: PlaybackSpeed,
    pub disconnected_at: DateTime<Utc>,
}

type SessionHandle = Arc<Mutex<ReplaySession>>;

pub struct ReplayEngine {
    store: Arc<dyn TelemetryStore>,
    catalog: Arc<SessionCatalog>,
    config: ReplayEngineConfig,
    active: DashMap<String, SessionHandle>,
    disconnected: DashMap<String, DisconnectedState>,
    channels: DashMap<String, broadcast::Sender<EngineEvent>>,
    subscribers: DashMap<String, usize>,
}

impl ReplayEngine {
    pub fn new(
        store: Arc<dyn TelemetryStore>,
        catalog: Arc<SessionCatalog>,
        config: ReplayEngineConfig,
    ) -> Self {
        Self {
            store,
            catalog,
            config,
            active: DashMap::new(),
            disconnected: DashMap::new(),
            channels: DashMap::new(),
            subscribers: DashMap::new(),
        }
    }

    /// Receiver for a session's batches and completion events.
    ///
    /// The channel outlives individual `ReplaySession`s, so a subscriber keeps
    /// receiving across stop/replay cycles. Lagging receivers miss batches
    /// rather than stalling the ticker.
    pub fn subscribe(&self, session_key: &str) -> broadcast::Receiver<EngineEvent> {
        self.channels
            .entry(session_key.to_string())
            .or_insert_with(|| broadcast::channel(EVENT_CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Register one more subscriber for a session.
    pub fn client_joined(&self, session_key: &str) {
        let mut count = self.subscribers.entry(session_key.to_string()).or_insert(0);
        *count += 1;
        debug!(session_key, subscribers = *count, "client joined");
    }

    /// Start (or resume) playback.
    ///
    /// With an active session this just transitions to PLAYING. Otherwise a
    /// new session is created: at `start_time` when given, else at a
    /// non-expired resume point, else at the session start. The buffer is
    /// pre-filled synchronously so the first tick has data to ship.
    pub async fn play(
        self: &Arc<Self>,
        session_key: &str,
        start_time: Option<DateTime<Utc>>,
    ) -> Result<ReplayState, ReplayError> {
        let info = self
            .catalog
            .get(session_key)
            .ok_or_else(|| ReplayError::UnknownSession(session_key.to_string()))?;
        if let Some(t) = start_time {
            if t < info.date_start || t > info.date_end {
                return Err(ReplayError::InvalidTime);
            }
        }

        if let Some(handle) = self.active_handle(session_key) {
            return Ok(self.resume_playing(session_key, &handle).await);
        }

        let resume = match start_time {
            Some(_) => {
                // Explicit start discards any preserved resume point.
                self.disconnected.remove(session_key);
                None
            }
            None => self.take_resume_point(session_key),
        };
        let start = start_time
            .or(resume.as_ref().map(|d| d.current_time))
            .unwrap_or(info.date_start);
        let speed = resume.map(|d| d.speed).unwrap_or_default();

        let mut session = ReplaySession::new(&info, start, speed);
        let (locations, cars, buffer_end) = self.load_window(session_key, start, info.date_end).await;
        session.append(locations, cars, buffer_end);
        session.status = PlaybackStatus::Playing;
        let cancel = CancellationToken::new();
        session.ticker = Some(cancel.clone());
        let snapshot = session.snapshot();

        match self.active.entry(session_key.to_string()) {
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(Arc::new(Mutex::new(session)));
                self.spawn_ticker(session_key.to_string(), cancel);
                info!(session_key, start = %start, %speed, "replay session started");
                Ok(snapshot)
            }
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                // Lost a creation race; defer to the session that won.
                cancel.cancel();
                let handle = Arc::clone(entry.get());
                drop(entry);
                Ok(self.resume_playing(session_key, &handle).await)
            }
        }
    }

    /// Pause playback and cancel the scheduled advancement.
    pub async fn pause(&self, session_key: &str) -> Result<ReplayState, ReplayError> {
        let handle = self.require_active(session_key)?;
        let mut session = handle.lock().await;
        session.cancel_ticker();
        session.status = PlaybackStatus::Paused;
        info!(session_key, current = %session.current_time, "replay paused");
        Ok(session.snapshot())
    }

    /// Stop playback and drop the session entirely.
    pub async fn stop(&self, session_key: &str) -> Result<ReplayState, ReplayError> {
        let handle = self.require_active(session_key)?;
        let mut session = handle.lock().await;
        session.cancel_ticker();
        session.status = PlaybackStatus::Stopped;
        let snapshot = session.snapshot();
        drop(session);
        self.active.remove(session_key);
        info!(session_key, "replay stopped");
        Ok(snapshot)
    }

    /// Move the clock to `target` and synchronously rebuild the buffer.
    /// Playback status is preserved.
    pub async fn seek(
        &self,
        session_key: &str,
        target: DateTime<Utc>,
    ) -> Result<ReplayState, ReplayError> {
        let handle = self.require_active(session_key)?;

        let (generation, date_end) = {
            let mut session = handle.lock().await;
            if target < session.date_start || target > session.date_end {
                return Err(ReplayError::InvalidTime);
            }
            session.current_time = target;
            session.clear();
            (session.generation, session.date_end)
        };

        // Store read happens outside the session lock.
        let (locations, cars, buffer_end) = self.load_window(session_key, target, date_end).await;

        let mut session = handle.lock().await;
        if session.generation == generation {
            session.append(locations, cars, buffer_end);
        }
        debug!(session_key, target = %target, "seek complete");
        Ok(session.snapshot())
    }

    /// Change the playback multiplier. While PLAYING the ticker is cancelled
    /// and re-scheduled; the tick cadence itself never changes.
    pub async fn set_speed(
        self: &Arc<Self>,
        session_key: &str,
        speed: PlaybackSpeed,
    ) -> Result<ReplayState, ReplayError> {
        let handle = self.require_active(session_key)?;
        let mut session = handle.lock().await;
        session.speed = speed;
        if session.status == PlaybackStatus::Playing {
            session.cancel_ticker();
            let cancel = CancellationToken::new();
            session.ticker = Some(cancel.clone());
            self.spawn_ticker(session_key.to_string(), cancel);
        }
        info!(session_key, %speed, "playback speed changed");
        Ok(session.snapshot())
    }

    /// Snapshot of the active session, or a synthesized PAUSED snapshot from
    /// a preserved resume point, or `None`.
    pub async fn state(&self, session_key: &str) -> Option<ReplayState> {
        if let Some(handle) = self.active_handle(session_key) {
            return Some(handle.lock().await.snapshot());
        }
        let disconnected = self.resume_point(session_key)?;
        let info = self.catalog.get(session_key)?;
        Some(ReplayState {
            session_key: session_key.to_string(),
            status: PlaybackStatus::Paused,
            current_time: disconnected.current_time,
            start_time: info.date_start,
            end_time: info.date_end,
            speed: disconnected.speed,
        })
    }

    /// Produce the batch for the next tick window, advancing the clock.
    ///
    /// Returns `None` when the session is absent, not playing, or just
    /// completed. Completion cancels the ticker, drops the session and
    /// broadcasts `Completed`.
    pub async fn next_batch(&self, session_key: &str) -> Option<TelemetryBatch> {
        let handle = self.active_handle(session_key)?;
        let mut session = handle.lock().await;
        if session.status != PlaybackStatus::Playing {
            return None;
        }

        if session.current_time >= session.date_end {
            session.cancel_ticker();
            session.status = PlaybackStatus::Completed;
            drop(session);
            self.active.remove(session_key);
            self.broadcast(session_key, EngineEvent::Completed);
            info!(session_key, "replay completed");
            return None;
        }

        let window_ms =
            self.config.batch_interval.as_millis() as i64 * session.speed.multiplier();
        let window_end = cmp::min(
            session.current_time + TimeDelta::milliseconds(window_ms),
            session.date_end,
        );

        let current_time = session.current_time;
        let (locations, cars) = session.consume(current_time, window_end);
        let batch = TelemetryBatch {
            batch_timestamp: session.current_time,
            locations,
            car_data: cars,
        };
        session.current_time = window_end;

        let refill = session.buffer_remaining_ms() < REFILL_LOW_WATER_MS
            && session.buffer_end.is_none_or(|end| end < session.date_end)
            && !session.refill_in_flight;
        if refill {
            session.refill_in_flight = true;
            let from = session.buffer_end.unwrap_or(session.current_time);
            let args = (session.generation, from, session.date_end);
            drop(session);
            self.spawn_refill(session_key.to_string(), Arc::clone(&handle), args);
        }

        Some(batch)
    }

    /// Note a subscriber leaving. When it was the last one, the session is
    /// suspended: ticker cancelled, resume point recorded, session dropped.
    pub async fn on_client_left(&self, session_key: &str) {
        let remaining = {
            let mut count = self.subscribers.entry(session_key.to_string()).or_insert(0);
            *count = count.saturating_sub(1);
            *count
        };
        debug!(session_key, subscribers = remaining, "client left");
        if remaining > 0 {
            return;
        }
        self.subscribers.remove_if(session_key, |_, count| *count == 0);
        self.channels
            .remove_if(session_key, |_, tx| tx.receiver_count() == 0);

        if let Some((_, handle)) = self.active.remove(session_key) {
            let mut session = handle.lock().await;
            session.cancel_ticker();
            self.disconnected.insert(
                session_key.to_string(),
                DisconnectedState {
                    current_time: session.current_time,
                    speed: session.speed,
                    disconnected_at: Utc::now(),
                },
            );
            info!(
                session_key,
                current = %session.current_time,
                "last subscriber left, session suspended"
            );
        }
    }

    /// Periodically purge resume points past the retention window.
    pub fn spawn_retention_sweeper(self: &Arc<Self>, cancel: CancellationToken) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(SWEEP_INTERVAL);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {
                        let cutoff = Utc::now() - engine.retention();
                        engine.disconnected.retain(|session_key, state| {
                            let keep = state.disconnected_at >= cutoff;
                            if !keep {
                                info!(session_key, "expired resume point purged");
                            }
                            keep
                        });
                    }
                }
            }
            debug!("retention sweeper stopped");
        });
    }

    /// Cancel every ticker and drop all in-memory state. Used at shutdown;
    /// nothing is persisted by design.
    pub async fn shutdown(&self) {
        let keys: Vec<String> = self.active.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, handle)) = self.active.remove(&key) {
                handle.lock().await.cancel_ticker();
            }
        }
        self.disconnected.clear();
        self.channels.clear();
        self.subscribers.clear();
    }

    fn retention(&self) -> TimeDelta {
        TimeDelta::from_std(self.config.state_retention).unwrap_or(TimeDelta::minutes(5))
    }

    fn active_handle(&self, session_key: &str) -> Option<SessionHandle> {
        self.active.get(session_key).map(|e| Arc::clone(e.value()))
    }

    fn require_active(&self, session_key: &str) -> Result<SessionHandle, ReplayError> {
        self.active_handle(session_key)
            .ok_or_else(|| ReplayError::NoActiveSession(session_key.to_string()))
    }

    /// Non-expired resume point, if one exists. Expired entries are purged
    /// on sight rather than waiting for the sweep.
    fn resume_point(&self, session_key: &str) -> Option<DisconnectedState> {
        let state = self.disconnected.get(session_key)?.clone();
        if Utc::now() - state.disconnected_at > self.retention() {
            self.disconnected.remove(session_key);
            return None;
        }
        Some(state)
    }

    fn take_resume_point(&self, session_key: &str) -> Option<DisconnectedState> {
        let state = self.resume_point(session_key)?;
        self.disconnected.remove(session_key);
        Some(state)
    }

    async fn resume_playing(
        self: &Arc<Self>,
        session_key: &str,
        handle: &SessionHandle,
    ) -> ReplayState {
        let mut session = handle.lock().await;
        session.status = PlaybackStatus::Playing;
        if session.ticker.is_none() {
            let cancel = CancellationToken::new();
            session.ticker = Some(cancel.clone());
            self.spawn_ticker(session_key.to_string(), cancel);
        }
        info!(session_key, current = %session.current_time, "replay resumed");
        session.snapshot()
    }

    /// Read `[from, from + buffer_duration)` bounded by the session end.
    async fn load_window(
        &self,
        session_key: &str,
        from: DateTime<Utc>,
        date_end: DateTime<Utc>,
    ) -> (Vec<LocationSample>, Vec<CarSample>, DateTime<Utc>) {
        let span = TimeDelta::from_std(self.config.buffer_duration).unwrap_or(TimeDelta::seconds(30));
        let to = cmp::min(from + span, date_end);
        if from >= to {
            return (Vec::new(), Vec::new(), to.max(from));
        }
        let (locations, cars) = tokio::join!(
            self.store.read_locations(session_key, from, to),
            self.store.read_car_data(session_key, from, to),
        );
        debug!(
            session_key,
            from = %from,
            to = %to,
            locations = locations.len(),
            cars = cars.len(),
            "buffer window loaded"
        );
        (locations, cars, to)
    }

    fn spawn_ticker(self: &Arc<Self>, session_key: String, cancel: CancellationToken) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(engine.config.batch_interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    // cancellation wins over a ready tick
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {
                        if let Some(batch) = engine.next_batch(&session_key).await {
                            engine.broadcast(&session_key, EngineEvent::Batch(Arc::new(batch)));
                        }
                    }
                }
            }
            debug!(session_key, "ticker stopped");
        });
    }

    /// Background refill. At most one is in flight per session; results from
    /// before a `clear` are discarded via the generation check.
    fn spawn_refill(
        &self,
        session_key: String,
        handle: SessionHandle,
        (generation, from, date_end): (u64, DateTime<Utc>, DateTime<Utc>),
    ) {
        let store = Arc::clone(&self.store);
        let buffer_duration =
            TimeDelta::from_std(self.config.buffer_duration).unwrap_or(TimeDelta::seconds(30));
        tokio::spawn(async move {
            let to = cmp::min(from + buffer_duration, date_end);
            let (locations, cars) = if from < to {
                tokio::join!(
                    store.read_locations(&session_key, from, to),
                    store.read_car_data(&session_key, from, to),
                )
            } else {
                (Vec::new(), Vec::new())
            };

            let mut session = handle.lock().await;
            session.refill_in_flight = false;
            if session.generation != generation {
                debug!(session_key, "stale refill discarded");
                return;
            }
            session.append(locations, cars, to);
        });
    }

    fn broadcast(&self, session_key: &str, event: EngineEvent) {
        if let Some(tx) = self.channels.get(session_key) {
            // Ignore the error when nobody is listening.
            let _ = tx.send(event);
        }
    }
}
