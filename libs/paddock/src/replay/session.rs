//! Mutable state container for one replaying session.
//!
//! All mutation is guarded by the engine, which holds this behind a
//! per-session lock. The container itself knows nothing about pacing or the
//! store; it only keeps the clock, the pre-fetch buffers and their bounds.

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::catalog::SessionInfo;
use crate::types::{CarSample, LocationSample, PlaybackSpeed, PlaybackStatus, ReplayState};

pub(crate) struct ReplaySession {
    pub session_key: String,
    pub date_start: DateTime<Utc>,
    pub date_end: DateTime<Utc>,

    /// Logical playback clock. Invariant: `date_start <= current_time <= date_end`.
    pub current_time: DateTime<Utc>,
    pub speed: PlaybackSpeed,
    pub status: PlaybackStatus,

    /// Pre-fetched samples with `current_time <= timestamp < buffer_end`,
    /// each sorted ascending by timestamp.
    loc_buffer: VecDeque<LocationSample>,
    car_buffer: VecDeque<CarSample>,

    /// Exclusive upper bound of what has been pre-fetched.
    pub buffer_end: Option<DateTime<Utc>>,

    /// Bumped by `clear`; a refill started under an older generation
    /// discards its result instead of splicing stale samples in.
    pub generation: u64,
    pub refill_in_flight: bool,

    /// Cancels the scheduled advancement task. `Some` iff status is PLAYING.
    pub ticker: Option<CancellationToken>,
}

impl ReplaySession {
    pub fn new(info: &SessionInfo, start: DateTime<Utc>, speed: PlaybackSpeed) -> Self {
        Self {
            session_key: info.session_key.clone(),
            date_start: info.date_start,
            date_end: info.date_end,
            current_time: start,
            speed,
            status: PlaybackStatus::Idle,
            loc_buffer: VecDeque::new(),
            car_buffer: VecDeque::new(),
            buffer_end: None,
            generation: 0,
            refill_in_flight: false,
            ticker: None,
        }
    }

    /// Remove and return all buffered samples in `[from, to)`.
    ///
    /// Consumed samples are never re-emitted by this session.
    pub fn consume(
        &mut self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> (Vec<LocationSample>, Vec<CarSample>) {
        let mut locations = Vec::new();
        while let Some(front) = self.loc_buffer.front() {
            if front.timestamp >= to {
                break;
            }
            let sample = self.loc_buffer.pop_front().expect("front checked");
            if sample.timestamp >= from {
                locations.push(sample);
            }
        }

        let mut cars = Vec::new();
        while let Some(front) = self.car_buffer.front() {
            if front.timestamp >= to {
                break;
            }
            let sample = self.car_buffer.pop_front().expect("front checked");
            if sample.timestamp >= from {
                cars.push(sample);
            }
        }

        (locations, cars)
    }

    /// Extend the buffers and advance `buffer_end`.
    ///
    /// Duplicates (same timestamp and driver) of already-buffered samples are
    /// suppressed, so overlapping refill windows are idempotent.
    pub fn append(
        &mut self,
        locations: Vec<LocationSample>,
        cars: Vec<CarSample>,
        new_buffer_end: DateTime<Utc>,
    ) {
        let seen: HashSet<(DateTime<Utc>, u32)> = self
            .loc_buffer
            .iter()
            .map(|s| (s.timestamp, s.driver_number))
            .collect();
        self.loc_buffer.extend(
            locations
                .into_iter()
                .filter(|s| !seen.contains(&(s.timestamp, s.driver_number))),
        );

        let seen: HashSet<(DateTime<Utc>, u32)> = self
            .car_buffer
            .iter()
            .map(|s| (s.timestamp, s.driver_number))
            .collect();
        self.car_buffer.extend(
            cars.into_iter()
                .filter(|s| !seen.contains(&(s.timestamp, s.driver_number))),
        );

        self.buffer_end = Some(match self.buffer_end {
            Some(end) => end.max(new_buffer_end),
            None => new_buffer_end,
        });
    }

    /// Drop both buffers and the pre-fetch bound. Used on seek.
    pub fn clear(&mut self) {
        self.loc_buffer.clear();
        self.car_buffer.clear();
        self.buffer_end = None;
        self.generation = self.generation.wrapping_add(1);
    }

    /// Milliseconds of pre-fetched session time ahead of the clock.
    pub fn buffer_remaining_ms(&self) -> i64 {
        match self.buffer_end {
            Some(end) => (end - self.current_time).num_milliseconds().max(0),
            None => 0,
        }
    }

    pub fn snapshot(&self) -> ReplayState {
        ReplayState {
            session_key: self.session_key.clone(),
            status: self.status,
            current_time: self.current_time,
            start_time: self.date_start,
            end_time: self.date_end,
            speed: self.speed,
        }
    }

    pub fn cancel_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.cancel();
        }
    }
}
