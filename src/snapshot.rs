//! Periodic snapshot gating.
//!
//! `SnapshotScheduler::on_frame` is called by the worker for every published
//! frame. It is O(1) and never does I/O: when the interval has elapsed it
//! returns a `SaveRequest` that the caller hands to a snapshot sink. While a
//! request is alive the scheduler treats the save as in flight, and triggers
//! in that window are dropped. Dropping the request (after the write, on
//! success or failure) releases it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local};

use crate::frame::Frame;

pub const DEFAULT_SNAPSHOT_SECS: u64 = 300;
pub const AUTO_SNAPSHOT_PREFIX: &str = "auto_snapshot";

/// Clears the in-flight flag when dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    flag: Option<Arc<AtomicBool>>,
}

impl InFlightGuard {
    fn new(flag: Arc<AtomicBool>) -> Self {
        flag.store(true, Ordering::Release);
        Self { flag: Some(flag) }
    }

    /// Guard that tracks nothing, for requests made outside a scheduler.
    fn detached() -> Self {
        Self { flag: None }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Some(flag) = self.flag.take() {
            flag.store(false, Ordering::Release);
        }
    }
}

/// A frame to be written to disk.
#[derive(Debug)]
pub struct SaveRequest {
    pub frame: Frame,
    pub timestamp: DateTime<Local>,
    pub prefix: String,
    _guard: InFlightGuard,
}

impl SaveRequest {
    /// Request outside the periodic schedule (manual capture, final frame).
    pub fn manual(frame: Frame, prefix: &str) -> Self {
        Self {
            frame,
            timestamp: Local::now(),
            prefix: prefix.to_string(),
            _guard: InFlightGuard::detached(),
        }
    }
}

#[derive(Debug)]
pub struct SnapshotScheduler {
    interval: Duration,
    prefix: String,
    last_saved_at: Instant,
    in_flight: Arc<AtomicBool>,
    paused: bool,
    requested: u64,
    dropped: u64,
}

impl SnapshotScheduler {
    /// The first save is due one interval after `now`.
    pub fn new(interval: Duration, now: Instant) -> Result<Self> {
        if interval.is_zero() {
            return Err(anyhow!("snapshot interval must be > 0"));
        }
        Ok(Self {
            interval,
            prefix: AUTO_SNAPSHOT_PREFIX.to_string(),
            last_saved_at: now,
            in_flight: Arc::new(AtomicBool::new(false)),
            paused: false,
            requested: 0,
            dropped: 0,
        })
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }

    /// Returns a save request when the interval has elapsed and no save is
    /// in flight. A due trigger that finds a save in flight is dropped and
    /// the interval restarts from `now`.
    pub fn on_frame(&mut self, frame: &Frame, now: Instant) -> Option<SaveRequest> {
        if self.paused {
            return None;
        }
        if now.saturating_duration_since(self.last_saved_at) < self.interval {
            return None;
        }
        self.last_saved_at = now;
        if self.in_flight.load(Ordering::Acquire) {
            self.dropped += 1;
            log::debug!("snapshot trigger dropped: previous save still in flight");
            return None;
        }
        self.requested += 1;
        Some(SaveRequest {
            frame: frame.clone(),
            timestamp: Local::now(),
            prefix: self.prefix.clone(),
            _guard: InFlightGuard::new(self.in_flight.clone()),
        })
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Resume; the next save is due one full interval after `now`.
    pub fn resume(&mut self, now: Instant) {
        self.paused = false;
        self.last_saved_at = now;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn requested(&self) -> u64 {
        self.requested
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> Frame {
        Frame::blank(4, 4, [0, 0, 0])
    }

    #[test]
    fn rejects_zero_interval() {
        assert!(SnapshotScheduler::new(Duration::ZERO, Instant::now()).is_err());
    }

    #[test]
    fn nothing_before_first_interval() {
        let start = Instant::now();
        let mut sched = SnapshotScheduler::new(Duration::from_secs(5), start).unwrap();
        assert!(sched.on_frame(&frame(), start).is_none());
        assert!(sched
            .on_frame(&frame(), start + Duration::from_millis(4999))
            .is_none());
        let req = sched.on_frame(&frame(), start + Duration::from_secs(5));
        assert_eq!(req.unwrap().prefix, AUTO_SNAPSHOT_PREFIX);
    }

    #[test]
    fn in_flight_trigger_is_dropped_not_queued() {
        let start = Instant::now();
        let mut sched = SnapshotScheduler::new(Duration::from_secs(5), start).unwrap();
        let held = sched
            .on_frame(&frame(), start + Duration::from_secs(5))
            .unwrap();
        assert!(sched.is_in_flight());
        assert!(sched
            .on_frame(&frame(), start + Duration::from_secs(10))
            .is_none());
        assert_eq!(sched.dropped(), 1);

        drop(held);
        assert!(!sched.is_in_flight());
        // The dropped trigger restarted the interval; nothing is queued.
        assert!(sched
            .on_frame(&frame(), start + Duration::from_secs(11))
            .is_none());
        assert!(sched
            .on_frame(&frame(), start + Duration::from_secs(15))
            .is_some());
        assert_eq!(sched.requested(), 2);
    }

    #[test]
    fn paused_scheduler_never_fires_and_resume_restarts_interval() {
        let start = Instant::now();
        let mut sched = SnapshotScheduler::new(Duration::from_secs(5), start).unwrap();
        sched.pause();
        assert!(sched
            .on_frame(&frame(), start + Duration::from_secs(60))
            .is_none());
        sched.resume(start + Duration::from_secs(60));
        assert!(sched
            .on_frame(&frame(), start + Duration::from_secs(64))
            .is_none());
        assert!(sched
            .on_frame(&frame(), start + Duration::from_secs(65))
            .is_some());
    }

    #[test]
    fn manual_request_does_not_mark_in_flight() {
        let sched = SnapshotScheduler::new(Duration::from_secs(5), Instant::now()).unwrap();
        let req = SaveRequest::manual(frame(), "captura_manual");
        assert!(!sched.is_in_flight());
        assert_eq!(req.prefix, "captura_manual");
    }
}
