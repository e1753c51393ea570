//! Line-crossing engine.
//!
//! Converts per-frame detection lists (already carrying tracker identities)
//! into exactly-once crossing events. The engine owns the `TrackStateStore`
//! and nothing else: it does not touch counters, persistence or shared
//! settings. Callers deliver the returned events.
//!
//! Per detection:
//! - no track id or no category: skipped, counted as an anomaly
//! - first sight: state created on the side of the current position
//! - movement below `margin_px` from the stable position: jitter, only the
//!   last-seen frame is updated
//! - otherwise the side is recomputed; the first side change of an identity
//!   emits one event
//!
//! Stale tracks are pruned after each frame.

use std::collections::HashSet;

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::detect::{CategoryMap, Detection, UnmappedPolicy, UNMAPPED_CATEGORY};
use crate::track::{Side, TrackState, TrackStateStore};
use crate::CrossingEvent;

pub const DEFAULT_MARGIN_PX: f64 = 30.0;
pub const DEFAULT_STALE_AFTER_FRAMES: u64 = 30;

/// Engine tuning.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Minimum displacement from the last stable position, in pixels, before
    /// a side change is considered real.
    pub margin_px: f64,
    /// Tracks not seen for more than this many frames are dropped.
    pub stale_after_frames: u64,
    pub categories: CategoryMap,
    pub unmapped: UnmappedPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            margin_px: DEFAULT_MARGIN_PX,
            stale_after_frames: DEFAULT_STALE_AFTER_FRAMES,
            categories: CategoryMap::permissive(),
            unmapped: UnmappedPolicy::Bucket,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.margin_px.is_finite() || self.margin_px <= 0.0 {
            return Err(anyhow!("margin_px must be > 0 (got {})", self.margin_px));
        }
        if self.stale_after_frames == 0 {
            return Err(anyhow!("stale_after_frames must be > 0"));
        }
        Ok(())
    }
}

/// Observability counters. Monotonic over the engine's lifetime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub frames: u64,
    pub detections: u64,
    pub missing_track_id: u64,
    pub missing_category: u64,
    /// Non-finite centre coordinates.
    pub malformed: u64,
    pub unmapped_bucketed: u64,
    pub unmapped_dropped: u64,
    pub tracks_created: u64,
    pub tracks_pruned: u64,
    pub events_emitted: u64,
}

impl EngineStats {
    /// Detections skipped without touching track state.
    pub fn anomalies(&self) -> u64 {
        self.missing_track_id + self.missing_category + self.malformed + self.unmapped_dropped
    }
}

pub struct LineCrossingEngine {
    cfg: EngineConfig,
    tracks: TrackStateStore,
    stats: EngineStats,
    last_fraction: f64,
    warned_labels: HashSet<String>,
}

impl LineCrossingEngine {
    pub fn new(cfg: EngineConfig) -> Result<Self> {
        cfg.validate()?;
        log::info!(
            "crossing engine: margin={}px stale_after={} frames categories={}",
            cfg.margin_px,
            cfg.stale_after_frames,
            if cfg.categories.is_empty() {
                "any".to_string()
            } else {
                cfg.categories.names().collect::<Vec<_>>().join(",")
            }
        );
        Ok(Self {
            cfg,
            tracks: TrackStateStore::new(),
            stats: EngineStats::default(),
            last_fraction: 0.5,
            warned_labels: HashSet::new(),
        })
    }

    /// Process one frame's detections and return the crossings it produced.
    ///
    /// `line_fraction` is the line position as a fraction of `frame_width`.
    /// It applies to this frame only; events already returned are never
    /// revisited. A non-finite fraction falls back to the last valid one.
    pub fn process(
        &mut self,
        detections: &[Detection],
        line_fraction: f64,
        frame_width: u32,
        frame_index: u64,
    ) -> Vec<CrossingEvent> {
        let fraction = if line_fraction.is_finite() {
            line_fraction.clamp(0.0, 1.0)
        } else {
            log::debug!("ignoring non-finite line fraction {}", line_fraction);
            self.last_fraction
        };
        self.last_fraction = fraction;
        let line_x = fraction * f64::from(frame_width);

        self.stats.frames += 1;
        let mut events = Vec::new();
        for det in detections {
            self.stats.detections += 1;
            if let Some(event) = self.observe(det, line_x, frame_index) {
                events.push(event);
            }
        }

        let pruned = self.tracks.prune(frame_index, self.cfg.stale_after_frames);
        if pruned > 0 {
            log::debug!("pruned {} stale tracks at frame {}", pruned, frame_index);
            self.stats.tracks_pruned += pruned as u64;
        }
        self.stats.events_emitted += events.len() as u64;
        events
    }

    fn observe(&mut self, det: &Detection, line_x: f64, frame_index: u64) -> Option<CrossingEvent> {
        let Some(track_id) = det.track_id else {
            self.stats.missing_track_id += 1;
            return None;
        };
        let Some(label) = det.category.as_deref().filter(|l| !l.trim().is_empty()) else {
            self.stats.missing_category += 1;
            return None;
        };
        let x = f64::from(det.centre_x());
        if !x.is_finite() {
            self.stats.malformed += 1;
            return None;
        }

        if let Some(track) = self.tracks.get_mut(track_id) {
            return Self::advance(track, x, line_x, self.cfg.margin_px, frame_index);
        }

        let category = match self.cfg.categories.resolve(label) {
            Some(name) => name.to_string(),
            None => match self.cfg.unmapped {
                UnmappedPolicy::Bucket => {
                    self.stats.unmapped_bucketed += 1;
                    UNMAPPED_CATEGORY.to_string()
                }
                UnmappedPolicy::Drop => {
                    self.stats.unmapped_dropped += 1;
                    if self.warned_labels.insert(label.to_string()) {
                        log::warn!("dropping detections with unknown category '{}'", label);
                    }
                    return None;
                }
            },
        };
        self.tracks
            .create(track_id, &category, x, line_x, frame_index);
        self.stats.tracks_created += 1;
        None
    }

    fn advance(
        track: &mut TrackState,
        x: f64,
        line_x: f64,
        margin_px: f64,
        frame_index: u64,
    ) -> Option<CrossingEvent> {
        track.touch(frame_index);
        if (x - track.stable_x).abs() < margin_px {
            return None;
        }
        let direction = track.settle(x, Side::of(x, line_x))?;
        log::info!(
            "crossing: track={} category={} direction={} frame={}",
            track.track_id,
            track.category,
            direction,
            frame_index
        );
        Some(CrossingEvent {
            track_id: track.track_id,
            category: track.category.clone(),
            direction,
            frame_index,
        })
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub fn track(&self, track_id: u64) -> Option<&TrackState> {
        self.tracks.get(track_id)
    }

    pub fn live_tracks(&self) -> usize {
        self.tracks.len()
    }

    pub fn crossed_tracks(&self) -> usize {
        self.tracks.crossed_count()
    }

    /// Forget every live track. Identities seen afterwards start fresh.
    pub fn clear_tracks(&mut self) {
        self.tracks.clear();
    }
}
