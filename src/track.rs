//! Per-identity crossing state.
//!
//! `TrackStateStore` owns one `TrackState` per live track identity. It is pure
//! data plus transition logic: no I/O, no locking. The crossing engine is the
//! only writer.

use std::collections::HashMap;

use serde::Serialize;

use crate::Direction;

/// Which half-plane a position falls in relative to the counting line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
    /// No stable reading yet. Reserved: `TrackStateStore::create` reads a
    /// concrete side from the first position. Leaving `Unknown` never counts.
    Unknown,
}

impl Side {
    /// `Left` if `x` is strictly before the line, else `Right`.
    pub fn of(x: f64, line_x: f64) -> Self {
        if x < line_x {
            Side::Left
        } else {
            Side::Right
        }
    }

    /// Direction of a move from `self` to `to`, if it is a real side change.
    pub fn transition_to(self, to: Side) -> Option<Direction> {
        match (self, to) {
            (Side::Left, Side::Right) => Some(Direction::LeftToRight),
            (Side::Right, Side::Left) => Some(Direction::RightToLeft),
            _ => None,
        }
    }
}

/// Crossing state for one track identity.
#[derive(Clone, Debug, Serialize)]
pub struct TrackState {
    pub track_id: u64,
    /// Category at first observation. Never changes afterwards.
    pub category: String,
    pub last_side: Side,
    /// Last x accepted as side-defining.
    pub stable_x: f64,
    /// Monotonic: once true, stays true until the track is pruned.
    pub crossed: bool,
    pub crossing_direction: Option<Direction>,
    pub first_seen_frame: u64,
    pub last_seen_frame: u64,
    pub frames_seen: u64,
}

impl TrackState {
    fn new(track_id: u64, category: &str, x: f64, side: Side, frame_index: u64) -> Self {
        Self {
            track_id,
            category: category.to_string(),
            last_side: side,
            stable_x: x,
            crossed: false,
            crossing_direction: None,
            first_seen_frame: frame_index,
            last_seen_frame: frame_index,
            frames_seen: 1,
        }
    }

    /// Record that the track was seen in `frame_index` without a side update.
    pub fn touch(&mut self, frame_index: u64) {
        self.last_seen_frame = self.last_seen_frame.max(frame_index);
        self.frames_seen += 1;
    }

    /// Accept `x` as the new stable position on `side`.
    ///
    /// Returns the crossing direction when this is the first side change of
    /// the identity. Later side changes update `last_side` only.
    pub fn settle(&mut self, x: f64, side: Side) -> Option<Direction> {
        self.stable_x = x;
        let previous = self.last_side;
        if previous == side {
            return None;
        }
        self.last_side = side;
        let direction = previous.transition_to(side)?;
        if self.crossed {
            return None;
        }
        self.crossed = true;
        self.crossing_direction = Some(direction);
        Some(direction)
    }

    /// Frames since the track was last seen.
    pub fn age(&self, frame_index: u64) -> u64 {
        frame_index.saturating_sub(self.last_seen_frame)
    }
}

/// Store of live track states keyed by track identity.
#[derive(Debug, Default)]
pub struct TrackStateStore {
    tracks: HashMap<u64, TrackState>,
}

impl TrackStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the state for a newly seen identity at `x`.
    ///
    /// The initial side is read from `x` directly. An existing state for the
    /// same identity is replaced.
    pub fn create(
        &mut self,
        track_id: u64,
        category: &str,
        x: f64,
        line_x: f64,
        frame_index: u64,
    ) -> &TrackState {
        let state = TrackState::new(track_id, category, x, Side::of(x, line_x), frame_index);
        self.tracks.insert(track_id, state);
        &self.tracks[&track_id]
    }

    pub fn get_mut(&mut self, track_id: u64) -> Option<&mut TrackState> {
        self.tracks.get_mut(&track_id)
    }

    /// Remove every track whose age exceeds `stale_after_frames`.
    /// Returns the number of tracks removed.
    pub fn prune(&mut self, frame_index: u64, stale_after_frames: u64) -> usize {
        let before = self.tracks.len();
        self.tracks
            .retain(|_, track| track.age(frame_index) <= stale_after_frames);
        before - self.tracks.len()
    }

    pub fn get(&self, track_id: u64) -> Option<&TrackState> {
        self.tracks.get(&track_id)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn crossed_count(&self) -> usize {
        self.tracks.values().filter(|t| t.crossed).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackState> {
        self.tracks.values()
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
    }
}
