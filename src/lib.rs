//! Crossing Kernel
//!
//! Counts pedestrians and personal-mobility vehicles crossing a virtual
//! vertical line in a video feed, per category and per direction.
//!
//! # Architecture
//!
//! One worker thread owns capture, detection and the crossing engine. It
//! hands results to the rest of the process through three shared values:
//!
//! 1. **CounterStore**: category x direction totals, applied once per frame
//!    under a single lock.
//! 2. **FrameBus**: single-slot mailbox holding the latest annotated frame and
//!    the counters as of that frame. Slow readers skip frames.
//! 3. **SnapshotScheduler**: gates periodic snapshot saves without blocking
//!    the worker; triggers during an in-flight save are dropped.
//!
//! Persistence (CSV records, summary exports, JPEG snapshots) runs on its own
//! thread fed by a channel, so disk latency never stalls counting.
//!
//! # Module Structure
//!
//! - `track`, `engine`: identity state and crossing detection (no I/O)
//! - `counter`, `frame`, `snapshot`, `settings`: shared concurrency primitives
//! - `detect`, `ingest`: detector and frame-source seams
//! - `pipeline`: the worker loop and its handle
//! - `sink`: persistence, alerts
//! - `config`: daemon configuration

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod config;
pub mod counter;
pub mod detect;
pub mod engine;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod settings;
pub mod sink;
pub mod snapshot;
pub mod track;

pub use counter::{CounterSnapshot, CounterStore, CrossingTally, DirectionCounts};
pub use detect::{
    CategoryMap, CategorySpec, Detection, DetectorBackend, UnmappedPolicy, UNMAPPED_CATEGORY,
};
pub use engine::{EngineConfig, EngineStats, LineCrossingEngine};
pub use frame::{BusValue, Frame, FrameBus};
pub use ingest::{FrameSource, SyntheticSource};
pub use pipeline::{
    CrossingHandler, PipelineConfig, PipelineHandle, PipelineReport, SnapshotSink,
};
pub use settings::LineSettings;
pub use snapshot::{SaveRequest, SnapshotScheduler};
pub use track::{Side, TrackState, TrackStateStore};

/// Crossing direction relative to the counting line, as seen in the image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    LeftToRight,
    RightToLeft,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::LeftToRight, Direction::RightToLeft];

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::LeftToRight => "left_to_right",
            Direction::RightToLeft => "right_to_left",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One counted crossing. Emitted at most once per live track identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossingEvent {
    pub track_id: u64,
    pub category: String,
    pub direction: Direction,
    pub frame_index: u64,
}
