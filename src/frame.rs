//! Frames and the latest-frame mailbox.
//!
//! - `Frame`: owned RGB8 pixel buffer with just enough drawing to mark the
//!   counting line and detections on the published copy.
//! - `FrameBus`: single-slot handoff from the worker to any number of readers.
//!   Each publish replaces the slot with a new immutable `Arc<BusValue>`, so a
//!   reader holds one complete value and never a mix of two publishes.
//!   Readers slower than the worker simply miss frames.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local};

use crate::counter::CounterSnapshot;
use crate::detect::Detection;

pub const LINE_COLOUR: [u8; 3] = [255, 255, 0];
pub const BOX_COLOUR: [u8; 3] = [0, 255, 0];
pub const LINE_THICKNESS: u32 = 3;

/// Owned RGB8 frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = (width as usize) * (height as usize) * 3;
        if pixels.len() != expected {
            return Err(anyhow!(
                "frame {}x{} needs {} bytes, got {}",
                width,
                height,
                expected,
                pixels.len()
            ));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Frame filled with a single colour.
    pub fn blank(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let count = (width as usize) * (height as usize);
        let mut pixels = Vec::with_capacity(count * 3);
        for _ in 0..count {
            pixels.extend_from_slice(&rgb);
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = ((y as usize) * (self.width as usize) + x as usize) * 3;
        Some([self.pixels[idx], self.pixels[idx + 1], self.pixels[idx + 2]])
    }

    fn put(&mut self, x: u32, y: u32, rgb: [u8; 3]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let idx = ((y as usize) * (self.width as usize) + x as usize) * 3;
        self.pixels[idx..idx + 3].copy_from_slice(&rgb);
    }

    /// Draw a full-height vertical band centred on `x`.
    pub fn draw_vertical_line(&mut self, x: u32, thickness: u32, rgb: [u8; 3]) {
        let half = thickness / 2;
        let start = x.saturating_sub(half);
        let end = x.saturating_add(thickness.saturating_sub(half)).min(self.width);
        for col in start..end {
            for row in 0..self.height {
                self.put(col, row, rgb);
            }
        }
    }

    /// Draw the outline of a `[x1, y1, x2, y2]` box, clipped to the frame.
    pub fn draw_box(&mut self, bbox: [f32; 4], rgb: [u8; 3]) {
        let clamp_x = |v: f32| v.max(0.0).min(self.width.saturating_sub(1) as f32) as u32;
        let clamp_y = |v: f32| v.max(0.0).min(self.height.saturating_sub(1) as f32) as u32;
        if self.width == 0 || self.height == 0 || bbox.iter().any(|v| !v.is_finite()) {
            return;
        }
        let (x1, x2) = (clamp_x(bbox[0]), clamp_x(bbox[2]));
        let (y1, y2) = (clamp_y(bbox[1]), clamp_y(bbox[3]));
        for x in x1.min(x2)..=x1.max(x2) {
            self.put(x, y1, rgb);
            self.put(x, y2, rgb);
        }
        for y in y1.min(y2)..=y1.max(y2) {
            self.put(x1, y, rgb);
            self.put(x2, y, rgb);
        }
    }

    /// Mark the counting line and detection boxes for display.
    pub fn annotate(&mut self, line_x: f64, detections: &[Detection]) {
        for det in detections {
            self.draw_box(det.bbox, BOX_COLOUR);
        }
        if line_x.is_finite() && line_x >= 0.0 {
            self.draw_vertical_line(line_x.round() as u32, LINE_THICKNESS, LINE_COLOUR);
        }
    }
}

// ----------------------------------------------------------------------------
// FrameBus
// ----------------------------------------------------------------------------

/// One published worker iteration.
#[derive(Clone, Debug)]
pub struct BusValue {
    pub frame: Frame,
    /// Counters after this frame's crossings were applied.
    pub counters: CounterSnapshot,
    pub timestamp: DateTime<Local>,
    pub frame_index: u64,
    pub fps: f64,
    /// Assigned by the bus on publish, strictly increasing from 1.
    pub sequence: u64,
}

impl BusValue {
    pub fn new(frame: Frame, counters: CounterSnapshot, frame_index: u64) -> Self {
        Self {
            frame,
            counters,
            timestamp: Local::now(),
            frame_index,
            fps: 0.0,
            sequence: 0,
        }
    }

    pub fn with_fps(mut self, fps: f64) -> Self {
        self.fps = fps;
        self
    }
}

/// Single-slot latest-value mailbox.
#[derive(Default)]
pub struct FrameBus {
    slot: Mutex<Option<Arc<BusValue>>>,
    published: AtomicU64,
}

impl FrameBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the slot with `value`. Never waits on readers beyond the
    /// pointer swap. Returns the published value with its sequence number.
    pub fn publish(&self, mut value: BusValue) -> Arc<BusValue> {
        let mut slot = self
            .slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        value.sequence = self.published.fetch_add(1, Ordering::SeqCst) + 1;
        let value = Arc::new(value);
        let previous = slot.replace(value.clone());
        drop(slot);
        // The previous value may be the last handle to a large frame; free it
        // outside the lock.
        drop(previous);
        value
    }

    /// Latest published value, or `None` before the first publish.
    pub fn read(&self) -> Option<Arc<BusValue>> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Latest value if it is newer than `last_sequence`.
    pub fn read_newer(&self, last_sequence: u64) -> Option<Arc<BusValue>> {
        self.read().filter(|value| value.sequence > last_sequence)
    }

    /// Number of values published so far.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::SeqCst)
    }
}
