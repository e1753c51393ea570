//! Runtime-adjustable line settings.
//!
//! Written by the presentation side (slider, keyboard, API), read once per
//! frame by the worker. Each value is an `f64` stored as bits in an
//! `AtomicU64`, so readers never block and never see a torn value.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

pub const DEFAULT_LINE_FRACTION: f64 = 0.5;
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

#[derive(Debug)]
pub struct LineSettings {
    line_fraction: AtomicU64,
    confidence: AtomicU64,
}

/// Values read together at the start of a frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct SettingsView {
    pub line_fraction: f64,
    pub confidence: f64,
}

impl Default for LineSettings {
    fn default() -> Self {
        Self::new(DEFAULT_LINE_FRACTION, DEFAULT_CONFIDENCE)
    }
}

impl LineSettings {
    pub fn new(line_fraction: f64, confidence: f64) -> Self {
        Self {
            line_fraction: AtomicU64::new(sanitize(line_fraction, DEFAULT_LINE_FRACTION).to_bits()),
            confidence: AtomicU64::new(sanitize(confidence, DEFAULT_CONFIDENCE).to_bits()),
        }
    }

    pub fn line_fraction(&self) -> f64 {
        f64::from_bits(self.line_fraction.load(Ordering::Acquire))
    }

    /// Set the line position as a fraction of frame width. Out-of-range
    /// values are clamped to `[0, 1]`; non-finite values are ignored.
    /// Returns the stored value.
    pub fn set_line_fraction(&self, value: f64) -> f64 {
        store(&self.line_fraction, value)
    }

    /// Move the line by `delta` (fraction of width), clamped.
    pub fn nudge_line(&self, delta: f64) -> f64 {
        let mut current = self.line_fraction.load(Ordering::Acquire);
        loop {
            let next = sanitize(f64::from_bits(current) + delta, f64::from_bits(current));
            match self.line_fraction.compare_exchange_weak(
                current,
                next.to_bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn confidence(&self) -> f64 {
        f64::from_bits(self.confidence.load(Ordering::Acquire))
    }

    /// Minimum detection confidence, clamped to `[0, 1]`.
    pub fn set_confidence(&self, value: f64) -> f64 {
        store(&self.confidence, value)
    }

    pub fn view(&self) -> SettingsView {
        SettingsView {
            line_fraction: self.line_fraction(),
            confidence: self.confidence(),
        }
    }
}

fn sanitize(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        fallback
    }
}

fn store(slot: &AtomicU64, value: f64) -> f64 {
    if !value.is_finite() {
        log::warn!("ignoring non-finite setting {}", value);
        return f64::from_bits(slot.load(Ordering::Acquire));
    }
    let value = value.clamp(0.0, 1.0);
    slot.store(value.to_bits(), Ordering::Release);
    value
}
