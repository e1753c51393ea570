use anyhow::{anyhow, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::detect::backend::DetectorBackend;
use crate::detect::Detection;
use crate::frame::Frame;

/// Simulated crowd parameters.
#[derive(Clone, Debug)]
pub struct CrowdConfig {
    /// Walkers on screen at any time.
    pub walkers: usize,
    /// Mean horizontal speed in pixels per frame.
    pub speed_px: f32,
    /// Per-frame horizontal noise amplitude in pixels.
    pub jitter_px: f32,
    /// Frames a walker must be visible before it gets a track id.
    pub confirm_after: u32,
    /// Raw labels drawn uniformly for new walkers.
    pub labels: Vec<String>,
    pub seed: u64,
}

impl Default for CrowdConfig {
    fn default() -> Self {
        Self {
            walkers: 4,
            speed_px: 6.0,
            jitter_px: 4.0,
            confirm_after: 3,
            labels: vec!["person".into(), "person".into(), "child".into(), "bicycle".into()],
            seed: 7,
        }
    }
}

struct Walker {
    track_id: u64,
    label: String,
    x: f32,
    y: f32,
    vx: f32,
    age: u32,
}

/// Stand-in detector + tracker: walkers cross the frame horizontally with
/// noisy positions and stable identities. A walker that leaves the frame is
/// replaced by a new one with a fresh id entering from a random edge.
pub struct SyntheticCrowdBackend {
    cfg: CrowdConfig,
    rng: StdRng,
    walkers: Vec<Walker>,
    next_id: u64,
}

const BOX_W: f32 = 40.0;
const BOX_H: f32 = 90.0;

impl SyntheticCrowdBackend {
    pub fn new(cfg: CrowdConfig) -> Result<Self> {
        if cfg.labels.is_empty() {
            return Err(anyhow!("synthetic crowd needs at least one label"));
        }
        if !cfg.speed_px.is_finite() || cfg.speed_px <= 0.0 {
            return Err(anyhow!("synthetic crowd speed must be > 0"));
        }
        if !cfg.jitter_px.is_finite() || cfg.jitter_px < 0.0 {
            return Err(anyhow!("synthetic crowd jitter must be >= 0"));
        }
        let rng = StdRng::seed_from_u64(cfg.seed);
        Ok(Self {
            cfg,
            rng,
            walkers: Vec::new(),
            next_id: 1,
        })
    }

    /// Identities handed out so far.
    pub fn identities(&self) -> u64 {
        self.next_id - 1
    }

    fn spawn(&mut self, width: f32, height: f32, anywhere: bool) -> Walker {
        let rightward = self.rng.gen_bool(0.5);
        let x = if anywhere {
            self.rng.gen_range(0.0..width)
        } else if rightward {
            0.0
        } else {
            width - 1.0
        };
        let speed = self.cfg.speed_px * self.rng.gen_range(0.6..1.4);
        let label_idx = self.rng.gen_range(0..self.cfg.labels.len());
        let walker = Walker {
            track_id: self.next_id,
            label: self.cfg.labels[label_idx].clone(),
            x,
            y: self.rng.gen_range(height * 0.3..height * 0.8),
            vx: if rightward { speed } else { -speed },
            age: 0,
        };
        self.next_id += 1;
        walker
    }
}

impl DetectorBackend for SyntheticCrowdBackend {
    fn name(&self) -> &'static str {
        "synthetic-crowd"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let width = frame.width() as f32;
        let height = frame.height() as f32;
        if width < 2.0 || height < 2.0 {
            return Ok(Vec::new());
        }
        while self.walkers.len() < self.cfg.walkers {
            let anywhere = self.next_id as usize <= self.cfg.walkers;
            let walker = self.spawn(width, height, anywhere);
            self.walkers.push(walker);
        }

        let mut detections = Vec::with_capacity(self.walkers.len());
        for idx in 0..self.walkers.len() {
            let noise = if self.cfg.jitter_px > 0.0 {
                self.rng.gen_range(-self.cfg.jitter_px..=self.cfg.jitter_px)
            } else {
                0.0
            };
            let walker = &mut self.walkers[idx];
            walker.x += walker.vx;
            walker.age += 1;
            if walker.x < -BOX_W || walker.x > width + BOX_W {
                let fresh = self.spawn(width, height, false);
                self.walkers[idx] = fresh;
                continue;
            }
            let mut det = Detection::centred(walker.x + noise, walker.y, BOX_W, BOX_H)
                .with_category(&walker.label)
                .with_confidence(0.9);
            if walker.age >= self.cfg.confirm_after {
                det = det.with_track(walker.track_id);
            }
            detections.push(det);
        }
        Ok(detections)
    }
}
