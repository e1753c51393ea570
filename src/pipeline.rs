//! Worker loop.
//!
//! One thread owns the frame source, the detector and the crossing engine.
//! Per iteration:
//!
//! 1. read the line settings once
//! 2. capture, detect, drop detections under the confidence threshold
//! 3. run the engine, apply its events to the counters, notify handlers
//! 4. annotate and publish the frame with the post-apply counters
//! 5. offer the published frame to the snapshot scheduler
//!
//! A frame's events are always applied before that frame is published.
//! Handlers and the snapshot sink must only enqueue; any disk or network
//! work belongs on their own threads. The stop flag is checked once per
//! iteration and the current iteration always completes. Source and
//! detector are released on every exit path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::counter::{CounterStore, CrossingTally};
use crate::detect::{Detection, DetectorBackend};
use crate::engine::{EngineConfig, EngineStats, LineCrossingEngine};
use crate::frame::{BusValue, Frame, FrameBus};
use crate::ingest::FrameSource;
use crate::settings::LineSettings;
use crate::snapshot::{SaveRequest, SnapshotScheduler, DEFAULT_SNAPSHOT_SECS};

pub const DEFAULT_MAX_CAPTURE_FAILURES: u32 = 50;
const CAPTURE_RETRY: Duration = Duration::from_millis(100);
const PAUSE_POLL: Duration = Duration::from_millis(50);
const FPS_WINDOW: Duration = Duration::from_secs(1);

/// Receives the crossings of each frame, after they were counted.
///
/// Runs on the worker thread; must not block.
pub trait CrossingHandler: Send {
    fn on_crossings(&mut self, tallies: &[CrossingTally]);
}

/// Receives snapshot save requests. Runs on the worker thread; must not block.
pub trait SnapshotSink: Send {
    fn submit(&mut self, request: SaveRequest);
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub engine: EngineConfig,
    pub snapshot_interval: Duration,
    /// Pace the loop to at most this rate. `None` runs as fast as the
    /// source delivers.
    pub target_fps: Option<u32>,
    /// Consecutive capture errors tolerated before the worker gives up.
    pub max_consecutive_capture_failures: u32,
    /// Draw the counting line and detection boxes on published frames.
    pub annotate: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            snapshot_interval: Duration::from_secs(DEFAULT_SNAPSHOT_SECS),
            target_fps: None,
            max_consecutive_capture_failures: DEFAULT_MAX_CAPTURE_FAILURES,
            annotate: true,
        }
    }
}

/// Totals for one worker run.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PipelineReport {
    pub frames_processed: u64,
    pub events_emitted: u64,
    pub capture_failures: u64,
    pub detector_failures: u64,
    pub below_confidence: u64,
    pub snapshots_requested: u64,
    pub snapshots_dropped: u64,
    pub engine: EngineStats,
}

// ----------------------------------------------------------------------------
// Builder / handle
// ----------------------------------------------------------------------------

pub struct Pipeline {
    cfg: PipelineConfig,
    settings: Arc<LineSettings>,
    counters: Arc<CounterStore>,
    bus: Arc<FrameBus>,
    handlers: Vec<Box<dyn CrossingHandler>>,
    snapshots: Option<Box<dyn SnapshotSink>>,
}

impl Pipeline {
    pub fn new(cfg: PipelineConfig) -> Self {
        Self {
            cfg,
            settings: Arc::new(LineSettings::default()),
            counters: Arc::new(CounterStore::new()),
            bus: Arc::new(FrameBus::new()),
            handlers: Vec::new(),
            snapshots: None,
        }
    }

    pub fn with_settings(mut self, settings: Arc<LineSettings>) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_counters(mut self, counters: Arc<CounterStore>) -> Self {
        self.counters = counters;
        self
    }

    pub fn with_bus(mut self, bus: Arc<FrameBus>) -> Self {
        self.bus = bus;
        self
    }

    pub fn with_handler(mut self, handler: Box<dyn CrossingHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn with_snapshot_sink(mut self, sink: Box<dyn SnapshotSink>) -> Self {
        self.snapshots = Some(sink);
        self
    }

    /// Validate the configuration and start the worker thread.
    pub fn spawn<S, D>(self, source: S, detector: D) -> Result<PipelineHandle>
    where
        S: FrameSource + 'static,
        D: DetectorBackend + 'static,
    {
        let engine = LineCrossingEngine::new(self.cfg.engine.clone())?;
        let scheduler = SnapshotScheduler::new(self.cfg.snapshot_interval, Instant::now())?;
        if self.cfg.target_fps == Some(0) {
            return Err(anyhow!("target_fps must be > 0 when set"));
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let paused = Arc::new(AtomicBool::new(false));
        let mut worker = Worker {
            cfg: self.cfg,
            engine,
            scheduler,
            settings: self.settings.clone(),
            counters: self.counters.clone(),
            bus: self.bus.clone(),
            handlers: self.handlers,
            snapshots: self.snapshots,
            shutdown: shutdown.clone(),
            paused: paused.clone(),
            fps: FpsMeter::new(Instant::now()),
            report: PipelineReport::default(),
        };
        let join = std::thread::Builder::new()
            .name("crossing-worker".into())
            .spawn(move || {
                let mut resources = Resources { source, detector };
                let result = worker.run(&mut resources);
                worker.report.engine = worker.engine.stats();
                worker.report.snapshots_requested = worker.scheduler.requested();
                worker.report.snapshots_dropped = worker.scheduler.dropped();
                match result {
                    Ok(()) => Ok(worker.report),
                    Err(err) => {
                        log::error!("pipeline worker stopped: {:#}", err);
                        Err(err)
                    }
                }
            })?;

        Ok(PipelineHandle {
            shutdown,
            paused,
            settings: self.settings,
            counters: self.counters,
            bus: self.bus,
            join: Some(join),
        })
    }
}

pub struct PipelineHandle {
    shutdown: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    settings: Arc<LineSettings>,
    counters: Arc<CounterStore>,
    bus: Arc<FrameBus>,
    join: Option<JoinHandle<Result<PipelineReport>>>,
}

impl PipelineHandle {
    /// Signal the worker, wait for its current iteration and return its report.
    pub fn stop(mut self) -> Result<PipelineReport> {
        self.shutdown.store(true, Ordering::SeqCst);
        match self.join.take() {
            Some(join) => join
                .join()
                .map_err(|_| anyhow!("pipeline worker thread panicked"))?,
            None => Err(anyhow!("pipeline worker already joined")),
        }
    }

    /// Skip capture until `resume`. Counters and tracks are kept.
    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::SeqCst) {
            log::info!("pipeline paused");
        }
    }

    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::SeqCst) {
            log::info!("pipeline resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Zero the counters. Live tracks are kept, so an identity that already
    /// crossed is not counted again after a reset.
    pub fn reset_counters(&self) {
        self.counters.reset();
    }

    pub fn settings(&self) -> &Arc<LineSettings> {
        &self.settings
    }

    pub fn counters(&self) -> &Arc<CounterStore> {
        &self.counters
    }

    pub fn bus(&self) -> &Arc<FrameBus> {
        &self.bus
    }

    /// True once the worker has exited (stop, end of stream or error).
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, |join| join.is_finished())
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::error!("pipeline worker thread panicked");
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Worker
// ----------------------------------------------------------------------------

/// Owns the capture and detector for the life of the worker thread and
/// releases both when dropped.
struct Resources<S: FrameSource, D: DetectorBackend> {
    source: S,
    detector: D,
}

impl<S: FrameSource, D: DetectorBackend> Drop for Resources<S, D> {
    fn drop(&mut self) {
        self.source.release();
        self.detector.release();
        log::debug!("pipeline resources released");
    }
}

struct FpsMeter {
    window_start: Instant,
    frames: u32,
    fps: f64,
}

impl FpsMeter {
    fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            frames: 0,
            fps: 0.0,
        }
    }

    fn tick(&mut self, now: Instant) -> f64 {
        self.frames += 1;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed >= FPS_WINDOW {
            self.fps = f64::from(self.frames) / elapsed.as_secs_f64();
            self.frames = 0;
            self.window_start = now;
        }
        self.fps
    }
}

struct Worker {
    cfg: PipelineConfig,
    engine: LineCrossingEngine,
    scheduler: SnapshotScheduler,
    settings: Arc<LineSettings>,
    counters: Arc<CounterStore>,
    bus: Arc<FrameBus>,
    handlers: Vec<Box<dyn CrossingHandler>>,
    snapshots: Option<Box<dyn SnapshotSink>>,
    shutdown: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    fps: FpsMeter,
    report: PipelineReport,
}

impl Worker {
    fn run<S: FrameSource, D: DetectorBackend>(
        &mut self,
        resources: &mut Resources<S, D>,
    ) -> Result<()> {
        resources.source.connect()?;
        resources.detector.warm_up()?;
        log::info!(
            "pipeline started: detector={} snapshot_interval={}s",
            resources.detector.name(),
            self.cfg.snapshot_interval.as_secs()
        );

        let frame_budget = self
            .cfg
            .target_fps
            .map(|fps| Duration::from_secs_f64(1.0 / f64::from(fps)));
        let mut frame_index: u64 = 0;
        let mut consecutive_failures: u32 = 0;
        let mut was_paused = false;

        while !self.shutdown.load(Ordering::SeqCst) {
            if self.paused.load(Ordering::SeqCst) {
                if !was_paused {
                    self.scheduler.pause();
                    was_paused = true;
                }
                std::thread::sleep(PAUSE_POLL);
                continue;
            }
            if was_paused {
                self.scheduler.resume(Instant::now());
                was_paused = false;
            }

            let started = Instant::now();
            let frame = match resources.source.next_frame() {
                Ok(Some(frame)) => {
                    consecutive_failures = 0;
                    frame
                }
                Ok(None) => {
                    log::info!("source ended after {} frames", frame_index);
                    break;
                }
                Err(err) => {
                    self.report.capture_failures += 1;
                    consecutive_failures += 1;
                    if consecutive_failures >= self.cfg.max_consecutive_capture_failures {
                        return Err(err.context(format!(
                            "capture failed {} times in a row",
                            consecutive_failures
                        )));
                    }
                    log::warn!("capture failed ({}): {:#}", consecutive_failures, err);
                    std::thread::sleep(CAPTURE_RETRY);
                    continue;
                }
            };

            self.process_frame(frame, frame_index, &mut resources.detector);
            frame_index += 1;

            if let Some(budget) = frame_budget {
                let spent = started.elapsed();
                if spent < budget {
                    std::thread::sleep(budget - spent);
                }
            }
        }

        log::info!(
            "pipeline stopped after {} frames, {} crossings",
            self.report.frames_processed,
            self.report.events_emitted
        );
        Ok(())
    }

    fn process_frame<D: DetectorBackend>(&mut self, frame: Frame, frame_index: u64, detector: &mut D) {
        let view = self.settings.view();

        let detections = match detector.detect(&frame) {
            Ok(detections) => detections,
            Err(err) => {
                self.report.detector_failures += 1;
                log::warn!(
                    "detector {} failed on frame {}: {:#}",
                    detector.name(),
                    frame_index,
                    err
                );
                Vec::new()
            }
        };
        let before = detections.len();
        let kept: Vec<Detection> = detections
            .into_iter()
            .filter(|det| f64::from(det.confidence) >= view.confidence)
            .collect();
        self.report.below_confidence += (before - kept.len()) as u64;

        let width = frame.width();
        let events = self
            .engine
            .process(&kept, view.line_fraction, width, frame_index);
        let tallies = self.counters.apply(&events);
        if !tallies.is_empty() {
            self.report.events_emitted += tallies.len() as u64;
            for handler in &mut self.handlers {
                handler.on_crossings(&tallies);
            }
        }

        let mut display = frame;
        if self.cfg.annotate {
            display.annotate(view.line_fraction * f64::from(width), &kept);
        }
        let now = Instant::now();
        let fps = self.fps.tick(now);
        let value = BusValue::new(display, self.counters.snapshot(), frame_index).with_fps(fps);
        let published = self.bus.publish(value);
        self.report.frames_processed += 1;

        if let Some(sink) = &mut self.snapshots {
            if let Some(request) = self.scheduler.on_frame(&published.frame, now) {
                sink.submit(request);
            }
        }
    }
}
