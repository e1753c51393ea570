use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use crossing_kernel::detect::ScriptedBackend;
use crossing_kernel::ingest::{SourceConfig, SourceStats};
use crossing_kernel::pipeline::{Pipeline, PipelineConfig};
use crossing_kernel::sink::{Location, Persistence, PersistenceConfig, RECORD_HEADER};
use crossing_kernel::{
    Detection, DetectorBackend, Direction, Frame, FrameSource, LineSettings, SyntheticSource,
};

const WIDTH: u32 = 640;
const HEIGHT: u32 = 48;

fn source(frames: Option<u64>) -> SyntheticSource {
    let source = SyntheticSource::new(SourceConfig {
        url: "stub://test".into(),
        width: WIDTH,
        height: HEIGHT,
        target_fps: 100,
    });
    match frames {
        Some(limit) => source.with_frame_limit(limit),
        None => source,
    }
}

fn at(track_id: u64, label: &str, x: f32) -> Detection {
    Detection::centred(x, 24.0, 20.0, 40.0)
        .with_track(track_id)
        .with_category(label)
}

/// Track 1 walks left to right, track 2 right to left, track 3 is a
/// low-confidence detection that crosses too.
fn script(frames: usize) -> Vec<Vec<Detection>> {
    (0..frames)
        .map(|i| {
            let (a, b) = if i < frames / 2 { (100.0, 540.0) } else { (540.0, 100.0) };
            vec![
                at(1, "adult", a),
                at(2, "bicycle", b),
                at(3, "adult", a).with_confidence(0.1),
            ]
        })
        .collect()
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    done()
}

fn find_file(dir: &Path, prefix: &str) -> Option<std::path::PathBuf> {
    for entry in std::fs::read_dir(dir).ok()?.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if let Some(found) = find_file(&path, prefix) {
                return Some(found);
            }
        } else if entry.file_name().to_string_lossy().starts_with(prefix) {
            return Some(path);
        }
    }
    None
}

#[test]
fn scripted_run_counts_persists_and_publishes() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let persistence = Persistence::spawn(PersistenceConfig {
        data_dir: dir.path().to_path_buf(),
        location: Location::new(Some("Bridge".into()), Some(10.0), Some(20.0)),
        categories: vec!["adult".into(), "bicycle".into()],
    })?;

    let handle = Pipeline::new(PipelineConfig {
        snapshot_interval: Duration::from_millis(20),
        target_fps: Some(100),
        ..PipelineConfig::default()
    })
    .with_settings(Arc::new(LineSettings::new(0.5, 0.5)))
    .with_handler(Box::new(persistence.handle()))
    .with_snapshot_sink(Box::new(persistence.handle()))
    .spawn(source(Some(30)), ScriptedBackend::new(script(30)))?;

    assert!(wait_until(Duration::from_secs(10), || handle.is_finished()));
    let counters = handle.counters().clone();
    let bus = handle.bus().clone();
    let report = handle.stop()?;

    assert_eq!(report.frames_processed, 30);
    assert_eq!(report.events_emitted, 2);
    assert_eq!(report.below_confidence, 30);
    assert_eq!(report.capture_failures, 0);
    assert_eq!(report.engine.events_emitted, 2);
    assert!(report.snapshots_requested >= 1);

    let snap = counters.snapshot();
    assert_eq!(snap.get("adult").get(Direction::LeftToRight), 1);
    assert_eq!(snap.get("bicycle").get(Direction::RightToLeft), 1);

    let latest = bus.read().ok_or_else(|| anyhow!("nothing published"))?;
    assert_eq!(latest.frame_index, 29);
    assert_eq!(latest.sequence, 30);
    assert_eq!(latest.counters, snap);
    // The counting line is drawn on the published frame.
    assert_eq!(latest.frame.pixel(320, 0), Some([255, 255, 0]));

    let stats = persistence.handle().flush()?;
    assert_eq!(stats.records_written, 2);
    assert_eq!(stats.write_errors, 0);
    assert!(stats.snapshots_written >= 1);
    persistence.stop()?;

    let records = find_file(dir.path(), "registros_").ok_or_else(|| anyhow!("no records"))?;
    let text = std::fs::read_to_string(records)?;
    let lines: Vec<_> = text.lines().collect();
    assert_eq!(lines[0], RECORD_HEADER.join(","));
    assert_eq!(lines.len(), 3);
    assert!(lines.iter().any(|l| l.contains(",adult,left_to_right,")));
    assert!(lines.iter().any(|l| l.contains(",bicycle,right_to_left,")));
    // Cumulative session totals on the last record cover both crossings.
    assert!(lines[2].ends_with(",1,1,1"));
    assert!(find_file(dir.path(), "auto_snapshot_").is_some());
    Ok(())
}

#[test]
fn line_settings_are_read_each_frame() -> Result<()> {
    let settings = Arc::new(LineSettings::new(0.9, 0.0));
    // Track sits at x=400 the whole time; only the line moves.
    let frames: Vec<Vec<Detection>> = (0..40).map(|_| vec![at(1, "adult", 400.0)]).collect();
    let handle = Pipeline::new(PipelineConfig {
        target_fps: Some(200),
        ..PipelineConfig::default()
    })
    .with_settings(settings.clone())
    .spawn(source(None), ScriptedBackend::new(frames))?;

    assert!(wait_until(Duration::from_secs(5), || handle.bus().published() >= 5));
    settings.set_line_fraction(0.1);
    assert!(wait_until(Duration::from_secs(5), || handle.bus().published() >= 20));
    let report = handle.stop()?;
    // A stationary track never crosses, wherever the line goes.
    assert_eq!(report.events_emitted, 0);
    Ok(())
}

#[test]
fn pause_stops_capture_until_resume() -> Result<()> {
    let handle = Pipeline::new(PipelineConfig {
        target_fps: Some(200),
        ..PipelineConfig::default()
    })
    .spawn(source(None), ScriptedBackend::new(Vec::new()))?;

    assert!(wait_until(Duration::from_secs(5), || handle.bus().published() > 0));
    handle.pause();
    assert!(handle.is_paused());
    std::thread::sleep(Duration::from_millis(150));
    let frozen = handle.bus().published();
    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(handle.bus().published(), frozen);

    handle.resume();
    assert!(wait_until(Duration::from_secs(5), || handle
        .bus()
        .published()
        > frozen));
    handle.stop()?;
    Ok(())
}

#[test]
fn reset_counters_is_visible_immediately() -> Result<()> {
    let frames = script(10);
    let handle = Pipeline::new(PipelineConfig::default())
        .spawn(source(Some(10)), ScriptedBackend::new(frames))?;
    assert!(wait_until(Duration::from_secs(5), || handle.is_finished()));
    // The low-confidence walker is filtered at the default threshold.
    assert_eq!(handle.counters().snapshot().total(), 2);
    handle.reset_counters();
    assert_eq!(handle.counters().snapshot().total(), 0);
    let report = handle.stop()?;
    assert_eq!(report.events_emitted, 2);
    assert_eq!(report.below_confidence, 10);
    Ok(())
}

struct FailingSource {
    released: Arc<AtomicBool>,
}

impl FrameSource for FailingSource {
    fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        Err(anyhow!("camera unplugged"))
    }

    fn stats(&self) -> SourceStats {
        SourceStats::default()
    }

    fn release(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

struct TrackingDetector {
    calls: Arc<AtomicU64>,
    released: Arc<AtomicBool>,
    fail_every: u64,
}

impl DetectorBackend for TrackingDetector {
    fn name(&self) -> &'static str {
        "tracking-test"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_every > 0 && call % self.fail_every == 0 {
            return Err(anyhow!("inference timeout"));
        }
        Ok(Vec::new())
    }

    fn release(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

#[test]
fn capture_failures_end_worker_and_release_resources() {
    let source_released = Arc::new(AtomicBool::new(false));
    let detector_released = Arc::new(AtomicBool::new(false));
    let handle = Pipeline::new(PipelineConfig {
        max_consecutive_capture_failures: 3,
        ..PipelineConfig::default()
    })
    .spawn(
        FailingSource {
            released: source_released.clone(),
        },
        TrackingDetector {
            calls: Arc::new(AtomicU64::new(0)),
            released: detector_released.clone(),
            fail_every: 0,
        },
    )
    .unwrap();

    assert!(wait_until(Duration::from_secs(5), || handle.is_finished()));
    let err = handle.stop().unwrap_err();
    assert!(format!("{:#}", err).contains("camera unplugged"));
    assert!(source_released.load(Ordering::SeqCst));
    assert!(detector_released.load(Ordering::SeqCst));
}

#[test]
fn detector_failures_skip_frames_without_stopping() -> Result<()> {
    let calls = Arc::new(AtomicU64::new(0));
    let released = Arc::new(AtomicBool::new(false));
    let handle = Pipeline::new(PipelineConfig::default()).spawn(
        source(Some(12)),
        TrackingDetector {
            calls: calls.clone(),
            released: released.clone(),
            fail_every: 3,
        },
    )?;
    assert!(wait_until(Duration::from_secs(5), || handle.is_finished()));
    let report = handle.stop()?;
    assert_eq!(report.frames_processed, 12);
    assert_eq!(report.detector_failures, 4);
    assert_eq!(calls.load(Ordering::SeqCst), 12);
    assert!(released.load(Ordering::SeqCst));
    Ok(())
}

#[test]
fn stop_releases_resources_of_running_worker() -> Result<()> {
    let released = Arc::new(AtomicBool::new(false));
    let handle = Pipeline::new(PipelineConfig {
        target_fps: Some(100),
        ..PipelineConfig::default()
    })
    .spawn(
        source(None),
        TrackingDetector {
            calls: Arc::new(AtomicU64::new(0)),
            released: released.clone(),
            fail_every: 0,
        },
    )?;
    assert!(wait_until(Duration::from_secs(5), || handle.bus().published() > 2));
    let report = handle.stop()?;
    assert!(report.frames_processed > 2);
    assert!(released.load(Ordering::SeqCst));
    Ok(())
}
