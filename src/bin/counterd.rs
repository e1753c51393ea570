//! counterd - live line-crossing counter daemon
//!
//! This daemon:
//! 1. Captures frames from the configured source
//! 2. Runs the detector/tracker and the crossing engine on a worker thread
//! 3. Writes crossing records, periodic snapshots and summaries from a
//!    persistence thread
//! 4. Polls the latest frame and counters on the main thread and logs health
//! 5. On Ctrl-C (or after `--seconds`) writes a final snapshot and summary

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use crossing_kernel::config::CounterdConfig;
use crossing_kernel::detect::{CrowdConfig, ScriptedBackend, SyntheticCrowdBackend};
use crossing_kernel::ingest::open_source;
use crossing_kernel::pipeline::Pipeline;
use crossing_kernel::sink::{AlertHandler, Persistence};
use crossing_kernel::{DetectorBackend, SaveRequest};

const POLL_INTERVAL: Duration = Duration::from_millis(200);
const HEALTH_INTERVAL: Duration = Duration::from_secs(10);
const FINAL_SNAPSHOT_PREFIX: &str = "final_snapshot";

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Stop after this many seconds (runs until Ctrl-C when absent).
    #[arg(long)]
    seconds: Option<u64>,
    /// Simulated walkers on screen when no detection script is given.
    #[arg(long, default_value_t = 4)]
    walkers: usize,
    /// Seed for the simulated crowd.
    #[arg(long, default_value_t = 7)]
    seed: u64,
    /// Replay detections from a JSON-lines script instead of simulating.
    #[arg(long, env = "COUNTER_DETECTION_SCRIPT")]
    script: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if args.walkers == 0 && args.script.is_none() {
        return Err(anyhow!("--walkers must be >= 1"));
    }

    let cfg = CounterdConfig::load()?;
    log::info!(
        "counterd starting: source={} line={} margin={}px data_dir={}",
        cfg.source.url,
        cfg.line.fraction,
        cfg.line.margin_px,
        cfg.data_dir.display()
    );

    let detector: Box<dyn DetectorBackend> = match &args.script {
        Some(path) => Box::new(ScriptedBackend::from_path(path)?),
        None => Box::new(SyntheticCrowdBackend::new(CrowdConfig {
            walkers: args.walkers,
            seed: args.seed,
            ..CrowdConfig::default()
        })?),
    };
    let source = open_source(cfg.source.clone())?;

    let persistence = Persistence::spawn(cfg.persistence_config())?;
    let mut pipeline = Pipeline::new(cfg.pipeline_config()?)
        .with_settings(std::sync::Arc::new(cfg.line_settings()))
        .with_handler(Box::new(persistence.handle()));
    if cfg.alerts_enabled {
        pipeline = pipeline.with_handler(Box::new(AlertHandler::new(cfg.alert_categories.clone())));
    }
    if cfg.snapshots_enabled {
        pipeline = pipeline.with_snapshot_sink(Box::new(persistence.handle()));
    }
    let handle = pipeline.spawn(source, detector)?;

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    let deadline = args
        .seconds
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    let mut last_sequence = 0;
    let mut last_health = Instant::now();
    log::info!("counterd running (Ctrl-C to stop)");
    loop {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                log::info!("shutdown signal received");
                break;
            }
            Err(RecvTimeoutError::Timeout) => {}
        }
        if handle.is_finished() {
            log::warn!("pipeline worker exited");
            break;
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            log::info!("run time elapsed");
            break;
        }

        if let Some(latest) = handle.bus().read_newer(last_sequence) {
            last_sequence = latest.sequence;
            if last_health.elapsed() >= HEALTH_INTERVAL {
                let totals = latest.counters.totals();
                log::info!(
                    "health: frame={} fps={:.1} left_to_right={} right_to_left={} line={:.2}",
                    latest.frame_index,
                    latest.fps,
                    totals.left_to_right,
                    totals.right_to_left,
                    handle.settings().line_fraction()
                );
                last_health = Instant::now();
            }
        }
    }

    let final_frame = handle.bus().read();
    let counters = handle.counters().clone();
    let report = handle.stop();

    let writer = persistence.handle();
    if let Some(latest) = final_frame {
        writer.save_snapshot(SaveRequest::manual(
            latest.frame.clone(),
            FINAL_SNAPSHOT_PREFIX,
        ));
    }
    match writer.export_summary(counters.snapshot(), None) {
        Ok(path) => log::info!("final summary: {}", path.display()),
        Err(err) => log::error!("final summary failed: {:#}", err),
    }
    let stats = persistence.stop()?;
    log::info!("persistence: {}", serde_json::to_string(&stats)?);

    let report = report?;
    log::info!("pipeline report: {}", serde_json::to_string(&report)?);
    Ok(())
}
