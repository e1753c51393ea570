//! replay - run a recorded detection script through the crossing engine
//!
//! Reads JSON lines (one frame of detections per line, see
//! `detect::parse_script`) from a file or stdin and prints the crossing
//! events, the final counters and the engine statistics as JSON.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use crossing_kernel::detect::{parse_script, CategoryMap, UnmappedPolicy};
use crossing_kernel::{
    CounterSnapshot, CounterStore, CrossingEvent, DirectionCounts, EngineConfig, EngineStats,
    LineCrossingEngine,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Detection script (JSON lines). Reads stdin when absent or `-`.
    #[arg(long)]
    script: Option<PathBuf>,
    /// Frame width in pixels the detections refer to.
    #[arg(long, default_value_t = 640)]
    width: u32,
    /// Line position as a fraction of the frame width.
    #[arg(long, default_value_t = 0.5)]
    line: f64,
    /// Minimum displacement in pixels before a side change counts.
    #[arg(long, default_value_t = 30.0)]
    margin: f64,
    /// Frames after which an unseen track is forgotten.
    #[arg(long, default_value_t = 30)]
    stale: u64,
    /// Ignore detections below this confidence.
    #[arg(long, default_value_t = 0.0)]
    confidence: f64,
    /// Resolve labels through the built-in category set instead of counting
    /// every label as-is.
    #[arg(long)]
    default_categories: bool,
    /// With a category set, drop unknown labels instead of counting them
    /// as `unmapped`.
    #[arg(long)]
    drop_unmapped: bool,
}

#[derive(Serialize)]
struct ReplayOutput {
    frames: usize,
    events: Vec<CrossingEvent>,
    counters: CounterSnapshot,
    totals: DirectionCounts,
    stats: EngineStats,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    if !(0.0..=1.0).contains(&args.line) {
        return Err(anyhow!("--line must be within [0, 1]"));
    }
    if args.width == 0 {
        return Err(anyhow!("--width must be >= 1"));
    }

    let reader: Box<dyn BufRead> = match args.script.as_deref() {
        Some(path) if path.as_os_str() != "-" => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("open {}", path.display()))?,
        )),
        _ => Box::new(BufReader::new(std::io::stdin())),
    };
    let frames = parse_script(reader)?;

    let mut engine = LineCrossingEngine::new(EngineConfig {
        margin_px: args.margin,
        stale_after_frames: args.stale,
        categories: if args.default_categories {
            CategoryMap::default_set()
        } else {
            CategoryMap::permissive()
        },
        unmapped: if args.drop_unmapped {
            UnmappedPolicy::Drop
        } else {
            UnmappedPolicy::Bucket
        },
    })?;
    let counters = CounterStore::new();
    let mut events = Vec::new();
    for (frame_index, detections) in frames.iter().enumerate() {
        let kept: Vec<_> = detections
            .iter()
            .filter(|det| f64::from(det.confidence) >= args.confidence)
            .cloned()
            .collect();
        let frame_events = engine.process(&kept, args.line, args.width, frame_index as u64);
        counters.apply(&frame_events);
        events.extend(frame_events);
    }

    let output = ReplayOutput {
        frames: frames.len(),
        events,
        counters: counters.snapshot(),
        totals: counters.totals(),
        stats: engine.stats(),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
