//! Persistence thread.
//!
//! Crossing records, snapshots and summaries are written here, off the
//! pipeline worker. `PersistenceHandle` only enqueues, so a slow disk delays
//! files, never counting. Write failures are logged and counted; they do not
//! stop the thread.

use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local};
use serde::Serialize;

use crate::counter::{CounterSnapshot, CrossingTally};
use crate::pipeline::{CrossingHandler, SnapshotSink};
use crate::sink::csv_log::{CrossingRecord, RecordLog, Summary};
use crate::sink::session::{Location, Session};
use crate::sink::snapshot_store::save_jpeg;
use crate::snapshot::SaveRequest;

#[derive(Clone, Debug)]
pub struct PersistenceConfig {
    pub data_dir: PathBuf,
    pub location: Location,
    /// Categories listed in summaries even when nothing crossed.
    pub categories: Vec<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PersistenceStats {
    pub records_written: u64,
    pub snapshots_written: u64,
    pub summaries_written: u64,
    pub sessions_opened: u64,
    pub write_errors: u64,
}

enum Job {
    Crossings(Vec<CrossingTally>, DateTime<Local>),
    Snapshot(SaveRequest),
    Summary {
        counts: CounterSnapshot,
        path: Option<PathBuf>,
        reply: Sender<Result<PathBuf>>,
    },
    Location(Location),
    Flush(Sender<PersistenceStats>),
    Shutdown,
}

/// Owner of the persistence thread.
pub struct Persistence {
    tx: Sender<Job>,
    join: Option<JoinHandle<PersistenceStats>>,
}

impl Persistence {
    /// Open the first session folder and start the thread. Fails if the data
    /// directory cannot be created.
    pub fn spawn(cfg: PersistenceConfig) -> Result<Self> {
        let writer = Writer::open(cfg, Local::now())?;
        let (tx, rx) = mpsc::channel();
        let join = std::thread::Builder::new()
            .name("crossing-persistence".into())
            .spawn(move || writer.run(rx))?;
        Ok(Self {
            tx,
            join: Some(join),
        })
    }

    pub fn handle(&self) -> PersistenceHandle {
        PersistenceHandle {
            tx: self.tx.clone(),
        }
    }

    /// Finish every queued job, then stop the thread.
    pub fn stop(mut self) -> Result<PersistenceStats> {
        let _ = self.tx.send(Job::Shutdown);
        match self.join.take() {
            Some(join) => join
                .join()
                .map_err(|_| anyhow!("persistence thread panicked")),
            None => Err(anyhow!("persistence thread already joined")),
        }
    }
}

impl Drop for Persistence {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            let _ = self.tx.send(Job::Shutdown);
            if join.join().is_err() {
                log::error!("persistence thread panicked");
            }
        }
    }
}

/// Cloneable producer side. Every method returns immediately except
/// `export_summary` and `flush`, which wait for the thread.
#[derive(Clone)]
pub struct PersistenceHandle {
    tx: Sender<Job>,
}

impl PersistenceHandle {
    fn send(&self, job: Job) {
        if self.tx.send(job).is_err() {
            log::error!("persistence thread is gone; dropping write");
        }
    }

    pub fn record(&self, tallies: &[CrossingTally]) {
        if !tallies.is_empty() {
            self.send(Job::Crossings(tallies.to_vec(), Local::now()));
        }
    }

    pub fn save_snapshot(&self, request: SaveRequest) {
        self.send(Job::Snapshot(request));
    }

    /// Move the session to a new location. A new folder is opened if the
    /// name changed or a coordinate moved by more than 0.001 degrees.
    pub fn set_location(&self, location: Location) {
        self.send(Job::Location(location));
    }

    /// Write a summary of `counts` and return its path. Without `path` the
    /// file goes into the current session folder.
    pub fn export_summary(&self, counts: CounterSnapshot, path: Option<PathBuf>) -> Result<PathBuf> {
        let (reply, rx) = mpsc::channel();
        self.tx
            .send(Job::Summary {
                counts,
                path,
                reply,
            })
            .map_err(|_| anyhow!("persistence thread is gone"))?;
        rx.recv()
            .context("persistence thread exited before writing the summary")?
    }

    /// Wait until every job queued before this call is done.
    pub fn flush(&self) -> Result<PersistenceStats> {
        let (reply, rx) = mpsc::channel();
        self.tx
            .send(Job::Flush(reply))
            .map_err(|_| anyhow!("persistence thread is gone"))?;
        rx.recv().context("persistence thread exited during flush")
    }
}

impl CrossingHandler for PersistenceHandle {
    fn on_crossings(&mut self, tallies: &[CrossingTally]) {
        self.record(tallies);
    }
}

impl SnapshotSink for PersistenceHandle {
    fn submit(&mut self, request: SaveRequest) {
        self.save_snapshot(request);
    }
}

// ----------------------------------------------------------------------------
// Writer (persistence thread state)
// ----------------------------------------------------------------------------

struct Writer {
    cfg: PersistenceConfig,
    session: Session,
    records: RecordLog,
    stats: PersistenceStats,
}

impl Writer {
    fn open(cfg: PersistenceConfig, now: DateTime<Local>) -> Result<Self> {
        std::fs::create_dir_all(&cfg.data_dir)
            .with_context(|| format!("create data dir {}", cfg.data_dir.display()))?;
        let session = Session::open(&cfg.data_dir, cfg.location.clone(), now)?;
        let records = RecordLog::open(session.records_path())?;
        Ok(Self {
            cfg,
            session,
            records,
            stats: PersistenceStats {
                sessions_opened: 1,
                ..PersistenceStats::default()
            },
        })
    }

    fn run(mut self, rx: Receiver<Job>) -> PersistenceStats {
        while let Ok(job) = rx.recv() {
            match job {
                Job::Crossings(tallies, at) => {
                    let result = self.write_crossings(&tallies, at);
                    self.check(result, "write crossing records");
                }
                Job::Snapshot(request) => {
                    let result = self.write_snapshot(request);
                    self.check(result, "write snapshot");
                }
                Job::Summary {
                    counts,
                    path,
                    reply,
                } => {
                    let result = self.write_summary(&counts, path);
                    if let Err(err) = &result {
                        self.stats.write_errors += 1;
                        log::error!("write summary: {:#}", err);
                    }
                    let _ = reply.send(result);
                }
                Job::Location(location) => {
                    self.cfg.location = location;
                    let result = self.roll_session(Local::now());
                    self.check(result, "switch session folder");
                }
                Job::Flush(reply) => {
                    let _ = reply.send(self.stats);
                }
                Job::Shutdown => break,
            }
        }
        log::info!(
            "persistence stopped: {} records, {} snapshots, {} errors",
            self.stats.records_written,
            self.stats.snapshots_written,
            self.stats.write_errors
        );
        self.stats
    }

    fn check<T>(&mut self, result: Result<T>, what: &str) {
        if let Err(err) = result {
            self.stats.write_errors += 1;
            log::error!("{}: {:#}", what, err);
        }
    }

    /// Open a new session folder if the date or the location changed.
    fn roll_session(&mut self, now: DateTime<Local>) -> Result<()> {
        if !self.session.is_stale(now, &self.cfg.location) {
            return Ok(());
        }
        let session = Session::open(&self.cfg.data_dir, self.cfg.location.clone(), now)?;
        self.records = RecordLog::open(session.records_path())?;
        self.session = session;
        self.stats.sessions_opened += 1;
        Ok(())
    }

    fn write_crossings(&mut self, tallies: &[CrossingTally], at: DateTime<Local>) -> Result<()> {
        self.roll_session(at)?;
        let location = self.session.location();
        let records: Vec<_> = tallies
            .iter()
            .map(|tally| CrossingRecord::from_tally(tally, location, at))
            .collect();
        self.records.append(&records)?;
        self.stats.records_written += records.len() as u64;
        Ok(())
    }

    fn write_snapshot(&mut self, request: SaveRequest) -> Result<PathBuf> {
        self.roll_session(request.timestamp)?;
        let saved = save_jpeg(
            &request.frame,
            self.session.snapshot_dir(),
            &request.prefix,
            request.timestamp,
        );
        // Releases the scheduler's in-flight slot, written or not.
        drop(request);
        let path = saved?;
        self.stats.snapshots_written += 1;
        Ok(path)
    }

    fn write_summary(&mut self, counts: &CounterSnapshot, path: Option<PathBuf>) -> Result<PathBuf> {
        let at = Local::now();
        self.roll_session(at)?;
        let path = path.unwrap_or_else(|| {
            self.session
                .folder()
                .join(format!("resumen_{}.csv", at.format("%H%M%S")))
        });
        let session_id = self.session.id();
        Summary {
            counts,
            categories: &self.cfg.categories,
            location: self.session.location(),
            session_id: &session_id,
            at,
        }
        .write(&path)?;
        self.stats.summaries_written += 1;
        Ok(path)
    }
}
