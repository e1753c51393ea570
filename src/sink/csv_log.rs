//! CSV crossing records and summary exports.
//!
//! Records are appended one line per crossing and flushed per batch. Fields
//! are quoted only when they contain a separator, quote or line break.

use std::borrow::Cow;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};

use crate::counter::{CounterSnapshot, CrossingTally, DirectionCounts};
use crate::sink::session::Location;
use crate::Direction;

pub const RECORD_HEADER: [&str; 11] = [
    "timestamp",
    "date",
    "time",
    "latitude",
    "longitude",
    "location",
    "category",
    "direction",
    "cumulative_left_to_right",
    "cumulative_right_to_left",
    "category_total",
];

pub const SUMMARY_HEADER: [&str; 12] = [
    "date",
    "time",
    "category",
    "left_to_right",
    "right_to_left",
    "category_total",
    "session_total",
    "location",
    "latitude",
    "longitude",
    "session_id",
    "notes",
];

pub const TOTAL_ROW: &str = "TOTAL";

/// One persisted crossing.
#[derive(Clone, Debug, PartialEq)]
pub struct CrossingRecord {
    pub timestamp: DateTime<Local>,
    pub location: Location,
    pub category: String,
    pub direction: Direction,
    /// Session totals right after this crossing.
    pub cumulative: DirectionCounts,
    pub category_total: u64,
}

impl CrossingRecord {
    pub fn from_tally(tally: &CrossingTally, location: &Location, at: DateTime<Local>) -> Self {
        Self {
            timestamp: at,
            location: location.clone(),
            category: tally.event.category.clone(),
            direction: tally.event.direction,
            cumulative: tally.session,
            category_total: tally.category.total(),
        }
    }

    fn fields(&self) -> [String; 11] {
        [
            self.timestamp.format("%Y-%m-%dT%H:%M:%S%:z").to_string(),
            self.timestamp.format("%Y-%m-%d").to_string(),
            self.timestamp.format("%H:%M:%S").to_string(),
            optional_coordinate(self.location.latitude),
            optional_coordinate(self.location.longitude),
            self.location.display_name().to_string(),
            self.category.clone(),
            self.direction.to_string(),
            self.cumulative.left_to_right.to_string(),
            self.cumulative.right_to_left.to_string(),
            self.category_total.to_string(),
        ]
    }
}

fn optional_coordinate(value: Option<f64>) -> String {
    value
        .filter(|v| v.is_finite())
        .map(|v| v.to_string())
        .unwrap_or_default()
}

/// Quote a field if it would otherwise break the row.
pub fn csv_field(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

fn csv_line<S: AsRef<str>>(fields: &[S]) -> String {
    let mut line = fields
        .iter()
        .map(|field| csv_field(field.as_ref()))
        .collect::<Vec<_>>()
        .join(",");
    line.push('\n');
    line
}

/// Append-only crossing record file.
#[derive(Debug)]
pub struct RecordLog {
    path: PathBuf,
    written: u64,
}

impl RecordLog {
    /// Open `path`, writing the header if the file is new or empty.
    pub fn open(path: &Path) -> Result<Self> {
        let is_new = std::fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
        if is_new {
            std::fs::write(path, csv_line(&RECORD_HEADER))
                .with_context(|| format!("create record file {}", path.display()))?;
            log::info!("record file created: {}", path.display());
        } else {
            log::info!("appending to existing record file: {}", path.display());
        }
        Ok(Self {
            path: path.to_path_buf(),
            written: 0,
        })
    }

    pub fn append(&mut self, records: &[CrossingRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut buf = String::new();
        for record in records {
            buf.push_str(&csv_line(&record.fields()));
        }
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open record file {}", self.path.display()))?;
        file.write_all(buf.as_bytes())
            .and_then(|_| file.flush())
            .with_context(|| format!("append to {}", self.path.display()))?;
        self.written += records.len() as u64;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records appended through this handle.
    pub fn written(&self) -> u64 {
        self.written
    }
}

/// Per-category totals plus a `TOTAL` row.
///
/// `categories` lists the configured categories so they appear even with
/// zero crossings; any other category present in `counts` follows.
pub struct Summary<'a> {
    pub counts: &'a CounterSnapshot,
    pub categories: &'a [String],
    pub location: &'a Location,
    pub session_id: &'a str,
    pub at: DateTime<Local>,
}

impl Summary<'_> {
    pub fn rows(&self) -> Vec<[String; 12]> {
        let date = self.at.format("%Y-%m-%d").to_string();
        let time = self.at.format("%H:%M:%S").to_string();
        let totals = self.counts.totals();
        let session_total = totals.total().to_string();
        let row = |category: &str, counts: DirectionCounts, notes: &str| {
            [
                date.clone(),
                time.clone(),
                category.to_string(),
                counts.left_to_right.to_string(),
                counts.right_to_left.to_string(),
                counts.total().to_string(),
                session_total.clone(),
                self.location.display_name().to_string(),
                optional_coordinate(self.location.latitude),
                optional_coordinate(self.location.longitude),
                self.session_id.to_string(),
                notes.to_string(),
            ]
        };

        let mut rows = Vec::new();
        for name in self.categories {
            rows.push(row(name, self.counts.get(name), ""));
        }
        for (name, counts) in &self.counts.categories {
            if !self.categories.contains(name) {
                rows.push(row(name, *counts, ""));
            }
        }
        rows.push(row(TOTAL_ROW, totals, "left_to_right | right_to_left"));
        rows
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let mut out = csv_line(&SUMMARY_HEADER);
        for row in self.rows() {
            out.push_str(&csv_line(&row));
        }
        std::fs::write(path, out).with_context(|| format!("write summary {}", path.display()))?;
        log::info!("summary exported to {}", path.display());
        Ok(())
    }
}
