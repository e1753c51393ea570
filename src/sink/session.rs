//! Session folders.
//!
//! Records for one place and one day live together:
//!
//! ```text
//! <data_dir>/<location>_<lat>_<lon>_<YYYY-mm-dd>/
//!     registros_<HHMMSS>.csv
//!     resumen_<HHMMSS>.csv
//!     snapshots/<prefix>_<YYYYmmdd_HHMMSS>.jpg
//! ```
//!
//! Without a location name the folder is `session_<lat>_<lon>_<date>`.
//! Coordinates are printed with four decimals and `-` replaced by `n`.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDate};
use serde::Serialize;

pub const SNAPSHOT_DIR: &str = "snapshots";
pub const FALLBACK_LOCATION: &str = "conteo";
const MAX_LOCATION_CHARS: usize = 50;
/// Coordinate change, in degrees, that starts a new session folder.
pub const COORDINATE_TOLERANCE: f64 = 0.001;

/// Where the counter is installed. Every part is optional.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Location {
    pub name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl Location {
    pub fn new(name: Option<String>, latitude: Option<f64>, longitude: Option<f64>) -> Self {
        Self {
            name: name.filter(|n| !n.trim().is_empty()),
            latitude,
            longitude,
        }
    }

    /// Name as written into records; empty when unknown.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }

    /// True when `other` would need a different session folder.
    pub fn differs_from(&self, other: &Location) -> bool {
        self.name != other.name
            || coordinate_moved(self.latitude, other.latitude)
            || coordinate_moved(self.longitude, other.longitude)
    }
}

fn coordinate_moved(a: Option<f64>, b: Option<f64>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => (a - b).abs() > COORDINATE_TOLERANCE,
        (None, None) => false,
        _ => true,
    }
}

/// Make a location name safe for a folder name.
pub fn sanitize_location(name: &str) -> String {
    static FORBIDDEN: OnceLock<regex::Regex> = OnceLock::new();
    static SEPARATORS: OnceLock<regex::Regex> = OnceLock::new();
    static OTHER: OnceLock<regex::Regex> = OnceLock::new();
    let forbidden = FORBIDDEN.get_or_init(|| regex::Regex::new(r#"[<>:"/\\|?*]"#).unwrap());
    let separators = SEPARATORS.get_or_init(|| regex::Regex::new(r"[\s,]+").unwrap());
    let other = OTHER.get_or_init(|| regex::Regex::new(r"[^\w\-]").unwrap());

    let cleaned = forbidden.replace_all(name, "");
    let cleaned = separators.replace_all(&cleaned, "_");
    let cleaned = other.replace_all(&cleaned, "");
    let cleaned: String = cleaned.chars().take(MAX_LOCATION_CHARS).collect();
    if cleaned.is_empty() {
        FALLBACK_LOCATION.to_string()
    } else {
        cleaned
    }
}

/// Four-decimal coordinate with `n` for the minus sign; `0.0000` if unknown.
pub fn coordinate_label(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{:.4}", v).replace('-', "n"),
        _ => "0.0000".to_string(),
    }
}

pub fn session_folder_name(location: &Location, date: NaiveDate) -> String {
    let lat = coordinate_label(location.latitude);
    let lon = coordinate_label(location.longitude);
    let date = date.format("%Y-%m-%d");
    match &location.name {
        Some(name) => format!("{}_{}_{}_{}", sanitize_location(name), lat, lon, date),
        None => format!("session_{}_{}_{}", lat, lon, date),
    }
}

/// One open session folder with its records file.
#[derive(Clone, Debug)]
pub struct Session {
    folder: PathBuf,
    records_path: PathBuf,
    snapshot_dir: PathBuf,
    date: NaiveDate,
    location: Location,
}

impl Session {
    /// Create the folder tree for `location` on the date of `now`.
    pub fn open(data_dir: &Path, location: Location, now: DateTime<Local>) -> Result<Self> {
        let date = now.date_naive();
        let folder = data_dir.join(session_folder_name(&location, date));
        let snapshot_dir = folder.join(SNAPSHOT_DIR);
        std::fs::create_dir_all(&snapshot_dir)
            .with_context(|| format!("create session folder {}", snapshot_dir.display()))?;
        let records_path = folder.join(format!("registros_{}.csv", now.format("%H%M%S")));
        log::info!("session folder: {}", folder.display());
        Ok(Self {
            folder,
            records_path,
            snapshot_dir,
            date,
            location,
        })
    }

    /// Folder name, used as the session id in records.
    pub fn id(&self) -> String {
        self.folder
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "session".to_string())
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn records_path(&self) -> &Path {
        &self.records_path
    }

    pub fn snapshot_dir(&self) -> &Path {
        &self.snapshot_dir
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    /// A new folder is needed when the day changed or the location moved.
    pub fn is_stale(&self, now: DateTime<Local>, location: &Location) -> bool {
        now.date_naive() != self.date || self.location.differs_from(location)
    }
}
