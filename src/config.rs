use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::{default_specs, CategoryMap, CategorySpec, UnmappedPolicy};
use crate::engine::{EngineConfig, DEFAULT_MARGIN_PX, DEFAULT_STALE_AFTER_FRAMES};
use crate::ingest::{
    SourceConfig, DEFAULT_HEIGHT, DEFAULT_SOURCE_URL, DEFAULT_TARGET_FPS, DEFAULT_WIDTH,
};
use crate::pipeline::{PipelineConfig, DEFAULT_MAX_CAPTURE_FAILURES};
use crate::settings::{LineSettings, DEFAULT_CONFIDENCE, DEFAULT_LINE_FRACTION};
use crate::sink::{Location, PersistenceConfig, DEFAULT_ALERT_CATEGORIES};
use crate::snapshot::DEFAULT_SNAPSHOT_SECS;

const DEFAULT_DATA_DIR: &str = "data";

#[derive(Debug, Deserialize, Default)]
struct CounterdConfigFile {
    source: Option<SourceConfigFile>,
    line: Option<LineConfigFile>,
    categories: Option<Vec<CategorySpec>>,
    unmapped: Option<UnmappedPolicy>,
    snapshots: Option<SnapshotConfigFile>,
    storage: Option<StorageConfigFile>,
    location: Option<LocationConfigFile>,
    alerts: Option<AlertConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
    max_consecutive_failures: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct LineConfigFile {
    fraction: Option<f64>,
    margin_px: Option<f64>,
    stale_after_frames: Option<u64>,
    confidence: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct SnapshotConfigFile {
    interval_secs: Option<u64>,
    enabled: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct StorageConfigFile {
    data_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct LocationConfigFile {
    name: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertConfigFile {
    enabled: Option<bool>,
    categories: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct CounterdConfig {
    pub source: SourceConfig,
    pub max_capture_failures: u32,
    pub line: LineConfig,
    pub categories: Vec<CategorySpec>,
    pub unmapped: UnmappedPolicy,
    pub snapshot_interval: Duration,
    pub snapshots_enabled: bool,
    pub data_dir: PathBuf,
    pub location: Location,
    pub alerts_enabled: bool,
    pub alert_categories: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct LineConfig {
    pub fraction: f64,
    pub margin_px: f64,
    pub stale_after_frames: u64,
    pub confidence: f64,
}

impl CounterdConfig {
    /// Defaults, then the file named by `COUNTER_CONFIG` (JSON, or TOML for
    /// `.toml` paths), then `COUNTER_*` environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("COUNTER_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: CounterdConfigFile) -> Result<Self> {
        let source_file = file.source.unwrap_or_default();
        let source = SourceConfig {
            url: source_file
                .url
                .unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
            width: source_file.width.unwrap_or(DEFAULT_WIDTH),
            height: source_file.height.unwrap_or(DEFAULT_HEIGHT),
            target_fps: source_file.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
        };
        let line_file = file.line.unwrap_or_default();
        let line = LineConfig {
            fraction: line_file.fraction.unwrap_or(DEFAULT_LINE_FRACTION),
            margin_px: line_file.margin_px.unwrap_or(DEFAULT_MARGIN_PX),
            stale_after_frames: line_file
                .stale_after_frames
                .unwrap_or(DEFAULT_STALE_AFTER_FRAMES),
            confidence: line_file.confidence.unwrap_or(DEFAULT_CONFIDENCE),
        };
        let snapshots = file.snapshots.unwrap_or_default();
        let location = file.location.unwrap_or_default();
        let alerts = file.alerts.unwrap_or_default();
        Ok(Self {
            source,
            max_capture_failures: source_file
                .max_consecutive_failures
                .unwrap_or(DEFAULT_MAX_CAPTURE_FAILURES),
            line,
            categories: file.categories.unwrap_or_else(default_specs),
            unmapped: file.unmapped.unwrap_or_default(),
            snapshot_interval: Duration::from_secs(
                snapshots.interval_secs.unwrap_or(DEFAULT_SNAPSHOT_SECS),
            ),
            snapshots_enabled: snapshots.enabled.unwrap_or(true),
            data_dir: file
                .storage
                .and_then(|storage| storage.data_dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            location: Location::new(location.name, location.latitude, location.longitude),
            alerts_enabled: alerts.enabled.unwrap_or(true),
            alert_categories: alerts.categories.unwrap_or_else(|| {
                DEFAULT_ALERT_CATEGORIES
                    .iter()
                    .map(|c| c.to_string())
                    .collect()
            }),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = env_value("COUNTER_SOURCE_URL") {
            self.source.url = url;
        }
        if let Some(fraction) = env_value("COUNTER_LINE_FRACTION") {
            self.line.fraction = parse_env("COUNTER_LINE_FRACTION", &fraction, "a number")?;
        }
        if let Some(margin) = env_value("COUNTER_MARGIN_PX") {
            self.line.margin_px = parse_env("COUNTER_MARGIN_PX", &margin, "a number of pixels")?;
        }
        if let Some(stale) = env_value("COUNTER_STALE_AFTER_FRAMES") {
            self.line.stale_after_frames =
                parse_env("COUNTER_STALE_AFTER_FRAMES", &stale, "an integer number of frames")?;
        }
        if let Some(confidence) = env_value("COUNTER_CONFIDENCE") {
            self.line.confidence = parse_env("COUNTER_CONFIDENCE", &confidence, "a number")?;
        }
        if let Some(dir) = env_value("COUNTER_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(secs) = env_value("COUNTER_SNAPSHOT_SECS") {
            let seconds: u64 =
                parse_env("COUNTER_SNAPSHOT_SECS", &secs, "an integer number of seconds")?;
            self.snapshot_interval = Duration::from_secs(seconds);
        }
        if let Some(name) = env_value("COUNTER_LOCATION") {
            self.location.name = Some(name);
        }
        if let Some(lat) = env_value("COUNTER_LATITUDE") {
            self.location.latitude = Some(parse_env("COUNTER_LATITUDE", &lat, "a number")?);
        }
        if let Some(lon) = env_value("COUNTER_LONGITUDE") {
            self.location.longitude = Some(parse_env("COUNTER_LONGITUDE", &lon, "a number")?);
        }
        if let Ok(categories) = std::env::var("COUNTER_ALERT_CATEGORIES") {
            let parsed = split_csv(&categories);
            if !parsed.is_empty() {
                self.alert_categories = parsed;
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.line.fraction) {
            return Err(anyhow!(
                "line fraction must be within [0, 1] (got {})",
                self.line.fraction
            ));
        }
        if !(0.0..=1.0).contains(&self.line.confidence) {
            return Err(anyhow!(
                "confidence threshold must be within [0, 1] (got {})",
                self.line.confidence
            ));
        }
        if self.snapshot_interval.as_secs() == 0 {
            return Err(anyhow!("snapshot interval must be greater than zero"));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("source resolution must be non-zero"));
        }
        if self.source.target_fps == 0 {
            return Err(anyhow!("source target_fps must be greater than zero"));
        }
        if self.max_capture_failures == 0 {
            return Err(anyhow!("max_consecutive_failures must be greater than zero"));
        }
        for (name, value) in [
            ("latitude", self.location.latitude),
            ("longitude", self.location.longitude),
        ] {
            if value.is_some_and(|v| !v.is_finite()) {
                return Err(anyhow!("{} must be a finite number", name));
            }
        }
        self.engine_config()?.validate()?;
        let map = self.category_map()?;
        if !map.is_empty() {
            let unknown: Vec<_> = self
                .alert_categories
                .iter()
                .filter(|c| !map.names().any(|n| n == c.as_str()))
                .cloned()
                .collect();
            if !unknown.is_empty() {
                log::warn!("alert categories not in the category set: {}", unknown.join(","));
            }
        }
        Ok(())
    }

    pub fn category_map(&self) -> Result<CategoryMap> {
        CategoryMap::new(self.categories.clone())
    }

    pub fn category_names(&self) -> Vec<String> {
        self.categories
            .iter()
            .map(|spec| spec.name.trim().to_string())
            .collect()
    }

    pub fn engine_config(&self) -> Result<EngineConfig> {
        Ok(EngineConfig {
            margin_px: self.line.margin_px,
            stale_after_frames: self.line.stale_after_frames,
            categories: self.category_map()?,
            unmapped: self.unmapped,
        })
    }

    pub fn pipeline_config(&self) -> Result<PipelineConfig> {
        Ok(PipelineConfig {
            engine: self.engine_config()?,
            snapshot_interval: self.snapshot_interval,
            target_fps: Some(self.source.target_fps),
            max_consecutive_capture_failures: self.max_capture_failures,
            annotate: true,
        })
    }

    pub fn line_settings(&self) -> LineSettings {
        LineSettings::new(self.line.fraction, self.line.confidence)
    }

    pub fn persistence_config(&self) -> PersistenceConfig {
        PersistenceConfig {
            data_dir: self.data_dir.clone(),
            location: self.location.clone(),
            categories: self.category_names(),
        }
    }
}

fn read_config_file(path: &Path) -> Result<CounterdConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str, what: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| anyhow!("{} must be {}", key, what))
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
