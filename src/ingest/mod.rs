//! Frame sources.
//!
//! - `FrameSource`: capture seam consumed by the pipeline worker
//! - `SyntheticSource`: `stub://` source producing patterned RGB frames
//!
//! Real camera and file decoders live behind the same trait; only the
//! synthetic source ships with the kernel.

pub mod synthetic;

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::frame::Frame;

pub use synthetic::SyntheticSource;

pub const DEFAULT_SOURCE_URL: &str = "stub://camera";
pub const DEFAULT_WIDTH: u32 = 640;
pub const DEFAULT_HEIGHT: u32 = 480;
pub const DEFAULT_TARGET_FPS: u32 = 30;

/// Capture parameters.
#[derive(Clone, Debug)]
pub struct SourceConfig {
    pub url: String,
    pub width: u32,
    pub height: u32,
    /// Requested rate. Sources may deliver slower.
    pub target_fps: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_SOURCE_URL.to_string(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            target_fps: DEFAULT_TARGET_FPS,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub url: String,
}

pub trait FrameSource: Send {
    /// Open the device or stream.
    fn connect(&mut self) -> Result<()>;

    /// Next frame, `Ok(None)` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> SourceStats;

    /// Release the device. Called exactly once when the worker exits.
    fn release(&mut self) {}
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn connect(&mut self) -> Result<()> {
        (**self).connect()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        (**self).next_frame()
    }

    fn is_healthy(&self) -> bool {
        (**self).is_healthy()
    }

    fn stats(&self) -> SourceStats {
        (**self).stats()
    }

    fn release(&mut self) {
        (**self).release()
    }
}

/// Open the source named by `config.url`.
pub fn open_source(config: SourceConfig) -> Result<Box<dyn FrameSource>> {
    if config.width == 0 || config.height == 0 {
        return Err(anyhow!(
            "source resolution must be non-zero (got {}x{})",
            config.width,
            config.height
        ));
    }
    if config.url.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(config)));
    }
    Err(anyhow!(
        "no capture backend available for '{}' (only stub:// is built in)",
        config.url
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_stub_urls_only() {
        assert!(open_source(SourceConfig::default()).is_ok());
        let err = open_source(SourceConfig {
            url: "rtsp://10.0.0.2/stream".into(),
            ..SourceConfig::default()
        });
        assert!(err.is_err());
    }

    #[test]
    fn rejects_zero_resolution() {
        assert!(open_source(SourceConfig {
            width: 0,
            ..SourceConfig::default()
        })
        .is_err());
    }
}
