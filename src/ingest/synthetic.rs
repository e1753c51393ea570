use anyhow::{anyhow, Result};

use super::{FrameSource, SourceConfig, SourceStats};
use crate::frame::Frame;

/// `stub://` source. Produces a slowly shifting gradient at the configured
/// resolution, forever or up to a frame limit.
pub struct SyntheticSource {
    config: SourceConfig,
    frame_count: u64,
    limit: Option<u64>,
    connected: bool,
    released: bool,
}

impl SyntheticSource {
    pub fn new(config: SourceConfig) -> Self {
        Self {
            config,
            frame_count: 0,
            limit: None,
            connected: false,
            released: false,
        }
    }

    /// End the stream after `frames` frames.
    pub fn with_frame_limit(mut self, frames: u64) -> Self {
        self.limit = Some(frames);
        self
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    fn pixels(&self) -> Vec<u8> {
        let width = self.config.width as usize;
        let height = self.config.height as usize;
        let shift = (self.frame_count % 256) as usize;
        let mut pixels = Vec::with_capacity(width * height * 3);
        for y in 0..height {
            for x in 0..width {
                let r = ((x * 255) / width.max(1) + shift) % 256;
                let g = ((y * 255) / height.max(1)) % 256;
                pixels.extend_from_slice(&[r as u8, g as u8, 64]);
            }
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        log::info!(
            "source: connected to {} ({}x{} synthetic)",
            self.config.url,
            self.config.width,
            self.config.height
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if !self.connected {
            return Err(anyhow!("source {} is not connected", self.config.url));
        }
        if self.limit.is_some_and(|limit| self.frame_count >= limit) {
            return Ok(None);
        }
        let frame = Frame::new(self.config.width, self.config.height, self.pixels())?;
        self.frame_count += 1;
        Ok(Some(frame))
    }

    fn is_healthy(&self) -> bool {
        self.connected && !self.released
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            url: self.config.url.clone(),
        }
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.connected = false;
            log::info!(
                "source: released {} after {} frames",
                self.config.url,
                self.frame_count
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SourceConfig {
        SourceConfig {
            url: "stub://test".into(),
            width: 32,
            height: 24,
            target_fps: 10,
        }
    }

    #[test]
    fn produces_frames_at_configured_size() -> Result<()> {
        let mut source = SyntheticSource::new(config());
        source.connect()?;
        let frame = source.next_frame()?.ok_or_else(|| anyhow!("no frame"))?;
        assert_eq!(frame.width(), 32);
        assert_eq!(frame.height(), 24);
        assert_eq!(source.stats().frames_captured, 1);
        Ok(())
    }

    #[test]
    fn requires_connect() {
        let mut source = SyntheticSource::new(config());
        assert!(source.next_frame().is_err());
    }

    #[test]
    fn frame_limit_ends_stream() -> Result<()> {
        let mut source = SyntheticSource::new(config()).with_frame_limit(2);
        source.connect()?;
        assert!(source.next_frame()?.is_some());
        assert!(source.next_frame()?.is_some());
        assert!(source.next_frame()?.is_none());
        Ok(())
    }

    #[test]
    fn consecutive_frames_differ() -> Result<()> {
        let mut source = SyntheticSource::new(config());
        source.connect()?;
        let a = source.next_frame()?;
        let b = source.next_frame()?;
        assert_ne!(a, b);
        Ok(())
    }

    #[test]
    fn release_is_idempotent() -> Result<()> {
        let mut source = SyntheticSource::new(config());
        source.connect()?;
        source.release();
        source.release();
        assert!(source.is_released());
        assert!(!source.is_healthy());
        Ok(())
    }
}
