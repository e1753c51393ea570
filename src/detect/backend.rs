use anyhow::Result;

use crate::detect::Detection;
use crate::frame::Frame;

/// Detector + tracker seam.
///
/// Implementations return one frame's detections with tracker identities
/// already assigned where the tracker has confirmed an object. The crossing
/// engine never re-associates detections across frames; a backend that
/// loses an identity simply stops reporting it and the stale track is pruned.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection and tracking on a frame.
    ///
    /// The frame is borrowed for the call only.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook, run once before the first frame.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }

    /// Release model or device resources. Called exactly once when the
    /// worker exits, whatever the exit path.
    fn release(&mut self) {}
}

impl<T: DetectorBackend + ?Sized> DetectorBackend for Box<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        (**self).detect(frame)
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }

    fn release(&mut self) {
        (**self).release()
    }
}
