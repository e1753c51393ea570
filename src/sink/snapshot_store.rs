use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local};

use crate::frame::Frame;

/// `<prefix>_<YYYYmmdd_HHMMSS>.jpg`, with `_<n>` appended if a file of that
/// name already exists in `dir`.
pub fn snapshot_path(dir: &Path, prefix: &str, at: DateTime<Local>) -> PathBuf {
    let stem = format!("{}_{}", prefix, at.format("%Y%m%d_%H%M%S"));
    let mut path = dir.join(format!("{}.jpg", stem));
    let mut n = 1;
    while path.exists() {
        path = dir.join(format!("{}_{}.jpg", stem, n));
        n += 1;
    }
    path
}

/// Encode `frame` as JPEG into `dir`. Returns the written path.
pub fn save_jpeg(frame: &Frame, dir: &Path, prefix: &str, at: DateTime<Local>) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create snapshot dir {}", dir.display()))?;
    let image = image::RgbImage::from_raw(frame.width(), frame.height(), frame.pixels().to_vec())
        .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", frame.width(), frame.height()))?;
    let path = snapshot_path(dir, prefix, at);
    image
        .save_with_format(&path, image::ImageFormat::Jpeg)
        .with_context(|| format!("write snapshot {}", path.display()))?;
    log::info!("snapshot saved: {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn writes_decodable_jpeg() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let at = Local.with_ymd_and_hms(2026, 2, 1, 8, 30, 0).unwrap();
        let frame = Frame::blank(16, 8, [200, 10, 10]);
        let path = save_jpeg(&frame, dir.path(), "auto_snapshot", at)?;
        assert_eq!(
            path.file_name().unwrap().to_string_lossy(),
            "auto_snapshot_20260201_083000.jpg"
        );
        let bytes = std::fs::read(&path)?;
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        Ok(())
    }

    #[test]
    fn same_second_does_not_overwrite() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let at = Local.with_ymd_and_hms(2026, 2, 1, 8, 30, 0).unwrap();
        let frame = Frame::blank(4, 4, [0, 0, 0]);
        let first = save_jpeg(&frame, dir.path(), "manual", at)?;
        let second = save_jpeg(&frame, dir.path(), "manual", at)?;
        assert_ne!(first, second);
        assert!(second.to_string_lossy().ends_with("manual_20260201_083000_1.jpg"));
        Ok(())
    }
}
