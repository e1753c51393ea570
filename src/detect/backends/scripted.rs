use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::detect::backend::DetectorBackend;
use crate::detect::Detection;
use crate::frame::Frame;

/// Largest run of empty frames an explicit frame index may skip.
pub const MAX_FRAME_GAP: u64 = 1_000_000;

/// One line of a detection script.
///
/// Either a bare JSON array of detections, or an object with the detections
/// and an optional explicit frame index. Frames skipped by explicit indices
/// have no detections. Blank lines and lines starting with `#` are ignored.
#[derive(Deserialize)]
#[serde(untagged)]
enum ScriptLine {
    Framed {
        #[serde(default)]
        frame: Option<u64>,
        detections: Vec<Detection>,
    },
    Bare(Vec<Detection>),
}

/// Parse a JSON-lines detection script into per-frame detection lists.
pub fn parse_script<R: BufRead>(reader: R) -> Result<Vec<Vec<Detection>>> {
    let mut frames: Vec<Vec<Detection>> = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("read script line {}", idx + 1))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let parsed: ScriptLine = serde_json::from_str(trimmed)
            .with_context(|| format!("parse script line {}", idx + 1))?;
        let (frame, detections) = match parsed {
            ScriptLine::Framed { frame, detections } => (frame, detections),
            ScriptLine::Bare(detections) => (None, detections),
        };
        if let Some(frame) = frame {
            let gap = frame.saturating_sub(frames.len() as u64);
            if gap > MAX_FRAME_GAP {
                return Err(anyhow!(
                    "script line {}: frame {} skips {} frames (max {})",
                    idx + 1,
                    frame,
                    gap,
                    MAX_FRAME_GAP
                ));
            }
            let frame = usize::try_from(frame)
                .map_err(|_| anyhow!("script line {}: frame index too large", idx + 1))?;
            if frame < frames.len() {
                return Err(anyhow!(
                    "script line {}: frame {} is not after frame {}",
                    idx + 1,
                    frame,
                    frames.len() - 1
                ));
            }
            frames.resize_with(frame, Vec::new);
        }
        frames.push(detections);
    }
    Ok(frames)
}

/// Replays a fixed detection script, one entry per `detect` call.
///
/// Once the script is exhausted every call returns no detections, or the
/// script restarts from the top when looping is enabled.
pub struct ScriptedBackend {
    frames: Vec<Vec<Detection>>,
    cursor: usize,
    looping: bool,
}

impl ScriptedBackend {
    pub fn new(frames: Vec<Vec<Detection>>) -> Self {
        Self {
            frames,
            cursor: 0,
            looping: false,
        }
    }

    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        Ok(Self::new(parse_script(reader)?))
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("open detection script {}", path.display()))?;
        let backend = Self::from_reader(BufReader::new(file))?;
        log::info!(
            "loaded detection script {} ({} frames)",
            path.display(),
            backend.frames.len()
        );
        Ok(backend)
    }

    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn is_exhausted(&self) -> bool {
        !self.looping && self.cursor >= self.frames.len()
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        if self.looping && self.cursor >= self.frames.len() && !self.frames.is_empty() {
            self.cursor = 0;
        }
        let detections = self.frames.get(self.cursor).cloned().unwrap_or_default();
        self.cursor = self.cursor.saturating_add(1);
        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCRIPT: &str = r#"
# track 7 walks left to right
[{"bbox": [380, 200, 420, 280], "label": "person", "track_id": 7}]
{"detections": [{"bbox": [580, 200, 620, 280], "label": "person", "track_id": 7}]}

{"frame": 4, "detections": []}
"#;

    #[test]
    fn parses_bare_and_framed_lines() {
        let frames = parse_script(SCRIPT.as_bytes()).unwrap();
        assert_eq!(frames.len(), 5);
        assert_eq!(frames[0][0].centre_x(), 400.0);
        assert_eq!(frames[1][0].centre_x(), 600.0);
        assert!(frames[2].is_empty());
        assert!(frames[3].is_empty());
    }

    #[test]
    fn rejects_backwards_frame_index() {
        let script = "{\"frame\": 3, \"detections\": []}\n{\"frame\": 1, \"detections\": []}\n";
        assert!(parse_script(script.as_bytes()).is_err());
    }

    #[test]
    fn rejects_huge_frame_gap() {
        let script = "[]\n{\"frame\": 9000000000000, \"detections\": []}\n";
        let err = parse_script(script.as_bytes()).unwrap_err();
        let msg = format!("{:#}", err);
        assert!(msg.contains("line 2"), "{}", msg);
        assert!(msg.contains("skips"), "{}", msg);

        let at_limit = format!("{{\"frame\": {}, \"detections\": []}}\n", MAX_FRAME_GAP);
        assert_eq!(parse_script(at_limit.as_bytes()).unwrap().len() as u64, MAX_FRAME_GAP + 1);
    }

    #[test]
    fn reports_bad_line_number() {
        let err = parse_script("[]\nnot json\n".as_bytes()).unwrap_err();
        assert!(format!("{:#}", err).contains("line 2"));
    }

    #[test]
    fn replays_then_runs_dry() {
        let mut backend = ScriptedBackend::from_reader(SCRIPT.as_bytes()).unwrap();
        let frame = Frame::blank(2, 2, [0, 0, 0]);
        assert_eq!(backend.detect(&frame).unwrap().len(), 1);
        for _ in 0..4 {
            backend.detect(&frame).unwrap();
        }
        assert!(backend.is_exhausted());
        assert!(backend.detect(&frame).unwrap().is_empty());
    }

    #[test]
    fn looping_restarts_script() {
        let det = Detection::centred(10.0, 10.0, 2.0, 2.0).with_track(1);
        let mut backend = ScriptedBackend::new(vec![vec![det], vec![]]).looping(true);
        let frame = Frame::blank(2, 2, [0, 0, 0]);
        let counts: Vec<_> = (0..4)
            .map(|_| backend.detect(&frame).unwrap().len())
            .collect();
        assert_eq!(counts, vec![1, 0, 1, 0]);
        assert!(!backend.is_exhausted());
    }
}
