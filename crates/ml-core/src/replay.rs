//! Replays tracker output recorded offline.
//!
//! The file is JSON lines, one object per frame:
//!
//! ```text
//! {"frame": 1, "detections": [{"bbox_xywh": [320, 240, 60, 40], "class_id": 2, "track_id": 7}]}
//! ```
//!
//! Frames without a line yield no detections.

use std::{collections::HashMap, fs, path::Path};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use crate::detector::{DetectAndTrack, Detection, DetectionBatch, FrameRef};

#[derive(Deserialize)]
struct ReplayLine {
    frame: u64,
    #[serde(default)]
    detections: Vec<Detection>,
}

pub struct ReplayDetector {
    frames: HashMap<u64, Vec<Detection>>,
}

impl ReplayDetector {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read detections from {}", path.display()))?;
        let detector = Self::from_json_lines(&text)
            .with_context(|| format!("invalid detections file {}", path.display()))?;
        debug!(
            "replay detector loaded {} frame(s) from {}",
            detector.frames.len(),
            path.display()
        );
        Ok(detector)
    }

    pub fn from_json_lines(text: &str) -> Result<Self> {
        let mut frames = HashMap::new();
        for (idx, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let parsed: ReplayLine = serde_json::from_str(line)
                .with_context(|| format!("line {}: malformed detection record", idx + 1))?;
            let mut detections = parsed.detections;
            for det in &mut detections {
                if det.class_label.is_empty() {
                    det.class_label = det.label().to_string();
                }
            }
            frames
                .entry(parsed.frame)
                .or_insert_with(Vec::new)
                .extend(detections);
        }
        Ok(Self { frames })
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

impl DetectAndTrack for ReplayDetector {
    fn detect_and_track(&mut self, frame: FrameRef<'_>) -> Result<DetectionBatch> {
        Ok(DetectionBatch {
            detections: self.frames.remove(&frame.frame_number).unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(number: u64) -> FrameRef<'static> {
        FrameRef {
            bgr: &[],
            width: 640,
            height: 480,
            frame_number: number,
        }
    }

    #[test]
    fn test_replays_detections_by_frame_number() {
        let text = r#"
{"frame": 1, "detections": [{"bbox_xywh": [10, 20, 4, 4], "class_id": 2, "track_id": 7}]}
{"frame": 3, "detections": [{"bbox_xywh": [12, 22, 4, 4], "class_id": 7, "class_label": "lorry"}]}
"#;
        let mut detector = ReplayDetector::from_json_lines(text).unwrap();
        assert_eq!(detector.frame_count(), 2);

        let first = detector.detect_and_track(frame(1)).unwrap();
        assert_eq!(first.detections.len(), 1);
        assert_eq!(first.detections[0].class_label, "car");
        assert_eq!(first.detections[0].track_id, Some(7));

        assert!(detector.detect_and_track(frame(2)).unwrap().detections.is_empty());

        let third = detector.detect_and_track(frame(3)).unwrap();
        assert_eq!(third.detections[0].class_label, "lorry");
        assert_eq!(third.detections[0].track_id, None);
    }

    #[test]
    fn test_malformed_line_reports_position() {
        let err = ReplayDetector::from_json_lines("{\"frame\": 1}\nnot json")
            .err()
            .unwrap();
        assert!(format!("{err:#}").contains("line 2"));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ReplayDetector::from_path(dir.path().join("absent.jsonl")).is_err());
    }
}
