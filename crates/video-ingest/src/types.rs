use std::{
    fmt,
    path::{Component, Path, PathBuf},
};

use anyhow::Error;
use chrono::Utc;
use thiserror::Error;

/// Raw BGR8 frame captured from a video source.
#[derive(Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: i32,
    pub height: i32,
    pub timestamp_ms: i64,
    pub format: FrameFormat,
}

impl Frame {
    /// Wrap an interleaved BGR buffer, stamping it with the current wall clock.
    pub fn from_bgr(data: Vec<u8>, width: i32, height: i32) -> Self {
        Self {
            data,
            width,
            height,
            timestamp_ms: Utc::now().timestamp_millis(),
            format: FrameFormat::Bgr8,
        }
    }

    /// Byte length a well-formed buffer of this geometry must have.
    pub fn expected_len(&self) -> usize {
        match self.format {
            FrameFormat::Bgr8 => (self.width.max(0) as usize) * (self.height.max(0) as usize) * 3,
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("timestamp_ms", &self.timestamp_ms)
            .field("format", &self.format)
            .field("bytes", &self.data.len())
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameFormat {
    Bgr8,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open video source {uri:?}")]
    Open { uri: String },
    #[error("video source {uri:?} produced no frames")]
    Exhausted { uri: String },
    #[error("failed to decode frame from {uri:?}: {reason}")]
    Decode { uri: String, reason: String },
    #[error(transparent)]
    Other(#[from] Error),
}

/// Where a session pulls its frames from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceDescriptor {
    /// Local capture device by index (`/dev/videoN` on Linux).
    Device(i32),
    /// Network stream such as `rtsp://` or `http://` MJPEG.
    Stream(String),
    /// Recorded video file or a directory of still images.
    File(PathBuf),
}

impl SourceDescriptor {
    /// Build a descriptor from the `cap_type`/`cap_path` pair used by the HTTP
    /// API. File paths are resolved inside `videos_dir` and may not escape it.
    pub fn from_request(
        cap_type: &str,
        cap_path: &str,
        videos_dir: &Path,
    ) -> Result<Self, CaptureError> {
        let open_error = || CaptureError::Open {
            uri: format!("{cap_type}:{cap_path}"),
        };
        match cap_type {
            "camera" => cap_path
                .trim()
                .parse::<i32>()
                .map(SourceDescriptor::Device)
                .map_err(|_| open_error()),
            "ip_camera" if !cap_path.trim().is_empty() => {
                Ok(SourceDescriptor::Stream(cap_path.trim().to_string()))
            }
            "file" => {
                let relative = Path::new(cap_path);
                let escapes = relative
                    .components()
                    .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
                if cap_path.is_empty() || escapes {
                    return Err(open_error());
                }
                Ok(SourceDescriptor::File(videos_dir.join(relative)))
            }
            _ => Err(open_error()),
        }
    }

    /// URI-ish label used in logs and error messages.
    pub fn uri(&self) -> String {
        match self {
            SourceDescriptor::Device(index) => format!("/dev/video{index}"),
            SourceDescriptor::Stream(url) => url.clone(),
            SourceDescriptor::File(path) => path.display().to_string(),
        }
    }
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_descriptor_requires_integer_index() {
        let dir = Path::new("./videos");
        assert_eq!(
            SourceDescriptor::from_request("camera", "0", dir).unwrap(),
            SourceDescriptor::Device(0)
        );
        assert!(matches!(
            SourceDescriptor::from_request("camera", "front", dir),
            Err(CaptureError::Open { .. })
        ));
    }

    #[test]
    fn test_file_descriptor_stays_inside_videos_dir() {
        let dir = Path::new("/srv/videos");
        assert_eq!(
            SourceDescriptor::from_request("file", "junction.mp4", dir).unwrap(),
            SourceDescriptor::File(PathBuf::from("/srv/videos/junction.mp4"))
        );
        assert!(SourceDescriptor::from_request("file", "../etc/passwd", dir).is_err());
        assert!(SourceDescriptor::from_request("file", "/etc/passwd", dir).is_err());
    }

    #[test]
    fn test_unknown_cap_type_is_rejected() {
        let err = SourceDescriptor::from_request("webcam", "0", Path::new(".")).unwrap_err();
        assert!(err.to_string().contains("webcam:0"));
    }

    #[test]
    fn test_expected_len_matches_bgr_geometry() {
        let frame = Frame::from_bgr(vec![0; 12], 2, 2);
        assert_eq!(frame.expected_len(), 12);
    }
}
