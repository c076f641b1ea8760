use std::path::{Path, PathBuf};

use video_ingest::SourceDescriptor;

use crate::{analytics::AnalyticsConfig, stream::DEFAULT_QUEUE_CAPACITY};

/// Detector input used for TorchScript models when none is given; matches
/// the capture size device sources are configured to.
pub const DEFAULT_DETECTOR_INPUT: (i64, i64) = (640, 480);
pub const DEFAULT_CONFIDENCE: f32 = 0.25;

/// Which detector/tracker a session drives.
#[derive(Clone, Debug, PartialEq)]
pub enum DetectorConfig {
    /// Recorded tracker output, one JSON object per frame.
    Replay { path: PathBuf },
    /// TorchScript model. Needs the `with-tch` feature at runtime.
    TorchScript {
        model_path: PathBuf,
        input_size: (i64, i64),
        confidence: f32,
        use_cpu: bool,
    },
}

impl DetectorConfig {
    /// Pick the detector kind from the file extension: `.json`/`.jsonl`
    /// replays recorded output, anything else is treated as TorchScript.
    pub fn from_model_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let replay = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("jsonl") || ext.eq_ignore_ascii_case("json"));
        if replay {
            DetectorConfig::Replay {
                path: path.to_path_buf(),
            }
        } else {
            DetectorConfig::TorchScript {
                model_path: path.to_path_buf(),
                input_size: DEFAULT_DETECTOR_INPUT,
                confidence: DEFAULT_CONFIDENCE,
                use_cpu: false,
            }
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            DetectorConfig::Replay { path } => path,
            DetectorConfig::TorchScript { model_path, .. } => model_path,
        }
    }
}

/// Everything needed to start one session.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub source: SourceDescriptor,
    pub detector: DetectorConfig,
    pub analytics: AnalyticsConfig,
    pub queue_capacity: usize,
}

impl SessionConfig {
    pub fn new(source: SourceDescriptor, detector: DetectorConfig, analytics: AnalyticsConfig) -> Self {
        Self {
            source,
            detector,
            analytics,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }
}
