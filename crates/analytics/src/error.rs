use thiserror::Error;
use video_ingest::CaptureError;

use crate::stream::StreamKind;

/// Failures surfaced by the session manager and its collaborators.
#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("video source unavailable: {descriptor}")]
    SourceUnavailable {
        descriptor: String,
        #[source]
        source: CaptureError,
    },
    #[error("invalid perspective geometry: {0}")]
    InvalidGeometry(String),
    #[error("detector unavailable: {0}")]
    DetectorUnavailable(String),
    #[error("session {0} not found")]
    SessionNotFound(u64),
    #[error("no {stream} frame available yet for session {session}")]
    NoFrameAvailable { session: u64, stream: StreamKind },
    #[error("pipeline fault: {0}")]
    PipelineFault(String),
}

impl AnalyticsError {
    /// Transient conditions the caller is expected to poll through.
    pub fn is_transient(&self) -> bool {
        matches!(self, AnalyticsError::NoFrameAvailable { .. })
    }
}
