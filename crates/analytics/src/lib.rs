//! Traffic analytics over tracked detections.
//!
//! Each session runs a [`FramePipeline`] on its own worker thread: frames are
//! read from a [`video_ingest::VideoSource`], passed through an
//! [`ml_core::DetectAndTrack`] implementation, and turned into counts, dwell
//! flags and line crossings by [`TrackAnalytics`]. Three rendered outputs per
//! frame (raw, annotated, bird's-eye) are published into latest-wins
//! [`FrameStreams`]. [`SessionManager`] owns the set of running sessions.

pub mod analytics;
pub mod annotation;
pub mod config;
pub mod error;
pub mod geometry;
pub mod mapper;
pub mod pipeline;
pub mod session;
pub mod stream;
pub mod telemetry;

pub use analytics::{
    AnalyticsConfig, SessionStatistics, TrackAnalytics, TrackKey, TrackObservation, TrackState,
    default_dst_quad,
};
pub use config::{DetectorConfig, SessionConfig};
pub use error::AnalyticsError;
pub use geometry::{Homography, Point, compute_transform, point_in_polygon};
pub use mapper::{GeometricMapper, render_lanes};
pub use pipeline::{FramePipeline, PipelineHandle, SessionShared, SessionState};
pub use session::{
    DefaultDetectorFactory, DefaultSourceOpener, DetectorFactory, SessionInfo, SessionManager,
    SourceOpener,
};
pub use stream::{FrameStream, FrameStreams, LatestQueue, RenderedFrame, SharedFrame, StreamKind};
