//! Detector/tracker contracts consumed by the traffic pipeline.
//!
//! Detection and tracking themselves live outside this workspace; this crate
//! defines the [`DetectAndTrack`] seam plus two adapters: a replay detector
//! that feeds recorded tracker output, and (with the `with-tch` feature) a
//! TorchScript detector.

pub mod detector;
pub mod replay;
#[cfg(feature = "with-tch")]
pub mod torchscript;

pub use detector::{DetectAndTrack, Detection, DetectionBatch, FrameRef, coco_label};
pub use replay::ReplayDetector;
#[cfg(feature = "with-tch")]
pub use torchscript::TorchScriptDetector;

#[cfg(feature = "with-tch")]
pub use tch;
