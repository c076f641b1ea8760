//! Frame acquisition for traffic sessions.
//!
//! A [`SourceDescriptor`] names a device, stream, or file; [`open_source`]
//! walks an ordered list of [`OpenStrategy`] values until one yields a
//! [`VideoSource`]. Sources are read synchronously so the caller's loop is
//! paced by the capture itself.

#[cfg(feature = "opencv")]
mod camera;
mod sequence;
mod types;

use tracing::{debug, warn};

#[cfg(feature = "opencv")]
pub use camera::OpenCvSource;
pub use sequence::ImageSequence;
pub use types::{CaptureError, Frame, FrameFormat, SourceDescriptor};

/// Blocking, single-consumer frame source.
pub trait VideoSource: Send {
    /// Read the next frame, returning `Ok(None)` once the source is exhausted.
    fn read(&mut self) -> Result<Option<Frame>, CaptureError>;

    /// Release the underlying handle. Later reads return `Ok(None)`.
    fn close(&mut self) {}

    fn describe(&self) -> String;
}

/// One way of turning a descriptor into an open source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenStrategy {
    /// OpenCV `VideoCapture` with a specific backend (`videoio::CAP_*`).
    #[cfg(feature = "opencv")]
    OpenCv { backend: i32 },
    /// Directory of still images (or a single image file).
    ImageSequence,
}

impl OpenStrategy {
    /// Strategies tried by [`open_source`], in order.
    pub fn defaults() -> Vec<OpenStrategy> {
        #[allow(unused_mut)]
        let mut strategies = Vec::new();
        #[cfg(feature = "opencv")]
        {
            use opencv::videoio;
            strategies.push(OpenStrategy::OpenCv {
                backend: videoio::CAP_V4L,
            });
            strategies.push(OpenStrategy::OpenCv {
                backend: videoio::CAP_ANY,
            });
        }
        strategies.push(OpenStrategy::ImageSequence);
        strategies
    }

    pub fn open(self, descriptor: &SourceDescriptor) -> Result<Box<dyn VideoSource>, CaptureError> {
        match self {
            #[cfg(feature = "opencv")]
            OpenStrategy::OpenCv { backend } => {
                Ok(Box::new(OpenCvSource::open(descriptor, backend)?))
            }
            OpenStrategy::ImageSequence => Ok(Box::new(ImageSequence::open(descriptor)?)),
        }
    }
}

/// Open `descriptor` using the default strategy list.
pub fn open_source(descriptor: &SourceDescriptor) -> Result<Box<dyn VideoSource>, CaptureError> {
    open_with(descriptor, &OpenStrategy::defaults())
}

/// Try each strategy in turn. Every failure collapses into
/// [`CaptureError::Open`] once the list is exhausted.
pub fn open_with(
    descriptor: &SourceDescriptor,
    strategies: &[OpenStrategy],
) -> Result<Box<dyn VideoSource>, CaptureError> {
    for strategy in strategies {
        match strategy.open(descriptor) {
            Ok(source) => {
                debug!("opened {descriptor} via {strategy:?}");
                return Ok(source);
            }
            Err(err) => {
                debug!("{strategy:?} could not open {descriptor}: {err}");
            }
        }
    }

    warn!(
        "video-ingest: no strategy could open {descriptor} ({} tried)",
        strategies.len()
    );
    Err(CaptureError::Open {
        uri: descriptor.uri(),
    })
}
