//! OpenCV-backed capture for devices, network streams, and video files.

use opencv::{
    core::{Mat, MatTraitConst, MatTraitConstManual},
    videoio::{self, VideoCapture, VideoCaptureTrait, VideoCaptureTraitConst},
};
use tracing::{debug, warn};

use crate::{
    VideoSource,
    types::{CaptureError, Frame, SourceDescriptor},
};

const DEVICE_WIDTH: f64 = 640.0;
const DEVICE_HEIGHT: f64 = 480.0;
const DEVICE_FPS: f64 = 30.0;

pub struct OpenCvSource {
    cap: VideoCapture,
    label: String,
    scratch: Mat,
    released: bool,
}

impl OpenCvSource {
    /// Open `descriptor` with a single OpenCV backend.
    pub fn open(descriptor: &SourceDescriptor, backend: i32) -> Result<Self, CaptureError> {
        let uri = descriptor.uri();
        let cap = match descriptor {
            SourceDescriptor::Device(index) => VideoCapture::new(*index, backend),
            SourceDescriptor::Stream(url) => VideoCapture::from_file(url, backend),
            SourceDescriptor::File(path) => {
                let Some(path) = path.to_str() else {
                    return Err(CaptureError::Open { uri });
                };
                VideoCapture::from_file(path, backend)
            }
        }
        .map_err(|err| {
            debug!("opencv backend {backend} failed for {uri}: {err}");
            CaptureError::Open { uri: uri.clone() }
        })?;

        if !cap.is_opened().map_err(|e| CaptureError::Other(e.into()))? {
            return Err(CaptureError::Open { uri });
        }

        let mut source = Self {
            cap,
            label: uri,
            scratch: Mat::default(),
            released: false,
        };
        if matches!(descriptor, SourceDescriptor::Device(_)) {
            source.configure_device();
        }
        Ok(source)
    }

    /// Apply the capture settings used for local cameras (resolution, fps).
    fn configure_device(&mut self) {
        let _ = self.cap.set(videoio::CAP_PROP_FRAME_WIDTH, DEVICE_WIDTH);
        let _ = self.cap.set(videoio::CAP_PROP_FRAME_HEIGHT, DEVICE_HEIGHT);
        let _ = self.cap.set(videoio::CAP_PROP_FPS, DEVICE_FPS);
    }
}

impl VideoSource for OpenCvSource {
    fn read(&mut self) -> Result<Option<Frame>, CaptureError> {
        if self.released {
            return Ok(None);
        }
        let grabbed = self
            .cap
            .read(&mut self.scratch)
            .map_err(|e| CaptureError::Other(e.into()))?;
        if !grabbed {
            return Ok(None);
        }

        let size = self
            .scratch
            .size()
            .map_err(|e| CaptureError::Other(e.into()))?;
        if size.width <= 0 || size.height <= 0 {
            return Ok(None);
        }

        let data = if self.scratch.is_continuous() {
            self.scratch
                .data_bytes()
                .map_err(|e| CaptureError::Other(e.into()))?
                .to_vec()
        } else {
            self.scratch
                .try_clone()
                .and_then(|owned| owned.data_bytes().map(|bytes| bytes.to_vec()))
                .map_err(|e| CaptureError::Other(e.into()))?
        };

        Ok(Some(Frame::from_bgr(data, size.width, size.height)))
    }

    fn close(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = self.cap.release() {
            warn!("failed to release {}: {err}", self.label);
        }
        self.released = true;
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

impl Drop for OpenCvSource {
    fn drop(&mut self) {
        self.close();
    }
}
