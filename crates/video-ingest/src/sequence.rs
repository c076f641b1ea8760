//! Still-image sequence source.
//!
//! Treats a directory of PNG/JPEG/BMP files (or a single image) as a finite
//! video, read in lexicographic file-name order.

use std::{
    fs,
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::{
    VideoSource,
    types::{CaptureError, Frame, SourceDescriptor},
};

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

pub struct ImageSequence {
    label: String,
    files: Vec<PathBuf>,
    cursor: usize,
}

impl ImageSequence {
    /// Open a directory or single image file. Anything else is not a sequence.
    pub fn open(descriptor: &SourceDescriptor) -> Result<Self, CaptureError> {
        let SourceDescriptor::File(path) = descriptor else {
            return Err(CaptureError::Open {
                uri: descriptor.uri(),
            });
        };

        let files = if path.is_dir() {
            let mut files: Vec<PathBuf> = fs::read_dir(path)
                .map_err(|err| CaptureError::Other(err.into()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && is_image(p))
                .collect();
            files.sort();
            files
        } else if path.is_file() && is_image(path) {
            vec![path.clone()]
        } else {
            Vec::new()
        };

        if files.is_empty() {
            return Err(CaptureError::Open {
                uri: descriptor.uri(),
            });
        }

        debug!(
            "image sequence {} opened with {} frame(s)",
            path.display(),
            files.len()
        );
        Ok(Self {
            label: descriptor.uri(),
            files,
            cursor: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl VideoSource for ImageSequence {
    fn read(&mut self) -> Result<Option<Frame>, CaptureError> {
        let Some(path) = self.files.get(self.cursor) else {
            return Ok(None);
        };
        self.cursor += 1;

        let rgb = image::open(path)
            .map_err(|err| CaptureError::Decode {
                uri: path.display().to_string(),
                reason: err.to_string(),
            })?
            .to_rgb8();
        let (width, height) = rgb.dimensions();
        Ok(Some(Frame::from_bgr(
            rgb_to_bgr(rgb.as_raw()),
            width as i32,
            height as i32,
        )))
    }

    fn close(&mut self) {
        self.cursor = self.files.len();
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

fn rgb_to_bgr(input: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(input.len());
    for chunk in input.chunks_exact(3) {
        output.push(chunk[2]);
        output.push(chunk[1]);
        output.push(chunk[0]);
    }
    output
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};

    use super::*;

    fn write_frame(dir: &Path, name: &str, color: [u8; 3]) {
        RgbImage::from_pixel(4, 3, Rgb(color))
            .save(dir.join(name))
            .unwrap();
    }

    #[test]
    fn test_reads_frames_in_name_order_then_ends() {
        let dir = tempfile::tempdir().unwrap();
        write_frame(dir.path(), "0002.png", [0, 0, 255]);
        write_frame(dir.path(), "0001.png", [255, 0, 0]);
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut source =
            ImageSequence::open(&SourceDescriptor::File(dir.path().to_path_buf())).unwrap();
        assert_eq!(source.len(), 2);

        let first = source.read().unwrap().unwrap();
        assert_eq!((first.width, first.height), (4, 3));
        assert_eq!(first.data.len(), first.expected_len());
        // red pixel stored as BGR
        assert_eq!(&first.data[..3], &[0, 0, 255]);

        let second = source.read().unwrap().unwrap();
        assert_eq!(&second.data[..3], &[255, 0, 0]);

        assert!(source.read().unwrap().is_none());
    }

    #[test]
    fn test_rejects_non_file_descriptors_and_empty_dirs() {
        assert!(ImageSequence::open(&SourceDescriptor::Device(0)).is_err());
        let dir = tempfile::tempdir().unwrap();
        assert!(ImageSequence::open(&SourceDescriptor::File(dir.path().to_path_buf())).is_err());
    }
}
