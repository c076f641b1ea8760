//! JPEG encoding for frames leaving the service.

use anyhow::{Context, Result, anyhow};
use image::{RgbImage, codecs::jpeg::JpegEncoder};
use traffic_analytics::annotation::frame_to_rgb;
use video_ingest::Frame;

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
        .encode_image(image)
        .map_err(|err| anyhow!("JPEG encode failed: {err}"))?;
    metrics::histogram!("traffic_encoded_frame_bytes").record(buffer.len() as f64);
    Ok(buffer)
}

/// Encode a raw capture (BGR) frame.
pub fn encode_capture(frame: &Frame, quality: u8) -> Result<Vec<u8>> {
    let rgb = frame_to_rgb(frame).context("captured frame is unusable")?;
    encode_jpeg(&rgb, quality)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoded_frames_are_jpeg() {
        let frame = Frame::from_bgr(vec![128; 16 * 8 * 3], 16, 8);
        let jpeg = encode_capture(&frame, 80).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 8));
    }

    #[test]
    fn test_malformed_capture_is_an_error() {
        let frame = Frame::from_bgr(vec![0; 10], 16, 8);
        assert!(encode_capture(&frame, 80).is_err());
    }
}
