use std::{convert::TryFrom, path::Path};

use anyhow::{Context, Result, bail};
use tch::{self, Device, Kind, Tensor};

use crate::detector::{DetectAndTrack, Detection, DetectionBatch, FrameRef, coco_label};

const MAX_DETECTIONS: usize = 512;

/// TorchScript-backed detector wrapper.
///
/// The exported module is expected to emit `[1, C, N]` predictions laid out as
/// `(cx, cy, w, h, conf, class)`. It does not track, so every detection comes
/// back without a `track_id`.
pub struct TorchScriptDetector {
    module: tch::CModule,
    device: Device,
    input_size: (i64, i64),
    confidence_threshold: f32,
}

impl TorchScriptDetector {
    /// Load a TorchScript module onto `device`.
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        device: Device,
        input_size: (i64, i64),
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let module = tch::CModule::load_on_device(model_path, device)
            .with_context(|| format!("failed to load TorchScript model {}", model_path.display()))?;
        Ok(Self {
            module,
            device,
            input_size,
            confidence_threshold: 0.25,
        })
    }

    /// Override the confidence threshold used for filtering detections.
    pub fn with_confidence_threshold(mut self, confidence: f32) -> Self {
        self.confidence_threshold = confidence;
        self
    }

    /// Converts a BGR frame into a normalised NCHW RGB tensor.
    fn bgr_to_tensor(&self, bgr: &[u8], width: i32, height: i32) -> Result<Tensor> {
        let expected = (width as usize) * (height as usize) * 3;
        if bgr.len() != expected {
            bail!(
                "unexpected frame buffer size: got {} bytes, expected {}",
                bgr.len(),
                expected
            );
        }

        let (in_w, in_h) = self.input_size;
        if (width as i64, height as i64) != (in_w, in_h) {
            bail!("frame size {width}x{height} does not match detector input {in_w}x{in_h}");
        }

        let tensor = Tensor::from_slice(bgr)
            .to_device(self.device)
            .to_kind(Kind::Float)
            .view([1, in_h, in_w, 3])
            .flip([3])
            .permute([0, 3, 1, 2])
            / 255.0;

        Ok(tensor)
    }

    /// Executes the module and applies confidence filtering.
    fn infer(&self, input: &Tensor) -> Result<DetectionBatch> {
        let output = self.module.forward_ts(&[input])?;
        let shape = output.size();
        if shape.len() != 3 {
            bail!("unexpected detector output shape: {shape:?}");
        }
        if shape[0] != 1 {
            bail!("detector expected batch=1 but received {}", shape[0]);
        }
        if shape[1] < 5 {
            bail!(
                "detector output requires at least 5 channels (x,y,w,h,conf), got {}",
                shape[1]
            );
        }

        let preds = output
            .to_device(Device::Cpu)
            .squeeze_dim(0)
            .permute([1, 0])
            .contiguous();

        let rows: Vec<Vec<f32>> = Vec::<Vec<f32>>::try_from(&preds)?;

        let mut detections = Vec::new();
        for row in rows {
            if row.len() < 5 {
                continue;
            }
            let score = row[4];
            if score < self.confidence_threshold {
                continue;
            }
            let class_id = if row.len() > 5 { row[5] as i64 } else { 0 };
            detections.push(Detection {
                bbox_xywh: [row[0], row[1], row[2], row[3]],
                score,
                class_id,
                class_label: coco_label(class_id).to_string(),
                track_id: None,
            });
            if detections.len() >= MAX_DETECTIONS {
                break;
            }
        }

        Ok(DetectionBatch { detections })
    }
}

impl DetectAndTrack for TorchScriptDetector {
    fn detect_and_track(&mut self, frame: FrameRef<'_>) -> Result<DetectionBatch> {
        let input = self
            .bgr_to_tensor(frame.bgr, frame.width, frame.height)
            .with_context(|| "Failed to prepare tensor from frame")?;
        let _guard = tch::no_grad_guard();
        self.infer(&input)
            .with_context(|| "Detector inference failed")
    }
}
