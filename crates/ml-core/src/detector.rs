use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Single detection returned by a detector/tracker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Box centre x, centre y, width and height in source pixels.
    pub bbox_xywh: [f32; 4],
    #[serde(default)]
    pub score: f32,
    #[serde(default)]
    pub class_id: i64,
    /// Human readable class, e.g. `car`. Filled from the COCO table when empty.
    #[serde(default)]
    pub class_label: String,
    /// Persistent identifier from the tracker, absent when it could not
    /// associate the box.
    #[serde(default)]
    pub track_id: Option<i64>,
}

impl Detection {
    pub fn centroid(&self) -> (f32, f32) {
        (self.bbox_xywh[0], self.bbox_xywh[1])
    }

    /// Corner form `[left, top, right, bottom]`.
    pub fn corners(&self) -> [f32; 4] {
        let [cx, cy, w, h] = self.bbox_xywh;
        [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0]
    }

    pub fn label(&self) -> &str {
        if self.class_label.is_empty() {
            coco_label(self.class_id)
        } else {
            &self.class_label
        }
    }
}

/// Detections for a single frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionBatch {
    pub detections: Vec<Detection>,
}

/// Borrowed view of a BGR8 frame handed to the detector.
#[derive(Clone, Copy)]
pub struct FrameRef<'a> {
    pub bgr: &'a [u8],
    pub width: i32,
    pub height: i32,
    /// One-based position of the frame within its session.
    pub frame_number: u64,
}

/// Detector plus tracker: boxes, labels, and (ideally) persistent track ids.
pub trait DetectAndTrack: Send {
    fn detect_and_track(&mut self, frame: FrameRef<'_>) -> Result<DetectionBatch>;
}

impl<F> DetectAndTrack for F
where
    F: FnMut(FrameRef<'_>) -> Result<DetectionBatch> + Send,
{
    fn detect_and_track(&mut self, frame: FrameRef<'_>) -> Result<DetectionBatch> {
        self(frame)
    }
}

const COCO_CLASSES: [&str; 80] = [
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "dining table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];

/// COCO class name for `class_id`, `object` when out of range.
pub fn coco_label(class_id: i64) -> &'static str {
    usize::try_from(class_id)
        .ok()
        .and_then(|idx| COCO_CLASSES.get(idx).copied())
        .unwrap_or("object")
}
