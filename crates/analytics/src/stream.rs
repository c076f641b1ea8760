//! Latest-wins frame queues with a last-frame fallback cache.

use std::{
    fmt,
    sync::{Arc, Mutex},
};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use image::RgbImage;
use serde::{Deserialize, Serialize};

pub const DEFAULT_QUEUE_CAPACITY: usize = 5;

/// The three outputs a session publishes per frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Raw,
    Processed,
    BirdView,
}

impl StreamKind {
    pub const ALL: [StreamKind; 3] = [StreamKind::Raw, StreamKind::Processed, StreamKind::BirdView];

    pub fn label(self) -> &'static str {
        match self {
            StreamKind::Raw => "raw",
            StreamKind::Processed => "processed",
            StreamKind::BirdView => "birdview",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A finished output image.
#[derive(Clone, Debug)]
pub struct RenderedFrame {
    pub image: RgbImage,
    pub frame_number: u64,
    pub timestamp_ms: i64,
}

pub type SharedFrame = Arc<RenderedFrame>;

/// Bounded queue whose publish never blocks: on overflow the backlog is
/// discarded and only the new item kept.
pub struct LatestQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> LatestQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        Self { tx, rx }
    }

    /// Enqueue `item`, returning how many stale items were discarded.
    pub fn publish(&self, item: T) -> usize {
        let mut item = item;
        let mut dropped = 0;
        loop {
            match self.tx.try_send(item) {
                Ok(()) => return dropped,
                Err(TrySendError::Full(rejected)) => {
                    while self.rx.try_recv().is_ok() {
                        dropped += 1;
                    }
                    item = rejected;
                }
                // Both ends live in `self`.
                Err(TrySendError::Disconnected(_)) => return dropped,
            }
        }
    }

    /// Oldest queued item, if any.
    pub fn try_take(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn clear(&self) {
        while self.rx.try_recv().is_ok() {}
    }
}

/// One output stream: the queue plus the last frame published to it.
pub struct FrameStream {
    queue: LatestQueue<SharedFrame>,
    last: Mutex<Option<SharedFrame>>,
}

impl FrameStream {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: LatestQueue::new(capacity),
            last: Mutex::new(None),
        }
    }

    pub fn publish(&self, frame: SharedFrame) -> usize {
        *self.last.lock().unwrap_or_else(|e| e.into_inner()) = Some(frame.clone());
        self.queue.publish(frame)
    }

    /// Next queued frame, else the cached last frame, else `None`.
    pub fn latest(&self) -> Option<SharedFrame> {
        self.queue
            .try_take()
            .or_else(|| self.last.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn clear(&self) {
        self.queue.clear();
    }
}

/// The raw, processed and bird's-eye streams of a session.
pub struct FrameStreams {
    raw: FrameStream,
    processed: FrameStream,
    birdview: FrameStream,
}

impl FrameStreams {
    pub fn new(capacity: usize) -> Self {
        Self {
            raw: FrameStream::new(capacity),
            processed: FrameStream::new(capacity),
            birdview: FrameStream::new(capacity),
        }
    }

    pub fn get(&self, kind: StreamKind) -> &FrameStream {
        match kind {
            StreamKind::Raw => &self.raw,
            StreamKind::Processed => &self.processed,
            StreamKind::BirdView => &self.birdview,
        }
    }

    /// Drop queued backlog; cached last frames stay readable.
    pub fn drain(&self) {
        for kind in StreamKind::ALL {
            self.get(kind).clear();
        }
    }
}
