//! Single-session worker: capture, detect and track, analyse, publish.
//!
//! A [`FramePipeline`] owns its video source, detector and analytics state
//! outright. Everything readers need from other threads lives in
//! [`SessionShared`]: the three output streams, a statistics snapshot, the
//! stop flag and the run state.

use std::{
    io,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use ml_core::{DetectAndTrack, FrameRef};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use video_ingest::{Frame, VideoSource};

use crate::{
    analytics::{SessionStatistics, TrackAnalytics, TrackObservation},
    annotation::frame_to_rgb,
    stream::{FrameStreams, RenderedFrame, StreamKind},
    telemetry,
};

/// Frames between short yields of the worker thread.
pub const YIELD_EVERY: u64 = 10;
pub const YIELD_FOR: Duration = Duration::from_millis(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Running,
    /// Source exhausted or stop requested.
    Finished,
    /// The loop ended on an error; see the logs.
    Faulted,
}

/// State a running pipeline shares with readers.
pub struct SessionShared {
    pub streams: FrameStreams,
    statistics: Mutex<SessionStatistics>,
    stop: AtomicBool,
    state: Mutex<SessionState>,
    frames_processed: AtomicU64,
}

impl SessionShared {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            streams: FrameStreams::new(queue_capacity),
            statistics: Mutex::new(SessionStatistics::default()),
            stop: AtomicBool::new(false),
            state: Mutex::new(SessionState::Running),
            frames_processed: AtomicU64::new(0),
        }
    }

    pub fn statistics(&self) -> SessionStatistics {
        self.statistics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn store_statistics(&self, stats: &SessionStatistics) {
        let mut guard = self.statistics.lock().unwrap_or_else(|e| e.into_inner());
        if *guard != *stats {
            *guard = stats.clone();
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed.load(Ordering::Relaxed)
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

pub struct FramePipeline {
    session_id: u64,
    source: Box<dyn VideoSource>,
    detector: Box<dyn DetectAndTrack>,
    analytics: TrackAnalytics,
    shared: Arc<SessionShared>,
    frame_number: u64,
}

impl FramePipeline {
    pub fn new(
        session_id: u64,
        source: Box<dyn VideoSource>,
        detector: Box<dyn DetectAndTrack>,
        analytics: TrackAnalytics,
        queue_capacity: usize,
    ) -> Self {
        Self {
            session_id,
            source,
            detector,
            analytics,
            shared: Arc::new(SessionShared::new(queue_capacity)),
            frame_number: 0,
        }
    }

    pub fn shared(&self) -> Arc<SessionShared> {
        self.shared.clone()
    }

    /// Start the loop on its own thread.
    pub fn spawn(self) -> io::Result<PipelineHandle> {
        let shared = self.shared.clone();
        let name = format!("session-{}", self.session_id);
        let join = telemetry::spawn_thread(name, move || self.run())?;
        Ok(PipelineHandle {
            shared,
            join: Some(join),
        })
    }

    /// Drive the loop until the source ends, a stop is requested, or a frame
    /// fails. Always closes the source and resets analytics before returning.
    pub fn run(mut self) -> SessionState {
        let span = tracing::info_span!(
            "session.worker",
            session = self.session_id,
            source = %self.source.describe()
        );
        let _span_guard = span.enter();
        info!("session started");

        let outcome = loop {
            if self.shared.stop_requested() {
                debug!("stop requested");
                break SessionState::Finished;
            }

            let read_start = Instant::now();
            let frame = match self.source.read() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    info!("source exhausted after {} frame(s)", self.frame_number);
                    break SessionState::Finished;
                }
                Err(err) => {
                    error!("capture error: {err}");
                    metrics::counter!("traffic_pipeline_faults_total").increment(1);
                    break SessionState::Faulted;
                }
            };
            metrics::histogram!("traffic_stage_latency_seconds", "stage" => "capture")
                .record(read_start.elapsed().as_secs_f64());

            match panic::catch_unwind(AssertUnwindSafe(|| self.process_frame(frame))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    error!("pipeline fault: {err:?}");
                    metrics::counter!("traffic_pipeline_faults_total").increment(1);
                    break SessionState::Faulted;
                }
                Err(_) => {
                    error!("pipeline fault: frame processing panicked");
                    metrics::counter!("traffic_pipeline_faults_total").increment(1);
                    break SessionState::Faulted;
                }
            }

            if self.frame_number % YIELD_EVERY == 0 {
                thread::sleep(YIELD_FOR);
            }
        };

        self.source.close();
        self.analytics.reset_statistics();
        self.shared.store_statistics(self.analytics.statistics());
        self.shared.streams.drain();
        self.shared.set_state(outcome);
        info!("session ended ({outcome:?})");
        outcome
    }

    /// Run one frame through detection, analytics and rendering, then
    /// publish all three outputs.
    pub fn process_frame(&mut self, frame: Frame) -> Result<()> {
        self.frame_number += 1;
        let frame_number = self.frame_number;
        let _frame_guard = tracing::info_span!(
            "frame",
            frame = frame_number,
            width = frame.width,
            height = frame.height
        )
        .entered();

        let raw = frame_to_rgb(&frame).context("captured frame is unusable")?;

        let detect_start = Instant::now();
        let batch = self
            .detector
            .detect_and_track(FrameRef {
                bgr: &frame.data,
                width: frame.width,
                height: frame.height,
                frame_number,
            })
            .context("detector/tracker failed")?;
        metrics::histogram!("traffic_stage_latency_seconds", "stage" => "detect")
            .record(detect_start.elapsed().as_secs_f64());

        let analytics_start = Instant::now();
        let observations: Vec<TrackObservation> =
            batch.detections.iter().map(TrackObservation::from).collect();
        let keys = self
            .analytics
            .update(&observations, raw.height(), Instant::now());
        let mut annotated = raw.clone();
        let birdview = self.analytics.render(&observations, &keys, &mut annotated);
        self.shared.store_statistics(self.analytics.statistics());
        metrics::histogram!("traffic_stage_latency_seconds", "stage" => "analytics")
            .record(analytics_start.elapsed().as_secs_f64());

        let session = self.session_id.to_string();
        for (kind, image) in [
            (StreamKind::Raw, raw),
            (StreamKind::Processed, annotated),
            (StreamKind::BirdView, birdview),
        ] {
            let dropped = self.shared.streams.get(kind).publish(Arc::new(RenderedFrame {
                image,
                frame_number,
                timestamp_ms: frame.timestamp_ms,
            }));
            if dropped > 0 {
                metrics::counter!(
                    "traffic_frames_dropped_total",
                    "session" => session.clone(),
                    "stream" => kind.label()
                )
                .increment(dropped as u64);
            }
        }

        self.shared.frames_processed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("traffic_frames_processed_total", "session" => session).increment(1);
        if frame_number % 30 == 0 {
            debug!(
                "heartbeat: frame #{frame_number}, {} detection(s)",
                observations.len()
            );
        }
        Ok(())
    }
}

/// Owner side of a spawned pipeline.
pub struct PipelineHandle {
    shared: Arc<SessionShared>,
    join: Option<thread::JoinHandle<SessionState>>,
}

impl PipelineHandle {
    pub fn shared(&self) -> &Arc<SessionShared> {
        &self.shared
    }

    /// Signal the loop to stop and wait for it to exit. Idempotent.
    pub fn stop(&mut self) -> SessionState {
        self.shared.request_stop();
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                warn!("session worker panicked outside frame processing");
                self.shared.set_state(SessionState::Faulted);
                return SessionState::Faulted;
            }
        }
        self.shared.state()
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use anyhow::bail;
    use ml_core::{Detection, DetectionBatch};
    use video_ingest::CaptureError;

    use super::*;
    use crate::analytics::AnalyticsConfig;

    struct ScriptedSource {
        frames: VecDeque<Frame>,
        closed: Arc<AtomicBool>,
    }

    impl VideoSource for ScriptedSource {
        fn read(&mut self) -> Result<Option<Frame>, CaptureError> {
            Ok(self.frames.pop_front())
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }

        fn describe(&self) -> String {
            "scripted".into()
        }
    }

    fn scripted(n: usize) -> (Box<dyn VideoSource>, Arc<AtomicBool>) {
        let closed = Arc::new(AtomicBool::new(false));
        let frames = (0..n).map(|_| Frame::from_bgr(vec![0; 8 * 6 * 3], 8, 6)).collect();
        (
            Box::new(ScriptedSource {
                frames,
                closed: closed.clone(),
            }),
            closed,
        )
    }

    fn one_car(frame: FrameRef<'_>) -> Result<DetectionBatch> {
        Ok(DetectionBatch {
            detections: vec![Detection {
                bbox_xywh: [4.0, frame.frame_number as f32, 2.0, 2.0],
                score: 0.9,
                class_id: 2,
                class_label: "car".into(),
                track_id: Some(1),
            }],
        })
    }

    fn pipeline(source: Box<dyn VideoSource>, detector: Box<dyn DetectAndTrack>) -> FramePipeline {
        let analytics = TrackAnalytics::new(AnalyticsConfig::default()).unwrap();
        FramePipeline::new(1, source, detector, analytics, 5)
    }

    #[test]
    fn test_process_frame_publishes_all_streams() {
        let (source, _) = scripted(0);
        let mut pipeline = pipeline(source, Box::new(one_car));
        pipeline
            .process_frame(Frame::from_bgr(vec![0; 8 * 6 * 3], 8, 6))
            .unwrap();

        let shared = pipeline.shared();
        for kind in StreamKind::ALL {
            let frame = shared.streams.get(kind).latest().unwrap();
            assert_eq!(frame.frame_number, 1);
        }
        assert_eq!(shared.streams.get(StreamKind::Raw).latest().unwrap().image.dimensions(), (8, 6));
        assert_eq!(shared.statistics().total_count, 1);
        assert_eq!(shared.frames_processed(), 1);
    }

    #[test]
    fn test_end_of_stream_closes_source_and_resets() {
        let (source, closed) = scripted(3);
        let pipeline = pipeline(source, Box::new(one_car));
        let shared = pipeline.shared();

        assert_eq!(pipeline.run(), SessionState::Finished);
        assert!(closed.load(Ordering::SeqCst));
        assert_eq!(shared.frames_processed(), 3);
        assert_eq!(shared.statistics(), SessionStatistics::default());
        assert_eq!(shared.state(), SessionState::Finished);
        // cache outlives the drained queue
        assert_eq!(shared.streams.get(StreamKind::Processed).latest().unwrap().frame_number, 3);
    }

    #[test]
    fn test_detector_error_faults_the_session() {
        let (source, closed) = scripted(5);
        let failing = |_: FrameRef<'_>| -> Result<DetectionBatch> { bail!("model exploded") };
        let pipeline = pipeline(source, Box::new(failing));
        let shared = pipeline.shared();

        assert_eq!(pipeline.run(), SessionState::Faulted);
        assert!(closed.load(Ordering::SeqCst));
        assert_eq!(shared.frames_processed(), 0);
    }

    #[test]
    fn test_detector_panic_is_contained() {
        let (source, closed) = scripted(2);
        let panicking = |_: FrameRef<'_>| -> Result<DetectionBatch> { panic!("tracker bug") };
        let pipeline = pipeline(source, Box::new(panicking));
        assert_eq!(pipeline.run(), SessionState::Faulted);
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_stop_before_first_read() {
        let (source, closed) = scripted(100);
        let pipeline = pipeline(source, Box::new(one_car));
        let shared = pipeline.shared();
        shared.request_stop();
        let mut handle = pipeline.spawn().unwrap();
        assert_eq!(handle.stop(), SessionState::Finished);
        assert!(closed.load(Ordering::SeqCst));
        assert_eq!(shared.frames_processed(), 0);
    }
}
