//! Multi-session lifecycle: create, read, release.
//!
//! [`SessionManager`] is an ordinary owned value; the transport layer holds
//! it and passes it around explicitly. Its registry lock only guards map and
//! counter updates. Opening sources, loading detectors and joining workers
//! all happen outside it.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use ml_core::{DetectAndTrack, ReplayDetector};
use serde::Serialize;
use tracing::{debug, info, warn};
use video_ingest::{CaptureError, Frame, SourceDescriptor, VideoSource};

use crate::{
    analytics::{SessionStatistics, TrackAnalytics},
    config::{DetectorConfig, SessionConfig},
    error::AnalyticsError,
    pipeline::{FramePipeline, PipelineHandle, SessionShared, SessionState},
    stream::{SharedFrame, StreamKind},
};

/// Opens video sources for new sessions.
pub trait SourceOpener: Send + Sync {
    fn open(&self, descriptor: &SourceDescriptor) -> Result<Box<dyn VideoSource>, CaptureError>;
}

impl<F> SourceOpener for F
where
    F: Fn(&SourceDescriptor) -> Result<Box<dyn VideoSource>, CaptureError> + Send + Sync,
{
    fn open(&self, descriptor: &SourceDescriptor) -> Result<Box<dyn VideoSource>, CaptureError> {
        self(descriptor)
    }
}

/// Opens sources through the default strategy list of `video-ingest`.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultSourceOpener;

impl SourceOpener for DefaultSourceOpener {
    fn open(&self, descriptor: &SourceDescriptor) -> Result<Box<dyn VideoSource>, CaptureError> {
        video_ingest::open_source(descriptor)
    }
}

/// Builds a detector/tracker for a new session.
pub trait DetectorFactory: Send + Sync {
    fn build(&self, config: &DetectorConfig) -> Result<Box<dyn DetectAndTrack>, AnalyticsError>;
}

impl<F> DetectorFactory for F
where
    F: Fn(&DetectorConfig) -> Result<Box<dyn DetectAndTrack>, AnalyticsError> + Send + Sync,
{
    fn build(&self, config: &DetectorConfig) -> Result<Box<dyn DetectAndTrack>, AnalyticsError> {
        self(config)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultDetectorFactory;

impl DetectorFactory for DefaultDetectorFactory {
    fn build(&self, config: &DetectorConfig) -> Result<Box<dyn DetectAndTrack>, AnalyticsError> {
        match config {
            DetectorConfig::Replay { path } => ReplayDetector::from_path(path)
                .map(|detector| Box::new(detector) as Box<dyn DetectAndTrack>)
                .map_err(|err| AnalyticsError::DetectorUnavailable(format!("{err:#}"))),
            #[cfg(feature = "with-tch")]
            DetectorConfig::TorchScript {
                model_path,
                input_size,
                confidence,
                use_cpu,
            } => {
                use ml_core::{TorchScriptDetector, tch::Device};

                let device = if *use_cpu {
                    Device::Cpu
                } else {
                    Device::cuda_if_available()
                };
                TorchScriptDetector::new(model_path, device, *input_size)
                    .map(|detector| {
                        Box::new(detector.with_confidence_threshold(*confidence))
                            as Box<dyn DetectAndTrack>
                    })
                    .map_err(|err| AnalyticsError::DetectorUnavailable(format!("{err:#}")))
            }
            #[cfg(not(feature = "with-tch"))]
            DetectorConfig::TorchScript { model_path, .. } => {
                Err(AnalyticsError::DetectorUnavailable(format!(
                    "{} needs TorchScript support; rebuild with the `with-tch` feature",
                    model_path.display()
                )))
            }
        }
    }
}

/// Summary row for [`SessionManager::list_sessions`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub session_id: u64,
    pub source: String,
    pub state: SessionState,
    pub frames_processed: u64,
}

struct SessionEntry {
    source: String,
    handle: PipelineHandle,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    sessions: HashMap<u64, SessionEntry>,
}

pub struct SessionManager {
    registry: Mutex<Registry>,
    opener: Box<dyn SourceOpener>,
    detectors: Box<dyn DetectorFactory>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    pub fn new() -> Self {
        Self::with_backends(DefaultSourceOpener, DefaultDetectorFactory)
    }

    pub fn with_backends(
        opener: impl SourceOpener + 'static,
        detectors: impl DetectorFactory + 'static,
    ) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            opener: Box::new(opener),
            detectors: Box::new(detectors),
        }
    }

    fn registry(&self) -> Result<MutexGuard<'_, Registry>, AnalyticsError> {
        self.registry
            .lock()
            .map_err(|_| AnalyticsError::PipelineFault("session registry lock poisoned".into()))
    }

    fn shared(&self, session_id: u64) -> Result<Arc<SessionShared>, AnalyticsError> {
        self.registry()?
            .sessions
            .get(&session_id)
            .map(|entry| entry.handle.shared().clone())
            .ok_or(AnalyticsError::SessionNotFound(session_id))
    }

    /// Validate `config`, open its source and start the worker. Returns as
    /// soon as the worker is running.
    pub fn create_session(&self, config: SessionConfig) -> Result<u64, AnalyticsError> {
        let analytics = TrackAnalytics::new(config.analytics)?;
        let detector = self.detectors.build(&config.detector)?;
        let source = self
            .opener
            .open(&config.source)
            .map_err(|source| AnalyticsError::SourceUnavailable {
                descriptor: config.source.uri(),
                source,
            })?;
        let label = config.source.to_string();

        let session_id = {
            let mut registry = self.registry()?;
            registry.next_id += 1;
            registry.next_id
        };

        let pipeline = FramePipeline::new(session_id, source, detector, analytics, config.queue_capacity);
        let handle = pipeline.spawn().map_err(|err| {
            AnalyticsError::PipelineFault(format!("failed to spawn session worker: {err}"))
        })?;

        let active = {
            let mut registry = self.registry()?;
            registry.sessions.insert(
                session_id,
                SessionEntry {
                    source: label.clone(),
                    handle,
                },
            );
            registry.sessions.len()
        };
        metrics::gauge!("traffic_active_sessions").set(active as f64);
        info!(session = session_id, source = %label, "session created");
        Ok(session_id)
    }

    /// Next queued frame of `stream`, else its last published frame.
    pub fn get_frame(&self, session_id: u64, stream: StreamKind) -> Result<SharedFrame, AnalyticsError> {
        self.shared(session_id)?
            .streams
            .get(stream)
            .latest()
            .ok_or(AnalyticsError::NoFrameAvailable {
                session: session_id,
                stream,
            })
    }

    pub fn get_statistics(&self, session_id: u64) -> Result<SessionStatistics, AnalyticsError> {
        Ok(self.shared(session_id)?.statistics())
    }

    pub fn session_state(&self, session_id: u64) -> Result<SessionState, AnalyticsError> {
        Ok(self.shared(session_id)?.state())
    }

    pub fn list_sessions(&self) -> Result<Vec<SessionInfo>, AnalyticsError> {
        let registry = self.registry()?;
        let mut sessions: Vec<SessionInfo> = registry
            .sessions
            .iter()
            .map(|(id, entry)| SessionInfo {
                session_id: *id,
                source: entry.source.clone(),
                state: entry.handle.shared().state(),
                frames_processed: entry.handle.shared().frames_processed(),
            })
            .collect();
        sessions.sort_by_key(|info| info.session_id);
        Ok(sessions)
    }

    /// Stop the worker, wait for it to exit, and forget the session.
    ///
    /// The entry leaves the registry before the join so the lock is never
    /// held while waiting on the worker. A concurrent release of the same id
    /// sees `SessionNotFound`, and only this caller joins.
    pub fn release_session(&self, session_id: u64) -> Result<(), AnalyticsError> {
        let (mut entry, active) = {
            let mut registry = self.registry()?;
            let entry = registry
                .sessions
                .remove(&session_id)
                .ok_or(AnalyticsError::SessionNotFound(session_id))?;
            (entry, registry.sessions.len())
        };
        let state = entry.handle.stop();
        metrics::gauge!("traffic_active_sessions").set(active as f64);
        info!(session = session_id, ?state, "session released");
        Ok(())
    }

    /// Release every session.
    pub fn shutdown(&self) {
        let drained: Vec<(u64, SessionEntry)> = match self.registry.lock() {
            Ok(mut registry) => registry.sessions.drain().collect(),
            Err(poisoned) => poisoned.into_inner().sessions.drain().collect(),
        };
        if drained.is_empty() {
            return;
        }
        debug!("shutting down {} session(s)", drained.len());
        for (session_id, mut entry) in drained {
            let state = entry.handle.stop();
            debug!(session = session_id, ?state, "session stopped");
        }
        metrics::gauge!("traffic_active_sessions").set(0.0);
    }

    /// Open `descriptor`, read one frame and close it again.
    pub fn probe_frame(&self, descriptor: &SourceDescriptor) -> Result<Frame, AnalyticsError> {
        let unavailable = |source| AnalyticsError::SourceUnavailable {
            descriptor: descriptor.uri(),
            source,
        };
        let mut source = self.opener.open(descriptor).map_err(unavailable)?;
        let frame = source.read();
        source.close();
        match frame {
            Ok(Some(frame)) => Ok(frame),
            Ok(None) => {
                warn!("probe of {descriptor} returned no frame");
                Err(unavailable(CaptureError::Exhausted {
                    uri: descriptor.uri(),
                }))
            }
            Err(err) => Err(unavailable(err)),
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
