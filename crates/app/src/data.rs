//! Request and response bodies of the HTTP API.

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use traffic_analytics::{
    AnalyticsConfig, AnalyticsError, DetectorConfig, Point, SessionConfig, SessionInfo,
    SessionStatistics,
};
use video_ingest::SourceDescriptor;

use crate::config::ServerConfig;

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
pub struct PointDto {
    pub x: f32,
    pub y: f32,
}

impl From<PointDto> for Point {
    fn from(p: PointDto) -> Self {
        Point::new(p.x, p.y)
    }
}

#[derive(Debug, Deserialize)]
pub struct SourceRequest {
    pub cap_type: String,
    pub cap_path: String,
}

impl SourceRequest {
    pub fn descriptor(&self, videos_dir: &Path) -> Result<SourceDescriptor, AnalyticsError> {
        SourceDescriptor::from_request(&self.cap_type, &self.cap_path, videos_dir).map_err(
            |source| AnalyticsError::SourceUnavailable {
                descriptor: format!("{}:{}", self.cap_type, self.cap_path),
                source,
            },
        )
    }
}

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    #[serde(flatten)]
    pub source: SourceRequest,
    /// Road quad in the camera image: top-left, top-right, bottom-left,
    /// bottom-right.
    pub src_points: Vec<PointDto>,
    #[serde(default)]
    pub hot_zone: Option<Vec<PointDto>>,
    /// Seconds inside the hot zone before a track counts as a long stay.
    #[serde(default)]
    pub stay_threshold: Option<f64>,
    #[serde(default)]
    pub traffic_flow: Option<bool>,
    #[serde(default)]
    pub num_lanes: Option<u32>,
}

impl StartRequest {
    pub fn into_session_config(self, server: &ServerConfig) -> Result<SessionConfig, AnalyticsError> {
        let source = self.source.descriptor(&server.videos_dir)?;
        // Clients never choose what the server loads as a detector.
        let detector = DetectorConfig::from_model_path(&server.model_path);

        let mut analytics = AnalyticsConfig::new(self.src_points.into_iter().map(Point::from).collect());
        analytics.hot_zone = self
            .hot_zone
            .map(|zone| zone.into_iter().map(Point::from).collect());
        // Crossing counts are opt-in over HTTP.
        analytics.traffic_flow = self.traffic_flow.unwrap_or(false);
        if let Some(lanes) = self.num_lanes {
            analytics.num_lanes = lanes;
        }
        if let Some(seconds) = self.stay_threshold {
            // Unrepresentably large thresholds never trigger.
            analytics.stay_threshold =
                Duration::try_from_secs_f64(seconds.max(0.0)).unwrap_or(Duration::MAX);
        }

        Ok(SessionConfig::new(source, detector, analytics).with_queue_capacity(server.queue_capacity))
    }
}

#[derive(Serialize)]
pub struct StartResponse {
    pub service_id: u64,
}

#[derive(Serialize)]
pub struct StatisticsResponse {
    pub statistics: SessionStatistics,
}

#[derive(Serialize)]
pub struct ReleaseResponse {
    pub success: bool,
}

#[derive(Serialize)]
pub struct SessionsResponse {
    pub sessions: Vec<SessionInfo>,
}

#[derive(Serialize)]
pub struct FileListResponse {
    pub file_list: Vec<String>,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
