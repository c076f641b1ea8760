//! Per-track traffic semantics: first-seen counting, trajectories, hot-zone
//! dwell timing and reference-line crossings.

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    fmt,
    time::{Duration, Instant},
};

use image::{Rgb, RgbImage};
use ml_core::Detection;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    annotation::{draw_box, draw_dot, draw_label, draw_polyline, draw_tag, drawable},
    error::AnalyticsError,
    geometry::{Point, point_in_polygon},
    mapper::GeometricMapper,
};

pub const DEFAULT_TRAJECTORY_CAPACITY: usize = 30;
pub const DEFAULT_STAY_THRESHOLD: Duration = Duration::from_secs(5);
pub const DEFAULT_NUM_LANES: u32 = 2;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const TRAJECTORY_COLOR: Rgb<u8> = Rgb([230, 230, 230]);
const TRAJECTORY_THICKNESS: u32 = 10;
const BIRDVIEW_POINT_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const BIRDVIEW_POINT_RADIUS: i32 = 5;
const BIRDVIEW_LABEL_COLOR: Rgb<u8> = Rgb([255, 255, 0]);

/// Bird's-eye destination quad: top-left, top-right, bottom-left, bottom-right.
pub fn default_dst_quad() -> Vec<Point> {
    vec![
        Point::new(100.0, 0.0),
        Point::new(400.0, 0.0),
        Point::new(100.0, 800.0),
        Point::new(400.0, 800.0),
    ]
}

/// Geometry and rule settings for one session's analytics.
#[derive(Clone, Debug, PartialEq)]
pub struct AnalyticsConfig {
    /// Road quad in source pixels, same corner order as `dst_quad`.
    pub src_quad: Vec<Point>,
    pub dst_quad: Vec<Point>,
    pub num_lanes: u32,
    /// Polygon in bird's-eye coordinates; dwell timing is off when `None`.
    pub hot_zone: Option<Vec<Point>>,
    pub stay_threshold: Duration,
    /// Enables reference-line crossing counts.
    pub traffic_flow: bool,
    /// Source-space y of the reference line; `None` means half the frame height.
    pub crossing_line_y: Option<f32>,
    pub trajectory_capacity: usize,
}

impl AnalyticsConfig {
    pub fn new(src_quad: Vec<Point>) -> Self {
        Self {
            src_quad,
            ..Self::default()
        }
    }
}

impl Default for AnalyticsConfig {
    /// Identity mapping onto the default bird's-eye quad.
    fn default() -> Self {
        Self {
            src_quad: default_dst_quad(),
            dst_quad: default_dst_quad(),
            num_lanes: DEFAULT_NUM_LANES,
            hot_zone: None,
            stay_threshold: DEFAULT_STAY_THRESHOLD,
            traffic_flow: true,
            crossing_line_y: None,
            trajectory_capacity: DEFAULT_TRAJECTORY_CAPACITY,
        }
    }
}

/// Identity an observation is accounted under.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TrackKey {
    /// Persistent id from the tracker.
    Tracked(i64),
    /// Position within a frame whose detection had no tracker id. Not stable
    /// across frames, so it never carries history.
    Synthetic(usize),
}

impl fmt::Display for TrackKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKey::Tracked(id) => write!(f, "{id}"),
            TrackKey::Synthetic(index) => write!(f, "{index}"),
        }
    }
}

/// One detected object in one frame, as the analytics step consumes it.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackObservation {
    pub track_id: Option<i64>,
    pub class_label: String,
    /// Box centre in source pixels.
    pub centroid: Point,
    /// `[left, top, right, bottom]` in source pixels.
    pub bbox: [f32; 4],
    pub score: f32,
}

impl TrackObservation {
    pub fn new(track_id: Option<i64>, class_label: impl Into<String>, centroid: Point) -> Self {
        Self {
            track_id,
            class_label: class_label.into(),
            centroid,
            bbox: [centroid.x, centroid.y, centroid.x, centroid.y],
            score: 1.0,
        }
    }
}

impl From<&Detection> for TrackObservation {
    fn from(det: &Detection) -> Self {
        let (x, y) = det.centroid();
        Self {
            track_id: det.track_id,
            class_label: det.label().to_string(),
            centroid: Point::new(x, y),
            bbox: det.corners(),
            score: det.score,
        }
    }
}

/// History kept for a tracker id for the lifetime of the session statistics.
#[derive(Clone, Debug, Default)]
pub struct TrackState {
    pub class_label: String,
    pub trajectory: VecDeque<Point>,
    /// Set while the object is continuously inside the hot zone.
    pub hot_zone_entry: Option<Instant>,
    pub is_long_stay: bool,
    pub has_crossed: bool,
}

/// Aggregate counters exposed to callers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatistics {
    pub total_count: u64,
    pub category_count: BTreeMap<String, u64>,
    pub long_stay_count: u64,
    pub crossing_count: u64,
}

impl SessionStatistics {
    fn record_first_seen(&mut self, class_label: &str) {
        self.total_count += 1;
        *self
            .category_count
            .entry(class_label.to_string())
            .or_default() += 1;
    }
}

/// Stateful per-session analytics engine.
pub struct TrackAnalytics {
    mapper: GeometricMapper,
    hot_zone: Option<Vec<Point>>,
    stay_threshold: Duration,
    traffic_flow: bool,
    crossing_line_y: Option<f32>,
    trajectory_capacity: usize,
    tracks: HashMap<i64, TrackState>,
    stats: SessionStatistics,
}

impl TrackAnalytics {
    pub fn new(config: AnalyticsConfig) -> Result<Self, AnalyticsError> {
        let mapper = GeometricMapper::new(&config.src_quad, &config.dst_quad, config.num_lanes)?;
        if let Some(zone) = &config.hot_zone {
            if zone.len() < 3 || zone.iter().any(|p| !p.is_finite()) {
                return Err(AnalyticsError::InvalidGeometry(format!(
                    "hot zone needs at least 3 finite points, got {}",
                    zone.len()
                )));
            }
        }
        Ok(Self {
            mapper,
            hot_zone: config.hot_zone,
            stay_threshold: config.stay_threshold,
            traffic_flow: config.traffic_flow,
            crossing_line_y: config.crossing_line_y,
            trajectory_capacity: config.trajectory_capacity.max(1),
            tracks: HashMap::new(),
            stats: SessionStatistics::default(),
        })
    }

    pub fn statistics(&self) -> &SessionStatistics {
        &self.stats
    }

    pub fn track(&self, track_id: i64) -> Option<&TrackState> {
        self.tracks.get(&track_id)
    }

    pub fn tracked_len(&self) -> usize {
        self.tracks.len()
    }

    /// Forget every track and zero the counters.
    pub fn reset_statistics(&mut self) {
        self.tracks.clear();
        self.stats = SessionStatistics::default();
    }

    /// Apply one frame worth of observations. Returns the key each
    /// observation was accounted under, in input order.
    pub fn update(
        &mut self,
        observations: &[TrackObservation],
        frame_height: u32,
        now: Instant,
    ) -> Vec<TrackKey> {
        let line_y = self
            .crossing_line_y
            .unwrap_or((frame_height / 2) as f32);
        let mut keys = Vec::with_capacity(observations.len());

        for (index, obs) in observations.iter().enumerate() {
            let Some(track_id) = obs.track_id else {
                // Counted on every appearance; see `TrackKey::Synthetic`.
                self.stats.record_first_seen(&obs.class_label);
                keys.push(TrackKey::Synthetic(index));
                continue;
            };
            keys.push(TrackKey::Tracked(track_id));

            let stats = &mut self.stats;
            let state = self.tracks.entry(track_id).or_insert_with(|| {
                stats.record_first_seen(&obs.class_label);
                debug!(track = track_id, class = %obs.class_label, "new track");
                TrackState {
                    class_label: obs.class_label.clone(),
                    ..TrackState::default()
                }
            });

            state.trajectory.push_back(obs.centroid);
            while state.trajectory.len() > self.trajectory_capacity {
                state.trajectory.pop_front();
            }

            if let Some(zone) = &self.hot_zone {
                let inside = self
                    .mapper
                    .project(obs.centroid)
                    .is_some_and(|p| point_in_polygon(zone, p.truncated()));
                if inside {
                    let entered = *state.hot_zone_entry.get_or_insert(now);
                    if now.saturating_duration_since(entered) > self.stay_threshold
                        && !state.is_long_stay
                    {
                        state.is_long_stay = true;
                        self.stats.long_stay_count += 1;
                        debug!(track = track_id, "long stay in hot zone");
                    }
                } else {
                    state.hot_zone_entry = None;
                }
            }

            if self.traffic_flow && !state.has_crossed {
                let len = state.trajectory.len();
                if len >= 2 {
                    let prev = state.trajectory[len - 2].y;
                    let curr = state.trajectory[len - 1].y;
                    // Inclusive on the destination side only.
                    let crossed = (prev < line_y && line_y <= curr) || (prev > line_y && line_y >= curr);
                    if crossed {
                        state.has_crossed = true;
                        self.stats.crossing_count += 1;
                        debug!(track = track_id, line = line_y, "line crossed");
                    }
                }
            }
        }

        keys
    }

    /// Draw boxes and trajectories onto `annotated` and return the bird's-eye
    /// rendering for the same observations.
    pub fn render(
        &self,
        observations: &[TrackObservation],
        keys: &[TrackKey],
        annotated: &mut RgbImage,
    ) -> RgbImage {
        let mut birdview = self.mapper.blank_canvas();

        for (obs, key) in observations.iter().zip(keys) {
            draw_box(annotated, obs.bbox, BOX_COLOR);
            let tag = match key {
                TrackKey::Tracked(id) => {
                    format!("{} {} {:.0}%", obs.class_label, id, obs.score * 100.0)
                }
                TrackKey::Synthetic(_) => format!("{} {:.0}%", obs.class_label, obs.score * 100.0),
            };
            let tag_y = (obs.bbox[1].round() as i32).saturating_sub(12).max(0);
            draw_tag(annotated, obs.bbox[0].round() as i32, tag_y, &tag, 1, BOX_COLOR);

            let history: Vec<Point> = match key {
                TrackKey::Tracked(id) => self
                    .tracks
                    .get(id)
                    .map(|state| state.trajectory.iter().copied().collect())
                    .unwrap_or_default(),
                TrackKey::Synthetic(_) => vec![obs.centroid],
            };
            if history.is_empty() {
                continue;
            }

            let pixels: Vec<Point> = history.iter().map(|p| p.truncated()).collect();
            draw_polyline(annotated, &pixels, TRAJECTORY_THICKNESS, TRAJECTORY_COLOR);

            let projected: Vec<Point> = history
                .iter()
                .filter_map(|p| self.mapper.project(*p))
                .collect();
            for point in &projected {
                draw_dot(&mut birdview, *point, BIRDVIEW_POINT_RADIUS, BIRDVIEW_POINT_COLOR);
            }
            // Points near the vanishing line project far off the canvas.
            if let Some(latest) = history
                .last()
                .and_then(|p| self.mapper.project(*p))
                .filter(|p| drawable(*p))
            {
                let (x, y) = latest.to_pixel();
                draw_label(
                    &mut birdview,
                    x,
                    y.saturating_sub(10),
                    &format!("ID:{key}"),
                    2,
                    BIRDVIEW_LABEL_COLOR,
                );
            }
        }

        birdview
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn car(id: i64, x: f32, y: f32) -> TrackObservation {
        TrackObservation::new(Some(id), "car", Point::new(x, y))
    }

    fn zone_y_800_1000() -> Vec<Point> {
        vec![
            Point::new(0.0, 800.0),
            Point::new(500.0, 800.0),
            Point::new(500.0, 1000.0),
            Point::new(0.0, 1000.0),
        ]
    }

    fn engine(config: AnalyticsConfig) -> TrackAnalytics {
        TrackAnalytics::new(config).unwrap()
    }

    fn secs(t0: Instant, s: f64) -> Instant {
        t0 + Duration::from_secs_f64(s)
    }

    #[test]
    fn test_trajectory_is_bounded_fifo() {
        let mut analytics = engine(AnalyticsConfig::default());
        let t0 = Instant::now();
        for i in 0..40 {
            analytics.update(&[car(1, i as f32, 10.0)], 1000, t0);
        }
        let trajectory = &analytics.track(1).unwrap().trajectory;
        assert_eq!(trajectory.len(), DEFAULT_TRAJECTORY_CAPACITY);
        assert_eq!(trajectory.front().unwrap().x, 10.0);
        assert_eq!(trajectory.back().unwrap().x, 39.0);
    }

    #[test]
    fn test_first_seen_counts_once_per_track() {
        let mut analytics = engine(AnalyticsConfig::default());
        let t0 = Instant::now();
        for _ in 0..5 {
            analytics.update(
                &[
                    car(1, 10.0, 10.0),
                    TrackObservation::new(Some(2), "truck", Point::new(50.0, 10.0)),
                ],
                1000,
                t0,
            );
        }
        let stats = analytics.statistics();
        assert_eq!(stats.total_count, 2);
        assert_eq!(stats.category_count.get("car"), Some(&1));
        assert_eq!(stats.category_count.get("truck"), Some(&1));
    }

    #[test]
    fn test_dwell_flags_long_stay_once() {
        let mut analytics = engine(AnalyticsConfig {
            hot_zone: Some(zone_y_800_1000()),
            ..AnalyticsConfig::default()
        });
        let t0 = Instant::now();
        analytics.update(&[car(3, 200.0, 900.0)], 1000, t0);
        analytics.update(&[car(3, 200.0, 900.0)], 1000, secs(t0, 5.0));
        assert!(!analytics.track(3).unwrap().is_long_stay);

        analytics.update(&[car(3, 200.0, 900.0)], 1000, secs(t0, 5.01));
        assert!(analytics.track(3).unwrap().is_long_stay);
        assert_eq!(analytics.statistics().long_stay_count, 1);

        for s in 6..12 {
            analytics.update(&[car(3, 200.0, 900.0)], 1000, secs(t0, s as f64));
        }
        assert_eq!(analytics.statistics().long_stay_count, 1);
    }

    #[test]
    fn test_dwell_timer_resets_on_exit() {
        let mut analytics = engine(AnalyticsConfig {
            hot_zone: Some(zone_y_800_1000()),
            traffic_flow: false,
            ..AnalyticsConfig::default()
        });
        let t0 = Instant::now();
        analytics.update(&[car(4, 200.0, 900.0)], 1000, t0);
        analytics.update(&[car(4, 200.0, 700.0)], 1000, secs(t0, 3.0));
        assert!(analytics.track(4).unwrap().hot_zone_entry.is_none());

        analytics.update(&[car(4, 200.0, 900.0)], 1000, secs(t0, 4.0));
        analytics.update(&[car(4, 200.0, 900.0)], 1000, secs(t0, 8.0));
        assert_eq!(analytics.statistics().long_stay_count, 0);

        analytics.update(&[car(4, 200.0, 900.0)], 1000, secs(t0, 9.5));
        assert_eq!(analytics.statistics().long_stay_count, 1);
    }

    #[test]
    fn test_long_stay_survives_leaving_the_zone() {
        let mut analytics = engine(AnalyticsConfig {
            hot_zone: Some(zone_y_800_1000()),
            ..AnalyticsConfig::default()
        });
        let t0 = Instant::now();
        analytics.update(&[car(5, 200.0, 900.0)], 1000, t0);
        analytics.update(&[car(5, 200.0, 900.0)], 1000, secs(t0, 6.0));
        analytics.update(&[car(5, 200.0, 100.0)], 1000, secs(t0, 7.0));
        let state = analytics.track(5).unwrap();
        assert!(state.is_long_stay);
        assert!(state.hot_zone_entry.is_none());
        assert_eq!(analytics.statistics().long_stay_count, 1);
    }

    #[test]
    fn test_crossing_counts_first_transition_only() {
        let mut analytics = engine(AnalyticsConfig::default());
        let t0 = Instant::now();
        for y in [490.0, 510.0, 490.0, 510.0] {
            analytics.update(&[car(9, 100.0, y)], 1000, t0);
        }
        assert!(analytics.track(9).unwrap().has_crossed);
        assert_eq!(analytics.statistics().crossing_count, 1);
    }

    #[test]
    fn test_crossing_compares_only_latest_two_points() {
        let mut analytics = engine(AnalyticsConfig::default());
        let t0 = Instant::now();
        // Landing exactly on the line counts for a track arriving from above.
        analytics.update(&[car(1, 100.0, 490.0)], 1000, t0);
        analytics.update(&[car(1, 100.0, 500.0)], 1000, t0);
        // A track first observed on the line and moving away is never
        // counted: its previous point is not strictly on either side.
        analytics.update(&[car(2, 100.0, 500.0)], 1000, t0);
        analytics.update(&[car(2, 100.0, 520.0)], 1000, t0);
        // Nor is one that crossed and came back between two observations.
        analytics.update(&[car(3, 100.0, 480.0)], 1000, t0);
        analytics.update(&[car(3, 100.0, 495.0)], 1000, t0);

        assert!(analytics.track(1).unwrap().has_crossed);
        assert!(!analytics.track(2).unwrap().has_crossed);
        assert!(!analytics.track(3).unwrap().has_crossed);
        assert_eq!(analytics.statistics().crossing_count, 1);
    }

    #[test]
    fn test_traffic_flow_disabled_skips_crossings() {
        let mut analytics = engine(AnalyticsConfig {
            traffic_flow: false,
            ..AnalyticsConfig::default()
        });
        let t0 = Instant::now();
        analytics.update(&[car(1, 100.0, 100.0)], 1000, t0);
        analytics.update(&[car(1, 100.0, 900.0)], 1000, t0);
        assert_eq!(analytics.statistics().crossing_count, 0);
    }

    #[test]
    fn test_explicit_crossing_line_overrides_midline() {
        let mut analytics = engine(AnalyticsConfig {
            crossing_line_y: Some(200.0),
            ..AnalyticsConfig::default()
        });
        let t0 = Instant::now();
        analytics.update(&[car(1, 100.0, 150.0)], 1000, t0);
        analytics.update(&[car(1, 100.0, 250.0)], 1000, t0);
        assert_eq!(analytics.statistics().crossing_count, 1);
    }

    #[test]
    fn test_synthetic_ids_count_every_appearance_without_history() {
        let mut analytics = engine(AnalyticsConfig::default());
        let t0 = Instant::now();
        let untracked = [
            TrackObservation::new(None, "car", Point::new(10.0, 10.0)),
            TrackObservation::new(None, "bus", Point::new(20.0, 10.0)),
        ];
        let keys = analytics.update(&untracked, 1000, t0);
        assert_eq!(keys, vec![TrackKey::Synthetic(0), TrackKey::Synthetic(1)]);
        analytics.update(&untracked, 1000, t0);

        let stats = analytics.statistics();
        assert_eq!(stats.total_count, 4);
        assert_eq!(stats.category_count.get("car"), Some(&2));
        assert_eq!(analytics.tracked_len(), 0);
    }

    #[test]
    fn test_reset_clears_tracks_and_counters() {
        let mut analytics = engine(AnalyticsConfig::default());
        let t0 = Instant::now();
        analytics.update(&[car(1, 100.0, 100.0)], 1000, t0);
        analytics.update(&[car(1, 100.0, 900.0)], 1000, t0);
        analytics.reset_statistics();
        assert_eq!(analytics.statistics(), &SessionStatistics::default());
        assert!(analytics.track(1).is_none());

        analytics.update(&[car(1, 100.0, 100.0)], 1000, t0);
        assert_eq!(analytics.statistics().total_count, 1);
    }

    #[test]
    fn test_end_to_end_three_frame_scenario() {
        let mut analytics = engine(AnalyticsConfig {
            hot_zone: Some(zone_y_800_1000()),
            ..AnalyticsConfig::default()
        });
        let t0 = Instant::now();
        for (i, y) in [100.0, 400.0, 900.0].into_iter().enumerate() {
            analytics.update(&[car(7, 100.0, y)], 1000, secs(t0, i as f64 * 0.04));
        }

        let stats = analytics.statistics();
        assert_eq!(stats.total_count, 1);
        assert_eq!(stats.crossing_count, 1);
        assert_eq!(stats.long_stay_count, 0);
        assert_eq!(stats.category_count.get("car"), Some(&1));

        let state = analytics.track(7).unwrap();
        assert_eq!(state.trajectory.len(), 3);
        assert!(state.hot_zone_entry.is_some());
        assert!(!state.is_long_stay);
    }

    #[test]
    fn test_invalid_hot_zone_is_rejected() {
        let result = TrackAnalytics::new(AnalyticsConfig {
            hot_zone: Some(vec![Point::new(0.0, 0.0), Point::new(1.0, 1.0)]),
            ..AnalyticsConfig::default()
        });
        assert!(matches!(result, Err(AnalyticsError::InvalidGeometry(_))));
    }

    #[test]
    fn test_render_draws_trajectory_and_birdview_points() {
        let mut analytics = engine(AnalyticsConfig::default());
        let t0 = Instant::now();
        let mut obs = car(7, 250.0, 300.0);
        obs.bbox = [230.0, 280.0, 270.0, 320.0];
        let keys = analytics.update(std::slice::from_ref(&obs), 600, t0);

        let mut annotated = RgbImage::new(500, 600);
        let birdview = analytics.render(&[obs], &keys, &mut annotated);

        assert_eq!(annotated.get_pixel(250, 300).0, [230, 230, 230]);
        assert_eq!(annotated.get_pixel(230, 300).0, [0, 255, 0]);
        assert_eq!(birdview.get_pixel(250, 300).0, [0, 255, 0]);
        assert!(birdview.pixels().any(|p| p.0 == [255, 255, 0]));
    }

    #[test]
    fn test_render_survives_tracks_near_the_horizon() {
        let src_quad = vec![
            Point::new(220.0, 310.0),
            Point::new(420.0, 310.0),
            Point::new(40.0, 470.0),
            Point::new(620.0, 470.0),
        ];
        let mut analytics = engine(AnalyticsConfig::new(src_quad));
        // Sweep across the vanishing line so some points land at enormous
        // finite coordinates.
        let observations: Vec<TrackObservation> = std::iter::once(Point::new(330.0, 225.789_52))
            .chain((0..1200).map(|i| Point::new(330.0, 220.0 + i as f32 * 0.01)))
            .enumerate()
            .map(|(id, p)| car(id as i64, p.x, p.y))
            .collect();
        let keys = analytics.update(&observations, 480, Instant::now());

        let mut annotated = RgbImage::new(640, 480);
        let birdview = analytics.render(&observations, &keys, &mut annotated);
        assert_eq!(birdview.dimensions(), (500, 800));
        assert_eq!(analytics.statistics().total_count, 1201);
    }
}
