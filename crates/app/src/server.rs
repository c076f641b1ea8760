//! Actix Web transport over the session manager.
//!
//! Handlers stay thin: parse, call the manager (on the blocking pool when
//! the call may wait on I/O or a worker join), encode, respond.

use std::{fs, io, path::Path, sync::Arc};

use actix_web::{
    App, HttpResponse, HttpServer, guard,
    http::{StatusCode, header},
    middleware::DefaultHeaders,
    web,
};
use anyhow::{Context, Result};
use tracing::{error, info, warn};
use traffic_analytics::{AnalyticsError, SessionManager, StreamKind};

use crate::{
    config::ServerConfig,
    data::{
        ErrorResponse, FileListResponse, ReleaseResponse, SessionsResponse, SourceRequest,
        StartRequest, StartResponse, StatisticsResponse,
    },
    encoding::{encode_capture, encode_jpeg},
    telemetry,
};

/// Shared state backing HTTP handlers.
pub struct AppState {
    pub manager: Arc<SessionManager>,
    pub config: ServerConfig,
}

/// Run the HTTP service until it is asked to stop, then release every
/// session.
pub fn run(config: ServerConfig) -> Result<()> {
    let manager = Arc::new(SessionManager::new());
    let state = web::Data::new(AppState {
        manager: manager.clone(),
        config: config.clone(),
    });

    info!(
        "traffic monitor listening on http://{}:{} (videos: {})",
        config.bind,
        config.port,
        config.videos_dir.display()
    );
    let served = actix_web::rt::System::new().block_on(async move {
        HttpServer::new(move || {
            App::new()
                .app_data(state.clone())
                .wrap(cors_headers())
                .configure(routes)
        })
        .bind((config.bind.as_str(), config.port))?
        .run()
        .await
    });

    manager.shutdown();
    served.context("HTTP server error")
}

fn cors_headers() -> DefaultHeaders {
    DefaultHeaders::new()
        .add((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
        .add((header::ACCESS_CONTROL_ALLOW_HEADERS, "*"))
        .add((header::ACCESS_CONTROL_ALLOW_METHODS, "GET, POST, OPTIONS"))
        .add((header::ACCESS_CONTROL_EXPOSE_HEADERS, "Content-Type"))
}

/// Route table, shared with the handler tests.
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/start", web::post().to(start_route))
            .route(
                "/getRowFrame/{id}",
                web::get().to(|state: web::Data<AppState>, path: web::Path<u64>| {
                    frame_route(state, path, StreamKind::Raw)
                }),
            )
            .route(
                "/getProcessedFrame/{id}",
                web::get().to(|state: web::Data<AppState>, path: web::Path<u64>| {
                    frame_route(state, path, StreamKind::Processed)
                }),
            )
            .route(
                "/getBirdViewFrame/{id}",
                web::get().to(|state: web::Data<AppState>, path: web::Path<u64>| {
                    frame_route(state, path, StreamKind::BirdView)
                }),
            )
            .route("/getStatistics/{id}", web::post().to(statistics_route))
            .route("/getStatistics/{id}", web::get().to(statistics_route))
            .route("/release/{id}", web::get().to(release_route))
            .route("/sessions", web::get().to(sessions_route))
            .route("/fileList", web::get().to(file_list_route))
            .route("/getOneFrame", web::post().to(one_frame_route))
            .service(
                web::resource("/{tail:.*}")
                    .guard(guard::Options())
                    .to(preflight),
            ),
    )
    .route("/metrics", web::get().to(metrics_route));
}

fn error_json(status: StatusCode, message: impl Into<String>) -> HttpResponse {
    HttpResponse::build(status).json(ErrorResponse {
        error: message.into(),
    })
}

fn analytics_error(err: &AnalyticsError) -> HttpResponse {
    let status = match err {
        AnalyticsError::PipelineFault(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    };
    if status.is_server_error() {
        error!("request failed: {err}");
    }
    error_json(status, err.to_string())
}

fn jpeg(body: Vec<u8>) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("image/jpeg")
        .append_header((header::CACHE_CONTROL, "no-cache"))
        .body(body)
}

async fn preflight() -> HttpResponse {
    HttpResponse::NoContent().finish()
}

async fn start_route(state: web::Data<AppState>, body: web::Json<StartRequest>) -> HttpResponse {
    let config = match body.into_inner().into_session_config(&state.config) {
        Ok(config) => config,
        Err(err) => return analytics_error(&err),
    };
    let manager = state.manager.clone();
    match web::block(move || manager.create_session(config)).await {
        Ok(Ok(service_id)) => HttpResponse::Ok().json(StartResponse { service_id }),
        Ok(Err(err)) => {
            warn!("session not started: {err}");
            analytics_error(&err)
        }
        Err(err) => error_json(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

async fn frame_route(
    state: web::Data<AppState>,
    path: web::Path<u64>,
    stream: StreamKind,
) -> HttpResponse {
    let frame = match state.manager.get_frame(path.into_inner(), stream) {
        Ok(frame) => frame,
        Err(err) => return analytics_error(&err),
    };
    let quality = state.config.jpeg_quality;
    match web::block(move || encode_jpeg(&frame.image, quality)).await {
        Ok(Ok(body)) => jpeg(body),
        Ok(Err(err)) => error_json(StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}")),
        Err(err) => error_json(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

async fn statistics_route(state: web::Data<AppState>, path: web::Path<u64>) -> HttpResponse {
    match state.manager.get_statistics(path.into_inner()) {
        Ok(statistics) => HttpResponse::Ok().json(StatisticsResponse { statistics }),
        Err(err) => analytics_error(&err),
    }
}

async fn release_route(state: web::Data<AppState>, path: web::Path<u64>) -> HttpResponse {
    let session_id = path.into_inner();
    let manager = state.manager.clone();
    match web::block(move || manager.release_session(session_id)).await {
        Ok(Ok(())) => HttpResponse::Ok().json(ReleaseResponse { success: true }),
        Ok(Err(err)) => analytics_error(&err),
        Err(err) => error_json(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

async fn sessions_route(state: web::Data<AppState>) -> HttpResponse {
    match state.manager.list_sessions() {
        Ok(sessions) => HttpResponse::Ok().json(SessionsResponse { sessions }),
        Err(err) => analytics_error(&err),
    }
}

async fn file_list_route(state: web::Data<AppState>) -> HttpResponse {
    match list_video_files(&state.config.videos_dir) {
        Ok(file_list) => HttpResponse::Ok().json(FileListResponse { file_list }),
        Err(err) => error_json(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to read video files: {err}"),
        ),
    }
}

/// Regular files directly inside `dir`, sorted. Creates `dir` when missing.
pub fn list_video_files(dir: &Path) -> io::Result<Vec<String>> {
    fs::create_dir_all(dir)?;
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    files.sort();
    Ok(files)
}

async fn one_frame_route(state: web::Data<AppState>, body: web::Json<SourceRequest>) -> HttpResponse {
    let descriptor = match body.descriptor(&state.config.videos_dir) {
        Ok(descriptor) => descriptor,
        Err(err) => return analytics_error(&err),
    };
    let manager = state.manager.clone();
    let quality = state.config.jpeg_quality;
    let result = web::block(move || {
        manager
            .probe_frame(&descriptor)
            .map(|frame| encode_capture(&frame, quality))
    })
    .await;
    match result {
        Ok(Ok(Ok(body))) => jpeg(body),
        Ok(Ok(Err(err))) => error_json(StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}")),
        Ok(Err(err)) => analytics_error(&err),
        Err(err) => error_json(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

async fn metrics_route() -> HttpResponse {
    match telemetry::prometheus_handle() {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::ServiceUnavailable().finish(),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use actix_web::{body::to_bytes, test};

    use ml_core::{DetectAndTrack, DetectionBatch, FrameRef};
    use traffic_analytics::DetectorConfig;
    use video_ingest::{CaptureError, Frame, SourceDescriptor, VideoSource};

    use super::*;
    use crate::config::TelemetryOptions;

    fn state(videos_dir: PathBuf) -> web::Data<AppState> {
        state_with(SessionManager::new(), videos_dir)
    }

    fn state_with(manager: SessionManager, videos_dir: PathBuf) -> web::Data<AppState> {
        web::Data::new(AppState {
            manager: Arc::new(manager),
            config: ServerConfig {
                bind: "127.0.0.1".into(),
                port: 0,
                videos_dir,
                model_path: PathBuf::from("missing-model.jsonl"),
                jpeg_quality: 85,
                queue_capacity: 5,
                telemetry: TelemetryOptions::default(),
            },
        })
    }

    /// Endless grey 32x24 capture.
    struct GreySource;

    impl VideoSource for GreySource {
        fn read(&mut self) -> Result<Option<Frame>, CaptureError> {
            std::thread::sleep(std::time::Duration::from_millis(5));
            Ok(Some(Frame::from_bgr(vec![90; 32 * 24 * 3], 32, 24)))
        }

        fn describe(&self) -> String {
            "grey".into()
        }
    }

    fn no_detections(_: FrameRef<'_>) -> anyhow::Result<DetectionBatch> {
        Ok(DetectionBatch::default())
    }

    fn grey_manager() -> SessionManager {
        SessionManager::with_backends(
            |_: &SourceDescriptor| -> Result<Box<dyn VideoSource>, CaptureError> {
                Ok(Box::new(GreySource))
            },
            |_: &DetectorConfig| -> Result<Box<dyn DetectAndTrack>, AnalyticsError> {
                Ok(Box::new(no_detections))
            },
        )
    }

    #[actix_web::test]
    async fn test_started_session_serves_birdview_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with(grey_manager(), dir.path().to_path_buf());
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .configure(routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/start")
            .set_json(serde_json::json!({
                "cap_type": "camera",
                "cap_path": "0",
                "src_points": [{"x": 0, "y": 0}, {"x": 32, "y": 0}, {"x": 0, "y": 24}, {"x": 32, "y": 24}]
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
        let body = to_bytes(resp.into_body()).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let id = json["service_id"].as_u64().unwrap();

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while state.manager.get_frame(id, StreamKind::BirdView).is_err() {
            assert!(std::time::Instant::now() < deadline, "no frame produced");
            std::thread::sleep(std::time::Duration::from_millis(10));
        }

        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri(&format!("/api/getBirdViewFrame/{id}"))
                .to_request(),
        )
        .await;
        assert!(resp.status().is_success());
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "image/jpeg"
        );
        let body = to_bytes(resp.into_body()).await.unwrap();
        let decoded = image::load_from_memory(&body).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (500, 800));

        let resp = test::call_service(
            &app,
            test::TestRequest::get()
                .uri(&format!("/api/release/{id}"))
                .to_request(),
        )
        .await;
        assert!(resp.status().is_success());
    }

    #[actix_web::test]
    async fn test_unknown_session_is_a_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let app = test::init_service(
            App::new()
                .app_data(state(dir.path().to_path_buf()))
                .wrap(cors_headers())
                .configure(routes),
        )
        .await;

        for uri in [
            "/api/getRowFrame/7",
            "/api/getProcessedFrame/7",
            "/api/getBirdViewFrame/7",
            "/api/getStatistics/7",
            "/api/release/7",
        ] {
            let resp = test::call_service(&app, test::TestRequest::get().uri(uri).to_request()).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(
                resp.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
                "*"
            );
            let body = to_bytes(resp.into_body()).await.unwrap();
            let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
            assert_eq!(json["error"], "session 7 not found");
        }
    }

    #[actix_web::test]
    async fn test_start_with_unopenable_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        let app = test::init_service(
            App::new()
                .app_data(state(dir.path().to_path_buf()))
                .configure(routes),
        )
        .await;
        let req = test::TestRequest::post()
            .uri("/api/start")
            .set_json(serde_json::json!({
                "cap_type": "camera",
                "cap_path": "not-a-number",
                "src_points": [{"x": 0, "y": 0}, {"x": 1, "y": 0}, {"x": 0, "y": 1}, {"x": 1, "y": 1}]
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = test::call_service(
            &app,
            test::TestRequest::get().uri("/api/sessions").to_request(),
        )
        .await;
        let body = to_bytes(resp.into_body()).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["sessions"], serde_json::json!([]));
    }

    #[actix_web::test]
    async fn test_file_list_creates_directory_and_lists_files() {
        let dir = tempfile::tempdir().unwrap();
        let videos = dir.path().join("videos");
        let app = test::init_service(
            App::new()
                .app_data(state(videos.clone()))
                .configure(routes),
        )
        .await;

        let resp = test::call_service(
            &app,
            test::TestRequest::get().uri("/api/fileList").to_request(),
        )
        .await;
        assert!(resp.status().is_success());
        assert!(videos.is_dir());

        fs::write(videos.join("b.mp4"), b"").unwrap();
        fs::write(videos.join("a.mp4"), b"").unwrap();
        fs::create_dir(videos.join("nested")).unwrap();
        let resp = test::call_service(
            &app,
            test::TestRequest::get().uri("/api/fileList").to_request(),
        )
        .await;
        let body = to_bytes(resp.into_body()).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["file_list"], serde_json::json!(["a.mp4", "b.mp4"]));
    }

    #[actix_web::test]
    async fn test_one_frame_returns_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        image::RgbImage::from_pixel(32, 24, image::Rgb([200, 10, 10]))
            .save(dir.path().join("still.png"))
            .unwrap();
        let app = test::init_service(
            App::new()
                .app_data(state(dir.path().to_path_buf()))
                .configure(routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/getOneFrame")
            .set_json(serde_json::json!({"cap_type": "file", "cap_path": "still.png"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "image/jpeg"
        );
        let body = to_bytes(resp.into_body()).await.unwrap();
        assert_eq!(&body[..2], &[0xFF, 0xD8]);
    }
}
