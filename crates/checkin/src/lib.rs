//! Face Check-in Service
//!
//! Runs one capture session for the kiosk screen and exposes its status to
//! the UI over a small REST API.

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use camera_capture::ImageDirSource;
use capture_session::{CaptureController, LookupError, SessionError, SessionStatus};
use face_detector::OnnxFaceDetector;
use identity_lookup::{GalleryError, GalleryLookup, HttpLookupClient, LookupBackend};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

pub mod config;
mod routes;
pub mod session;

pub use crate::config::{CameraConfig, CheckinConfig, LoggingConfig, ServerConfig};
pub use session::SessionControl;

/// Service error types
#[derive(Error, Debug)]
pub enum CheckinError {
    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error(transparent)]
    Gallery(#[from] GalleryError),

    #[error("Logging setup failed: {0}")]
    Logging(String),

    #[error("Metrics setup failed: {0}")]
    Metrics(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error body returned by the API
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Metrics recorder not installed")]
    MetricsDisabled,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Session(SessionError::AlreadyRunning) => StatusCode::CONFLICT,
            ApiError::Session(SessionError::CameraUnavailable(_))
            | ApiError::Session(SessionError::ModelLoadFailure(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Session(SessionError::Config(_)) => StatusCode::BAD_REQUEST,
            ApiError::Session(SessionError::Terminated) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::MetricsDisabled => StatusCode::NOT_FOUND,
        };
        let body = json!({
            "status": "error",
            "message": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

/// Application state shared across handlers
pub struct AppState {
    /// The kiosk's capture session
    pub session: Mutex<Box<dyn SessionControl>>,
    /// Latest published session status
    pub status: watch::Receiver<SessionStatus>,
    /// Prometheus renderer, when a recorder is installed
    pub metrics: Option<PrometheusHandle>,
    /// Version string
    pub version: String,
    /// Start time
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(session: Box<dyn SessionControl>, metrics: Option<PrometheusHandle>) -> Self {
        let status = session.subscribe();
        Self {
            session: Mutex::new(session),
            status,
            metrics,
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: std::time::Instant::now(),
        }
    }
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub session_running: bool,
    pub phase: String,
}

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(health_handler))
        .route("/api/v1/checkin/status", get(routes::checkin::get_status))
        .route("/api/v1/checkin/reset", post(routes::checkin::reset))
        .route("/api/v1/checkin/stop", post(routes::checkin::stop))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check handler
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let (running, phase) = {
        let status = state.status.borrow();
        (status.running, status.phase.as_str().to_string())
    };

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        session_running: running,
        phase,
    })
}

/// Prometheus scrape endpoint
async fn metrics_handler(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let handle = state.metrics.as_ref().ok_or(ApiError::MetricsDisabled)?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    )
        .into_response())
}

/// Initialize logging
pub fn init_logging(config: &LoggingConfig) -> Result<(), CheckinError> {
    let level = Level::from_str(&config.level)
        .map_err(|_| CheckinError::Logging(format!("unknown level \"{}\"", config.level)))?;
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true);

    let result = if config.json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
    result.map_err(|e| CheckinError::Logging(e.to_string()))
}

/// Wire camera, detector and lookup backend into a capture session
pub async fn build_session(config: &CheckinConfig) -> Result<Box<dyn SessionControl>, CheckinError> {
    let source = ImageDirSource::new(config.camera.frames_dir.clone());
    let detector = OnnxFaceDetector::new(config.detector.clone());

    let session: Box<dyn SessionControl> = match config.lookup.backend {
        LookupBackend::Http => {
            let lookup = Arc::new(HttpLookupClient::new(&config.lookup)?);
            info!("Patient lookup at {}", lookup.url());
            Box::new(CaptureController::new(
                config.session_config(),
                source,
                detector,
                lookup,
            )?)
        }
        LookupBackend::Gallery => {
            if config.detector.embedding_model_path.is_none() {
                warn!("Gallery lookup without an embedding model; every submission will fail");
            }
            let lookup = Arc::new(GalleryLookup::from_config(&config.lookup).await?);
            info!(
                "Patient lookup against local gallery (threshold {})",
                config.lookup.match_threshold
            );
            Box::new(CaptureController::new(
                config.session_config(),
                source,
                detector,
                lookup,
            )?)
        }
    };
    Ok(session)
}

/// Run the service until Ctrl-C
pub async fn run(config: CheckinConfig) -> Result<(), CheckinError> {
    let metrics = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| CheckinError::Metrics(e.to_string()))?;

    let mut session = build_session(&config).await?;
    if let Err(e) = session.start().await {
        // Published on the status channel; the UI shows it and offers reset
        warn!("Capture session did not start: {}", e);
    }

    let state = Arc::new(AppState::new(session, Some(metrics)));
    let app = create_router(Arc::clone(&state));

    info!("Starting check-in API on {}", config.server.bind);
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.session.lock().await.stop().await;
    info!("Check-in service stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use camera_capture::{feed, FeedSource, FrameFeed, VideoFrame};
    use capture_session::{
        Detection, DetectorError, FaceDetector, IdentityLookup, LookupOutcome, SessionConfig,
        Submission,
    };
    use serde_json::Value;
    use tower::ServiceExt;

    struct NoFaceDetector;

    #[async_trait]
    impl FaceDetector for NoFaceDetector {
        fn is_ready(&self) -> bool {
            true
        }

        async fn load(&mut self) -> Result<(), DetectorError> {
            Ok(())
        }

        async fn detect(&mut self, _frame: &VideoFrame) -> Result<Option<Detection>, DetectorError> {
            Ok(None)
        }
    }

    struct NobodyLookup;

    #[async_trait]
    impl IdentityLookup for NobodyLookup {
        async fn identify(&self, _submission: &Submission) -> Result<LookupOutcome, LookupError> {
            Ok(LookupOutcome::NotFound)
        }
    }

    fn app_with(source: FeedSource, metrics: Option<PrometheusHandle>) -> Router {
        let controller = CaptureController::new(
            SessionConfig::default(),
            source,
            NoFaceDetector,
            Arc::new(NobodyLookup),
        )
        .unwrap();
        create_router(Arc::new(AppState::new(Box::new(controller), metrics)))
    }

    fn app() -> (Router, FrameFeed) {
        let (feed, source) = feed::channel();
        feed.push(VideoFrame::blank(640, 480));
        (app_with(source, None), feed)
    }

    async fn call(app: &Router, method: &str, uri: &str) -> (StatusCode, Value) {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _feed) = app();
        let (status, body) = call(&app, "GET", "/api/v1/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["session_running"], false);
        assert_eq!(body["phase"], "idle");
    }

    #[tokio::test]
    async fn test_reset_then_stop() {
        let (app, _feed) = app();

        let (status, body) = call(&app, "GET", "/api/v1/checkin/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["running"], false);

        let (status, body) = call(&app, "POST", "/api/v1/checkin/reset").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["running"], true);
        assert!(body.get("matched").is_none());

        let (status, body) = call(&app, "POST", "/api/v1/checkin/reset").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["running"], true);

        let (status, body) = call(&app, "POST", "/api/v1/checkin/stop").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["running"], false);

        let (status, _) = call(&app, "POST", "/api/v1/checkin/stop").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_camera_unavailable_is_reported() {
        let (_feed, mut source) = feed::channel();
        source.deny_access(true);
        let app = app_with(source, None);

        let (status, body) = call(&app, "POST", "/api/v1/checkin/reset").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "error");
        assert!(body["message"].as_str().unwrap().starts_with("Camera unavailable"));

        let (_, body) = call(&app, "GET", "/api/v1/checkin/status").await;
        assert!(body["fatal"].is_string());
        assert_eq!(body["running"], false);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let (app, _feed) = app();
        let (status, body) = call(&app, "GET", "/metrics").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], "error");

        let (_feed, source) = feed::channel();
        let recorder = PrometheusBuilder::new().build_recorder();
        let app = app_with(source, Some(recorder.handle()));
        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_build_session_selects_backend() {
        let config = CheckinConfig::default();
        let session = build_session(&config).await.unwrap();
        assert!(!session.subscribe().borrow().running);

        let mut gallery = CheckinConfig::default();
        gallery.lookup.backend = LookupBackend::Gallery;
        assert!(build_session(&gallery).await.is_ok());

        gallery.lookup.gallery_path = Some("/nonexistent/gallery.json".into());
        assert!(matches!(
            build_session(&gallery).await,
            Err(CheckinError::Gallery(_))
        ));
    }

    #[test]
    fn test_unknown_log_level() {
        let config = LoggingConfig {
            level: "loud".into(),
            json: false,
        };
        assert!(matches!(init_logging(&config), Err(CheckinError::Logging(_))));
    }
}
