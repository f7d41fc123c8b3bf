//! Check-in session routes

use std::sync::Arc;

use axum::{extract::State, Json};
use capture_session::SessionStatus;
use tracing::info;

use crate::{ApiError, AppState};

/// Current session status
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<SessionStatus> {
    Json(state.status.borrow().clone())
}

/// "Search again": restart the camera and polling loop
pub async fn reset(State(state): State<Arc<AppState>>) -> Result<Json<SessionStatus>, ApiError> {
    info!("Reset requested");
    state.session.lock().await.reset().await?;
    Ok(Json(state.status.borrow().clone()))
}

/// Stop polling and release the camera
pub async fn stop(State(state): State<Arc<AppState>>) -> Json<SessionStatus> {
    info!("Stop requested");
    state.session.lock().await.stop().await;
    Json(state.status.borrow().clone())
}
