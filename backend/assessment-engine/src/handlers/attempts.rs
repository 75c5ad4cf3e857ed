use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use super::error_response;
use crate::models::{AntiCheatSignals, SaveResponseRequest};
use crate::services::attempt_service::{InProgressQuery, StartSectionRequest};
use crate::services::AppState;

pub async fn start_section(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StartSectionRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    tracing::info!(
        "Starting section: student={}, section={}, attempt={:?}",
        req.student_id,
        req.section_id,
        req.attempt_id
    );

    let status = state
        .attempts
        .start_section(req)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(status)))
}

pub async fn next_question(
    State(state): State<Arc<AppState>>,
    Path((attempt_id, section_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let next = state
        .attempts
        .next_question(&attempt_id, &section_id)
        .await
        .map_err(error_response)?;
    Ok(Json(next))
}

/// Always answers with the save outcome; the status code mirrors `success`.
pub async fn submit_response(
    State(state): State<Arc<AppState>>,
    Path(attempt_id): Path<String>,
    Json(mut req): Json<SaveResponseRequest>,
) -> impl IntoResponse {
    req.attempt_id = attempt_id;
    let result = state.attempts.submit_response(req).await;
    let status = if result.save.success {
        StatusCode::OK
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    (status, Json(result))
}

pub async fn update_signals(
    State(state): State<Arc<AppState>>,
    Path((attempt_id, section_id)): Path<(String, String)>,
    Json(signals): Json<AntiCheatSignals>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let result = state
        .attempts
        .update_signals(&attempt_id, &section_id, signals)
        .await
        .map_err(error_response)?;
    Ok(Json(result))
}

pub async fn close_section(
    State(state): State<Arc<AppState>>,
    Path((attempt_id, section_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    tracing::info!(
        "Closing section on timer: attempt={}, section={}",
        attempt_id,
        section_id
    );
    let report = state
        .attempts
        .close_section(&attempt_id, &section_id)
        .await
        .map_err(error_response)?;
    Ok(Json(report))
}

pub async fn section_report(
    State(state): State<Arc<AppState>>,
    Path((attempt_id, section_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let report = state
        .attempts
        .section_report(&attempt_id, &section_id)
        .await
        .map_err(error_response)?;
    Ok(Json(report))
}

pub async fn complete_attempt(
    State(state): State<Arc<AppState>>,
    Path(attempt_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let summary = state
        .attempts
        .complete_attempt(&attempt_id)
        .await
        .map_err(error_response)?;
    Ok(Json(summary))
}

pub async fn abandon_attempt(
    State(state): State<Arc<AppState>>,
    Path(attempt_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    tracing::info!("Abandoning attempt: attempt={}", attempt_id);
    let summary = state
        .attempts
        .abandon_attempt(&attempt_id)
        .await
        .map_err(error_response)?;
    Ok(Json(summary))
}

pub async fn find_in_progress(
    State(state): State<Arc<AppState>>,
    Query(query): Query<InProgressQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let summary = state
        .attempts
        .find_in_progress(&query.student_id, query.grade_level)
        .await
        .map_err(error_response)?;
    Ok(Json(summary))
}
