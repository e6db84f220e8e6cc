use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use validator::Validate;

use crate::{
    extractors::AppJson,
    models::{NavigateRequest, SelectAnswerRequest, StartAttemptRequest},
    services::{
        attempt_service::{AttemptError, AttemptService},
        exam_engine::EngineError,
        AppState,
    },
};

pub async fn start_attempt(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<StartAttemptRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    req.validate()
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    tracing::info!(
        "Starting attempt for user_id={}, exam_id={}",
        req.user_id,
        req.exam_id
    );

    let service = AttemptService::new(&state);
    match service.start_attempt(req).await {
        Ok(response) => Ok((StatusCode::CREATED, Json(response))),
        Err(e) => Err(error_response(e)),
    }
}

pub async fn get_attempt(
    State(state): State<Arc<AppState>>,
    Path(attempt_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let service = AttemptService::new(&state);
    match service.snapshot(&attempt_id).await {
        Ok(snapshot) => Ok((StatusCode::OK, Json(snapshot))),
        Err(e) => Err(error_response(e)),
    }
}

pub async fn select_answer(
    State(state): State<Arc<AppState>>,
    Path(attempt_id): Path<String>,
    AppJson(req): AppJson<SelectAnswerRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let service = AttemptService::new(&state);
    match service.select_answer(&attempt_id, &req).await {
        Ok(snapshot) => Ok((StatusCode::OK, Json(snapshot))),
        Err(e) => Err(error_response(e)),
    }
}

pub async fn navigate(
    State(state): State<Arc<AppState>>,
    Path(attempt_id): Path<String>,
    AppJson(req): AppJson<NavigateRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let service = AttemptService::new(&state);
    match service.navigate(&attempt_id, &req).await {
        Ok(snapshot) => Ok((StatusCode::OK, Json(snapshot))),
        Err(e) => Err(error_response(e)),
    }
}

pub async fn request_submit(
    State(state): State<Arc<AppState>>,
    Path(attempt_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let service = AttemptService::new(&state);
    match service.request_submit(&attempt_id).await {
        Ok(snapshot) => Ok((StatusCode::OK, Json(snapshot))),
        Err(e) => Err(error_response(e)),
    }
}

pub async fn cancel_submit(
    State(state): State<Arc<AppState>>,
    Path(attempt_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let service = AttemptService::new(&state);
    match service.cancel_submit(&attempt_id).await {
        Ok(snapshot) => Ok((StatusCode::OK, Json(snapshot))),
        Err(e) => Err(error_response(e)),
    }
}

pub async fn confirm_submit(
    State(state): State<Arc<AppState>>,
    Path(attempt_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    tracing::info!("Confirming submission for attempt: {}", attempt_id);

    let service = AttemptService::new(&state);
    match service.confirm_submit(&attempt_id).await {
        Ok(receipt) => Ok((StatusCode::OK, Json(receipt))),
        Err(e) => Err(error_response(e)),
    }
}

pub async fn get_result(
    State(state): State<Arc<AppState>>,
    Path(attempt_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let service = AttemptService::new(&state);
    match service.attempt_result(&attempt_id).await {
        Ok(record) => Ok((StatusCode::OK, Json(record))),
        Err(e) => Err(error_response(e)),
    }
}

fn error_response(error: AttemptError) -> (StatusCode, String) {
    let status = match &error {
        AttemptError::ExamNotFound(_) | AttemptError::AttemptNotFound(_) => StatusCode::NOT_FOUND,
        AttemptError::CooldownActive { .. } => StatusCode::TOO_MANY_REQUESTS,
        AttemptError::AttemptLimitReached => StatusCode::FORBIDDEN,
        AttemptError::ResultNotReady(_) => StatusCode::CONFLICT,
        AttemptError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        AttemptError::Engine(EngineError::SessionClosed) => StatusCode::CONFLICT,
        AttemptError::Engine(EngineError::InvalidSelection { .. }) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        AttemptError::Engine(EngineError::InvalidConfiguration(_))
        | AttemptError::InvalidExam(_)
        | AttemptError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!("Attempt operation failed: {:#}", error);
    } else {
        tracing::warn!("Attempt operation rejected: {}", error);
    }

    (status, error.to_string())
}
