//! Status Routes
//!
//! - GET /api/v1/status - Availability, current generation and refresh progress
//! - POST /api/v1/verify - Recompute checksums of the current generation

use axum::{extract::State, Json};
use std::sync::Arc;

use crate::api::dto::{StatusResponse, VerifyResponse};
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;

/// GET /api/v1/status
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let store = state.service.engine().store();

    let refresh = match &state.refresh {
        Some(manager) => Some(manager.status().await),
        None => None,
    };

    Json(StatusResponse {
        enabled: state.service.is_enabled(),
        disabled_reason: state.service.availability().reason().map(str::to_string),
        generation: store.manifest(),
        retired_generations: store.retired_count(),
        refresh,
    })
}

/// POST /api/v1/verify
///
/// Reads both arrays in full, so it runs on the blocking pool.
pub async fn verify(State(state): State<Arc<AppState>>) -> ApiResult<Json<VerifyResponse>> {
    let store = Arc::clone(state.service.engine().store());

    let manifest = tokio::task::spawn_blocking(move || {
        store.verify()?;
        store.manifest().ok_or(crate::index::IndexError::NoGeneration)
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))??;

    Ok(Json(VerifyResponse {
        status: "ok".to_string(),
        generation: manifest.generation,
        records: manifest.record_count,
    }))
}
