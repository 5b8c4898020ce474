//! Image Check Routes
//!
//! - POST /api/v1/check - Hash an image on the server's filesystem and match it

use axum::{extract::State, Json};
use std::path::PathBuf;
use std::sync::Arc;

use crate::api::dto::{CheckRequest, MatchDto, MatchesResponse};
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;

/// POST /api/v1/check
pub async fn check_image(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CheckRequest>,
) -> ApiResult<Json<MatchesResponse>> {
    if request.path.trim().is_empty() {
        return Err(ApiError::Validation("path must not be empty".to_string()));
    }

    let path = PathBuf::from(&request.path);
    if !tokio::fs::try_exists(&path).await? {
        return Err(ApiError::NotFound(format!("image {:?}", path)));
    }

    let checked = state.service.check_image(&path).await;

    Ok(Json(MatchesResponse {
        hash: checked.hash,
        matches: checked.matches.into_iter().map(MatchDto::from).collect(),
    }))
}
