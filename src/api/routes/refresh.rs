//! Refresh Routes
//!
//! - POST /api/v1/refresh - Check the dump manifest now

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::api::dto::RefreshResponse;
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;

/// POST /api/v1/refresh
///
/// Wakes the background refresh loop and returns immediately.
pub async fn trigger_refresh(
    State(state): State<Arc<AppState>>,
) -> ApiResult<(StatusCode, Json<RefreshResponse>)> {
    let manager = state
        .refresh
        .as_ref()
        .ok_or_else(|| ApiError::ServiceUnavailable("index refresh is disabled".to_string()))?;

    manager.trigger();
    tracing::info!("Manual index refresh requested");

    Ok((
        StatusCode::ACCEPTED,
        Json(RefreshResponse {
            status: "accepted".to_string(),
        }),
    ))
}
