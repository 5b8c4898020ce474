//! Match Routes
//!
//! - GET /api/v1/matches/:hash - Records near a perceptual hash

use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;

use crate::api::dto::{MatchDto, MatchesResponse};
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;

/// GET /api/v1/matches/:hash
///
/// `hash` is the signed decimal form of the 64-bit hash. Results are
/// ordered by post time, oldest first. Returns an empty list when matching
/// is disabled or no index is published.
pub async fn find_matches(
    State(state): State<Arc<AppState>>,
    Path(hash): Path<String>,
) -> ApiResult<Json<MatchesResponse>> {
    let hash: i64 = hash
        .trim()
        .parse()
        .map_err(|_| ApiError::Validation(format!("'{}' is not a 64-bit signed integer", hash)))?;

    let mut matches = state.service.find_matches(hash).await;
    matches.sort_by_key(|m| m.posted_at);

    Ok(Json(MatchesResponse {
        hash: Some(hash),
        matches: matches.into_iter().map(MatchDto::from).collect(),
    }))
}
