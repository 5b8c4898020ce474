//! Data Transfer Objects
//!
//! Request and response types for the API endpoints.
//! These types are serialized/deserialized to/from JSON.

use crate::index::{GenerationManifest, MatchResult};
use crate::refresh::RefreshStatus;
use serde::{Deserialize, Serialize};

// ============================================
// MATCH DTOs
// ============================================

/// One matching post
#[derive(Debug, Serialize, Deserialize)]
pub struct MatchDto {
    pub site: String,
    pub id: i64,
    pub artist: String,
    /// Seconds since epoch
    pub posted_at: i64,
    pub distance: u32,
    pub exact: bool,
    /// Canonical post URL for known sites
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl From<MatchResult> for MatchDto {
    fn from(m: MatchResult) -> Self {
        Self {
            url: m.post_url(),
            exact: m.is_exact(),
            site: m.site.to_string(),
            id: m.id,
            artist: m.artist,
            posted_at: m.posted_at,
            distance: m.distance,
        }
    }
}

/// Matches for a hash or an image
#[derive(Debug, Serialize, Deserialize)]
pub struct MatchesResponse {
    /// Queried hash, absent when the image could not be hashed
    pub hash: Option<i64>,
    pub matches: Vec<MatchDto>,
}

/// Image check request
#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    /// Path of an image readable by the server
    pub path: String,
}

// ============================================
// STATUS DTOs
// ============================================

/// Subsystem status
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Matching is enabled (hasher self-test passed)
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disabled_reason: Option<String>,
    /// Currently published generation
    pub generation: Option<GenerationManifest>,
    /// Replaced generations still held by in-flight queries
    pub retired_generations: usize,
    /// Refresh manager status, absent when refresh is disabled
    pub refresh: Option<RefreshStatus>,
}

/// Refresh trigger response
#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    /// Status: "accepted"
    pub status: String,
}

/// Checksum verification response
#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    /// Status: "ok"
    pub status: String,
    pub generation: u64,
    pub records: u64,
}

// ============================================
// HEALTH DTOs
// ============================================

/// Full health status response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", "unhealthy"
    pub status: String,
    /// Matching status: "ok", "disabled"
    pub matching: String,
    /// Index status: "ok", "missing"
    pub index: String,
    /// Server uptime in seconds
    pub uptime_seconds: u64,
    /// Server version
    pub version: String,
}
