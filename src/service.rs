//! Match service
//!
//! Entry point used by the event layer. Lookups are blocking (binary search
//! plus page faults on the mapped files), so they run on the blocking pool
//! behind a semaphore sized by `index.query_workers`. When the startup
//! self-test disabled the subsystem every call degrades to "no matches".

use crate::hasher::Availability;
use crate::index::{MatchResult, QueryEngine};
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Matches for one submitted image
#[derive(Debug, Clone, Serialize)]
pub struct ImageMatches {
    /// Perceptual hash, `None` if the image could not be hashed
    pub hash: Option<i64>,
    /// Oldest post first
    pub matches: Vec<MatchResult>,
}

pub struct MatchService {
    availability: Availability,
    engine: Arc<QueryEngine>,
    permits: Arc<Semaphore>,
    disabled_logged: AtomicBool,
}

impl MatchService {
    pub fn new(availability: Availability, engine: QueryEngine, query_workers: usize) -> Self {
        Self {
            availability,
            engine: Arc::new(engine),
            permits: Arc::new(Semaphore::new(query_workers.max(1))),
            disabled_logged: AtomicBool::new(false),
        }
    }

    pub fn availability(&self) -> &Availability {
        &self.availability
    }

    pub fn engine(&self) -> &Arc<QueryEngine> {
        &self.engine
    }

    pub fn is_enabled(&self) -> bool {
        self.availability.is_enabled()
    }

    /// Enabled and a generation is published
    pub fn is_ready(&self) -> bool {
        self.is_enabled() && self.engine.store().current().is_some()
    }

    fn check_enabled(&self) -> bool {
        if self.is_enabled() {
            return true;
        }
        if !self.disabled_logged.swap(true, Ordering::SeqCst) {
            tracing::warn!(
                reason = self.availability.reason().unwrap_or_default(),
                "image matching disabled, returning no matches"
            );
        }
        false
    }

    /// Every non-deleted record near `hash`, in no particular order
    pub async fn find_matches(&self, hash: i64) -> Vec<MatchResult> {
        if !self.check_enabled() {
            return Vec::new();
        }

        let Ok(_permit) = Arc::clone(&self.permits).acquire_owned().await else {
            return Vec::new();
        };

        let engine = Arc::clone(&self.engine);
        match tokio::task::spawn_blocking(move || engine.find_matches(hash)).await {
            Ok(results) => results,
            Err(e) => {
                tracing::error!(hash, error = %e, "match lookup task failed");
                Vec::new()
            }
        }
    }

    /// Hash the image at `path` and look it up, oldest post first
    pub async fn check_image(&self, path: &Path) -> ImageMatches {
        let empty = ImageMatches {
            hash: None,
            matches: Vec::new(),
        };

        if !self.check_enabled() {
            return empty;
        }
        let Some(hasher) = self.availability.hasher() else {
            return empty;
        };

        let hash = match hasher.hash_file(path).await {
            Ok(hash) => hash,
            Err(e) => {
                tracing::warn!(path = ?path, error = %e, "failed to hash image");
                return empty;
            }
        };

        let mut matches = self.find_matches(hash).await;
        matches.sort_by_key(|m| m.posted_at);
        tracing::debug!(hash, matches = matches.len(), "image checked");

        ImageMatches {
            hash: Some(hash),
            matches,
        }
    }
}
