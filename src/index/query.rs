//! Match lookup against a published generation

use crate::index::error::IndexError;
use crate::index::generation::{Generation, GenerationStore};
use crate::index::record::{DumpRecord, Site};
use crate::index::variants::{candidates, hamming_distance, MAX_FLIPS};
use serde::Serialize;
use std::sync::Arc;

/// One dump record matching a query hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchResult {
    pub site: Site,
    pub artist: String,
    pub id: i64,
    /// Seconds since the epoch
    pub posted_at: i64,
    /// Hamming distance between the query and the record's hash
    pub distance: u32,
}

impl MatchResult {
    pub fn is_exact(&self) -> bool {
        self.distance == 0
    }

    pub fn post_url(&self) -> Option<String> {
        self.site.post_url(self.id)
    }
}

/// Find every non-deleted record within `max_flips` bits of `hash`.
///
/// Candidates are probed in ascending order, so each binary search starts
/// where the previous one ended. Records that cannot be parsed are logged
/// and skipped.
pub fn search(generation: &Generation, hash: i64, max_flips: u32) -> Vec<MatchResult> {
    let mut results = Vec::new();
    let mut from = 0;

    for candidate in candidates(hash, max_flips) {
        if from >= generation.len() {
            break;
        }

        let range = generation.equal_range(candidate, from);
        from = range.end.max(from);

        for idx in range {
            let offset = generation.offset_at(idx);
            let parsed = match u64::try_from(offset) {
                Ok(offset) => DumpRecord::read_at(generation.dump(), offset),
                Err(_) => Err(IndexError::Corruption(format!("negative offset {}", offset))),
            };
            let record = match parsed {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(offset, error = %e, "skipping unreadable dump record");
                    continue;
                }
            };

            if record.deleted {
                continue;
            }

            results.push(MatchResult {
                distance: hamming_distance(hash, record.hash),
                site: record.site,
                artist: record.artist,
                id: record.id,
                posted_at: record.posted_at,
            });
        }
    }

    results
}

/// Runs lookups against whatever generation is current at call time
pub struct QueryEngine {
    store: Arc<GenerationStore>,
    max_distance: u32,
}

impl QueryEngine {
    pub fn new(store: Arc<GenerationStore>, max_distance: u32) -> Self {
        Self {
            store,
            max_distance: max_distance.min(MAX_FLIPS),
        }
    }

    pub fn store(&self) -> &Arc<GenerationStore> {
        &self.store
    }

    pub fn max_distance(&self) -> u32 {
        self.max_distance
    }

    /// All matches for `hash` in the current generation.
    ///
    /// Returns an empty list (and logs a warning) when nothing has been
    /// published yet. The generation snapshot is held for the whole call,
    /// so a concurrent publish never affects a running query.
    pub fn find_matches(&self, hash: i64) -> Vec<MatchResult> {
        self.find_matches_within(hash, self.max_distance)
    }

    /// Like [`find_matches`](Self::find_matches) with an explicit radius
    pub fn find_matches_within(&self, hash: i64, max_distance: u32) -> Vec<MatchResult> {
        let Some(generation) = self.store.current() else {
            tracing::warn!(hash, "no index generation available, returning no matches");
            return Vec::new();
        };

        let results = search(&generation, hash, max_distance.min(MAX_FLIPS));
        tracing::debug!(
            hash,
            generation = generation.manifest().generation,
            matches = results.len(),
            "match lookup"
        );
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::testutil::{build_into_staging, dump_line, dump_line_at, POSTED_AT};
    use tempfile::tempdir;

    fn engine_with(lines: &[String]) -> (tempfile::TempDir, QueryEngine) {
        let dir = tempdir().unwrap();
        let store = Arc::new(GenerationStore::open(dir.path()).unwrap());
        let stats = build_into_staging(&store, lines);
        store
            .publish_staging(stats.records, stats.hash_crc32, stats.offset_crc32, None)
            .unwrap();
        (dir, QueryEngine::new(store, MAX_FLIPS))
    }

    #[test]
    fn test_radius_controls_near_matches() {
        let (_dir, engine) = engine_with(&[
            dump_line("e621", 1, "alice", 0b1010, false),
            dump_line("e621", 2, "bob", 0b1011, false),
        ]);

        let exact = engine.find_matches_within(0b1010, 0);
        assert_eq!(exact.len(), 1);
        assert_eq!(exact[0].id, 1);
        assert!(exact[0].is_exact());

        let mut near = engine.find_matches(0b1010);
        near.sort_by_key(|m| m.id);
        assert_eq!(near.len(), 2);
        assert_eq!(near[0].distance, 0);
        assert_eq!(near[1].distance, 1);
        assert_eq!(near[1].artist, "bob");
        assert_eq!(near[1].posted_at, POSTED_AT);
    }

    #[test]
    fn test_distance_limit() {
        let (_dir, engine) = engine_with(&[
            dump_line("e621", 1, "three", 0b0111, false),
            dump_line("e621", 2, "four", 0b1111, false),
        ]);

        let results = engine.find_matches(0);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].artist, "three");
        assert_eq!(results[0].distance, 3);
    }

    #[test]
    fn test_deleted_never_returned() {
        let (_dir, engine) = engine_with(&[
            dump_line("furaffinity", 1, "gone", 42, true),
            dump_line("furaffinity", 2, "kept", 42, false),
        ]);

        let results = engine.find_matches(42);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].artist, "kept");
        assert_eq!(results[0].site, Site::FurAffinity);
    }

    #[test]
    fn test_duplicates_all_returned() {
        let (_dir, engine) = engine_with(&[
            dump_line("e621", 1, "a", -7, false),
            dump_line("weasyl", 2, "b", -7, false),
            dump_line("twitter", 3, "c", -7, false),
        ]);

        let results = engine.find_matches(-7);
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|m| m.is_exact()));
    }

    #[test]
    fn test_extreme_hashes() {
        let (_dir, engine) = engine_with(&[
            dump_line("e621", 1, "min", i64::MIN, false),
            dump_line("e621", 2, "max", i64::MAX, false),
        ]);

        // i64::MIN is one bit away from 0
        let results = engine.find_matches(0);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].artist, "min");

        let results = engine.find_matches(i64::MAX);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].artist, "max");
    }

    #[test]
    fn test_bad_posted_at_still_matches() {
        let (_dir, engine) = engine_with(&[dump_line_at("e621", 1, "a", 5, "someday", false)]);
        let results = engine.find_matches(5);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].posted_at, 0);
    }

    #[test]
    fn test_no_generation_returns_empty() {
        let dir = tempdir().unwrap();
        let store = Arc::new(GenerationStore::open(dir.path()).unwrap());
        let engine = QueryEngine::new(store, 3);
        assert!(engine.find_matches(123).is_empty());
    }

    #[test]
    fn test_snapshot_survives_publish() {
        let (_dir, engine) = engine_with(&[dump_line("e621", 1, "old", 99, false)]);
        let snapshot = engine.store().current().unwrap();

        let stats = build_into_staging(engine.store(), &[dump_line("e621", 2, "new", 99, false)]);
        engine
            .store()
            .publish_staging(stats.records, stats.hash_crc32, stats.offset_crc32, None)
            .unwrap();

        // The held snapshot still answers from the old data
        let old = search(&snapshot, 99, 0);
        assert_eq!(old.len(), 1);
        assert_eq!(old[0].artist, "old");

        let new = engine.find_matches(99);
        assert_eq!(new.len(), 1);
        assert_eq!(new[0].artist, "new");
    }

    #[test]
    fn test_max_distance_clamped() {
        let dir = tempdir().unwrap();
        let store = Arc::new(GenerationStore::open(dir.path()).unwrap());
        assert_eq!(QueryEngine::new(store, 9).max_distance(), MAX_FLIPS);
    }
}
