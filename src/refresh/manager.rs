//! Refresh Manager
//!
//! Keeps the published index in step with the remote dump:
//!
//! ```text
//! Idle → CheckingManifest → Downloading → Decompressing → Building → Publishing → Idle
//! ```
//!
//! A single background task drives the state machine; at most one refresh
//! runs at a time. Every failure leaves `in_progress` set in the persisted
//! state, so the next tick resumes from the download, while the previously
//! published generation keeps serving queries.

use crate::index::{
    BuildStats, GenerationManifest, GenerationStore, IndexBuilder, DEFAULT_PAIRS_PER_RUN,
    DUMP_FILE, HASHES_FILE, OFFSETS_FILE,
};
use crate::refresh::decompress::{decompress, DEFAULT_BUFFER_BYTES};
use crate::refresh::download::{download, DownloadStats};
use crate::refresh::error::{RefreshError, RefreshResult};
use crate::refresh::source::DumpSource;
use crate::refresh::state::{RefreshState, StateFile};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;

pub const STATE_FILE: &str = "refresh-state.json";

/// Where the refresh pipeline currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshPhase {
    Idle,
    CheckingManifest,
    Downloading,
    Decompressing,
    Building,
    Publishing,
}

/// Tunables for the refresh loop
#[derive(Debug, Clone)]
pub struct RefreshOptions {
    /// Minimum time between manifest checks
    pub check_interval: Duration,
    /// How often the loop wakes up to see whether work is due
    pub poll_interval: Duration,
    pub decompress_buffer_bytes: usize,
    pub progress_interval: Duration,
    pub pairs_per_run: usize,
}

impl Default for RefreshOptions {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(3600),
            poll_interval: Duration::from_secs(60),
            decompress_buffer_bytes: DEFAULT_BUFFER_BYTES,
            progress_interval: Duration::from_secs(10),
            pairs_per_run: DEFAULT_PAIRS_PER_RUN,
        }
    }
}

/// What a single tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Manifest not due and nothing to resume
    Skipped,
    /// Manifest checked, same dump as before
    Unchanged,
    /// A new generation went live
    Published(GenerationManifest),
}

/// Point-in-time view of the refresh manager
#[derive(Debug, Clone, Serialize)]
pub struct RefreshStatus {
    pub phase: RefreshPhase,
    pub state: RefreshState,
    /// Error of the most recent failed tick, cleared on success
    pub last_error: Option<String>,
}

pub struct RefreshManager {
    source: Arc<dyn DumpSource>,
    store: Arc<GenerationStore>,
    state_file: StateFile,
    options: RefreshOptions,
    phase: RwLock<RefreshPhase>,
    last_error: RwLock<Option<String>>,
    running: Mutex<()>,
    force: AtomicBool,
    wake: Notify,
}

impl RefreshManager {
    pub fn new(
        source: Arc<dyn DumpSource>,
        store: Arc<GenerationStore>,
        options: RefreshOptions,
    ) -> Self {
        let state_file = StateFile::new(store.root().join(STATE_FILE));
        Self {
            source,
            store,
            state_file,
            options,
            phase: RwLock::new(RefreshPhase::Idle),
            last_error: RwLock::new(None),
            running: Mutex::new(()),
            force: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }

    pub fn store(&self) -> &Arc<GenerationStore> {
        &self.store
    }

    /// Compressed dump, partial while a download is in flight
    pub fn download_path(&self) -> PathBuf {
        self.store.root().join("download").join("dump.csv.gz")
    }

    fn work_dir(&self) -> PathBuf {
        self.store.root().join("work")
    }

    pub async fn phase(&self) -> RefreshPhase {
        *self.phase.read().await
    }

    async fn set_phase(&self, phase: RefreshPhase) {
        *self.phase.write().await = phase;
    }

    pub async fn status(&self) -> RefreshStatus {
        RefreshStatus {
            phase: self.phase().await,
            state: self.state_file.load(),
            last_error: self.last_error.read().await.clone(),
        }
    }

    /// Ask the background loop to check the manifest now
    pub fn trigger(&self) {
        self.force.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    /// Spawn the background refresh loop.
    ///
    /// The first tick runs immediately, so an interrupted refresh resumes at
    /// startup.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tracing::info!(
            check_interval_secs = self.options.check_interval.as_secs(),
            poll_interval_secs = self.options.poll_interval.as_secs(),
            "Starting index refresh loop"
        );

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.options.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = self.wake.notified() => {}
                }

                let force = self.force.swap(false, Ordering::SeqCst);
                match self.tick(force).await {
                    Ok(TickOutcome::Published(manifest)) => tracing::info!(
                        generation = manifest.generation,
                        records = manifest.record_count,
                        "Index refresh completed"
                    ),
                    Ok(outcome) => tracing::debug!(?outcome, "Refresh tick"),
                    Err(e) => tracing::error!(
                        error = %e,
                        transient = e.is_transient(),
                        "Index refresh failed, will retry"
                    ),
                }
            }
        })
    }

    /// Run one pass of the state machine.
    ///
    /// `force` checks the manifest even if the check interval has not
    /// elapsed.
    pub async fn tick(&self, force: bool) -> RefreshResult<TickOutcome> {
        let _guard = self.running.lock().await;
        self.store.sweep_retired();

        let result = self.tick_locked(force).await;
        self.set_phase(RefreshPhase::Idle).await;

        *self.last_error.write().await = result.as_ref().err().map(|e| e.to_string());
        result
    }

    async fn tick_locked(&self, force: bool) -> RefreshResult<TickOutcome> {
        let now = chrono::Utc::now().timestamp();
        let mut state = self.state_file.load();
        let interval = self.options.check_interval.as_secs();

        let checked = force || state.check_due(now, interval);
        if checked {
            match self.check_manifest(state.clone(), now).await {
                Ok(updated) => state = updated,
                // An unreachable manifest must not stall an interrupted refresh
                Err(e) if state.in_progress => {
                    tracing::warn!(
                        error = %e,
                        url = ?state.last_url,
                        "manifest check failed, resuming interrupted refresh"
                    );
                    state.last_checked = now;
                }
                Err(e) => return Err(e),
            }
        }

        if state.in_progress {
            let manifest = self.run_pipeline(state).await?;
            return Ok(TickOutcome::Published(manifest));
        }

        Ok(if checked {
            TickOutcome::Unchanged
        } else {
            TickOutcome::Skipped
        })
    }

    /// Resolve the latest dump URL and record it.
    ///
    /// The check time is persisted before the request, so a failing
    /// manifest endpoint is retried at the check interval. A new URL
    /// discards any partial download of the previous one and marks a
    /// refresh as in progress.
    pub async fn check_manifest(
        &self,
        mut state: RefreshState,
        now: i64,
    ) -> RefreshResult<RefreshState> {
        self.set_phase(RefreshPhase::CheckingManifest).await;

        state.last_checked = now;
        self.state_file.save(&state)?;

        let url = self.source.latest_dump_url().await?;

        if state.last_url.as_deref() != Some(url.as_str()) {
            tracing::info!(url = %url, previous = ?state.last_url, "new dump available");

            let partial = self.download_path();
            if partial.exists() {
                tokio::fs::remove_file(&partial).await?;
                tracing::info!("discarded partial download of previous dump");
            }

            state.last_url = Some(url);
            state.in_progress = true;
        }

        self.state_file.save(&state)?;
        Ok(state)
    }

    /// Download, decompress, build and publish the dump named in `state`
    pub async fn run_pipeline(&self, mut state: RefreshState) -> RefreshResult<GenerationManifest> {
        let url = state.last_url.clone().ok_or(RefreshError::NoManifestUrl)?;

        self.download_stage(&url).await?;
        self.decompress_stage().await?;
        let stats = self.build_stage().await?;
        let manifest = self.publish_stage(&stats, &url).await?;

        state.in_progress = false;
        self.state_file.save(&state)?;

        if let Err(e) = tokio::fs::remove_file(self.download_path()).await {
            tracing::warn!(error = %e, "failed to remove downloaded dump");
        }

        Ok(manifest)
    }

    pub async fn download_stage(&self, url: &str) -> RefreshResult<DownloadStats> {
        self.set_phase(RefreshPhase::Downloading).await;
        download(
            self.source.as_ref(),
            url,
            &self.download_path(),
            self.options.progress_interval,
        )
        .await
    }

    /// Inflate the download into a fresh staging directory
    pub async fn decompress_stage(&self) -> RefreshResult<u64> {
        self.set_phase(RefreshPhase::Decompressing).await;

        let staging = self.store.reset_staging()?;
        let src = self.download_path();
        let dest = staging.join(DUMP_FILE);
        let buffer = self.options.decompress_buffer_bytes;

        let result = tokio::task::spawn_blocking(move || decompress(&src, &dest, buffer)).await?;
        if let Err(RefreshError::Decompress(_)) = &result {
            // A corrupt archive will not get better by resuming it
            let _ = tokio::fs::remove_file(self.download_path()).await;
        }
        result
    }

    pub async fn build_stage(&self) -> RefreshResult<BuildStats> {
        self.set_phase(RefreshPhase::Building).await;

        let staging = self.store.staging_dir();
        let builder = IndexBuilder::new(self.work_dir()).pairs_per_run(self.options.pairs_per_run);

        let stats = tokio::task::spawn_blocking(move || {
            builder.build(
                &staging.join(DUMP_FILE),
                &staging.join(HASHES_FILE),
                &staging.join(OFFSETS_FILE),
            )
        })
        .await??;

        Ok(stats)
    }

    pub async fn publish_stage(
        &self,
        stats: &BuildStats,
        url: &str,
    ) -> RefreshResult<GenerationManifest> {
        self.set_phase(RefreshPhase::Publishing).await;

        let store = Arc::clone(&self.store);
        let (records, hash_crc, offset_crc) = (stats.records, stats.hash_crc32, stats.offset_crc32);
        let url = url.to_string();

        let generation = tokio::task::spawn_blocking(move || {
            store.publish_staging(records, hash_crc, offset_crc, Some(url))
        })
        .await??;

        Ok(generation.manifest().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::testutil::{dump_contents, dump_line};
    use crate::index::QueryEngine;
    use crate::refresh::testutil::{gzip, FakeSource};
    use tempfile::tempdir;

    fn dump_gz(lines: &[String]) -> Vec<u8> {
        gzip(dump_contents(lines).as_bytes())
    }

    fn manager(root: &std::path::Path, source: Arc<FakeSource>) -> RefreshManager {
        let store = Arc::new(GenerationStore::open(root).unwrap());
        let options = RefreshOptions {
            pairs_per_run: 2,
            decompress_buffer_bytes: 64,
            ..Default::default()
        };
        RefreshManager::new(source, store, options)
    }

    #[tokio::test]
    async fn test_first_tick_publishes() {
        let dir = tempdir().unwrap();
        let source = Arc::new(FakeSource::new(dump_gz(&[
            dump_line("e621", 1, "alice", 10, false),
            dump_line("e621", 2, "bob", 11, false),
            dump_line("e621", 3, "carol", 500, false),
        ])));
        let manager = manager(dir.path(), Arc::clone(&source));

        let outcome = manager.tick(false).await.unwrap();
        let TickOutcome::Published(manifest) = outcome.clone() else {
            panic!("expected a publish, got {:?}", outcome);
        };
        assert_eq!(manifest.generation, 1);
        assert_eq!(manifest.record_count, 3);
        assert_eq!(manifest.source_url.as_deref(), Some(FakeSource::URL));

        let status = manager.status().await;
        assert_eq!(status.phase, RefreshPhase::Idle);
        assert!(!status.state.in_progress);
        assert_eq!(status.state.last_url.as_deref(), Some(FakeSource::URL));
        assert!(status.last_error.is_none());
        assert!(!manager.download_path().exists());

        let engine = QueryEngine::new(Arc::clone(manager.store()), 3);
        assert_eq!(engine.find_matches(10).len(), 2);
    }

    #[tokio::test]
    async fn test_not_due_and_unchanged() {
        let dir = tempdir().unwrap();
        let source = Arc::new(FakeSource::new(dump_gz(&[dump_line("e621", 1, "a", 1, false)])));
        let manager = manager(dir.path(), Arc::clone(&source));

        manager.tick(false).await.unwrap();
        assert_eq!(manager.tick(false).await.unwrap(), TickOutcome::Skipped);
        assert_eq!(manager.tick(true).await.unwrap(), TickOutcome::Unchanged);
        assert_eq!(source.manifest_calls(), 2);
    }

    #[tokio::test]
    async fn test_manifest_failure_keeps_serving() {
        let dir = tempdir().unwrap();
        let source = Arc::new(FakeSource::new(dump_gz(&[dump_line("e621", 1, "a", 1, false)])));
        let manager = manager(dir.path(), Arc::clone(&source));
        manager.tick(false).await.unwrap();

        source.fail_manifest(true);
        assert!(manager.tick(true).await.is_err());
        assert!(manager.status().await.last_error.is_some());
        assert_eq!(manager.phase().await, RefreshPhase::Idle);
        assert_eq!(manager.store().current().unwrap().manifest().generation, 1);

        // The failed check still counts, so the next poll does not retry at once
        assert_eq!(manager.tick(false).await.unwrap(), TickOutcome::Skipped);
        assert_eq!(source.manifest_calls(), 2);
    }

    #[tokio::test]
    async fn test_manifest_outage_does_not_block_resume() {
        let dir = tempdir().unwrap();
        let lines: Vec<String> = (0..150)
            .map(|i| dump_line("e621", i, "artist", i * 5, false))
            .collect();
        let data = dump_gz(&lines);
        let source = Arc::new(FakeSource::new(data.clone()));
        let manager = manager(dir.path(), Arc::clone(&source));

        source.fail_at(Some(data.len() / 2));
        assert!(manager.tick(false).await.is_err());
        assert!(manager.status().await.state.in_progress);

        source.fail_at(None);
        source.fail_manifest(true);
        let outcome = manager.tick(true).await.unwrap();
        assert!(matches!(outcome, TickOutcome::Published(ref m) if m.record_count == 150));
        assert_eq!(
            manager.store().current().unwrap().manifest().source_url.as_deref(),
            Some(FakeSource::URL)
        );
        assert_eq!(source.manifest_calls(), 2);

        let status = manager.status().await;
        assert!(!status.state.in_progress);
        assert!(status.last_error.is_none());
        assert_eq!(manager.tick(false).await.unwrap(), TickOutcome::Skipped);
        assert_eq!(source.manifest_calls(), 2);
    }

    #[tokio::test]
    async fn test_interrupted_download_resumes_next_tick() {
        let dir = tempdir().unwrap();
        let lines: Vec<String> = (0..200)
            .map(|i| dump_line("weasyl", i, "artist", i * 3, false))
            .collect();
        let data = dump_gz(&lines);
        let source = Arc::new(FakeSource::new(data.clone()));
        let manager = manager(dir.path(), Arc::clone(&source));

        source.fail_at(Some(data.len() / 2));
        assert!(manager.tick(false).await.is_err());

        let state = manager.status().await.state;
        assert!(state.in_progress);
        assert!(manager.store().current().is_none());
        assert_eq!(
            std::fs::metadata(manager.download_path()).unwrap().len(),
            (data.len() / 2) as u64
        );

        source.fail_at(None);
        let outcome = manager.tick(false).await.unwrap();
        assert!(matches!(outcome, TickOutcome::Published(ref m) if m.record_count == 200));
        assert_eq!(source.manifest_calls(), 1);
    }

    #[tokio::test]
    async fn test_interrupted_before_publish_keeps_old_generation() {
        let dir = tempdir().unwrap();
        let source = Arc::new(FakeSource::new(dump_gz(&[
            dump_line("e621", 1, "old-artist", 77, false),
            dump_line("e621", 2, "other", 78, false),
        ])));

        let before = {
            let manager = manager(dir.path(), Arc::clone(&source));
            manager.tick(false).await.unwrap();
            let engine = QueryEngine::new(Arc::clone(manager.store()), 3);
            let mut results = engine.find_matches(77);
            results.sort_by_key(|m| m.id);

            // New dump appears; stop right after Building
            source.set_dump(
                "https://dumps.example/dump-2.csv.gz",
                dump_gz(&[dump_line("e621", 9, "new-artist", 77, false)]),
            );
            let state = manager
                .check_manifest(manager.status().await.state, chrono::Utc::now().timestamp())
                .await
                .unwrap();
            assert!(state.in_progress);
            manager.download_stage(state.last_url.as_deref().unwrap()).await.unwrap();
            manager.decompress_stage().await.unwrap();
            manager.build_stage().await.unwrap();

            let mut after = engine.find_matches(77);
            after.sort_by_key(|m| m.id);
            assert_eq!(after, results);
            results
        };

        // Restart: the old generation is still current and unchanged
        let manager = manager(dir.path(), Arc::clone(&source));
        let engine = QueryEngine::new(Arc::clone(manager.store()), 3);
        let mut results = engine.find_matches(77);
        results.sort_by_key(|m| m.id);
        assert_eq!(results, before);
        assert_eq!(manager.store().current().unwrap().manifest().generation, 1);

        // The next tick finishes the interrupted refresh
        let outcome = manager.tick(false).await.unwrap();
        assert!(matches!(outcome, TickOutcome::Published(ref m) if m.generation == 2));
        let results = engine.find_matches(77);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].artist, "new-artist");
    }

    #[tokio::test]
    async fn test_changed_url_discards_partial_download() {
        let dir = tempdir().unwrap();
        let lines: Vec<String> = (0..100).map(|i| dump_line("e621", i, "a", i, false)).collect();
        let first = dump_gz(&lines);
        let source = Arc::new(FakeSource::new(first.clone()));
        let manager = manager(dir.path(), Arc::clone(&source));

        source.fail_at(Some(first.len() / 3));
        assert!(manager.tick(false).await.is_err());
        assert!(manager.download_path().exists());

        let second = dump_gz(&[dump_line("twitter", 5, "b", 42, false)]);
        source.set_dump("https://dumps.example/dump-2.csv.gz", second);
        source.fail_at(None);

        let outcome = manager.tick(true).await.unwrap();
        assert!(matches!(outcome, TickOutcome::Published(ref m) if m.record_count == 1));
    }

    #[tokio::test]
    async fn test_corrupt_archive_is_refetched() {
        let dir = tempdir().unwrap();
        let source = Arc::new(FakeSource::new(b"definitely not gzip".to_vec()));
        let manager = manager(dir.path(), Arc::clone(&source));

        assert!(matches!(manager.tick(false).await, Err(RefreshError::Decompress(_))));
        assert!(!manager.download_path().exists());
        assert!(manager.status().await.state.in_progress);

        source.set_dump(FakeSource::URL, dump_gz(&[dump_line("e621", 1, "a", 3, false)]));
        assert!(matches!(manager.tick(false).await.unwrap(), TickOutcome::Published(_)));
    }

    #[tokio::test]
    async fn test_trigger_wakes_loop() {
        let dir = tempdir().unwrap();
        let source = Arc::new(FakeSource::new(dump_gz(&[dump_line("e621", 1, "a", 1, false)])));
        let store = Arc::new(GenerationStore::open(dir.path()).unwrap());
        let options = RefreshOptions {
            poll_interval: Duration::from_secs(3600),
            ..Default::default()
        };
        let manager = Arc::new(RefreshManager::new(source.clone(), Arc::clone(&store), options));

        let handle = Arc::clone(&manager).start();
        for _ in 0..200 {
            if store.current().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(store.current().is_some());
        assert_eq!(source.manifest_calls(), 1);

        manager.trigger();
        for _ in 0..200 {
            if source.manifest_calls() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(source.manifest_calls(), 2);
        handle.abort();
    }
}
