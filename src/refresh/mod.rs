//! Index Refresh
//!
//! Background pipeline that keeps the published index generation current:
//!
//! - **state**: persisted `RefreshState` (last check, last URL, in-progress)
//! - **source**: manifest lookup and ranged dump GET behind `DumpSource`
//! - **download**: resumable download into `<data>/download/`
//! - **decompress**: streaming gzip inflate into the staging generation
//! - **manager**: the state machine and its background loop

mod decompress;
mod download;
mod error;
mod manager;
mod source;
mod state;

pub use decompress::{decompress, DEFAULT_BUFFER_BYTES};
pub use download::{download, DownloadStats};
pub use error::{RefreshError, RefreshResult};
pub use manager::{
    RefreshManager, RefreshOptions, RefreshPhase, RefreshStatus, TickOutcome, STATE_FILE,
};
pub use source::{DumpBody, DumpSource, HttpDumpSource, RangeOutcome};
pub use state::{RefreshState, StateFile};

#[cfg(test)]
pub(crate) mod testutil {
    use super::{DumpBody, DumpSource, RangeOutcome, RefreshError, RefreshResult};
    use async_trait::async_trait;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    pub fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    /// In-memory dump server honoring ranges, able to drop the connection
    /// at a chosen byte
    pub struct FakeSource {
        url: Mutex<String>,
        data: Mutex<Vec<u8>>,
        fail_at: Mutex<Option<usize>>,
        ignore_ranges: AtomicBool,
        fail_manifest: AtomicBool,
        manifest_calls: AtomicUsize,
    }

    impl FakeSource {
        pub const URL: &'static str = "https://dumps.example/dump-1.csv.gz";
        const CHUNK: usize = 1000;

        pub fn new(data: Vec<u8>) -> Self {
            Self {
                url: Mutex::new(Self::URL.to_string()),
                data: Mutex::new(data),
                fail_at: Mutex::new(None),
                ignore_ranges: AtomicBool::new(false),
                fail_manifest: AtomicBool::new(false),
                manifest_calls: AtomicUsize::new(0),
            }
        }

        pub fn set_dump(&self, url: &str, data: Vec<u8>) {
            *self.url.lock().unwrap() = url.to_string();
            *self.data.lock().unwrap() = data;
        }

        /// Fail the body once this absolute byte offset is reached
        pub fn fail_at(&self, offset: Option<usize>) {
            *self.fail_at.lock().unwrap() = offset;
        }

        pub fn ignore_ranges(&self, ignore: bool) {
            self.ignore_ranges.store(ignore, Ordering::SeqCst);
        }

        pub fn fail_manifest(&self, fail: bool) {
            self.fail_manifest.store(fail, Ordering::SeqCst);
        }

        pub fn manifest_calls(&self) -> usize {
            self.manifest_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DumpSource for FakeSource {
        async fn latest_dump_url(&self) -> RefreshResult<String> {
            self.manifest_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_manifest.load(Ordering::SeqCst) {
                return Err(RefreshError::Status { status: 503 });
            }
            Ok(self.url.lock().unwrap().clone())
        }

        async fn open_dump(&self, url: &str, offset: u64) -> RefreshResult<RangeOutcome> {
            if url != *self.url.lock().unwrap() {
                return Err(RefreshError::Status { status: 404 });
            }

            let data = self.data.lock().unwrap().clone();
            let fail_at = *self.fail_at.lock().unwrap();
            let body = |pos: usize| -> Box<dyn DumpBody> {
                Box::new(FakeBody {
                    data: data.clone(),
                    pos,
                    fail_at,
                })
            };

            let offset = offset as usize;
            if offset == 0 || self.ignore_ranges.load(Ordering::SeqCst) {
                Ok(RangeOutcome::Full(body(0)))
            } else if offset >= data.len() {
                Ok(RangeOutcome::AlreadyComplete)
            } else {
                Ok(RangeOutcome::Partial(body(offset)))
            }
        }
    }

    struct FakeBody {
        data: Vec<u8>,
        pos: usize,
        fail_at: Option<usize>,
    }

    #[async_trait]
    impl DumpBody for FakeBody {
        async fn next_chunk(&mut self) -> RefreshResult<Option<Vec<u8>>> {
            let mut end = (self.pos + FakeSource::CHUNK).min(self.data.len());
            if let Some(fail_at) = self.fail_at {
                if self.pos >= fail_at {
                    return Err(RefreshError::Timeout);
                }
                end = end.min(fail_at);
            }
            if self.pos >= end {
                return Ok(None);
            }

            let chunk = self.data[self.pos..end].to_vec();
            self.pos = end;
            Ok(Some(chunk))
        }
    }
}
