//! Index generations and their publication
//!
//! A generation is one mutually consistent `(dump.csv, hashes.bin,
//! offsets.bin)` file set living in its own directory. Which generation is
//! live is decided by a single small `CURRENT` manifest that is replaced
//! atomically, so the three data files never have to be renamed one by
//! one.
//!
//! Layout:
//! ```text
//! <root>/CURRENT                      JSON GenerationManifest
//! <root>/staging/                     generation being built
//! <root>/generations/gen-00000007/    dump.csv hashes.bin offsets.bin
//! ```
//!
//! Readers take an `Arc<Generation>` snapshot and keep using it for the
//! whole query. A replaced generation is only deleted from disk once the
//! last snapshot of it has been dropped.

use crate::index::error::{IndexError, IndexResult};
use arc_swap::ArcSwapOption;
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, Weak};

pub const CURRENT_FILE: &str = "CURRENT";
pub const DUMP_FILE: &str = "dump.csv";
pub const HASHES_FILE: &str = "hashes.bin";
pub const OFFSETS_FILE: &str = "offsets.bin";

const GENERATION_PREFIX: &str = "gen-";

/// Contents of the `CURRENT` pointer file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationManifest {
    /// Monotonic generation number
    pub generation: u64,
    /// Number of entries in each array
    pub record_count: u64,
    pub hash_crc32: u32,
    pub offset_crc32: u32,
    /// Unix seconds at publish time
    pub created_at: i64,
    /// Dump URL the generation was built from, if any
    #[serde(default)]
    pub source_url: Option<String>,
}

impl GenerationManifest {
    pub fn dir_name(&self) -> String {
        generation_dir_name(self.generation)
    }
}

fn generation_dir_name(generation: u64) -> String {
    format!("{}{:08}", GENERATION_PREFIX, generation)
}

fn parse_generation_dir(name: &str) -> Option<u64> {
    name.strip_prefix(GENERATION_PREFIX)?.parse().ok()
}

/// Read-only mapping of a file; empty files map to an empty slice
struct MappedFile {
    map: Option<Mmap>,
}

impl MappedFile {
    fn open(path: &Path) -> IndexResult<Self> {
        let file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Ok(Self { map: None });
        }
        // SAFETY: generation files are never written after publication;
        // they are only removed once no snapshot references them.
        let map = unsafe { Mmap::map(&file)? };
        Ok(Self { map: Some(map) })
    }

    fn bytes(&self) -> &[u8] {
        self.map.as_deref().unwrap_or(&[])
    }
}

/// One published, immutable index generation
pub struct Generation {
    manifest: GenerationManifest,
    dir: PathBuf,
    dump: MappedFile,
    hashes: MappedFile,
    offsets: MappedFile,
}

impl std::fmt::Debug for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generation")
            .field("manifest", &self.manifest)
            .field("dir", &self.dir)
            .finish()
    }
}

impl Generation {
    /// Map a generation directory and check it against its manifest
    pub fn open(dir: impl AsRef<Path>, manifest: GenerationManifest) -> IndexResult<Self> {
        let dir = dir.as_ref().to_path_buf();

        let dump = MappedFile::open(&dir.join(DUMP_FILE))?;
        let hashes = MappedFile::open(&dir.join(HASHES_FILE))?;
        let offsets = MappedFile::open(&dir.join(OFFSETS_FILE))?;

        let expected = manifest.record_count * 8;
        for (name, file) in [(HASHES_FILE, &hashes), (OFFSETS_FILE, &offsets)] {
            let actual = file.bytes().len() as u64;
            if actual != expected {
                return Err(IndexError::Corruption(format!(
                    "{} is {} bytes, manifest expects {}",
                    name, actual, expected
                )));
            }
        }

        Ok(Self {
            manifest,
            dir,
            dump,
            hashes,
            offsets,
        })
    }

    pub fn manifest(&self) -> &GenerationManifest {
        &self.manifest
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of index entries
    pub fn len(&self) -> usize {
        self.hashes.bytes().len() / 8
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw dump bytes
    pub fn dump(&self) -> &[u8] {
        self.dump.bytes()
    }

    pub fn hash_at(&self, idx: usize) -> i64 {
        read_i64(self.hashes.bytes(), idx)
    }

    pub fn offset_at(&self, idx: usize) -> i64 {
        read_i64(self.offsets.bytes(), idx)
    }

    /// First index in `within` whose hash is `>= value`
    pub fn lower_bound(&self, value: i64, within: Range<usize>) -> usize {
        let (mut lo, mut hi) = (within.start, within.end);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.hash_at(mid) < value {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// First index in `within` whose hash is `> value`
    pub fn upper_bound(&self, value: i64, within: Range<usize>) -> usize {
        let (mut lo, mut hi) = (within.start, within.end);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.hash_at(mid) <= value {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Index range holding exactly `value`, searching from `from` onwards
    pub fn equal_range(&self, value: i64, from: usize) -> Range<usize> {
        let len = self.len();
        let start = self.lower_bound(value, from.min(len)..len);
        let end = self.upper_bound(value, start..len);
        start..end
    }

    /// Recompute both array checksums and compare with the manifest
    pub fn verify(&self) -> IndexResult<()> {
        let hash_crc = crc32fast::hash(self.hashes.bytes());
        let offset_crc = crc32fast::hash(self.offsets.bytes());

        if hash_crc != self.manifest.hash_crc32 {
            return Err(IndexError::Corruption(format!(
                "{} checksum mismatch: stored={}, computed={}",
                HASHES_FILE, self.manifest.hash_crc32, hash_crc
            )));
        }
        if offset_crc != self.manifest.offset_crc32 {
            return Err(IndexError::Corruption(format!(
                "{} checksum mismatch: stored={}, computed={}",
                OFFSETS_FILE, self.manifest.offset_crc32, offset_crc
            )));
        }
        Ok(())
    }
}

fn read_i64(bytes: &[u8], idx: usize) -> i64 {
    let start = idx * 8;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[start..start + 8]);
    i64::from_le_bytes(buf)
}

/// Owns the on-disk generations and the currently published snapshot
pub struct GenerationStore {
    root: PathBuf,
    current: ArcSwapOption<Generation>,
    /// Replaced generations waiting for their last reader
    retired: Mutex<Vec<(PathBuf, Weak<Generation>)>>,
}

impl GenerationStore {
    /// Open (or initialize) a store rooted at `root`.
    ///
    /// A missing or inconsistent `CURRENT` leaves the store without a
    /// generation rather than failing. Generation directories that are not
    /// current are leftovers of an interrupted publish and are removed.
    pub fn open(root: impl Into<PathBuf>) -> IndexResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("generations"))?;

        let store = Self {
            root,
            current: ArcSwapOption::empty(),
            retired: Mutex::new(Vec::new()),
        };

        match store.load_current() {
            Ok(Some(generation)) => {
                tracing::info!(
                    generation = generation.manifest.generation,
                    records = generation.manifest.record_count,
                    "loaded index generation"
                );
                store.current.store(Some(Arc::new(generation)));
            }
            Ok(None) => tracing::info!("no index generation published yet"),
            Err(e) => tracing::warn!(error = %e, "ignoring unusable index generation"),
        }

        let listed = store.read_manifest().ok().flatten().map(|m| m.dir_name());
        store.remove_orphans(listed.as_deref())?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn generations_dir(&self) -> PathBuf {
        self.root.join("generations")
    }

    /// Directory a new generation is assembled in before publication
    pub fn staging_dir(&self) -> PathBuf {
        self.root.join("staging")
    }

    fn current_path(&self) -> PathBuf {
        self.root.join(CURRENT_FILE)
    }

    /// Snapshot of the published generation
    pub fn current(&self) -> Option<Arc<Generation>> {
        self.current.load_full()
    }

    pub fn manifest(&self) -> Option<GenerationManifest> {
        self.current().map(|g| g.manifest.clone())
    }

    /// Start a fresh, empty staging directory
    pub fn reset_staging(&self) -> IndexResult<PathBuf> {
        let staging = self.staging_dir();
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging)?;
        Ok(staging)
    }

    fn read_manifest(&self) -> IndexResult<Option<GenerationManifest>> {
        let path = self.current_path();
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)?;
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| IndexError::InvalidManifest(e.to_string()))
    }

    fn load_current(&self) -> IndexResult<Option<Generation>> {
        let Some(manifest) = self.read_manifest()? else {
            return Ok(None);
        };

        let dir = self.generations_dir().join(manifest.dir_name());
        if !dir.is_dir() {
            return Err(IndexError::InvalidManifest(format!(
                "generation directory {:?} is missing",
                dir
            )));
        }

        Generation::open(dir, manifest).map(Some)
    }

    /// Remove generation directories other than the one `CURRENT` names.
    ///
    /// An unusable but listed generation is left in place for inspection.
    fn remove_orphans(&self, keep: Option<&str>) -> IndexResult<()> {
        for entry in fs::read_dir(self.generations_dir())? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if parse_generation_dir(&name).is_none() || Some(name.as_str()) == keep {
                continue;
            }
            tracing::info!(dir = %name, "removing unpublished index generation");
            fs::remove_dir_all(entry.path())?;
        }

        Ok(())
    }

    fn next_generation(&self) -> IndexResult<u64> {
        let mut highest = self.manifest().map(|m| m.generation).unwrap_or(0);
        for entry in fs::read_dir(self.generations_dir())? {
            if let Some(n) = parse_generation_dir(&entry?.file_name().to_string_lossy()) {
                highest = highest.max(n);
            }
        }
        Ok(highest + 1)
    }

    /// Promote the staging directory to the live generation.
    ///
    /// The staging directory becomes `generations/gen-N` and `CURRENT` is
    /// then replaced in a single rename. Until that rename succeeds the
    /// previous generation stays current, both on disk and in memory.
    pub fn publish_staging(
        &self,
        record_count: u64,
        hash_crc32: u32,
        offset_crc32: u32,
        source_url: Option<String>,
    ) -> IndexResult<Arc<Generation>> {
        let staging = self.staging_dir();
        for name in [DUMP_FILE, HASHES_FILE, OFFSETS_FILE] {
            if !staging.join(name).is_file() {
                return Err(IndexError::Corruption(format!(
                    "staging directory is missing {}",
                    name
                )));
            }
        }

        let manifest = GenerationManifest {
            generation: self.next_generation()?,
            record_count,
            hash_crc32,
            offset_crc32,
            created_at: chrono::Utc::now().timestamp(),
            source_url,
        };

        let target = self.generations_dir().join(manifest.dir_name());
        fs::rename(&staging, &target)?;

        let generation = match Generation::open(&target, manifest.clone()) {
            Ok(generation) => Arc::new(generation),
            Err(e) => {
                let _ = fs::remove_dir_all(&target);
                return Err(e);
            }
        };

        self.write_manifest(&manifest)?;

        if let Some(previous) = self.current.swap(Some(Arc::clone(&generation))) {
            let dir = previous.dir.clone();
            self.retired
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((dir, Arc::downgrade(&previous)));
        }

        tracing::info!(
            generation = manifest.generation,
            records = manifest.record_count,
            "published index generation"
        );

        self.sweep_retired();
        Ok(generation)
    }

    fn write_manifest(&self, manifest: &GenerationManifest) -> IndexResult<()> {
        let tmp = self.root.join(format!("{}.tmp", CURRENT_FILE));
        {
            let mut file = File::create(&tmp)?;
            file.write_all(serde_json::to_string_pretty(manifest)?.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, self.current_path())?;
        Ok(())
    }

    /// Delete retired generations that no reader holds anymore.
    ///
    /// Returns how many were removed.
    pub fn sweep_retired(&self) -> usize {
        let mut retired = self.retired.lock().unwrap_or_else(PoisonError::into_inner);
        let mut removed = 0;

        retired.retain(|(dir, weak)| {
            if weak.strong_count() > 0 {
                return true;
            }
            match fs::remove_dir_all(dir) {
                Ok(()) => {
                    tracing::debug!(dir = ?dir, "removed retired index generation");
                    removed += 1;
                    false
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
                Err(e) => {
                    tracing::warn!(dir = ?dir, error = %e, "failed to remove retired generation");
                    true
                }
            }
        });

        removed
    }

    /// Number of replaced generations still waiting for readers to finish
    pub fn retired_count(&self) -> usize {
        self.retired.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Full checksum verification of the current generation
    pub fn verify(&self) -> IndexResult<()> {
        self.current().ok_or(IndexError::NoGeneration)?.verify()
    }
}
