//! External-sort index builder
//!
//! Turns an unsorted dump of any size into two index-aligned arrays sorted
//! by hash, without ever holding the whole dataset in memory.
//!
//! ```text
//! dump.csv ──scan──▶ pairs.bin ──chunk+sort──▶ run-00000.bin ┐
//!                                              run-00001.bin ├─k-way merge─▶ hashes.bin
//!                                              ...           ┘               offsets.bin
//! ```
//!
//! Pair and run files hold fixed 16-byte little-endian `(hash, offset)`
//! entries. Output arrays hold 8-byte little-endian signed integers.

use crate::index::error::{IndexError, IndexResult};
use crate::index::record::hash_field;
use csv::{ByteRecord, ReaderBuilder};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Size of one serialized (hash, offset) pair
pub const PAIR_SIZE: usize = 16;

/// Default number of pairs sorted in memory per run (80 MB)
pub const DEFAULT_PAIRS_PER_RUN: usize = 5_000_000;

const IO_BUFFER: usize = 1024 * 1024;

/// A (hash, offset) pair; ordering is by hash, then by offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct IndexEntry {
    pub hash: i64,
    /// Byte offset of the record's line in the dump
    pub offset: i64,
}

impl IndexEntry {
    pub fn new(hash: i64, offset: i64) -> Self {
        Self { hash, offset }
    }

    pub fn to_bytes(&self) -> [u8; PAIR_SIZE] {
        let mut buf = [0u8; PAIR_SIZE];
        buf[0..8].copy_from_slice(&self.hash.to_le_bytes());
        buf[8..16].copy_from_slice(&self.offset.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; PAIR_SIZE]) -> Self {
        let mut hash = [0u8; 8];
        let mut offset = [0u8; 8];
        hash.copy_from_slice(&buf[0..8]);
        offset.copy_from_slice(&buf[8..16]);
        Self {
            hash: i64::from_le_bytes(hash),
            offset: i64::from_le_bytes(offset),
        }
    }
}

/// Outcome of a completed build
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildStats {
    /// Entries written to the output arrays
    pub records: u64,
    /// Dump lines skipped because the hash column was unusable
    pub skipped: u64,
    /// Number of sorted runs merged
    pub runs: usize,
    pub hash_crc32: u32,
    pub offset_crc32: u32,
}

/// Counts from the pair extraction stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractStats {
    pub pairs: u64,
    pub skipped: u64,
}

/// Counts and checksums from the merge stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub entries: u64,
    pub hash_crc32: u32,
    pub offset_crc32: u32,
}

/// Builds sorted (hash[], offset[]) arrays from a raw dump
#[derive(Debug, Clone)]
pub struct IndexBuilder {
    work_dir: PathBuf,
    pairs_per_run: usize,
}

impl IndexBuilder {
    /// Create a builder that keeps its intermediate files under `work_dir`
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            pairs_per_run: DEFAULT_PAIRS_PER_RUN,
        }
    }

    /// Set how many pairs are sorted in memory per run
    pub fn pairs_per_run(mut self, pairs: usize) -> Self {
        self.pairs_per_run = pairs.max(1);
        self
    }

    pub fn pairs_path(&self) -> PathBuf {
        self.work_dir.join("pairs.bin")
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.work_dir.join("runs")
    }

    /// Run all three stages.
    ///
    /// Intermediate files are always removed. On failure the outputs are
    /// removed too, so a caller never sees a half-written array.
    pub fn build(
        &self,
        dump: &Path,
        hashes_out: &Path,
        offsets_out: &Path,
    ) -> IndexResult<BuildStats> {
        let result = self.run_stages(dump, hashes_out, offsets_out);

        self.remove_work_files();
        if let Err(e) = &result {
            tracing::error!(
                error = %e,
                dump = ?dump,
                "index build failed, discarding partial output"
            );
            let _ = fs::remove_file(hashes_out);
            let _ = fs::remove_file(offsets_out);
        }

        result
    }

    fn run_stages(
        &self,
        dump: &Path,
        hashes_out: &Path,
        offsets_out: &Path,
    ) -> IndexResult<BuildStats> {
        fs::create_dir_all(&self.work_dir)?;

        let pairs = self.pairs_path();
        let extract = self.extract_pairs(dump, &pairs)?;
        tracing::debug!(
            pairs = extract.pairs,
            skipped = extract.skipped,
            "extracted hash/offset pairs"
        );

        let runs = self.form_runs(&pairs, &self.runs_dir())?;
        tracing::debug!(runs = runs.len(), "formed sorted runs");

        let merged = merge_runs(&runs, hashes_out, offsets_out)?;
        tracing::info!(
            records = merged.entries,
            skipped = extract.skipped,
            runs = runs.len(),
            "index built"
        );

        Ok(BuildStats {
            records: merged.entries,
            skipped: extract.skipped,
            runs: runs.len(),
            hash_crc32: merged.hash_crc32,
            offset_crc32: merged.offset_crc32,
        })
    }

    /// Stage A: scan the dump and write one pair per parseable record.
    ///
    /// The header line is skipped. Lines whose hash column is missing or
    /// not an integer are counted and skipped.
    pub fn extract_pairs(&self, dump: &Path, pairs_out: &Path) -> IndexResult<ExtractStats> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .buffer_capacity(IO_BUFFER)
            .from_reader(File::open(dump)?);
        let mut out = BufWriter::with_capacity(IO_BUFFER, File::create(pairs_out)?);

        let mut stats = ExtractStats::default();
        let mut record = ByteRecord::new();

        loop {
            match reader.read_byte_record(&mut record) {
                Ok(false) => break,
                Ok(true) => {
                    let offset = record.position().map(|p| p.byte());
                    match (hash_field(&record), offset) {
                        (Some(hash), Some(offset)) => {
                            out.write_all(&IndexEntry::new(hash, offset as i64).to_bytes())?;
                            stats.pairs += 1;
                        }
                        _ => stats.skipped += 1,
                    }
                }
                Err(e) if e.is_io_error() => return Err(e.into()),
                Err(e) => {
                    tracing::trace!(error = %e, "skipping malformed dump line");
                    stats.skipped += 1;
                }
            }
        }

        out.flush()?;
        Ok(stats)
    }

    /// Stage B: sort the pair file chunk by chunk into run files
    pub fn form_runs(&self, pairs: &Path, runs_dir: &Path) -> IndexResult<Vec<PathBuf>> {
        if runs_dir.exists() {
            fs::remove_dir_all(runs_dir)?;
        }
        fs::create_dir_all(runs_dir)?;

        let mut reader = BufReader::with_capacity(IO_BUFFER, File::open(pairs)?);
        let chunk_bytes = (self.pairs_per_run * PAIR_SIZE) as u64;
        let mut buf = Vec::with_capacity(chunk_bytes.min(64 * IO_BUFFER as u64) as usize);
        let mut runs = Vec::new();

        loop {
            buf.clear();
            let read = reader.by_ref().take(chunk_bytes).read_to_end(&mut buf)?;
            if read == 0 {
                break;
            }
            if read % PAIR_SIZE != 0 {
                return Err(IndexError::Corruption(format!(
                    "pair file ends with a partial entry ({} trailing bytes)",
                    read % PAIR_SIZE
                )));
            }

            let mut entries: Vec<IndexEntry> = buf
                .chunks_exact(PAIR_SIZE)
                .map(|c| {
                    let mut pair = [0u8; PAIR_SIZE];
                    pair.copy_from_slice(c);
                    IndexEntry::from_bytes(&pair)
                })
                .collect();
            entries.sort_unstable();

            let run_path = runs_dir.join(format!("run-{:05}.bin", runs.len()));
            let mut out = BufWriter::with_capacity(IO_BUFFER, File::create(&run_path)?);
            for entry in &entries {
                out.write_all(&entry.to_bytes())?;
            }
            out.flush()?;

            runs.push(run_path);
        }

        Ok(runs)
    }

    fn remove_work_files(&self) {
        let _ = fs::remove_file(self.pairs_path());
        let _ = fs::remove_dir_all(self.runs_dir());
    }
}

/// Sequential reader over one sorted run
struct RunCursor {
    reader: BufReader<File>,
}

impl RunCursor {
    fn open(path: &Path) -> IndexResult<Self> {
        Ok(Self {
            reader: BufReader::with_capacity(IO_BUFFER, File::open(path)?),
        })
    }

    fn next_entry(&mut self) -> IndexResult<Option<IndexEntry>> {
        let mut buf = [0u8; PAIR_SIZE];
        match self.reader.read_exact(&mut buf) {
            Ok(()) => Ok(Some(IndexEntry::from_bytes(&buf))),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Stage C: k-way merge of sorted runs into the two output arrays
pub fn merge_runs(
    runs: &[PathBuf],
    hashes_out: &Path,
    offsets_out: &Path,
) -> IndexResult<MergeStats> {
    let mut cursors = runs
        .iter()
        .map(|p| RunCursor::open(p))
        .collect::<IndexResult<Vec<_>>>()?;

    let mut heap = BinaryHeap::with_capacity(cursors.len());
    for (idx, cursor) in cursors.iter_mut().enumerate() {
        if let Some(entry) = cursor.next_entry()? {
            heap.push(Reverse((entry, idx)));
        }
    }

    let mut hashes = BufWriter::with_capacity(IO_BUFFER, File::create(hashes_out)?);
    let mut offsets = BufWriter::with_capacity(IO_BUFFER, File::create(offsets_out)?);
    let mut hash_crc = crc32fast::Hasher::new();
    let mut offset_crc = crc32fast::Hasher::new();
    let mut entries = 0u64;

    while let Some(Reverse((entry, idx))) = heap.pop() {
        let h = entry.hash.to_le_bytes();
        let o = entry.offset.to_le_bytes();
        hashes.write_all(&h)?;
        offsets.write_all(&o)?;
        hash_crc.update(&h);
        offset_crc.update(&o);
        entries += 1;

        if let Some(next) = cursors[idx].next_entry()? {
            heap.push(Reverse((next, idx)));
        }
    }

    hashes.into_inner().map_err(|e| e.into_error())?.sync_all()?;
    offsets.into_inner().map_err(|e| e.into_error())?.sync_all()?;

    Ok(MergeStats {
        entries,
        hash_crc32: hash_crc.finalize(),
        offset_crc32: offset_crc.finalize(),
    })
}
