//! Hash Index
//!
//! Builds and queries a sorted, memory-mapped index over the reference dump:
//!
//! - **variants**: every hash within Hamming distance 3 of a query
//! - **builder**: external sort of `(hash, offset)` pairs into two arrays
//! - **generation**: atomic publication of `(dump, hashes, offsets)` sets
//! - **query**: variant probing + record lookup for `find_matches`
//!
//! # Architecture
//!
//! ```text
//! query hash
//!     ↓
//! variants: 43,745 sorted candidates
//!     ↓
//! hashes.bin: binary search per candidate → index range
//!     ↓
//! offsets.bin: byte offset of each hit
//!     ↓
//! dump.csv: parse record at offset → MatchResult
//! ```

mod builder;
mod error;
mod generation;
mod query;
pub mod record;
pub mod variants;

pub use builder::{
    merge_runs, BuildStats, IndexBuilder, IndexEntry, DEFAULT_PAIRS_PER_RUN, PAIR_SIZE,
};
pub use error::{IndexError, IndexResult};
pub use generation::{
    Generation, GenerationManifest, GenerationStore, CURRENT_FILE, DUMP_FILE, HASHES_FILE,
    OFFSETS_FILE,
};
pub use query::{search, MatchResult, QueryEngine};
pub use record::{DumpRecord, Site};
pub use variants::{candidates, hamming_distance, MAX_FLIPS};
