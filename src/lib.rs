//! # Hashwatch
//!
//! Perceptual-hash matching engine: given the 64-bit perceptual hash of an
//! image, find every post in a large reference dump whose hash lies within a
//! small Hamming distance.
//!
//! ## Features
//!
//! - **Variant generation**: every hash within distance 3, in sorted order
//! - **External-sort index build**: sorted hash/offset arrays from a CSV dump
//!   without holding it in memory
//! - **Memory-mapped queries**: binary search over the published generation
//! - **Crash-safe refresh**: resumable download, decompress, build and atomic
//!   publish in the background
//! - **Availability gate**: matching is disabled when the hasher self-test fails
//!
//! ## Modules
//!
//! - [`index`]: Variant generator, index builder, generations and queries
//! - [`refresh`]: Background refresh state machine
//! - [`hasher`]: External hasher and startup self-test
//! - [`service`]: Match service used by the API
//! - [`api`]: REST API server with Axum
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hashwatch::index::{GenerationStore, QueryEngine};
//! use std::sync::Arc;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(GenerationStore::open("/var/lib/hashwatch")?);
//!     let engine = QueryEngine::new(store, 3);
//!
//!     for m in engine.find_matches(-3722692567699475621) {
//!         println!("{} {} by {} (distance {})", m.site, m.id, m.artist, m.distance);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod hasher;
pub mod index;
pub mod refresh;
pub mod service;

pub use api::{build_router, serve, AppState};

pub use config::{Config, ConfigError};

pub use hasher::{Availability, HasherError, ImageHasher};

pub use index::{
    candidates, hamming_distance, Generation, GenerationManifest, GenerationStore, IndexBuilder,
    IndexError, IndexResult, MatchResult, QueryEngine, Site,
};

pub use refresh::{HttpDumpSource, RefreshError, RefreshManager, RefreshOptions, RefreshPhase};

pub use service::{ImageMatches, MatchService};
