//! Dump record parsing
//!
//! The raw dump is a CSV file with a header line:
//!
//! ```text
//! site,id,artist,hash,posted_at,updated_at,sha256,deleted,content_url
//! ```
//!
//! Records are never held in memory as a whole. The builder only reads the
//! hash column; the query path re-parses a single record at a known byte
//! offset inside the mapped dump.

use crate::index::error::{IndexError, IndexResult};
use chrono::{DateTime, NaiveDateTime};
use csv::{ByteRecord, ReaderBuilder};
use serde::{Serialize, Serializer};
use std::fmt;

/// Column positions inside a dump record
pub mod columns {
    pub const SITE: usize = 0;
    pub const ID: usize = 1;
    pub const ARTIST: usize = 2;
    pub const HASH: usize = 3;
    pub const POSTED_AT: usize = 4;
    pub const DELETED: usize = 7;
}

/// Site a record was posted on
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Site {
    FurAffinity,
    E621,
    Weasyl,
    Twitter,
    /// Any site this build does not know about, carrying the raw name
    Unknown(String),
}

impl Site {
    /// Parse a site name (case-insensitive)
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "furaffinity" => Site::FurAffinity,
            "e621" => Site::E621,
            "weasyl" => Site::Weasyl,
            "twitter" => Site::Twitter,
            _ => Site::Unknown(name.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Site::FurAffinity => "furaffinity",
            Site::E621 => "e621",
            Site::Weasyl => "weasyl",
            Site::Twitter => "twitter",
            Site::Unknown(name) => name,
        }
    }

    /// Canonical URL of a post on this site, if the site is known
    pub fn post_url(&self, id: i64) -> Option<String> {
        match self {
            Site::FurAffinity => Some(format!("https://www.furaffinity.net/view/{}/", id)),
            Site::E621 => Some(format!("https://e621.net/posts/{}", id)),
            Site::Weasyl => Some(format!("https://www.weasyl.com/view/{}", id)),
            Site::Twitter => Some(format!("https://twitter.com/i/web/status/{}", id)),
            Site::Unknown(_) => None,
        }
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Site {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// One line of the raw dump
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpRecord {
    pub site: Site,
    /// Post id on the originating site
    pub id: i64,
    pub artist: String,
    /// Perceptual hash
    pub hash: i64,
    /// Seconds since the Unix epoch (0 when unknown)
    pub posted_at: i64,
    pub deleted: bool,
}

impl DumpRecord {
    /// Build a record from an already split CSV row
    pub fn from_byte_record(record: &ByteRecord) -> IndexResult<Self> {
        let field = |idx: usize, name: &str| {
            record
                .get(idx)
                .ok_or_else(|| IndexError::Corruption(format!("record has no {} column", name)))
        };

        let site = Site::parse(&String::from_utf8_lossy(field(columns::SITE, "site")?));
        let id = parse_i64(field(columns::ID, "id")?)
            .ok_or_else(|| IndexError::Corruption("record id is not an integer".into()))?;
        let artist = String::from_utf8_lossy(field(columns::ARTIST, "artist")?).into_owned();
        let hash = hash_field(record)
            .ok_or_else(|| IndexError::Corruption("record hash is not an integer".into()))?;

        let raw_posted_at = String::from_utf8_lossy(field(columns::POSTED_AT, "posted_at")?);
        let posted_at = parse_timestamp(&raw_posted_at).unwrap_or_else(|| {
            tracing::error!(value = %raw_posted_at, "unrecognized posted_at format");
            0
        });

        let deleted = record
            .get(columns::DELETED)
            .map(|v| v == b"true")
            .unwrap_or(false);

        Ok(Self {
            site,
            id,
            artist,
            hash,
            posted_at,
            deleted,
        })
    }

    /// Parse the record whose line starts at `offset` in `dump`
    pub fn read_at(dump: &[u8], offset: u64) -> IndexResult<Self> {
        let start = usize::try_from(offset)
            .ok()
            .filter(|&o| o < dump.len())
            .ok_or_else(|| {
                IndexError::Corruption(format!(
                    "offset {} outside dump of {} bytes",
                    offset,
                    dump.len()
                ))
            })?;

        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(&dump[start..]);

        let mut record = ByteRecord::new();
        if !reader.read_byte_record(&mut record)? {
            return Err(IndexError::Corruption(format!("no record at offset {}", offset)));
        }

        Self::from_byte_record(&record)
    }
}

/// Cheap partial parse: only the hash column
pub fn hash_field(record: &ByteRecord) -> Option<i64> {
    record.get(columns::HASH).and_then(parse_i64)
}

fn parse_i64(bytes: &[u8]) -> Option<i64> {
    std::str::from_utf8(bytes).ok()?.trim().parse().ok()
}

/// Parse a dump timestamp into seconds since the epoch (UTC)
///
/// Accepts RFC 3339 and `%Y-%m-%dT%H:%M:%S[.fff]Z`.
pub fn parse_timestamp(value: &str) -> Option<i64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.timestamp());
    }

    NaiveDateTime::parse_from_str(value.trim_end_matches('Z'), "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|dt| dt.and_utc().timestamp())
}
