//! Persisted refresh bookkeeping
//!
//! A tiny JSON record that survives restarts so an interrupted download is
//! detected and resumed. It is rewritten (tmp + rename) before and after
//! every network operation and never deleted.

use crate::refresh::error::RefreshResult;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Refresh progress as last recorded on disk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshState {
    /// Unix seconds of the last manifest check (0 = never)
    #[serde(default)]
    pub last_checked: i64,
    /// Dump URL seen at the last manifest check
    #[serde(default)]
    pub last_url: Option<String>,
    /// A download/build for `last_url` started but has not been published
    #[serde(default)]
    pub in_progress: bool,
}

impl RefreshState {
    /// Whether `interval_secs` have passed since the last manifest check
    pub fn check_due(&self, now: i64, interval_secs: u64) -> bool {
        now.saturating_sub(self.last_checked) >= interval_secs as i64
    }
}

/// Reads and atomically rewrites the state file
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the state, starting from defaults when the file is missing or
    /// unreadable
    pub fn load(&self) -> RefreshState {
        match fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!(
                    path = ?self.path,
                    error = %e,
                    "refresh state unreadable, starting fresh"
                );
                RefreshState::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => RefreshState::default(),
            Err(e) => {
                tracing::warn!(
                    path = ?self.path,
                    error = %e,
                    "failed to read refresh state, starting fresh"
                );
                RefreshState::default()
            }
        }
    }

    pub fn save(&self, state: &RefreshState) -> RefreshResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(serde_json::to_string_pretty(state)?.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_when_missing() {
        let dir = tempdir().unwrap();
        let file = StateFile::new(dir.path().join("refresh-state.json"));
        assert_eq!(file.load(), RefreshState::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let file = StateFile::new(dir.path().join("nested").join("refresh-state.json"));

        let state = RefreshState {
            last_checked: 1_700_000_000,
            last_url: Some("https://dumps.example/a.csv.gz".to_string()),
            in_progress: true,
        };
        file.save(&state).unwrap();

        assert_eq!(file.load(), state);
        assert!(!file.path().with_extension("json.tmp").exists());
    }

    #[test]
    fn test_corrupt_file_falls_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("refresh-state.json");
        fs::write(&path, "{not json").unwrap();
        assert_eq!(StateFile::new(path).load(), RefreshState::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("refresh-state.json");
        fs::write(&path, r#"{"last_checked": 5}"#).unwrap();

        let state = StateFile::new(path).load();
        assert_eq!(state.last_checked, 5);
        assert_eq!(state.last_url, None);
        assert!(!state.in_progress);
    }

    #[test]
    fn test_check_due() {
        let state = RefreshState {
            last_checked: 1000,
            ..Default::default()
        };
        assert!(!state.check_due(1000 + 3599, 3600));
        assert!(state.check_due(1000 + 3600, 3600));
        assert!(!RefreshState::default().check_due(1, 3600));
        assert!(RefreshState::default().check_due(10_000, 3600));
    }
}
