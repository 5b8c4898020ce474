//! External perceptual hasher and availability gate
//!
//! Hash computation is delegated to an external program that takes an image
//! path and prints the 64-bit hash as a signed decimal integer. At startup
//! the program is run against a reference image; if it is missing or
//! produces anything but the expected hash, the whole matching subsystem is
//! disabled rather than risking wrong answers.

use crate::config::HasherConfig;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;

/// Hash of the bundled self-test image
pub const SELFTEST_HASH: i64 = -3722692567699475621;

#[derive(Error, Debug)]
pub enum HasherError {
    #[error("No hasher binary configured")]
    NotConfigured,

    #[error("Failed to run hasher: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Hasher exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("Hasher printed something that is not a hash: {0:?}")]
    InvalidOutput(String),

    #[error("Self-test hash mismatch: expected {expected}, got {actual}")]
    SelfTestMismatch { expected: i64, actual: i64 },
}

pub type HasherResult<T> = Result<T, HasherError>;

/// Runs the external hashing program
#[derive(Debug, Clone)]
pub struct ImageHasher {
    binary: PathBuf,
}

impl ImageHasher {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Perceptual hash of the image at `path`
    pub async fn hash_file(&self, path: &Path) -> HasherResult<i64> {
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };
        let output = Command::new(&self.binary)
            .arg(&path)
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(HasherError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .trim()
            .parse()
            .map_err(|_| HasherError::InvalidOutput(stdout.trim().to_string()))
    }

    /// Hash `image` and compare with `expected`
    pub async fn self_test(&self, image: &Path, expected: i64) -> HasherResult<()> {
        let actual = self.hash_file(image).await?;
        if actual != expected {
            return Err(HasherError::SelfTestMismatch { expected, actual });
        }
        Ok(())
    }
}

/// Outcome of the startup probe
#[derive(Debug, Clone)]
pub enum Availability {
    Enabled(ImageHasher),
    Disabled(String),
}

impl Availability {
    /// Check the configured hasher against the reference image.
    ///
    /// Anything short of a matching self-test hash disables matching,
    /// including a missing binary or reference image.
    pub async fn probe(config: &HasherConfig) -> Self {
        let Some(binary) = &config.binary else {
            return Availability::Disabled(HasherError::NotConfigured.to_string());
        };

        if !binary.is_file() {
            return Availability::Disabled(format!("hasher binary {:?} not found", binary));
        }

        let Some(image) = &config.selftest_image else {
            return Availability::Disabled("no self-test image configured".to_string());
        };
        if !image.is_file() {
            return Availability::Disabled(format!("self-test image {:?} not found", image));
        }

        let hasher = ImageHasher::new(binary);
        if let Err(e) = hasher.self_test(image, config.selftest_hash).await {
            return Availability::Disabled(e.to_string());
        }
        tracing::info!(binary = ?binary, "hasher self-test passed");

        Availability::Enabled(hasher)
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Availability::Enabled(_))
    }

    pub fn hasher(&self) -> Option<&ImageHasher> {
        match self {
            Availability::Enabled(hasher) => Some(hasher),
            Availability::Disabled(_) => None,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Availability::Enabled(_) => None,
            Availability::Disabled(reason) => Some(reason),
        }
    }
}
