//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and `HASHWATCH_*` environment overrides.

use crate::index::{DEFAULT_PAIRS_PER_RUN, MAX_FLIPS};
use crate::refresh::{RefreshOptions, DEFAULT_BUFFER_BYTES};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub refresh: RefreshConfig,

    #[serde(default)]
    pub hasher: HasherConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where generations, downloads and refresh state live
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_data_dir() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("hashwatch").to_string_lossy().to_string())
        .unwrap_or_else(|| "./hashwatch_data".to_string())
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Index build and query tuning
#[derive(Debug, Clone, Deserialize)]
pub struct IndexConfig {
    /// Pairs sorted in memory per external-sort run
    #[serde(default = "default_pairs_per_run")]
    pub pairs_per_run: usize,

    /// Hamming radius searched per query (at most 3)
    #[serde(default = "default_max_distance")]
    pub max_distance: u32,

    /// Concurrent blocking lookups
    #[serde(default = "default_query_workers")]
    pub query_workers: usize,
}

fn default_pairs_per_run() -> usize {
    DEFAULT_PAIRS_PER_RUN
}

fn default_max_distance() -> u32 {
    MAX_FLIPS
}

fn default_query_workers() -> usize {
    8
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            pairs_per_run: default_pairs_per_run(),
            max_distance: default_max_distance(),
            query_workers: default_query_workers(),
        }
    }
}

impl IndexConfig {
    pub fn effective_max_distance(&self) -> u32 {
        self.max_distance.min(MAX_FLIPS)
    }
}

/// Background refresh of the reference dump
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshConfig {
    #[serde(default = "default_refresh_enabled")]
    pub enabled: bool,

    /// Endpoint whose body is the URL of the latest dump
    #[serde(default = "default_manifest_url")]
    pub manifest_url: String,

    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout while waiting for response data
    #[serde(default = "default_timeout")]
    pub read_timeout_secs: u64,

    #[serde(default = "default_decompress_buffer")]
    pub decompress_buffer_bytes: usize,

    #[serde(default = "default_progress_log")]
    pub progress_log_secs: u64,
}

fn default_refresh_enabled() -> bool {
    true
}

fn default_manifest_url() -> String {
    "https://api-next.fuzzysearch.net/v1/dump/latest".to_string()
}

fn default_check_interval() -> u64 {
    3600 // 1 hour
}

fn default_poll_interval() -> u64 {
    60
}

fn default_timeout() -> u64 {
    60
}

fn default_decompress_buffer() -> usize {
    DEFAULT_BUFFER_BYTES
}

fn default_progress_log() -> u64 {
    10
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            enabled: default_refresh_enabled(),
            manifest_url: default_manifest_url(),
            check_interval_secs: default_check_interval(),
            poll_interval_secs: default_poll_interval(),
            connect_timeout_secs: default_timeout(),
            read_timeout_secs: default_timeout(),
            decompress_buffer_bytes: default_decompress_buffer(),
            progress_log_secs: default_progress_log(),
        }
    }
}

/// External perceptual-hash program
#[derive(Debug, Clone, Deserialize)]
pub struct HasherConfig {
    /// Program printing the hash of the image passed as its only argument
    #[serde(default)]
    pub binary: Option<PathBuf>,

    /// Reference image hashed at startup; matching is disabled without it
    #[serde(default)]
    pub selftest_image: Option<PathBuf>,

    #[serde(default = "default_selftest_hash")]
    pub selftest_hash: i64,
}

fn default_selftest_hash() -> i64 {
    crate::hasher::SELFTEST_HASH
}

impl Default for HasherConfig {
    fn default() -> Self {
        Self {
            binary: None,
            selftest_image: None,
            selftest_hash: default_selftest_hash(),
        }
    }
}

/// API server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8090
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `pretty` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::parse(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("hashwatch").join("config.toml")),
            Some(PathBuf::from("/etc/hashwatch/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                match Self::load_with_env(path) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(data_dir) = std::env::var("HASHWATCH_DATA_DIR") {
            self.storage.data_dir = data_dir;
        }

        if let Ok(url) = std::env::var("HASHWATCH_MANIFEST_URL") {
            self.refresh.manifest_url = url;
        }
        if let Ok(enabled) = std::env::var("HASHWATCH_REFRESH_ENABLED") {
            if let Ok(e) = enabled.parse() {
                self.refresh.enabled = e;
            }
        }

        if let Ok(binary) = std::env::var("HASHWATCH_HASHER") {
            self.hasher.binary = Some(PathBuf::from(binary));
        }
        if let Ok(image) = std::env::var("HASHWATCH_SELFTEST_IMAGE") {
            self.hasher.selftest_image = Some(PathBuf::from(image));
        }

        if let Ok(host) = std::env::var("HASHWATCH_API_HOST") {
            self.api.host = host;
        }
        if let Ok(port) = std::env::var("HASHWATCH_API_PORT") {
            if let Ok(p) = port.parse() {
                self.api.port = p;
            }
        }

        if let Ok(level) = std::env::var("HASHWATCH_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("HASHWATCH_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Data directory with a leading `~` expanded
    pub fn data_dir(&self) -> PathBuf {
        expand_home(&self.storage.data_dir)
    }

    pub fn refresh_options(&self) -> RefreshOptions {
        RefreshOptions {
            check_interval: Duration::from_secs(self.refresh.check_interval_secs),
            poll_interval: Duration::from_secs(self.refresh.poll_interval_secs.max(1)),
            decompress_buffer_bytes: self.refresh.decompress_buffer_bytes,
            progress_interval: Duration::from_secs(self.refresh.progress_log_secs),
            pairs_per_run: self.index.pairs_per_run,
        }
    }
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Hashwatch Configuration
#
# Environment variables override these settings:
# - HASHWATCH_DATA_DIR
# - HASHWATCH_MANIFEST_URL
# - HASHWATCH_REFRESH_ENABLED
# - HASHWATCH_HASHER
# - HASHWATCH_SELFTEST_IMAGE
# - HASHWATCH_API_HOST
# - HASHWATCH_API_PORT
# - HASHWATCH_LOG_LEVEL
# - HASHWATCH_LOG_FORMAT

[storage]
# Generations, downloads and refresh state
data_dir = "~/.local/share/hashwatch"

[index]
# Pairs sorted in memory per run during index builds (16 bytes each)
pairs_per_run = 5000000

# Maximum Hamming distance for matches (0-3)
max_distance = 3

# Concurrent match lookups
query_workers = 8

[refresh]
# Keep the index in sync with the remote dump
enabled = true

# Endpoint returning the URL of the latest dump
manifest_url = "https://api-next.fuzzysearch.net/v1/dump/latest"

# Seconds between manifest checks
check_interval_secs = 3600

# Seconds between checks for due or interrupted work
poll_interval_secs = 60

# Network timeouts (seconds)
connect_timeout_secs = 60
read_timeout_secs = 60

# Read size while decompressing the dump (bytes)
decompress_buffer_bytes = 10485760

# Seconds between download progress log lines
progress_log_secs = 10

[hasher]
# Program that prints the perceptual hash of the image given as argument.
# Matching is disabled when unset or when the self-test fails.
# binary = "/usr/local/bin/phash"

# Reference image and its expected hash. Required: without it matching
# stays disabled.
# selftest_image = "/usr/share/hashwatch/selftest.jpg"
selftest_hash = -3722692567699475621

[api]
# API server host
host = "127.0.0.1"

# API server port
port = 8090

# Allowed CORS origins
cors_origins = []

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
