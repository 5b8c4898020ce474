//! Application State
//!
//! Shared state accessible by all API handlers.
//! Wrapped in Arc for thread-safe sharing across async tasks.

use crate::refresh::RefreshManager;
use crate::service::MatchService;
use std::sync::Arc;
use std::time::Instant;

/// Shared application state for all handlers
#[derive(Clone)]
pub struct AppState {
    /// Availability-gated match lookups
    pub service: Arc<MatchService>,
    /// Background refresh, absent when refresh is disabled
    pub refresh: Option<Arc<RefreshManager>>,
    /// API configuration
    pub config: Arc<ApiConfig>,
    /// Server start time for uptime tracking
    pub start_time: Instant,
}

impl AppState {
    /// Create a new AppState without a refresh manager
    pub fn new(service: Arc<MatchService>, config: ApiConfig) -> Self {
        Self {
            service,
            refresh: None,
            config: Arc::new(config),
            start_time: Instant::now(),
        }
    }

    /// Create AppState with a running refresh manager
    pub fn with_refresh(
        service: Arc<MatchService>,
        refresh: Arc<RefreshManager>,
        config: ApiConfig,
    ) -> Self {
        Self {
            refresh: Some(refresh),
            ..Self::new(service, config)
        }
    }

    /// Get server uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Allowed CORS origins, permissive when empty
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8090,
            cors_origins: Vec::new(),
        }
    }
}

impl ApiConfig {
    /// Create config with custom host and port
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Get the socket address string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl From<&crate::config::ApiConfig> for ApiConfig {
    fn from(config: &crate::config::ApiConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            cors_origins: config.cors_origins.clone(),
        }
    }
}
