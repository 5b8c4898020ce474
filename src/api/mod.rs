//! Hashwatch REST API
//!
//! HTTP surface used by the event layer and operators, built with Axum.
//!
//! # Endpoints
//!
//! ## Matching
//! - `GET /api/v1/matches/:hash` - Records within the configured Hamming distance
//! - `POST /api/v1/check` - Hash an image file and match it
//!
//! ## Operations
//! - `GET /api/v1/status` - Availability, generation and refresh status
//! - `POST /api/v1/refresh` - Trigger a manifest check
//! - `POST /api/v1/verify` - Checksum the published generation
//!
//! ## Health
//! - `GET /health/live` - Liveness probe
//! - `GET /health/ready` - Readiness probe
//! - `GET /health` - Full health status

pub mod dto;
pub mod error;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::{ApiConfig, AppState};

use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Build the API router with all routes and middleware
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/matches/:hash", get(routes::matches::find_matches))
        .route("/check", post(routes::check::check_image))
        .route("/status", get(routes::status::get_status))
        .route("/verify", post(routes::status::verify))
        .route("/refresh", post(routes::refresh::trigger_refresh));

    let health_routes = Router::new()
        .route("/live", get(routes::health::liveness))
        .route("/ready", get(routes::health::readiness))
        .route("/", get(routes::health::full_health));

    let cors = cors_layer(&state.config.cors_origins);
    let shared_state = Arc::new(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .nest("/health", health_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(shared_state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    if allowed.is_empty() {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
            .allow_origin(allowed)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Start the API server
pub async fn serve(state: AppState, config: &ApiConfig) -> Result<(), ApiError> {
    let router = build_router(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Hashwatch API listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ApiError::Internal(format!("Server error: {}", e)))?;

    tracing::info!("Hashwatch API shut down gracefully");
    Ok(())
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::testutil::{dump_line, dump_line_at};
    use crate::refresh::testutil::FakeSource;
    use crate::refresh::{RefreshManager, RefreshOptions};
    use crate::service::testutil::service_with;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use std::path::PathBuf;
    use tempfile::tempdir;
    use tower::util::ServiceExt;

    fn create_test_app(lines: &[String], enabled: bool) -> (Router, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let hasher = enabled.then(|| PathBuf::from("/bin/true"));
        let service = Arc::new(service_with(dir.path(), lines, hasher));
        let state = AppState::new(service, ApiConfig::default());
        (build_router(state), dir)
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        read(response).await
    }

    async fn post_json(app: Router, uri: &str, body: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("Content-Type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        read(response).await
    }

    async fn read(response: axum::response::Response) -> (StatusCode, serde_json::Value) {
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_health_live() {
        let (app, _dir) = create_test_app(&[], false);
        let (status, _) = get(app, "/health/live").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_ready() {
        let (app, _dir) = create_test_app(&[dump_line("e621", 1, "a", 5, false)], true);
        let (status, _) = get(app, "/health/ready").await;
        assert_eq!(status, StatusCode::OK);

        let (app, _dir) = create_test_app(&[], true);
        let (status, _) = get(app, "/health/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (app, _dir) = create_test_app(&[dump_line("e621", 1, "a", 5, false)], false);
        let (status, _) = get(app, "/health/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_health_full() {
        let (app, _dir) = create_test_app(&[], true);
        let (status, body) = get(app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["index"], "missing");
    }

    #[tokio::test]
    async fn test_matches_sorted_oldest_first() {
        let (app, _dir) = create_test_app(
            &[
                dump_line_at("e621", 1, "late", 8, "2020-01-01T00:00:00Z", false),
                dump_line_at("furaffinity", 2, "early", 9, "2010-01-01T00:00:00Z", false),
                dump_line_at("e621", 3, "gone", 8, "2000-01-01T00:00:00Z", true),
            ],
            true,
        );

        let (status, body) = get(app, "/api/v1/matches/8").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["hash"], 8);

        let matches = body["matches"].as_array().unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0]["artist"], "early");
        assert_eq!(matches[0]["distance"], 1);
        assert_eq!(matches[0]["url"], "https://www.furaffinity.net/view/2/");
        assert_eq!(matches[1]["artist"], "late");
        assert_eq!(matches[1]["exact"], true);
    }

    #[tokio::test]
    async fn test_matches_negative_hash() {
        let (app, _dir) =
            create_test_app(&[dump_line("e621", 1, "a", -3722692567699475621, false)], true);
        let (status, body) = get(app, "/api/v1/matches/-3722692567699475621").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["matches"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_matches_invalid_hash() {
        let (app, _dir) = create_test_app(&[], true);
        let (status, body) = get(app, "/api/v1/matches/abc").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        assert!(body["request_id"].is_string());
    }

    #[tokio::test]
    async fn test_matches_when_disabled() {
        let (app, _dir) = create_test_app(&[dump_line("e621", 1, "a", 5, false)], false);
        let (status, body) = get(app, "/api/v1/matches/5").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["matches"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_check_validation() {
        let (app, _dir) = create_test_app(&[], true);
        let (status, _) = post_json(app, "/api/v1/check", r#"{"path": ""}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (app, _dir) = create_test_app(&[], true);
        let (status, body) =
            post_json(app, "/api/v1/check", r#"{"path": "/definitely/not/here.png"}"#).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_status() {
        let (app, _dir) = create_test_app(&[dump_line("e621", 1, "a", 5, false)], false);
        let (status, body) = get(app, "/api/v1/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["enabled"], false);
        assert_eq!(body["disabled_reason"], "hasher self-test failed");
        assert_eq!(body["generation"]["generation"], 1);
        assert_eq!(body["generation"]["record_count"], 1);
        assert!(body["refresh"].is_null());
    }

    #[tokio::test]
    async fn test_verify() {
        let (app, _dir) = create_test_app(&[dump_line("e621", 1, "a", 5, false)], true);
        let (status, body) = post_json(app, "/api/v1/verify", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["records"], 1);

        let (app, _dir) = create_test_app(&[], true);
        let (status, body) = post_json(app, "/api/v1/verify", "").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"]["code"], "NO_GENERATION");
    }

    #[tokio::test]
    async fn test_refresh_disabled() {
        let (app, _dir) = create_test_app(&[], true);
        let (status, _) = post_json(app, "/api/v1/refresh", "").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_refresh_trigger_and_status() {
        let dir = tempdir().unwrap();
        let service = Arc::new(service_with(dir.path(), &[], Some(PathBuf::from("/bin/true"))));
        let store = Arc::clone(service.engine().store());
        let source = Arc::new(FakeSource::new(Vec::new()));
        let manager = Arc::new(RefreshManager::new(source, store, RefreshOptions::default()));

        let state = AppState::with_refresh(service, manager, ApiConfig::default());
        let app = build_router(state);

        let (status, body) = post_json(app.clone(), "/api/v1/refresh", "").await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "accepted");

        let (status, body) = get(app, "/api/v1/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["refresh"]["phase"], "idle");
        assert_eq!(body["refresh"]["state"]["in_progress"], false);
    }

    #[test]
    fn test_api_config_addr() {
        assert_eq!(ApiConfig::new("0.0.0.0", 9000).addr(), "0.0.0.0:9000");
    }
}
