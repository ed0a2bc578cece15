//! HTTP Surface
//!
//! Axum router serving the observer websocket and health probes.
//!
//! # Endpoints
//!
//! ## WebSocket
//! - `GET /rosboard/v1` - Observer connection
//!
//! ## Topics
//! - `GET /api/v1/topics` - Last known topic catalog
//! - `GET /api/v1/topics/*name` - One topic, 404 if unknown
//!
//! ## Health
//! - `GET /health/live` - Liveness probe
//! - `GET /health` - Full health status
//!
//! # Example
//!
//! ```rust,ignore
//! use topicboard::api::{serve, ApiConfig, AppState};
//! use topicboard::hub::{Hub, HubConfig};
//! use topicboard::source::{MemorySource, VirtualTopics};
//! use topicboard::codec::SchemaRegistry;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let source = Arc::new(MemorySource::new("memory", SchemaRegistry::with_common_types()));
//!     let hub = Arc::new(Hub::new(HubConfig::default(), source, VirtualTopics::builtin()));
//!     let tasks = hub.start();
//!
//!     serve(AppState::new(Arc::clone(&hub), ApiConfig::default())).await?;
//!     hub.shutdown(tasks).await;
//!     Ok(())
//! }
//! ```

pub mod dto;
pub mod error;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::{ApiConfig, AppState};

use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::websocket::websocket_handler;

/// Path observers connect to
pub const WEBSOCKET_PATH: &str = "/rosboard/v1";

/// Build the router with all routes and middleware
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/topics", get(routes::topics::list_topics))
        .route("/topics/*name", get(routes::topics::get_topic));

    let health_routes = Router::new()
        .route("/live", get(routes::health::liveness))
        .route("/", get(routes::health::full_health));

    let shared_state = Arc::new(state);

    Router::new()
        .route(WEBSOCKET_PATH, get(websocket_handler))
        .nest("/api/v1", api_routes)
        .nest("/health", health_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(shared_state)
}

/// Start the HTTP server and run until a shutdown signal arrives
pub async fn serve(state: AppState) -> Result<(), ApiError> {
    let addr = state.config.addr();
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("topicboard listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ApiError::Internal(format!("Server error: {}", e)))?;

    tracing::info!("HTTP server shut down gracefully");
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
                tracing::error!(error = %e, "Failed to install signal handler");
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
    use crate::hub::test_support::hub_with_source;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::util::ServiceExt;

    async fn create_test_app() -> (Router, Arc<crate::source::MemorySource>) {
        let (hub, source) = hub_with_source();
        source.add_topic("/imu", "sensor_msgs/msg/Imu").await;
        hub.reconcile().await;
        let router = build_router(AppState::new(hub, ApiConfig::default()));
        (router, source)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    #[tokio::test]
    async fn test_health_live() {
        let (app, _source) = create_test_app().await;
        let (status, _) = get_json(app, "/health/live").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_full() {
        let (app, _source) = create_test_app().await;
        let (status, body) = get_json(app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["connections"], 0);
        assert_eq!(body["subscriptions"], 0);
    }

    #[tokio::test]
    async fn test_health_degraded_when_source_down() {
        let (app, source) = create_test_app().await;
        source.set_unavailable(true);
        let (status, body) = get_json(app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["source"], "error");
    }

    #[tokio::test]
    async fn test_list_topics() {
        let (app, _source) = create_test_app().await;
        let (status, body) = get_json(app, "/api/v1/topics").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 1);
        assert_eq!(body["topics"][0]["name"], "/imu");
        assert_eq!(body["topics"][0]["type"], "sensor_msgs/msg/Imu");
        assert_eq!(body["topics"][0]["subscribers"], 0);
    }

    #[tokio::test]
    async fn test_get_topic() {
        let (app, _source) = create_test_app().await;
        let (status, body) = get_json(app.clone(), "/api/v1/topics/imu").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "/imu");
        assert_eq!(body["type"], "sensor_msgs/msg/Imu");

        let (status, body) = get_json(app, "/api/v1/topics/robot/odom").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_websocket_requires_upgrade() {
        let (app, _source) = create_test_app().await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri(WEBSOCKET_PATH)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }
}
