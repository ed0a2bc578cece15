//! # topicboard
//!
//! Real-time telemetry fan-out hub. Many websocket observers subscribe to
//! typed topic streams of a single data source; the hub keeps one upstream
//! subscription per topic and throttles delivery to each observer's rate.
//!
//! ## Modules
//!
//! - [`codec`]: Schema-driven message conversion to and from JSON
//! - [`source`]: Data source contract, in-memory source and virtual topics
//! - [`hub`]: Connection registry, reconciler, broadcaster, latency monitor
//! - [`websocket`]: Wire frames and the websocket handler
//! - [`api`]: HTTP server with Axum
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use topicboard::codec::SchemaRegistry;
//! use topicboard::hub::{Hub, HubConfig};
//! use topicboard::source::{MemorySource, VirtualTopics};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let source = Arc::new(MemorySource::new("memory", SchemaRegistry::with_common_types()));
//!     source.add_topic("/chatter", "std_msgs/String").await;
//!
//!     let hub = Arc::new(Hub::new(HubConfig::default(), source.clone(), VirtualTopics::builtin()));
//!     let tasks = hub.start();
//!
//!     let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//!     let id = hub.register(tx).await?;
//!     hub.set_interest(&id, "/chatter", Some(10.0)).await?;
//!     hub.reconcile().await;
//!
//!     while let Some(frame) = rx.recv().await {
//!         println!("{:?}", frame);
//!     }
//!
//!     hub.shutdown(tasks).await;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod codec;
pub mod config;
pub mod hub;
pub mod source;
pub mod websocket;

// Re-export top-level types for convenience
pub use codec::{CodecError, FieldValue, Message, Schema, SchemaRegistry, Time};

pub use source::{DataSource, Feed, FeedId, FeedItem, MemorySource, SourceError, TopicCatalog};

pub use hub::{Hub, HubConfig, HubError, HubResult, Outbound, ReconcileReport};

pub use api::{build_router, serve, ApiConfig, ApiError, AppState};

pub use websocket::{websocket_handler, ClientFrame, FrameError, ServerFrame};

pub use config::{generate_default_config, Config, ConfigError, LoggingConfig};
