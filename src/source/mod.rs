//! Data Sources
//!
//! The hub talks to the system producing topics through the [`DataSource`]
//! trait: list the topic catalog, open and close feeds, resolve schemas and
//! publish messages back.
//!
//! - [`MemorySource`]: in-process implementation backing the demo and tests
//! - [`VirtualTopics`]: reserved topic names bound to built-in feeds

mod demo;
mod memory;
mod virtual_topics;

pub use demo::spawn_demo_publisher;
pub use memory::{MemorySource, PublishedMessage};
pub use virtual_topics::{
    ProcessListFeed, SystemStatsFeed, VirtualFeed, VirtualFeedFactory, VirtualFeedHandle,
    VirtualTopics, PROCESS_LIST_TOPIC, SYSTEM_STATS_TOPIC,
};

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::codec::{Message, Schema, SchemaResolver, Time};

/// Topic name → type identifier
pub type TopicCatalog = BTreeMap<String, String>;

/// Identifier of an open feed, used to close it again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeedId(pub u64);

/// One message delivered by a feed
#[derive(Debug, Clone)]
pub struct FeedItem {
    pub message: Message,
    /// Time the source produced or received the message
    pub timestamp: Time,
}

impl FeedItem {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            timestamp: Time::now(),
        }
    }
}

/// A live subscription handed out by a data source
#[derive(Debug)]
pub struct Feed {
    pub id: FeedId,
    pub items: mpsc::Receiver<FeedItem>,
}

/// Contract every data source implements
#[async_trait]
pub trait DataSource: SchemaResolver + Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Current topic catalog
    async fn list_topics(&self) -> Result<TopicCatalog, SourceError>;

    /// Open a feed on a topic
    ///
    /// `min_interval` is a hint; the source may deliver faster.
    async fn subscribe(
        &self,
        topic: &str,
        type_id: &str,
        min_interval: Duration,
    ) -> Result<Feed, SourceError>;

    /// Close a feed; unknown ids are ignored
    async fn unsubscribe(&self, id: FeedId) -> Result<(), SourceError>;

    /// Prepare an outbound channel for a topic
    async fn advertise(&self, topic: &str, type_id: &str) -> Result<(), SourceError>;

    /// Publish a structured message on a topic
    async fn publish(&self, topic: &str, type_id: &str, message: Message)
        -> Result<(), SourceError>;

    /// Resolve a type identifier to its schema
    fn resolve_schema(&self, type_id: &str) -> Result<Arc<Schema>, SourceError> {
        self.resolve(type_id)
            .ok_or_else(|| SourceError::UnknownType(type_id.to_string()))
    }
}

/// Errors raised by data sources
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Data source unavailable: {0}")]
    Unavailable(String),

    #[error("Topic not found: {0}")]
    TopicNotFound(String),

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("Topic {topic} is advertised as {advertised}, not {requested}")]
    TypeMismatch {
        topic: String,
        advertised: String,
        requested: String,
    },

    #[error("Lock error: {0}")]
    Lock(String),
}
