//! In-memory data source
//!
//! Keeps a topic table and a schema registry in process. Messages pushed onto
//! a topic fan out to every open feed of that topic; published messages loop
//! back the same way and the most recent ones are recorded.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

use super::{DataSource, Feed, FeedId, FeedItem, SourceError, TopicCatalog};
use crate::codec::{normalize_type_id, Message, Schema, SchemaRegistry, SchemaResolver};

const DEFAULT_FEED_CAPACITY: usize = 64;

/// Published messages kept for inspection; older ones are dropped
pub const PUBLISHED_HISTORY: usize = 256;

/// A message handed to [`MemorySource::publish`]
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub topic: String,
    pub type_id: String,
    pub message: Message,
}

struct FeedEntry {
    topic: String,
    sender: mpsc::Sender<FeedItem>,
}

/// Data source living entirely in process
pub struct MemorySource {
    name: String,
    topics: Mutex<TopicCatalog>,
    schemas: RwLock<SchemaRegistry>,
    feeds: Mutex<HashMap<FeedId, FeedEntry>>,
    advertised: Mutex<HashMap<String, String>>,
    published: Mutex<VecDeque<PublishedMessage>>,
    next_feed_id: AtomicU64,
    feed_capacity: usize,
    unavailable: AtomicBool,
    subscribe_calls: AtomicUsize,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, schemas: SchemaRegistry) -> Self {
        Self::with_capacity(name, schemas, DEFAULT_FEED_CAPACITY)
    }

    pub fn with_capacity(
        name: impl Into<String>,
        schemas: SchemaRegistry,
        feed_capacity: usize,
    ) -> Self {
        Self {
            name: name.into(),
            topics: Mutex::new(TopicCatalog::new()),
            schemas: RwLock::new(schemas),
            feeds: Mutex::new(HashMap::new()),
            advertised: Mutex::new(HashMap::new()),
            published: Mutex::new(VecDeque::new()),
            next_feed_id: AtomicU64::new(1),
            feed_capacity: feed_capacity.max(1),
            unavailable: AtomicBool::new(false),
            subscribe_calls: AtomicUsize::new(0),
        }
    }

    /// Add or retype a topic in the catalog
    pub async fn add_topic(&self, topic: impl Into<String>, type_id: &str) {
        self.topics
            .lock()
            .await
            .insert(topic.into(), normalize_type_id(type_id));
    }

    pub async fn remove_topic(&self, topic: &str) {
        self.topics.lock().await.remove(topic);
    }

    /// Register an additional schema
    pub fn register_schema(&self, schema: Schema) -> Result<(), SourceError> {
        let mut schemas = self
            .schemas
            .write()
            .map_err(|e| SourceError::Lock(e.to_string()))?;
        schemas.register(schema);
        Ok(())
    }

    /// Simulate an outage: every adapter call fails while set
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Deliver a message to every open feed on the topic
    ///
    /// Returns the number of feeds that accepted it. Full feeds drop the
    /// message; this source is latest-wins, not a queue.
    pub async fn push(&self, topic: &str, message: Message) -> usize {
        let feeds = self.feeds.lock().await;
        let mut delivered = 0;
        for entry in feeds.values().filter(|e| e.topic == topic) {
            match entry.sender.try_send(FeedItem::new(message.clone())) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::trace!(topic = %topic, "Feed full, dropping message");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        delivered
    }

    /// Number of open feeds on a topic
    pub async fn feed_count(&self, topic: &str) -> usize {
        self.feeds
            .lock()
            .await
            .values()
            .filter(|e| e.topic == topic)
            .count()
    }

    /// Total number of successful subscribe calls so far
    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    /// The most recent published messages, oldest first
    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().await.iter().cloned().collect()
    }

    pub async fn advertised(&self) -> HashMap<String, String> {
        self.advertised.lock().await.clone()
    }

    fn check_available(&self) -> Result<(), SourceError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SourceError::Unavailable(self.name.clone()));
        }
        Ok(())
    }
}

impl SchemaResolver for MemorySource {
    fn resolve(&self, type_id: &str) -> Option<Arc<Schema>> {
        self.schemas.read().ok()?.resolve(type_id)
    }
}

#[async_trait]
impl DataSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_topics(&self) -> Result<TopicCatalog, SourceError> {
        self.check_available()?;
        Ok(self.topics.lock().await.clone())
    }

    async fn subscribe(
        &self,
        topic: &str,
        _type_id: &str,
        min_interval: Duration,
    ) -> Result<Feed, SourceError> {
        self.check_available()?;
        if !self.topics.lock().await.contains_key(topic) {
            return Err(SourceError::TopicNotFound(topic.to_string()));
        }

        let id = FeedId(self.next_feed_id.fetch_add(1, Ordering::SeqCst));
        let (sender, items) = mpsc::channel(self.feed_capacity);
        self.feeds.lock().await.insert(
            id,
            FeedEntry {
                topic: topic.to_string(),
                sender,
            },
        );
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);

        tracing::debug!(
            source = %self.name,
            topic = %topic,
            feed_id = id.0,
            min_interval_ms = min_interval.as_secs_f64() * 1000.0,
            "Feed opened"
        );
        Ok(Feed { id, items })
    }

    async fn unsubscribe(&self, id: FeedId) -> Result<(), SourceError> {
        if let Some(entry) = self.feeds.lock().await.remove(&id) {
            tracing::debug!(source = %self.name, topic = %entry.topic, feed_id = id.0, "Feed closed");
        }
        Ok(())
    }

    async fn advertise(&self, topic: &str, type_id: &str) -> Result<(), SourceError> {
        self.check_available()?;
        let type_id = normalize_type_id(type_id);
        {
            let topics = self.topics.lock().await;
            if let Some(existing) = topics.get(topic) {
                if *existing != type_id {
                    return Err(SourceError::TypeMismatch {
                        topic: topic.to_string(),
                        advertised: existing.clone(),
                        requested: type_id,
                    });
                }
            }
        }
        self.advertised
            .lock()
            .await
            .insert(topic.to_string(), type_id.clone());
        self.topics
            .lock()
            .await
            .entry(topic.to_string())
            .or_insert(type_id);
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        type_id: &str,
        message: Message,
    ) -> Result<(), SourceError> {
        self.check_available()?;
        if !self.advertised.lock().await.contains_key(topic) {
            return Err(SourceError::TopicNotFound(topic.to_string()));
        }
        {
            let mut published = self.published.lock().await;
            if published.len() >= PUBLISHED_HISTORY {
                published.pop_front();
            }
            published.push_back(PublishedMessage {
                topic: topic.to_string(),
                type_id: normalize_type_id(type_id),
                message: message.clone(),
            });
        }
        self.push(topic, message).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::FieldValue;

    fn source() -> MemorySource {
        MemorySource::new("test", SchemaRegistry::with_common_types())
    }

    #[tokio::test]
    async fn test_list_topics() {
        let source = source();
        source.add_topic("/chatter", "std_msgs/String").await;

        let topics = source.list_topics().await.unwrap();
        assert_eq!(topics.get("/chatter").map(String::as_str), Some("std_msgs/msg/String"));
    }

    #[tokio::test]
    async fn test_subscribe_and_push() {
        let source = source();
        source.add_topic("/chatter", "std_msgs/msg/String").await;

        let mut feed = source
            .subscribe("/chatter", "std_msgs/msg/String", Duration::from_millis(10))
            .await
            .unwrap();
        let msg = Message::new("std_msgs/msg/String").with("data", "hi");
        assert_eq!(source.push("/chatter", msg.clone()).await, 1);
        assert_eq!(source.push("/other", msg.clone()).await, 0);

        let item = feed.items.recv().await.unwrap();
        assert_eq!(item.message, msg);

        source.unsubscribe(feed.id).await.unwrap();
        assert_eq!(source.feed_count("/chatter").await, 0);
        assert!(feed.items.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_subscribe_unknown_topic() {
        let source = source();
        let result = source
            .subscribe("/missing", "std_msgs/msg/String", Duration::ZERO)
            .await;
        assert!(matches!(result, Err(SourceError::TopicNotFound(_))));
    }

    #[tokio::test]
    async fn test_full_feed_drops() {
        let source = MemorySource::with_capacity("test", SchemaRegistry::with_common_types(), 1);
        source.add_topic("/chatter", "std_msgs/msg/String").await;
        let _feed = source
            .subscribe("/chatter", "std_msgs/msg/String", Duration::ZERO)
            .await
            .unwrap();

        let msg = Message::new("std_msgs/msg/String");
        assert_eq!(source.push("/chatter", msg.clone()).await, 1);
        assert_eq!(source.push("/chatter", msg).await, 0);
    }

    #[tokio::test]
    async fn test_publish_requires_advertise() {
        let source = source();
        let msg = Message::new("std_msgs/msg/String").with("data", "x");

        let result = source.publish("/cmd", "std_msgs/msg/String", msg.clone()).await;
        assert!(matches!(result, Err(SourceError::TopicNotFound(_))));

        source.advertise("/cmd", "std_msgs/String").await.unwrap();
        source.publish("/cmd", "std_msgs/msg/String", msg).await.unwrap();
        assert_eq!(source.published().await.len(), 1);
        assert!(source.list_topics().await.unwrap().contains_key("/cmd"));
    }

    #[tokio::test]
    async fn test_published_history_is_bounded() {
        let source = source();
        source.advertise("/cmd", "std_msgs/msg/Int32").await.unwrap();
        for i in 0..(PUBLISHED_HISTORY as i64 + 10) {
            let msg = Message::new("std_msgs/msg/Int32").with("data", i);
            source.publish("/cmd", "std_msgs/msg/Int32", msg).await.unwrap();
        }

        let published = source.published().await;
        assert_eq!(published.len(), PUBLISHED_HISTORY);
        assert_eq!(published[0].message.get("data"), Some(&FieldValue::Int(10)));
    }

    #[tokio::test]
    async fn test_advertise_type_mismatch() {
        let source = source();
        source.add_topic("/cmd", "std_msgs/msg/Bool").await;
        let result = source.advertise("/cmd", "std_msgs/msg/String").await;
        assert!(matches!(result, Err(SourceError::TypeMismatch { .. })));
    }

    #[tokio::test]
    async fn test_unavailable() {
        let source = source();
        source.set_unavailable(true);
        assert!(matches!(
            source.list_topics().await,
            Err(SourceError::Unavailable(_))
        ));
        source.set_unavailable(false);
        assert!(source.list_topics().await.is_ok());
    }

    #[test]
    fn test_resolve_schema() {
        let source = source();
        assert!(source.resolve_schema("geometry_msgs/Twist").is_ok());
        assert!(matches!(
            source.resolve_schema("custom/Unknown"),
            Err(SourceError::UnknownType(_))
        ));
    }
}
