//! Broadcaster
//!
//! Fans catalog updates and topic data out to connections. A topic frame is
//! encoded at most once per broadcast and the same text is shared by every
//! recipient. Each connection is throttled to its own rate for the topic.

use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::registry::{ConnectionRegistry, Outbound};
use super::Hub;
use crate::codec::encode;
use crate::source::{FeedItem, TopicCatalog};
use crate::websocket::ServerFrame;

/// Slack allowed when comparing a connection's delivery interval
pub const DELIVERY_TOLERANCE: Duration = Duration::from_micros(200);

/// Slack allowed when comparing the upstream throttle
pub const UPSTREAM_TOLERANCE: Duration = Duration::from_micros(100);

/// Whether enough time has passed since `last` to deliver again
pub fn throttle_allows(
    last: Option<Instant>,
    min_interval: Duration,
    tolerance: Duration,
    now: Instant,
) -> bool {
    match last {
        None => true,
        Some(last) => now.saturating_duration_since(last) + tolerance >= min_interval,
    }
}

/// Content of a topic frame
#[derive(Debug, Clone)]
pub enum TopicPayload {
    Message(FeedItem),
    /// Topic-scoped error report
    Error(String),
}

/// Build the `m` frame payload for a topic
pub fn topic_frame_payload(topic: &str, type_id: &str, payload: &TopicPayload) -> Map<String, Value> {
    let mut fields = match payload {
        TopicPayload::Message(item) => {
            let mut fields = encode(&item.message);
            fields.insert(
                "_time".to_string(),
                Value::from(item.timestamp.as_secs_f64() * 1000.0),
            );
            fields
        }
        TopicPayload::Error(error) => {
            let mut fields = Map::new();
            fields.insert("_error".to_string(), Value::from(error.as_str()));
            fields
        }
    };
    fields.insert("_topic_name".to_string(), Value::from(topic));
    fields.insert("_topic_type".to_string(), Value::from(type_id));
    fields
}

impl ConnectionRegistry {
    /// Deliver a topic frame to every interested connection that is due
    ///
    /// `build` runs at most once, and only if some connection is due. Returns
    /// the number of connections the frame was queued for.
    pub fn deliver<F>(&mut self, topic: &str, build: F, now: Instant) -> usize
    where
        F: FnOnce() -> Option<Arc<str>>,
    {
        let Some(subscribers) = self.interest.get(topic) else {
            return 0;
        };

        let mut build = Some(build);
        let mut frame: Option<Arc<str>> = None;
        let mut sent = 0;

        for id in subscribers {
            let Some(connection) = self.connections.get_mut(id) else {
                continue;
            };
            if connection.is_closing() {
                continue;
            }

            let last = connection.last_delivery.get(topic).copied();
            if !throttle_allows(last, connection.min_interval(topic), DELIVERY_TOLERANCE, now) {
                continue;
            }

            if frame.is_none() {
                frame = build.take().and_then(|build| build());
            }
            let Some(frame) = &frame else {
                return sent;
            };

            if connection.send(Outbound::Frame(Arc::clone(frame))) {
                connection.last_delivery.insert(topic.to_string(), now);
                sent += 1;
            }
        }
        sent
    }

    /// Queue a frame for every open connection
    pub fn deliver_all(&self, frame: &Arc<str>) -> usize {
        self.connections
            .values()
            .filter(|c| !c.is_closing())
            .filter(|c| c.send(Outbound::Frame(Arc::clone(frame))))
            .count()
    }
}

impl Hub {
    /// Send the topic catalog to every open connection
    pub async fn broadcast_catalog(&self, catalog: &TopicCatalog) -> usize {
        let text = match ServerFrame::TopicCatalog(catalog.clone()).to_json() {
            Ok(text) => Arc::<str>::from(text),
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode topic catalog");
                return 0;
            }
        };
        let state = self.state.lock().await;
        state.registry.deliver_all(&text)
    }

    /// Send topic data to the connections interested in it
    pub async fn broadcast_topic_data(
        &self,
        topic: &str,
        type_id: &str,
        payload: TopicPayload,
    ) -> usize {
        self.broadcast_topic_data_at(topic, type_id, payload, Instant::now())
            .await
    }

    pub(crate) async fn broadcast_topic_data_at(
        &self,
        topic: &str,
        type_id: &str,
        payload: TopicPayload,
        now: Instant,
    ) -> usize {
        let build = || {
            let frame = ServerFrame::TopicData(topic_frame_payload(topic, type_id, &payload));
            match frame.to_json() {
                Ok(text) => Some(Arc::<str>::from(text)),
                Err(e) => {
                    tracing::error!(topic = %topic, error = %e, "Failed to encode topic frame");
                    None
                }
            }
        };

        let mut state = self.state.lock().await;
        let sent = state.registry.deliver(topic, build, now);
        tracing::trace!(topic = %topic, recipients = sent, "Topic data delivered");
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Message, Time};
    use crate::hub::test_support::{drain, hub_with_source};
    use std::cell::Cell;
    use tokio::sync::mpsc;

    #[test]
    fn test_throttle_allows() {
        let now = Instant::now();
        let interval = Duration::from_millis(100);
        assert!(throttle_allows(None, interval, DELIVERY_TOLERANCE, now));
        assert!(!throttle_allows(
            Some(now),
            interval,
            DELIVERY_TOLERANCE,
            now + Duration::from_millis(50)
        ));
        // Inside the tolerance window counts as due
        assert!(throttle_allows(
            Some(now),
            interval,
            DELIVERY_TOLERANCE,
            now + Duration::from_micros(99_900)
        ));
        assert!(!throttle_allows(
            Some(now),
            interval,
            DELIVERY_TOLERANCE,
            now + Duration::from_micros(99_700)
        ));
    }

    #[test]
    fn test_topic_frame_payload() {
        let item = FeedItem {
            message: Message::new("std_msgs/msg/String").with("data", "hi"),
            timestamp: Time::new(2, 500_000_000),
        };
        let payload = topic_frame_payload("/chatter", "std_msgs/msg/String", &TopicPayload::Message(item));
        assert_eq!(payload["data"], "hi");
        assert_eq!(payload["_topic_name"], "/chatter");
        assert_eq!(payload["_topic_type"], "std_msgs/msg/String");
        assert_eq!(payload["_time"], 2500.0);

        let payload = topic_frame_payload(
            "/x",
            "a/msg/B",
            &TopicPayload::Error("boom".to_string()),
        );
        assert_eq!(payload["_error"], "boom");
        assert!(payload.get("_time").is_none());
    }

    #[test]
    fn test_deliver_encodes_once() {
        let mut registry = ConnectionRegistry::new(10);
        let mut receivers = Vec::new();
        for _ in 0..3 {
            let (tx, rx) = mpsc::unbounded_channel();
            let id = registry.insert(tx, Duration::from_millis(10)).unwrap();
            registry.set_interest(&id, "/imu", Duration::from_millis(10)).unwrap();
            receivers.push(rx);
        }

        let builds = Cell::new(0);
        let sent = registry.deliver(
            "/imu",
            || {
                builds.set(builds.get() + 1);
                Some(Arc::from("frame"))
            },
            Instant::now(),
        );
        assert_eq!(sent, 3);
        assert_eq!(builds.get(), 1);
        for rx in &mut receivers {
            assert_eq!(rx.try_recv().unwrap(), Outbound::Frame(Arc::from("frame")));
        }
    }

    #[test]
    fn test_deliver_skips_when_nobody_is_due() {
        let mut registry = ConnectionRegistry::new(10);
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = registry.insert(tx, Duration::from_millis(100)).unwrap();
        registry.set_interest(&id, "/imu", Duration::from_millis(100)).unwrap();

        let now = Instant::now();
        assert_eq!(registry.deliver("/imu", || Some(Arc::from("a")), now), 1);

        let builds = Cell::new(0);
        let sent = registry.deliver(
            "/imu",
            || {
                builds.set(builds.get() + 1);
                Some(Arc::from("b"))
            },
            now + Duration::from_millis(10),
        );
        assert_eq!(sent, 0);
        assert_eq!(builds.get(), 0);
    }

    #[test]
    fn test_deliver_skips_closed_connections() {
        let mut registry = ConnectionRegistry::new(10);
        let (tx, rx) = mpsc::unbounded_channel();
        let id = registry.insert(tx, Duration::ZERO).unwrap();
        registry.set_interest(&id, "/imu", Duration::ZERO).unwrap();
        drop(rx);

        assert_eq!(registry.deliver("/imu", || Some(Arc::from("a")), Instant::now()), 0);
    }

    #[tokio::test]
    async fn test_per_connection_rates() {
        let (hub, _source) = hub_with_source();
        let (fast_tx, mut fast_rx) = mpsc::unbounded_channel();
        let (slow_tx, mut slow_rx) = mpsc::unbounded_channel();
        let fast = hub.register(fast_tx).await.unwrap();
        let slow = hub.register(slow_tx).await.unwrap();
        hub.set_interest(&fast, "/scan", Some(30.0)).await.unwrap();
        hub.set_interest(&slow, "/scan", Some(5.0)).await.unwrap();
        drain(&mut fast_rx);
        drain(&mut slow_rx);

        let start = Instant::now();
        for i in 0..100u64 {
            let item = FeedItem::new(Message::new("std_msgs/msg/String").with("data", "x"));
            hub.broadcast_topic_data_at(
                "/scan",
                "std_msgs/msg/String",
                TopicPayload::Message(item),
                start + Duration::from_millis(10 * i),
            )
            .await;
        }

        let fast_count = drain(&mut fast_rx).len();
        let slow_count = drain(&mut slow_rx).len();
        assert!((25..=31).contains(&fast_count), "fast got {}", fast_count);
        assert!((5..=6).contains(&slow_count), "slow got {}", slow_count);
    }

    #[tokio::test]
    async fn test_catalog_reaches_all_connections() {
        let (hub, _source) = hub_with_source();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        hub.register(tx1).await.unwrap();
        hub.register(tx2).await.unwrap();
        drain(&mut rx1);
        drain(&mut rx2);

        let mut catalog = TopicCatalog::new();
        catalog.insert("/imu".to_string(), "sensor_msgs/msg/Imu".to_string());
        assert_eq!(hub.broadcast_catalog(&catalog).await, 2);
        assert_eq!(drain(&mut rx1), vec![r#"["t",{"/imu":"sensor_msgs/msg/Imu"}]"#.to_string()]);
        assert_eq!(drain(&mut rx2).len(), 1);
    }
}
