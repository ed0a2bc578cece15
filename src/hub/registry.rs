//! Connection Registry
//!
//! Tracks live observer connections, the topic interest of each one and the
//! per-topic minimum delivery interval across all of them.
//!
//! The registry is plain data; the [`Hub`](super::Hub) keeps it behind the
//! shared state lock.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

use super::error::{HubError, HubResult};
use super::latency::PingTracker;

/// Unique identifier for an observer connection
pub type ConnectionId = String;

/// Work queued for a connection's writer task
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Encoded text frame, shared across all recipients of a broadcast
    Frame(Arc<str>),
    /// Close the transport
    Close,
}

/// One observer connection and its per-topic state
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    sender: mpsc::UnboundedSender<Outbound>,
    closing: bool,
    default_interval: Duration,
    min_intervals: HashMap<String, Duration>,
    pub(crate) last_delivery: HashMap<String, Instant>,
    pub(crate) pings: PingTracker,
    connected_at: Instant,
}

impl Connection {
    fn new(
        id: ConnectionId,
        sender: mpsc::UnboundedSender<Outbound>,
        default_interval: Duration,
    ) -> Self {
        Self {
            id,
            sender,
            closing: false,
            default_interval,
            min_intervals: HashMap::new(),
            last_delivery: HashMap::new(),
            pings: PingTracker::new(),
            connected_at: Instant::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether the transport is shutting down or already gone
    pub fn is_closing(&self) -> bool {
        self.closing || self.sender.is_closed()
    }

    /// Queue work for the writer task; false if the writer is gone
    pub fn send(&self, outbound: Outbound) -> bool {
        self.sender.send(outbound).is_ok()
    }

    /// Minimum time between deliveries on a topic
    pub fn min_interval(&self, topic: &str) -> Duration {
        self.min_intervals
            .get(topic)
            .copied()
            .unwrap_or(self.default_interval)
    }

    pub fn latency_ms(&self) -> Option<f64> {
        self.pings.latency_ms()
    }

    pub fn connected_for(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Ask the writer to close; repeated calls are no-ops
    pub(crate) fn begin_close(&mut self) {
        if !self.closing {
            self.closing = true;
            let _ = self.sender.send(Outbound::Close);
        }
    }
}

/// Live connections, topic interest and global throttle
#[derive(Debug)]
pub struct ConnectionRegistry {
    pub(crate) connections: HashMap<ConnectionId, Connection>,
    /// Topic → ids of the connections subscribed to it
    pub(crate) interest: HashMap<String, HashSet<ConnectionId>>,
    /// Topic → smallest min interval among interested connections
    global_intervals: HashMap<String, Duration>,
    max_connections: usize,
}

impl ConnectionRegistry {
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: HashMap::new(),
            interest: HashMap::new(),
            global_intervals: HashMap::new(),
            max_connections,
        }
    }

    /// Add a connection, failing once the connection limit is reached
    pub fn insert(
        &mut self,
        sender: mpsc::UnboundedSender<Outbound>,
        default_interval: Duration,
    ) -> HubResult<ConnectionId> {
        if self.connections.len() >= self.max_connections {
            return Err(HubError::TooManyConnections(self.max_connections));
        }

        let id = Uuid::new_v4().to_string();
        self.connections
            .insert(id.clone(), Connection::new(id.clone(), sender, default_interval));
        Ok(id)
    }

    /// Remove a connection and purge it from every interest set
    ///
    /// Returns the connection and the topics whose interest changed, or None
    /// if the id is unknown.
    pub fn remove(&mut self, id: &str) -> Option<(Connection, Vec<String>)> {
        let connection = self.connections.remove(id)?;

        let mut touched = Vec::new();
        self.interest.retain(|topic, subscribers| {
            if subscribers.remove(id) {
                touched.push(topic.clone());
            }
            !subscribers.is_empty()
        });
        for topic in &touched {
            self.recompute_global(topic);
        }

        Some((connection, touched))
    }

    /// Subscribe a connection to a topic with the given minimum interval
    pub fn set_interest(&mut self, id: &str, topic: &str, interval: Duration) -> HubResult<()> {
        let connection = self
            .connections
            .get_mut(id)
            .ok_or_else(|| HubError::ConnectionNotFound(id.to_string()))?;
        connection.min_intervals.insert(topic.to_string(), interval);

        self.interest
            .entry(topic.to_string())
            .or_default()
            .insert(id.to_string());
        self.recompute_global(topic);
        Ok(())
    }

    /// Unsubscribe a connection from a topic; returns false if it was not subscribed
    pub fn clear_interest(&mut self, id: &str, topic: &str) -> bool {
        let removed = match self.interest.get_mut(topic) {
            Some(subscribers) => {
                let removed = subscribers.remove(id);
                if subscribers.is_empty() {
                    self.interest.remove(topic);
                }
                removed
            }
            None => false,
        };

        if let Some(connection) = self.connections.get_mut(id) {
            connection.min_intervals.remove(topic);
            connection.last_delivery.remove(topic);
        }
        if removed {
            self.recompute_global(topic);
        }
        removed
    }

    fn recompute_global(&mut self, topic: &str) {
        let interval = self.interest.get(topic).and_then(|subscribers| {
            subscribers
                .iter()
                .filter_map(|id| self.connections.get(id))
                .map(|c| c.min_interval(topic))
                .min()
        });

        match interval {
            Some(interval) => {
                self.global_intervals.insert(topic.to_string(), interval);
            }
            None => {
                self.global_intervals.remove(topic);
            }
        }
    }

    pub fn global_interval(&self, topic: &str) -> Option<Duration> {
        self.global_intervals.get(topic).copied()
    }

    pub fn has_interest(&self, topic: &str) -> bool {
        self.interest.get(topic).map_or(false, |s| !s.is_empty())
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.interest.get(topic).map_or(0, HashSet::len)
    }

    pub fn is_subscribed(&self, id: &str, topic: &str) -> bool {
        self.interest.get(topic).map_or(false, |s| s.contains(id))
    }

    /// Topics with at least one interested connection
    pub fn topics_with_interest(&self) -> impl Iterator<Item = &String> {
        self.interest
            .iter()
            .filter(|(_, subscribers)| !subscribers.is_empty())
            .map(|(topic, _)| topic)
    }

    pub fn get(&self, id: &str) -> Option<&Connection> {
        self.connections.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Connection> {
        self.connections.get_mut(id)
    }

    pub fn connections_mut(&mut self) -> impl Iterator<Item = &mut Connection> {
        self.connections.values_mut()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
