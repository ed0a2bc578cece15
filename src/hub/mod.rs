//! Telemetry Hub
//!
//! Fans data source topics out to observer connections.
//!
//! ## Architecture
//!
//! - **Registry**: live connections, their topic interest and rates
//! - **Reconciler**: one upstream feed per topic anyone is interested in
//! - **Broadcaster**: per-connection throttled fan-out of topic frames
//! - **Latency**: ping/pong round trips and eviction of slow connections
//! - **Publish**: client messages injected back into the data source
//!
//! All shared state lives behind a single lock in [`Hub`]. Data source calls
//! are made without holding it.

mod broadcaster;
mod error;
mod latency;
mod publish;
mod reconciler;
mod registry;

pub use broadcaster::{
    throttle_allows, topic_frame_payload, TopicPayload, DELIVERY_TOLERANCE, UPSTREAM_TOLERANCE,
};
pub use error::{HubError, HubResult};
pub use latency::{classify, LatencyVerdict, PingTracker, PongOutcome, PING_RING_SIZE};
pub use reconciler::ReconcileReport;
pub use registry::{Connection, ConnectionId, ConnectionRegistry, Outbound};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::source::{DataSource, TopicCatalog, VirtualTopics};
use crate::websocket::ServerFrame;
use reconciler::LocalSubscription;

/// Rate used when neither the client nor the config gives a usable one (Hz)
pub const DEFAULT_UPDATE_RATE: f64 = 24.0;

/// Longest delivery interval a subscription can ask for
pub const MAX_DELIVERY_INTERVAL: Duration = Duration::from_secs(3600);

/// Configuration for the hub
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Name announced to clients in the greeting
    pub title: String,
    /// Period of the background reconciliation pass
    pub reconcile_interval: Duration,
    /// Period between pings
    pub ping_interval: Duration,
    /// Rate used when a client asks for none or an invalid one (Hz)
    pub default_update_rate: f64,
    /// Upper bound on any client's requested rate (Hz)
    pub max_update_rate: Option<f64>,
    /// Latency above which a warning is logged
    pub latency_warn: Duration,
    /// Latency above which the connection is closed
    pub latency_close: Duration,
    /// Delay after advertising a topic before the first publish
    pub publish_settle: Duration,
    /// Maximum number of concurrent connections
    pub max_connections: usize,
    /// Buffer size of each upstream feed
    pub feed_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            title: "topicboard".to_string(),
            reconcile_interval: Duration::from_secs(1),
            ping_interval: Duration::from_secs(5),
            default_update_rate: DEFAULT_UPDATE_RATE,
            max_update_rate: None,
            latency_warn: Duration::from_millis(1000),
            latency_close: Duration::from_millis(10000),
            publish_settle: Duration::from_millis(50),
            max_connections: 1000,
            feed_capacity: 64,
        }
    }
}

impl HubConfig {
    /// Minimum delivery interval for a requested rate
    ///
    /// Missing, zero, negative or non-finite rates fall back to the default
    /// rate, and an unusable configured default falls back to
    /// [`DEFAULT_UPDATE_RATE`]. Rates above the ceiling are clamped to it.
    /// Intervals longer than [`MAX_DELIVERY_INTERVAL`] are clamped to it.
    pub fn interval_for_rate(&self, rate: Option<f64>) -> Duration {
        let rate = match rate {
            Some(r) if r.is_finite() && r > 0.0 => r,
            _ => self.default_rate(),
        };
        let rate = match self.max_update_rate {
            Some(ceiling) if ceiling > 0.0 && rate > ceiling => ceiling,
            _ => rate,
        };
        match Duration::try_from_secs_f64(1.0 / rate) {
            Ok(interval) if interval <= MAX_DELIVERY_INTERVAL => interval,
            _ => {
                tracing::warn!(
                    rate,
                    max_interval_secs = MAX_DELIVERY_INTERVAL.as_secs(),
                    "Update rate too low, clamping delivery interval"
                );
                MAX_DELIVERY_INTERVAL
            }
        }
    }

    fn default_rate(&self) -> f64 {
        let rate = self.default_update_rate;
        if rate.is_finite() && rate > 0.0 {
            rate
        } else {
            tracing::warn!(
                configured = rate,
                fallback = DEFAULT_UPDATE_RATE,
                "Configured default update rate is unusable"
            );
            DEFAULT_UPDATE_RATE
        }
    }

    pub fn default_interval(&self) -> Duration {
        self.interval_for_rate(None)
    }
}

/// State guarded by the hub lock
pub(crate) struct HubState {
    pub(crate) registry: ConnectionRegistry,
    pub(crate) subscriptions: HashMap<String, LocalSubscription>,
    pub(crate) catalog: TopicCatalog,
}

impl HubState {
    /// Push the registry's global interval for a topic to its local subscription
    fn refresh_hint(&self, topic: &str) {
        if let (Some(subscription), Some(interval)) = (
            self.subscriptions.get(topic),
            self.registry.global_interval(topic),
        ) {
            subscription.set_hint(interval);
        }
    }

    /// Close a connection on the hub's initiative; no-op if already gone
    pub(crate) fn close_connection(&mut self, id: &str) -> bool {
        match self.registry.remove(id) {
            Some((mut connection, touched)) => {
                connection.begin_close();
                for topic in &touched {
                    self.refresh_hint(topic);
                }
                true
            }
            None => false,
        }
    }
}

/// Background tasks started by [`Hub::start`]
pub struct HubTasks {
    reconciler: JoinHandle<()>,
    pinger: JoinHandle<()>,
}

impl HubTasks {
    pub fn abort(&self) {
        self.reconciler.abort();
        self.pinger.abort();
    }
}

/// The fan-out hub shared by every connection
pub struct Hub {
    config: HubConfig,
    source: Arc<dyn DataSource>,
    virtual_topics: VirtualTopics,
    state: Mutex<HubState>,
    /// Serializes reconciliation passes
    reconcile_gate: Mutex<()>,
    /// Topic → type advertised for publishing
    publishers: Mutex<HashMap<String, String>>,
}

impl Hub {
    /// Create a new hub
    pub fn new(config: HubConfig, source: Arc<dyn DataSource>, virtual_topics: VirtualTopics) -> Self {
        let registry = ConnectionRegistry::new(config.max_connections);
        Self {
            config,
            source,
            virtual_topics,
            state: Mutex::new(HubState {
                registry,
                subscriptions: HashMap::new(),
                catalog: TopicCatalog::new(),
            }),
            reconcile_gate: Mutex::new(()),
            publishers: Mutex::new(HashMap::new()),
        }
    }

    /// Start the reconciliation and ping loops
    pub fn start(self: &Arc<Self>) -> HubTasks {
        tracing::info!(
            source = %self.source.name(),
            reconcile_interval_ms = self.config.reconcile_interval.as_millis() as u64,
            ping_interval_ms = self.config.ping_interval.as_millis() as u64,
            "Hub started"
        );
        HubTasks {
            reconciler: self.start_reconciler(),
            pinger: self.start_ping_loop(),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Register a new connection and greet it
    ///
    /// Returns the connection ID on success, or an error if the connection
    /// limit has been reached.
    pub async fn register(&self, sender: mpsc::UnboundedSender<Outbound>) -> HubResult<ConnectionId> {
        let greeting = ServerFrame::SystemInfo {
            hostname: self.config.title.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
        .to_json()?;

        let mut state = self.state.lock().await;
        let id = state
            .registry
            .insert(sender, self.config.default_interval())?;
        if let Some(connection) = state.registry.get(&id) {
            connection.send(Outbound::Frame(greeting.into()));
        }

        tracing::info!(
            connection_id = %id,
            connections = state.registry.len(),
            "Observer connected"
        );
        Ok(id)
    }

    /// Forget a connection and all of its interest; safe to call twice
    pub async fn unregister(&self, id: &str) {
        let mut state = self.state.lock().await;
        if let Some((connection, touched)) = state.registry.remove(id) {
            for topic in &touched {
                state.refresh_hint(topic);
            }
            tracing::info!(
                connection_id = %id,
                connected_secs = connection.connected_for().as_secs(),
                "Observer disconnected"
            );
        }
    }

    /// Close a connection on the hub's initiative
    pub async fn close_connection(&self, id: &str) -> bool {
        self.state.lock().await.close_connection(id)
    }

    /// Subscribe a connection to a topic
    ///
    /// Returns the minimum interval the connection will receive the topic at.
    pub async fn set_interest(
        &self,
        id: &str,
        topic: &str,
        max_update_rate: Option<f64>,
    ) -> HubResult<Duration> {
        let interval = self.config.interval_for_rate(max_update_rate);
        let mut state = self.state.lock().await;
        state.registry.set_interest(id, topic, interval)?;
        state.refresh_hint(topic);

        tracing::debug!(
            connection_id = %id,
            topic = %topic,
            min_interval_ms = interval.as_secs_f64() * 1000.0,
            "Subscribed"
        );
        Ok(interval)
    }

    /// Unsubscribe a connection from a topic; no-op if not subscribed
    pub async fn clear_interest(&self, id: &str, topic: &str) -> bool {
        let mut state = self.state.lock().await;
        let removed = state.registry.clear_interest(id, topic);
        if removed {
            state.refresh_hint(topic);
            tracing::debug!(connection_id = %id, topic = %topic, "Unsubscribed");
        }
        removed
    }

    /// Stop background work and release every upstream feed
    pub async fn shutdown(&self, tasks: HubTasks) {
        tasks.abort();
        self.close_all_subscriptions().await;

        let mut state = self.state.lock().await;
        for connection in state.registry.connections_mut() {
            connection.begin_close();
        }
        tracing::info!("Hub stopped");
    }

    pub async fn connection_count(&self) -> usize {
        self.state.lock().await.registry.len()
    }

    /// Number of open upstream subscriptions
    pub async fn subscription_count(&self) -> usize {
        self.state.lock().await.subscriptions.len()
    }

    pub async fn subscriber_count(&self, topic: &str) -> usize {
        self.state.lock().await.registry.subscriber_count(topic)
    }

    pub async fn has_local_subscription(&self, topic: &str) -> bool {
        self.state.lock().await.subscriptions.contains_key(topic)
    }

    /// Throttle hint currently applied to a topic's upstream feed
    pub async fn subscription_hint(&self, topic: &str) -> Option<Duration> {
        let state = self.state.lock().await;
        state.subscriptions.get(topic).map(LocalSubscription::hint)
    }

    pub async fn connection_latency(&self, id: &str) -> Option<f64> {
        let state = self.state.lock().await;
        state.registry.get(id).and_then(Connection::latency_ms)
    }

    /// Last known topic catalog
    pub async fn catalog(&self) -> TopicCatalog {
        self.state.lock().await.catalog.clone()
    }

    /// Last known catalog with the subscriber count of each topic
    pub async fn topic_summary(&self) -> Vec<(String, String, usize)> {
        let state = self.state.lock().await;
        state
            .catalog
            .iter()
            .map(|(topic, type_id)| {
                let subscribers = state.registry.subscriber_count(topic);
                (topic.clone(), type_id.clone(), subscribers)
            })
            .collect()
    }

    /// Whether the data source currently answers
    pub async fn source_available(&self) -> bool {
        self.source.list_topics().await.is_ok()
    }
}
