//! Subscription Reconciler
//!
//! Keeps exactly one upstream feed open per topic that some connection is
//! interested in, and none for the rest. Each pass also republishes the topic
//! catalog.
//!
//! A pass plans under the state lock, performs data source I/O without it and
//! installs the result under the lock again. Passes never overlap.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::broadcaster::{throttle_allows, TopicPayload, UPSTREAM_TOLERANCE};
use super::Hub;
use crate::source::{FeedId, FeedItem, TopicCatalog};

/// Where a local subscription's messages come from
#[derive(Debug)]
enum FeedKind {
    Source(FeedId),
    Virtual(JoinHandle<()>),
    /// The type could not be resolved; nothing is delivered
    Placeholder,
}

/// The hub's single upstream subscription for a topic
#[derive(Debug)]
pub(crate) struct LocalSubscription {
    type_id: String,
    kind: FeedKind,
    /// Global throttle hint, watched by the pump and any virtual feed task
    hint: watch::Sender<Duration>,
    pump: Option<JoinHandle<()>>,
}

impl LocalSubscription {
    fn placeholder(type_id: &str) -> Self {
        Self {
            type_id: type_id.to_string(),
            kind: FeedKind::Placeholder,
            hint: watch::channel(Duration::ZERO).0,
            pump: None,
        }
    }

    pub fn type_id(&self) -> &str {
        &self.type_id
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self.kind, FeedKind::Placeholder)
    }

    pub fn hint(&self) -> Duration {
        *self.hint.borrow()
    }

    pub fn set_hint(&self, interval: Duration) {
        self.hint.send_replace(interval);
    }
}

/// What one reconciliation pass did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub opened: Vec<String>,
    pub closed: Vec<String>,
    /// Topics whose type could not be resolved
    pub placeholders: Vec<String>,
    /// Topics with interest but absent from the catalog
    pub skipped: Vec<String>,
    /// Topics whose feed failed to open; retried next pass
    pub failed: Vec<String>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.opened.is_empty()
            && self.closed.is_empty()
            && self.placeholders.is_empty()
            && self.failed.is_empty()
    }
}

impl Hub {
    /// Run one reconciliation pass
    pub async fn reconcile(self: &Arc<Self>) -> ReconcileReport {
        let _gate = self.reconcile_gate.lock().await;
        let mut report = ReconcileReport::default();

        let listed = self.source.list_topics().await;
        let catalog = {
            let mut state = self.state.lock().await;
            match listed {
                Ok(catalog) => state.catalog = catalog,
                Err(e) => {
                    tracing::warn!(
                        source = %self.source.name(),
                        error = %e,
                        "Failed to list topics, using last known catalog"
                    );
                }
            }
            state.catalog.clone()
        };
        self.broadcast_catalog(&catalog).await;

        // Plan
        let (to_open, to_close) = {
            let mut state = self.state.lock().await;
            let to_open: Vec<(String, Duration)> = state
                .registry
                .topics_with_interest()
                .filter(|topic| !state.subscriptions.contains_key(*topic))
                .map(|topic| {
                    let hint = state
                        .registry
                        .global_interval(topic)
                        .unwrap_or_else(|| self.config.default_interval());
                    (topic.clone(), hint)
                })
                .collect();

            let stale: Vec<String> = state
                .subscriptions
                .keys()
                .filter(|topic| !state.registry.has_interest(topic))
                .cloned()
                .collect();
            let to_close: Vec<(String, LocalSubscription)> = stale
                .into_iter()
                .filter_map(|topic| {
                    let subscription = state.subscriptions.remove(&topic)?;
                    Some((topic, subscription))
                })
                .collect();
            (to_open, to_close)
        };

        for (topic, subscription) in to_close {
            self.shutdown_subscription(&topic, subscription).await;
            report.closed.push(topic);
        }

        for (topic, hint) in to_open {
            let Some(subscription) = self.open_subscription(&topic, hint, &catalog, &mut report).await
            else {
                continue;
            };
            let placeholder = subscription.is_placeholder();
            let type_id = subscription.type_id().to_string();

            // Install, unless interest vanished while the feed was opening
            let leftover = {
                let mut state = self.state.lock().await;
                if state.registry.has_interest(&topic) && !state.subscriptions.contains_key(&topic) {
                    if let Some(interval) = state.registry.global_interval(&topic) {
                        subscription.set_hint(interval);
                    }
                    state.subscriptions.insert(topic.clone(), subscription);
                    None
                } else {
                    Some(subscription)
                }
            };

            match leftover {
                Some(subscription) => {
                    tracing::debug!(topic = %topic, "Interest withdrawn while opening feed");
                    self.shutdown_subscription(&topic, subscription).await;
                }
                None if placeholder => {
                    let error = format!(
                        "Could not load message type '{}'. Is its schema registered?",
                        type_id
                    );
                    self.broadcast_topic_data(&topic, &type_id, TopicPayload::Error(error))
                        .await;
                    report.placeholders.push(topic);
                }
                None => report.opened.push(topic),
            }
        }

        if !report.is_noop() {
            tracing::info!(
                opened = ?report.opened,
                closed = ?report.closed,
                placeholders = ?report.placeholders,
                failed = ?report.failed,
                "Subscriptions reconciled"
            );
        }
        report
    }

    async fn open_subscription(
        self: &Arc<Self>,
        topic: &str,
        hint: Duration,
        catalog: &TopicCatalog,
        report: &mut ReconcileReport,
    ) -> Option<LocalSubscription> {
        if self.virtual_topics.is_virtual(topic) {
            let (hint_tx, hint_rx) = watch::channel(hint);
            let handle = self
                .virtual_topics
                .open(topic, hint_rx.clone(), self.config.feed_capacity)?;
            let pump = self.spawn_pump(topic, &handle.type_id, handle.items, hint_rx);
            return Some(LocalSubscription {
                type_id: handle.type_id,
                kind: FeedKind::Virtual(handle.task),
                hint: hint_tx,
                pump: Some(pump),
            });
        }

        let Some(type_id) = catalog.get(topic) else {
            tracing::warn!(topic = %topic, "Subscribed topic is not in the catalog, skipping");
            report.skipped.push(topic.to_string());
            return None;
        };

        if let Err(e) = self.source.resolve_schema(type_id) {
            tracing::warn!(topic = %topic, type_id = %type_id, error = %e, "Cannot resolve topic type");
            return Some(LocalSubscription::placeholder(type_id));
        }

        match self.source.subscribe(topic, type_id, hint).await {
            Ok(feed) => {
                let (hint_tx, hint_rx) = watch::channel(hint);
                let pump = self.spawn_pump(topic, type_id, feed.items, hint_rx);
                Some(LocalSubscription {
                    type_id: type_id.clone(),
                    kind: FeedKind::Source(feed.id),
                    hint: hint_tx,
                    pump: Some(pump),
                })
            }
            Err(e) => {
                tracing::warn!(
                    source = %self.source.name(),
                    topic = %topic,
                    error = %e,
                    "Failed to open feed"
                );
                report.failed.push(topic.to_string());
                None
            }
        }
    }

    async fn shutdown_subscription(&self, topic: &str, subscription: LocalSubscription) {
        if let Some(pump) = subscription.pump {
            pump.abort();
        }
        match subscription.kind {
            FeedKind::Source(id) => {
                if let Err(e) = self.source.unsubscribe(id).await {
                    tracing::warn!(topic = %topic, error = %e, "Failed to close feed");
                }
            }
            FeedKind::Virtual(task) => task.abort(),
            FeedKind::Placeholder => {}
        }
        tracing::debug!(topic = %topic, "Local subscription closed");
    }

    /// Forward feed items to the broadcaster, throttled by the global hint
    fn spawn_pump(
        self: &Arc<Self>,
        topic: &str,
        type_id: &str,
        mut items: mpsc::Receiver<FeedItem>,
        hint: watch::Receiver<Duration>,
    ) -> JoinHandle<()> {
        let hub = Arc::downgrade(self);
        let topic = topic.to_string();
        let type_id = type_id.to_string();

        tokio::spawn(async move {
            let mut last_delivery: Option<Instant> = None;
            while let Some(item) = items.recv().await {
                let now = Instant::now();
                let min_interval = *hint.borrow();
                if !throttle_allows(last_delivery, min_interval, UPSTREAM_TOLERANCE, now) {
                    continue;
                }
                let Some(hub) = hub.upgrade() else { break };
                last_delivery = Some(now);
                hub.broadcast_topic_data_at(&topic, &type_id, TopicPayload::Message(item), now)
                    .await;
            }
            tracing::trace!(topic = %topic, "Feed pump finished");
        })
    }

    /// Start the periodic reconciliation loop
    pub fn start_reconciler(self: &Arc<Self>) -> JoinHandle<()> {
        let hub = Arc::downgrade(self);
        let period = self.config.reconcile_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(hub) = hub.upgrade() else { break };
                hub.reconcile().await;
            }
        })
    }

    /// Close every local subscription
    pub async fn close_all_subscriptions(&self) {
        let subscriptions: HashMap<String, LocalSubscription> = {
            let mut state = self.state.lock().await;
            std::mem::take(&mut state.subscriptions)
        };
        for (topic, subscription) in subscriptions {
            self.shutdown_subscription(&topic, subscription).await;
        }
    }
}
