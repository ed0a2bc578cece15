//! Latency Monitor
//!
//! Every connection is pinged on a fixed schedule. A pong carries the ping's
//! sequence number back; half the round trip is the connection's latency.
//! Slow connections are warned about, very slow ones are closed.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::registry::Outbound;
use super::Hub;
use crate::websocket::ServerFrame;

/// Number of outstanding pings remembered per connection
pub const PING_RING_SIZE: usize = 1024;

/// What a pong turned out to be
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PongOutcome {
    /// One-way latency in milliseconds
    Measured(f64),
    /// Unknown, future or overwritten sequence number
    Stale,
}

/// How a measured latency compares to the configured limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencyVerdict {
    Healthy,
    High,
    Excessive,
}

/// Classify a latency against the warn and close thresholds
pub fn classify(latency_ms: f64, warn: Duration, close: Duration) -> LatencyVerdict {
    let ms = |d: Duration| d.as_secs_f64() * 1000.0;
    if latency_ms > ms(close) {
        LatencyVerdict::Excessive
    } else if latency_ms > ms(warn) {
        LatencyVerdict::High
    } else {
        LatencyVerdict::Healthy
    }
}

/// Ring buffer of ping send times, indexed by sequence number
#[derive(Debug)]
pub struct PingTracker {
    sent: Vec<Option<Instant>>,
    next_seq: u64,
    latency_ms: Option<f64>,
}

impl PingTracker {
    pub fn new() -> Self {
        Self {
            sent: vec![None; PING_RING_SIZE],
            next_seq: 0,
            latency_ms: None,
        }
    }

    /// Record a ping sent at `now` and return its sequence number
    pub fn record_ping(&mut self, now: Instant) -> u64 {
        let seq = self.next_seq;
        self.sent[slot(seq)] = Some(now);
        self.next_seq += 1;
        seq
    }

    /// Match a pong against the ring
    pub fn record_pong(&mut self, seq: u64, now: Instant) -> PongOutcome {
        if seq >= self.next_seq || self.next_seq - seq > PING_RING_SIZE as u64 {
            return PongOutcome::Stale;
        }
        let Some(sent) = self.sent[slot(seq)] else {
            return PongOutcome::Stale;
        };

        let latency = now.saturating_duration_since(sent).as_secs_f64() * 1000.0 / 2.0;
        self.latency_ms = Some(latency);
        PongOutcome::Measured(latency)
    }

    /// Most recent latency measurement
    pub fn latency_ms(&self) -> Option<f64> {
        self.latency_ms
    }

    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }
}

impl Default for PingTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn slot(seq: u64) -> usize {
    (seq % PING_RING_SIZE as u64) as usize
}

impl Hub {
    /// Send one ping to every open connection
    ///
    /// Returns the number of pings queued.
    pub async fn send_pings(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let mut sent = 0;

        for connection in state.registry.connections_mut() {
            if connection.is_closing() {
                continue;
            }
            let seq = connection.pings.record_ping(now);
            match (ServerFrame::Ping { seq }).to_json() {
                Ok(text) => {
                    if connection.send(Outbound::Frame(text.into())) {
                        sent += 1;
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Failed to encode ping"),
            }
        }

        tracing::trace!(pings = sent, "Pings sent");
        sent
    }

    /// Handle a pong from a connection
    ///
    /// Returns the measured latency in milliseconds, or None for stale pongs
    /// and unknown connections.
    pub async fn handle_pong(&self, id: &str, seq: u64) -> Option<f64> {
        self.handle_pong_at(id, seq, Instant::now()).await
    }

    pub(crate) async fn handle_pong_at(&self, id: &str, seq: u64, now: Instant) -> Option<f64> {
        let mut state = self.state.lock().await;
        let connection = state.registry.get_mut(id)?;

        let latency = match connection.pings.record_pong(seq, now) {
            PongOutcome::Measured(latency) => latency,
            PongOutcome::Stale => {
                tracing::debug!(connection_id = %id, seq, "Ignoring stale pong");
                return None;
            }
        };

        match classify(latency, self.config.latency_warn, self.config.latency_close) {
            LatencyVerdict::Healthy => {
                tracing::trace!(connection_id = %id, latency_ms = latency, "Pong");
            }
            LatencyVerdict::High => {
                tracing::warn!(connection_id = %id, latency_ms = latency, "High connection latency");
            }
            LatencyVerdict::Excessive => {
                tracing::error!(
                    connection_id = %id,
                    latency_ms = latency,
                    "Connection latency too high, closing"
                );
                state.close_connection(id);
            }
        }
        Some(latency)
    }

    /// Start the periodic ping loop
    pub fn start_ping_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let hub = Arc::downgrade(self);
        let period = self.config.ping_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(hub) = hub.upgrade() else { break };
                hub.send_pings().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::test_support::{drain, hub_with_source};
    use tokio::sync::mpsc;

    #[test]
    fn test_classify() {
        let warn = Duration::from_millis(1000);
        let close = Duration::from_millis(10000);
        assert_eq!(classify(20.0, warn, close), LatencyVerdict::Healthy);
        assert_eq!(classify(1000.0, warn, close), LatencyVerdict::Healthy);
        assert_eq!(classify(1500.0, warn, close), LatencyVerdict::High);
        assert_eq!(classify(10001.0, warn, close), LatencyVerdict::Excessive);
    }

    #[test]
    fn test_tracker_measures_half_round_trip() {
        let mut tracker = PingTracker::new();
        let start = Instant::now();
        for _ in 0..5 {
            tracker.record_ping(start);
        }
        let seq = tracker.record_ping(start);
        assert_eq!(seq, 5);

        let outcome = tracker.record_pong(5, start + Duration::from_millis(40));
        assert_eq!(outcome, PongOutcome::Measured(20.0));
        assert_eq!(tracker.latency_ms(), Some(20.0));
    }

    #[test]
    fn test_tracker_discards_stale_pongs() {
        let mut tracker = PingTracker::new();
        let start = Instant::now();

        // Nothing sent yet
        assert_eq!(tracker.record_pong(0, start), PongOutcome::Stale);

        tracker.record_ping(start);
        // Future sequence number
        assert_eq!(tracker.record_pong(3, start), PongOutcome::Stale);

        for _ in 0..PING_RING_SIZE {
            tracker.record_ping(start);
        }
        // Slot for seq 0 has been overwritten
        assert_eq!(tracker.record_pong(0, start), PongOutcome::Stale);
        assert!(matches!(tracker.record_pong(1, start), PongOutcome::Measured(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pong_sets_latency() {
        let (hub, _source) = hub_with_source();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = hub.register(tx).await.unwrap();

        for _ in 0..6 {
            hub.send_pings().await;
        }
        let frames = drain(&mut rx);
        assert!(frames.iter().any(|f| f == r#"["p",{"s":5}]"#));

        tokio::time::sleep(Duration::from_millis(40)).await;
        let latency = hub.handle_pong(&id, 5).await.unwrap();
        assert!((latency - 20.0).abs() < 1e-6);
        assert_eq!(hub.connection_latency(&id).await, Some(latency));
    }

    #[tokio::test(start_paused = true)]
    async fn test_excessive_latency_closes_connection() {
        let (hub, _source) = hub_with_source();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = hub.register(tx).await.unwrap();
        hub.set_interest(&id, "/imu", None).await.unwrap();

        hub.send_pings().await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        let latency = hub.handle_pong(&id, 0).await.unwrap();
        assert!(latency > 10000.0);

        assert_eq!(hub.connection_count().await, 0);
        assert_eq!(hub.subscriber_count("/imu").await, 0);

        let mut saw_close = false;
        while let Ok(outbound) = rx.try_recv() {
            saw_close |= outbound == Outbound::Close;
        }
        assert!(saw_close);

        // A late pong after eviction is ignored
        assert_eq!(hub.handle_pong(&id, 0).await, None);
    }

    #[tokio::test]
    async fn test_ping_skips_closing_connections() {
        let (hub, _source) = hub_with_source();
        let (tx, rx) = mpsc::unbounded_channel();
        hub.register(tx).await.unwrap();
        drop(rx);

        assert_eq!(hub.send_pings().await, 0);
    }
}
