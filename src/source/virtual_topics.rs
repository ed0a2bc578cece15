//! Virtual Topics
//!
//! Reserved topic names that never appear in the source catalog. Each one is
//! bound to a built-in feed that samples the host on its own schedule.

use std::collections::HashMap;
use std::time::Duration;
use sysinfo::{ProcessesToUpdate, System, Users};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::FeedItem;
use crate::codec::{FieldValue, Message};

pub const SYSTEM_STATS_TOPIC: &str = "_system_stats";
pub const PROCESS_LIST_TOPIC: &str = "_top";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
const MAX_PROCESSES: usize = 100;
const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// A synthetic feed producing one message per sample
pub trait VirtualFeed: Send {
    fn type_id(&self) -> &'static str;

    fn poll_interval(&self) -> Duration {
        DEFAULT_POLL_INTERVAL
    }

    fn sample(&mut self) -> Message;
}

pub type VirtualFeedFactory = Box<dyn Fn() -> Box<dyn VirtualFeed> + Send + Sync>;

/// A running virtual feed
pub struct VirtualFeedHandle {
    pub type_id: String,
    pub items: mpsc::Receiver<FeedItem>,
    pub task: JoinHandle<()>,
}

/// Reserved topic name → feed factory
#[derive(Default)]
pub struct VirtualTopics {
    factories: HashMap<String, VirtualFeedFactory>,
}

impl VirtualTopics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the host statistics and process list feeds
    pub fn builtin() -> Self {
        let mut topics = Self::new();
        topics.register(SYSTEM_STATS_TOPIC, || Box::new(SystemStatsFeed::new()));
        topics.register(PROCESS_LIST_TOPIC, || Box::new(ProcessListFeed::new()));
        topics
    }

    pub fn register<F>(&mut self, topic: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn VirtualFeed> + Send + Sync + 'static,
    {
        self.factories.insert(topic.into(), Box::new(factory));
    }

    pub fn is_virtual(&self, topic: &str) -> bool {
        self.factories.contains_key(topic)
    }

    /// Start the feed bound to `topic`
    ///
    /// Samples are taken every `max(poll_interval, hint)`, re-read whenever
    /// the hint changes. Must be called from within a tokio runtime.
    pub fn open(
        &self,
        topic: &str,
        mut hint: watch::Receiver<Duration>,
        capacity: usize,
    ) -> Option<VirtualFeedHandle> {
        let factory = self.factories.get(topic)?;
        let mut feed = factory();
        let type_id = feed.type_id().to_string();
        let poll_interval = feed.poll_interval();
        let (tx, items) = mpsc::channel(capacity.max(1));

        let task_topic = topic.to_string();
        let task = tokio::spawn(async move {
            let mut last_sample: Option<Instant> = None;
            loop {
                let period = poll_interval.max(*hint.borrow_and_update());
                let due = last_sample.map_or_else(Instant::now, |t| t + period);
                tokio::select! {
                    _ = tokio::time::sleep_until(due) => {}
                    changed = hint.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                }

                last_sample = Some(Instant::now());
                let message = feed.sample();
                if tx.send(FeedItem::new(message)).await.is_err() {
                    tracing::debug!(topic = %task_topic, "Virtual feed receiver dropped");
                    break;
                }
            }
        });

        Some(VirtualFeedHandle {
            type_id,
            items,
            task,
        })
    }
}

/// Host CPU, memory and load statistics
pub struct SystemStatsFeed {
    system: System,
}

impl SystemStatsFeed {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        system.refresh_memory();
        Self { system }
    }
}

impl Default for SystemStatsFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualFeed for SystemStatsFeed {
    fn type_id(&self) -> &'static str {
        "rosboard_msgs/msg/SystemStats"
    }

    fn sample(&mut self) -> Message {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();

        let per_cpu: Vec<FieldValue> = self
            .system
            .cpus()
            .iter()
            .map(|cpu| FieldValue::Float(cpu.cpu_usage() as f64))
            .collect();
        let load = System::load_average();

        Message::new(self.type_id())
            .with("cpu_percent", FieldValue::Array(per_cpu))
            .with("cpu_total", self.system.global_cpu_usage() as f64)
            .with("mem_used_mb", self.system.used_memory() as f64 / BYTES_PER_MB)
            .with("mem_total_mb", self.system.total_memory() as f64 / BYTES_PER_MB)
            .with("swap_used_mb", self.system.used_swap() as f64 / BYTES_PER_MB)
            .with("swap_total_mb", self.system.total_swap() as f64 / BYTES_PER_MB)
            .with("load_1", load.one)
            .with("load_5", load.five)
            .with("load_15", load.fifteen)
            .with("uptime", System::uptime())
    }
}

/// Process list sorted by CPU usage
pub struct ProcessListFeed {
    system: System,
    users: Users,
}

impl ProcessListFeed {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        system.refresh_processes(ProcessesToUpdate::All, true);
        Self {
            system,
            users: Users::new_with_refreshed_list(),
        }
    }
}

impl Default for ProcessListFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualFeed for ProcessListFeed {
    fn type_id(&self) -> &'static str {
        "rosboard_msgs/msg/ProcessList"
    }

    fn sample(&mut self) -> Message {
        self.system.refresh_memory();
        self.system.refresh_processes(ProcessesToUpdate::All, true);

        let total_memory = self.system.total_memory().max(1) as f64;
        let mut rows: Vec<_> = self.system.processes().values().collect();
        rows.sort_by(|a, b| b.cpu_usage().total_cmp(&a.cpu_usage()));

        let processes = rows
            .into_iter()
            .take(MAX_PROCESSES)
            .map(|p| {
                let user = p
                    .user_id()
                    .and_then(|uid| self.users.get_user_by_id(uid))
                    .map(|u| u.name().to_string())
                    .unwrap_or_default();
                FieldValue::Message(
                    Message::new("rosboard_msgs/msg/Process")
                        .with("pid", p.pid().as_u32() as u64)
                        .with("user", user)
                        .with("cpu", p.cpu_usage() as f64)
                        .with("mem", p.memory() as f64 / total_memory * 100.0)
                        .with("command", p.name().to_string_lossy().into_owned()),
                )
            })
            .collect::<Vec<_>>();

        Message::new(self.type_id()).with("processes", FieldValue::Array(processes))
    }
}
