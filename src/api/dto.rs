//! Data Transfer Objects
//!
//! Response types for the HTTP endpoints.

use serde::Serialize;

/// Full health status
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "healthy" or "degraded"
    pub status: String,
    /// Data source reachability: "ok" or "error"
    pub source: String,
    /// Open observer connections
    pub connections: usize,
    /// Open upstream subscriptions
    pub subscriptions: usize,
    pub uptime_seconds: u64,
    pub version: String,
}

/// One entry of the topic listing
#[derive(Debug, Serialize)]
pub struct TopicInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub type_id: String,
    /// Connections currently subscribed
    pub subscribers: usize,
}

/// Topic listing
#[derive(Debug, Serialize)]
pub struct TopicsResponse {
    pub topics: Vec<TopicInfo>,
    pub total: usize,
}
