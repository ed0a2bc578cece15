//! Topic Routes
//!
//! - GET /api/v1/topics - Last known topic catalog with subscriber counts
//! - GET /api/v1/topics/*name - One topic of the catalog

use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;

use crate::api::dto::{TopicInfo, TopicsResponse};
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;

/// GET /api/v1/topics
pub async fn list_topics(State(state): State<Arc<AppState>>) -> Json<TopicsResponse> {
    let topics: Vec<TopicInfo> = state
        .hub
        .topic_summary()
        .await
        .into_iter()
        .map(|(name, type_id, subscribers)| TopicInfo {
            name,
            type_id,
            subscribers,
        })
        .collect();

    let total = topics.len();
    Json(TopicsResponse { topics, total })
}

/// GET /api/v1/topics/*name
///
/// The path holds the topic name without its leading slash.
pub async fn get_topic(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<TopicInfo>> {
    let topic = format!("/{}", name.trim_start_matches('/'));
    state
        .hub
        .topic_summary()
        .await
        .into_iter()
        .find(|(name, _, _)| *name == topic)
        .map(|(name, type_id, subscribers)| {
            Json(TopicInfo {
                name,
                type_id,
                subscribers,
            })
        })
        .ok_or_else(|| ApiError::NotFound(format!("Topic {} not found", topic)))
}
