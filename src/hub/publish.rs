//! Publish Gateway
//!
//! Turns a client's JSON message into a structured message and hands it to
//! the data source. The first publish on a topic advertises it and waits a
//! short settle delay so downstream subscribers can connect.

use serde_json::Value;

use super::error::HubResult;
use super::Hub;
use crate::codec::{decode, stamp_header, Time};

impl Hub {
    /// Publish a client-supplied message on a topic
    ///
    /// Fields missing from `tree` keep their defaults and unknown fields are
    /// ignored. A header stamp, if the type has one, is set to the current time.
    pub async fn publish(&self, topic: &str, type_id: &str, tree: &Value) -> HubResult<()> {
        let schema = self.source.resolve_schema(type_id)?;
        let mut message = decode(&*self.source, &schema.type_id, tree)?;
        if stamp_header(&*self.source, &schema, &mut message, Time::now()) {
            tracing::trace!(topic = %topic, "Stamped header with current time");
        }

        self.ensure_advertised(topic, &schema.type_id).await?;
        self.source.publish(topic, &schema.type_id, message).await?;

        tracing::debug!(topic = %topic, type_id = %schema.type_id, "Published client message");
        Ok(())
    }

    async fn ensure_advertised(&self, topic: &str, type_id: &str) -> HubResult<()> {
        let mut publishers = self.publishers.lock().await;
        if publishers.get(topic).map_or(false, |t| t == type_id) {
            return Ok(());
        }

        self.source.advertise(topic, type_id).await?;
        publishers.insert(topic.to_string(), type_id.to_string());
        tracing::info!(topic = %topic, type_id = %type_id, "Advertised topic");

        // Later publishes on this topic wait behind the lock until settled
        if !self.config.publish_settle.is_zero() {
            tokio::time::sleep(self.config.publish_settle).await;
        }
        Ok(())
    }
}
