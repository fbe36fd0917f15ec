//! Job queue adapter: publishes conversion tasks to a broker and records the
//! matching `queued` job row.

pub mod memory;
pub mod redis_streams;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::db::{job_repo, Database};
use crate::error::{DeckforgeError, QueueError};

pub use memory::MemoryBroker;
pub use redis_streams::RedisBroker;

/// Stream field carrying the JSON-encoded task.
pub const PAYLOAD_FIELD: &str = "payload";

/// Unit of work carried by the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionTask {
    pub presentation_id: i64,
    pub filename: String,
}

impl ConversionTask {
    pub fn new(presentation_id: i64, filename: impl Into<String>) -> Self {
        Self {
            presentation_id,
            filename: filename.into(),
        }
    }

    /// Field/value pairs written to the broker. The task is stored as JSON
    /// under [`PAYLOAD_FIELD`]; the presentation id is duplicated for
    /// operators inspecting the stream.
    pub fn to_fields(&self) -> Result<Vec<(&'static str, String)>, QueueError> {
        let payload = serde_json::to_string(self).map_err(|e| QueueError::Payload(e.to_string()))?;
        Ok(vec![
            ("presentation_id", self.presentation_id.to_string()),
            (PAYLOAD_FIELD, payload),
        ])
    }

    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self, QueueError> {
        let payload = fields
            .get(PAYLOAD_FIELD)
            .ok_or_else(|| QueueError::Payload(format!("missing '{}' field", PAYLOAD_FIELD)))?;
        serde_json::from_str(payload).map_err(|e| QueueError::Payload(e.to_string()))
    }
}

/// A received task plus its broker-assigned id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: String,
    pub task: ConversionTask,
}

/// Message broker seam.
pub trait QueueBroker: Send + Sync {
    fn name(&self) -> &'static str;

    /// Publishes a task and returns the broker-assigned id.
    fn publish(&self, task: &ConversionTask) -> Result<String, QueueError>;

    /// Waits up to `timeout` for the next task. `Ok(None)` on timeout.
    fn receive(&self, timeout: Duration) -> Result<Option<Delivery>, QueueError>;

    /// Marks a delivery as processed.
    fn acknowledge(&self, delivery_id: &str) -> Result<(), QueueError>;
}

#[derive(Clone)]
pub struct QueueAdapter {
    broker: Arc<dyn QueueBroker>,
    db: Database,
}

impl QueueAdapter {
    pub fn new(broker: Arc<dyn QueueBroker>, db: Database) -> Self {
        Self { broker, db }
    }

    pub fn broker(&self) -> &Arc<dyn QueueBroker> {
        &self.broker
    }

    /// Publishes the task, then records a `queued` row carrying the broker
    /// id. If a worker already picked the task up and created the row, the
    /// insert is skipped.
    pub fn enqueue_conversion(
        &self,
        presentation_id: i64,
        filename: &str,
    ) -> Result<String, DeckforgeError> {
        let task = ConversionTask::new(presentation_id, filename);
        let job_id = self.broker.publish(&task)?;

        match job_repo::insert_queued(&self.db, presentation_id, &job_id)? {
            Some(job) => log::info!(
                "Queued conversion job {} (row {}) for presentation {} on {}",
                job_id,
                job.id,
                presentation_id,
                self.broker.name()
            ),
            None => log::debug!("Job {} already recorded by a worker", job_id),
        }

        Ok(job_id)
    }
}
