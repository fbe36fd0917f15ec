//! In-process broker for single-process deployments and tests.

use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use super::{ConversionTask, Delivery, QueueBroker};
use crate::error::QueueError;

pub struct MemoryBroker {
    sender: Sender<Delivery>,
    receiver: Receiver<Delivery>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    /// Tasks published but not yet received.
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueBroker for MemoryBroker {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn publish(&self, task: &ConversionTask) -> Result<String, QueueError> {
        let id = uuid::Uuid::new_v4().to_string();
        self.sender
            .send(Delivery {
                id: id.clone(),
                task: task.clone(),
            })
            .map_err(|_| QueueError::Closed)?;
        Ok(id)
    }

    fn receive(&self, timeout: Duration) -> Result<Option<Delivery>, QueueError> {
        match self.receiver.recv_timeout(timeout) {
            Ok(delivery) => Ok(Some(delivery)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(QueueError::Closed),
        }
    }

    fn acknowledge(&self, _delivery_id: &str) -> Result<(), QueueError> {
        Ok(())
    }
}
