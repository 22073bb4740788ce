use super::broker::{BrokerClient, BrokerError};
use crate::report::{Category, NormalizedReport};
use std::collections::VecDeque;
use thiserror::Error;

/// Largest serialized message accepted for delivery (200 MiB).
pub const MAX_MESSAGE_BYTES: usize = 200 * 1024 * 1024;

/// Why a report was refused by [`DeliveryQueue::enqueue`].
#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error("Message of {size} bytes exceeds the {limit} byte limit")]
    Oversize { size: usize, limit: usize },
    #[error("Failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A serialized report waiting to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage {
    category: Category,
    payload: Vec<u8>,
}

impl QueuedMessage {
    pub fn category(&self) -> Category {
        self.category
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// Ordered buffer of outbound messages.
///
/// Draining is strictly FIFO. A message leaves the queue only once the broker
/// acknowledged it; a failed send puts it back at the head and stops the
/// drain, so nothing behind it is attempted until the next drain.
#[derive(Debug)]
pub struct DeliveryQueue {
    messages: VecDeque<QueuedMessage>,
    max_message_bytes: usize,
}

impl Default for DeliveryQueue {
    fn default() -> Self {
        Self::new(MAX_MESSAGE_BYTES)
    }
}

impl DeliveryQueue {
    pub fn new(max_message_bytes: usize) -> Self {
        Self {
            messages: VecDeque::new(),
            max_message_bytes,
        }
    }

    /// Serializes `report` and appends it to the tail.
    ///
    /// Oversized reports are refused and never enter the queue.
    pub fn enqueue(&mut self, report: &NormalizedReport) -> Result<(), EnqueueError> {
        let payload = report.to_json_bytes()?;
        if payload.len() > self.max_message_bytes {
            return Err(EnqueueError::Oversize {
                size: payload.len(),
                limit: self.max_message_bytes,
            });
        }
        self.messages.push_back(QueuedMessage {
            category: report.category(),
            payload,
        });
        Ok(())
    }

    /// Sends queued messages head first until the queue is empty or a send fails.
    ///
    /// Returns the number of messages delivered. The head is removed only after
    /// the broker acknowledged it, so a failed send, or a drain that is dropped
    /// mid-send, leaves it at the head.
    pub async fn drain(
        &mut self,
        broker: &dyn BrokerClient,
        topic: &str,
    ) -> Result<usize, BrokerError> {
        let mut delivered = 0;
        while let Some(message) = self.messages.front() {
            broker.send(topic, &message.payload).await?;
            self.messages.pop_front();
            delivered += 1;
        }
        Ok(delivered)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedMessage> {
        self.messages.iter()
    }
}
