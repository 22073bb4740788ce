//! Resilient delivery of normalized reports to the broker.
//!
//! - [`DeliveryQueue`] - FIFO buffer with head re-insertion on failed sends
//! - [`Publisher`] - broker session lifecycle plus retry/backoff around whole batches
//! - [`BrokerClient`] - the publish seam, implemented by [`KafkaBroker`] and [`MemoryBroker`]

mod broker;
mod kafka;
mod memory;
mod publisher;
mod queue;

pub use broker::{BrokerClient, BrokerError};
pub use kafka::{KafkaBroker, KafkaSettings};
pub use memory::{MemoryBroker, SentMessage};
pub use publisher::{
    BatchOutcome, PublishError, Publisher, RetryPolicy, DEFAULT_BACKOFF_BASE, DEFAULT_MAX_ATTEMPTS,
};
pub use queue::{DeliveryQueue, EnqueueError, QueuedMessage, MAX_MESSAGE_BYTES};
