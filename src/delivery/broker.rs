use async_trait::async_trait;
use thiserror::Error;

/// Client-level broker failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("Failed to connect to broker: {0}")]
    Connect(String),
    #[error("Failed to deliver message: {0}")]
    Send(String),
    #[error("Failed to disconnect from broker: {0}")]
    Disconnect(String),
    #[error("Broker client is not connected")]
    NotConnected,
}

/// Topic-based publish interface the [`Publisher`](super::Publisher) drives.
///
/// One call to [`send`](BrokerClient::send) delivers one independently
/// serialized message with no key; partitioning is left to the client.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Open a session with the broker.
    async fn connect(&self) -> Result<(), BrokerError>;

    /// Deliver one message and wait for the broker's acknowledgment.
    async fn send(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError>;

    /// Flush and close the session.
    async fn disconnect(&self) -> Result<(), BrokerError>;
}
