use super::broker::{BrokerClient, BrokerError};
use super::queue::{DeliveryQueue, EnqueueError};
use crate::report::NormalizedReport;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(1000);

/// Errors surfaced by [`Publisher::publish_batch`].
#[derive(Debug, Error)]
pub enum PublishError {
    /// Could not establish the broker session
    #[error("Broker connection failed: {0}")]
    Connection(#[source] BrokerError),
    /// A message send was rejected
    #[error("Delivery failed: {0}")]
    Send(#[source] BrokerError),
    /// Every attempt failed; carries the error from the final attempt
    #[error("Delivery failed after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<PublishError>,
    },
}

/// Exponential backoff for whole-batch publish attempts.
///
/// The wait after failed attempt `n` (1-based) is `base_delay * 2^(n-1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BACKOFF_BASE,
        }
    }
}

impl RetryPolicy {
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

/// Result of one successful [`Publisher::publish_batch`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Messages acknowledged by the broker, including any left over from an earlier batch.
    pub delivered: usize,
    /// Reports refused before enqueue for exceeding the size limit.
    pub dropped: usize,
    /// Attempts used, 1 when nothing failed.
    pub attempts: u32,
}

struct PublisherState {
    connected: bool,
    queue: DeliveryQueue,
}

/// Owns the broker session and the delivery queue.
///
/// All operations take one async lock, so a batch, a connect and a close
/// never interleave. A batch holds the lock through its backoff sleeps.
pub struct Publisher {
    broker: Arc<dyn BrokerClient>,
    policy: RetryPolicy,
    state: Mutex<PublisherState>,
}

impl Publisher {
    pub fn new(broker: Arc<dyn BrokerClient>, policy: RetryPolicy, max_message_bytes: usize) -> Self {
        Self {
            broker,
            policy,
            state: Mutex::new(PublisherState {
                connected: false,
                queue: DeliveryQueue::new(max_message_bytes),
            }),
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Connects unless already connected.
    pub async fn ensure_connected(&self) -> Result<(), PublishError> {
        let mut state = self.state.lock().await;
        self.connect_locked(&mut state).await
    }

    async fn connect_locked(&self, state: &mut PublisherState) -> Result<(), PublishError> {
        if state.connected {
            return Ok(());
        }
        self.broker.connect().await.map_err(PublishError::Connection)?;
        state.connected = true;
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.connected
    }

    /// Messages still waiting for delivery.
    pub async fn pending(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    /// Enqueues `reports` and drains the queue to `topic`, retrying with backoff.
    ///
    /// Reports are enqueued once; each attempt then connects if needed and
    /// drains from the head. Messages acknowledged on an earlier attempt are
    /// not sent again. Oversized reports are logged and dropped.
    ///
    /// # Errors
    ///
    /// [`PublishError::Exhausted`] once `max_attempts` attempts have failed.
    /// The broker session is then closed. Undelivered messages stay queued
    /// and go out first on the next call.
    pub async fn publish_batch(
        &self,
        reports: &[NormalizedReport],
        topic: &str,
    ) -> Result<BatchOutcome, PublishError> {
        let mut state = self.state.lock().await;

        let carried_over = state.queue.len();
        let mut dropped = 0;
        for report in reports {
            match state.queue.enqueue(report) {
                Ok(()) => {}
                Err(EnqueueError::Oversize { size, limit }) => {
                    dropped += 1;
                    tracing::warn!(
                        category = %report.category(),
                        size = size,
                        limit = limit,
                        "Message size exceeds limit, dropping report"
                    );
                }
                Err(e) => {
                    dropped += 1;
                    tracing::warn!(category = %report.category(), error = %e, "Dropping report");
                }
            }
        }

        if carried_over > 0 {
            tracing::info!(
                carried_over = carried_over,
                "Delivering messages left over from a previous batch first"
            );
        }

        let total = state.queue.len();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match self.connect_locked(&mut state).await {
                Ok(()) => state
                    .queue
                    .drain(&*self.broker, topic)
                    .await
                    .map_err(PublishError::Send),
                Err(e) => Err(e),
            };

            match result {
                Ok(_) => {
                    tracing::debug!(topic = %topic, delivered = total, attempt = attempt, "Batch delivered");
                    return Ok(BatchOutcome {
                        delivered: total,
                        dropped,
                        attempts: attempt,
                    });
                }
                Err(e) => {
                    let delivered = total - state.queue.len();
                    if attempt >= self.policy.max_attempts {
                        tracing::error!(
                            attempts = attempt,
                            pending = state.queue.len(),
                            error = %e,
                            "Delivery attempts exhausted"
                        );
                        // The session may be dead; the next batch starts a fresh one.
                        self.disconnect_locked(&mut state).await;
                        return Err(PublishError::Exhausted {
                            attempts: attempt,
                            last: Box::new(e),
                        });
                    }

                    let delay = self.policy.delay_after(attempt);
                    tracing::warn!(
                        attempt = attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        delivered = delivered,
                        pending = state.queue.len(),
                        error = %e,
                        "Publish attempt failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Disconnects if connected. Never fails: disconnect errors are logged.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        self.disconnect_locked(&mut state).await;
    }

    async fn disconnect_locked(&self, state: &mut PublisherState) {
        if !state.connected {
            tracing::debug!("Publisher not connected, nothing to close");
            return;
        }
        state.connected = false;

        match self.broker.disconnect().await {
            Ok(()) => tracing::info!(pending = state.queue.len(), "Broker connection closed"),
            Err(e) => tracing::warn!(error = %e, "Broker disconnect failed, dropping session"),
        }
    }
}
