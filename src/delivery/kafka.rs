//! Kafka implementation of [`BrokerClient`] on rdkafka's `FutureProducer`.
//!
//! librdkafka connects lazily, so [`KafkaBroker::connect`] creates the
//! producer and then fetches cluster metadata to prove the brokers are
//! reachable. Blocking librdkafka calls run on the blocking thread pool.

use super::broker::{BrokerClient, BrokerError};
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Producer settings, mapped onto librdkafka properties.
#[derive(Debug, Clone)]
pub struct KafkaSettings {
    /// `bootstrap.servers`
    pub brokers: Vec<String>,
    /// `request.timeout.ms`, also the send queue timeout and flush bound.
    pub request_timeout: Duration,
    /// `message.send.max.retries`
    pub retries: u32,
    /// `retry.backoff.ms`
    pub retry_initial: Duration,
    /// `max.in.flight.requests.per.connection`
    pub max_in_flight: u32,
    /// `message.max.bytes`
    pub max_message_bytes: usize,
}

pub struct KafkaBroker {
    settings: KafkaSettings,
    producer: Mutex<Option<FutureProducer>>,
}

impl KafkaBroker {
    pub fn new(settings: KafkaSettings) -> Self {
        Self {
            settings,
            producer: Mutex::new(None),
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        let s = &self.settings;
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", s.brokers.join(","))
            .set("request.timeout.ms", s.request_timeout.as_millis().to_string())
            .set("message.send.max.retries", s.retries.to_string())
            .set("retry.backoff.ms", s.retry_initial.as_millis().to_string())
            .set(
                "max.in.flight.requests.per.connection",
                s.max_in_flight.to_string(),
            )
            .set("message.max.bytes", s.max_message_bytes.to_string());
        config
    }

    fn slot(&self) -> MutexGuard<'_, Option<FutureProducer>> {
        self.producer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl BrokerClient for KafkaBroker {
    async fn connect(&self) -> Result<(), BrokerError> {
        tracing::info!(brokers = %self.settings.brokers.join(","), "Connecting to Kafka");

        let producer: FutureProducer = self
            .client_config()
            .create()
            .map_err(|e| BrokerError::Connect(e.to_string()))?;

        let probe = producer.clone();
        let timeout = self.settings.request_timeout;
        tokio::task::spawn_blocking(move || probe.client().fetch_metadata(None, timeout).map(|_| ()))
            .await
            .map_err(|e| BrokerError::Connect(e.to_string()))?
            .map_err(|e| BrokerError::Connect(e.to_string()))?;

        *self.slot() = Some(producer);
        tracing::info!("Connected to Kafka");
        Ok(())
    }

    async fn send(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        let producer = self.slot().clone().ok_or(BrokerError::NotConnected)?;
        let record = FutureRecord::<(), [u8]>::to(topic).payload(payload);

        producer
            .send(record, self.settings.request_timeout)
            .await
            .map(|_| ())
            .map_err(|(e, _)| BrokerError::Send(e.to_string()))
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        let Some(producer) = self.slot().take() else {
            return Ok(());
        };

        let timeout = self.settings.request_timeout;
        tokio::task::spawn_blocking(move || producer.flush(timeout))
            .await
            .map_err(|e| BrokerError::Disconnect(e.to_string()))?
            .map_err(|e| BrokerError::Disconnect(e.to_string()))?;

        tracing::info!("Disconnected from Kafka");
        Ok(())
    }
}
