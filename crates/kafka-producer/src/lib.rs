//! Kafka producer: the outbound message sink of the kitchen.
//!
//! `send` returns once the message is enqueued with the client; delivery is
//! acknowledged by all in-sync replicas and the outcome is awaited on a
//! spawned task and logged. Partition selection is key-hashed when a key is
//! present and random otherwise (the client's default partitioner).

use std::time::Duration;

use app_config::BrokerConfig;
use async_trait::async_trait;
use rdkafka::ClientConfig;
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use thiserror::Error;
use tracing::{debug, error, info};

const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// A message handed to the sink for asynchronous delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

/// Error types that can occur while handing a message to the client.
#[derive(Debug, Error)]
pub enum ProducerError {
    /// The client refused to enqueue the message (e.g. the internal queue is
    /// full or the client is shutting down).
    #[error("failed to enqueue message for topic \"{topic}\": {source}")]
    Enqueue {
        topic: String,
        #[source]
        source: KafkaError,
    },
}

/// An outbound sink for broker messages.
///
/// Abstracted as a trait so pipeline handlers can be exercised against a
/// recording sink in tests.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Enqueue a message for at-least-once delivery.
    async fn send(&self, message: OutboundMessage) -> Result<(), ProducerError>;
}

/// KafkaProducer wraps the underlying rdkafka producer.
pub struct KafkaProducer {
    producer: FutureProducer,
}

impl KafkaProducer {
    /// Create a new Kafka producer for the configured brokers.
    pub fn new(cfg: &BrokerConfig) -> Result<Self, KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", cfg.bootstrap_servers.join(","))
            .set("security.protocol", cfg.security_protocol.as_str())
            .set("acks", "all")
            .set("message.timeout.ms", "5000")
            .create()?;

        info!("Kafka producer initialized");
        Ok(Self { producer })
    }

    /// Flush pending messages within a bounded wait, then release resources.
    pub async fn close(&self) {
        if let Err(err) = self.producer.flush(FLUSH_TIMEOUT) {
            error!("failed to flush Kafka producer: {err}");
        }
        info!("Kafka producer closed");
    }
}

#[async_trait]
impl MessageSink for KafkaProducer {
    async fn send(&self, message: OutboundMessage) -> Result<(), ProducerError> {
        let mut record = FutureRecord::<String, Vec<u8>>::to(&message.topic).payload(&message.payload);
        if let Some(key) = &message.key {
            record = record.key(key);
        }

        let delivery = self.producer.send_result(record).map_err(|(source, _)| {
            ProducerError::Enqueue {
                topic: message.topic.clone(),
                source,
            }
        })?;

        // Delivery is acknowledged asynchronously; log the outcome without
        // blocking the caller.
        let topic = message.topic;
        tokio::spawn(async move {
            match delivery.await {
                Ok(Ok(_)) => debug!(%topic, "message delivered"),
                Ok(Err((err, _))) => error!(%topic, "message delivery failed: {err}"),
                Err(_) => error!(%topic, "message delivery result dropped by client"),
            }
        });

        Ok(())
    }
}
