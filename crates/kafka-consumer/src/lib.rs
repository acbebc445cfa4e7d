//! Kafka consumer with per-topic handler registration.
//!
//! Reads from every subscribed topic are fanned into a single dispatcher
//! loop, so handlers for one topic run serially in broker order; handlers
//! registered for the same topic run sequentially in registration order.
//! The dispatcher runs until the consumer is closed.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, RwLock};

use anyhow::Result;
use app_config::BrokerConfig;
use async_trait::async_trait;
use futures::FutureExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

/// A message delivered to topic handlers.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

/// A per-topic callback invoked by the consumer dispatcher.
///
/// Returning an error acknowledges the message anyway; the error is logged
/// and the loop continues. Redelivery is the broker's responsibility.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, message: InboundMessage) -> Result<()>;
}

/// Per-topic handler lists, dispatched in registration order.
#[derive(Default)]
struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Vec<Arc<dyn EventHandler>>>>,
}

impl HandlerRegistry {
    fn register(&self, topic: &str, handler: Arc<dyn EventHandler>) {
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(topic.to_string())
            .or_default()
            .push(handler);
    }

    fn topics(&self) -> Vec<String> {
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    /// Runs every handler registered for the message's topic, sequentially.
    /// A panicking handler is caught and logged; the message is dropped for
    /// that handler and dispatch moves on.
    async fn dispatch(&self, message: InboundMessage) {
        let handlers: Vec<Arc<dyn EventHandler>> = {
            let map = self.handlers.read().unwrap_or_else(|e| e.into_inner());
            match map.get(&message.topic) {
                Some(list) => list.clone(),
                None => return,
            }
        };

        for handler in handlers {
            match AssertUnwindSafe(handler.handle(message.clone()))
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(topic = %message.topic, "handler returned error: {err:#}");
                }
                Err(_) => {
                    error!(topic = %message.topic, "handler panicked, message dropped");
                }
            }
        }
    }
}

/// KafkaConsumer wraps the underlying StreamConsumer and the handler
/// registry.
///
/// Handlers should be registered before [`KafkaConsumer::start`]; later
/// registrations take effect for subsequent messages but the subscription
/// itself is fixed at start.
pub struct KafkaConsumer {
    consumer: Arc<StreamConsumer>,
    registry: Arc<HandlerRegistry>,
    shutdown: Arc<Notify>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl KafkaConsumer {
    /// Create a new Kafka consumer for the configured brokers and group.
    pub fn new(cfg: &BrokerConfig) -> Result<Self, KafkaError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", cfg.bootstrap_servers.join(","))
            .set("group.id", cfg.consumer.group_id.as_str())
            .set("security.protocol", cfg.security_protocol.as_str())
            .set("enable.partition.eof", "false")
            .set(
                "auto.offset.reset",
                cfg.consumer.auto_offset_reset.as_kafka_str(),
            )
            .set("enable.auto.commit", "true")
            .create()?;

        Ok(Self {
            consumer: Arc::new(consumer),
            registry: Arc::new(HandlerRegistry::default()),
            shutdown: Arc::new(Notify::new()),
            dispatcher: Mutex::new(None),
        })
    }

    /// Register a handler for a topic. Multiple handlers per topic run
    /// sequentially in registration order.
    pub fn register_handler(&self, topic: &str, handler: Arc<dyn EventHandler>) {
        self.registry.register(topic, handler);
    }

    /// Subscribes to every registered topic and spawns the dispatcher loop.
    /// Non-blocking; the loop runs until [`KafkaConsumer::close`].
    pub fn start(&self) -> Result<(), KafkaError> {
        let topics = self.registry.topics();
        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.consumer.subscribe(&topic_refs)?;
        info!(?topics, "starting Kafka consumer");

        let consumer = self.consumer.clone();
        let registry = self.registry.clone();
        let shutdown = self.shutdown.clone();

        let handle = tokio::spawn(async move {
            let mut stream = consumer.stream();
            loop {
                tokio::select! {
                    _ = shutdown.notified() => {
                        info!("Kafka consumer received shutdown signal");
                        break;
                    }
                    maybe_msg = stream.next() => {
                        match maybe_msg {
                            Some(Ok(msg)) => {
                                let inbound = InboundMessage {
                                    topic: msg.topic().to_string(),
                                    key: msg
                                        .key()
                                        .map(|k| String::from_utf8_lossy(k).into_owned()),
                                    payload: msg.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                                };
                                drop(msg);
                                // A handler may cook for tens of seconds;
                                // shutdown interrupts it rather than waiting.
                                tokio::select! {
                                    _ = shutdown.notified() => {
                                        info!("shutdown during in-flight handler");
                                        break;
                                    }
                                    _ = registry.dispatch(inbound) => {}
                                }
                            }
                            Some(Err(err)) => {
                                error!("Kafka error: {err}");
                            }
                            None => {
                                debug!("Kafka stream ended");
                                break;
                            }
                        }
                    }
                }
            }
        });

        *self
            .dispatcher
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(handle);
        Ok(())
    }

    /// Signals the dispatcher to stop and waits for it to drain.
    pub async fn close(&self) {
        self.shutdown.notify_waiters();
        let handle = self
            .dispatcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                error!("consumer dispatcher task failed: {err}");
            }
        }
        info!("Kafka consumer closed");
    }
}
