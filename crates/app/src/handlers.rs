//! Event handlers owned by the pipeline.
//!
//! The consumer dispatches `order_created` and `inventory_delivery` messages
//! here. Order handling always publishes exactly one outcome event per
//! decodable order; inventory handling acknowledges everything it sees and
//! publishes nothing.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use kafka_consumer::{EventHandler, InboundMessage};
use kafka_producer::{MessageSink, OutboundMessage};
use model::{OrderRequest, OrderResponse, StockRequest};
use service::{OrderService, StockService};
use tracing::{error, info};

pub const TOPIC_ORDER_CREATED: &str = "order_created";
pub const TOPIC_ORDER_READY: &str = "order_ready";
pub const TOPIC_ORDER_FAILED: &str = "order_failed";
pub const TOPIC_INVENTORY_DELIVERY: &str = "inventory_delivery";

/// Handles `order_created` messages.
///
/// A decode failure is logged and returned to the consumer loop; no event is
/// published. Otherwise exactly one outcome event is published: `order_ready`
/// on success, `order_failed` with a reason when the service errs.
///
/// The broker may redeliver a message; a redelivered order is processed
/// again and decrements stock again.
pub struct OrderCreatedHandler<S> {
    order_service: Arc<S>,
    producer: Arc<dyn MessageSink>,
}

impl<S> OrderCreatedHandler<S>
where
    S: OrderService + 'static,
{
    pub fn new(order_service: Arc<S>, producer: Arc<dyn MessageSink>) -> Self {
        Self {
            order_service,
            producer,
        }
    }
}

#[async_trait]
impl<S> EventHandler for OrderCreatedHandler<S>
where
    S: OrderService + 'static,
{
    async fn handle(&self, message: InboundMessage) -> Result<()> {
        let request: OrderRequest = match serde_json::from_slice(&message.payload) {
            Ok(request) => request,
            Err(err) => {
                error!("failed to decode order request: {err}");
                return Err(err.into());
            }
        };

        let order_id = request.id;
        info!(order_id, "order message received");

        let (topic, outcome) = match self.order_service.process_order(request).await {
            Ok(outcome) => (TOPIC_ORDER_READY, outcome),
            Err(err) => {
                error!(order_id, "error processing order: {err}");
                (
                    TOPIC_ORDER_FAILED,
                    OrderResponse::failed(order_id, err.to_string()),
                )
            }
        };

        self.producer
            .send(OutboundMessage {
                topic: topic.to_string(),
                key: None,
                payload: serde_json::to_vec(&outcome)?,
            })
            .await?;

        Ok(())
    }
}

/// Handles `inventory_delivery` messages.
///
/// Both decode failures and service failures are logged and acknowledged;
/// nothing is ever published for a delivery.
pub struct InventoryDeliveryHandler<S> {
    stock_service: Arc<S>,
}

impl<S> InventoryDeliveryHandler<S>
where
    S: StockService + 'static,
{
    pub fn new(stock_service: Arc<S>) -> Self {
        Self { stock_service }
    }
}

#[async_trait]
impl<S> EventHandler for InventoryDeliveryHandler<S>
where
    S: StockService + 'static,
{
    async fn handle(&self, message: InboundMessage) -> Result<()> {
        let request: StockRequest = match serde_json::from_slice(&message.payload) {
            Ok(request) => request,
            Err(err) => {
                // Skip bad message, don't crash
                error!("failed to decode inventory message: {err}");
                return Ok(());
            }
        };

        if let Err(err) = self.stock_service.receive_inventory(request).await {
            error!("failed to update inventory with stock: {err}");
            return Ok(());
        }

        info!("inventory updated with stock");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kafka_producer::ProducerError;
    use model::{StockItem, StockResponse};
    use repository::RepositoryError;
    use service::ServiceError;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<OutboundMessage>>,
    }

    #[async_trait]
    impl MessageSink for RecordingSink {
        async fn send(&self, message: OutboundMessage) -> Result<(), ProducerError> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }
    }

    struct ReadyOrderService;

    #[async_trait]
    impl OrderService for ReadyOrderService {
        async fn process_order(&self, req: OrderRequest) -> Result<OrderResponse, ServiceError> {
            Ok(OrderResponse::ready(req.id))
        }
    }

    struct OutOfStockOrderService;

    #[async_trait]
    impl OrderService for OutOfStockOrderService {
        async fn process_order(&self, _req: OrderRequest) -> Result<OrderResponse, ServiceError> {
            Err(ServiceError::from(RepositoryError::InsufficientStock {
                item: "Tomatoes".to_string(),
            }))
        }
    }

    #[derive(Default)]
    struct RecordingStockService {
        received: Mutex<Vec<StockRequest>>,
        fail: bool,
    }

    #[async_trait]
    impl StockService for RecordingStockService {
        async fn get_stock(&self) -> Result<StockResponse, ServiceError> {
            Ok(StockResponse { stock: Vec::new() })
        }

        async fn receive_inventory(&self, req: StockRequest) -> Result<(), ServiceError> {
            self.received.lock().unwrap().push(req);
            if self.fail {
                return Err(ServiceError::from(StockItem::new("", 1).unwrap_err()));
            }
            Ok(())
        }
    }

    fn message(topic: &str, payload: &str) -> InboundMessage {
        InboundMessage {
            topic: topic.to_string(),
            key: None,
            payload: payload.as_bytes().to_vec(),
        }
    }

    #[tokio::test]
    async fn test_successful_order_emits_exactly_one_ready_event() {
        let sink = Arc::new(RecordingSink::default());
        let handler = OrderCreatedHandler::new(Arc::new(ReadyOrderService), sink.clone());

        handler
            .handle(message(
                TOPIC_ORDER_CREATED,
                r#"{"id":1,"toppings":["Tomatoes","Onions","Mustard"]}"#,
            ))
            .await
            .unwrap();

        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].topic, TOPIC_ORDER_READY);
        assert_eq!(
            std::str::from_utf8(&sent[0].payload).unwrap(),
            r#"{"id":1,"status":"READY"}"#
        );
    }

    #[tokio::test]
    async fn test_failed_order_emits_exactly_one_failed_event() {
        let sink = Arc::new(RecordingSink::default());
        let handler = OrderCreatedHandler::new(Arc::new(OutOfStockOrderService), sink.clone());

        handler
            .handle(message(
                TOPIC_ORDER_CREATED,
                r#"{"id":1,"toppings":["Tomatoes","Onions","Mustard"]}"#,
            ))
            .await
            .unwrap();

        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].topic, TOPIC_ORDER_FAILED);
        assert_eq!(
            std::str::from_utf8(&sent[0].payload).unwrap(),
            r#"{"id":1,"status":"FAILED","reason":"insufficient stock of \"Tomatoes\""}"#
        );
    }

    #[tokio::test]
    async fn test_undecodable_order_errors_and_emits_nothing() {
        let sink = Arc::new(RecordingSink::default());
        let handler = OrderCreatedHandler::new(Arc::new(ReadyOrderService), sink.clone());

        let result = handler
            .handle(message(TOPIC_ORDER_CREATED, "not json"))
            .await;

        assert!(result.is_err());
        assert!(sink.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_inventory_delivery_reaches_the_service() {
        let stock_service = Arc::new(RecordingStockService::default());
        let handler = InventoryDeliveryHandler::new(stock_service.clone());

        handler
            .handle(message(
                TOPIC_INVENTORY_DELIVERY,
                r#"{"stock":[{"name":"Cheese","units":5},{"name":"Donuts","units":7}]}"#,
            ))
            .await
            .unwrap();

        let received = stock_service.received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].stock.len(), 2);
        assert_eq!(received[0].stock[0].name, "Cheese");
    }

    #[tokio::test]
    async fn test_undecodable_inventory_is_acknowledged_silently() {
        let stock_service = Arc::new(RecordingStockService::default());
        let handler = InventoryDeliveryHandler::new(stock_service.clone());

        let result = handler
            .handle(message(TOPIC_INVENTORY_DELIVERY, "not json"))
            .await;

        assert!(result.is_ok());
        assert!(stock_service.received.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_inventory_is_acknowledged() {
        let stock_service = Arc::new(RecordingStockService {
            received: Mutex::new(Vec::new()),
            fail: true,
        });
        let handler = InventoryDeliveryHandler::new(stock_service.clone());

        let result = handler
            .handle(message(
                TOPIC_INVENTORY_DELIVERY,
                r#"{"stock":[{"name":"","units":1}]}"#,
            ))
            .await;

        assert!(result.is_ok());
    }
}
