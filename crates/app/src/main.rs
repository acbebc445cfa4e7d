//! Kitchen service entry point.
//!
//! Wires the event-processing pipeline: the Kafka consumer feeds the order
//! and inventory handlers, which drive the stock ledger through the service
//! layer and report order outcomes through the Kafka producer. An HTTP
//! server exposes health and stock views for operators.

mod handlers;

use std::sync::Arc;

use anyhow::Result;
use app_config::AppConfig;
use clap::Parser;
use handlers::{InventoryDeliveryHandler, OrderCreatedHandler};
use kafka_consumer::KafkaConsumer;
use kafka_producer::KafkaProducer;
use repository::PgStockRepository;
use server::Server;
use service::{OrderServiceImpl, StockServiceImpl};
use tokio::sync::Notify;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "kitchen-service", about = "Kitchen service")]
struct Args {
    /// Configuration source: a path, a file:// path, or an http(s):// URL
    #[arg(long)]
    uri: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = AppConfig::load(args.uri.as_deref()).await?;

    let pool = db::init_db_pool(&config.database).await?;
    let producer = Arc::new(KafkaProducer::new(&config.broker)?);
    let consumer = KafkaConsumer::new(&config.broker)?;

    let stock_service = Arc::new(StockServiceImpl::new(pool.clone(), PgStockRepository::new()));
    let order_service = Arc::new(OrderServiceImpl::new(pool.clone(), PgStockRepository::new()));

    consumer.register_handler(
        handlers::TOPIC_INVENTORY_DELIVERY,
        Arc::new(InventoryDeliveryHandler::new(stock_service.clone())),
    );
    consumer.register_handler(
        handlers::TOPIC_ORDER_CREATED,
        Arc::new(OrderCreatedHandler::new(order_service, producer.clone())),
    );
    consumer.start()?;

    let shutdown = Arc::new(Notify::new());
    let server = Server::new(config.server.clone(), stock_service, pool.clone());
    let server_task = tokio::spawn(server.start(shutdown.clone()));

    info!("--- application initialized ---");

    server::shutdown_signal().await;

    // Every close step runs even if an earlier one fails
    shutdown.notify_waiters();
    consumer.close().await;
    producer.close().await;
    pool.close();

    match tokio::time::timeout(config.server.shutdown_grace(), server_task).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(err))) => error!("server exited with error: {err:#}"),
        Ok(Err(err)) => error!("server task failed: {err}"),
        Err(_) => error!("server did not shut down within the grace period"),
    }

    info!("kitchen service stopped");
    Ok(())
}
