//! Business logic layer for the kitchen.
//!
//! This module defines the [`StockService`] and [`OrderService`] traits and
//! their async implementations. The services coordinate transactional ledger
//! access, business validation, and repository abstraction.
//!
//! # Features
//! - Atomic stock mutation in a single transaction per operation.
//! - Validation of delivered stock and ordered toppings before persistence.
//! - Dependency injection for testability and loose coupling.
//! - Well-typed error handling via [`ServiceError`], which also carries the
//!   HTTP classification used by the operator surface.

use std::collections::BTreeMap;

use async_trait::async_trait;
use deadpool_postgres::{Pool, PoolError};
use model::{OrderRequest, OrderResponse, Stock, StockItem, StockRequest, StockResponse, ValidationError};
use repository::{RepositoryError, StockRepository};
use thiserror::Error;
use tracing::{info, instrument};

/// The main error type for all operations in [`StockService`] and
/// [`OrderService`].
///
/// Errors bubble up from the repository unchanged; the classification
/// methods below are the single source of truth for how each kind renders
/// over HTTP.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The provided stock item or topping is invalid.
    #[error(transparent)]
    InvalidStock(#[from] ValidationError),
    /// A ledger operation failed.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    /// Failed to obtain a database connection from the pool.
    #[error("failed to obtain database connection: {0}")]
    Pool(#[from] PoolError),
    /// Opening or committing the transaction failed.
    #[error("database error: {0}")]
    Database(#[source] tokio_postgres::Error),
}

impl ServiceError {
    /// 400 for caller mistakes, 500 for infrastructure failures.
    pub fn http_status(&self) -> u16 {
        match self {
            ServiceError::InvalidStock(_) => 400,
            ServiceError::Repository(RepositoryError::InsufficientStock { .. }) => 400,
            _ => 500,
        }
    }

    pub fn title(&self) -> &'static str {
        match self.http_status() {
            400 => "Invalid Request",
            _ => "System Error",
        }
    }

    /// Path segment of the problem-type URI.
    pub fn problem_slug(&self) -> String {
        self.title().to_lowercase().replace(' ', "-")
    }

    /// Field violations for problem-details extension members; empty for
    /// anything but validation failures.
    pub fn fields(&self) -> BTreeMap<String, String> {
        match self {
            ServiceError::InvalidStock(err) => err.fields().clone(),
            _ => BTreeMap::new(),
        }
    }
}

/// Trait describing operator and delivery operations on the stock ledger.
#[async_trait]
pub trait StockService: Send + Sync {
    /// Returns the whole ledger, sorted by item name.
    async fn get_stock(&self) -> Result<StockResponse, ServiceError>;

    /// Adds a delivery to the ledger.
    ///
    /// Every item is validated first; any invalid item aborts the whole
    /// delivery before a transaction is opened.
    async fn receive_inventory(&self, req: StockRequest) -> Result<(), ServiceError>;
}

/// Trait describing order fulfilment.
#[async_trait]
pub trait OrderService: Send + Sync {
    /// Consumes one unit of each topping, then cooks for the order's
    /// preparation time.
    ///
    /// On success the stock decrement is durably committed before this
    /// method returns. On failure the caller receives the error and decides
    /// how to report the outcome; no stock is consumed.
    async fn process_order(&self, req: OrderRequest) -> Result<OrderResponse, ServiceError>;
}

/// Async implementation of [`StockService`] over a [`StockRepository`].
pub struct StockServiceImpl<R> {
    db_pool: Pool,
    stock_repo: R,
}

impl<R: StockRepository> StockServiceImpl<R> {
    pub fn new(db_pool: Pool, stock_repo: R) -> Self {
        Self {
            db_pool,
            stock_repo,
        }
    }
}

#[async_trait]
impl<R: StockRepository> StockService for StockServiceImpl<R> {
    #[instrument(skip(self))]
    async fn get_stock(&self) -> Result<StockResponse, ServiceError> {
        let mut client = self.db_pool.get().await?;
        let tx = client.transaction().await.map_err(ServiceError::Database)?;
        let mut stock = self.stock_repo.get(&tx).await?;
        // Read-only commit
        tx.commit().await.map_err(ServiceError::Database)?;

        stock.sort_by_name();
        Ok(StockResponse::from(stock))
    }

    #[instrument(skip(self, req))]
    async fn receive_inventory(&self, req: StockRequest) -> Result<(), ServiceError> {
        let mut received = Stock::new();
        for item in &req.stock {
            received.push(StockItem::new(item.name.clone(), item.units)?);
        }

        let mut client = self.db_pool.get().await?;
        let tx = client.transaction().await.map_err(ServiceError::Database)?;
        self.stock_repo.increase(&tx, &received).await?;
        tx.commit().await.map_err(ServiceError::Database)?;

        info!(items = received.len(), "inventory updated with stock");
        Ok(())
    }
}

/// Async implementation of [`OrderService`] over a [`StockRepository`].
pub struct OrderServiceImpl<R> {
    db_pool: Pool,
    stock_repo: R,
}

impl<R: StockRepository> OrderServiceImpl<R> {
    pub fn new(db_pool: Pool, stock_repo: R) -> Self {
        Self {
            db_pool,
            stock_repo,
        }
    }
}

#[async_trait]
impl<R: StockRepository> OrderService for OrderServiceImpl<R> {
    #[instrument(skip(self, req), fields(order_id = req.id))]
    async fn process_order(&self, req: OrderRequest) -> Result<OrderResponse, ServiceError> {
        info!(toppings = ?req.toppings, "processing order");

        let mut consumed = Stock::new();
        for topping in &req.toppings {
            consumed.push(StockItem::new(topping.clone(), 1)?);
        }

        let mut client = self.db_pool.get().await?;
        let tx = client.transaction().await.map_err(ServiceError::Database)?;
        self.stock_repo.decrease(&tx, &consumed).await?;
        tx.commit().await.map_err(ServiceError::Database)?;
        // The preparation sleep must not pin a pooled connection
        drop(client);

        let preparation_time = req.preparation_time();
        info!(seconds = preparation_time.as_secs(), "preparing order");
        tokio::time::sleep(preparation_time).await;

        Ok(OrderResponse::ready(req.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_stock_is_a_client_error() {
        let err = ServiceError::from(RepositoryError::InsufficientStock {
            item: "Tomatoes".to_string(),
        });
        assert_eq!(err.http_status(), 400);
        assert_eq!(err.title(), "Invalid Request");
        assert_eq!(err.problem_slug(), "invalid-request");
        assert_eq!(err.to_string(), "insufficient stock of \"Tomatoes\"");
        assert!(err.fields().is_empty());
    }

    #[test]
    fn test_validation_error_carries_fields() {
        let err = ServiceError::from(StockItem::new("", 0).unwrap_err());
        assert_eq!(err.http_status(), 400);
        assert_eq!(err.title(), "Invalid Request");
        let fields = err.fields();
        assert!(fields.contains_key("name"));
        assert!(fields.contains_key("units"));
    }

    #[test]
    fn test_pool_error_is_a_system_error() {
        let err = ServiceError::from(PoolError::Closed);
        assert_eq!(err.http_status(), 500);
        assert_eq!(err.title(), "System Error");
        assert_eq!(err.problem_slug(), "system-error");
        assert!(err.fields().is_empty());
    }
}
