//! # Stock ledger repository
//!
//! PostgreSQL access to the `stock` table. All operations run inside a
//! transaction owned by the caller, which decides whether to commit or roll
//! back; the repository itself keeps no state.
//!
//! The storage invariant is that `units` never goes below zero. The
//! conditional UPDATE in [`StockRepository::decrease`] is the only mutation
//! path that subtracts units, and it checks availability and writes in a
//! single statement so concurrent orders cannot interleave a read with a
//! stale write.

use async_trait::async_trait;
use model::{Stock, StockItem};
use thiserror::Error;
use tokio_postgres::Transaction;

/// Error types that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// A decrement would drive the named item below zero units.
    ///
    /// The display string doubles as the `reason` of the order-failed event.
    #[error("insufficient stock of \"{item}\"")]
    InsufficientStock { item: String },
    /// Database-related errors, wrapping the underlying PostgreSQL error.
    #[error("database error: {0}")]
    Db(#[from] tokio_postgres::Error),
}

/// # StockRepository
///
/// Repository interface for the stock ledger.
///
/// Every method operates on a transaction opened by the caller. A batch
/// either applies completely or, if any step fails, the caller drops the
/// transaction and nothing is visible.
#[async_trait]
pub trait StockRepository: Send + Sync {
    /// Read every ledger row. Unsorted; callers sort at read boundaries.
    async fn get(&self, tx: &Transaction<'_>) -> Result<Stock, RepositoryError>;

    /// Add units for each item, inserting rows for items not yet stocked.
    /// Matching is case-insensitive; an insert keeps the delivered casing.
    async fn increase(&self, tx: &Transaction<'_>, stock: &Stock) -> Result<(), RepositoryError>;

    /// Subtract units for each item in order. The first item without enough
    /// units aborts the batch with [`RepositoryError::InsufficientStock`].
    async fn decrease(&self, tx: &Transaction<'_>, stock: &Stock) -> Result<(), RepositoryError>;
}

/// PostgreSQL implementation of the [`StockRepository`] trait.
#[derive(Debug, Clone, Copy, Default)]
pub struct PgStockRepository;

impl PgStockRepository {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StockRepository for PgStockRepository {
    async fn get(&self, tx: &Transaction<'_>) -> Result<Stock, RepositoryError> {
        let query = r#"
            SELECT item_name, units FROM stock
        "#;
        let rows = tx.query(query, &[]).await?;
        let mut stock = Stock::new();
        for row in rows {
            let name: String = row.get("item_name");
            let units: i32 = row.get("units");
            stock.push(StockItem::from_record(name, units as u32));
        }
        Ok(stock)
    }

    async fn increase(&self, tx: &Transaction<'_>, stock: &Stock) -> Result<(), RepositoryError> {
        let query = r#"
            INSERT INTO stock (item_name, units)
            VALUES ($1, $2)
            ON CONFLICT ((LOWER(item_name)))
            DO UPDATE SET units = stock.units + EXCLUDED.units
        "#;
        for item in stock {
            tx.execute(query, &[&item.name(), &(item.units() as i32)])
                .await?;
        }
        Ok(())
    }

    async fn decrease(&self, tx: &Transaction<'_>, stock: &Stock) -> Result<(), RepositoryError> {
        // Availability check and write in one statement; rows_affected = 0
        // means the item is either missing or short on units.
        let query = r#"
            UPDATE stock
            SET units = units - $2
            WHERE LOWER(item_name) = LOWER($1) AND units >= $2
        "#;
        for item in stock {
            let updated = tx
                .execute(query, &[&item.name(), &(item.units() as i32)])
                .await?;
            if updated != 1 {
                return Err(RepositoryError::InsufficientStock {
                    item: item.name().to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_stock_names_the_item() {
        let err = RepositoryError::InsufficientStock {
            item: "Tomatoes".to_string(),
        };
        assert_eq!(err.to_string(), "insufficient stock of \"Tomatoes\"");
    }
}
