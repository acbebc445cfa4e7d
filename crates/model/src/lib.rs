//! Domain and wire types for the kitchen service.
//!
//! Everything that crosses a process boundary lives here: validated stock
//! items, the order events exchanged over the broker, and the
//! request/response DTOs served over HTTP.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Longest ingredient name accepted into the ledger.
pub const MAX_ITEM_NAME_LEN: usize = 25;

/// Validation failure for caller-supplied input.
///
/// Carries a map of field name to violation message so the HTTP layer can
/// render the violations as problem-details extension members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    message: String,
    fields: BTreeMap<String, String>,
}

impl ValidationError {
    pub fn new(message: impl Into<String>, fields: BTreeMap<String, String>) -> Self {
        Self {
            message: message.into(),
            fields,
        }
    }

    /// Field name to violation message, in field-name order.
    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if !self.fields.is_empty() {
            let violations: Vec<&str> = self.fields.values().map(String::as_str).collect();
            write!(f, ". {}", violations.join(", "))?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// StockItem - An ingredient held in inventory.
///
/// Values are immutable once constructed; persisted totals change only
/// through the ledger's increase and decrease operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockItem {
    name: String,
    units: u32,
}

impl StockItem {
    /// Validated constructor: the name must be 1 to 25 characters long and
    /// at least one unit must be supplied. All violations are reported in
    /// one error.
    pub fn new(name: impl Into<String>, units: u32) -> Result<Self, ValidationError> {
        let name = name.into();
        let mut fields = BTreeMap::new();

        if name.is_empty() || name.chars().count() > MAX_ITEM_NAME_LEN {
            fields.insert(
                "name".to_string(),
                format!("name must be 1 to {MAX_ITEM_NAME_LEN} characters long"),
            );
        }
        if units == 0 {
            fields.insert(
                "units".to_string(),
                "units must be greater than 0".to_string(),
            );
        }

        if !fields.is_empty() {
            return Err(ValidationError::new("invalid stock item", fields));
        }

        Ok(Self { name, units })
    }

    /// Constructs an item from a ledger row, bypassing validation.
    ///
    /// Persisted totals may legitimately reach zero through decrements,
    /// which the validated constructor rejects.
    pub fn from_record(name: impl Into<String>, units: u32) -> Self {
        Self {
            name: name.into(),
            units,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn units(&self) -> u32 {
        self.units
    }
}

/// Stock - A finite ordered sequence of stock items.
///
/// Sort order is only required at read boundaries; use [`Stock::sort_by_name`]
/// before handing the collection to an operator-facing view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stock(Vec<StockItem>);

impl Stock {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, item: StockItem) {
        self.0.push(item);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, StockItem> {
        self.0.iter()
    }

    pub fn sort_by_name(&mut self) {
        self.0.sort_by(|a, b| a.name.cmp(&b.name));
    }
}

impl From<Vec<StockItem>> for Stock {
    fn from(items: Vec<StockItem>) -> Self {
        Self(items)
    }
}

impl FromIterator<StockItem> for Stock {
    fn from_iter<I: IntoIterator<Item = StockItem>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Stock {
    type Item = StockItem;
    type IntoIter = std::vec::IntoIter<StockItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Stock {
    type Item = &'a StockItem;
    type IntoIter = std::slice::Iter<'a, StockItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Lifecycle states of an order as seen by downstream consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Preparing,
    Ready,
    Failed,
}

/// OrderRequest - A cooking order consumed from the `order_created` topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Order identifier assigned by the ordering service
    pub id: u64,
    /// Topping names; one unit of each is consumed from stock
    pub toppings: Vec<String>,
}

impl OrderRequest {
    /// Cook time is proportional to the total length of the topping names:
    /// one second per character.
    pub fn preparation_time(&self) -> Duration {
        let seconds: u64 = self.toppings.iter().map(|t| t.len() as u64).sum();
        Duration::from_secs(seconds)
    }
}

/// OrderResponse - The single outcome event emitted for every processed order.
///
/// `reason` is present exactly when the order failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderResponse {
    pub id: u64,
    pub status: OrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl OrderResponse {
    pub fn ready(id: u64) -> Self {
        Self {
            id,
            status: OrderStatus::Ready,
            reason: None,
        }
    }

    pub fn failed(id: u64, reason: impl Into<String>) -> Self {
        Self {
            id,
            status: OrderStatus::Failed,
            reason: Some(reason.into()),
        }
    }
}

/// One line of an inventory delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockItemRequest {
    pub name: String,
    pub units: u32,
}

/// StockRequest - Payload of the `inventory_delivery` topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRequest {
    pub stock: Vec<StockItemRequest>,
}

/// One row of the operator stock view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockItemResponse {
    pub name: String,
    pub units: u32,
}

/// StockResponse - Body of `GET /kitchen/api/v1/stock`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockResponse {
    pub stock: Vec<StockItemResponse>,
}

impl From<Stock> for StockResponse {
    fn from(stock: Stock) -> Self {
        Self {
            stock: stock
                .into_iter()
                .map(|item| StockItemResponse {
                    units: item.units,
                    name: item.name,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stock_item_rejects_empty_name() {
        let err = StockItem::new("", 1).unwrap_err();
        assert!(err.fields().contains_key("name"));
        assert_eq!(
            err.to_string(),
            "invalid stock item. name must be 1 to 25 characters long"
        );
    }

    #[test]
    fn test_stock_item_rejects_overlong_name() {
        let err = StockItem::new("a".repeat(26), 1).unwrap_err();
        assert!(err.fields().contains_key("name"));
    }

    #[test]
    fn test_stock_item_accepts_name_at_limit() {
        let item = StockItem::new("a".repeat(25), 1).unwrap();
        assert_eq!(item.units(), 1);
    }

    #[test]
    fn test_stock_item_rejects_zero_units() {
        let err = StockItem::new("Cheese", 0).unwrap_err();
        assert!(err.fields().contains_key("units"));
        assert_eq!(
            err.to_string(),
            "invalid stock item. units must be greater than 0"
        );
    }

    #[test]
    fn test_stock_item_reports_all_violations_at_once() {
        let err = StockItem::new("", 0).unwrap_err();
        assert_eq!(err.fields().len(), 2);
        assert_eq!(
            err.to_string(),
            "invalid stock item. name must be 1 to 25 characters long, units must be greater than 0"
        );
    }

    #[test]
    fn test_record_constructor_allows_zero_units() {
        let item = StockItem::from_record("Cheese", 0);
        assert_eq!(item.name(), "Cheese");
        assert_eq!(item.units(), 0);
    }

    #[test]
    fn test_preparation_time_sums_topping_lengths() {
        let req = OrderRequest {
            id: 1,
            toppings: vec![
                "Tomatoes".to_string(),
                "Onions".to_string(),
                "Mustard".to_string(),
            ],
        };
        assert_eq!(req.preparation_time(), Duration::from_secs(21));
    }

    #[test]
    fn test_preparation_time_of_empty_order_is_zero() {
        let req = OrderRequest {
            id: 1,
            toppings: vec![],
        };
        assert_eq!(req.preparation_time(), Duration::ZERO);
    }

    #[test]
    fn test_ready_response_omits_reason() {
        let json = serde_json::to_string(&OrderResponse::ready(1)).unwrap();
        assert_eq!(json, r#"{"id":1,"status":"READY"}"#);
    }

    #[test]
    fn test_failed_response_carries_reason() {
        let json =
            serde_json::to_string(&OrderResponse::failed(1, "insufficient stock of \"Tomatoes\""))
                .unwrap();
        assert_eq!(
            json,
            r#"{"id":1,"status":"FAILED","reason":"insufficient stock of \"Tomatoes\""}"#
        );
    }

    #[test]
    fn test_order_request_tolerates_unknown_fields() {
        let req: OrderRequest =
            serde_json::from_str(r#"{"id":7,"toppings":["Cheese"],"table":12}"#).unwrap();
        assert_eq!(req.id, 7);
        assert_eq!(req.toppings, vec!["Cheese".to_string()]);
    }

    #[test]
    fn test_stock_request_deserializes() {
        let req: StockRequest =
            serde_json::from_str(r#"{"stock":[{"name":"Cheese","units":5},{"name":"Donuts","units":7}]}"#)
                .unwrap();
        assert_eq!(req.stock.len(), 2);
        assert_eq!(req.stock[1].name, "Donuts");
        assert_eq!(req.stock[1].units, 7);
    }

    #[test]
    fn test_stock_sorts_by_name_at_read_boundary() {
        let mut stock: Stock = vec![
            StockItem::from_record("Tomatoes", 1),
            StockItem::from_record("Mustard", 1),
            StockItem::from_record("Onions", 1),
        ]
        .into();
        stock.sort_by_name();

        let names: Vec<&str> = stock.iter().map(StockItem::name).collect();
        assert_eq!(names, vec!["Mustard", "Onions", "Tomatoes"]);
    }

    #[test]
    fn test_stock_response_from_stock() {
        let stock: Stock = vec![StockItem::from_record("Cheese", 5)].into();
        let resp = StockResponse::from(stock);
        assert_eq!(
            serde_json::to_string(&resp).unwrap(),
            r#"{"stock":[{"name":"Cheese","units":5}]}"#
        );
    }
}
