//! Inventory movements: the append-only audit trail behind every stock change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::aggregates::Product;
use crate::domain::value_objects::{Quantity, StockDirection};
use crate::RetailError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MovementType { StockIn, StockOut, Adjustment }

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self { Self::StockIn => "stock-in", Self::StockOut => "stock-out", Self::Adjustment => "adjustment" }
    }
}

impl fmt::Display for MovementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for MovementType {
    type Err = RetailError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stock-in" => Ok(Self::StockIn),
            "stock-out" => Ok(Self::StockOut),
            "adjustment" => Ok(Self::Adjustment),
            other => Err(RetailError::Validation(format!("unknown movement type '{}'", other))),
        }
    }
}

/// Immutable record of one stock change. `quantity` is the signed delta
/// that was actually applied; `requested` is the magnitude the caller asked for.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryMovement {
    pub id: Uuid,
    pub product_id: Uuid,
    #[serde(rename = "type")]
    pub kind: MovementType,
    pub quantity: i64,
    pub requested: u32,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl InventoryMovement {
    pub fn record(
        product_id: Uuid,
        kind: MovementType,
        quantity: i64,
        requested: u32,
        reference: Option<String>,
        notes: Option<String>,
        idempotency_key: Option<String>,
    ) -> Self {
        Self { id: Uuid::now_v7(), product_id, kind, quantity, requested, reference, notes, idempotency_key, created_at: Utc::now() }
    }
}

/// A request to move one product's stock through the ledger.
#[derive(Clone, Debug, PartialEq)]
pub struct StockAdjustment {
    pub product_id: Uuid,
    pub quantity: Quantity,
    pub direction: StockDirection,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub idempotency_key: Option<String>,
}

impl StockAdjustment {
    pub fn new(product_id: Uuid, quantity: Quantity, direction: StockDirection) -> Self {
        Self { product_id, quantity, direction, reference: None, notes: None, idempotency_key: None }
    }
    pub fn add(product_id: Uuid, quantity: Quantity) -> Self { Self::new(product_id, quantity, StockDirection::Add) }
    pub fn subtract(product_id: Uuid, quantity: Quantity) -> Self { Self::new(product_id, quantity, StockDirection::Subtract) }
    pub fn with_reference(mut self, reference: impl Into<String>) -> Self { self.reference = Some(reference.into()); self }
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self { self.notes = Some(notes.into()); self }
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self { self.idempotency_key = Some(key.into()); self }

    /// Resolves an idempotency replay: the stored movement answers the
    /// request only if it was recorded for the same product.
    pub fn replayed_by(&self, existing: InventoryMovement) -> Result<InventoryMovement, RetailError> {
        if existing.product_id != self.product_id {
            return Err(RetailError::Validation(format!(
                "idempotency key '{}' already used for product {}",
                existing.idempotency_key.as_deref().unwrap_or_default(), existing.product_id
            )));
        }
        Ok(existing)
    }
}

/// Reconciliation of a product's cached stock against its movement history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StockAudit {
    pub product_id: Uuid,
    pub opening_stock: u32,
    pub movement_total: i64,
    pub movement_count: usize,
    pub stock_quantity: u32,
    pub consistent: bool,
}

impl StockAudit {
    pub fn compute(product: &Product, movements: &[InventoryMovement]) -> Self {
        let own: Vec<&InventoryMovement> = movements.iter().filter(|m| m.product_id == product.id).collect();
        let movement_total: i64 = own.iter().map(|m| m.quantity).sum();
        Self {
            product_id: product.id,
            opening_stock: product.opening_stock,
            movement_total,
            movement_count: own.len(),
            stock_quantity: product.stock_quantity,
            consistent: i64::from(product.opening_stock) + movement_total == i64::from(product.stock_quantity),
        }
    }
}
