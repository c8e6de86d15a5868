//! Product Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::domain::aggregates::movement::{InventoryMovement, MovementType, StockAdjustment};
use crate::domain::value_objects::{Money, Quantity, Sku, StockDirection};
use crate::Result;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: Uuid,
    pub sku: Sku,
    pub name: String,
    pub description: Option<String>,
    pub category: String,
    pub price: Money,
    pub cost_price: Option<Money>,
    pub stock_quantity: u32,
    pub min_stock_level: u32,
    pub opening_stock: u32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewProduct {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub sku: Sku,
    pub description: Option<String>,
    #[validate(length(min = 1))]
    pub category: String,
    pub price: Money,
    pub cost_price: Option<Money>,
    #[validate(range(max = 2147483647))]
    #[serde(default)]
    pub stock_quantity: u32,
    #[validate(range(max = 2147483647))]
    #[serde(default)]
    pub min_stock_level: u32,
    #[serde(default = "active")]
    pub is_active: bool,
}

fn active() -> bool { true }

/// Catalog fields a product update may touch. Stock is deliberately absent:
/// quantities only move through the stock ledger.
#[derive(Clone, Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProductUpdate {
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    pub description: Option<String>,
    #[validate(length(min = 1))]
    pub category: Option<String>,
    pub price: Option<Money>,
    pub cost_price: Option<Money>,
    #[validate(range(max = 2147483647))]
    pub min_stock_level: Option<u32>,
    pub is_active: Option<bool>,
}

impl Product {
    pub fn create(new: NewProduct) -> Result<Self> {
        new.validate()?;
        let now = Utc::now();
        Ok(Self {
            id: Uuid::now_v7(), sku: new.sku, name: new.name, description: new.description,
            category: new.category, price: new.price, cost_price: new.cost_price,
            stock_quantity: new.stock_quantity, min_stock_level: new.min_stock_level,
            opening_stock: new.stock_quantity, is_active: new.is_active,
            created_at: now, updated_at: now,
        })
    }

    pub fn apply_update(&mut self, update: ProductUpdate) -> Result<()> {
        update.validate()?;
        if let Some(name) = update.name { self.name = name; }
        if let Some(description) = update.description { self.description = Some(description); }
        if let Some(category) = update.category { self.category = category; }
        if let Some(price) = update.price { self.price = price; }
        if let Some(cost) = update.cost_price { self.cost_price = Some(cost); }
        if let Some(level) = update.min_stock_level { self.min_stock_level = level; }
        if let Some(active) = update.is_active { self.is_active = active; }
        self.touch();
        Ok(())
    }

    /// Moves stock by `magnitude` in `direction`, clamping at zero, and
    /// returns the signed delta actually applied.
    pub fn shift_stock(&mut self, direction: StockDirection, magnitude: u32) -> i64 {
        let before = self.stock_quantity;
        self.stock_quantity = match direction {
            StockDirection::Add => before.saturating_add(magnitude).min(Quantity::MAX),
            StockDirection::Subtract => before.saturating_sub(magnitude),
        };
        self.touch();
        i64::from(self.stock_quantity) - i64::from(before)
    }

    /// Applies a ledger adjustment and returns the paired movement record.
    pub fn adjust(&mut self, adjustment: &StockAdjustment) -> InventoryMovement {
        let magnitude = adjustment.quantity.value();
        let applied = self.shift_stock(adjustment.direction, magnitude);
        let kind = match adjustment.direction {
            StockDirection::Add => MovementType::StockIn,
            StockDirection::Subtract => MovementType::StockOut,
        };
        let exact = applied.unsigned_abs() == u64::from(magnitude);
        let notes = adjustment.notes.clone().or_else(|| Some(match (adjustment.direction, exact) {
            (StockDirection::Add, true) => format!("Stock addition of {}", magnitude),
            (StockDirection::Subtract, true) => format!("Stock reduction of {}", magnitude),
            (StockDirection::Add, false) => format!("Stock addition of {} capped at {}", magnitude, applied),
            (StockDirection::Subtract, false) => format!("Stock reduction of {} clamped to {} at zero stock", magnitude, applied.abs()),
        }));
        InventoryMovement::record(self.id, kind, applied, magnitude, adjustment.reference.clone(), notes, adjustment.idempotency_key.clone())
    }

    /// Sets stock to a physically counted quantity.
    pub fn count(&mut self, counted: Quantity, notes: Option<String>) -> InventoryMovement {
        let (before, counted) = (self.stock_quantity, counted.value());
        self.stock_quantity = counted;
        self.touch();
        let delta = i64::from(counted) - i64::from(before);
        let notes = notes.or_else(|| Some(format!("Stock count: {} on record, {} counted", before, counted)));
        InventoryMovement::record(self.id, MovementType::Adjustment, delta, delta.unsigned_abs() as u32, Some("stock-count".into()), notes, None)
    }

    pub fn is_in_stock(&self) -> bool { self.stock_quantity > 0 }

    fn touch(&mut self) { self.updated_at = Utc::now(); }
}
