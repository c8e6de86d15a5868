//! Order Aggregate
//!
//! Placement is planned here as a pure function over the locked customer and
//! product rows; stores persist the resulting [`OrderPlacement`] in a single
//! transaction or not at all.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::aggregates::movement::{InventoryMovement, StockAdjustment};
use crate::domain::aggregates::{Customer, Product};
use crate::domain::value_objects::{Money, Quantity};
use crate::{RetailError, Result};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus { #[default] Pending, Confirmed, Packed, Shipped, Delivered, Cancelled }

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending", Self::Confirmed => "confirmed", Self::Packed => "packed",
            Self::Shipped => "shipped", Self::Delivered => "delivered", Self::Cancelled => "cancelled",
        }
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed) | (Pending, Cancelled)
                | (Confirmed, Packed) | (Confirmed, Cancelled)
                | (Packed, Shipped) | (Packed, Cancelled)
                | (Shipped, Delivered)
        )
    }

    pub fn is_terminal(&self) -> bool { matches!(self, Self::Delivered | Self::Cancelled) }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for OrderStatus {
    type Err = RetailError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending), "confirmed" => Ok(Self::Confirmed), "packed" => Ok(Self::Packed),
            "shipped" => Ok(Self::Shipped), "delivered" => Ok(Self::Delivered), "cancelled" => Ok(Self::Cancelled),
            other => Err(RetailError::Validation(format!("unknown order status '{}'", other))),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus { #[default] Pending, Partial, Paid, Cod }

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Pending => "pending", Self::Partial => "partial", Self::Paid => "paid", Self::Cod => "cod" }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for PaymentStatus {
    type Err = RetailError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending), "partial" => Ok(Self::Partial), "paid" => Ok(Self::Paid), "cod" => Ok(Self::Cod),
            other => Err(RetailError::Validation(format!("unknown payment status '{}'", other))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub customer_id: Uuid,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub subtotal: Money,
    pub discount: Money,
    pub tax: Money,
    pub total: Money,
    pub notes: Option<String>,
    pub order_date: DateTime<Utc>,
    pub delivery_date: Option<DateTime<Utc>>,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Line item. `price` and `total` are snapshots taken at placement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem { pub id: Uuid, pub order_id: Uuid, pub product_id: Uuid, pub quantity: u32, pub price: Money, pub total: Money }

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemDetail { #[serde(flatten)] pub item: OrderItem, pub product: Product }

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderWithDetails { #[serde(flatten)] pub order: Order, pub customer: Customer, pub items: Vec<OrderItemDetail> }

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderWithCustomer { #[serde(flatten)] pub order: Order, pub customer: Customer }

impl OrderWithDetails {
    pub fn assemble(order: Order, customer: Customer, items: Vec<OrderItem>, products: &HashMap<Uuid, Product>) -> Result<Self> {
        let items = items.into_iter()
            .map(|item| {
                let product = products.get(&item.product_id).cloned().ok_or_else(|| RetailError::not_found("product", item.product_id))?;
                Ok(OrderItemDetail { item, product })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { order, customer, items })
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDraft {
    pub customer_id: Uuid,
    pub order_number: Option<String>,
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub subtotal: Option<Money>,
    pub discount: Option<Money>,
    pub tax: Option<Money>,
    pub total: Option<Money>,
    pub notes: Option<String>,
    pub order_date: Option<DateTime<Utc>>,
    pub delivery_date: Option<DateTime<Utc>>,
    pub idempotency_key: Option<String>,
}

/// `price` defaults to the product's current price when omitted.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemDraft { pub product_id: Uuid, pub quantity: u32, pub price: Option<Money>, pub total: Option<Money> }

impl OrderItemDraft {
    pub fn new(product_id: Uuid, quantity: u32) -> Self { Self { product_id, quantity, price: None, total: None } }
    pub fn priced(product_id: Uuid, quantity: u32, price: Money) -> Self { Self { product_id, quantity, price: Some(price), total: None } }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderUpdate {
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub notes: Option<String>,
    pub delivery_date: Option<DateTime<Utc>>,
}

impl OrderUpdate {
    pub fn status(status: OrderStatus) -> Self { Self { status: Some(status), ..Default::default() } }
    pub fn payment(payment_status: PaymentStatus) -> Self { Self { payment_status: Some(payment_status), ..Default::default() } }
}

/// What an applied [`OrderUpdate`] actually changed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OrderChange { pub status: Option<(OrderStatus, OrderStatus)>, pub payment_status: Option<PaymentStatus> }

impl OrderChange {
    pub fn is_cancellation(&self) -> bool { matches!(self.status, Some((_, OrderStatus::Cancelled))) }
}

impl OrderDraft {
    /// Structural checks that need no stored state.
    pub fn check(&self, items: &[OrderItemDraft]) -> Result<()> {
        if items.is_empty() { return Err(RetailError::Validation("an order needs at least one item".into())); }
        if let Some(number) = &self.order_number {
            if number.trim().is_empty() { return Err(RetailError::Validation("order number must not be blank".into())); }
        }
        match self.status.unwrap_or_default() {
            OrderStatus::Pending | OrderStatus::Confirmed => {}
            other => return Err(RetailError::Validation(format!("orders cannot be placed as {}", other))),
        }
        for item in items {
            if item.quantity == 0 { return Err(RetailError::Validation(format!("quantity for product {} must be positive", item.product_id))); }
            Quantity::new(item.quantity)?;
        }
        Ok(())
    }

    /// Resolves an idempotency replay: the stored order answers the request
    /// only if it was placed for the same customer.
    pub fn replayed_by(&self, existing: &Order) -> Result<()> {
        if existing.customer_id != self.customer_id {
            return Err(RetailError::Validation(format!(
                "idempotency key '{}' already used for customer {}",
                existing.idempotency_key.as_deref().unwrap_or_default(), existing.customer_id
            )));
        }
        Ok(())
    }
}

pub fn generate_order_number(at: DateTime<Utc>, id: Uuid) -> String {
    let hex = id.simple().to_string();
    format!("ORD-{}-{}", at.format("%Y%m%d"), hex[hex.len() - 8..].to_uppercase())
}

/// Everything one order placement writes.
#[derive(Clone, Debug)]
pub struct OrderPlacement {
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub products: Vec<Product>,
    pub movements: Vec<InventoryMovement>,
    pub customer: Customer,
}

impl OrderPlacement {
    /// Validates the draft against the current customer and product rows and
    /// computes the post-placement state. Nothing is written.
    pub fn plan(draft: OrderDraft, items: Vec<OrderItemDraft>, mut customer: Customer, products: Vec<Product>) -> Result<Self> {
        draft.check(&items)?;
        if customer.id != draft.customer_id { return Err(RetailError::not_found("customer", draft.customer_id)); }
        let mut products: HashMap<Uuid, Product> = products.into_iter().map(|p| (p.id, p)).collect();

        let mut demand: BTreeMap<Uuid, u32> = BTreeMap::new();
        for item in &items {
            let entry = demand.entry(item.product_id).or_default();
            *entry = entry.saturating_add(item.quantity);
        }
        for (product_id, requested) in &demand {
            let product = products.get(product_id).ok_or_else(|| RetailError::not_found("product", product_id))?;
            if !product.is_active { return Err(RetailError::Validation(format!("product {} is inactive", product.sku))); }
            if *requested > product.stock_quantity {
                return Err(RetailError::InsufficientStock { product_id: *product_id, requested: *requested, available: product.stock_quantity });
            }
        }

        let now = Utc::now();
        let order_id = Uuid::now_v7();
        let order_number = draft.order_number.clone().map(|n| n.trim().to_string()).unwrap_or_else(|| generate_order_number(now, order_id));

        let mut lines = Vec::with_capacity(items.len());
        for item in &items {
            let product = products.get(&item.product_id).ok_or_else(|| RetailError::not_found("product", item.product_id))?;
            let price = item.price.unwrap_or(product.price);
            let total = price.multiply(item.quantity)?;
            if let Some(claimed) = item.total {
                if claimed != total {
                    return Err(RetailError::Validation(format!("line total {} for product {} should be {}", claimed, product.sku, total)));
                }
            }
            lines.push(OrderItem { id: Uuid::now_v7(), order_id, product_id: item.product_id, quantity: item.quantity, price, total });
        }

        let subtotal = Money::total(lines.iter().map(|l| l.total))?;
        let discount = draft.discount.unwrap_or(Money::ZERO);
        let tax = draft.tax.unwrap_or(Money::ZERO);
        let total = subtotal.add(tax)?.checked_sub(discount)
            .ok_or_else(|| RetailError::Validation(format!("discount {} exceeds subtotal plus tax", discount)))?;
        if let Some(claimed) = draft.subtotal {
            if claimed != subtotal { return Err(RetailError::Validation(format!("subtotal {} should be {}", claimed, subtotal))); }
        }
        if let Some(claimed) = draft.total {
            if claimed != total { return Err(RetailError::Validation(format!("total {} should be {}", claimed, total))); }
        }

        let mut movements = Vec::with_capacity(lines.len());
        for line in &lines {
            let product = products.get_mut(&line.product_id).ok_or_else(|| RetailError::not_found("product", line.product_id))?;
            let adjustment = StockAdjustment::subtract(product.id, Quantity::new(line.quantity)?)
                .with_reference(order_number.clone())
                .with_notes(format!("Sold on order {}", order_number));
            movements.push(product.adjust(&adjustment));
        }
        customer.record_order(total)?;

        let order = Order {
            id: order_id, order_number, customer_id: customer.id,
            status: draft.status.unwrap_or_default(), payment_status: draft.payment_status.unwrap_or_default(),
            subtotal, discount, tax, total, notes: draft.notes,
            order_date: draft.order_date.unwrap_or(now), delivery_date: draft.delivery_date,
            idempotency_key: draft.idempotency_key, created_at: now, updated_at: now,
        };
        let mut products: Vec<Product> = demand.keys().filter_map(|id| products.remove(id)).collect();
        products.sort_by_key(|p| p.id);
        Ok(Self { order, items: lines, products, movements, customer })
    }

    pub fn details(&self) -> Result<OrderWithDetails> {
        let products: HashMap<Uuid, Product> = self.products.iter().map(|p| (p.id, p.clone())).collect();
        OrderWithDetails::assemble(self.order.clone(), self.customer.clone(), self.items.clone(), &products)
    }
}

impl Order {
    /// Applies an update after checking it in full; on error the order is untouched.
    pub fn apply_update(&mut self, update: &OrderUpdate) -> Result<OrderChange> {
        let mut next = self.clone();
        let mut change = OrderChange::default();
        if let Some(status) = update.status {
            if status != next.status {
                if !next.status.can_transition_to(status) {
                    return Err(RetailError::IllegalTransition { from: next.status.to_string(), to: status.to_string() });
                }
                change.status = Some((next.status, status));
                next.status = status;
                if status == OrderStatus::Delivered && next.delivery_date.is_none() { next.delivery_date = Some(Utc::now()); }
            }
        }
        if let Some(payment) = update.payment_status {
            if payment != next.payment_status {
                if next.status == OrderStatus::Cancelled {
                    return Err(RetailError::Validation("payment status of a cancelled order is frozen".into()));
                }
                change.payment_status = Some(payment);
                next.payment_status = payment;
            }
        }
        if let Some(notes) = &update.notes { next.notes = Some(notes.clone()); }
        if let Some(date) = update.delivery_date { next.delivery_date = Some(date); }
        next.updated_at = Utc::now();
        *self = next;
        Ok(change)
    }
}

/// Returns a cancelled order's items to stock and backs the order out of the
/// customer's aggregates.
pub fn restock_cancelled(order: &Order, items: &[OrderItem], products: &mut HashMap<Uuid, Product>, customer: &mut Customer) -> Result<Vec<InventoryMovement>> {
    let mut movements = Vec::with_capacity(items.len());
    for item in items {
        let product = products.get_mut(&item.product_id).ok_or_else(|| RetailError::not_found("product", item.product_id))?;
        let adjustment = StockAdjustment::add(product.id, Quantity::new(item.quantity)?)
            .with_reference(order.order_number.clone())
            .with_notes(format!("Restocked from cancelled order {}", order.order_number));
        movements.push(product.adjust(&adjustment));
    }
    customer.reverse_order(order.total);
    Ok(movements)
}
