//! Domain events
//!
//! Raised by the ledger after a transaction commits and handed to the
//! configured [`EventPublisher`](crate::publisher::EventPublisher).

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::dashboard::StockStatus;
use crate::domain::aggregates::{MovementType, OrderStatus, PaymentStatus, PurchaseOrderStatus};
use crate::domain::value_objects::{Money, Sku};

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DomainEvent {
    Stock(StockEvent),
    Order(OrderEvent),
    PurchaseOrder(PurchaseOrderEvent),
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum StockEvent {
    Adjusted { product_id: Uuid, movement_id: Uuid, kind: MovementType, delta: i64, stock_quantity: u32, at: DateTime<Utc> },
    Low { product_id: Uuid, sku: Sku, stock_quantity: u32, min_stock_level: u32, status: StockStatus },
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum OrderEvent {
    Placed { order_id: Uuid, order_number: String, customer_id: Uuid, total: Money },
    StatusChanged { order_id: Uuid, from: OrderStatus, to: OrderStatus },
    PaymentChanged { order_id: Uuid, payment_status: PaymentStatus },
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum PurchaseOrderEvent {
    StatusChanged { purchase_order_id: Uuid, from: PurchaseOrderStatus, to: PurchaseOrderStatus },
}

impl DomainEvent {
    /// NATS subject the event is published on.
    pub fn subject(&self) -> &'static str {
        match self {
            Self::Stock(StockEvent::Adjusted { .. }) => "retail.stock.adjusted",
            Self::Stock(StockEvent::Low { .. }) => "retail.stock.low",
            Self::Order(OrderEvent::Placed { .. }) => "retail.order.placed",
            Self::Order(_) => "retail.order.updated",
            Self::PurchaseOrder(PurchaseOrderEvent::StatusChanged { to: PurchaseOrderStatus::Received, .. }) => "retail.purchase_order.received",
            Self::PurchaseOrder(_) => "retail.purchase_order.updated",
        }
    }
}
