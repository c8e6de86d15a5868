//! Persistence for the ledger.
//!
//! Every method is one atomic unit of work: either all of its writes become
//! visible or none do. [`PgStore`] gets that from a PostgreSQL transaction,
//! [`MemoryStore`] from planning under a single write lock before mutating.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::aggregates::{
    Customer, CustomerUpdate, InventoryMovement, Order, OrderChange, OrderDraft, OrderItemDraft, OrderUpdate,
    OrderWithDetails, Product, ProductUpdate, PurchaseOrder, PurchaseOrderDraft, PurchaseOrderItemDraft,
    PurchaseOrderStatus, PurchaseOrderWithItems, StockAdjustment, Supplier, SupplierUpdate,
};
use crate::domain::value_objects::Quantity;
use crate::Result;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// A committed stock change.
#[derive(Clone, Debug)]
pub struct StockChange {
    pub product: Product,
    pub movement: InventoryMovement,
    /// The idempotency key had already been used; nothing was written.
    pub replayed: bool,
}

#[derive(Clone, Debug)]
pub struct PlacedOrder {
    pub order: OrderWithDetails,
    pub movements: Vec<InventoryMovement>,
    pub replayed: bool,
}

#[derive(Clone, Debug)]
pub struct OrderUpdated {
    pub order: Order,
    pub change: OrderChange,
    /// Products restocked by a cancellation, after the restock.
    pub restocked: Vec<Product>,
    pub movements: Vec<InventoryMovement>,
}

#[derive(Clone, Debug)]
pub struct PurchaseOrderUpdated {
    pub purchase_order: PurchaseOrderWithItems,
    pub previous: Option<PurchaseOrderStatus>,
    pub received: Vec<Product>,
    pub movements: Vec<InventoryMovement>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerReconciliation {
    pub customer: Customer,
    pub drifted: bool,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn create_product(&self, product: Product) -> Result<Product>;
    async fn get_product(&self, id: Uuid) -> Result<Product>;
    async fn list_products(&self) -> Result<Vec<Product>>;
    async fn update_product(&self, id: Uuid, update: ProductUpdate) -> Result<Product>;

    async fn adjust_stock(&self, adjustment: &StockAdjustment) -> Result<StockChange>;
    async fn record_stock_count(&self, product_id: Uuid, counted: Quantity, notes: Option<String>) -> Result<StockChange>;
    /// Movements oldest first, optionally for one product.
    async fn list_movements(&self, product_id: Option<Uuid>) -> Result<Vec<InventoryMovement>>;

    async fn create_customer(&self, customer: Customer) -> Result<Customer>;
    async fn get_customer(&self, id: Uuid) -> Result<Customer>;
    async fn list_customers(&self) -> Result<Vec<Customer>>;
    async fn update_customer(&self, id: Uuid, update: CustomerUpdate) -> Result<Customer>;
    async fn reconcile_customer(&self, id: Uuid) -> Result<CustomerReconciliation>;

    async fn place_order(&self, draft: &OrderDraft, items: &[OrderItemDraft]) -> Result<PlacedOrder>;
    async fn get_order(&self, id: Uuid) -> Result<OrderWithDetails>;
    /// Orders newest first.
    async fn list_orders(&self) -> Result<Vec<Order>>;
    async fn update_order(&self, id: Uuid, update: &OrderUpdate) -> Result<OrderUpdated>;

    async fn create_supplier(&self, supplier: Supplier) -> Result<Supplier>;
    async fn get_supplier(&self, id: Uuid) -> Result<Supplier>;
    async fn list_suppliers(&self) -> Result<Vec<Supplier>>;
    async fn update_supplier(&self, id: Uuid, update: SupplierUpdate) -> Result<Supplier>;

    async fn create_purchase_order(&self, draft: &PurchaseOrderDraft, items: &[PurchaseOrderItemDraft]) -> Result<PurchaseOrderWithItems>;
    async fn get_purchase_order(&self, id: Uuid) -> Result<PurchaseOrderWithItems>;
    async fn list_purchase_orders(&self) -> Result<Vec<PurchaseOrder>>;
    async fn update_purchase_order_status(&self, id: Uuid, status: PurchaseOrderStatus) -> Result<PurchaseOrderUpdated>;
}
