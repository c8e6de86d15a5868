//! Ledger service: the entry point for every retail operation.
//!
//! Wraps a [`LedgerStore`] with conflict retries, a per-operation deadline and
//! logging, and publishes domain events once a change has committed.

use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::LedgerConfig;
use crate::dashboard::{self, DashboardStats, ProductStock};
use crate::domain::aggregates::{
    Customer, CustomerUpdate, InventoryMovement, NewCustomer, NewProduct, NewSupplier, Order, OrderDraft,
    OrderItemDraft, OrderStatus, OrderUpdate, OrderWithCustomer, OrderWithDetails, Product, ProductUpdate,
    PurchaseOrder, PurchaseOrderDraft, PurchaseOrderItemDraft, PurchaseOrderStatus, PurchaseOrderWithItems,
    StockAdjustment, StockAudit, Supplier, SupplierUpdate,
};
use crate::domain::events::{DomainEvent, OrderEvent, PurchaseOrderEvent, StockEvent};
use crate::domain::value_objects::Quantity;
use crate::publisher::EventPublisher;
use crate::store::{CustomerReconciliation, LedgerStore};
use crate::{RetailError, Result};

/// Runs `attempt` until it succeeds, fails with a non-retryable error, or
/// runs out of retries. The whole loop is bounded by `config.deadline`; when
/// it expires the in-flight attempt is dropped.
pub async fn run_with_policy<T, F, Fut>(config: &LedgerConfig, op: &'static str, mut attempt: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let retries = async {
        let mut tries = 0u32;
        loop {
            match attempt().await {
                Err(e) if e.is_retryable() && tries < config.max_retries => {
                    tries += 1;
                    tracing::warn!(op, attempt = tries, error = %e, "retrying after conflict");
                    tokio::time::sleep(config.retry_backoff * tries).await;
                }
                outcome => return outcome,
            }
        }
    };
    match tokio::time::timeout(config.deadline, retries).await {
        Ok(outcome) => outcome,
        Err(_) => {
            let ms = config.deadline.as_millis() as u64;
            tracing::warn!(op, deadline_ms = ms, "operation timed out");
            Err(RetailError::Timeout(ms))
        }
    }
}

pub struct Ledger {
    store: Arc<dyn LedgerStore>,
    publisher: Arc<dyn EventPublisher>,
    config: LedgerConfig,
}

impl Ledger {
    pub fn new(store: Arc<dyn LedgerStore>, publisher: Arc<dyn EventPublisher>, config: LedgerConfig) -> Self {
        Self { store, publisher, config }
    }

    pub fn config(&self) -> &LedgerConfig { &self.config }

    async fn run<T, F, Fut>(&self, op: &'static str, attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        run_with_policy(&self.config, op, attempt).await
    }

    async fn publish(&self, events: Vec<DomainEvent>) {
        for event in events {
            if let Err(e) = self.publisher.publish(&event).await {
                tracing::warn!(subject = event.subject(), error = %e, "failed to publish event");
            }
        }
    }

    fn stock_events<'a>(&self, products: impl IntoIterator<Item = &'a Product>, movements: &[InventoryMovement]) -> Vec<DomainEvent> {
        let mut products: Vec<&Product> = products.into_iter().collect();
        products.sort_by_key(|p| p.id);
        products.dedup_by_key(|p| p.id);
        let mut events: Vec<DomainEvent> = movements.iter()
            .filter_map(|m| products.iter().find(|p| p.id == m.product_id).map(|p| (m, p)))
            .map(|(m, p)| DomainEvent::Stock(StockEvent::Adjusted {
                product_id: p.id, movement_id: m.id, kind: m.kind, delta: m.quantity,
                stock_quantity: p.stock_quantity, at: m.created_at,
            }))
            .collect();
        for product in products {
            if let Some(status) = self.config.thresholds.classify(product) {
                events.push(DomainEvent::Stock(StockEvent::Low {
                    product_id: product.id, sku: product.sku.clone(), stock_quantity: product.stock_quantity,
                    min_stock_level: product.min_stock_level, status,
                }));
            }
        }
        events
    }

    // -------------------------------------------------------------------------
    // Products & stock
    // -------------------------------------------------------------------------

    pub async fn create_product(&self, new: NewProduct) -> Result<Product> {
        let product = Product::create(new)?;
        let created = self.run("create_product", || self.store.create_product(product.clone())).await?;
        tracing::info!(product_id = %created.id, sku = %created.sku, "product created");
        Ok(created)
    }

    pub async fn get_product(&self, id: Uuid) -> Result<Product> {
        self.run("get_product", || self.store.get_product(id)).await
    }

    pub async fn list_products(&self) -> Result<Vec<Product>> {
        self.run("list_products", || self.store.list_products()).await
    }

    pub async fn update_product(&self, id: Uuid, update: ProductUpdate) -> Result<Product> {
        let product = self.run("update_product", || self.store.update_product(id, update.clone())).await?;
        tracing::info!(product_id = %id, "product updated");
        Ok(product)
    }

    /// Moves stock and returns the recorded movement. Subtractions clamp at
    /// zero; the movement carries the delta actually applied.
    pub async fn adjust_stock(&self, adjustment: StockAdjustment) -> Result<InventoryMovement> {
        let change = self.run("adjust_stock", || self.store.adjust_stock(&adjustment)).await?;
        if change.replayed {
            tracing::info!(product_id = %adjustment.product_id, movement_id = %change.movement.id, "stock adjustment replayed");
            return Ok(change.movement);
        }
        tracing::info!(
            product_id = %change.product.id, delta = change.movement.quantity,
            stock = change.product.stock_quantity, "stock adjusted"
        );
        let events = self.stock_events([&change.product], std::slice::from_ref(&change.movement));
        self.publish(events).await;
        Ok(change.movement)
    }

    /// Sets stock to a physically counted quantity, recording the difference.
    pub async fn record_stock_count(&self, product_id: Uuid, counted: u32, notes: Option<String>) -> Result<InventoryMovement> {
        let counted = Quantity::new(counted)?;
        let change = self.run("record_stock_count", || self.store.record_stock_count(product_id, counted, notes.clone())).await?;
        tracing::info!(product_id = %product_id, delta = change.movement.quantity, stock = change.product.stock_quantity, "stock counted");
        let events = self.stock_events([&change.product], std::slice::from_ref(&change.movement));
        self.publish(events).await;
        Ok(change.movement)
    }

    pub async fn stock_audit(&self, product_id: Uuid) -> Result<StockAudit> {
        let product = self.get_product(product_id).await?;
        let movements = self.list_movements(Some(product_id)).await?;
        let audit = StockAudit::compute(&product, &movements);
        if !audit.consistent {
            tracing::warn!(product_id = %product_id, stock = audit.stock_quantity, movement_total = audit.movement_total, "stock does not match movement history");
        }
        Ok(audit)
    }

    pub async fn list_movements(&self, product_id: Option<Uuid>) -> Result<Vec<InventoryMovement>> {
        self.run("list_movements", || self.store.list_movements(product_id)).await
    }

    // -------------------------------------------------------------------------
    // Customers
    // -------------------------------------------------------------------------

    pub async fn create_customer(&self, new: NewCustomer) -> Result<Customer> {
        let customer = Customer::create(new)?;
        let created = self.run("create_customer", || self.store.create_customer(customer.clone())).await?;
        tracing::info!(customer_id = %created.id, "customer created");
        Ok(created)
    }

    pub async fn get_customer(&self, id: Uuid) -> Result<Customer> {
        self.run("get_customer", || self.store.get_customer(id)).await
    }

    pub async fn list_customers(&self) -> Result<Vec<Customer>> {
        self.run("list_customers", || self.store.list_customers()).await
    }

    pub async fn update_customer(&self, id: Uuid, update: CustomerUpdate) -> Result<Customer> {
        self.run("update_customer", || self.store.update_customer(id, update.clone())).await
    }

    pub async fn reconcile_customer(&self, id: Uuid) -> Result<CustomerReconciliation> {
        let rec = self.run("reconcile_customer", || self.store.reconcile_customer(id)).await?;
        if rec.drifted {
            tracing::warn!(customer_id = %id, total_orders = rec.customer.total_orders, total_spent = %rec.customer.total_spent, "customer aggregates repaired");
        }
        Ok(rec)
    }

    // -------------------------------------------------------------------------
    // Orders
    // -------------------------------------------------------------------------

    /// Places an order: items, stock decrements, movements and customer
    /// aggregates commit together or not at all.
    pub async fn place_order(&self, draft: OrderDraft, items: Vec<OrderItemDraft>) -> Result<OrderWithDetails> {
        let placed = self.run("place_order", || self.store.place_order(&draft, &items)).await?;
        let order = &placed.order.order;
        if placed.replayed {
            tracing::info!(order_id = %order.id, order_number = %order.order_number, "order placement replayed");
            return Ok(placed.order);
        }
        tracing::info!(order_id = %order.id, order_number = %order.order_number, total = %order.total, items = placed.order.items.len(), "order placed");

        let mut events = vec![DomainEvent::Order(OrderEvent::Placed {
            order_id: order.id, order_number: order.order_number.clone(), customer_id: order.customer_id, total: order.total,
        })];
        events.extend(self.stock_events(placed.order.items.iter().map(|i| &i.product), &placed.movements));
        self.publish(events).await;
        Ok(placed.order)
    }

    pub async fn get_order(&self, id: Uuid) -> Result<OrderWithDetails> {
        self.run("get_order", || self.store.get_order(id)).await
    }

    /// Orders newest first, each with its customer.
    pub async fn list_orders(&self) -> Result<Vec<OrderWithCustomer>> {
        let orders = self.orders().await?;
        let customers = self.list_customers().await?;
        Ok(dashboard::with_customers(&orders, &customers))
    }

    async fn orders(&self) -> Result<Vec<Order>> {
        self.run("list_orders", || self.store.list_orders()).await
    }

    pub async fn update_order(&self, id: Uuid, update: OrderUpdate) -> Result<Order> {
        let updated = match self.run("update_order", || self.store.update_order(id, &update)).await {
            Err(e @ RetailError::IllegalTransition { .. }) => {
                tracing::warn!(order_id = %id, error = %e, "order transition rejected");
                return Err(e);
            }
            other => other?,
        };
        let mut events = Vec::new();
        if let Some((from, to)) = updated.change.status {
            tracing::info!(order_id = %id, %from, %to, "order status changed");
            events.push(DomainEvent::Order(OrderEvent::StatusChanged { order_id: id, from, to }));
        }
        if let Some(payment_status) = updated.change.payment_status {
            tracing::info!(order_id = %id, %payment_status, "payment status changed");
            events.push(DomainEvent::Order(OrderEvent::PaymentChanged { order_id: id, payment_status }));
        }
        events.extend(self.stock_events(&updated.restocked, &updated.movements));
        self.publish(events).await;
        Ok(updated.order)
    }

    pub async fn update_order_status(&self, id: Uuid, status: OrderStatus) -> Result<Order> {
        self.update_order(id, OrderUpdate::status(status)).await
    }

    // -------------------------------------------------------------------------
    // Suppliers & purchase orders
    // -------------------------------------------------------------------------

    pub async fn create_supplier(&self, new: NewSupplier) -> Result<Supplier> {
        let supplier = Supplier::create(new)?;
        let created = self.run("create_supplier", || self.store.create_supplier(supplier.clone())).await?;
        tracing::info!(supplier_id = %created.id, "supplier created");
        Ok(created)
    }

    pub async fn get_supplier(&self, id: Uuid) -> Result<Supplier> {
        self.run("get_supplier", || self.store.get_supplier(id)).await
    }

    pub async fn list_suppliers(&self) -> Result<Vec<Supplier>> {
        self.run("list_suppliers", || self.store.list_suppliers()).await
    }

    pub async fn update_supplier(&self, id: Uuid, update: SupplierUpdate) -> Result<Supplier> {
        let supplier = self.run("update_supplier", || self.store.update_supplier(id, update.clone())).await?;
        tracing::info!(supplier_id = %id, is_active = supplier.is_active, "supplier updated");
        Ok(supplier)
    }

    pub async fn create_purchase_order(&self, draft: PurchaseOrderDraft, items: Vec<PurchaseOrderItemDraft>) -> Result<PurchaseOrderWithItems> {
        let po = self.run("create_purchase_order", || self.store.create_purchase_order(&draft, &items)).await?;
        tracing::info!(purchase_order_id = %po.purchase_order.id, po_number = %po.purchase_order.po_number, "purchase order created");
        Ok(po)
    }

    pub async fn get_purchase_order(&self, id: Uuid) -> Result<PurchaseOrderWithItems> {
        self.run("get_purchase_order", || self.store.get_purchase_order(id)).await
    }

    pub async fn list_purchase_orders(&self) -> Result<Vec<PurchaseOrder>> {
        self.run("list_purchase_orders", || self.store.list_purchase_orders()).await
    }

    pub async fn update_purchase_order_status(&self, id: Uuid, status: PurchaseOrderStatus) -> Result<PurchaseOrderWithItems> {
        let updated = self.run("update_purchase_order_status", || self.store.update_purchase_order_status(id, status)).await?;
        if let Some(from) = updated.previous {
            tracing::info!(purchase_order_id = %id, %from, to = %status, received = updated.movements.len(), "purchase order status changed");
            let mut events = vec![DomainEvent::PurchaseOrder(PurchaseOrderEvent::StatusChanged { purchase_order_id: id, from, to: status })];
            events.extend(self.stock_events(&updated.received, &updated.movements));
            self.publish(events).await;
        }
        Ok(updated.purchase_order)
    }

    // -------------------------------------------------------------------------
    // Dashboard
    // -------------------------------------------------------------------------

    pub async fn low_stock_products(&self) -> Result<Vec<ProductStock>> {
        let products = self.list_products().await?;
        Ok(dashboard::low_stock_products(&products, &self.config.thresholds))
    }

    pub async fn dashboard_stats(&self) -> Result<DashboardStats> {
        let orders = self.orders().await?;
        let products = self.list_products().await?;
        let customers = self.list_customers().await?;
        dashboard::dashboard_stats(&orders, &products, customers.len(), &self.config.thresholds)
    }

    pub async fn recent_orders(&self, limit: usize) -> Result<Vec<OrderWithCustomer>> {
        let orders = self.orders().await?;
        let customers = self.list_customers().await?;
        Ok(dashboard::recent_orders(&orders, &customers, limit))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::dashboard::{StockStatus, StockThresholds};
    use crate::domain::aggregates::{MovementType, PaymentStatus};
    use crate::domain::value_objects::{Money, Sku};
    use crate::publisher::tests::RecordingPublisher;
    use crate::store::MemoryStore;
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    pub(crate) fn ledger_with(config: LedgerConfig) -> (Arc<Ledger>, Arc<RecordingPublisher>) {
        let publisher = Arc::new(RecordingPublisher::default());
        let ledger = Ledger::new(Arc::new(MemoryStore::new()), publisher.clone(), config);
        (Arc::new(ledger), publisher)
    }

    pub(crate) fn ledger() -> (Arc<Ledger>, Arc<RecordingPublisher>) {
        ledger_with(LedgerConfig::default())
    }

    pub(crate) fn new_product(sku: &str, price: &str, stock: u32, min: u32) -> NewProduct {
        NewProduct {
            name: format!("Product {}", sku), sku: Sku::new(sku).unwrap(), description: None,
            category: "sarees".into(), price: price.parse().unwrap(), cost_price: None,
            stock_quantity: stock, min_stock_level: min, is_active: true,
        }
    }

    pub(crate) fn new_customer(name: &str) -> NewCustomer {
        NewCustomer { name: name.into(), phone: "9876543210".into(), ..Default::default() }
    }

    fn qty(n: u32) -> Quantity { Quantity::new(n).unwrap() }

    fn money(s: &str) -> Money { s.parse().unwrap() }

    #[tokio::test]
    async fn test_stock_never_negative_and_matches_history() {
        let (ledger, _) = ledger();
        let p = ledger.create_product(new_product("P1", "10", 5, 2)).await.unwrap();
        let ops = [
            StockAdjustment::subtract(p.id, qty(3)),
            StockAdjustment::add(p.id, qty(10)),
            StockAdjustment::subtract(p.id, qty(50)),
            StockAdjustment::subtract(p.id, qty(1)),
            StockAdjustment::add(p.id, qty(4)),
        ];
        for op in ops {
            ledger.adjust_stock(op).await.unwrap();
            let current = ledger.get_product(p.id).await.unwrap();
            let audit = ledger.stock_audit(p.id).await.unwrap();
            assert!(audit.consistent, "stock {} vs history {}", current.stock_quantity, audit.movement_total);
        }
        let movements = ledger.list_movements(Some(p.id)).await.unwrap();
        assert_eq!(movements.len(), 5);
        assert_eq!(movements[2].quantity, -12);
        assert_eq!(movements[2].requested, 50);
        assert_eq!(movements[3].quantity, 0);
        assert_eq!(ledger.get_product(p.id).await.unwrap().stock_quantity, 4);
    }

    #[tokio::test]
    async fn test_adjust_unknown_product_is_not_found() {
        let (ledger, events) = ledger();
        let err = ledger.adjust_stock(StockAdjustment::add(Uuid::now_v7(), qty(1))).await.unwrap_err();
        assert!(matches!(err, RetailError::NotFound { entity: "product", .. }));
        assert!(events.events.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_scenario_a_low_stock_classification() {
        let config = LedgerConfig { thresholds: StockThresholds { low_ratio: Decimal::from(2), critical_ratio: Decimal::ONE }, ..Default::default() };
        let (ledger, events) = ledger_with(config);
        let p = ledger.create_product(new_product("SCN-A", "100", 10, 5)).await.unwrap();

        let low = ledger.low_stock_products().await.unwrap();
        assert_eq!(low.len(), 1);
        assert_eq!(low[0].stock_status, StockStatus::Low);
        assert_eq!(low[0].product.stock_quantity, 10);

        let m = ledger.adjust_stock(StockAdjustment::subtract(p.id, qty(6))).await.unwrap();
        assert_eq!(m.quantity, -6);
        assert_eq!(m.kind, MovementType::StockOut);
        let low = ledger.low_stock_products().await.unwrap();
        assert_eq!(low[0].stock_status, StockStatus::Critical);
        assert_eq!(low[0].product.stock_quantity, 4);
        assert!(events.subjects().await.contains(&"retail.stock.low"));
    }

    #[tokio::test]
    async fn test_scenario_b_order_placement() {
        let (ledger, events) = ledger();
        let c = ledger.create_customer(new_customer("Meera")).await.unwrap();
        let a = ledger.create_product(new_product("SCN-B1", "100.00", 10, 2)).await.unwrap();
        let b = ledger.create_product(new_product("SCN-B2", "50.00", 5, 2)).await.unwrap();
        let items = vec![OrderItemDraft::priced(a.id, 2, money("100.00")), OrderItemDraft::priced(b.id, 1, money("50.00"))];

        let placed = ledger.place_order(OrderDraft { customer_id: c.id, ..Default::default() }, items).await.unwrap();
        assert_eq!(placed.order.total, money("250.00"));
        assert_eq!(placed.items.len(), 2);

        assert_eq!(ledger.get_product(a.id).await.unwrap().stock_quantity, 8);
        assert_eq!(ledger.get_product(b.id).await.unwrap().stock_quantity, 4);
        let customer = ledger.get_customer(c.id).await.unwrap();
        assert_eq!(customer.total_orders, 1);
        assert_eq!(customer.total_spent, money("250.00"));
        for product in [a.id, b.id] {
            let movements = ledger.list_movements(Some(product)).await.unwrap();
            assert_eq!(movements.len(), 1);
            assert_eq!(movements[0].reference.as_deref(), Some(placed.order.order_number.as_str()));
            assert!(ledger.stock_audit(product).await.unwrap().consistent);
        }
        assert_eq!(events.subjects().await, vec!["retail.order.placed", "retail.stock.adjusted", "retail.stock.adjusted"]);
    }

    #[tokio::test]
    async fn test_order_snapshots_price_with_tax_and_discount() {
        let (ledger, events) = ledger();
        let c = ledger.create_customer(new_customer("Meera")).await.unwrap();
        let p = ledger.create_product(new_product("SNAP", "250.00", 10, 2)).await.unwrap();
        let draft = OrderDraft { customer_id: c.id, tax: Some(money("45.00")), discount: Some(money("20.00")), ..Default::default() };

        let placed = ledger.place_order(draft, vec![OrderItemDraft::new(p.id, 3)]).await.unwrap();
        assert_eq!(placed.order.subtotal, money("750.00"));
        assert_eq!(placed.order.total, money("775.00"));
        assert_eq!(placed.items.len(), 1);
        assert_eq!(placed.items[0].item.price, money("250.00"));

        assert_eq!(ledger.get_product(p.id).await.unwrap().stock_quantity, 7);
        let customer = ledger.get_customer(c.id).await.unwrap();
        assert_eq!(customer.total_orders, 1);
        assert_eq!(customer.total_spent, money("775.00"));
        let movements = ledger.list_movements(Some(p.id)).await.unwrap();
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].reference.as_deref(), Some(placed.order.order_number.as_str()));
        assert_eq!(events.subjects().await, vec!["retail.order.placed", "retail.stock.adjusted"]);
    }

    #[tokio::test]
    async fn test_scenario_c_transitions() {
        let (ledger, _) = ledger();
        let c = ledger.create_customer(new_customer("Ravi")).await.unwrap();
        let p = ledger.create_product(new_product("SCN-C", "10", 10, 0)).await.unwrap();
        let placed = ledger.place_order(OrderDraft { customer_id: c.id, ..Default::default() }, vec![OrderItemDraft::new(p.id, 1)]).await.unwrap();
        let id = placed.order.id;

        for status in [OrderStatus::Confirmed, OrderStatus::Packed, OrderStatus::Shipped] {
            assert_eq!(ledger.update_order_status(id, status).await.unwrap().status, status);
        }
        let err = ledger.update_order_status(id, OrderStatus::Cancelled).await.unwrap_err();
        assert!(matches!(err, RetailError::IllegalTransition { .. }));
        let delivered = ledger.update_order_status(id, OrderStatus::Delivered).await.unwrap();
        assert!(delivered.delivery_date.is_some());
        assert!(ledger.update_order_status(id, OrderStatus::Pending).await.is_err());
        assert_eq!(ledger.get_order(id).await.unwrap().order.status, OrderStatus::Delivered);
    }

    #[tokio::test]
    async fn test_cancellation_restocks_and_reverses_customer() {
        let (ledger, events) = ledger();
        let c = ledger.create_customer(new_customer("Asha")).await.unwrap();
        let p = ledger.create_product(new_product("CNL", "99.50", 4, 1)).await.unwrap();
        let placed = ledger.place_order(OrderDraft { customer_id: c.id, ..Default::default() }, vec![OrderItemDraft::new(p.id, 4)]).await.unwrap();
        assert_eq!(ledger.get_product(p.id).await.unwrap().stock_quantity, 0);

        ledger.update_order_status(placed.order.id, OrderStatus::Cancelled).await.unwrap();
        assert_eq!(ledger.get_product(p.id).await.unwrap().stock_quantity, 4);
        let customer = ledger.get_customer(c.id).await.unwrap();
        assert_eq!(customer.total_orders, 0);
        assert!(customer.total_spent.is_zero());
        assert!(ledger.stock_audit(p.id).await.unwrap().consistent);
        assert!(events.subjects().await.contains(&"retail.order.updated"));

        let err = ledger.update_order(placed.order.id, OrderUpdate::payment(PaymentStatus::Paid)).await.unwrap_err();
        assert!(matches!(err, RetailError::Validation(_)));
    }

    #[tokio::test]
    async fn test_insufficient_stock_leaves_no_trace() {
        let (ledger, events) = ledger();
        let c = ledger.create_customer(new_customer("Kiran")).await.unwrap();
        let a = ledger.create_product(new_product("ATM-A", "10", 10, 0)).await.unwrap();
        let b = ledger.create_product(new_product("ATM-B", "10", 1, 0)).await.unwrap();
        let draft = OrderDraft { customer_id: c.id, ..Default::default() };

        let err = ledger.place_order(draft, vec![OrderItemDraft::new(a.id, 3), OrderItemDraft::new(b.id, 2)]).await.unwrap_err();
        assert_eq!(err, RetailError::InsufficientStock { product_id: b.id, requested: 2, available: 1 });
        assert!(ledger.list_orders().await.unwrap().is_empty());
        assert!(ledger.list_movements(None).await.unwrap().is_empty());
        assert_eq!(ledger.get_product(a.id).await.unwrap().stock_quantity, 10);
        assert_eq!(ledger.get_customer(c.id).await.unwrap().total_orders, 0);
        assert!(events.events.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_orders_never_oversell() {
        let (ledger, _) = ledger();
        let c = ledger.create_customer(new_customer("Rush")).await.unwrap();
        let p = ledger.create_product(new_product("HOT", "5", 7, 0)).await.unwrap();
        let (customer_id, product_id) = (c.id, p.id);

        let handles: Vec<_> = (0..20).map(|_| {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                ledger.place_order(OrderDraft { customer_id, ..Default::default() }, vec![OrderItemDraft::new(product_id, 1)]).await
            })
        }).collect();
        let mut placed = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => placed += 1,
                Err(e) => assert!(matches!(e, RetailError::InsufficientStock { .. }), "unexpected {e}"),
            }
        }
        assert_eq!(placed, 7);
        assert_eq!(ledger.get_product(p.id).await.unwrap().stock_quantity, 0);
        assert_eq!(ledger.get_customer(c.id).await.unwrap().total_orders, 7);
        assert!(ledger.stock_audit(p.id).await.unwrap().consistent);
    }

    #[tokio::test]
    async fn test_idempotent_adjustment_and_order() {
        let (ledger, _) = ledger();
        let c = ledger.create_customer(new_customer("Dev")).await.unwrap();
        let p = ledger.create_product(new_product("IDEM", "10", 10, 0)).await.unwrap();

        let first = ledger.adjust_stock(StockAdjustment::add(p.id, qty(5)).with_idempotency_key("rcpt-1")).await.unwrap();
        let again = ledger.adjust_stock(StockAdjustment::add(p.id, qty(5)).with_idempotency_key("rcpt-1")).await.unwrap();
        assert_eq!(first.id, again.id);
        assert_eq!(ledger.get_product(p.id).await.unwrap().stock_quantity, 15);

        let draft = OrderDraft { customer_id: c.id, idempotency_key: Some("cart-9".into()), ..Default::default() };
        let a = ledger.place_order(draft.clone(), vec![OrderItemDraft::new(p.id, 2)]).await.unwrap();
        let b = ledger.place_order(draft.clone(), vec![OrderItemDraft::new(p.id, 2)]).await.unwrap();
        assert_eq!(a.order.id, b.order.id);
        assert_eq!(ledger.get_product(p.id).await.unwrap().stock_quantity, 13);
        assert_eq!(ledger.get_customer(c.id).await.unwrap().total_orders, 1);

        let other = ledger.create_customer(new_customer("Tara")).await.unwrap();
        let err = ledger.place_order(OrderDraft { customer_id: other.id, ..draft }, vec![OrderItemDraft::new(p.id, 2)]).await.unwrap_err();
        assert!(matches!(err, RetailError::Validation(_)));
        assert_eq!(ledger.get_product(p.id).await.unwrap().stock_quantity, 13);
        assert_eq!(ledger.get_customer(other.id).await.unwrap().total_orders, 0);
    }

    #[tokio::test]
    async fn test_order_past_money_limit_is_rejected() {
        let (ledger, events) = ledger();
        let c = ledger.create_customer(new_customer("Dev")).await.unwrap();
        let p = ledger.create_product(new_product("ZARI", "999999999999.99", 10, 0)).await.unwrap();

        let err = ledger.place_order(OrderDraft { customer_id: c.id, ..Default::default() }, vec![OrderItemDraft::new(p.id, 2)]).await.unwrap_err();
        assert!(matches!(err, RetailError::Validation(_)));
        assert_eq!(ledger.get_product(p.id).await.unwrap().stock_quantity, 10);
        assert!(ledger.list_orders().await.unwrap().is_empty());
        assert!(events.events.lock().await.is_empty());

        let first = ledger.place_order(OrderDraft { customer_id: c.id, ..Default::default() }, vec![OrderItemDraft::new(p.id, 1)]).await.unwrap();
        assert_eq!(first.order.total, Money::MAX);
        let err = ledger.place_order(OrderDraft { customer_id: c.id, ..Default::default() }, vec![OrderItemDraft::new(p.id, 1)]).await.unwrap_err();
        assert!(matches!(err, RetailError::Validation(_)));
        assert_eq!(ledger.get_product(p.id).await.unwrap().stock_quantity, 9);
        assert_eq!(ledger.get_customer(c.id).await.unwrap().total_orders, 1);
    }

    #[tokio::test]
    async fn test_purchase_order_receiving_books_stock() {
        let (ledger, events) = ledger();
        let s = ledger.create_supplier(NewSupplier { name: "Weavers Co-op".into(), phone: "9000000001".into(), ..Default::default() }).await.unwrap();
        let p = ledger.create_product(new_product("RCV", "10", 0, 5)).await.unwrap();
        let po = ledger.create_purchase_order(
            PurchaseOrderDraft { supplier_id: s.id, ..Default::default() },
            vec![PurchaseOrderItemDraft { product_id: p.id, quantity: 12, price: money("6.00") }],
        ).await.unwrap();
        let id = po.purchase_order.id;

        ledger.update_purchase_order_status(id, PurchaseOrderStatus::Sent).await.unwrap();
        let received = ledger.update_purchase_order_status(id, PurchaseOrderStatus::Received).await.unwrap();
        assert!(received.purchase_order.received_date.is_some());
        assert_eq!(ledger.get_product(p.id).await.unwrap().stock_quantity, 12);
        assert!(events.subjects().await.contains(&"retail.purchase_order.received"));

        ledger.update_purchase_order_status(id, PurchaseOrderStatus::Received).await.unwrap();
        assert_eq!(ledger.get_product(p.id).await.unwrap().stock_quantity, 12);
    }

    #[tokio::test]
    async fn test_dashboard_stats() {
        let (ledger, _) = ledger();
        let c = ledger.create_customer(new_customer("Stats")).await.unwrap();
        let p = ledger.create_product(new_product("DSH", "20.00", 3, 5)).await.unwrap();
        ledger.create_product(new_product("DSH-2", "1", 100, 5)).await.unwrap();
        ledger.place_order(OrderDraft { customer_id: c.id, ..Default::default() }, vec![OrderItemDraft::new(p.id, 2)]).await.unwrap();

        let stats = ledger.dashboard_stats().await.unwrap();
        assert_eq!(stats, DashboardStats { total_orders: 1, revenue: money("40.00"), low_stock_count: 1, total_customers: 1 });
        let recent = ledger.recent_orders(5).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].customer.id, c.id);
    }

    #[tokio::test]
    async fn test_retry_recovers_from_conflicts() {
        let config = LedgerConfig { retry_backoff: Duration::from_millis(1), ..Default::default() };
        let calls = AtomicU32::new(0);
        let out = run_with_policy(&config, "test", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 { Err(RetailError::Conflict("busy".into())) } else { Ok(42) }
        }).await;
        assert_eq!(out, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_and_skips_other_errors() {
        let config = LedgerConfig { max_retries: 2, retry_backoff: Duration::from_millis(1), ..Default::default() };
        let calls = AtomicU32::new(0);
        let out: Result<()> = run_with_policy(&config, "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RetailError::Conflict("busy".into()))
        }).await;
        assert!(matches!(out, Err(RetailError::Conflict(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        calls.store(0, Ordering::SeqCst);
        let out: Result<()> = run_with_policy(&config, "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RetailError::Validation("bad".into()))
        }).await;
        assert!(matches!(out, Err(RetailError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_deadline_bounds_operation() {
        let config = LedgerConfig { deadline: Duration::from_millis(20), ..Default::default() };
        let out: Result<()> = run_with_policy(&config, "test", || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        }).await;
        assert_eq!(out, Err(RetailError::Timeout(20)));
    }
}
