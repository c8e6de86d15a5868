//! In-process store for development and tests.
//!
//! All tables sit behind one `RwLock`. Writers plan against the current rows
//! while holding the write guard and only mutate once planning succeeded, so
//! a failed operation leaves every table untouched.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::aggregates::order::restock_cancelled;
use crate::domain::aggregates::purchasing::receive_items;
use crate::domain::aggregates::{
    Customer, CustomerUpdate, InventoryMovement, Order, OrderDraft, OrderItem, OrderItemDraft, OrderPlacement,
    OrderUpdate, OrderWithDetails, Product, ProductUpdate, PurchaseOrder, PurchaseOrderDraft, PurchaseOrderItem,
    PurchaseOrderItemDraft, PurchaseOrderStatus, PurchaseOrderWithItems, StockAdjustment, Supplier, SupplierUpdate,
};
use crate::domain::value_objects::Quantity;
use crate::store::{CustomerReconciliation, LedgerStore, OrderUpdated, PlacedOrder, PurchaseOrderUpdated, StockChange};
use crate::{RetailError, Result};

#[derive(Debug, Default)]
struct Tables {
    products: BTreeMap<Uuid, Product>,
    customers: BTreeMap<Uuid, Customer>,
    orders: BTreeMap<Uuid, Order>,
    order_items: BTreeMap<Uuid, Vec<OrderItem>>,
    movements: Vec<InventoryMovement>,
    suppliers: BTreeMap<Uuid, Supplier>,
    purchase_orders: BTreeMap<Uuid, PurchaseOrder>,
    purchase_order_items: BTreeMap<Uuid, Vec<PurchaseOrderItem>>,
}

impl Tables {
    fn product(&self, id: Uuid) -> Result<&Product> {
        self.products.get(&id).ok_or_else(|| RetailError::not_found("product", id))
    }

    fn customer(&self, id: Uuid) -> Result<&Customer> {
        self.customers.get(&id).ok_or_else(|| RetailError::not_found("customer", id))
    }

    fn movement_by_key(&self, key: &str) -> Option<&InventoryMovement> {
        self.movements.iter().find(|m| m.idempotency_key.as_deref() == Some(key))
    }

    fn order_details(&self, order: &Order) -> Result<OrderWithDetails> {
        let customer = self.customer(order.customer_id)?.clone();
        let items = self.order_items.get(&order.id).cloned().unwrap_or_default();
        let products: HashMap<Uuid, Product> = items.iter()
            .filter_map(|i| self.products.get(&i.product_id).map(|p| (p.id, p.clone())))
            .collect();
        OrderWithDetails::assemble(order.clone(), customer, items, &products)
    }

    fn purchase_order_with_items(&self, po: &PurchaseOrder) -> PurchaseOrderWithItems {
        PurchaseOrderWithItems { purchase_order: po.clone(), items: self.purchase_order_items.get(&po.id).cloned().unwrap_or_default() }
    }

    fn write_products(&mut self, products: impl IntoIterator<Item = Product>) {
        for product in products { self.products.insert(product.id, product); }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn create_product(&self, product: Product) -> Result<Product> {
        let mut t = self.tables.write().await;
        if t.products.values().any(|p| p.sku == product.sku) {
            return Err(RetailError::AlreadyExists(format!("product with SKU {}", product.sku)));
        }
        t.products.insert(product.id, product.clone());
        Ok(product)
    }

    async fn get_product(&self, id: Uuid) -> Result<Product> {
        self.tables.read().await.product(id).cloned()
    }

    async fn list_products(&self) -> Result<Vec<Product>> {
        Ok(self.tables.read().await.products.values().cloned().collect())
    }

    async fn update_product(&self, id: Uuid, update: ProductUpdate) -> Result<Product> {
        let mut t = self.tables.write().await;
        let mut product = t.product(id)?.clone();
        product.apply_update(update)?;
        t.products.insert(id, product.clone());
        Ok(product)
    }

    async fn adjust_stock(&self, adjustment: &StockAdjustment) -> Result<StockChange> {
        let mut t = self.tables.write().await;
        let mut product = t.product(adjustment.product_id)?.clone();
        if let Some(key) = &adjustment.idempotency_key {
            if let Some(existing) = t.movement_by_key(key) {
                let movement = adjustment.replayed_by(existing.clone())?;
                return Ok(StockChange { product, movement, replayed: true });
            }
        }
        let movement = product.adjust(adjustment);
        t.products.insert(product.id, product.clone());
        t.movements.push(movement.clone());
        Ok(StockChange { product, movement, replayed: false })
    }

    async fn record_stock_count(&self, product_id: Uuid, counted: Quantity, notes: Option<String>) -> Result<StockChange> {
        let mut t = self.tables.write().await;
        let mut product = t.product(product_id)?.clone();
        let movement = product.count(counted, notes);
        t.products.insert(product.id, product.clone());
        t.movements.push(movement.clone());
        Ok(StockChange { product, movement, replayed: false })
    }

    async fn list_movements(&self, product_id: Option<Uuid>) -> Result<Vec<InventoryMovement>> {
        let t = self.tables.read().await;
        Ok(t.movements.iter().filter(|m| product_id.map_or(true, |id| m.product_id == id)).cloned().collect())
    }

    async fn create_customer(&self, customer: Customer) -> Result<Customer> {
        self.tables.write().await.customers.insert(customer.id, customer.clone());
        Ok(customer)
    }

    async fn get_customer(&self, id: Uuid) -> Result<Customer> {
        self.tables.read().await.customer(id).cloned()
    }

    async fn list_customers(&self) -> Result<Vec<Customer>> {
        Ok(self.tables.read().await.customers.values().cloned().collect())
    }

    async fn update_customer(&self, id: Uuid, update: CustomerUpdate) -> Result<Customer> {
        let mut t = self.tables.write().await;
        let mut customer = t.customer(id)?.clone();
        customer.apply_update(update)?;
        t.customers.insert(id, customer.clone());
        Ok(customer)
    }

    async fn reconcile_customer(&self, id: Uuid) -> Result<CustomerReconciliation> {
        let mut t = self.tables.write().await;
        let mut customer = t.customer(id)?.clone();
        let drifted = customer.recompute(t.orders.values())?;
        t.customers.insert(id, customer.clone());
        Ok(CustomerReconciliation { customer, drifted })
    }

    async fn place_order(&self, draft: &OrderDraft, items: &[OrderItemDraft]) -> Result<PlacedOrder> {
        let mut t = self.tables.write().await;
        if let Some(key) = &draft.idempotency_key {
            if let Some(existing) = t.orders.values().find(|o| o.idempotency_key.as_deref() == Some(key.as_str())) {
                draft.replayed_by(existing)?;
                return Ok(PlacedOrder { order: t.order_details(existing)?, movements: vec![], replayed: true });
            }
        }
        if let Some(number) = &draft.order_number {
            if t.orders.values().any(|o| o.order_number == number.trim()) {
                return Err(RetailError::AlreadyExists(format!("order number {}", number.trim())));
            }
        }
        let customer = t.customer(draft.customer_id)?.clone();
        let products = items.iter()
            .map(|i| i.product_id)
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .map(|id| t.product(id).cloned())
            .collect::<Result<Vec<_>>>()?;

        let plan = OrderPlacement::plan(draft.clone(), items.to_vec(), customer, products)?;
        let details = plan.details()?;
        let OrderPlacement { order, items, products, movements, customer } = plan;
        t.write_products(products);
        t.movements.extend(movements.iter().cloned());
        t.customers.insert(customer.id, customer);
        t.order_items.insert(order.id, items);
        t.orders.insert(order.id, order);
        Ok(PlacedOrder { order: details, movements, replayed: false })
    }

    async fn get_order(&self, id: Uuid) -> Result<OrderWithDetails> {
        let t = self.tables.read().await;
        let order = t.orders.get(&id).ok_or_else(|| RetailError::not_found("order", id))?;
        t.order_details(order)
    }

    async fn list_orders(&self) -> Result<Vec<Order>> {
        let mut orders: Vec<Order> = self.tables.read().await.orders.values().cloned().collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(orders)
    }

    async fn update_order(&self, id: Uuid, update: &OrderUpdate) -> Result<OrderUpdated> {
        let mut t = self.tables.write().await;
        let mut order = t.orders.get(&id).cloned().ok_or_else(|| RetailError::not_found("order", id))?;
        let change = order.apply_update(update)?;
        let (mut restocked, mut movements) = (vec![], vec![]);
        if change.is_cancellation() {
            let items = t.order_items.get(&id).cloned().unwrap_or_default();
            let mut products = items.iter()
                .map(|i| t.product(i.product_id).map(|p| (p.id, p.clone())))
                .collect::<Result<HashMap<_, _>>>()?;
            let mut customer = t.customer(order.customer_id)?.clone();
            movements = restock_cancelled(&order, &items, &mut products, &mut customer)?;
            restocked = products.into_values().collect();
            t.write_products(restocked.iter().cloned());
            t.movements.extend(movements.iter().cloned());
            t.customers.insert(customer.id, customer);
        }
        t.orders.insert(id, order.clone());
        Ok(OrderUpdated { order, change, restocked, movements })
    }

    async fn create_supplier(&self, supplier: Supplier) -> Result<Supplier> {
        self.tables.write().await.suppliers.insert(supplier.id, supplier.clone());
        Ok(supplier)
    }

    async fn get_supplier(&self, id: Uuid) -> Result<Supplier> {
        self.tables.read().await.suppliers.get(&id).cloned().ok_or_else(|| RetailError::not_found("supplier", id))
    }

    async fn list_suppliers(&self) -> Result<Vec<Supplier>> {
        Ok(self.tables.read().await.suppliers.values().cloned().collect())
    }

    async fn update_supplier(&self, id: Uuid, update: SupplierUpdate) -> Result<Supplier> {
        let mut t = self.tables.write().await;
        let mut supplier = t.suppliers.get(&id).cloned().ok_or_else(|| RetailError::not_found("supplier", id))?;
        supplier.apply_update(update)?;
        t.suppliers.insert(id, supplier.clone());
        Ok(supplier)
    }

    async fn create_purchase_order(&self, draft: &PurchaseOrderDraft, items: &[PurchaseOrderItemDraft]) -> Result<PurchaseOrderWithItems> {
        let mut t = self.tables.write().await;
        let supplier = t.suppliers.get(&draft.supplier_id).cloned().ok_or_else(|| RetailError::not_found("supplier", draft.supplier_id))?;
        let products: HashMap<Uuid, Product> = items.iter()
            .filter_map(|i| t.products.get(&i.product_id).map(|p| (p.id, p.clone())))
            .collect();
        let po = PurchaseOrderWithItems::plan(draft.clone(), items.to_vec(), &supplier, &products)?;
        if t.purchase_orders.values().any(|p| p.po_number == po.purchase_order.po_number) {
            return Err(RetailError::AlreadyExists(format!("purchase order {}", po.purchase_order.po_number)));
        }
        t.purchase_order_items.insert(po.purchase_order.id, po.items.clone());
        t.purchase_orders.insert(po.purchase_order.id, po.purchase_order.clone());
        Ok(po)
    }

    async fn get_purchase_order(&self, id: Uuid) -> Result<PurchaseOrderWithItems> {
        let t = self.tables.read().await;
        let po = t.purchase_orders.get(&id).ok_or_else(|| RetailError::not_found("purchase order", id))?;
        Ok(t.purchase_order_with_items(po))
    }

    async fn list_purchase_orders(&self) -> Result<Vec<PurchaseOrder>> {
        let mut pos: Vec<PurchaseOrder> = self.tables.read().await.purchase_orders.values().cloned().collect();
        pos.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(pos)
    }

    async fn update_purchase_order_status(&self, id: Uuid, status: PurchaseOrderStatus) -> Result<PurchaseOrderUpdated> {
        let mut t = self.tables.write().await;
        let mut po = t.purchase_orders.get(&id).cloned().ok_or_else(|| RetailError::not_found("purchase order", id))?;
        let previous = po.transition(status)?;
        let items = t.purchase_order_items.get(&id).cloned().unwrap_or_default();
        let (mut received, mut movements) = (vec![], vec![]);
        if previous.is_some() && status == PurchaseOrderStatus::Received {
            let mut products = items.iter()
                .map(|i| t.product(i.product_id).map(|p| (p.id, p.clone())))
                .collect::<Result<HashMap<_, _>>>()?;
            movements = receive_items(&po, &items, &mut products)?;
            received = products.into_values().collect();
            t.write_products(received.iter().cloned());
            t.movements.extend(movements.iter().cloned());
        }
        t.purchase_orders.insert(id, po.clone());
        Ok(PurchaseOrderUpdated { purchase_order: PurchaseOrderWithItems { purchase_order: po, items }, previous, received, movements })
    }
}
