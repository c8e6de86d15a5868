//! PostgreSQL store.
//!
//! Each write runs in one transaction. Rows that an operation changes are
//! locked with `SELECT ... FOR UPDATE` before planning, products first in id
//! order and the customer after them, so concurrent writers queue on the rows
//! they share instead of overwriting each other.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

use crate::domain::aggregates::order::restock_cancelled;
use crate::domain::aggregates::purchasing::receive_items;
use crate::domain::aggregates::{
    Customer, CustomerUpdate, InventoryMovement, Order, OrderDraft, OrderItem, OrderItemDraft, OrderPlacement,
    OrderUpdate, OrderWithDetails, Product, ProductUpdate, PurchaseOrder, PurchaseOrderDraft, PurchaseOrderItem,
    PurchaseOrderItemDraft, PurchaseOrderStatus, PurchaseOrderWithItems, StockAdjustment, Supplier, SupplierUpdate,
};
use crate::domain::value_objects::{Money, Quantity, Sku};
use crate::store::{CustomerReconciliation, LedgerStore, OrderUpdated, PlacedOrder, PurchaseOrderUpdated, StockChange};
use crate::{RetailError, Result};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }

    pub fn pool(&self) -> &PgPool { &self.pool }
}

// =============================================================================
// Rows
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct ProductRow {
    id: Uuid, sku: String, name: String, description: Option<String>, category: String,
    price: Decimal, cost_price: Option<Decimal>,
    stock_quantity: i32, min_stock_level: i32, opening_stock: i32, is_active: bool,
    created_at: DateTime<Utc>, updated_at: DateTime<Utc>,
}

impl TryFrom<ProductRow> for Product {
    type Error = RetailError;
    fn try_from(r: ProductRow) -> Result<Self> {
        Ok(Self {
            id: r.id, sku: Sku::new(r.sku)?, name: r.name, description: r.description, category: r.category,
            price: money(r.price)?, cost_price: r.cost_price.map(money).transpose()?,
            stock_quantity: count(r.stock_quantity, "stock_quantity")?,
            min_stock_level: count(r.min_stock_level, "min_stock_level")?,
            opening_stock: count(r.opening_stock, "opening_stock")?,
            is_active: r.is_active, created_at: r.created_at, updated_at: r.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct MovementRow {
    id: Uuid, product_id: Uuid, movement_type: String, quantity: i64, requested: i32,
    reference: Option<String>, notes: Option<String>, idempotency_key: Option<String>, created_at: DateTime<Utc>,
}

impl TryFrom<MovementRow> for InventoryMovement {
    type Error = RetailError;
    fn try_from(r: MovementRow) -> Result<Self> {
        Ok(Self {
            id: r.id, product_id: r.product_id, kind: r.movement_type.parse()?, quantity: r.quantity,
            requested: count(r.requested, "requested")?, reference: r.reference, notes: r.notes,
            idempotency_key: r.idempotency_key, created_at: r.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CustomerRow {
    id: Uuid, name: String, phone: String, email: Option<String>, address: Option<String>,
    city: Option<String>, state: Option<String>, pincode: Option<String>, gst_number: Option<String>,
    preferences: Option<String>, notes: Option<String>, total_orders: i32, total_spent: Decimal,
    created_at: DateTime<Utc>,
}

impl TryFrom<CustomerRow> for Customer {
    type Error = RetailError;
    fn try_from(r: CustomerRow) -> Result<Self> {
        Ok(Self {
            id: r.id, name: r.name, phone: r.phone, email: r.email, address: r.address, city: r.city,
            state: r.state, pincode: r.pincode, gst_number: r.gst_number, preferences: r.preferences,
            notes: r.notes, total_orders: count(r.total_orders, "total_orders")?,
            total_spent: money(r.total_spent)?, created_at: r.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: Uuid, order_number: String, customer_id: Uuid, status: String, payment_status: String,
    subtotal: Decimal, discount: Decimal, tax: Decimal, total: Decimal, notes: Option<String>,
    order_date: DateTime<Utc>, delivery_date: Option<DateTime<Utc>>, idempotency_key: Option<String>,
    created_at: DateTime<Utc>, updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = RetailError;
    fn try_from(r: OrderRow) -> Result<Self> {
        Ok(Self {
            id: r.id, order_number: r.order_number, customer_id: r.customer_id,
            status: r.status.parse()?, payment_status: r.payment_status.parse()?,
            subtotal: money(r.subtotal)?, discount: money(r.discount)?, tax: money(r.tax)?, total: money(r.total)?,
            notes: r.notes, order_date: r.order_date, delivery_date: r.delivery_date,
            idempotency_key: r.idempotency_key, created_at: r.created_at, updated_at: r.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct LineRow { id: Uuid, parent_id: Uuid, product_id: Uuid, quantity: i32, price: Decimal, total: Decimal }

impl TryFrom<LineRow> for OrderItem {
    type Error = RetailError;
    fn try_from(r: LineRow) -> Result<Self> {
        Ok(Self { id: r.id, order_id: r.parent_id, product_id: r.product_id, quantity: count(r.quantity, "quantity")?, price: money(r.price)?, total: money(r.total)? })
    }
}

impl TryFrom<LineRow> for PurchaseOrderItem {
    type Error = RetailError;
    fn try_from(r: LineRow) -> Result<Self> {
        Ok(Self { id: r.id, purchase_order_id: r.parent_id, product_id: r.product_id, quantity: count(r.quantity, "quantity")?, price: money(r.price)?, total: money(r.total)? })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SupplierRow {
    id: Uuid, name: String, phone: String, email: Option<String>, address: Option<String>,
    city: Option<String>, state: Option<String>, pincode: Option<String>, gst_number: Option<String>,
    bank_details: Option<String>, payment_terms: Option<String>, is_active: bool, created_at: DateTime<Utc>,
}

impl From<SupplierRow> for Supplier {
    fn from(r: SupplierRow) -> Self {
        Self {
            id: r.id, name: r.name, phone: r.phone, email: r.email, address: r.address, city: r.city,
            state: r.state, pincode: r.pincode, gst_number: r.gst_number, bank_details: r.bank_details,
            payment_terms: r.payment_terms, is_active: r.is_active, created_at: r.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PurchaseOrderRow {
    id: Uuid, po_number: String, supplier_id: Uuid, status: String,
    subtotal: Decimal, tax: Decimal, total: Decimal, notes: Option<String>,
    expected_date: Option<DateTime<Utc>>, received_date: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>, updated_at: DateTime<Utc>,
}

impl TryFrom<PurchaseOrderRow> for PurchaseOrder {
    type Error = RetailError;
    fn try_from(r: PurchaseOrderRow) -> Result<Self> {
        Ok(Self {
            id: r.id, po_number: r.po_number, supplier_id: r.supplier_id, status: r.status.parse()?,
            subtotal: money(r.subtotal)?, tax: money(r.tax)?, total: money(r.total)?, notes: r.notes,
            expected_date: r.expected_date, received_date: r.received_date,
            created_at: r.created_at, updated_at: r.updated_at,
        })
    }
}

fn count(value: i32, column: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| RetailError::Storage(format!("{} holds negative value {}", column, value)))
}

fn int(value: u32, field: &str) -> Result<i32> {
    i32::try_from(value).map_err(|_| RetailError::Validation(format!("{} {} is out of range", field, value)))
}

fn money(value: Decimal) -> Result<Money> {
    Ok(Money::try_from(value)?)
}

fn convert<R, T: TryFrom<R, Error = RetailError>>(rows: Vec<R>) -> Result<Vec<T>> {
    rows.into_iter().map(T::try_from).collect()
}

/// Serialization failures and deadlocks are worth retrying; a unique
/// violation on an idempotency key means a concurrent twin committed first,
/// so it is retried too and the retry replays the stored result.
pub(crate) fn classify(e: sqlx::Error) -> RetailError {
    if let Some(db) = e.as_database_error() {
        match (db.code().as_deref(), db.constraint()) {
            (Some("40001" | "40P01"), _) => return RetailError::Conflict(db.message().to_string()),
            (Some("23505"), Some(c)) if c.contains("idempotency_key") => return RetailError::Conflict(format!("concurrent request on {}", c)),
            (Some("23505"), c) => return RetailError::AlreadyExists(c.unwrap_or("unique key").to_string()),
            _ => {}
        }
    }
    RetailError::Storage(e.to_string())
}

// =============================================================================
// Row access inside a transaction
// =============================================================================

async fn product_for_update(conn: &mut PgConnection, id: Uuid) -> Result<Product> {
    sqlx::query_as::<_, ProductRow>("SELECT * FROM products WHERE id = $1 FOR UPDATE")
        .bind(id).fetch_optional(&mut *conn).await?
        .ok_or_else(|| RetailError::not_found("product", id))?
        .try_into()
}

/// Locks the given products in id order. Missing ids are simply absent.
async fn products_for_update(conn: &mut PgConnection, ids: impl IntoIterator<Item = Uuid>) -> Result<Vec<Product>> {
    let ids: Vec<Uuid> = ids.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
    let rows = sqlx::query_as::<_, ProductRow>("SELECT * FROM products WHERE id = ANY($1) ORDER BY id FOR UPDATE")
        .bind(ids).fetch_all(&mut *conn).await?;
    convert(rows)
}

async fn customer_for_update(conn: &mut PgConnection, id: Uuid) -> Result<Customer> {
    sqlx::query_as::<_, CustomerRow>("SELECT * FROM customers WHERE id = $1 FOR UPDATE")
        .bind(id).fetch_optional(&mut *conn).await?
        .ok_or_else(|| RetailError::not_found("customer", id))?
        .try_into()
}

async fn movement_by_key(conn: &mut PgConnection, key: &str) -> Result<Option<InventoryMovement>> {
    sqlx::query_as::<_, MovementRow>("SELECT * FROM inventory_movements WHERE idempotency_key = $1")
        .bind(key).fetch_optional(&mut *conn).await?
        .map(InventoryMovement::try_from).transpose()
}

async fn save_stock(conn: &mut PgConnection, product: &Product) -> Result<()> {
    sqlx::query("UPDATE products SET stock_quantity = $2, updated_at = $3 WHERE id = $1")
        .bind(product.id).bind(int(product.stock_quantity, "stock quantity")?).bind(product.updated_at)
        .execute(&mut *conn).await?;
    Ok(())
}

async fn insert_movement(conn: &mut PgConnection, m: &InventoryMovement) -> Result<()> {
    sqlx::query("INSERT INTO inventory_movements (id, product_id, movement_type, quantity, requested, reference, notes, idempotency_key, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)")
        .bind(m.id).bind(m.product_id).bind(m.kind.as_str()).bind(m.quantity).bind(int(m.requested, "requested quantity")?)
        .bind(&m.reference).bind(&m.notes).bind(&m.idempotency_key).bind(m.created_at)
        .execute(&mut *conn).await?;
    Ok(())
}

async fn save_customer_totals(conn: &mut PgConnection, c: &Customer) -> Result<()> {
    sqlx::query("UPDATE customers SET total_orders = $2, total_spent = $3 WHERE id = $1")
        .bind(c.id).bind(int(c.total_orders, "total orders")?).bind(c.total_spent.amount())
        .execute(&mut *conn).await?;
    Ok(())
}

async fn order_items(conn: &mut PgConnection, order_id: Uuid) -> Result<Vec<OrderItem>> {
    let rows = sqlx::query_as::<_, LineRow>("SELECT id, order_id AS parent_id, product_id, quantity, price, total FROM order_items WHERE order_id = $1 ORDER BY id")
        .bind(order_id).fetch_all(&mut *conn).await?;
    convert(rows)
}

async fn purchase_order_items(conn: &mut PgConnection, po_id: Uuid) -> Result<Vec<PurchaseOrderItem>> {
    let rows = sqlx::query_as::<_, LineRow>("SELECT id, purchase_order_id AS parent_id, product_id, quantity, price, total FROM purchase_order_items WHERE purchase_order_id = $1 ORDER BY id")
        .bind(po_id).fetch_all(&mut *conn).await?;
    convert(rows)
}

async fn order_details(conn: &mut PgConnection, order: Order) -> Result<OrderWithDetails> {
    let customer: Customer = sqlx::query_as::<_, CustomerRow>("SELECT * FROM customers WHERE id = $1")
        .bind(order.customer_id).fetch_optional(&mut *conn).await?
        .ok_or_else(|| RetailError::not_found("customer", order.customer_id))?
        .try_into()?;
    let items = order_items(conn, order.id).await?;
    let ids: Vec<Uuid> = items.iter().map(|i| i.product_id).collect();
    let rows = sqlx::query_as::<_, ProductRow>("SELECT * FROM products WHERE id = ANY($1)")
        .bind(ids).fetch_all(&mut *conn).await?;
    let products: HashMap<Uuid, Product> = convert::<_, Product>(rows)?.into_iter().map(|p| (p.id, p)).collect();
    OrderWithDetails::assemble(order, customer, items, &products)
}

#[async_trait]
impl LedgerStore for PgStore {
    async fn create_product(&self, p: Product) -> Result<Product> {
        sqlx::query("INSERT INTO products (id, sku, name, description, category, price, cost_price, stock_quantity, min_stock_level, opening_stock, is_active, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)")
            .bind(p.id).bind(p.sku.as_str()).bind(&p.name).bind(&p.description).bind(&p.category)
            .bind(p.price.amount()).bind(p.cost_price.map(|c| c.amount()))
            .bind(int(p.stock_quantity, "stock quantity")?).bind(int(p.min_stock_level, "minimum stock level")?)
            .bind(int(p.opening_stock, "opening stock")?).bind(p.is_active).bind(p.created_at).bind(p.updated_at)
            .execute(&self.pool).await?;
        Ok(p)
    }

    async fn get_product(&self, id: Uuid) -> Result<Product> {
        sqlx::query_as::<_, ProductRow>("SELECT * FROM products WHERE id = $1")
            .bind(id).fetch_optional(&self.pool).await?
            .ok_or_else(|| RetailError::not_found("product", id))?
            .try_into()
    }

    async fn list_products(&self) -> Result<Vec<Product>> {
        let rows = sqlx::query_as::<_, ProductRow>("SELECT * FROM products ORDER BY created_at, id")
            .fetch_all(&self.pool).await?;
        convert(rows)
    }

    async fn update_product(&self, id: Uuid, update: ProductUpdate) -> Result<Product> {
        let mut tx = self.pool.begin().await?;
        let mut p = product_for_update(&mut tx, id).await?;
        p.apply_update(update)?;
        sqlx::query("UPDATE products SET name = $2, description = $3, category = $4, price = $5, cost_price = $6, min_stock_level = $7, is_active = $8, updated_at = $9 WHERE id = $1")
            .bind(p.id).bind(&p.name).bind(&p.description).bind(&p.category).bind(p.price.amount())
            .bind(p.cost_price.map(|c| c.amount())).bind(int(p.min_stock_level, "minimum stock level")?)
            .bind(p.is_active).bind(p.updated_at)
            .execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(p)
    }

    async fn adjust_stock(&self, adjustment: &StockAdjustment) -> Result<StockChange> {
        let mut tx = self.pool.begin().await?;
        let mut product = product_for_update(&mut tx, adjustment.product_id).await?;
        if let Some(key) = &adjustment.idempotency_key {
            if let Some(existing) = movement_by_key(&mut tx, key).await? {
                let movement = adjustment.replayed_by(existing)?;
                return Ok(StockChange { product, movement, replayed: true });
            }
        }
        let movement = product.adjust(adjustment);
        save_stock(&mut tx, &product).await?;
        insert_movement(&mut tx, &movement).await?;
        tx.commit().await?;
        Ok(StockChange { product, movement, replayed: false })
    }

    async fn record_stock_count(&self, product_id: Uuid, counted: Quantity, notes: Option<String>) -> Result<StockChange> {
        let mut tx = self.pool.begin().await?;
        let mut product = product_for_update(&mut tx, product_id).await?;
        let movement = product.count(counted, notes);
        save_stock(&mut tx, &product).await?;
        insert_movement(&mut tx, &movement).await?;
        tx.commit().await?;
        Ok(StockChange { product, movement, replayed: false })
    }

    async fn list_movements(&self, product_id: Option<Uuid>) -> Result<Vec<InventoryMovement>> {
        let rows = sqlx::query_as::<_, MovementRow>("SELECT * FROM inventory_movements WHERE ($1::uuid IS NULL OR product_id = $1) ORDER BY created_at, id")
            .bind(product_id).fetch_all(&self.pool).await?;
        convert(rows)
    }

    async fn create_customer(&self, c: Customer) -> Result<Customer> {
        sqlx::query("INSERT INTO customers (id, name, phone, email, address, city, state, pincode, gst_number, preferences, notes, total_orders, total_spent, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)")
            .bind(c.id).bind(&c.name).bind(&c.phone).bind(&c.email).bind(&c.address).bind(&c.city).bind(&c.state)
            .bind(&c.pincode).bind(&c.gst_number).bind(&c.preferences).bind(&c.notes)
            .bind(int(c.total_orders, "total orders")?).bind(c.total_spent.amount()).bind(c.created_at)
            .execute(&self.pool).await?;
        Ok(c)
    }

    async fn get_customer(&self, id: Uuid) -> Result<Customer> {
        sqlx::query_as::<_, CustomerRow>("SELECT * FROM customers WHERE id = $1")
            .bind(id).fetch_optional(&self.pool).await?
            .ok_or_else(|| RetailError::not_found("customer", id))?
            .try_into()
    }

    async fn list_customers(&self) -> Result<Vec<Customer>> {
        let rows = sqlx::query_as::<_, CustomerRow>("SELECT * FROM customers ORDER BY created_at, id")
            .fetch_all(&self.pool).await?;
        convert(rows)
    }

    async fn update_customer(&self, id: Uuid, update: CustomerUpdate) -> Result<Customer> {
        let mut tx = self.pool.begin().await?;
        let mut c = customer_for_update(&mut tx, id).await?;
        c.apply_update(update)?;
        sqlx::query("UPDATE customers SET name = $2, phone = $3, email = $4, address = $5, city = $6, state = $7, pincode = $8, gst_number = $9, preferences = $10, notes = $11 WHERE id = $1")
            .bind(c.id).bind(&c.name).bind(&c.phone).bind(&c.email).bind(&c.address).bind(&c.city).bind(&c.state)
            .bind(&c.pincode).bind(&c.gst_number).bind(&c.preferences).bind(&c.notes)
            .execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(c)
    }

    async fn reconcile_customer(&self, id: Uuid) -> Result<CustomerReconciliation> {
        let mut tx = self.pool.begin().await?;
        let mut customer = customer_for_update(&mut tx, id).await?;
        let rows = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE customer_id = $1")
            .bind(id).fetch_all(&mut *tx).await?;
        let orders: Vec<Order> = convert(rows)?;
        let drifted = customer.recompute(&orders)?;
        if drifted {
            save_customer_totals(&mut tx, &customer).await?;
        }
        tx.commit().await?;
        Ok(CustomerReconciliation { customer, drifted })
    }

    async fn place_order(&self, draft: &OrderDraft, items: &[OrderItemDraft]) -> Result<PlacedOrder> {
        let mut tx = self.pool.begin().await?;
        if let Some(key) = &draft.idempotency_key {
            let existing = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE idempotency_key = $1")
                .bind(key).fetch_optional(&mut *tx).await?;
            if let Some(row) = existing {
                let order: Order = row.try_into()?;
                draft.replayed_by(&order)?;
                let order = order_details(&mut tx, order).await?;
                return Ok(PlacedOrder { order, movements: vec![], replayed: true });
            }
        }
        draft.check(items)?;
        let products = products_for_update(&mut tx, items.iter().map(|i| i.product_id)).await?;
        let customer = customer_for_update(&mut tx, draft.customer_id).await?;
        let plan = OrderPlacement::plan(draft.clone(), items.to_vec(), customer, products)?;
        let details = plan.details()?;

        let o = &plan.order;
        sqlx::query("INSERT INTO orders (id, order_number, customer_id, status, payment_status, subtotal, discount, tax, total, notes, order_date, delivery_date, idempotency_key, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)")
            .bind(o.id).bind(&o.order_number).bind(o.customer_id).bind(o.status.as_str()).bind(o.payment_status.as_str())
            .bind(o.subtotal.amount()).bind(o.discount.amount()).bind(o.tax.amount()).bind(o.total.amount())
            .bind(&o.notes).bind(o.order_date).bind(o.delivery_date).bind(&o.idempotency_key).bind(o.created_at).bind(o.updated_at)
            .execute(&mut *tx).await?;
        for item in &plan.items {
            sqlx::query("INSERT INTO order_items (id, order_id, product_id, quantity, price, total) VALUES ($1, $2, $3, $4, $5, $6)")
                .bind(item.id).bind(item.order_id).bind(item.product_id).bind(int(item.quantity, "quantity")?)
                .bind(item.price.amount()).bind(item.total.amount())
                .execute(&mut *tx).await?;
        }
        for product in &plan.products {
            save_stock(&mut tx, product).await?;
        }
        for movement in &plan.movements {
            insert_movement(&mut tx, movement).await?;
        }
        save_customer_totals(&mut tx, &plan.customer).await?;
        tx.commit().await?;
        Ok(PlacedOrder { order: details, movements: plan.movements, replayed: false })
    }

    async fn get_order(&self, id: Uuid) -> Result<OrderWithDetails> {
        let mut conn = self.pool.acquire().await?;
        let order: Order = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE id = $1")
            .bind(id).fetch_optional(&mut *conn).await?
            .ok_or_else(|| RetailError::not_found("order", id))?
            .try_into()?;
        order_details(&mut conn, order).await
    }

    async fn list_orders(&self) -> Result<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders ORDER BY created_at DESC, id DESC")
            .fetch_all(&self.pool).await?;
        convert(rows)
    }

    async fn update_order(&self, id: Uuid, update: &OrderUpdate) -> Result<OrderUpdated> {
        let mut tx = self.pool.begin().await?;
        let mut order: Order = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE id = $1 FOR UPDATE")
            .bind(id).fetch_optional(&mut *tx).await?
            .ok_or_else(|| RetailError::not_found("order", id))?
            .try_into()?;
        let change = order.apply_update(update)?;
        let (mut restocked, mut movements) = (vec![], vec![]);
        if change.is_cancellation() {
            let items = order_items(&mut tx, id).await?;
            let mut products: HashMap<Uuid, Product> = products_for_update(&mut tx, items.iter().map(|i| i.product_id)).await?
                .into_iter().map(|p| (p.id, p)).collect();
            let mut customer = customer_for_update(&mut tx, order.customer_id).await?;
            movements = restock_cancelled(&order, &items, &mut products, &mut customer)?;
            for product in products.values() {
                save_stock(&mut tx, product).await?;
            }
            for movement in &movements {
                insert_movement(&mut tx, movement).await?;
            }
            save_customer_totals(&mut tx, &customer).await?;
            restocked = products.into_values().collect();
        }
        sqlx::query("UPDATE orders SET status = $2, payment_status = $3, notes = $4, delivery_date = $5, updated_at = $6 WHERE id = $1")
            .bind(order.id).bind(order.status.as_str()).bind(order.payment_status.as_str())
            .bind(&order.notes).bind(order.delivery_date).bind(order.updated_at)
            .execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(OrderUpdated { order, change, restocked, movements })
    }

    async fn create_supplier(&self, s: Supplier) -> Result<Supplier> {
        sqlx::query("INSERT INTO suppliers (id, name, phone, email, address, city, state, pincode, gst_number, bank_details, payment_terms, is_active, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)")
            .bind(s.id).bind(&s.name).bind(&s.phone).bind(&s.email).bind(&s.address).bind(&s.city).bind(&s.state)
            .bind(&s.pincode).bind(&s.gst_number).bind(&s.bank_details).bind(&s.payment_terms).bind(s.is_active).bind(s.created_at)
            .execute(&self.pool).await?;
        Ok(s)
    }

    async fn get_supplier(&self, id: Uuid) -> Result<Supplier> {
        sqlx::query_as::<_, SupplierRow>("SELECT * FROM suppliers WHERE id = $1")
            .bind(id).fetch_optional(&self.pool).await?
            .map(Supplier::from)
            .ok_or_else(|| RetailError::not_found("supplier", id))
    }

    async fn list_suppliers(&self) -> Result<Vec<Supplier>> {
        let rows = sqlx::query_as::<_, SupplierRow>("SELECT * FROM suppliers ORDER BY name, id")
            .fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Supplier::from).collect())
    }

    async fn update_supplier(&self, id: Uuid, update: SupplierUpdate) -> Result<Supplier> {
        let mut tx = self.pool.begin().await?;
        let mut s: Supplier = sqlx::query_as::<_, SupplierRow>("SELECT * FROM suppliers WHERE id = $1 FOR UPDATE")
            .bind(id).fetch_optional(&mut *tx).await?
            .map(Supplier::from)
            .ok_or_else(|| RetailError::not_found("supplier", id))?;
        s.apply_update(update)?;
        sqlx::query("UPDATE suppliers SET name = $2, phone = $3, email = $4, address = $5, city = $6, state = $7, pincode = $8, gst_number = $9, bank_details = $10, payment_terms = $11, is_active = $12 WHERE id = $1")
            .bind(s.id).bind(&s.name).bind(&s.phone).bind(&s.email).bind(&s.address).bind(&s.city).bind(&s.state)
            .bind(&s.pincode).bind(&s.gst_number).bind(&s.bank_details).bind(&s.payment_terms).bind(s.is_active)
            .execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(s)
    }

    async fn create_purchase_order(&self, draft: &PurchaseOrderDraft, items: &[PurchaseOrderItemDraft]) -> Result<PurchaseOrderWithItems> {
        let mut tx = self.pool.begin().await?;
        let supplier: Supplier = sqlx::query_as::<_, SupplierRow>("SELECT * FROM suppliers WHERE id = $1 FOR SHARE")
            .bind(draft.supplier_id).fetch_optional(&mut *tx).await?
            .map(Supplier::from)
            .ok_or_else(|| RetailError::not_found("supplier", draft.supplier_id))?;
        let ids: Vec<Uuid> = items.iter().map(|i| i.product_id).collect();
        let rows = sqlx::query_as::<_, ProductRow>("SELECT * FROM products WHERE id = ANY($1)")
            .bind(ids).fetch_all(&mut *tx).await?;
        let products: HashMap<Uuid, Product> = convert::<_, Product>(rows)?.into_iter().map(|p| (p.id, p)).collect();
        let po = PurchaseOrderWithItems::plan(draft.clone(), items.to_vec(), &supplier, &products)?;

        let p = &po.purchase_order;
        sqlx::query("INSERT INTO purchase_orders (id, po_number, supplier_id, status, subtotal, tax, total, notes, expected_date, received_date, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)")
            .bind(p.id).bind(&p.po_number).bind(p.supplier_id).bind(p.status.as_str())
            .bind(p.subtotal.amount()).bind(p.tax.amount()).bind(p.total.amount()).bind(&p.notes)
            .bind(p.expected_date).bind(p.received_date).bind(p.created_at).bind(p.updated_at)
            .execute(&mut *tx).await?;
        for item in &po.items {
            sqlx::query("INSERT INTO purchase_order_items (id, purchase_order_id, product_id, quantity, price, total) VALUES ($1, $2, $3, $4, $5, $6)")
                .bind(item.id).bind(item.purchase_order_id).bind(item.product_id).bind(int(item.quantity, "quantity")?)
                .bind(item.price.amount()).bind(item.total.amount())
                .execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(po)
    }

    async fn get_purchase_order(&self, id: Uuid) -> Result<PurchaseOrderWithItems> {
        let mut conn = self.pool.acquire().await?;
        let purchase_order: PurchaseOrder = sqlx::query_as::<_, PurchaseOrderRow>("SELECT * FROM purchase_orders WHERE id = $1")
            .bind(id).fetch_optional(&mut *conn).await?
            .ok_or_else(|| RetailError::not_found("purchase order", id))?
            .try_into()?;
        let items = purchase_order_items(&mut conn, id).await?;
        Ok(PurchaseOrderWithItems { purchase_order, items })
    }

    async fn list_purchase_orders(&self) -> Result<Vec<PurchaseOrder>> {
        let rows = sqlx::query_as::<_, PurchaseOrderRow>("SELECT * FROM purchase_orders ORDER BY created_at DESC, id DESC")
            .fetch_all(&self.pool).await?;
        convert(rows)
    }

    async fn update_purchase_order_status(&self, id: Uuid, status: PurchaseOrderStatus) -> Result<PurchaseOrderUpdated> {
        let mut tx = self.pool.begin().await?;
        let mut po: PurchaseOrder = sqlx::query_as::<_, PurchaseOrderRow>("SELECT * FROM purchase_orders WHERE id = $1 FOR UPDATE")
            .bind(id).fetch_optional(&mut *tx).await?
            .ok_or_else(|| RetailError::not_found("purchase order", id))?
            .try_into()?;
        let previous = po.transition(status)?;
        let items = purchase_order_items(&mut tx, id).await?;
        let (mut received, mut movements) = (vec![], vec![]);
        if previous.is_some() && status == PurchaseOrderStatus::Received {
            let mut products: HashMap<Uuid, Product> = products_for_update(&mut tx, items.iter().map(|i| i.product_id)).await?
                .into_iter().map(|p| (p.id, p)).collect();
            movements = receive_items(&po, &items, &mut products)?;
            for product in products.values() {
                save_stock(&mut tx, product).await?;
            }
            for movement in &movements {
                insert_movement(&mut tx, movement).await?;
            }
            received = products.into_values().collect();
        }
        if previous.is_some() {
            sqlx::query("UPDATE purchase_orders SET status = $2, received_date = $3, updated_at = $4 WHERE id = $1")
                .bind(po.id).bind(po.status.as_str()).bind(po.received_date).bind(po.updated_at)
                .execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(PurchaseOrderUpdated { purchase_order: PurchaseOrderWithItems { purchase_order: po, items }, previous, received, movements })
    }
}
