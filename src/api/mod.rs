//! HTTP API

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

use crate::dashboard::{DashboardStats, ProductStock};
use crate::domain::aggregates::{
    Customer, CustomerUpdate, InventoryMovement, NewCustomer, NewProduct, NewSupplier, Order, OrderDraft,
    OrderItemDraft, OrderUpdate, OrderWithCustomer, OrderWithDetails, Product, ProductUpdate, PurchaseOrder,
    PurchaseOrderDraft, PurchaseOrderItemDraft, PurchaseOrderStatus, PurchaseOrderWithItems, StockAdjustment,
    StockAudit, Supplier, SupplierUpdate,
};
use crate::domain::value_objects::{Quantity, StockDirection};
use crate::store::CustomerReconciliation;
use crate::{Ledger, RetailError};

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<Ledger>,
}

type ApiResult<T> = Result<Json<T>, RetailError>;
type Created<T> = Result<(StatusCode, Json<T>), RetailError>;

impl IntoResponse for RetailError {
    fn into_response(self) -> Response {
        let status = match &self {
            RetailError::NotFound { .. } => StatusCode::NOT_FOUND,
            RetailError::Validation(_) => StatusCode::BAD_REQUEST,
            RetailError::InsufficientStock { .. }
            | RetailError::IllegalTransition { .. }
            | RetailError::AlreadyExists(_)
            | RetailError::Conflict(_) => StatusCode::CONFLICT,
            RetailError::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            RetailError::Storage(e) => {
                tracing::error!(error = %e, "storage failure");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "opensase-retail"})) }))
        .route("/api/v1/products", get(list_products).post(create_product))
        .route("/api/v1/products/:id", get(get_product).put(update_product))
        .route("/api/v1/products/:id/stock", post(adjust_stock))
        .route("/api/v1/products/:id/stock-count", post(record_stock_count))
        .route("/api/v1/products/:id/stock-audit", get(stock_audit))
        .route("/api/v1/inventory/movements", get(list_movements))
        .route("/api/v1/customers", get(list_customers).post(create_customer))
        .route("/api/v1/customers/:id", get(get_customer).put(update_customer))
        .route("/api/v1/customers/:id/reconcile", post(reconcile_customer))
        .route("/api/v1/orders", get(list_orders).post(place_order))
        .route("/api/v1/orders/:id", get(get_order).patch(update_order))
        .route("/api/v1/suppliers", get(list_suppliers).post(create_supplier))
        .route("/api/v1/suppliers/:id", get(get_supplier).put(update_supplier))
        .route("/api/v1/purchase-orders", get(list_purchase_orders).post(create_purchase_order))
        .route("/api/v1/purchase-orders/:id", get(get_purchase_order).patch(update_purchase_order))
        .route("/api/v1/dashboard/stats", get(dashboard_stats))
        .route("/api/v1/dashboard/stock-alerts", get(stock_alerts))
        .route("/api/v1/dashboard/recent-orders", get(recent_orders))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// =============================================================================
// Products & stock
// =============================================================================

async fn list_products(State(s): State<AppState>) -> ApiResult<Vec<Product>> {
    Ok(Json(s.ledger.list_products().await?))
}

async fn create_product(State(s): State<AppState>, Json(r): Json<NewProduct>) -> Created<Product> {
    Ok((StatusCode::CREATED, Json(s.ledger.create_product(r).await?)))
}

async fn get_product(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Product> {
    Ok(Json(s.ledger.get_product(id).await?))
}

async fn update_product(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<ProductUpdate>) -> ApiResult<Product> {
    Ok(Json(s.ledger.update_product(id, r).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockAdjustmentRequest {
    pub quantity: u32,
    pub direction: StockDirection,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub idempotency_key: Option<String>,
}

async fn adjust_stock(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<StockAdjustmentRequest>) -> Created<InventoryMovement> {
    let adjustment = StockAdjustment {
        product_id: id, quantity: Quantity::new(r.quantity)?, direction: r.direction,
        reference: r.reference, notes: r.notes, idempotency_key: r.idempotency_key,
    };
    Ok((StatusCode::CREATED, Json(s.ledger.adjust_stock(adjustment).await?)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockCountRequest { pub counted: u32, pub notes: Option<String> }

async fn record_stock_count(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<StockCountRequest>) -> Created<InventoryMovement> {
    Ok((StatusCode::CREATED, Json(s.ledger.record_stock_count(id, r.counted, r.notes).await?)))
}

async fn stock_audit(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<StockAudit> {
    Ok(Json(s.ledger.stock_audit(id).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementParams { pub product_id: Option<Uuid> }

async fn list_movements(State(s): State<AppState>, Query(p): Query<MovementParams>) -> ApiResult<Vec<InventoryMovement>> {
    Ok(Json(s.ledger.list_movements(p.product_id).await?))
}

// =============================================================================
// Customers
// =============================================================================

async fn list_customers(State(s): State<AppState>) -> ApiResult<Vec<Customer>> {
    Ok(Json(s.ledger.list_customers().await?))
}

async fn create_customer(State(s): State<AppState>, Json(r): Json<NewCustomer>) -> Created<Customer> {
    Ok((StatusCode::CREATED, Json(s.ledger.create_customer(r).await?)))
}

async fn get_customer(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Customer> {
    Ok(Json(s.ledger.get_customer(id).await?))
}

async fn update_customer(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<CustomerUpdate>) -> ApiResult<Customer> {
    Ok(Json(s.ledger.update_customer(id, r).await?))
}

async fn reconcile_customer(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<CustomerReconciliation> {
    Ok(Json(s.ledger.reconcile_customer(id).await?))
}

// =============================================================================
// Orders
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct PlaceOrderRequest { pub order: OrderDraft, pub items: Vec<OrderItemDraft> }

async fn list_orders(State(s): State<AppState>) -> ApiResult<Vec<OrderWithCustomer>> {
    Ok(Json(s.ledger.list_orders().await?))
}

async fn place_order(State(s): State<AppState>, Json(r): Json<PlaceOrderRequest>) -> Created<OrderWithDetails> {
    Ok((StatusCode::CREATED, Json(s.ledger.place_order(r.order, r.items).await?)))
}

async fn get_order(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<OrderWithDetails> {
    Ok(Json(s.ledger.get_order(id).await?))
}

async fn update_order(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<OrderUpdate>) -> ApiResult<Order> {
    Ok(Json(s.ledger.update_order(id, r).await?))
}

// =============================================================================
// Suppliers & purchase orders
// =============================================================================

async fn list_suppliers(State(s): State<AppState>) -> ApiResult<Vec<Supplier>> {
    Ok(Json(s.ledger.list_suppliers().await?))
}

async fn create_supplier(State(s): State<AppState>, Json(r): Json<NewSupplier>) -> Created<Supplier> {
    Ok((StatusCode::CREATED, Json(s.ledger.create_supplier(r).await?)))
}

async fn get_supplier(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Supplier> {
    Ok(Json(s.ledger.get_supplier(id).await?))
}

async fn update_supplier(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<SupplierUpdate>) -> ApiResult<Supplier> {
    Ok(Json(s.ledger.update_supplier(id, r).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseOrderRequest { pub purchase_order: PurchaseOrderDraft, pub items: Vec<PurchaseOrderItemDraft> }

#[derive(Debug, Deserialize)]
pub struct PurchaseOrderStatusRequest { pub status: PurchaseOrderStatus }

async fn list_purchase_orders(State(s): State<AppState>) -> ApiResult<Vec<PurchaseOrder>> {
    Ok(Json(s.ledger.list_purchase_orders().await?))
}

async fn create_purchase_order(State(s): State<AppState>, Json(r): Json<PurchaseOrderRequest>) -> Created<PurchaseOrderWithItems> {
    Ok((StatusCode::CREATED, Json(s.ledger.create_purchase_order(r.purchase_order, r.items).await?)))
}

async fn get_purchase_order(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<PurchaseOrderWithItems> {
    Ok(Json(s.ledger.get_purchase_order(id).await?))
}

async fn update_purchase_order(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<PurchaseOrderStatusRequest>) -> ApiResult<PurchaseOrderWithItems> {
    Ok(Json(s.ledger.update_purchase_order_status(id, r.status).await?))
}

// =============================================================================
// Dashboard
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct RecentParams { pub limit: Option<usize> }

async fn dashboard_stats(State(s): State<AppState>) -> ApiResult<DashboardStats> {
    Ok(Json(s.ledger.dashboard_stats().await?))
}

async fn stock_alerts(State(s): State<AppState>) -> ApiResult<Vec<ProductStock>> {
    Ok(Json(s.ledger.low_stock_products().await?))
}

async fn recent_orders(State(s): State<AppState>, Query(p): Query<RecentParams>) -> ApiResult<Vec<OrderWithCustomer>> {
    Ok(Json(s.ledger.recent_orders(p.limit.unwrap_or(10).min(100)).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::tests::ledger;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app() -> Router {
        router(AppState { ledger: ledger().0 })
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri).header("content-type", "application/json")
            .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    async fn seed(app: &Router, stock: u32) -> (String, String) {
        let (status, product) = call(app, Method::POST, "/api/v1/products", Some(json!({
            "name": "Kanjivaram", "sku": "kj-01", "category": "sarees", "price": "1200.00",
            "stockQuantity": stock, "minStockLevel": 2
        }))).await;
        assert_eq!(status, StatusCode::CREATED);
        let (_, customer) = call(app, Method::POST, "/api/v1/customers", Some(json!({ "name": "Priya", "phone": "9876543210" }))).await;
        (product["id"].as_str().unwrap().to_string(), customer["id"].as_str().unwrap().to_string())
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = call(&app(), Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_stock_adjustment_flow() {
        let app = app();
        let (product_id, _) = seed(&app, 5).await;
        let (status, movement) = call(&app, Method::POST, &format!("/api/v1/products/{}/stock", product_id),
            Some(json!({ "quantity": 8, "direction": "subtract", "reference": "damaged" }))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(movement["quantity"], -5);
        assert_eq!(movement["type"], "stock-out");

        let (_, product) = call(&app, Method::GET, &format!("/api/v1/products/{}", product_id), None).await;
        assert_eq!(product["stockQuantity"], 0);
        assert_eq!(product["sku"], "KJ-01");

        let (_, audit) = call(&app, Method::GET, &format!("/api/v1/products/{}/stock-audit", product_id), None).await;
        assert_eq!(audit["consistent"], true);

        let (_, alerts) = call(&app, Method::GET, "/api/v1/dashboard/stock-alerts", None).await;
        assert_eq!(alerts[0]["stockStatus"], "critical");
    }

    #[tokio::test]
    async fn test_order_endpoints_and_error_mapping() {
        let app = app();
        let (product_id, customer_id) = seed(&app, 3).await;

        let (status, body) = call(&app, Method::POST, "/api/v1/orders", Some(json!({
            "order": { "customerId": customer_id }, "items": [{ "productId": product_id, "quantity": 4 }]
        }))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("Insufficient stock"));

        let (status, order) = call(&app, Method::POST, "/api/v1/orders", Some(json!({
            "order": { "customerId": customer_id, "tax": "10.00" }, "items": [{ "productId": product_id, "quantity": 2 }]
        }))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(order["total"], "2410.00");
        assert_eq!(order["customer"]["totalOrders"], 1);
        let order_id = order["id"].as_str().unwrap();

        let (status, _) = call(&app, Method::PATCH, &format!("/api/v1/orders/{}", order_id), Some(json!({ "status": "delivered" }))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        let (status, updated) = call(&app, Method::PATCH, &format!("/api/v1/orders/{}", order_id), Some(json!({ "status": "confirmed", "paymentStatus": "paid" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["paymentStatus"], "paid");

        let (status, _) = call(&app, Method::GET, &format!("/api/v1/orders/{}", Uuid::now_v7()), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, stats) = call(&app, Method::GET, "/api/v1/dashboard/stats", None).await;
        assert_eq!(stats["totalOrders"], 1);
        assert_eq!(stats["revenue"], "2410.00");

        let (_, recent) = call(&app, Method::GET, "/api/v1/dashboard/recent-orders?limit=5", None).await;
        assert_eq!(recent.as_array().unwrap().len(), 1);

        let (status, orders) = call(&app, Method::GET, "/api/v1/orders", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(orders.as_array().unwrap().len(), 1);
        assert_eq!(orders[0]["id"], order_id);
        assert_eq!(orders[0]["customer"]["id"], customer_id.as_str());
        assert_eq!(orders[0]["customer"]["name"], "Priya");
    }

    #[tokio::test]
    async fn test_supplier_update_and_deactivation() {
        let app = app();
        let (product_id, _) = seed(&app, 0).await;
        let (_, supplier) = call(&app, Method::POST, "/api/v1/suppliers", Some(json!({ "name": "Kanchi Looms", "phone": "9123456789" }))).await;
        let uri = format!("/api/v1/suppliers/{}", supplier["id"].as_str().unwrap());

        let (status, updated) = call(&app, Method::PUT, &uri, Some(json!({ "paymentTerms": "Net 15", "city": "Kanchipuram" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["paymentTerms"], "Net 15");
        assert_eq!(updated["name"], "Kanchi Looms");
        assert_eq!(updated["isActive"], true);

        let (status, _) = call(&app, Method::PUT, &uri, Some(json!({ "email": "not-an-email" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, retired) = call(&app, Method::PUT, &uri, Some(json!({ "isActive": false }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(retired["isActive"], false);
        let (_, fetched) = call(&app, Method::GET, &uri, None).await;
        assert_eq!(fetched["isActive"], false);

        let (status, body) = call(&app, Method::POST, "/api/v1/purchase-orders", Some(json!({
            "purchaseOrder": { "supplierId": supplier["id"] },
            "items": [{ "productId": product_id, "quantity": 5, "price": "900.00" }]
        }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("inactive"));

        let (status, _) = call(&app, Method::PUT, &format!("/api/v1/suppliers/{}", Uuid::now_v7()), Some(json!({ "isActive": false }))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_oversized_amounts_are_rejected() {
        let app = app();
        let (status, _) = call(&app, Method::POST, "/api/v1/products", Some(json!({
            "name": "Gold zari", "sku": "gz-01", "category": "sarees", "price": "79228162514264337593543950335", "stockQuantity": 10
        }))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, product) = call(&app, Method::POST, "/api/v1/products", Some(json!({
            "name": "Gold zari", "sku": "gz-02", "category": "sarees", "price": "999999999999.99", "stockQuantity": 10
        }))).await;
        assert_eq!(status, StatusCode::CREATED);
        let (_, customer) = call(&app, Method::POST, "/api/v1/customers", Some(json!({ "name": "Priya", "phone": "9876543210" }))).await;
        let (status, body) = call(&app, Method::POST, "/api/v1/orders", Some(json!({
            "order": { "customerId": customer["id"] }, "items": [{ "productId": product["id"], "quantity": 2 }]
        }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("exceeds"));

        let (_, after) = call(&app, Method::GET, &format!("/api/v1/products/{}", product["id"].as_str().unwrap()), None).await;
        assert_eq!(after["stockQuantity"], 10);
    }

    #[tokio::test]
    async fn test_validation_is_bad_request() {
        let app = app();
        let (status, _) = call(&app, Method::POST, "/api/v1/customers", Some(json!({ "name": "", "phone": "1" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (product_id, _) = seed(&app, 1).await;
        let (status, _) = call(&app, Method::POST, &format!("/api/v1/products/{}/stock", product_id),
            Some(json!({ "quantity": 3000000000u64, "direction": "add" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
