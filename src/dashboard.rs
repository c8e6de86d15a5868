//! Dashboard views, recomputed from current state on every call.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::aggregates::{Customer, Order, OrderWithCustomer, Product};
use crate::domain::value_objects::Money;
use crate::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockStatus { Critical, Low }

/// Multipliers of a product's `minStockLevel`.
///
/// A product is low on stock at or below `min × low_ratio`, and critical when
/// empty or at or below `min × critical_ratio`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StockThresholds { pub low_ratio: Decimal, pub critical_ratio: Decimal }

impl Default for StockThresholds {
    fn default() -> Self { Self { low_ratio: Decimal::ONE, critical_ratio: Decimal::new(5, 1) } }
}

impl StockThresholds {
    pub fn classify(&self, product: &Product) -> Option<StockStatus> {
        let qty = Decimal::from(product.stock_quantity);
        let min = Decimal::from(product.min_stock_level);
        if qty > min * self.low_ratio { return None; }
        if product.stock_quantity == 0 || qty <= min * self.critical_ratio { Some(StockStatus::Critical) } else { Some(StockStatus::Low) }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductStock { #[serde(flatten)] pub product: Product, pub is_low_stock: bool, pub stock_status: StockStatus }

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats { pub total_orders: usize, pub revenue: Money, pub low_stock_count: usize, pub total_customers: usize }

pub fn low_stock_products(products: &[Product], thresholds: &StockThresholds) -> Vec<ProductStock> {
    products.iter()
        .filter_map(|p| thresholds.classify(p).map(|stock_status| ProductStock { product: p.clone(), is_low_stock: true, stock_status }))
        .collect()
}

pub fn dashboard_stats(orders: &[Order], products: &[Product], total_customers: usize, thresholds: &StockThresholds) -> Result<DashboardStats> {
    Ok(DashboardStats {
        total_orders: orders.len(),
        revenue: Money::total(orders.iter().map(|o| o.total))?,
        low_stock_count: products.iter().filter(|p| thresholds.classify(p).is_some()).count(),
        total_customers,
    })
}

/// Orders joined with their customer, newest first. Orders whose customer
/// cannot be found are skipped.
pub fn with_customers(orders: &[Order], customers: &[Customer]) -> Vec<OrderWithCustomer> {
    let by_id: HashMap<Uuid, &Customer> = customers.iter().map(|c| (c.id, c)).collect();
    let mut newest: Vec<&Order> = orders.iter().collect();
    newest.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    newest.into_iter()
        .filter_map(|o| by_id.get(&o.customer_id).map(|c| OrderWithCustomer { order: o.clone(), customer: (*c).clone() }))
        .collect()
}

pub fn recent_orders(orders: &[Order], customers: &[Customer], limit: usize) -> Vec<OrderWithCustomer> {
    let mut joined = with_customers(orders, customers);
    joined.truncate(limit);
    joined
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::customer::tests::customer;
    use crate::domain::aggregates::product::tests::product;
    use crate::domain::aggregates::{OrderDraft, OrderItemDraft, OrderPlacement};

    #[test]
    fn test_default_thresholds() {
        let t = StockThresholds::default();
        assert_eq!(t.classify(&product("A", "1", 11, 10)), None);
        assert_eq!(t.classify(&product("B", "1", 10, 10)), Some(StockStatus::Low));
        assert_eq!(t.classify(&product("C", "1", 6, 10)), Some(StockStatus::Low));
        assert_eq!(t.classify(&product("D", "1", 5, 10)), Some(StockStatus::Critical));
        assert_eq!(t.classify(&product("E", "1", 0, 0)), Some(StockStatus::Critical));
        assert_eq!(t.classify(&product("F", "1", 1, 0)), None);
    }

    #[test]
    fn test_widened_thresholds() {
        let t = StockThresholds { low_ratio: Decimal::from(2), critical_ratio: Decimal::ONE };
        assert_eq!(t.classify(&product("A", "1", 10, 5)), Some(StockStatus::Low));
        assert_eq!(t.classify(&product("B", "1", 4, 5)), Some(StockStatus::Critical));
        assert_eq!(t.classify(&product("C", "1", 11, 5)), None);
    }

    #[test]
    fn test_stats_and_recent() {
        let c = customer("Lata");
        let p = product("S", "10.00", 10, 20);
        let q = product("T", "5.00", 50, 20);
        let first = OrderPlacement::plan(OrderDraft { customer_id: c.id, ..Default::default() }, vec![OrderItemDraft::new(p.id, 2)], c.clone(), vec![p.clone()]).unwrap();
        let second = OrderPlacement::plan(OrderDraft { customer_id: c.id, ..Default::default() }, vec![OrderItemDraft::new(q.id, 1)], c.clone(), vec![q.clone()]).unwrap();
        let mut later = second.order.clone();
        later.created_at = first.order.created_at + chrono::Duration::seconds(1);
        let orders = vec![first.order.clone(), later.clone()];

        let stats = dashboard_stats(&orders, &[p.clone(), q], 1, &StockThresholds::default()).unwrap();
        assert_eq!(stats, DashboardStats { total_orders: 2, revenue: "25.00".parse().unwrap(), low_stock_count: 1, total_customers: 1 });

        let recent = recent_orders(&orders, &[c.clone()], 1);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].order.id, later.id);
        let all = with_customers(&orders, &[c.clone()]);
        assert_eq!(all.iter().map(|o| o.order.id).collect::<Vec<_>>(), vec![later.id, first.order.id]);
        assert!(all.iter().all(|o| o.customer.id == c.id));
        assert!(with_customers(&orders, &[]).is_empty());

        let low = low_stock_products(&[p], &StockThresholds::default());
        let v = serde_json::to_value(&low).unwrap();
        assert_eq!(v[0]["stockStatus"], "critical");
        assert_eq!(v[0]["isLowStock"], true);
    }
}
