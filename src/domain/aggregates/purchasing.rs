//! Suppliers and purchase orders. Receiving a purchase order is the other
//! way stock enters the ledger besides manual adjustments.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

use crate::domain::aggregates::movement::{InventoryMovement, StockAdjustment};
use crate::domain::aggregates::Product;
use crate::domain::value_objects::{Money, Quantity};
use crate::{RetailError, Result};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Supplier {
    pub id: Uuid,
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub pincode: Option<String>,
    pub gst_number: Option<String>,
    pub bank_details: Option<String>,
    pub payment_terms: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewSupplier {
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(length(min = 10))]
    pub phone: String,
    #[validate(email)]
    pub email: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub pincode: Option<String>,
    pub gst_number: Option<String>,
    pub bank_details: Option<String>,
    pub payment_terms: Option<String>,
    pub is_active: Option<bool>,
}

/// Fields a supplier update may change. Setting `isActive` to false retires
/// the supplier; new purchase orders are then refused.
#[derive(Clone, Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SupplierUpdate {
    #[validate(length(min = 1))]
    pub name: Option<String>,
    #[validate(length(min = 10))]
    pub phone: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub pincode: Option<String>,
    pub gst_number: Option<String>,
    pub bank_details: Option<String>,
    pub payment_terms: Option<String>,
    pub is_active: Option<bool>,
}

impl Supplier {
    pub fn create(new: NewSupplier) -> Result<Self> {
        new.validate()?;
        Ok(Self {
            id: Uuid::now_v7(), name: new.name, phone: new.phone, email: new.email, address: new.address,
            city: new.city, state: new.state, pincode: new.pincode, gst_number: new.gst_number,
            bank_details: new.bank_details, payment_terms: new.payment_terms,
            is_active: new.is_active.unwrap_or(true), created_at: Utc::now(),
        })
    }

    pub fn apply_update(&mut self, update: SupplierUpdate) -> Result<()> {
        update.validate()?;
        let SupplierUpdate { name, phone, email, address, city, state, pincode, gst_number, bank_details, payment_terms, is_active } = update;
        if let Some(v) = name { self.name = v; }
        if let Some(v) = phone { self.phone = v; }
        if email.is_some() { self.email = email; }
        if address.is_some() { self.address = address; }
        if city.is_some() { self.city = city; }
        if state.is_some() { self.state = state; }
        if pincode.is_some() { self.pincode = pincode; }
        if gst_number.is_some() { self.gst_number = gst_number; }
        if bank_details.is_some() { self.bank_details = bank_details; }
        if payment_terms.is_some() { self.payment_terms = payment_terms; }
        if let Some(v) = is_active { self.is_active = v; }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PurchaseOrderStatus { #[default] Pending, Sent, Received, Cancelled }

impl PurchaseOrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Pending => "pending", Self::Sent => "sent", Self::Received => "received", Self::Cancelled => "cancelled" }
    }

    pub fn can_transition_to(&self, next: PurchaseOrderStatus) -> bool {
        use PurchaseOrderStatus::*;
        matches!((self, next), (Pending, Sent) | (Pending, Cancelled) | (Sent, Received) | (Sent, Cancelled))
    }
}

impl fmt::Display for PurchaseOrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for PurchaseOrderStatus {
    type Err = RetailError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending), "sent" => Ok(Self::Sent), "received" => Ok(Self::Received), "cancelled" => Ok(Self::Cancelled),
            other => Err(RetailError::Validation(format!("unknown purchase order status '{}'", other))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseOrder {
    pub id: Uuid,
    pub po_number: String,
    pub supplier_id: Uuid,
    pub status: PurchaseOrderStatus,
    pub subtotal: Money,
    pub tax: Money,
    pub total: Money,
    pub notes: Option<String>,
    pub expected_date: Option<DateTime<Utc>>,
    pub received_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseOrderItem { pub id: Uuid, pub purchase_order_id: Uuid, pub product_id: Uuid, pub quantity: u32, pub price: Money, pub total: Money }

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseOrderWithItems { #[serde(flatten)] pub purchase_order: PurchaseOrder, pub items: Vec<PurchaseOrderItem> }

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseOrderDraft {
    pub po_number: Option<String>,
    pub supplier_id: Uuid,
    pub subtotal: Option<Money>,
    pub tax: Option<Money>,
    pub total: Option<Money>,
    pub notes: Option<String>,
    pub expected_date: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseOrderItemDraft { pub product_id: Uuid, pub quantity: u32, pub price: Money }

impl PurchaseOrderWithItems {
    /// Builds a new purchase order from a draft once the supplier and every
    /// product have been confirmed to exist.
    pub fn plan(draft: PurchaseOrderDraft, items: Vec<PurchaseOrderItemDraft>, supplier: &Supplier, products: &HashMap<Uuid, Product>) -> Result<Self> {
        if items.is_empty() { return Err(RetailError::Validation("a purchase order needs at least one item".into())); }
        if !supplier.is_active { return Err(RetailError::Validation(format!("supplier {} is inactive", supplier.name))); }
        let now = Utc::now();
        let id = Uuid::now_v7();
        let mut lines = Vec::with_capacity(items.len());
        for item in items {
            if item.quantity == 0 { return Err(RetailError::Validation(format!("quantity for product {} must be positive", item.product_id))); }
            Quantity::new(item.quantity)?;
            if !products.contains_key(&item.product_id) { return Err(RetailError::not_found("product", item.product_id)); }
            lines.push(PurchaseOrderItem {
                id: Uuid::now_v7(), purchase_order_id: id, product_id: item.product_id,
                quantity: item.quantity, price: item.price, total: item.price.multiply(item.quantity)?,
            });
        }
        let subtotal = Money::total(lines.iter().map(|l| l.total))?;
        let tax = draft.tax.unwrap_or(Money::ZERO);
        let total = subtotal.add(tax)?;
        if let Some(claimed) = draft.subtotal {
            if claimed != subtotal { return Err(RetailError::Validation(format!("subtotal {} should be {}", claimed, subtotal))); }
        }
        if let Some(claimed) = draft.total {
            if claimed != total { return Err(RetailError::Validation(format!("total {} should be {}", claimed, total))); }
        }
        let po_number = match draft.po_number.map(|n| n.trim().to_string()) {
            Some(n) if n.is_empty() => return Err(RetailError::Validation("PO number must not be blank".into())),
            Some(n) => n,
            None => {
                let hex = id.simple().to_string();
                format!("PO-{}-{}", now.format("%Y%m%d"), hex[hex.len() - 8..].to_uppercase())
            }
        };
        Ok(Self {
            purchase_order: PurchaseOrder {
                id, po_number, supplier_id: supplier.id, status: PurchaseOrderStatus::Pending,
                subtotal, tax, total, notes: draft.notes, expected_date: draft.expected_date,
                received_date: None, created_at: now, updated_at: now,
            },
            items: lines,
        })
    }
}

impl PurchaseOrder {
    /// Moves the purchase order to `next`; returns the previous status, or
    /// `None` when `next` is already current.
    pub fn transition(&mut self, next: PurchaseOrderStatus) -> Result<Option<PurchaseOrderStatus>> {
        if next == self.status { return Ok(None); }
        if !self.status.can_transition_to(next) {
            return Err(RetailError::IllegalTransition { from: self.status.to_string(), to: next.to_string() });
        }
        let previous = self.status;
        self.status = next;
        self.updated_at = Utc::now();
        if next == PurchaseOrderStatus::Received { self.received_date = Some(self.updated_at); }
        Ok(Some(previous))
    }
}

/// Books one stock-in movement per received line.
pub fn receive_items(po: &PurchaseOrder, items: &[PurchaseOrderItem], products: &mut HashMap<Uuid, Product>) -> Result<Vec<InventoryMovement>> {
    let mut movements = Vec::with_capacity(items.len());
    for item in items {
        let product = products.get_mut(&item.product_id).ok_or_else(|| RetailError::not_found("product", item.product_id))?;
        let adjustment = StockAdjustment::add(product.id, Quantity::new(item.quantity)?)
            .with_reference(po.po_number.clone())
            .with_notes(format!("Received on purchase order {}", po.po_number));
        movements.push(product.adjust(&adjustment));
    }
    Ok(movements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::product::tests::product;

    fn supplier() -> Supplier {
        Supplier::create(NewSupplier { name: "Kanchi Looms".into(), phone: "9123456789".into(), ..Default::default() }).unwrap()
    }

    #[test]
    fn test_plan_and_receive() {
        let s = supplier();
        let p = product("PO-ITEM", "100", 1, 5);
        let mut products = HashMap::from([(p.id, p.clone())]);
        let draft = PurchaseOrderDraft { supplier_id: s.id, tax: Some("18.00".parse().unwrap()), ..Default::default() };
        let items = vec![PurchaseOrderItemDraft { product_id: p.id, quantity: 4, price: "25.00".parse().unwrap() }];
        let mut po = PurchaseOrderWithItems::plan(draft, items, &s, &products).unwrap();
        assert_eq!(po.purchase_order.total.to_string(), "118.00");
        assert!(po.purchase_order.po_number.starts_with("PO-"));

        assert!(po.purchase_order.transition(PurchaseOrderStatus::Received).is_err());
        assert_eq!(po.purchase_order.transition(PurchaseOrderStatus::Sent).unwrap(), Some(PurchaseOrderStatus::Pending));
        assert_eq!(po.purchase_order.transition(PurchaseOrderStatus::Received).unwrap(), Some(PurchaseOrderStatus::Sent));
        assert!(po.purchase_order.received_date.is_some());

        let movements = receive_items(&po.purchase_order, &po.items, &mut products).unwrap();
        assert_eq!(movements.len(), 1);
        assert_eq!(products[&p.id].stock_quantity, 5);
        assert!(po.purchase_order.transition(PurchaseOrderStatus::Cancelled).is_err());
    }

    #[test]
    fn test_plan_rejects_unknown_product() {
        let s = supplier();
        let draft = PurchaseOrderDraft { supplier_id: s.id, ..Default::default() };
        let items = vec![PurchaseOrderItemDraft { product_id: Uuid::now_v7(), quantity: 1, price: Money::ZERO }];
        assert!(PurchaseOrderWithItems::plan(draft, items, &s, &HashMap::new()).is_err());
    }

    #[test]
    fn test_deactivated_supplier_takes_no_orders() {
        let mut s = supplier();
        let p = product("RETIRED", "10", 0, 0);
        let products = HashMap::from([(p.id, p.clone())]);
        s.apply_update(SupplierUpdate { payment_terms: Some("Net 30".into()), is_active: Some(false), ..Default::default() }).unwrap();
        assert_eq!(s.payment_terms.as_deref(), Some("Net 30"));
        assert_eq!(s.name, "Kanchi Looms");

        let draft = PurchaseOrderDraft { supplier_id: s.id, ..Default::default() };
        let items = vec![PurchaseOrderItemDraft { product_id: p.id, quantity: 1, price: Money::ZERO }];
        assert!(matches!(PurchaseOrderWithItems::plan(draft, items, &s, &products), Err(RetailError::Validation(_))));

        let before = s.clone();
        assert!(s.apply_update(SupplierUpdate { phone: Some("123".into()), ..Default::default() }).is_err());
        assert_eq!(s, before);
    }

    #[test]
    fn test_plan_rejects_total_past_money_limit() {
        let s = supplier();
        let p = product("BULK", "10", 0, 0);
        let products = HashMap::from([(p.id, p.clone())]);
        let draft = PurchaseOrderDraft { supplier_id: s.id, ..Default::default() };
        let items = vec![PurchaseOrderItemDraft { product_id: p.id, quantity: 3, price: "400000000000.00".parse().unwrap() }];
        assert!(matches!(PurchaseOrderWithItems::plan(draft, items, &s, &products), Err(RetailError::Validation(_))));
    }
}
