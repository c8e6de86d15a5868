//! Customer Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::domain::aggregates::order::{Order, OrderStatus};
use crate::domain::value_objects::Money;
use crate::Result;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: Uuid,
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub pincode: Option<String>,
    pub gst_number: Option<String>,
    pub preferences: Option<String>,
    pub notes: Option<String>,
    pub total_orders: u32,
    pub total_spent: Money,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewCustomer {
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
    pub preferences: Option<String>,
    pub notes: Option<String>,
}

/// Contact fields only; the aggregates are owned by order placement.
#[derive(Clone, Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CustomerUpdate {
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
    pub preferences: Option<String>,
    pub notes: Option<String>,
}

impl Customer {
    pub fn create(new: NewCustomer) -> Result<Self> {
        new.validate()?;
        Ok(Self {
            id: Uuid::now_v7(), name: new.name, phone: new.phone, email: new.email, address: new.address,
            city: new.city, state: new.state, pincode: new.pincode, gst_number: new.gst_number,
            preferences: new.preferences, notes: new.notes, total_orders: 0, total_spent: Money::ZERO,
            created_at: Utc::now(),
        })
    }

    pub fn apply_update(&mut self, update: CustomerUpdate) -> Result<()> {
        update.validate()?;
        let CustomerUpdate { name, phone, email, address, city, state, pincode, gst_number, preferences, notes } = update;
        if let Some(v) = name { self.name = v; }
        if let Some(v) = phone { self.phone = v; }
        if email.is_some() { self.email = email; }
        if address.is_some() { self.address = address; }
        if city.is_some() { self.city = city; }
        if state.is_some() { self.state = state; }
        if pincode.is_some() { self.pincode = pincode; }
        if gst_number.is_some() { self.gst_number = gst_number; }
        if preferences.is_some() { self.preferences = preferences; }
        if notes.is_some() { self.notes = notes; }
        Ok(())
    }

    pub fn record_order(&mut self, total: Money) -> Result<()> {
        self.total_spent = self.total_spent.add(total)?;
        self.total_orders = self.total_orders.saturating_add(1);
        Ok(())
    }

    pub fn reverse_order(&mut self, total: Money) {
        self.total_orders = self.total_orders.saturating_sub(1);
        self.total_spent = self.total_spent.saturating_sub(total);
    }

    /// Rebuilds the aggregates from order history, ignoring cancelled orders.
    /// Returns true when the stored values had drifted.
    pub fn recompute<'a>(&mut self, orders: impl IntoIterator<Item = &'a Order>) -> Result<bool> {
        let live: Vec<&Order> = orders.into_iter()
            .filter(|o| o.customer_id == self.id && o.status != OrderStatus::Cancelled)
            .collect();
        let total_orders = live.len() as u32;
        let total_spent = Money::total(live.iter().map(|o| o.total))?;
        let drifted = total_orders != self.total_orders || total_spent != self.total_spent;
        self.total_orders = total_orders;
        self.total_spent = total_spent;
        Ok(drifted)
    }
}
