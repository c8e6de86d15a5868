//! OpenSASE Retail
//!
//! Self-hosted retail back office for small businesses.
//!
//! ## Features
//! - Product catalog with an append-only stock ledger
//! - Atomic order placement (items, stock, customer aggregates)
//! - Order status state machine with restocking on cancellation
//! - Suppliers and purchase order receiving
//! - Dashboard views (low stock, revenue, recent orders)

pub mod api;
pub mod config;
pub mod dashboard;
pub mod domain;
pub mod ledger;
pub mod publisher;
pub mod store;

use thiserror::Error;
use uuid::Uuid;

pub use config::{Config, ConfigError, LedgerConfig};
pub use ledger::Ledger;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RetailError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock { product_id: Uuid, requested: u32, available: u32 },

    #[error("Illegal transition from {from} to {to}")]
    IllegalTransition { from: String, to: String },

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Concurrent modification: {0}")]
    Conflict(String),

    #[error("Operation exceeded deadline of {0}ms")]
    Timeout(u64),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl RetailError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound { entity, id: id.to_string() }
    }

    /// Transient failures the ledger retries before giving up.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<validator::ValidationErrors> for RetailError {
    fn from(e: validator::ValidationErrors) -> Self {
        Self::Validation(e.to_string())
    }
}

impl From<sqlx::Error> for RetailError {
    fn from(e: sqlx::Error) -> Self {
        store::postgres::classify(e)
    }
}

pub type Result<T> = std::result::Result<T, RetailError>;
