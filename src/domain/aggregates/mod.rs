//! Aggregates module
pub mod customer;
pub mod movement;
pub mod order;
pub mod product;
pub mod purchasing;

pub use customer::{Customer, CustomerUpdate, NewCustomer};
pub use movement::{InventoryMovement, MovementType, StockAdjustment, StockAudit};
pub use order::{
    Order, OrderChange, OrderDraft, OrderItem, OrderItemDetail, OrderItemDraft, OrderPlacement, OrderStatus,
    OrderUpdate, OrderWithCustomer, OrderWithDetails, PaymentStatus,
};
pub use product::{NewProduct, Product, ProductUpdate};
pub use purchasing::{
    NewSupplier, PurchaseOrder, PurchaseOrderDraft, PurchaseOrderItem, PurchaseOrderItemDraft, PurchaseOrderStatus,
    PurchaseOrderWithItems, Supplier, SupplierUpdate,
};
