//! Order Module
//!
//! Types for the order lifecycle:
//! - `status`: order status and the transition table (also the wire contract)
//! - `types`: line items, payment, refund and request types
//! - `order`: the order entity and its derived views

pub mod order;
pub mod status;
pub mod types;

// Re-exports
pub use order::Order;
pub use status::OrderStatus;
pub use types::*;
