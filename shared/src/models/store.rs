//! Store Model

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Venue store (门店)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Store {
    pub id: i64,
    pub name: String,
    pub is_active: bool,
    /// Paid receipts, net of refunds
    #[serde(default)]
    pub revenue: Decimal,
    /// Revenue of completed orders
    #[serde(default)]
    pub completed_revenue: Decimal,
    #[serde(default)]
    pub completed_orders: u64,
}

impl Store {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            is_active: true,
            revenue: Decimal::ZERO,
            completed_revenue: Decimal::ZERO,
            completed_orders: 0,
        }
    }
}
