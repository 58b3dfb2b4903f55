//! Dish Model

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Menu dish sold by a store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Dish {
    pub id: i64,
    pub store_id: i64,
    pub name: String,
    pub price: Decimal,
    pub is_available: bool,
}

impl Dish {
    pub fn new(id: i64, store_id: i64, name: impl Into<String>, price: Decimal) -> Self {
        Self {
            id,
            store_id,
            name: name.into(),
            price,
            is_available: true,
        }
    }
}
