//! Member Model

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Highest VIP tier
pub const MAX_VIP_LEVEL: u8 = 5;

/// Registered customer (会员)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Member {
    pub id: i64,
    pub name: String,
    pub phone: String,
    /// VIP tier 0-5
    pub vip_level: u8,
    /// Stored-value balance usable as a payment method
    #[serde(default)]
    pub balance: Decimal,
    #[serde(default)]
    pub total_spent: Decimal,
    #[serde(default)]
    pub points: u64,
}

impl Member {
    pub fn new(id: i64, name: impl Into<String>, phone: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            phone: phone.into(),
            vip_level: 0,
            balance: Decimal::ZERO,
            total_spent: Decimal::ZERO,
            points: 0,
        }
    }

    pub fn is_vip(&self) -> bool {
        self.vip_level >= 1
    }
}
