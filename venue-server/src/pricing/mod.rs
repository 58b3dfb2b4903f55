//! 价格计算
//!
//! Pure, deterministic pricing of a booking:
//!
//! ```text
//! subtotal     = Σ line totals
//! deposit      = room deposit, waived at VIP >= deposit_exempt_level
//! total        = subtotal + deposit
//! discount     = subtotal × min(vip × rate_per_level, max_rate)
//! actual       = total - discount
//! ```
//!
//! The discount applies to the subtotal only, never to the deposit. Every
//! amount is rounded to cents, half away from zero.

pub mod money;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use shared::models::MAX_VIP_LEVEL;

use crate::orders::OrderError;
use money::{round_money, validate_line};

pub use money::{DECIMAL_PLACES, MAX_QUANTITY};

/// VIP pricing policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingPolicy {
    /// VIP level from which the room deposit is waived
    pub deposit_exempt_level: u8,
    /// Discount per VIP level (0.02 = 2%)
    pub rate_per_level: Decimal,
    /// Discount ceiling
    pub max_rate: Decimal,
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self {
            deposit_exempt_level: 3,
            rate_per_level: Decimal::new(2, 2),
            max_rate: Decimal::new(10, 2),
        }
    }
}

/// Raw line handed to the engine
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceLine {
    pub unit_price: Decimal,
    pub quantity: i32,
}

/// Result of pricing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBreakdown {
    /// Per-line totals, same order as the input lines
    pub line_totals: Vec<Decimal>,
    pub subtotal: Decimal,
    pub deposit: Decimal,
    pub discount_rate: Decimal,
    pub discount: Decimal,
    pub total_amount: Decimal,
    pub actual_amount: Decimal,
}

#[derive(Debug, Clone, Default)]
pub struct PricingEngine {
    policy: PricingPolicy,
}

impl PricingEngine {
    pub fn new(policy: PricingPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &PricingPolicy {
        &self.policy
    }

    /// Discount rate for a VIP level
    pub fn discount_rate(&self, vip_level: u8) -> Decimal {
        let rate = self.policy.rate_per_level * Decimal::from(vip_level);
        rate.min(self.policy.max_rate)
    }

    /// Price a booking
    pub fn compute(
        &self,
        lines: &[PriceLine],
        room_deposit: Option<Decimal>,
        vip_level: u8,
    ) -> Result<PriceBreakdown, OrderError> {
        if vip_level > MAX_VIP_LEVEL {
            return Err(OrderError::invalid(format!(
                "vip level must be 0..={}, got {}",
                MAX_VIP_LEVEL, vip_level
            )));
        }

        let mut line_totals = Vec::with_capacity(lines.len());
        for line in lines {
            validate_line(line.unit_price, line.quantity)?;
            line_totals.push(round_money(line.unit_price * Decimal::from(line.quantity)));
        }

        let subtotal = round_money(line_totals.iter().copied().sum());
        let mut deposit = Decimal::ZERO;
        if let Some(room_deposit) = room_deposit {
            validate_line(room_deposit, 1)?;
            if vip_level < self.policy.deposit_exempt_level {
                deposit = round_money(room_deposit);
            }
        }

        let discount_rate = self.discount_rate(vip_level);
        let discount = round_money(subtotal * discount_rate);
        let total_amount = round_money(subtotal + deposit);
        let actual_amount = round_money(total_amount - discount);

        Ok(PriceBreakdown {
            line_totals,
            subtotal,
            deposit,
            discount_rate,
            discount,
            total_amount,
            actual_amount,
        })
    }
}

/// Loyalty points for a completed order: `floor(actual × rate)`, multiplied
/// for VIP members.
pub fn loyalty_points(actual_amount: Decimal, points_rate: Decimal, vip_multiplier: Option<u64>) -> u64 {
    let base = (actual_amount * points_rate).floor().to_u64().unwrap_or(0);
    match vip_multiplier {
        Some(m) => base.saturating_mul(m),
        None => base,
    }
}
