//! Order entity
//!
//! A plain data object. Status changes are applied by the server's state
//! machine; the views below are pure functions of the stored fields.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::status::OrderStatus;
use super::types::{CancelSource, OrderItem, OrderType, PaymentInfo, RefundInfo};

/// Order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    /// Human-readable unique identifier
    pub order_number: String,
    pub user_id: i64,
    pub store_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<i64>,
    pub order_type: OrderType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guest_count: Option<u32>,
    pub items: Vec<OrderItem>,

    // === Amounts ===
    pub subtotal: Decimal,
    pub deposit: Decimal,
    pub discount: Decimal,
    /// `subtotal + deposit`
    pub total_amount: Decimal,
    /// `total_amount - discount`
    pub actual_amount: Decimal,

    pub status: OrderStatus,
    pub contact_phone: String,
    /// Payment deadline; meaningful only while pending
    pub expired_at: i64,

    // === Lifecycle timestamps ===
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paid_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_info: Option<PaymentInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refund: Option<RefundInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_by: Option<CancelSource>,
    /// Loyalty points granted on completion
    #[serde(default)]
    pub points_awarded: u64,

    /// Optimistic concurrency counter, bumped on every persisted change
    #[serde(default)]
    pub version: u64,
}

impl Order {
    pub fn status_text(&self) -> &'static str {
        self.status.text()
    }

    /// Payment window has passed (only meaningful while pending)
    pub fn is_expired(&self, now: i64) -> bool {
        self.status == OrderStatus::Pending && now > self.expired_at
    }

    /// Booked interval, when the order reserves a room
    pub fn slot(&self) -> Option<(i64, i64)> {
        match (self.room_id, self.start_time, self.end_time) {
            (Some(_), Some(start), Some(end)) => Some((start, end)),
            _ => None,
        }
    }

    /// Whether this order currently holds its room interval.
    ///
    /// Paid, confirmed and in-progress orders hold it; a pending order holds
    /// it until its payment window passes.
    pub fn blocks_room(&self, now: i64) -> bool {
        match self.status {
            OrderStatus::Paid | OrderStatus::Confirmed | OrderStatus::InProgress => true,
            OrderStatus::Pending => now <= self.expired_at,
            _ => false,
        }
    }

    pub fn duration_minutes(&self) -> Option<i64> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some((end - start) / 60_000),
            _ => None,
        }
    }
}
