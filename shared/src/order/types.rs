//! Shared types for the order lifecycle

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ============================================================================
// Order Type
// ============================================================================

/// 订单类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    /// Room only
    #[default]
    RoomBooking,
    /// Dishes only
    FoodOrder,
    /// Room plus dishes
    Combo,
}

impl OrderType {
    /// Derive the type from what the order contains
    pub fn classify(has_room: bool, has_items: bool) -> Option<Self> {
        match (has_room, has_items) {
            (true, true) => Some(OrderType::Combo),
            (true, false) => Some(OrderType::RoomBooking),
            (false, true) => Some(OrderType::FoodOrder),
            (false, false) => None,
        }
    }
}

// ============================================================================
// Line Items
// ============================================================================

/// Line item requested by a client; priced from the dish catalog
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderItemInput {
    pub dish_id: i64,
    pub quantity: i32,
}

/// Priced line item stored on the order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderItem {
    pub dish_id: i64,
    /// Dish name snapshot
    pub name: String,
    pub unit_price: Decimal,
    pub quantity: i32,
    /// `unit_price × quantity`, rounded to cents
    pub line_total: Decimal,
}

// ============================================================================
// Payment
// ============================================================================

/// 支付方式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Member stored-value balance
    Balance,
    Wechat,
    Alipay,
    Card,
    Cash,
}

impl PaymentMethod {
    /// Refunds for this method settle synchronously inside the engine
    pub fn refunds_synchronously(&self) -> bool {
        matches!(self, PaymentMethod::Balance)
    }
}

/// Payment submitted by the payment provider callback or cashier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentInput {
    pub method: PaymentMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    pub amount: Decimal,
}

/// Recorded payment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentInfo {
    pub method: PaymentMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    pub paid_at: i64,
    pub amount: Decimal,
}

// ============================================================================
// Refund
// ============================================================================

/// 退款状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    /// Requested from the external provider, awaiting confirmation
    Pending,
    Completed,
}

/// Refund intent / result recorded on a cancelled paid order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RefundInfo {
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub status: RefundStatus,
    pub requested_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    /// Provider reference, set on settlement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
}

// ============================================================================
// Cancellation
// ============================================================================

/// Who asked for a cancellation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CancelSource {
    User,
    Merchant,
    /// Expiration sweeper
    System,
}

// ============================================================================
// Requests
// ============================================================================

/// Booking / ordering request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateOrderRequest {
    pub user_id: i64,
    pub store_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<i64>,
    #[serde(default)]
    pub items: Vec<OrderItemInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guest_count: Option<u32>,
    pub contact_phone: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_order_type() {
        assert_eq!(OrderType::classify(true, true), Some(OrderType::Combo));
        assert_eq!(OrderType::classify(true, false), Some(OrderType::RoomBooking));
        assert_eq!(OrderType::classify(false, true), Some(OrderType::FoodOrder));
        assert_eq!(OrderType::classify(false, false), None);
    }

    #[test]
    fn test_create_request_defaults() {
        let req: CreateOrderRequest = serde_json::from_str(
            r#"{"user_id":1,"store_id":2,"contact_phone":"13800000000"}"#,
        )
        .unwrap();
        assert!(req.items.is_empty());
        assert!(req.room_id.is_none());
        assert!(req.start_time.is_none());
    }
}
