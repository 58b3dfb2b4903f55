use serde::{Deserialize, Serialize};

use crate::models::{Room, RoomStatus};
use crate::order::{Order, OrderStatus, PaymentInfo};

// ==================== Push Payloads ====================

/// `order_status_update`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderStatusPayload {
    pub order_id: String,
    pub status: OrderStatus,
    pub order_data: Order,
}

/// `order_payment_success`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentSuccessPayload {
    pub order_id: String,
    pub payment_data: PaymentInfo,
}

/// `room_status_update`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomStatusPayload {
    pub room_id: i64,
    pub status: RoomStatus,
    pub room_data: Room,
}

/// `notification`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationPayload {
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// `system_announcement`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemAnnouncementPayload {
    pub message: String,
}

// ==================== Durable Notifications ====================

/// Notification kept in a user's durable queue
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub id: String,
    /// Push event type that produced it, e.g. `order_status_update`
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub data: serde_json::Value,
    pub timestamp: i64,
    #[serde(default)]
    pub read: bool,
}

/// One page of a user's notification queue, most recent first
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationPage {
    pub items: Vec<Notification>,
    pub total: usize,
    pub unread: usize,
    pub page: usize,
    pub limit: usize,
}

// ==================== Connection ====================

/// Connection role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionRole {
    User,
    Merchant,
    Admin,
}

/// 握手载荷 (客户端 -> 服务端)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HandshakePayload {
    pub user_id: i64,
    pub role: ConnectionRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_id: Option<i64>,
}

/// 握手应答 (服务端 -> 客户端)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HandshakeAck {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conn_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<crate::ErrorCode>,
    pub message: String,
}
