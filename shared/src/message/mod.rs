//! Push message types
//!
//! Shared between the venue server and connected clients:
//! - `PushEnvelope`: one server→client event with its server timestamp
//! - typed payloads for each `PushEventType`
//! - `Notification`: durable per-user notification record
//! - `Frame`: TCP framing for the push transport

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod frame;
pub mod payload;

pub use frame::*;
pub use payload::*;

/// Push event type (wire contract)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushEventType {
    OrderStatusUpdate,
    OrderPaymentSuccess,
    RoomStatusUpdate,
    Notification,
    SystemAnnouncement,
}

impl PushEventType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            PushEventType::OrderStatusUpdate => "order_status_update",
            PushEventType::OrderPaymentSuccess => "order_payment_success",
            PushEventType::RoomStatusUpdate => "room_status_update",
            PushEventType::Notification => "notification",
            PushEventType::SystemAnnouncement => "system_announcement",
        }
    }
}

impl fmt::Display for PushEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One pushed event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PushEnvelope {
    #[serde(rename = "type")]
    pub event_type: PushEventType,
    pub data: serde_json::Value,
    /// Server timestamp (Unix millis)
    pub timestamp: i64,
}

impl PushEnvelope {
    pub fn new<T: Serialize>(
        event_type: PushEventType,
        data: &T,
        timestamp: i64,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event_type,
            data: serde_json::to_value(data)?,
            timestamp,
        })
    }

    /// Decode the payload into its typed form
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.data.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_wire_shape() {
        let env = PushEnvelope::new(
            PushEventType::SystemAnnouncement,
            &SystemAnnouncementPayload {
                message: "closing at 2am".to_string(),
            },
            1_700_000_000_000,
        )
        .unwrap();
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["type"], "system_announcement");
        assert_eq!(json["data"]["message"], "closing at 2am");
        assert_eq!(json["timestamp"], 1_700_000_000_000i64);

        let payload: SystemAnnouncementPayload = env.parse().unwrap();
        assert_eq!(payload.message, "closing at 2am");
    }
}
