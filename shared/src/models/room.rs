//! Room Model

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Room status (包厢状态)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    #[default]
    Available,
    Occupied,
    Reserved,
    Maintenance,
    Disabled,
}

impl RoomStatus {
    /// Display text for UI
    pub fn text(&self) -> &'static str {
        match self {
            RoomStatus::Available => "Available",
            RoomStatus::Occupied => "Occupied",
            RoomStatus::Reserved => "Reserved",
            RoomStatus::Maintenance => "Under maintenance",
            RoomStatus::Disabled => "Disabled",
        }
    }
}

/// Room entity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Room {
    pub id: i64,
    pub store_id: i64,
    pub name: String,
    pub capacity: u32,
    /// Hourly price shown to customers
    pub price: Decimal,
    /// Refundable deposit charged with a booking
    pub deposit: Decimal,
    pub status: RoomStatus,
    /// Revenue of completed bookings
    #[serde(default)]
    pub revenue: Decimal,
    /// Number of completed bookings
    #[serde(default)]
    pub booking_count: u64,
}

impl Room {
    pub fn new(id: i64, store_id: i64, name: impl Into<String>, capacity: u32) -> Self {
        Self {
            id,
            store_id,
            name: name.into(),
            capacity,
            price: Decimal::ZERO,
            deposit: Decimal::ZERO,
            status: RoomStatus::Available,
            revenue: Decimal::ZERO,
            booking_count: 0,
        }
    }

    /// False while the room is under maintenance or disabled
    pub fn is_available(&self) -> bool {
        !matches!(self.status, RoomStatus::Maintenance | RoomStatus::Disabled)
    }

    /// Whether the room accepts new bookings at all (interval aside)
    pub fn is_bookable(&self) -> bool {
        self.status == RoomStatus::Available && self.is_available()
    }
}

/// Share of `window_millis` covered by `booked_millis`, as a percentage
/// rounded to 2 decimal places and clamped to `[0, 100]`.
pub fn utilization_rate(booked_millis: i64, window_millis: i64) -> Decimal {
    if window_millis <= 0 || booked_millis <= 0 {
        return Decimal::ZERO;
    }
    let rate = Decimal::from(booked_millis) * Decimal::ONE_HUNDRED / Decimal::from(window_millis);
    rate.min(Decimal::ONE_HUNDRED).round_dp(2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_available_by_status() {
        let mut room = Room::new(1, 1, "A01", 10);
        assert!(room.is_available());
        assert!(room.is_bookable());

        room.status = RoomStatus::Reserved;
        assert!(room.is_available());
        assert!(!room.is_bookable());

        room.status = RoomStatus::Maintenance;
        assert!(!room.is_available());
        room.status = RoomStatus::Disabled;
        assert!(!room.is_available());
    }

    #[test]
    fn test_utilization_rate() {
        assert_eq!(utilization_rate(0, 100), Decimal::ZERO);
        assert_eq!(utilization_rate(50, 0), Decimal::ZERO);
        assert_eq!(utilization_rate(1, 3), Decimal::new(3333, 2));
        assert_eq!(utilization_rate(300, 100), Decimal::ONE_HUNDRED);
    }

    #[test]
    fn test_status_serde() {
        let json = serde_json::to_string(&RoomStatus::Maintenance).unwrap();
        assert_eq!(json, "\"maintenance\"");
    }
}
