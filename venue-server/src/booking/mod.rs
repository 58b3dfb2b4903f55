//! 包厢可用性检查
//!
//! A room interval is free when the room accepts bookings, no holding order
//! overlaps it (half-open `[start, end)`), and the room seats the party.
//!
//! [`BookingAvailabilityChecker::check`] is a point-in-time read for UIs.
//! Order creation calls [`check_in_txn`] inside the write transaction that
//! inserts the order, which is what actually prevents double booking.

use redb::WriteTransaction;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::models::{Room, RoomStatus, utilization_rate};
use shared::order::{Order, OrderStatus};
use shared::util::{DAY_MILLIS, intervals_overlap};
use std::sync::Arc;

use crate::orders::error::Entity;
use crate::orders::{OrderError, OrderResult, OrderStorage};
use crate::utils::Clock;

/// Why an interval is unavailable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Unavailable {
    RoomNotBookable { status: RoomStatus },
    TimeConflict { order_number: String },
    InsufficientCapacity { capacity: u32, required: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    pub available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<Unavailable>,
}

impl Availability {
    fn free() -> Self {
        Self {
            available: true,
            reason: None,
        }
    }

    fn blocked(reason: Unavailable) -> Self {
        Self {
            available: false,
            reason: Some(reason),
        }
    }

    /// Error to surface when creating an order against this result
    pub fn into_error(self) -> Option<OrderError> {
        match self.reason? {
            Unavailable::InsufficientCapacity { capacity, required } => Some(OrderError::validation(
                shared::ErrorCode::CapacityExceeded,
                format!("CAPACITY_EXCEEDED: room seats {capacity}, party of {required}"),
            )),
            Unavailable::RoomNotBookable { .. } | Unavailable::TimeConflict { .. } => {
                Some(OrderError::room_not_available())
            }
        }
    }
}

/// Occupied interval on a room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookedSlot {
    pub order_number: String,
    pub start_time: i64,
    pub end_time: i64,
    pub status: OrderStatus,
}

/// Validate a requested interval
pub fn validate_interval(start: i64, end: i64) -> OrderResult<()> {
    if end <= start {
        return Err(OrderError::invalid(format!(
            "end_time must be after start_time ({start} >= {end})"
        )));
    }
    Ok(())
}

/// Evaluate availability against the orders currently holding the room
pub fn evaluate<'a>(
    room: &Room,
    start: i64,
    end: i64,
    guests: Option<u32>,
    holders: impl IntoIterator<Item = &'a Order>,
    now: i64,
) -> Availability {
    if !room.is_bookable() {
        return Availability::blocked(Unavailable::RoomNotBookable {
            status: room.status,
        });
    }

    let conflict = holders.into_iter().find(|order| {
        order.blocks_room(now)
            && order
                .slot()
                .is_some_and(|(s, e)| intervals_overlap(s, e, start, end))
    });
    if let Some(order) = conflict {
        return Availability::blocked(Unavailable::TimeConflict {
            order_number: order.order_number.clone(),
        });
    }

    if let Some(required) = guests
        && room.capacity < required
    {
        return Availability::blocked(Unavailable::InsufficientCapacity {
            capacity: room.capacity,
            required,
        });
    }

    Availability::free()
}

/// Availability check inside an open write transaction
pub fn check_in_txn(
    storage: &OrderStorage,
    txn: &WriteTransaction,
    room: &Room,
    start: i64,
    end: i64,
    guests: Option<u32>,
    now: i64,
) -> OrderResult<Availability> {
    validate_interval(start, end)?;
    let holders = storage.room_holders_txn(txn, room.id)?;
    Ok(evaluate(room, start, end, guests, &holders, now))
}

#[derive(Clone)]
pub struct BookingAvailabilityChecker {
    storage: OrderStorage,
    clock: Arc<dyn Clock>,
}

impl BookingAvailabilityChecker {
    pub fn new(storage: OrderStorage, clock: Arc<dyn Clock>) -> Self {
        Self { storage, clock }
    }

    fn load_room(&self, room_id: i64) -> OrderResult<Room> {
        self.storage
            .get_room(room_id)?
            .ok_or_else(|| OrderError::not_found(Entity::Room, room_id))
    }

    /// Point-in-time availability of `[start, end)` on a room
    pub fn check(
        &self,
        room_id: i64,
        start: i64,
        end: i64,
        guests: Option<u32>,
    ) -> OrderResult<Availability> {
        validate_interval(start, end)?;
        let room = self.load_room(room_id)?;
        let holders = self.storage.room_holders(room_id)?;
        Ok(evaluate(
            &room,
            start,
            end,
            guests,
            &holders,
            self.clock.now_millis(),
        ))
    }

    /// Occupied intervals intersecting `[from, to)`, sorted by start
    pub fn booked_slots(&self, room_id: i64, from: i64, to: i64) -> OrderResult<Vec<BookedSlot>> {
        validate_interval(from, to)?;
        let now = self.clock.now_millis();
        let mut slots: Vec<BookedSlot> = self
            .storage
            .room_holders(room_id)?
            .into_iter()
            .filter(|order| order.blocks_room(now))
            .filter_map(|order| {
                let (start, end) = order.slot()?;
                intervals_overlap(start, end, from, to).then(|| BookedSlot {
                    order_number: order.order_number,
                    start_time: start,
                    end_time: end,
                    status: order.status,
                })
            })
            .collect();
        slots.sort_by_key(|slot| slot.start_time);
        Ok(slots)
    }

    /// Occupied intervals on the UTC day starting at `day_start`
    pub fn list_booked_slots(&self, room_id: i64, day_start: i64) -> OrderResult<Vec<BookedSlot>> {
        self.booked_slots(room_id, day_start, day_start + DAY_MILLIS)
    }

    /// Share of `[from, to)` covered by bookings, as a percentage
    pub fn utilization(&self, room_id: i64, from: i64, to: i64) -> OrderResult<Decimal> {
        let booked: i64 = self
            .booked_slots(room_id, from, to)?
            .iter()
            .map(|slot| slot.end_time.min(to) - slot.start_time.max(from))
            .sum();
        Ok(utilization_rate(booked, to - from))
    }
}
