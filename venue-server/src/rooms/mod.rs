//! 包厢服务
//!
//! 商户侧的包厢状态维护 (维修、停用、恢复)。状态写入后向门店连接推送
//! `room_status_update`。

use shared::models::{Room, RoomStatus};
use std::sync::Arc;

use crate::booking::BookingAvailabilityChecker;
use crate::message::{DomainEvent, Notifier};
use crate::orders::error::Entity;
use crate::orders::storage::StorageError;
use crate::orders::{OrderError, OrderResult, OrderStorage};
use crate::utils::Clock;

pub struct RoomService {
    storage: OrderStorage,
    notifier: Arc<dyn Notifier>,
    checker: BookingAvailabilityChecker,
}

impl RoomService {
    pub fn new(storage: OrderStorage, notifier: Arc<dyn Notifier>, clock: Arc<dyn Clock>) -> Self {
        Self {
            checker: BookingAvailabilityChecker::new(storage.clone(), clock),
            storage,
            notifier,
        }
    }

    pub fn get_room(&self, room_id: i64) -> OrderResult<Room> {
        self.storage
            .get_room(room_id)?
            .ok_or_else(|| OrderError::not_found(Entity::Room, room_id))
    }

    pub fn list_rooms(&self, store_id: i64) -> OrderResult<Vec<Room>> {
        let mut rooms = self.storage.list_rooms(store_id)?;
        rooms.sort_by_key(|room| room.id);
        Ok(rooms)
    }

    /// Rooms of a store free for `[start, end)` with enough seats
    pub fn available_rooms(
        &self,
        store_id: i64,
        start: i64,
        end: i64,
        guests: Option<u32>,
    ) -> OrderResult<Vec<Room>> {
        let mut free = Vec::new();
        for room in self.list_rooms(store_id)? {
            if self.checker.check(room.id, start, end, guests)?.available {
                free.push(room);
            }
        }
        Ok(free)
    }

    /// Change a room's status. A no-op change emits nothing.
    pub fn set_room_status(&self, room_id: i64, status: RoomStatus) -> OrderResult<Room> {
        let txn = self.storage.begin_write()?;
        let mut room = self
            .storage
            .get_room_txn(&txn, room_id)?
            .ok_or_else(|| OrderError::not_found(Entity::Room, room_id))?;

        let previous = room.status;
        if previous == status {
            return Ok(room);
        }
        room.status = status;
        self.storage.put_room(&txn, &room)?;
        txn.commit().map_err(StorageError::from)?;

        tracing::info!(room_id, from = ?previous, to = ?status, "Room status changed");
        self.notifier.notify(DomainEvent::RoomStatusChanged {
            room: room.clone(),
            previous,
        });
        Ok(room)
    }
}
