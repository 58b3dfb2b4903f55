//! redb-based storage layer for orders and the venue catalog
//!
//! # Tables
//!
//! | Table | Key | Value | Purpose |
//! |-------|-----|-------|---------|
//! | `orders` | `order_number` | `Order` | Order records |
//! | `user_orders` | `(user_id, order_number)` | `()` | Per-user index |
//! | `store_orders` | `(store_id, order_number)` | `()` | Per-store index |
//! | `room_holds` | `(room_id, order_number)` | `()` | Orders currently holding a room interval |
//! | `pending_expiry` | `(expired_at, order_number)` | `()` | Pending orders by payment deadline |
//! | `rooms` / `stores` / `members` / `dishes` | `id` | JSON | Catalog |
//! | `applied_effects` | `"{order_number}:{effect}"` | applied-at | Side-effect idempotency |
//! | `counters` | name | `u64` | Aggregate counters |
//! | `pending_refunds` | `order_number` | `PendingRefund` | Refund submission queue |
//! | `dead_letter_refunds` | `order_number` | `DeadLetterRefund` | Permanently failed submissions |
//!
//! # Atomicity
//!
//! redb allows one write transaction at a time. Every check-then-write
//! (availability check + order insert, version check + transition + side
//! effects) runs inside a single write transaction, so no other writer can
//! interleave between the check and the write.

use redb::{
    AccessGuard, Database, ReadableDatabase, ReadableTable, ReadableTableMetadata,
    TableDefinition, WriteTransaction,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use rust_decimal::Decimal;
use shared::models::{Dish, Member, Room, Store};
use shared::order::{Order, PaymentMethod};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

const ORDERS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("orders");

const USER_ORDERS_TABLE: TableDefinition<(i64, &str), ()> = TableDefinition::new("user_orders");

const STORE_ORDERS_TABLE: TableDefinition<(i64, &str), ()> = TableDefinition::new("store_orders");

/// Orders holding a room interval (pending within window, paid, confirmed, in progress)
const ROOM_HOLDS_TABLE: TableDefinition<(i64, &str), ()> = TableDefinition::new("room_holds");

/// Pending orders keyed by payment deadline, scanned by the expiration sweeper
const PENDING_EXPIRY_TABLE: TableDefinition<(i64, &str), ()> =
    TableDefinition::new("pending_expiry");

const ROOMS_TABLE: TableDefinition<i64, &[u8]> = TableDefinition::new("rooms");
const STORES_TABLE: TableDefinition<i64, &[u8]> = TableDefinition::new("stores");
const MEMBERS_TABLE: TableDefinition<i64, &[u8]> = TableDefinition::new("members");
const DISHES_TABLE: TableDefinition<i64, &[u8]> = TableDefinition::new("dishes");

/// Side effects already applied: key = "{order_number}:{effect}", value = applied_at
const APPLIED_EFFECTS_TABLE: TableDefinition<&str, i64> = TableDefinition::new("applied_effects");

const COUNTERS_TABLE: TableDefinition<&str, u64> = TableDefinition::new("counters");

const PENDING_REFUNDS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("pending_refunds");

const DEAD_LETTER_REFUNDS_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("dead_letter_refunds");

pub const ORDERS_CREATED_COUNTER: &str = "orders_created";
pub const ORDERS_EXPIRED_COUNTER: &str = "orders_expired";

/// Refund waiting to be submitted to the payment provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingRefund {
    pub order_number: String,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub created_at: i64,
    pub retry_count: u32,
    pub last_error: Option<String>,
    /// Time of the last failed submission; backoff runs from here
    #[serde(default)]
    pub last_attempt_at: Option<i64>,
}

/// Refund submission that exhausted its retries
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeadLetterRefund {
    pub order_number: String,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub created_at: i64,
    pub failed_at: i64,
    pub retry_count: u32,
    pub last_error: String,
}

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

fn decode<T: DeserializeOwned>(guard: Option<AccessGuard<'_, &'static [u8]>>) -> StorageResult<Option<T>> {
    match guard {
        Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
        None => Ok(None),
    }
}

fn put_catalog<T: Serialize>(
    txn: &WriteTransaction,
    def: TableDefinition<'static, i64, &'static [u8]>,
    id: i64,
    value: &T,
) -> StorageResult<()> {
    let mut table = txn.open_table(def)?;
    let bytes = serde_json::to_vec(value)?;
    table.insert(id, bytes.as_slice())?;
    Ok(())
}

fn get_catalog_txn<T: DeserializeOwned>(
    txn: &WriteTransaction,
    def: TableDefinition<'static, i64, &'static [u8]>,
    id: i64,
) -> StorageResult<Option<T>> {
    let table = txn.open_table(def)?;
    decode(table.get(id)?)
}

/// Order storage backed by redb
#[derive(Clone)]
pub struct OrderStorage {
    db: Arc<Database>,
}

impl OrderStorage {
    /// Open or create the database at the given path
    ///
    /// redb commits with `Durability::Immediate`: a commit is persistent
    /// once `commit()` returns.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let db = Database::create(path)?;
        Self::init(db)
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> StorageResult<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::init(db)
    }

    fn init(db: Database) -> StorageResult<Self> {
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(ORDERS_TABLE)?;
            let _ = write_txn.open_table(USER_ORDERS_TABLE)?;
            let _ = write_txn.open_table(STORE_ORDERS_TABLE)?;
            let _ = write_txn.open_table(ROOM_HOLDS_TABLE)?;
            let _ = write_txn.open_table(PENDING_EXPIRY_TABLE)?;
            let _ = write_txn.open_table(ROOMS_TABLE)?;
            let _ = write_txn.open_table(STORES_TABLE)?;
            let _ = write_txn.open_table(MEMBERS_TABLE)?;
            let _ = write_txn.open_table(DISHES_TABLE)?;
            let _ = write_txn.open_table(APPLIED_EFFECTS_TABLE)?;
            let _ = write_txn.open_table(COUNTERS_TABLE)?;
            let _ = write_txn.open_table(PENDING_REFUNDS_TABLE)?;
            let _ = write_txn.open_table(DEAD_LETTER_REFUNDS_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Begin a write transaction
    pub fn begin_write(&self) -> StorageResult<WriteTransaction> {
        Ok(self.db.begin_write()?)
    }

    // ========== Orders ==========

    /// Insert or replace an order (within transaction)
    pub fn put_order(&self, txn: &WriteTransaction, order: &Order) -> StorageResult<()> {
        let mut table = txn.open_table(ORDERS_TABLE)?;
        let value = serde_json::to_vec(order)?;
        table.insert(order.order_number.as_str(), value.as_slice())?;
        Ok(())
    }

    pub fn get_order(&self, order_number: &str) -> StorageResult<Option<Order>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ORDERS_TABLE)?;
        decode(table.get(order_number)?)
    }

    /// Get order within a write transaction (sees uncommitted writes)
    pub fn get_order_txn(
        &self,
        txn: &WriteTransaction,
        order_number: &str,
    ) -> StorageResult<Option<Order>> {
        let table = txn.open_table(ORDERS_TABLE)?;
        decode(table.get(order_number)?)
    }

    pub fn order_exists_txn(&self, txn: &WriteTransaction, order_number: &str) -> StorageResult<bool> {
        let table = txn.open_table(ORDERS_TABLE)?;
        Ok(table.get(order_number)?.is_some())
    }

    /// Add the order to the per-user and per-store indexes
    pub fn index_order(&self, txn: &WriteTransaction, order: &Order) -> StorageResult<()> {
        let number = order.order_number.as_str();
        {
            let mut table = txn.open_table(USER_ORDERS_TABLE)?;
            table.insert((order.user_id, number), ())?;
        }
        {
            let mut table = txn.open_table(STORE_ORDERS_TABLE)?;
            table.insert((order.store_id, number), ())?;
        }
        Ok(())
    }

    /// Orders of a user, newest first
    pub fn list_user_orders(&self, user_id: i64) -> StorageResult<Vec<Order>> {
        self.list_indexed(USER_ORDERS_TABLE, user_id)
    }

    /// Orders of a store, newest first
    pub fn list_store_orders(&self, store_id: i64) -> StorageResult<Vec<Order>> {
        self.list_indexed(STORE_ORDERS_TABLE, store_id)
    }

    fn list_indexed(
        &self,
        index: TableDefinition<'static, (i64, &'static str), ()>,
        owner: i64,
    ) -> StorageResult<Vec<Order>> {
        let read_txn = self.db.begin_read()?;
        let index_table = read_txn.open_table(index)?;
        let orders_table = read_txn.open_table(ORDERS_TABLE)?;

        let mut orders = Vec::new();
        for result in index_table.range((owner, "")..(owner.saturating_add(1), ""))? {
            let (key, _) = result?;
            let (_, number) = key.value();
            if let Some(order) = decode::<Order>(orders_table.get(number)?)? {
                orders.push(order);
            }
        }
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    // ========== Room Holds ==========

    pub fn hold_room(&self, txn: &WriteTransaction, room_id: i64, order_number: &str) -> StorageResult<()> {
        let mut table = txn.open_table(ROOM_HOLDS_TABLE)?;
        table.insert((room_id, order_number), ())?;
        Ok(())
    }

    pub fn release_room(
        &self,
        txn: &WriteTransaction,
        room_id: i64,
        order_number: &str,
    ) -> StorageResult<()> {
        let mut table = txn.open_table(ROOM_HOLDS_TABLE)?;
        table.remove((room_id, order_number))?;
        Ok(())
    }

    /// Orders holding the room, read within a write transaction
    pub fn room_holders_txn(&self, txn: &WriteTransaction, room_id: i64) -> StorageResult<Vec<Order>> {
        let holds = txn.open_table(ROOM_HOLDS_TABLE)?;
        let orders_table = txn.open_table(ORDERS_TABLE)?;

        let mut orders = Vec::new();
        for result in holds.range((room_id, "")..(room_id.saturating_add(1), ""))? {
            let (key, _) = result?;
            let (_, number) = key.value();
            if let Some(order) = decode::<Order>(orders_table.get(number)?)? {
                orders.push(order);
            }
        }
        Ok(orders)
    }

    /// Orders holding the room (point-in-time read)
    pub fn room_holders(&self, room_id: i64) -> StorageResult<Vec<Order>> {
        let read_txn = self.db.begin_read()?;
        let holds = read_txn.open_table(ROOM_HOLDS_TABLE)?;
        let orders_table = read_txn.open_table(ORDERS_TABLE)?;

        let mut orders = Vec::new();
        for result in holds.range((room_id, "")..(room_id.saturating_add(1), ""))? {
            let (key, _) = result?;
            let (_, number) = key.value();
            if let Some(order) = decode::<Order>(orders_table.get(number)?)? {
                orders.push(order);
            }
        }
        Ok(orders)
    }

    // ========== Pending Expiry Index ==========

    pub fn track_pending(&self, txn: &WriteTransaction, order: &Order) -> StorageResult<()> {
        let mut table = txn.open_table(PENDING_EXPIRY_TABLE)?;
        table.insert((order.expired_at, order.order_number.as_str()), ())?;
        Ok(())
    }

    pub fn untrack_pending(&self, txn: &WriteTransaction, order: &Order) -> StorageResult<()> {
        let mut table = txn.open_table(PENDING_EXPIRY_TABLE)?;
        table.remove((order.expired_at, order.order_number.as_str()))?;
        Ok(())
    }

    /// Pending orders whose deadline is strictly before `now`, oldest first
    pub fn expired_pending(&self, now: i64) -> StorageResult<Vec<String>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PENDING_EXPIRY_TABLE)?;

        let mut numbers = Vec::new();
        for result in table.range(..(now, ""))? {
            let (key, _) = result?;
            numbers.push(key.value().1.to_string());
        }
        Ok(numbers)
    }

    // ========== Catalog ==========

    pub fn put_room(&self, txn: &WriteTransaction, room: &Room) -> StorageResult<()> {
        put_catalog(txn, ROOMS_TABLE, room.id, room)
    }

    pub fn get_room_txn(&self, txn: &WriteTransaction, id: i64) -> StorageResult<Option<Room>> {
        get_catalog_txn(txn, ROOMS_TABLE, id)
    }

    pub fn get_room(&self, id: i64) -> StorageResult<Option<Room>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ROOMS_TABLE)?;
        decode(table.get(id)?)
    }

    pub fn list_rooms(&self, store_id: i64) -> StorageResult<Vec<Room>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ROOMS_TABLE)?;
        let mut rooms = Vec::new();
        for result in table.iter()? {
            let (_, value) = result?;
            let room: Room = serde_json::from_slice(value.value())?;
            if room.store_id == store_id {
                rooms.push(room);
            }
        }
        Ok(rooms)
    }

    pub fn put_store(&self, txn: &WriteTransaction, store: &Store) -> StorageResult<()> {
        put_catalog(txn, STORES_TABLE, store.id, store)
    }

    pub fn get_store_txn(&self, txn: &WriteTransaction, id: i64) -> StorageResult<Option<Store>> {
        get_catalog_txn(txn, STORES_TABLE, id)
    }

    pub fn get_store(&self, id: i64) -> StorageResult<Option<Store>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(STORES_TABLE)?;
        decode(table.get(id)?)
    }

    pub fn put_member(&self, txn: &WriteTransaction, member: &Member) -> StorageResult<()> {
        put_catalog(txn, MEMBERS_TABLE, member.id, member)
    }

    pub fn get_member_txn(&self, txn: &WriteTransaction, id: i64) -> StorageResult<Option<Member>> {
        get_catalog_txn(txn, MEMBERS_TABLE, id)
    }

    pub fn get_member(&self, id: i64) -> StorageResult<Option<Member>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(MEMBERS_TABLE)?;
        decode(table.get(id)?)
    }

    pub fn put_dish(&self, txn: &WriteTransaction, dish: &Dish) -> StorageResult<()> {
        put_catalog(txn, DISHES_TABLE, dish.id, dish)
    }

    pub fn get_dish_txn(&self, txn: &WriteTransaction, id: i64) -> StorageResult<Option<Dish>> {
        get_catalog_txn(txn, DISHES_TABLE, id)
    }

    /// Upsert a room in its own transaction
    pub fn save_room(&self, room: &Room) -> StorageResult<()> {
        let txn = self.begin_write()?;
        self.put_room(&txn, room)?;
        txn.commit()?;
        Ok(())
    }

    pub fn save_store(&self, store: &Store) -> StorageResult<()> {
        let txn = self.begin_write()?;
        self.put_store(&txn, store)?;
        txn.commit()?;
        Ok(())
    }

    pub fn save_member(&self, member: &Member) -> StorageResult<()> {
        let txn = self.begin_write()?;
        self.put_member(&txn, member)?;
        txn.commit()?;
        Ok(())
    }

    pub fn save_dish(&self, dish: &Dish) -> StorageResult<()> {
        let txn = self.begin_write()?;
        self.put_dish(&txn, dish)?;
        txn.commit()?;
        Ok(())
    }

    // ========== Idempotency Ledger ==========

    pub fn is_effect_applied_txn(&self, txn: &WriteTransaction, key: &str) -> StorageResult<bool> {
        let table = txn.open_table(APPLIED_EFFECTS_TABLE)?;
        Ok(table.get(key)?.is_some())
    }

    pub fn mark_effect_applied(&self, txn: &WriteTransaction, key: &str, at: i64) -> StorageResult<()> {
        let mut table = txn.open_table(APPLIED_EFFECTS_TABLE)?;
        table.insert(key, at)?;
        Ok(())
    }

    pub fn is_effect_applied(&self, key: &str) -> StorageResult<bool> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(APPLIED_EFFECTS_TABLE)?;
        Ok(table.get(key)?.is_some())
    }

    // ========== Counters ==========

    /// Increment a counter (within transaction), returns the new value
    pub fn increment_counter(&self, txn: &WriteTransaction, name: &str, delta: u64) -> StorageResult<u64> {
        let mut table = txn.open_table(COUNTERS_TABLE)?;
        let current = table.get(name)?.map(|guard| guard.value()).unwrap_or(0);
        let next = current.saturating_add(delta);
        table.insert(name, next)?;
        Ok(next)
    }

    pub fn get_counter(&self, name: &str) -> StorageResult<u64> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(COUNTERS_TABLE)?;
        Ok(table.get(name)?.map(|guard| guard.value()).unwrap_or(0))
    }

    // ========== Pending Refund Queue ==========

    /// Add a refund to the submission queue (within transaction)
    pub fn queue_refund(&self, txn: &WriteTransaction, refund: &PendingRefund) -> StorageResult<()> {
        let mut table = txn.open_table(PENDING_REFUNDS_TABLE)?;
        let value = serde_json::to_vec(refund)?;
        table.insert(refund.order_number.as_str(), value.as_slice())?;
        Ok(())
    }

    pub fn get_pending_refunds(&self) -> StorageResult<Vec<PendingRefund>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PENDING_REFUNDS_TABLE)?;

        let mut entries = Vec::new();
        for result in table.iter()? {
            let (_key, value) = result?;
            let pending: PendingRefund = serde_json::from_slice(value.value())?;
            entries.push(pending);
        }
        Ok(entries)
    }

    pub fn get_pending_refund(&self, order_number: &str) -> StorageResult<Option<PendingRefund>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PENDING_REFUNDS_TABLE)?;
        decode(table.get(order_number)?)
    }

    /// Mark submission as failed, increment retry count
    pub fn mark_refund_failed(&self, order_number: &str, error: &str, now: i64) -> StorageResult<()> {
        let txn = self.begin_write()?;
        {
            let mut table = txn.open_table(PENDING_REFUNDS_TABLE)?;

            let pending_opt: Option<PendingRefund> = decode(table.get(order_number)?)?;
            if let Some(mut pending) = pending_opt {
                pending.retry_count += 1;
                pending.last_error = Some(error.to_string());
                pending.last_attempt_at = Some(now);
                let new_value = serde_json::to_vec(&pending)?;
                table.insert(order_number, new_value.as_slice())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    /// Remove from the submission queue (submitted or settled)
    pub fn remove_pending_refund(&self, order_number: &str) -> StorageResult<()> {
        let txn = self.begin_write()?;
        self.remove_pending_refund_txn(&txn, order_number)?;
        txn.commit()?;
        Ok(())
    }

    pub fn remove_pending_refund_txn(&self, txn: &WriteTransaction, order_number: &str) -> StorageResult<()> {
        let mut table = txn.open_table(PENDING_REFUNDS_TABLE)?;
        table.remove(order_number)?;
        Ok(())
    }

    /// Move a refund from the submission queue to the dead letter queue
    pub fn move_refund_to_dead_letter(&self, order_number: &str, error: &str, now: i64) -> StorageResult<()> {
        let txn = self.begin_write()?;
        {
            let mut pending_table = txn.open_table(PENDING_REFUNDS_TABLE)?;
            let mut dead_letter_table = txn.open_table(DEAD_LETTER_REFUNDS_TABLE)?;

            let pending_opt: Option<PendingRefund> = decode(pending_table.get(order_number)?)?;
            if let Some(pending) = pending_opt {
                let dead_letter = DeadLetterRefund {
                    order_number: pending.order_number,
                    amount: pending.amount,
                    method: pending.method,
                    created_at: pending.created_at,
                    failed_at: now,
                    retry_count: pending.retry_count,
                    last_error: error.to_string(),
                };
                let value = serde_json::to_vec(&dead_letter)?;
                dead_letter_table.insert(order_number, value.as_slice())?;
                pending_table.remove(order_number)?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_dead_letter_refunds(&self) -> StorageResult<Vec<DeadLetterRefund>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DEAD_LETTER_REFUNDS_TABLE)?;

        let mut entries = Vec::new();
        for result in table.iter()? {
            let (_key, value) = result?;
            let entry: DeadLetterRefund = serde_json::from_slice(value.value())?;
            entries.push(entry);
        }
        Ok(entries)
    }

    // ========== Statistics ==========

    pub fn get_stats(&self) -> StorageResult<StorageStats> {
        let read_txn = self.db.begin_read()?;

        let orders = read_txn.open_table(ORDERS_TABLE)?;
        let holds = read_txn.open_table(ROOM_HOLDS_TABLE)?;
        let pending = read_txn.open_table(PENDING_EXPIRY_TABLE)?;
        let refunds = read_txn.open_table(PENDING_REFUNDS_TABLE)?;
        let dead = read_txn.open_table(DEAD_LETTER_REFUNDS_TABLE)?;

        Ok(StorageStats {
            order_count: orders.len()?,
            room_hold_count: holds.len()?,
            pending_order_count: pending.len()?,
            pending_refund_count: refunds.len()?,
            dead_letter_refund_count: dead.len()?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct StorageStats {
    pub order_count: u64,
    pub room_hold_count: u64,
    pub pending_order_count: u64,
    pub pending_refund_count: u64,
    pub dead_letter_refund_count: u64,
}
