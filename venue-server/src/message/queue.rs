//! 每用户持久化通知队列 (redb)
//!
//! # Tables
//!
//! | Table | Key | Value |
//! |-------|-----|-------|
//! | `notifications` | `(user_id, seq)` | `Notification` JSON |
//! | `notification_queues` | `user_id` | `QueueMeta` JSON (next seq, expiry) |
//!
//! `seq` grows per user, so a reverse range scan yields the most recent
//! entries first. Each push trims the queue to `cap` and pushes its expiry to
//! `now + ttl`; a queue whose expiry has passed reads as empty and is
//! removed by [`NotificationQueue::purge_expired`].

use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition, WriteTransaction};
use serde::{Deserialize, Serialize};
use shared::message::{Notification, NotificationPage};
use shared::util::DAY_MILLIS;
use std::path::Path;
use std::sync::Arc;

use crate::orders::storage::StorageResult;

const NOTIFICATIONS_TABLE: TableDefinition<(i64, u64), &[u8]> = TableDefinition::new("notifications");

const QUEUE_META_TABLE: TableDefinition<i64, &[u8]> = TableDefinition::new("notification_queues");

/// 单用户通知上限
pub const DEFAULT_QUEUE_CAP: usize = 100;

/// 队列过期时长 (最后一次写入后 30 天)
pub const DEFAULT_TTL_MILLIS: i64 = 30 * DAY_MILLIS;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
struct QueueMeta {
    next_seq: u64,
    expires_at: i64,
}

impl QueueMeta {
    fn is_expired(&self, now: i64) -> bool {
        now > self.expires_at
    }
}

/// Notification to append
#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub kind: String,
    pub title: String,
    pub message: String,
    pub data: serde_json::Value,
}

#[derive(Clone)]
pub struct NotificationQueue {
    db: Arc<Database>,
    cap: usize,
    ttl_millis: i64,
}

fn user_range(user_id: i64) -> std::ops::RangeInclusive<(i64, u64)> {
    (user_id, 0)..=(user_id, u64::MAX)
}

fn read_meta(
    table: &impl ReadableTable<i64, &'static [u8]>,
    user_id: i64,
) -> StorageResult<Option<QueueMeta>> {
    match table.get(user_id)? {
        Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
        None => Ok(None),
    }
}

impl NotificationQueue {
    /// Open or create the queue database at the given path
    pub fn open(path: impl AsRef<Path>, cap: usize, ttl_millis: i64) -> StorageResult<Self> {
        let db = Database::create(path)?;
        Self::init(db, cap, ttl_millis)
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory(cap: usize, ttl_millis: i64) -> StorageResult<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::init(db, cap, ttl_millis)
    }

    fn init(db: Database, cap: usize, ttl_millis: i64) -> StorageResult<Self> {
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(NOTIFICATIONS_TABLE)?;
            let _ = write_txn.open_table(QUEUE_META_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self {
            db: Arc::new(db),
            cap: cap.max(1),
            ttl_millis,
        })
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Sequence numbers of a user's entries, oldest first
    fn seqs_txn(&self, txn: &WriteTransaction, user_id: i64) -> StorageResult<Vec<u64>> {
        let table = txn.open_table(NOTIFICATIONS_TABLE)?;
        let mut seqs = Vec::new();
        for result in table.range(user_range(user_id))? {
            let (key, _) = result?;
            seqs.push(key.value().1);
        }
        Ok(seqs)
    }

    fn remove_entries_txn(&self, txn: &WriteTransaction, user_id: i64, seqs: &[u64]) -> StorageResult<()> {
        let mut table = txn.open_table(NOTIFICATIONS_TABLE)?;
        for seq in seqs {
            table.remove((user_id, *seq))?;
        }
        Ok(())
    }

    /// Append to the user's queue, trim to `cap` and refresh the expiry
    pub fn push(&self, user_id: i64, new: NewNotification, now: i64) -> StorageResult<Notification> {
        let txn = self.db.begin_write()?;

        let mut meta = {
            let table = txn.open_table(QUEUE_META_TABLE)?;
            read_meta(&table, user_id)?
        }
        .unwrap_or_default();

        let mut seqs = self.seqs_txn(&txn, user_id)?;
        if meta.is_expired(now) && !seqs.is_empty() {
            self.remove_entries_txn(&txn, user_id, &seqs)?;
            seqs.clear();
        }

        let notification = Notification {
            id: uuid::Uuid::new_v4().to_string(),
            kind: new.kind,
            title: new.title,
            message: new.message,
            data: new.data,
            timestamp: now,
            read: false,
        };
        let seq = meta.next_seq;
        {
            let mut table = txn.open_table(NOTIFICATIONS_TABLE)?;
            let bytes = serde_json::to_vec(&notification)?;
            table.insert((user_id, seq), bytes.as_slice())?;
        }
        seqs.push(seq);

        if seqs.len() > self.cap {
            let overflow = seqs.len() - self.cap;
            self.remove_entries_txn(&txn, user_id, &seqs[..overflow])?;
        }

        meta.next_seq = seq + 1;
        meta.expires_at = now + self.ttl_millis;
        {
            let mut table = txn.open_table(QUEUE_META_TABLE)?;
            let bytes = serde_json::to_vec(&meta)?;
            table.insert(user_id, bytes.as_slice())?;
        }
        txn.commit()?;

        Ok(notification)
    }

    /// All live entries of a user, most recent first
    fn load(&self, user_id: i64, now: i64) -> StorageResult<Vec<Notification>> {
        let read_txn = self.db.begin_read()?;
        let meta_table = read_txn.open_table(QUEUE_META_TABLE)?;
        match read_meta(&meta_table, user_id)? {
            Some(meta) if !meta.is_expired(now) => {}
            _ => return Ok(Vec::new()),
        }

        let table = read_txn.open_table(NOTIFICATIONS_TABLE)?;
        let mut items = Vec::new();
        for result in table.range(user_range(user_id))?.rev() {
            let (_, value) = result?;
            items.push(serde_json::from_slice::<Notification>(value.value())?);
        }
        Ok(items)
    }

    /// One page (1-based) of the user's queue, most recent first
    pub fn list(&self, user_id: i64, page: usize, limit: usize, now: i64) -> StorageResult<NotificationPage> {
        let page = page.max(1);
        let limit = limit.clamp(1, self.cap);
        let all = self.load(user_id, now)?;
        let total = all.len();
        let unread = all.iter().filter(|n| !n.read).count();
        let offset = (page - 1).saturating_mul(limit);
        let items = all.into_iter().skip(offset).take(limit).collect();
        Ok(NotificationPage {
            items,
            total,
            unread,
            page,
            limit,
        })
    }

    pub fn len(&self, user_id: i64, now: i64) -> StorageResult<usize> {
        Ok(self.load(user_id, now)?.len())
    }

    pub fn unread_count(&self, user_id: i64, now: i64) -> StorageResult<usize> {
        Ok(self.load(user_id, now)?.iter().filter(|n| !n.read).count())
    }

    /// Rewrite entries matching `select` as read; returns how many changed
    fn mark_where(
        &self,
        user_id: i64,
        now: i64,
        select: impl Fn(&Notification) -> bool,
    ) -> StorageResult<usize> {
        let txn = self.db.begin_write()?;
        let expired = {
            let table = txn.open_table(QUEUE_META_TABLE)?;
            read_meta(&table, user_id)?.is_none_or(|meta| meta.is_expired(now))
        };
        if expired {
            return Ok(0);
        }

        let mut changed = 0;
        {
            let mut table = txn.open_table(NOTIFICATIONS_TABLE)?;
            let mut updates = Vec::new();
            for result in table.range(user_range(user_id))? {
                let (key, value) = result?;
                let mut notification: Notification = serde_json::from_slice(value.value())?;
                if !notification.read && select(&notification) {
                    notification.read = true;
                    updates.push((key.value().1, serde_json::to_vec(&notification)?));
                }
            }
            for (seq, bytes) in updates {
                table.insert((user_id, seq), bytes.as_slice())?;
                changed += 1;
            }
        }
        txn.commit()?;
        Ok(changed)
    }

    /// Mark one notification read; false when it does not exist or was already read
    pub fn mark_read(&self, user_id: i64, notification_id: &str, now: i64) -> StorageResult<bool> {
        Ok(self.mark_where(user_id, now, |n| n.id == notification_id)? > 0)
    }

    pub fn mark_all_read(&self, user_id: i64, now: i64) -> StorageResult<usize> {
        self.mark_where(user_id, now, |_| true)
    }

    /// Drop the user's queue; returns the number of entries removed
    pub fn clear(&self, user_id: i64) -> StorageResult<usize> {
        let txn = self.db.begin_write()?;
        let seqs = self.seqs_txn(&txn, user_id)?;
        self.remove_entries_txn(&txn, user_id, &seqs)?;
        {
            let mut table = txn.open_table(QUEUE_META_TABLE)?;
            table.remove(user_id)?;
        }
        txn.commit()?;
        Ok(seqs.len())
    }

    /// Remove every queue whose expiry has passed; returns the number of queues removed
    pub fn purge_expired(&self, now: i64) -> StorageResult<usize> {
        let txn = self.db.begin_write()?;
        let expired_users = {
            let table = txn.open_table(QUEUE_META_TABLE)?;
            let mut users = Vec::new();
            for result in table.iter()? {
                let (key, value) = result?;
                let meta: QueueMeta = serde_json::from_slice(value.value())?;
                if meta.is_expired(now) {
                    users.push(key.value());
                }
            }
            users
        };

        for user_id in &expired_users {
            let seqs = self.seqs_txn(&txn, *user_id)?;
            self.remove_entries_txn(&txn, *user_id, &seqs)?;
            let mut table = txn.open_table(QUEUE_META_TABLE)?;
            table.remove(*user_id)?;
        }
        txn.commit()?;

        if !expired_users.is_empty() {
            tracing::info!(count = expired_users.len(), "Purged expired notification queues");
        }
        Ok(expired_users.len())
    }

    /// Number of queues (live or not yet purged)
    pub fn queue_count(&self) -> StorageResult<u64> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(QUEUE_META_TABLE)?;
        Ok(table.len()?)
    }
}

impl std::fmt::Debug for NotificationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationQueue")
            .field("cap", &self.cap)
            .field("ttl_millis", &self.ttl_millis)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(message: &str) -> NewNotification {
        NewNotification {
            kind: "notification".to_string(),
            title: "Order".to_string(),
            message: message.to_string(),
            data: serde_json::Value::Null,
        }
    }

    fn queue() -> NotificationQueue {
        NotificationQueue::open_in_memory(DEFAULT_QUEUE_CAP, DEFAULT_TTL_MILLIS).unwrap()
    }

    #[test]
    fn test_queue_trimmed_to_cap_most_recent_first() {
        let queue = queue();
        for i in 0..105 {
            queue.push(1, note(&format!("n{i}")), i).unwrap();
        }

        assert_eq!(queue.len(1, 200).unwrap(), 100);
        let page = queue.list(1, 1, 100, 200).unwrap();
        assert_eq!(page.total, 100);
        assert_eq!(page.items.first().unwrap().message, "n104");
        assert_eq!(page.items.last().unwrap().message, "n5");
    }

    #[test]
    fn test_pagination() {
        let queue = queue();
        for i in 0..25 {
            queue.push(1, note(&format!("n{i}")), i).unwrap();
        }
        let page = queue.list(1, 3, 10, 100).unwrap();
        assert_eq!(page.items.len(), 5);
        assert_eq!(page.items[0].message, "n4");
        assert_eq!(page.page, 3);
        assert!(queue.list(1, 4, 10, 100).unwrap().items.is_empty());
        // page 0 按第一页处理
        assert_eq!(queue.list(1, 0, 10, 100).unwrap().items[0].message, "n24");
        assert!(queue.list(2, 1, 10, 100).unwrap().items.is_empty());
    }

    #[test]
    fn test_huge_page_number_is_empty() {
        let queue = queue();
        for i in 0..3 {
            queue.push(1, note(&format!("n{i}")), i).unwrap();
        }
        let page = queue.list(1, usize::MAX, 10, 100).unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.total, 3);
        assert_eq!(page.page, usize::MAX);
    }

    #[test]
    fn test_ttl_refreshed_by_push() {
        let queue = NotificationQueue::open_in_memory(100, 1_000).unwrap();
        queue.push(1, note("a"), 0).unwrap();
        assert_eq!(queue.len(1, 1_000).unwrap(), 1);
        assert_eq!(queue.len(1, 1_001).unwrap(), 0);

        // 续期
        queue.push(1, note("b"), 900).unwrap();
        assert_eq!(queue.len(1, 1_500).unwrap(), 2);

        // 过期后写入，旧条目不再可见
        queue.push(1, note("c"), 5_000).unwrap();
        let page = queue.list(1, 1, 10, 5_000).unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].message, "c");
    }

    #[test]
    fn test_purge_expired() {
        let queue = NotificationQueue::open_in_memory(100, 1_000).unwrap();
        queue.push(1, note("a"), 0).unwrap();
        queue.push(2, note("b"), 500).unwrap();

        assert_eq!(queue.purge_expired(1_200).unwrap(), 1);
        assert_eq!(queue.queue_count().unwrap(), 1);
        assert_eq!(queue.len(2, 1_200).unwrap(), 1);
        assert_eq!(queue.purge_expired(1_200).unwrap(), 0);
    }

    #[test]
    fn test_read_state() {
        let queue = queue();
        let first = queue.push(1, note("a"), 1).unwrap();
        queue.push(1, note("b"), 2).unwrap();
        queue.push(1, note("c"), 3).unwrap();
        assert_eq!(queue.unread_count(1, 10).unwrap(), 3);

        assert!(queue.mark_read(1, &first.id, 10).unwrap());
        assert!(!queue.mark_read(1, &first.id, 10).unwrap());
        assert!(!queue.mark_read(1, "missing", 10).unwrap());
        assert_eq!(queue.unread_count(1, 10).unwrap(), 2);

        let page = queue.list(1, 1, 10, 10).unwrap();
        assert_eq!(page.unread, 2);
        assert!(page.items[2].read);

        assert_eq!(queue.mark_all_read(1, 10).unwrap(), 2);
        assert_eq!(queue.unread_count(1, 10).unwrap(), 0);

        assert_eq!(queue.clear(1).unwrap(), 3);
        assert_eq!(queue.len(1, 10).unwrap(), 0);
        assert_eq!(queue.queue_count().unwrap(), 0);
    }
}
