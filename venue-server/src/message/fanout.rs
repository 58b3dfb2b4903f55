//! Notification Fanout - 领域事件分发
//!
//! 一个事件两条路径:
//! 1. 在线推送: 通过 [`ConnectionRegistry`] 找到目标用户 / 门店的连接，
//!    `try_send` 到各连接的发送队列 (失败只记录日志)
//! 2. 持久化: 有目标用户时，无论是否在线都写入其通知队列
//!
//! 分发永远不会让触发它的订单流转失败。事件经 [`super::bus::EventBus`]
//! 排队，由后台 dispatcher 调用 [`NotificationFanout::handle`]。

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use shared::message::{
    NotificationPage, NotificationPayload, OrderStatusPayload, PaymentSuccessPayload,
    RoomStatusPayload, SystemAnnouncementPayload,
};
use shared::{PushEnvelope, PushEventType};

use super::queue::{NewNotification, NotificationQueue};
use super::registry::{ConnectionRegistry, PushSink};
use super::DomainEvent;
use crate::orders::storage::StorageResult;
use crate::utils::Clock;

/// Event to deliver
#[derive(Debug, Clone, PartialEq)]
pub struct FanoutEvent {
    pub event_type: PushEventType,
    pub target_user_id: Option<i64>,
    pub target_store_id: Option<i64>,
    pub payload: serde_json::Value,
    /// Title / message of the durable record
    pub title: String,
    pub message: String,
}

/// Outcome of one dispatch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Connections the envelope was queued to
    pub delivered: usize,
    pub failed: usize,
    /// Durable record appended
    pub persisted: bool,
}

pub struct NotificationFanout {
    registry: Arc<ConnectionRegistry>,
    sink: Arc<dyn PushSink>,
    queue: Arc<NotificationQueue>,
    clock: Arc<dyn Clock>,
}

impl NotificationFanout {
    pub fn new(registry: Arc<ConnectionRegistry>, queue: Arc<NotificationQueue>, clock: Arc<dyn Clock>) -> Self {
        Self {
            sink: registry.clone(),
            registry,
            queue,
            clock,
        }
    }

    /// Replace the delivery sink (defaults to the registry itself)
    pub fn with_sink(mut self, sink: Arc<dyn PushSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn queue(&self) -> &Arc<NotificationQueue> {
        &self.queue
    }

    fn push_to(&self, conn_ids: impl IntoIterator<Item = String>, envelope: &PushEnvelope, report: &mut DispatchReport) {
        for conn_id in conn_ids {
            match self.sink.push(&conn_id, envelope.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::warn!(conn_id = %conn_id, event_type = %envelope.event_type, error = %e, "Push failed");
                    report.failed += 1;
                }
            }
        }
    }

    /// Push to live connections of the target user and store, then persist
    /// for the target user
    pub fn dispatch(&self, event: FanoutEvent) -> DispatchReport {
        let now = self.clock.now_millis();
        let mut report = DispatchReport::default();

        let mut targets: HashSet<String> = HashSet::new();
        if let Some(user_id) = event.target_user_id {
            targets.extend(self.registry.connections_for_user(user_id));
        }
        if let Some(store_id) = event.target_store_id {
            targets.extend(self.registry.connections_for_store(store_id));
        }

        let envelope = PushEnvelope {
            event_type: event.event_type,
            data: event.payload.clone(),
            timestamp: now,
        };
        self.push_to(targets, &envelope, &mut report);

        if let Some(user_id) = event.target_user_id {
            let record = NewNotification {
                kind: event.event_type.as_str().to_string(),
                title: event.title,
                message: event.message,
                data: event.payload,
            };
            match self.queue.push(user_id, record, now) {
                Ok(_) => report.persisted = true,
                Err(e) => {
                    tracing::error!(user_id, event_type = %event.event_type, error = %e, "Failed to persist notification");
                }
            }
        }

        tracing::debug!(
            event_type = %event.event_type,
            delivered = report.delivered,
            failed = report.failed,
            persisted = report.persisted,
            "Event dispatched"
        );
        report
    }

    /// Free-form `notification` event to one user
    pub fn send_notification(
        &self,
        user_id: i64,
        kind: impl Into<String>,
        title: impl Into<String>,
        message: impl Into<String>,
        data: serde_json::Value,
    ) -> DispatchReport {
        let payload = NotificationPayload {
            title: title.into(),
            message: message.into(),
            kind: kind.into(),
            data,
        };
        let event = match to_value(&payload) {
            Some(value) => FanoutEvent {
                event_type: PushEventType::Notification,
                target_user_id: Some(user_id),
                target_store_id: None,
                payload: value,
                title: payload.title,
                message: payload.message,
            },
            None => return DispatchReport::default(),
        };
        self.dispatch(event)
    }

    /// `system_announcement` to every live connection; not persisted
    pub fn broadcast_announcement(&self, message: impl Into<String>) -> DispatchReport {
        let mut report = DispatchReport::default();
        let payload = SystemAnnouncementPayload { message: message.into() };
        let envelope = match PushEnvelope::new(PushEventType::SystemAnnouncement, &payload, self.clock.now_millis()) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode announcement");
                return report;
            }
        };
        self.push_to(self.registry.all_connections(), &envelope, &mut report);
        tracing::info!(delivered = report.delivered, failed = report.failed, "Announcement broadcast");
        report
    }

    // ========== 通知队列读取 ==========

    pub fn list_notifications(&self, user_id: i64, page: usize, limit: usize) -> StorageResult<NotificationPage> {
        self.queue.list(user_id, page, limit, self.clock.now_millis())
    }

    pub fn mark_read(&self, user_id: i64, notification_id: &str) -> StorageResult<bool> {
        self.queue.mark_read(user_id, notification_id, self.clock.now_millis())
    }

    pub fn mark_all_read(&self, user_id: i64) -> StorageResult<usize> {
        self.queue.mark_all_read(user_id, self.clock.now_millis())
    }

    pub fn unread_count(&self, user_id: i64) -> StorageResult<usize> {
        self.queue.unread_count(user_id, self.clock.now_millis())
    }

    pub fn clear_notifications(&self, user_id: i64) -> StorageResult<usize> {
        self.queue.clear(user_id)
    }

    pub fn purge_expired(&self) -> StorageResult<usize> {
        self.queue.purge_expired(self.clock.now_millis())
    }

    /// Deliver one domain event; called by the dispatcher task
    pub fn handle(&self, event: DomainEvent) {
        let name = event.name();
        if let Some(fanout_event) = Self::to_fanout(event) {
            let report = self.dispatch(fanout_event);
            tracing::trace!(event = name, delivered = report.delivered, "Domain event fanned out");
        }
    }

    /// Map a domain event to its push event; `None` when it carries nothing to send
    fn to_fanout(event: DomainEvent) -> Option<FanoutEvent> {
        match event {
            DomainEvent::OrderStatusChanged { order, previous } => {
                let message = match previous {
                    None => format!("Order {} created, awaiting payment", order.order_number),
                    Some(_) => format!("Order {} is now: {}", order.order_number, order.status.text()),
                };
                let target_user_id = Some(order.user_id);
                let target_store_id = Some(order.store_id);
                let payload = OrderStatusPayload {
                    order_id: order.order_number.clone(),
                    status: order.status,
                    order_data: order,
                };
                Some(FanoutEvent {
                    event_type: PushEventType::OrderStatusUpdate,
                    target_user_id,
                    target_store_id,
                    payload: to_value(&payload)?,
                    title: "Order update".to_string(),
                    message,
                })
            }
            DomainEvent::PaymentSucceeded { order } => {
                let Some(payment) = order.payment_info else {
                    tracing::warn!(order_number = %order.order_number, "Payment event without payment info, skipping");
                    return None;
                };
                let message = format!("Payment of {} received for order {}", payment.amount, order.order_number);
                let payload = PaymentSuccessPayload {
                    order_id: order.order_number,
                    payment_data: payment,
                };
                Some(FanoutEvent {
                    event_type: PushEventType::OrderPaymentSuccess,
                    target_user_id: Some(order.user_id),
                    target_store_id: None,
                    payload: to_value(&payload)?,
                    title: "Payment received".to_string(),
                    message,
                })
            }
            DomainEvent::RoomStatusChanged { room, previous } => {
                let message = format!("{}: {} -> {}", room.name, previous.text(), room.status.text());
                let target_store_id = Some(room.store_id);
                let payload = RoomStatusPayload {
                    room_id: room.id,
                    status: room.status,
                    room_data: room,
                };
                Some(FanoutEvent {
                    event_type: PushEventType::RoomStatusUpdate,
                    target_user_id: None,
                    target_store_id,
                    payload: to_value(&payload)?,
                    title: "Room status".to_string(),
                    message,
                })
            }
        }
    }
}

fn to_value<T: Serialize>(payload: &T) -> Option<serde_json::Value> {
    match serde_json::to_value(payload) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode push payload");
            None
        }
    }
}

impl std::fmt::Debug for NotificationFanout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationFanout")
            .field("registry", &self.registry)
            .field("queue", &self.queue)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::queue::{DEFAULT_QUEUE_CAP, DEFAULT_TTL_MILLIS};
    use crate::message::registry::PushError;
    use crate::utils::ManualClock;
    use rust_decimal::Decimal;
    use shared::message::ConnectionRole;
    use shared::models::{Room, RoomStatus};
    use shared::order::{Order, OrderStatus, OrderType, PaymentInfo, PaymentMethod};
    use tokio::sync::mpsc;

    const NOW: i64 = 1_700_000_000_000;

    fn fanout_with(registry: ConnectionRegistry) -> NotificationFanout {
        let queue = NotificationQueue::open_in_memory(DEFAULT_QUEUE_CAP, DEFAULT_TTL_MILLIS).unwrap();
        NotificationFanout::new(Arc::new(registry), Arc::new(queue), Arc::new(ManualClock::new(NOW)))
    }

    fn order(status: OrderStatus) -> Order {
        Order {
            order_number: "KTV202401010001".to_string(),
            user_id: 1,
            store_id: 7,
            room_id: Some(3),
            order_type: OrderType::RoomBooking,
            start_time: Some(NOW + 3_600_000),
            end_time: Some(NOW + 7_200_000),
            guest_count: Some(4),
            items: vec![],
            subtotal: Decimal::ZERO,
            deposit: Decimal::from(100),
            discount: Decimal::ZERO,
            total_amount: Decimal::from(100),
            actual_amount: Decimal::from(100),
            status,
            contact_phone: "13800000000".to_string(),
            expired_at: NOW + 900_000,
            created_at: NOW,
            updated_at: NOW,
            paid_at: None,
            confirmed_at: None,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            payment_info: None,
            refund: None,
            cancel_reason: None,
            cancelled_by: None,
            points_awarded: 0,
            version: 1,
        }
    }

    fn drain(rx: &mut mpsc::Receiver<PushEnvelope>) -> Vec<PushEnvelope> {
        let mut out = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            out.push(envelope);
        }
        out
    }

    #[test]
    fn test_order_event_reaches_user_and_store() {
        let fanout = fanout_with(ConnectionRegistry::default());
        let registry = fanout.registry().clone();
        let mut phone = registry.add_connection(1, "u1-phone", ConnectionRole::User, None).unwrap();
        let mut tablet = registry.add_connection(1, "u1-tablet", ConnectionRole::User, None).unwrap();
        let mut merchant = registry
            .add_connection(50, "m50", ConnectionRole::Merchant, Some(7))
            .unwrap();
        let mut other = registry.add_connection(2, "u2", ConnectionRole::User, None).unwrap();

        fanout.handle(DomainEvent::OrderStatusChanged {
            order: order(OrderStatus::Paid),
            previous: Some(OrderStatus::Pending),
        });

        for rx in [&mut phone, &mut tablet, &mut merchant] {
            let received = drain(rx);
            assert_eq!(received.len(), 1);
            assert_eq!(received[0].event_type, PushEventType::OrderStatusUpdate);
            assert_eq!(received[0].timestamp, NOW);
            let payload: OrderStatusPayload = received[0].parse().unwrap();
            assert_eq!(payload.order_id, "KTV202401010001");
            assert_eq!(payload.status, OrderStatus::Paid);
        }
        assert!(drain(&mut other).is_empty());

        let page = fanout.list_notifications(1, 1, 20).unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].kind, "order_status_update");
        assert_eq!(page.items[0].data["status"], "paid");
        // 商户连接不产生持久化记录
        assert_eq!(fanout.list_notifications(50, 1, 20).unwrap().total, 0);
    }

    #[test]
    fn test_offline_user_still_persisted() {
        let fanout = fanout_with(ConnectionRegistry::default());
        let report = fanout.send_notification(9, "promo", "Happy hour", "Half price until 8pm", serde_json::Value::Null);
        assert_eq!(
            report,
            DispatchReport {
                delivered: 0,
                failed: 0,
                persisted: true
            }
        );
        assert_eq!(fanout.unread_count(9).unwrap(), 1);

        let page = fanout.list_notifications(9, 1, 20).unwrap();
        assert_eq!(page.items[0].kind, "notification");
        assert_eq!(page.items[0].title, "Happy hour");
        assert!(fanout.mark_read(9, &page.items[0].id).unwrap());
        assert_eq!(fanout.unread_count(9).unwrap(), 0);
        assert_eq!(fanout.clear_notifications(9).unwrap(), 1);
    }

    #[test]
    fn test_push_failure_does_not_stop_persist() {
        let fanout = fanout_with(ConnectionRegistry::new(5, 1));
        let registry = fanout.registry().clone();
        let _slow = registry.add_connection(1, "slow", ConnectionRole::User, None).unwrap();
        let closed = registry.add_connection(1, "gone", ConnectionRole::User, None).unwrap();
        drop(closed);

        let first = fanout.send_notification(1, "info", "a", "a", serde_json::Value::Null);
        assert_eq!(first.delivered, 1);
        assert_eq!(first.failed, 1);

        // slow 的缓冲区已满
        let second = fanout.send_notification(1, "info", "b", "b", serde_json::Value::Null);
        assert_eq!(second.delivered, 0);
        assert_eq!(second.failed, 2);
        assert!(second.persisted);
        assert_eq!(fanout.list_notifications(1, 1, 20).unwrap().total, 2);
    }

    #[test]
    fn test_custom_sink() {
        struct Rejecting;
        impl PushSink for Rejecting {
            fn push(&self, conn_id: &str, _envelope: PushEnvelope) -> Result<(), PushError> {
                Err(PushError::Closed(conn_id.to_string()))
            }
        }

        let fanout = fanout_with(ConnectionRegistry::default()).with_sink(Arc::new(Rejecting));
        let _rx = fanout
            .registry()
            .add_connection(1, "c1", ConnectionRole::User, None)
            .unwrap();
        let report = fanout.send_notification(1, "info", "t", "m", serde_json::Value::Null);
        assert_eq!(report.failed, 1);
        assert!(report.persisted);
    }

    #[test]
    fn test_payment_event_to_user_only() {
        let fanout = fanout_with(ConnectionRegistry::default());
        let registry = fanout.registry().clone();
        let mut user = registry.add_connection(1, "u1", ConnectionRole::User, None).unwrap();
        let mut merchant = registry
            .add_connection(50, "m50", ConnectionRole::Merchant, Some(7))
            .unwrap();

        let mut paid = order(OrderStatus::Paid);
        paid.payment_info = Some(PaymentInfo {
            method: PaymentMethod::Wechat,
            transaction_id: Some("wx-1".to_string()),
            paid_at: NOW,
            amount: Decimal::from(100),
        });
        fanout.handle(DomainEvent::PaymentSucceeded { order: paid });

        let received = drain(&mut user);
        assert_eq!(received.len(), 1);
        let payload: PaymentSuccessPayload = received[0].parse().unwrap();
        assert_eq!(payload.payment_data.transaction_id.as_deref(), Some("wx-1"));
        assert!(drain(&mut merchant).is_empty());

        // 无支付信息的事件被跳过
        fanout.handle(DomainEvent::PaymentSucceeded {
            order: order(OrderStatus::Paid),
        });
        assert!(drain(&mut user).is_empty());
        assert_eq!(fanout.list_notifications(1, 1, 20).unwrap().total, 1);
    }

    #[test]
    fn test_room_event_to_store_not_persisted() {
        let fanout = fanout_with(ConnectionRegistry::default());
        let registry = fanout.registry().clone();
        let mut merchant = registry
            .add_connection(50, "m50", ConnectionRole::Merchant, Some(7))
            .unwrap();
        let mut other_store = registry
            .add_connection(51, "m51", ConnectionRole::Merchant, Some(8))
            .unwrap();

        let mut room = Room::new(3, 7, "VIP-1", 10);
        room.status = RoomStatus::Maintenance;
        fanout.handle(DomainEvent::RoomStatusChanged {
            room,
            previous: RoomStatus::Available,
        });

        let received = drain(&mut merchant);
        assert_eq!(received.len(), 1);
        let payload: RoomStatusPayload = received[0].parse().unwrap();
        assert_eq!(payload.room_id, 3);
        assert_eq!(payload.status, RoomStatus::Maintenance);
        assert!(drain(&mut other_store).is_empty());
        assert_eq!(fanout.queue().queue_count().unwrap(), 0);
    }

    #[test]
    fn test_broadcast_announcement() {
        let fanout = fanout_with(ConnectionRegistry::default());
        let registry = fanout.registry().clone();
        let mut receivers = vec![
            registry.add_connection(1, "a", ConnectionRole::User, None).unwrap(),
            registry.add_connection(2, "b", ConnectionRole::User, None).unwrap(),
            registry.add_connection(3, "c", ConnectionRole::Admin, None).unwrap(),
        ];

        let report = fanout.broadcast_announcement("Closing at 2am");
        assert_eq!(report.delivered, 3);
        assert!(!report.persisted);
        for rx in &mut receivers {
            let received = drain(rx);
            let payload: SystemAnnouncementPayload = received[0].parse().unwrap();
            assert_eq!(payload.message, "Closing at 2am");
        }
        assert_eq!(fanout.queue().queue_count().unwrap(), 0);
    }
}
