//! 事件总线
//!
//! 订单 / 包厢服务只把 [`DomainEvent`] 放进有界 mpsc 通道，立即返回；
//! 单个后台 dispatcher 依次取出事件交给 [`NotificationFanout`] 完成在线推送
//! 和通知队列写入。
//!
//! ```text
//! OrdersManager ──notify──▶ EventBus (try_send) ──▶ mpsc ──▶ run_dispatcher ──▶ NotificationFanout
//! ```
//!
//! Single consumer: events of one user are appended in emission order.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use super::fanout::NotificationFanout;
use super::{DomainEvent, Notifier};

/// Default capacity of the event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Channel-backed [`Notifier`] handed to the services
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: mpsc::Sender<DomainEvent>,
}

impl EventBus {
    /// Bus plus the receiving end for the dispatcher
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<DomainEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl Notifier for EventBus {
    fn notify(&self, event: DomainEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                tracing::warn!(event = event.name(), "Event queue full, notification dropped");
            }
            Err(TrySendError::Closed(event)) => {
                tracing::warn!(event = event.name(), "Event dispatcher stopped, notification dropped");
            }
        }
    }
}

/// Drain the event channel into the fanout until shutdown
///
/// Events already queued when shutdown fires are still delivered.
pub async fn run_dispatcher(
    fanout: Arc<NotificationFanout>,
    mut rx: mpsc::Receiver<DomainEvent>,
    shutdown: CancellationToken,
) {
    tracing::info!("Event dispatcher started");

    loop {
        tokio::select! {
            biased;
            event = rx.recv() => {
                match event {
                    Some(event) => fanout.handle(event),
                    None => {
                        tracing::info!("Event channel closed, stopping dispatcher");
                        return;
                    }
                }
            }
            _ = shutdown.cancelled() => {
                tracing::info!("Event dispatcher received shutdown signal");
                break;
            }
        }
    }

    let mut drained = 0usize;
    while let Ok(event) = rx.try_recv() {
        fanout.handle(event);
        drained += 1;
    }
    if drained > 0 {
        tracing::info!(drained, "Flushed queued events before shutdown");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::queue::{DEFAULT_QUEUE_CAP, DEFAULT_TTL_MILLIS};
    use crate::message::{ConnectionRegistry, NotificationQueue};
    use crate::utils::ManualClock;
    use shared::models::{Room, RoomStatus};
    use std::time::Duration;

    fn room_event(id: i64) -> DomainEvent {
        DomainEvent::RoomStatusChanged {
            room: Room::new(id, 7, format!("R{id}"), 6),
            previous: RoomStatus::Maintenance,
        }
    }

    fn fanout() -> Arc<NotificationFanout> {
        let queue = NotificationQueue::open_in_memory(DEFAULT_QUEUE_CAP, DEFAULT_TTL_MILLIS).unwrap();
        Arc::new(NotificationFanout::new(
            Arc::new(ConnectionRegistry::default()),
            Arc::new(queue),
            Arc::new(ManualClock::new(0)),
        ))
    }

    #[test]
    fn test_notify_never_blocks() {
        let (bus, mut rx) = EventBus::channel(1);
        bus.notify(room_event(1));
        // 通道已满: 丢弃并立即返回
        bus.notify(room_event(2));
        assert_eq!(rx.try_recv().unwrap(), room_event(1));
        assert!(rx.try_recv().is_err());

        drop(rx);
        bus.notify(room_event(3));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_dispatcher_delivers_in_order() {
        let fanout = fanout();
        let mut merchant = fanout
            .registry()
            .add_connection(50, "m50", shared::message::ConnectionRole::Merchant, Some(7))
            .unwrap();
        let (bus, rx) = EventBus::channel(16);
        let token = CancellationToken::new();
        let handle = tokio::spawn(run_dispatcher(fanout.clone(), rx, token.clone()));

        for id in 1..=3 {
            bus.notify(room_event(id));
        }
        for id in 1..=3 {
            let envelope = tokio::time::timeout(Duration::from_secs(2), merchant.recv())
                .await
                .unwrap()
                .unwrap();
            let payload: shared::message::RoomStatusPayload = envelope.parse().unwrap();
            assert_eq!(payload.room_id, id);
        }

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_queued_events_flushed_on_shutdown() {
        let fanout = fanout();
        let mut merchant = fanout
            .registry()
            .add_connection(50, "m50", shared::message::ConnectionRole::Merchant, Some(7))
            .unwrap();
        let (bus, rx) = EventBus::channel(16);
        bus.notify(room_event(1));
        bus.notify(room_event(2));

        let token = CancellationToken::new();
        token.cancel();
        run_dispatcher(fanout, rx, token).await;

        assert!(merchant.try_recv().is_ok());
        assert!(merchant.try_recv().is_ok());
    }
}
