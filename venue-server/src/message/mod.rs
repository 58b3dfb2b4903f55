//! 推送与通知
//!
//! - [`registry`] - 在线连接注册表 (user / store 反向索引)
//! - [`queue`] - 每用户持久化通知队列 (redb)
//! - [`bus`] - 事件通道 ([`EventBus`]) 与后台 dispatcher
//! - [`fanout`] - 领域事件 → 在线推送 + 持久化通知
//! - [`transport`] / [`tcp_server`] - TCP 推送服务
//!
//! # 数据流
//!
//! ```text
//! OrdersManager / RoomService
//!        │ notify(DomainEvent)  (try_send, 不阻塞)
//!        ▼
//! EventBus ──► mpsc ──► dispatcher task
//!                            │
//!                            ▼
//! NotificationFanout ──► ConnectionRegistry ──► mpsc ──► TCP session
//!        │
//!        └──► NotificationQueue (redb, 100 条 / 30 天)
//! ```
//!
//! Notifications are emitted after the transition commits and never fail
//! it: every delivery error is logged and dropped.

pub mod bus;
pub mod fanout;
pub mod queue;
pub mod registry;
pub mod tcp_server;
pub mod transport;

use shared::models::{Room, RoomStatus};
use shared::order::{Order, OrderStatus};

pub use bus::{DEFAULT_EVENT_CAPACITY, EventBus, run_dispatcher};
pub use fanout::{DispatchReport, FanoutEvent, NotificationFanout};
pub use queue::NotificationQueue;
pub use registry::{ConnectionRegistry, PushError, PushSink, RegistryError, RegistryStats};
pub use tcp_server::PushServer;

/// Domain event emitted after a committed change
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    /// Order created (`previous == None`) or moved to a new status
    OrderStatusChanged {
        order: Order,
        previous: Option<OrderStatus>,
    },
    /// Payment captured
    PaymentSucceeded { order: Order },
    RoomStatusChanged { room: Room, previous: RoomStatus },
}

impl DomainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::OrderStatusChanged { .. } => "order_status_changed",
            DomainEvent::PaymentSucceeded { .. } => "payment_succeeded",
            DomainEvent::RoomStatusChanged { .. } => "room_status_changed",
        }
    }
}

/// Notification capability handed to services at construction
pub trait Notifier: Send + Sync {
    /// Deliver an event. Must not block on the network and must not fail.
    fn notify(&self, event: DomainEvent);
}

/// Drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, event: DomainEvent) {
        tracing::trace!(event = event.name(), "Notification dropped (noop notifier)");
    }
}
