//! Order lifecycle
//!
//! - **machine**: pure status transitions
//! - **manager**: create/transition orchestration, side effects, notifications
//! - **storage**: redb persistence for orders, catalog and queues
//! - **sweeper**: cancels unpaid orders past their payment window
//! - **refund_worker**: submits pending refunds to the payment provider
//!
//! # Architecture
//!
//! ```text
//! request → OrdersManager → machine::apply → OrderStorage (redb txn)
//!                 │                               │
//!                 ▼                               ▼
//!             Notifier                    pending_refunds ──► RefundWorker ──► RefundGateway
//! ```

pub mod error;
pub mod machine;
pub mod manager;
pub mod refund_worker;
pub mod storage;
pub mod sweeper;

// Re-exports
pub use error::{Entity, OrderError, OrderResult};
pub use machine::{LifecycleRules, Transition};
pub use manager::{ManagerRules, OrdersManager};
pub use refund_worker::{LoggingRefundGateway, RefundGateway, RefundWorker};
pub use storage::OrderStorage;
pub use sweeper::{ExpirationSweeper, SweepReport};
