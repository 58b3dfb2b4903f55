//! Refund Worker - 退款提交
//!
//! 非余额支付的退款在取消事务中写入 `pending_refunds`，由此 worker
//! 提交给支付渠道 ([`RefundGateway`])。渠道确认后通过
//! `OrdersManager::settle_refund` 把订单推进到 REFUNDED。
//!
//! 失败按指数退避重试，超过上限进入死信队列等待人工处理。
//!
//! Note: redb operations are synchronous for stability.

use async_trait::async_trait;
use shared::order::{OrderStatus, RefundStatus};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::storage::{OrderStorage, PendingRefund};
use crate::utils::Clock;

const MAX_RETRY_COUNT: u32 = 3;
const RETRY_BASE_DELAY_SECS: u64 = 5;
const RETRY_MAX_DELAY_SECS: u64 = 60;
const QUEUE_SCAN_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("refund rejected: {0}")]
    Rejected(String),

    #[error("gateway unavailable: {0}")]
    Unavailable(String),
}

/// Payment provider refund API
#[async_trait]
pub trait RefundGateway: Send + Sync {
    /// Ask the provider to return `refund.amount`. Confirmation arrives later
    /// through `settle_refund`.
    async fn request_refund(&self, refund: &PendingRefund) -> Result<(), GatewayError>;
}

/// Gateway that only logs the request (no provider configured)
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingRefundGateway;

#[async_trait]
impl RefundGateway for LoggingRefundGateway {
    async fn request_refund(&self, refund: &PendingRefund) -> Result<(), GatewayError> {
        tracing::info!(
            order_number = %refund.order_number,
            amount = %refund.amount,
            method = ?refund.method,
            "Refund requested from provider"
        );
        Ok(())
    }
}

pub struct RefundWorker {
    storage: OrderStorage,
    gateway: Arc<dyn RefundGateway>,
    clock: Arc<dyn Clock>,
}

impl RefundWorker {
    pub fn new(storage: OrderStorage, gateway: Arc<dyn RefundGateway>, clock: Arc<dyn Clock>) -> Self {
        Self {
            storage,
            gateway,
            clock,
        }
    }

    /// Run until shutdown or until the wake-up channel closes
    pub async fn run(self, mut wake_rx: mpsc::Receiver<String>, shutdown: CancellationToken) {
        tracing::info!("RefundWorker started");

        // 处理上次运行遗留的队列
        self.process_pending_queue().await;

        let mut scan_interval = tokio::time::interval(Duration::from_secs(QUEUE_SCAN_INTERVAL_SECS));

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("RefundWorker received shutdown signal");
                    break;
                }
                wake = wake_rx.recv() => {
                    match wake {
                        Some(order_number) => {
                            tracing::debug!(order_number = %order_number, "Refund queued");
                            self.process_order(&order_number).await;
                        }
                        None => {
                            tracing::info!("Refund channel closed, shutting down RefundWorker");
                            break;
                        }
                    }
                }
                _ = scan_interval.tick() => {
                    self.process_pending_queue().await;
                }
            }
        }
    }

    /// Submit every due entry; returns how many were submitted
    pub async fn process_pending_queue(&self) -> usize {
        let pending = match self.storage.get_pending_refunds() {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(error = %e, "Failed to get pending refunds");
                return 0;
            }
        };

        if pending.is_empty() {
            return 0;
        }

        tracing::info!(count = pending.len(), "Processing pending refund queue");

        let mut submitted = 0;
        for entry in pending {
            if self.should_retry(&entry) && self.submit(&entry).await {
                submitted += 1;
            }
        }
        submitted
    }

    /// Check if entry should be retried based on backoff
    fn should_retry(&self, entry: &PendingRefund) -> bool {
        if entry.retry_count >= MAX_RETRY_COUNT {
            tracing::error!(
                order_number = %entry.order_number,
                retry_count = entry.retry_count,
                last_error = ?entry.last_error,
                "Max retry count exceeded, moving to dead letter queue"
            );
            let error = entry.last_error.as_deref().unwrap_or("Unknown error");
            if let Err(e) = self
                .storage
                .move_refund_to_dead_letter(&entry.order_number, error, self.clock.now_millis())
            {
                tracing::error!(order_number = %entry.order_number, error = %e, "Failed to move refund to dead letter");
            }
            return false;
        }

        // Exponential backoff: delay = base * 2^retry_count, capped at max
        if entry.retry_count == 0 {
            return true;
        }
        let delay_secs =
            (RETRY_BASE_DELAY_SECS * 2u64.pow(entry.retry_count)).min(RETRY_MAX_DELAY_SECS);
        let last_attempt = entry.last_attempt_at.unwrap_or(entry.created_at);
        let retry_after_ms = last_attempt + (delay_secs as i64 * 1000);
        self.clock.now_millis() >= retry_after_ms
    }

    async fn process_order(&self, order_number: &str) {
        match self.storage.get_pending_refund(order_number) {
            Ok(Some(entry)) => {
                if self.should_retry(&entry) {
                    self.submit(&entry).await;
                }
            }
            Ok(None) => {
                tracing::debug!(order_number = %order_number, "Refund no longer pending");
            }
            Err(e) => {
                tracing::error!(order_number = %order_number, error = %e, "Failed to load pending refund");
            }
        }
    }

    /// Submit one refund; true when the provider accepted it
    async fn submit(&self, entry: &PendingRefund) -> bool {
        let number = entry.order_number.as_str();

        // 订单已经结算（或不存在）时直接出队
        let still_pending = match self.storage.get_order(number) {
            Ok(Some(order)) => {
                order.status == OrderStatus::Cancelled
                    && order
                        .refund
                        .as_ref()
                        .is_some_and(|r| r.status == RefundStatus::Pending)
            }
            Ok(None) => false,
            Err(e) => {
                tracing::error!(order_number = %number, error = %e, "Failed to load order for refund");
                return false;
            }
        };
        if !still_pending {
            tracing::warn!(order_number = %number, "Order has no pending refund, removing from queue");
            if let Err(e) = self.storage.remove_pending_refund(number) {
                tracing::error!(order_number = %number, error = %e, "Failed to remove pending refund");
            }
            return false;
        }

        match self.gateway.request_refund(entry).await {
            Ok(()) => {
                tracing::info!(order_number = %number, amount = %entry.amount, "Refund submitted");
                if let Err(e) = self.storage.remove_pending_refund(number) {
                    tracing::error!(order_number = %number, error = %e, "Failed to remove submitted refund");
                }
                true
            }
            Err(e) => {
                tracing::error!(order_number = %number, error = %e, "Refund submission failed");
                let now = self.clock.now_millis();
                if let Err(e2) = self.storage.mark_refund_failed(number, &e.to_string(), now) {
                    tracing::error!(order_number = %number, error = %e2, "Failed to mark refund failed");
                }
                false
            }
        }
    }
}
