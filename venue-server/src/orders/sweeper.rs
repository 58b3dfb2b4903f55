//! Expiration Sweeper - 超时未支付订单清扫
//!
//! 周期扫描 `pending_expiry` 索引，把已过支付期限的订单走正常的取消流程
//! (source = system)。与用户支付并发时，输掉竞争的一方得到
//! `InvalidTransition`，此处仅记录日志。
//!
//! 同一时刻只允许一轮清扫 (single-flight)。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::error::{OrderError, OrderResult};
use super::manager::OrdersManager;
use crate::message::NotificationQueue;

/// Outcome of one pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Expired pending orders found
    pub scanned: usize,
    pub cancelled: usize,
    /// Lost the race to another transition
    pub skipped: usize,
    pub failed: usize,
    /// Expired notification queues removed
    pub purged_queues: usize,
}

struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ExpirationSweeper {
    manager: Arc<OrdersManager>,
    queue: Option<Arc<NotificationQueue>>,
    interval: Duration,
    in_flight: AtomicBool,
}

impl ExpirationSweeper {
    pub fn new(manager: Arc<OrdersManager>, interval: Duration) -> Self {
        Self {
            manager,
            queue: None,
            interval,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Also purge expired notification queues on each tick
    pub fn with_notification_queue(mut self, queue: Arc<NotificationQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Run one pass. Returns `None` when another pass is still running.
    ///
    /// A storage failure while listing candidates aborts the pass; per-order
    /// failures are logged and counted.
    pub fn sweep_once(&self) -> OrderResult<Option<SweepReport>> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Sweep already in progress, skipping tick");
            return Ok(None);
        }
        let _guard = FlightGuard(&self.in_flight);

        let now = self.manager.clock().now_millis();
        let candidates = self.manager.storage().expired_pending(now)?;

        let mut report = SweepReport {
            scanned: candidates.len(),
            ..SweepReport::default()
        };

        for order_number in &candidates {
            match self.manager.expire_order(order_number) {
                Ok(_) => report.cancelled += 1,
                Err(OrderError::InvalidTransition { from, .. }) => {
                    tracing::info!(order_number = %order_number, status = %from, "Expired order already moved on, skipping");
                    report.skipped += 1;
                }
                Err(e) => {
                    tracing::error!(order_number = %order_number, error = %e, "Failed to expire order");
                    report.failed += 1;
                }
            }
        }

        if let Some(queue) = &self.queue {
            match queue.purge_expired(now) {
                Ok(purged) => report.purged_queues = purged,
                Err(e) => tracing::error!(error = %e, "Failed to purge expired notification queues"),
            }
        }

        Ok(Some(report))
    }

    /// Periodic loop until shutdown
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Expiration sweeper started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Expiration sweeper received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    match self.sweep_once() {
                        Ok(Some(report)) if report.scanned > 0 || report.purged_queues > 0 => {
                            tracing::info!(
                                scanned = report.scanned,
                                cancelled = report.cancelled,
                                skipped = report.skipped,
                                failed = report.failed,
                                purged_queues = report.purged_queues,
                                "Sweep pass finished"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::error!(error = %e, "Sweep pass failed, retrying on next tick");
                        }
                    }
                }
            }
        }
    }
}
