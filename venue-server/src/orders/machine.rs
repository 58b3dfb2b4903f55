//! 订单状态机
//!
//! Pure transition functions: `(Order, Transition, now) -> Result<Order>`.
//! Nothing here touches storage; the manager persists the returned order and
//! applies side effects in the same write transaction.
//!
//! ```text
//! PENDING ──pay──▶ PAID ──confirm──▶ CONFIRMED ──start──▶ IN_PROGRESS ──complete──▶ COMPLETED
//!    │               │                   │
//!    └──cancel──┬────┴───────cancel──────┘
//!               ▼
//!           CANCELLED ──settle_refund──▶ REFUNDED
//! ```
//!
//! Cancelling a paid order records a refund. Balance refunds settle inside
//! the cancel step, so the order lands directly on REFUNDED; other methods
//! stay CANCELLED with a pending refund until the provider confirms.

use rust_decimal::Decimal;
use shared::ErrorCode;
use shared::order::{
    CancelSource, Order, OrderStatus, PaymentInfo, PaymentInput, RefundInfo, RefundStatus,
};

use super::error::{OrderError, OrderResult};
use crate::pricing::money::validate_amount;

/// Rules the pure transitions need from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleRules {
    /// User cancellations are refused this close to `start_time` (0 disables)
    pub cancel_min_notice_millis: i64,
}

impl Default for LifecycleRules {
    fn default() -> Self {
        Self {
            cancel_min_notice_millis: 120 * shared::util::MINUTE_MILLIS,
        }
    }
}

/// Requested status change
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Pay(PaymentInput),
    Confirm,
    Start,
    Complete {
        points: u64,
    },
    Cancel {
        reason: Option<String>,
        source: CancelSource,
        /// Partial refund; defaults to the full actual amount
        refund_amount: Option<Decimal>,
    },
    SettleRefund {
        transaction_id: Option<String>,
    },
}

impl Transition {
    /// Status named by the transition table
    pub fn target(&self) -> OrderStatus {
        match self {
            Transition::Pay(_) => OrderStatus::Paid,
            Transition::Confirm => OrderStatus::Confirmed,
            Transition::Start => OrderStatus::InProgress,
            Transition::Complete { .. } => OrderStatus::Completed,
            Transition::Cancel { .. } => OrderStatus::Cancelled,
            Transition::SettleRefund { .. } => OrderStatus::Refunded,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Transition::Pay(_) => "pay",
            Transition::Confirm => "confirm",
            Transition::Start => "start",
            Transition::Complete { .. } => "complete",
            Transition::Cancel { .. } => "cancel",
            Transition::SettleRefund { .. } => "settle_refund",
        }
    }
}

fn invalid(order: &Order, to: OrderStatus) -> OrderError {
    OrderError::InvalidTransition {
        from: order.status,
        to,
    }
}

/// Apply a transition, returning the next version of the order
pub fn apply(
    order: &Order,
    transition: &Transition,
    now: i64,
    rules: &LifecycleRules,
) -> OrderResult<Order> {
    let target = transition.target();

    // 支付窗口已过: 无论 sweeper 是否已经取消，都报过期
    if let Transition::Pay(_) = transition
        && order.payment_info.is_none()
        && now > order.expired_at
        && matches!(order.status, OrderStatus::Pending | OrderStatus::Cancelled)
    {
        return Err(OrderError::OrderExpired(order.order_number.clone()));
    }

    if let Transition::SettleRefund { .. } = transition {
        return settle_refund(order, transition, now);
    }

    if !order.status.can_transition_to(target) {
        return Err(invalid(order, target));
    }

    let mut next = order.clone();
    match transition {
        Transition::Pay(payment) => {
            if payment.amount != order.actual_amount {
                return Err(OrderError::validation(
                    ErrorCode::PaymentAmountMismatch,
                    format!(
                        "payment amount {} does not match order amount {}",
                        payment.amount, order.actual_amount
                    ),
                ));
            }
            next.paid_at = Some(now);
            next.payment_info = Some(PaymentInfo {
                method: payment.method,
                transaction_id: payment.transaction_id.clone(),
                paid_at: now,
                amount: payment.amount,
            });
        }
        Transition::Confirm => next.confirmed_at = Some(now),
        Transition::Start => next.started_at = Some(now),
        Transition::Complete { points } => {
            next.completed_at = Some(now);
            next.points_awarded = *points;
        }
        Transition::Cancel {
            reason,
            source,
            refund_amount,
        } => {
            check_cancel_allowed(order, *source, now, rules)?;
            next.cancelled_at = Some(now);
            next.cancel_reason = reason.clone();
            next.cancelled_by = Some(*source);

            if let Some(payment) = &order.payment_info {
                let amount = match refund_amount {
                    Some(amount) => {
                        validate_amount(*amount, order.actual_amount, ErrorCode::RefundExceedsAmount)?;
                        *amount
                    }
                    None => order.actual_amount,
                };
                // 零元订单: 无需退款，直接取消
                if amount.is_zero() {
                    next.status = target;
                    next.updated_at = now;
                    next.version += 1;
                    return Ok(next);
                }
                let synchronous = payment.method.refunds_synchronously();
                next.refund = Some(RefundInfo {
                    amount,
                    method: payment.method,
                    status: if synchronous {
                        RefundStatus::Completed
                    } else {
                        RefundStatus::Pending
                    },
                    requested_at: now,
                    completed_at: synchronous.then_some(now),
                    transaction_id: None,
                });
                if synchronous {
                    next.status = OrderStatus::Refunded;
                    next.updated_at = now;
                    next.version += 1;
                    return Ok(next);
                }
            } else if refund_amount.is_some() {
                return Err(OrderError::validation(
                    ErrorCode::RefundExceedsAmount,
                    "nothing to refund on an unpaid order",
                ));
            }
        }
        Transition::SettleRefund { .. } => return settle_refund(order, transition, now),
    }

    next.status = target;
    next.updated_at = now;
    next.version += 1;
    Ok(next)
}

fn check_cancel_allowed(
    order: &Order,
    source: CancelSource,
    now: i64,
    rules: &LifecycleRules,
) -> OrderResult<()> {
    match source {
        // 超时取消只针对仍在等待支付且已过期的订单
        CancelSource::System => {
            if order.status != OrderStatus::Pending || !order.is_expired(now) {
                return Err(invalid(order, OrderStatus::Cancelled));
            }
        }
        CancelSource::User => {
            if rules.cancel_min_notice_millis > 0
                && let Some(start) = order.start_time
                && start - now < rules.cancel_min_notice_millis
            {
                return Err(OrderError::validation(
                    ErrorCode::CancelWindowClosed,
                    "CANCEL_WINDOW_CLOSED",
                ));
            }
        }
        CancelSource::Merchant => {}
    }
    Ok(())
}

fn settle_refund(order: &Order, transition: &Transition, now: i64) -> OrderResult<Order> {
    let Transition::SettleRefund { transaction_id } = transition else {
        return Err(invalid(order, OrderStatus::Refunded));
    };
    let pending = order.status == OrderStatus::Cancelled
        && order
            .refund
            .as_ref()
            .is_some_and(|r| r.status == RefundStatus::Pending);
    if !pending {
        return Err(invalid(order, OrderStatus::Refunded));
    }

    let mut next = order.clone();
    if let Some(refund) = next.refund.as_mut() {
        refund.status = RefundStatus::Completed;
        refund.completed_at = Some(now);
        refund.transaction_id = transaction_id.clone();
    }
    next.status = OrderStatus::Refunded;
    next.updated_at = now;
    next.version += 1;
    Ok(next)
}
