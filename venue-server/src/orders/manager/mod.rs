//! OrdersManager - order creation, transitions and side effects
//!
//! # Create Flow
//!
//! ```text
//! create_order(req)
//!     ├─ 1. Validate request shape (room/interval/items)
//!     ├─ 2. Begin write transaction (serialized writer)
//!     ├─ 3. Load member / store / dishes / room
//!     ├─ 4. PricingEngine
//!     ├─ 5. Availability check against room holds (same transaction)
//!     ├─ 6. Persist order + indexes + room hold
//!     ├─ 7. Commit
//!     └─ 8. Notify
//! ```
//!
//! # Transition Flow
//!
//! ```text
//! transition(order_number)
//!     ├─ 1. Read snapshot
//!     ├─ 2. machine::apply (pure)
//!     ├─ 3. Begin write transaction, re-check version
//!     │      └─ stale → retry once against fresh state
//!     ├─ 4. Side effects (ledger-guarded) + persist
//!     ├─ 5. Commit
//!     └─ 6. Notify / wake refund worker
//! ```

use redb::WriteTransaction;
use rust_decimal::Decimal;
use shared::ErrorCode;
use shared::models::{Member, Room, Store};
use shared::order::{
    CancelSource, CreateOrderRequest, Order, OrderItem, OrderStatus, OrderType, PaymentInput,
    PaymentMethod, RefundInfo, RefundStatus,
};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::error::{Entity, OrderError, OrderResult};
use super::machine::{self, LifecycleRules, Transition};
use super::storage::{ORDERS_CREATED_COUNTER, ORDERS_EXPIRED_COUNTER, OrderStorage, PendingRefund, StorageError};
use crate::booking::{self, BookingAvailabilityChecker};
use crate::core::Config;
use crate::message::{DomainEvent, Notifier};
use crate::pricing::{PriceLine, PricingEngine, loyalty_points};
use crate::utils::Clock;

/// Attempts to draw an unused order number before giving up
const ORDER_NUMBER_ATTEMPTS: usize = 5;

/// Reason recorded by the expiration sweeper
pub const EXPIRY_CANCEL_REASON: &str = "payment timeout";

/// Order policy knobs
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerRules {
    /// Payment window for new orders
    pub order_expiry_millis: i64,
    /// Points per unit of actual amount on completion
    pub points_rate: Decimal,
    /// Points multiplier for VIP members
    pub vip_points_multiplier: u64,
    pub lifecycle: LifecycleRules,
}

impl Default for ManagerRules {
    fn default() -> Self {
        Self {
            order_expiry_millis: 15 * shared::util::MINUTE_MILLIS,
            points_rate: Decimal::new(5, 2),
            vip_points_multiplier: 2,
            lifecycle: LifecycleRules::default(),
        }
    }
}

impl ManagerRules {
    pub fn from_config(config: &Config) -> Self {
        Self {
            order_expiry_millis: config.order_expiry_minutes * shared::util::MINUTE_MILLIS,
            points_rate: config.points_rate,
            vip_points_multiplier: config.vip_points_multiplier,
            lifecycle: LifecycleRules {
                cancel_min_notice_millis: config.cancel_min_notice_minutes
                    * shared::util::MINUTE_MILLIS,
            },
        }
    }
}

enum Commit {
    Done,
    Stale,
}

/// OrdersManager
pub struct OrdersManager {
    storage: OrderStorage,
    pricing: PricingEngine,
    rules: ManagerRules,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    /// Wakes the refund worker when a refund is queued
    refund_tx: Option<mpsc::Sender<String>>,
}

impl std::fmt::Debug for OrdersManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrdersManager")
            .field("storage", &"<OrderStorage>")
            .field("rules", &self.rules)
            .field("refund_queue", &self.refund_tx.is_some())
            .finish()
    }
}

impl OrdersManager {
    pub fn new(
        storage: OrderStorage,
        pricing: PricingEngine,
        rules: ManagerRules,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            storage,
            pricing,
            rules,
            notifier,
            clock,
            refund_tx: None,
        }
    }

    /// Attach the refund worker wake-up channel
    pub fn with_refund_queue(mut self, tx: mpsc::Sender<String>) -> Self {
        self.refund_tx = Some(tx);
        self
    }

    pub fn storage(&self) -> &OrderStorage {
        &self.storage
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn rules(&self) -> &ManagerRules {
        &self.rules
    }

    pub fn availability_checker(&self) -> BookingAvailabilityChecker {
        BookingAvailabilityChecker::new(self.storage.clone(), self.clock.clone())
    }

    // ========== Create ==========

    /// Create a PENDING order
    pub fn create_order(&self, req: CreateOrderRequest) -> OrderResult<Order> {
        let order_type = validate_request(&req)?;
        let now = self.clock.now_millis();
        tracing::debug!(user_id = req.user_id, store_id = req.store_id, room_id = ?req.room_id, "Processing create_order");

        let txn = self.storage.begin_write()?;

        let member = self.member_txn(&txn, req.user_id)?;
        let store = self.store_txn(&txn, req.store_id)?;
        if !store.is_active {
            return Err(OrderError::invalid(format!("store {} is not accepting orders", store.id)));
        }

        let mut lines = Vec::with_capacity(req.items.len());
        let mut dishes = Vec::with_capacity(req.items.len());
        for input in &req.items {
            let dish = self
                .storage
                .get_dish_txn(&txn, input.dish_id)?
                .ok_or_else(|| OrderError::not_found(Entity::Dish, input.dish_id))?;
            if dish.store_id != store.id {
                return Err(OrderError::invalid(format!(
                    "dish {} does not belong to store {}",
                    dish.id, store.id
                )));
            }
            if !dish.is_available {
                return Err(OrderError::validation(
                    ErrorCode::DishUnavailable,
                    format!("dish {} is not available", dish.id),
                ));
            }
            lines.push(PriceLine {
                unit_price: dish.price,
                quantity: input.quantity,
            });
            dishes.push(dish);
        }

        let room = match req.room_id {
            Some(room_id) => {
                let room = self.room_txn(&txn, room_id)?;
                if room.store_id != store.id {
                    return Err(OrderError::invalid(format!(
                        "room {} does not belong to store {}",
                        room.id, store.id
                    )));
                }
                Some(room)
            }
            None => None,
        };

        let price = self
            .pricing
            .compute(&lines, room.as_ref().map(|r| r.deposit), member.vip_level)?;

        if let (Some(room), Some(start), Some(end)) = (&room, req.start_time, req.end_time) {
            let availability =
                booking::check_in_txn(&self.storage, &txn, room, start, end, req.guest_count, now)?;
            if let Some(err) = availability.clone().into_error() {
                tracing::info!(room_id = room.id, start, end, reason = ?availability.reason, "Booking rejected");
                return Err(err);
            }
        }

        let order_number = self.allocate_order_number(&txn, now)?;
        let items = dishes
            .into_iter()
            .zip(req.items.iter())
            .zip(price.line_totals.iter())
            .map(|((dish, input), line_total)| OrderItem {
                dish_id: dish.id,
                name: dish.name,
                unit_price: dish.price,
                quantity: input.quantity,
                line_total: *line_total,
            })
            .collect();

        let order = Order {
            order_number,
            user_id: req.user_id,
            store_id: req.store_id,
            room_id: req.room_id,
            order_type,
            start_time: req.start_time,
            end_time: req.end_time,
            guest_count: req.guest_count,
            items,
            subtotal: price.subtotal,
            deposit: price.deposit,
            discount: price.discount,
            total_amount: price.total_amount,
            actual_amount: price.actual_amount,
            status: OrderStatus::Pending,
            contact_phone: req.contact_phone,
            expired_at: now + self.rules.order_expiry_millis,
            created_at: now,
            updated_at: now,
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
            version: 0,
        };

        self.storage.put_order(&txn, &order)?;
        self.storage.index_order(&txn, &order)?;
        self.storage.track_pending(&txn, &order)?;
        if let Some(room_id) = order.room_id {
            self.storage.hold_room(&txn, room_id, &order.order_number)?;
        }
        self.storage.increment_counter(&txn, ORDERS_CREATED_COUNTER, 1)?;
        txn.commit().map_err(StorageError::from)?;

        tracing::info!(
            order_number = %order.order_number,
            order_type = ?order.order_type,
            actual_amount = %order.actual_amount,
            "Order created"
        );
        self.notifier.notify(DomainEvent::OrderStatusChanged {
            order: order.clone(),
            previous: None,
        });
        Ok(order)
    }

    fn allocate_order_number(&self, txn: &WriteTransaction, now: i64) -> OrderResult<String> {
        for _ in 0..ORDER_NUMBER_ATTEMPTS {
            let candidate = shared::util::order_number(now);
            if !self.storage.order_exists_txn(txn, &candidate)? {
                return Ok(candidate);
            }
            tracing::warn!(order_number = %candidate, "Order number collision, redrawing");
        }
        Err(OrderError::Conflict("ORDER_NUMBER_EXHAUSTED".to_string()))
    }

    // ========== Transitions ==========

    /// PENDING → PAID
    pub fn pay_order(&self, order_number: &str, payment: PaymentInput) -> OrderResult<Order> {
        self.transition(order_number, |_| Ok(Transition::Pay(payment.clone())))
    }

    /// PAID → CONFIRMED
    pub fn confirm_order(&self, order_number: &str) -> OrderResult<Order> {
        self.transition(order_number, |_| Ok(Transition::Confirm))
    }

    /// CONFIRMED → IN_PROGRESS
    pub fn start_order(&self, order_number: &str) -> OrderResult<Order> {
        self.transition(order_number, |_| Ok(Transition::Start))
    }

    /// IN_PROGRESS → COMPLETED, awarding loyalty points
    pub fn complete_order(&self, order_number: &str) -> OrderResult<Order> {
        self.transition(order_number, |order| {
            let member = self
                .storage
                .get_member(order.user_id)?
                .ok_or_else(|| OrderError::not_found(Entity::Member, order.user_id))?;
            let multiplier = member.is_vip().then_some(self.rules.vip_points_multiplier);
            Ok(Transition::Complete {
                points: loyalty_points(order.actual_amount, self.rules.points_rate, multiplier),
            })
        })
    }

    /// → CANCELLED (or REFUNDED for balance payments)
    pub fn cancel_order(
        &self,
        order_number: &str,
        reason: Option<String>,
        source: CancelSource,
    ) -> OrderResult<Order> {
        self.transition(order_number, |_| {
            Ok(Transition::Cancel {
                reason: reason.clone(),
                source,
                refund_amount: None,
            })
        })
    }

    /// Merchant cancellation of a paid order with an explicit refund amount
    pub fn refund_order(&self, order_number: &str, amount: Option<Decimal>) -> OrderResult<Order> {
        self.transition(order_number, |order| {
            if !matches!(order.status, OrderStatus::Paid | OrderStatus::Confirmed) {
                return Err(OrderError::InvalidTransition {
                    from: order.status,
                    to: OrderStatus::Refunded,
                });
            }
            Ok(Transition::Cancel {
                reason: Some("merchant refund".to_string()),
                source: CancelSource::Merchant,
                refund_amount: amount,
            })
        })
    }

    /// Provider confirmed a pending refund
    pub fn settle_refund(&self, order_number: &str, transaction_id: Option<String>) -> OrderResult<Order> {
        self.transition(order_number, |_| {
            Ok(Transition::SettleRefund {
                transaction_id: transaction_id.clone(),
            })
        })
    }

    /// Sweeper path: cancel a pending order whose payment window has passed
    pub fn expire_order(&self, order_number: &str) -> OrderResult<Order> {
        self.cancel_order(
            order_number,
            Some(EXPIRY_CANCEL_REASON.to_string()),
            CancelSource::System,
        )
    }

    fn transition<F>(&self, order_number: &str, build: F) -> OrderResult<Order>
    where
        F: Fn(&Order) -> OrderResult<Transition>,
    {
        let mut retried = false;
        loop {
            let current = self.get_order(order_number)?;
            let now = self.clock.now_millis();
            let transition = build(&current)?;
            let next = machine::apply(&current, &transition, now, &self.rules.lifecycle)?;

            match self.persist_transition(&current, &next, now)? {
                Commit::Done => {
                    tracing::info!(
                        order_number = %order_number,
                        transition = transition.name(),
                        from = %current.status,
                        to = %next.status,
                        "Order transitioned"
                    );
                    self.after_commit(&current, &next, &transition);
                    return Ok(next);
                }
                Commit::Stale if !retried => {
                    tracing::debug!(order_number = %order_number, transition = transition.name(), "Stale order version, retrying");
                    retried = true;
                }
                Commit::Stale => {
                    let fresh = self.get_order(order_number)?;
                    tracing::warn!(order_number = %order_number, transition = transition.name(), status = %fresh.status, "Lost transition race twice");
                    return Err(OrderError::InvalidTransition {
                        from: fresh.status,
                        to: transition.target(),
                    });
                }
            }
        }
    }

    /// Re-check the version and commit the transition with its side effects
    fn persist_transition(&self, before: &Order, after: &Order, now: i64) -> OrderResult<Commit> {
        let txn = self.storage.begin_write()?;
        let stored = self
            .storage
            .get_order_txn(&txn, &before.order_number)?
            .ok_or_else(|| OrderError::not_found(Entity::Order, &before.order_number))?;
        if stored.version != before.version {
            return Ok(Commit::Stale);
        }

        self.apply_side_effects(&txn, before, after, now)?;
        self.storage.put_order(&txn, after)?;
        txn.commit().map_err(StorageError::from)?;
        Ok(Commit::Done)
    }

    fn apply_side_effects(
        &self,
        txn: &WriteTransaction,
        before: &Order,
        after: &Order,
        now: i64,
    ) -> OrderResult<()> {
        if before.status == OrderStatus::Pending && after.status != OrderStatus::Pending {
            self.storage.untrack_pending(txn, before)?;
        }

        match (before.status, after.status) {
            (OrderStatus::Pending, OrderStatus::Paid) => {
                if self.claim_effect(txn, after, "paid", now)? {
                    self.record_payment(txn, after)?;
                }
            }
            (OrderStatus::InProgress, OrderStatus::Completed) => {
                self.release_room(txn, after)?;
                if self.claim_effect(txn, after, "completed", now)? {
                    self.record_completion(txn, after)?;
                }
            }
            (_, OrderStatus::Cancelled) | (OrderStatus::Paid | OrderStatus::Confirmed, OrderStatus::Refunded) => {
                self.release_room(txn, after)?;
                if after.cancelled_by == Some(CancelSource::System) {
                    self.storage.increment_counter(txn, ORDERS_EXPIRED_COUNTER, 1)?;
                }
                if let Some(refund) = &after.refund {
                    match refund.status {
                        RefundStatus::Completed => {
                            if self.claim_effect(txn, after, "refunded", now)? {
                                self.reverse_payment(txn, after, refund)?;
                            }
                        }
                        RefundStatus::Pending => {
                            self.storage.queue_refund(
                                txn,
                                &PendingRefund {
                                    order_number: after.order_number.clone(),
                                    amount: refund.amount,
                                    method: refund.method,
                                    created_at: now,
                                    retry_count: 0,
                                    last_error: None,
                                    last_attempt_at: None,
                                },
                            )?;
                        }
                    }
                }
            }
            (OrderStatus::Cancelled, OrderStatus::Refunded) => {
                self.storage.remove_pending_refund_txn(txn, &after.order_number)?;
                if let Some(refund) = &after.refund
                    && self.claim_effect(txn, after, "refunded", now)?
                {
                    self.reverse_payment(txn, after, refund)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Record the effect in the ledger; false when it was already applied
    fn claim_effect(&self, txn: &WriteTransaction, order: &Order, effect: &str, now: i64) -> OrderResult<bool> {
        let key = format!("{}:{}", order.order_number, effect);
        if self.storage.is_effect_applied_txn(txn, &key)? {
            tracing::warn!(order_number = %order.order_number, effect, "Side effect already applied, skipping");
            return Ok(false);
        }
        self.storage.mark_effect_applied(txn, &key, now)?;
        Ok(true)
    }

    fn release_room(&self, txn: &WriteTransaction, order: &Order) -> OrderResult<()> {
        if let Some(room_id) = order.room_id {
            self.storage.release_room(txn, room_id, &order.order_number)?;
        }
        Ok(())
    }

    fn record_payment(&self, txn: &WriteTransaction, order: &Order) -> OrderResult<()> {
        let mut member = self.member_txn(txn, order.user_id)?;
        if let Some(payment) = &order.payment_info
            && payment.method == PaymentMethod::Balance
        {
            if member.balance < payment.amount {
                return Err(OrderError::validation(
                    ErrorCode::InsufficientBalance,
                    format!("balance {} is below {}", member.balance, payment.amount),
                ));
            }
            member.balance -= payment.amount;
        }
        member.total_spent += order.actual_amount;
        self.storage.put_member(txn, &member)?;

        let mut store = self.store_txn(txn, order.store_id)?;
        store.revenue += order.actual_amount;
        self.storage.put_store(txn, &store)?;
        Ok(())
    }

    fn record_completion(&self, txn: &WriteTransaction, order: &Order) -> OrderResult<()> {
        let mut store = self.store_txn(txn, order.store_id)?;
        store.completed_revenue += order.actual_amount;
        store.completed_orders += 1;
        self.storage.put_store(txn, &store)?;

        if let Some(room_id) = order.room_id {
            let mut room = self.room_txn(txn, room_id)?;
            room.revenue += order.actual_amount;
            room.booking_count += 1;
            self.storage.put_room(txn, &room)?;
        }

        if order.points_awarded > 0 {
            let mut member = self.member_txn(txn, order.user_id)?;
            member.points = member.points.saturating_add(order.points_awarded);
            self.storage.put_member(txn, &member)?;
        }
        Ok(())
    }

    fn reverse_payment(&self, txn: &WriteTransaction, order: &Order, refund: &RefundInfo) -> OrderResult<()> {
        let mut member = self.member_txn(txn, order.user_id)?;
        if refund.method == PaymentMethod::Balance {
            member.balance += refund.amount;
        }
        member.total_spent = (member.total_spent - refund.amount).max(Decimal::ZERO);
        self.storage.put_member(txn, &member)?;

        let mut store = self.store_txn(txn, order.store_id)?;
        store.revenue -= refund.amount;
        self.storage.put_store(txn, &store)?;
        Ok(())
    }

    fn after_commit(&self, before: &Order, after: &Order, transition: &Transition) {
        self.notifier.notify(DomainEvent::OrderStatusChanged {
            order: after.clone(),
            previous: Some(before.status),
        });
        if let Transition::Pay(_) = transition {
            self.notifier.notify(DomainEvent::PaymentSucceeded {
                order: after.clone(),
            });
        }

        let refund_queued = after.status == OrderStatus::Cancelled
            && after
                .refund
                .as_ref()
                .is_some_and(|r| r.status == RefundStatus::Pending);
        if refund_queued && let Some(tx) = &self.refund_tx {
            // 队列已持久化，通知失败时由周期扫描兜底
            if let Err(e) = tx.try_send(after.order_number.clone()) {
                tracing::warn!(order_number = %after.order_number, error = %e, "Refund worker wake-up dropped");
            }
        }
    }

    // ========== Catalog helpers ==========

    fn member_txn(&self, txn: &WriteTransaction, id: i64) -> OrderResult<Member> {
        self.storage
            .get_member_txn(txn, id)?
            .ok_or_else(|| OrderError::not_found(Entity::Member, id))
    }

    fn store_txn(&self, txn: &WriteTransaction, id: i64) -> OrderResult<Store> {
        self.storage
            .get_store_txn(txn, id)?
            .ok_or_else(|| OrderError::not_found(Entity::Store, id))
    }

    fn room_txn(&self, txn: &WriteTransaction, id: i64) -> OrderResult<Room> {
        self.storage
            .get_room_txn(txn, id)?
            .ok_or_else(|| OrderError::not_found(Entity::Room, id))
    }

    // ========== Queries ==========

    pub fn get_order(&self, order_number: &str) -> OrderResult<Order> {
        self.storage
            .get_order(order_number)?
            .ok_or_else(|| OrderError::not_found(Entity::Order, order_number))
    }

    /// Orders of a user, newest first, optionally filtered by status
    pub fn list_user_orders(&self, user_id: i64, status: Option<OrderStatus>) -> OrderResult<Vec<Order>> {
        let mut orders = self.storage.list_user_orders(user_id)?;
        if let Some(status) = status {
            orders.retain(|o| o.status == status);
        }
        Ok(orders)
    }

    /// Orders of a store, newest first, optionally filtered by status
    pub fn list_store_orders(&self, store_id: i64, status: Option<OrderStatus>) -> OrderResult<Vec<Order>> {
        let mut orders = self.storage.list_store_orders(store_id)?;
        if let Some(status) = status {
            orders.retain(|o| o.status == status);
        }
        Ok(orders)
    }
}

/// Shape checks that need no storage
fn validate_request(req: &CreateOrderRequest) -> OrderResult<OrderType> {
    if req.contact_phone.trim().is_empty() {
        return Err(OrderError::invalid("contact_phone is required"));
    }
    let order_type = OrderType::classify(req.room_id.is_some(), !req.items.is_empty())
        .ok_or_else(|| OrderError::validation(ErrorCode::OrderEmpty, "order has no room and no items"))?;

    match (req.start_time, req.end_time) {
        (Some(start), Some(end)) => booking::validate_interval(start, end)?,
        (None, None) => {}
        _ => return Err(OrderError::invalid("start_time and end_time must be given together")),
    }
    if req.room_id.is_some() && req.start_time.is_none() {
        return Err(OrderError::invalid("room booking requires start_time and end_time"));
    }
    if req.room_id.is_none() && req.start_time.is_some() {
        return Err(OrderError::invalid("start_time/end_time require a room"));
    }
    if req.guest_count == Some(0) {
        return Err(OrderError::invalid("guest_count must be positive"));
    }
    Ok(order_type)
}

#[cfg(test)]
mod tests;
