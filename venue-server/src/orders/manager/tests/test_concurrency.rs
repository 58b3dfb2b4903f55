use super::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::util::intervals_overlap;

/// Holding orders on a room must never overlap
fn assert_no_overlap(env: &TestEnv, room_id: i64) -> usize {
    let now = env.clock.now_millis();
    let holding: Vec<Order> = env
        .manager
        .list_store_orders(STORE, None)
        .unwrap()
        .into_iter()
        .filter(|o| o.room_id == Some(room_id) && o.blocks_room(now))
        .collect();

    for (i, a) in holding.iter().enumerate() {
        for b in &holding[i + 1..] {
            let (s1, e1) = a.slot().unwrap();
            let (s2, e2) = b.slot().unwrap();
            assert!(
                !intervals_overlap(s1, e1, s2, e2),
                "{} [{s1}, {e1}) overlaps {} [{s2}, {e2})",
                a.order_number,
                b.order_number
            );
        }
    }
    holding.len()
}

#[test]
fn test_concurrent_create_single_winner() {
    let env = setup();
    let results: Vec<OrderResult<Order>> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..50)
            .map(|i| {
                let manager = env.manager.clone();
                s.spawn(move || {
                    // 每个请求错开几分钟，但都互相重叠
                    let start = at(10) + i * MINUTE_MILLIS;
                    manager.create_order(room_request(USER, ROOM, start, start + 2 * HOUR_MILLIS))
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    for result in &results {
        if let Err(e) = result {
            assert_eq!(e.code(), ErrorCode::RoomNotAvailable, "{e}");
        }
    }
    assert_eq!(env.manager.storage().room_holders(ROOM).unwrap().len(), 1);
    assert_eq!(
        env.manager.storage().get_counter(ORDERS_CREATED_COUNTER).unwrap(),
        1
    );
}

#[test]
fn test_randomized_bookings_never_overlap() {
    let env = setup();
    std::thread::scope(|s| {
        for worker in 0..8u64 {
            let manager = env.manager.clone();
            s.spawn(move || {
                let mut rng = StdRng::seed_from_u64(42 + worker);
                for _ in 0..25 {
                    let room_id = if rng.gen_bool(0.5) { ROOM } else { ROOM_B };
                    let start = at(rng.gen_range(0..20)) + rng.gen_range(0..4) * 15 * MINUTE_MILLIS;
                    let end = start + rng.gen_range(1..=4) * 30 * MINUTE_MILLIS;
                    let Ok(order) = manager.create_order(room_request(USER, room_id, start, end)) else {
                        continue;
                    };
                    match rng.gen_range(0..3) {
                        0 => {
                            let _ = manager.cancel_order(&order.order_number, None, CancelSource::Merchant);
                        }
                        1 => {
                            let _ = manager.pay_order(&order.order_number, payment(&order, PaymentMethod::Cash));
                        }
                        _ => {}
                    }
                }
            });
        }
    });

    let held = assert_no_overlap(&env, ROOM) + assert_no_overlap(&env, ROOM_B);
    assert!(held > 0);
}

#[test]
fn test_concurrent_confirm_single_success() {
    let env = setup();
    let order = create_paid(&env, room_request(USER, ROOM, at(10), at(12)), PaymentMethod::Wechat);

    let results: Vec<OrderResult<Order>> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = env.manager.clone();
                let number = order.order_number.clone();
                s.spawn(move || manager.confirm_order(&number))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for result in &results {
        if let Err(e) = result {
            assert!(e.is_invalid_transition(), "{e}");
        }
    }
    let stored = env.manager.get_order(&order.order_number).unwrap();
    assert_eq!(stored.status, OrderStatus::Confirmed);
    assert_eq!(stored.version, 2);
}

#[test]
fn test_concurrent_complete_applies_effects_once() {
    let env = setup();
    let order = create_in_progress(&env, combo_request(VIP_USER));

    let successes = std::thread::scope(|s| {
        let handles: Vec<_> = (0..6)
            .map(|_| {
                let manager = env.manager.clone();
                let number = order.order_number.clone();
                s.spawn(move || manager.complete_order(&number).is_ok())
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count()
    });

    assert_eq!(successes, 1);
    let store = env.store(STORE);
    assert_eq!(store.completed_orders, 1);
    assert_eq!(store.completed_revenue, Decimal::from(1060));
    assert_eq!(env.member(VIP_USER).points, 106);
    assert_eq!(env.room(ROOM).booking_count, 1);
}

#[test]
fn test_pay_races_sweeper() {
    let env = setup();
    let order = env
        .manager
        .create_order(room_request(USER, ROOM, at(10), at(12)))
        .unwrap();
    env.clock.set(order.expired_at + 1);

    let (pay, sweep) = std::thread::scope(|s| {
        let manager = env.manager.clone();
        let input = payment(&order, PaymentMethod::Wechat);
        let number = order.order_number.clone();
        let pay = s.spawn(move || manager.pay_order(&number, input));
        let sweep = s.spawn(|| env.sweeper().sweep_once());
        (pay.join().unwrap(), sweep.join().unwrap())
    });

    // 窗口已过: 支付总是失败，订单最终被取消
    assert!(matches!(pay, Err(OrderError::OrderExpired(_))));
    assert_eq!(sweep.unwrap().unwrap().cancelled, 1);
    assert_status(&env, &order.order_number, OrderStatus::Cancelled);
}
