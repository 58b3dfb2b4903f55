use super::*;

// ========================================================================
// 创建订单
// ========================================================================

#[test]
fn test_create_room_booking() {
    let env = setup();
    let order = env
        .manager
        .create_order(room_request(USER, ROOM, at(10), at(12)))
        .unwrap();

    assert!(order.order_number.starts_with("KO"));
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.order_type, OrderType::RoomBooking);
    assert_eq!(order.subtotal, Decimal::ZERO);
    assert_eq!(order.deposit, Decimal::from(100));
    assert_eq!(order.actual_amount, Decimal::from(100));
    assert_eq!(order.expired_at, T0 + 15 * MINUTE_MILLIS);
    assert_eq!(order.version, 0);

    let stored = env.manager.get_order(&order.order_number).unwrap();
    assert_eq!(stored, order);
    assert_eq!(
        env.manager.storage().get_counter(ORDERS_CREATED_COUNTER).unwrap(),
        1
    );
    assert_eq!(env.notifier.names(), vec!["order_status_changed"]);
    match &env.notifier.events()[0] {
        DomainEvent::OrderStatusChanged { previous, .. } => assert_eq!(*previous, None),
        other => panic!("unexpected event {other:?}"),
    }

    let availability = env
        .manager
        .availability_checker()
        .check(ROOM, at(11), at(13), None)
        .unwrap();
    assert!(!availability.available);
}

#[test]
fn test_combo_pricing_vip2() {
    let env = setup();
    let order = env.manager.create_order(combo_request(VIP_USER)).unwrap();

    assert_eq!(order.order_type, OrderType::Combo);
    assert_eq!(order.subtotal, Decimal::from(1000));
    assert_eq!(order.deposit, Decimal::from(100));
    assert_eq!(order.discount, Decimal::from(40));
    assert_eq!(order.total_amount, Decimal::from(1100));
    assert_eq!(order.actual_amount, Decimal::from(1060));

    let totals: Vec<_> = order.items.iter().map(|i| i.line_total).collect();
    assert_eq!(totals, vec![Decimal::from(776), Decimal::from(224)]);
    assert_eq!(order.items[0].name, "Fruit platter");
}

#[test]
fn test_food_order_does_not_hold_rooms() {
    let env = setup();
    let order = env
        .manager
        .create_order(food_request(USER, vec![item(BEER_BUCKET, 3)]))
        .unwrap();

    assert_eq!(order.order_type, OrderType::FoodOrder);
    assert_eq!(order.actual_amount, Decimal::from(168));
    assert_eq!(order.deposit, Decimal::ZERO);
    assert!(env.manager.storage().room_holders(ROOM).unwrap().is_empty());
}

// ========================================================================
// 时段冲突
// ========================================================================

#[test]
fn test_overlap_rejected_after_confirmed() {
    let env = setup();
    let a = create_paid(&env, room_request(USER, ROOM, at(10), at(12)), PaymentMethod::Wechat);
    env.manager.confirm_order(&a.order_number).unwrap();

    let err = env
        .manager
        .create_order(room_request(VIP_USER, ROOM, at(11), at(13)))
        .unwrap_err();
    assert!(matches!(&err, OrderError::Conflict(reason) if reason == "ROOM_NOT_AVAILABLE"));
    assert_eq!(err.code(), ErrorCode::RoomNotAvailable);

    // 相邻时段与其他包厢不受影响
    env.manager
        .create_order(room_request(VIP_USER, ROOM, at(12), at(14)))
        .unwrap();
    env.manager
        .create_order(room_request(VIP_USER, ROOM_B, at(11), at(13)))
        .unwrap();
}

#[test]
fn test_pending_order_holds_slot_until_expiry() {
    let env = setup();
    env.manager
        .create_order(room_request(USER, ROOM, at(10), at(12)))
        .unwrap();

    let err = env
        .manager
        .create_order(room_request(VIP_USER, ROOM, at(10), at(12)))
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::RoomNotAvailable);

    // 支付窗口过后即释放，无需等待清扫
    env.clock.set(T0 + 16 * MINUTE_MILLIS);
    env.manager
        .create_order(room_request(VIP_USER, ROOM, at(10), at(12)))
        .unwrap();
}

#[test]
fn test_cancelled_order_releases_slot() {
    let env = setup();
    let order = env
        .manager
        .create_order(room_request(USER, ROOM, at(10), at(12)))
        .unwrap();
    env.manager
        .cancel_order(&order.order_number, Some("changed plans".to_string()), CancelSource::User)
        .unwrap();

    assert!(env.manager.storage().room_holders(ROOM).unwrap().is_empty());
    env.manager
        .create_order(room_request(VIP_USER, ROOM, at(10), at(12)))
        .unwrap();
}

// ========================================================================
// 查询
// ========================================================================

#[test]
fn test_list_orders_newest_first_with_filter() {
    let env = setup();
    let first = env
        .manager
        .create_order(food_request(USER, vec![item(BEER_BUCKET, 1)]))
        .unwrap();
    env.clock.advance(1_000);
    let second = env
        .manager
        .create_order(food_request(USER, vec![item(FRUIT_PLATTER, 1)]))
        .unwrap();
    env.manager
        .pay_order(&second.order_number, payment(&second, PaymentMethod::Cash))
        .unwrap();
    env.manager
        .create_order(food_request(VIP_USER, vec![item(BEER_BUCKET, 1)]))
        .unwrap();

    let numbers: Vec<_> = env
        .manager
        .list_user_orders(USER, None)
        .unwrap()
        .into_iter()
        .map(|o| o.order_number)
        .collect();
    assert_eq!(numbers, vec![second.order_number.clone(), first.order_number.clone()]);

    let pending = env
        .manager
        .list_user_orders(USER, Some(OrderStatus::Pending))
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].order_number, first.order_number);

    assert_eq!(env.manager.list_store_orders(STORE, None).unwrap().len(), 3);
    assert!(env.manager.list_store_orders(OTHER_STORE, None).unwrap().is_empty());
}

#[test]
fn test_get_unknown_order() {
    let env = setup();
    let err = env.manager.get_order("KO404").unwrap_err();
    assert_eq!(err.code(), ErrorCode::OrderNotFound);
    assert_eq!(
        env.manager.confirm_order("KO404").unwrap_err().code(),
        ErrorCode::OrderNotFound
    );
}
