use super::*;
use crate::message::testing::RecordingNotifier;
use crate::orders::ExpirationSweeper;
use crate::pricing::MAX_QUANTITY;
use crate::utils::ManualClock;
use shared::models::{Dish, Member, Room, RoomStatus, Store};
use shared::order::OrderItemInput;
use shared::util::{DAY_MILLIS, HOUR_MILLIS, MINUTE_MILLIS};
use std::time::Duration;

/// Test clock origin
const T0: i64 = 100 * DAY_MILLIS;

const STORE: i64 = 1;
const OTHER_STORE: i64 = 2;
const CLOSED_STORE: i64 = 3;

/// capacity 10, price 100, deposit 100
const ROOM: i64 = 10;
const ROOM_B: i64 = 11;
const MAINTENANCE_ROOM: i64 = 12;

const USER: i64 = 100;
const VIP_USER: i64 = 102;
/// balance 5000
const RICH_USER: i64 = 103;
const OVER_LEVEL_USER: i64 = 104;

const FRUIT_PLATTER: i64 = 1;
const BEER_BUCKET: i64 = 2;
const SOLD_OUT: i64 = 3;
const FOREIGN_DISH: i64 = 4;

struct TestEnv {
    manager: Arc<OrdersManager>,
    clock: Arc<ManualClock>,
    notifier: Arc<RecordingNotifier>,
}

impl TestEnv {
    fn member(&self, id: i64) -> Member {
        self.manager.storage().get_member(id).unwrap().unwrap()
    }

    fn store(&self, id: i64) -> Store {
        self.manager.storage().get_store(id).unwrap().unwrap()
    }

    fn room(&self, id: i64) -> Room {
        self.manager.storage().get_room(id).unwrap().unwrap()
    }

    fn sweeper(&self) -> ExpirationSweeper {
        ExpirationSweeper::new(self.manager.clone(), Duration::from_secs(60))
    }
}

fn seed(storage: &OrderStorage) {
    storage.save_store(&Store::new(STORE, "Downtown")).unwrap();
    storage.save_store(&Store::new(OTHER_STORE, "Uptown")).unwrap();
    let mut closed = Store::new(CLOSED_STORE, "Closed");
    closed.is_active = false;
    storage.save_store(&closed).unwrap();

    for (id, status) in [
        (ROOM, RoomStatus::Available),
        (ROOM_B, RoomStatus::Available),
        (MAINTENANCE_ROOM, RoomStatus::Maintenance),
    ] {
        let mut room = Room::new(id, STORE, format!("R{id}"), 10);
        room.price = Decimal::from(100);
        room.deposit = Decimal::from(100);
        room.status = status;
        storage.save_room(&room).unwrap();
    }

    storage.save_member(&Member::new(USER, "Alice", "13800000000")).unwrap();
    let mut vip = Member::new(VIP_USER, "Bob", "13800000002");
    vip.vip_level = 2;
    storage.save_member(&vip).unwrap();
    let mut rich = Member::new(RICH_USER, "Carol", "13800000003");
    rich.balance = Decimal::from(5000);
    storage.save_member(&rich).unwrap();
    let mut over = Member::new(OVER_LEVEL_USER, "Dave", "13800000004");
    over.vip_level = 6;
    storage.save_member(&over).unwrap();

    storage
        .save_dish(&Dish::new(FRUIT_PLATTER, STORE, "Fruit platter", Decimal::from(388)))
        .unwrap();
    storage
        .save_dish(&Dish::new(BEER_BUCKET, STORE, "Beer bucket", Decimal::from(56)))
        .unwrap();
    let mut sold_out = Dish::new(SOLD_OUT, STORE, "Oysters", Decimal::from(30));
    sold_out.is_available = false;
    storage.save_dish(&sold_out).unwrap();
    storage
        .save_dish(&Dish::new(FOREIGN_DISH, OTHER_STORE, "Nachos", Decimal::from(40)))
        .unwrap();
}

fn setup_with(rules: ManagerRules, refund_tx: Option<mpsc::Sender<String>>) -> TestEnv {
    let storage = OrderStorage::open_in_memory().unwrap();
    seed(&storage);
    let clock = Arc::new(ManualClock::new(T0));
    let notifier = Arc::new(RecordingNotifier::default());
    let mut manager = OrdersManager::new(
        storage,
        PricingEngine::default(),
        rules,
        notifier.clone(),
        clock.clone(),
    );
    if let Some(tx) = refund_tx {
        manager = manager.with_refund_queue(tx);
    }
    TestEnv {
        manager: Arc::new(manager),
        clock,
        notifier,
    }
}

fn setup() -> TestEnv {
    setup_with(ManagerRules::default(), None)
}

/// Hour `h` of the day after T0
fn at(h: i64) -> i64 {
    T0 + DAY_MILLIS + h * HOUR_MILLIS
}

fn room_request(user_id: i64, room_id: i64, start: i64, end: i64) -> CreateOrderRequest {
    CreateOrderRequest {
        user_id,
        store_id: STORE,
        room_id: Some(room_id),
        items: vec![],
        start_time: Some(start),
        end_time: Some(end),
        guest_count: Some(4),
        contact_phone: "13800000000".to_string(),
    }
}

fn item(dish_id: i64, quantity: i32) -> OrderItemInput {
    OrderItemInput { dish_id, quantity }
}

fn food_request(user_id: i64, items: Vec<OrderItemInput>) -> CreateOrderRequest {
    CreateOrderRequest {
        user_id,
        store_id: STORE,
        room_id: None,
        items,
        start_time: None,
        end_time: None,
        guest_count: None,
        contact_phone: "13800000000".to_string(),
    }
}

/// 388×2 + 56×4 = 1000, plus ROOM 10:00–12:00 tomorrow
fn combo_request(user_id: i64) -> CreateOrderRequest {
    CreateOrderRequest {
        items: vec![item(FRUIT_PLATTER, 2), item(BEER_BUCKET, 4)],
        ..room_request(user_id, ROOM, at(10), at(12))
    }
}

fn payment(order: &Order, method: PaymentMethod) -> PaymentInput {
    PaymentInput {
        method,
        transaction_id: Some(format!("tx-{}", order.order_number)),
        amount: order.actual_amount,
    }
}

fn create_paid(env: &TestEnv, req: CreateOrderRequest, method: PaymentMethod) -> Order {
    let order = env.manager.create_order(req).unwrap();
    env.manager
        .pay_order(&order.order_number, payment(&order, method))
        .unwrap()
}

fn create_in_progress(env: &TestEnv, req: CreateOrderRequest) -> Order {
    let order = create_paid(env, req, PaymentMethod::Wechat);
    env.manager.confirm_order(&order.order_number).unwrap();
    env.manager.start_order(&order.order_number).unwrap()
}

fn assert_status(env: &TestEnv, order_number: &str, expected: OrderStatus) {
    let order = env.manager.get_order(order_number).unwrap();
    assert_eq!(order.status, expected, "order {order_number}");
}

fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

mod test_concurrency;
mod test_core;
