use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use shared::util::DAY_MILLIS;
use tokio::sync::mpsc;

use crate::core::{BackgroundTasks, Config, TaskKind};
use crate::message::{
    ConnectionRegistry, DomainEvent, EventBus, NotificationFanout, NotificationQueue, Notifier, PushServer,
    run_dispatcher,
};
use crate::orders::{ExpirationSweeper, ManagerRules, OrderStorage, OrdersManager, RefundGateway, RefundWorker};
use crate::pricing::PricingEngine;
use crate::rooms::RoomService;
use crate::utils::{AppError, AppResult, Clock, SystemClock};

/// Buffered wake-ups for the refund worker
const REFUND_QUEUE_CAPACITY: usize = 256;

/// 服务器状态 - 持有所有服务的共享引用
///
/// | 字段 | 说明 |
/// |------|------|
/// | config | 配置项 (不可变) |
/// | storage | 订单 / 目录数据库 (redb) |
/// | orders | 订单管理器 |
/// | rooms | 包厢服务 |
/// | registry | 在线连接注册表 |
/// | notifications | 通知队列 (独立 redb) |
/// | fanout | 事件分发 (由 event_dispatcher 任务驱动) |
///
/// Clone 为浅拷贝。
#[derive(Clone)]
pub struct ServerState {
    pub config: Config,
    pub storage: OrderStorage,
    pub orders: Arc<OrdersManager>,
    pub rooms: Arc<RoomService>,
    pub registry: Arc<ConnectionRegistry>,
    pub notifications: Arc<NotificationQueue>,
    pub fanout: Arc<NotificationFanout>,
    clock: Arc<dyn Clock>,
    /// 由 `start_background_tasks` 取走交给 RefundWorker
    refund_rx: Arc<Mutex<Option<mpsc::Receiver<String>>>>,
    /// 由 `start_background_tasks` 取走交给 event_dispatcher
    event_rx: Arc<Mutex<Option<mpsc::Receiver<DomainEvent>>>>,
}

impl ServerState {
    /// 初始化服务器状态
    ///
    /// 按顺序初始化:
    /// 1. 工作目录
    /// 2. 数据库 (orders.redb / notifications.redb)
    /// 3. 注册表、分发、订单与包厢服务
    pub fn initialize(config: &Config) -> AppResult<Self> {
        std::fs::create_dir_all(&config.work_dir)
            .map_err(|e| AppError::internal(format!("Failed to create work dir {}: {}", config.work_dir, e)))?;

        let storage = OrderStorage::open(config.orders_db_path())?;
        let notifications = NotificationQueue::open(
            config.notifications_db_path(),
            config.notification_queue_cap,
            config.notification_ttl_days * DAY_MILLIS,
        )?;

        tracing::info!(work_dir = %config.work_dir, "Databases opened");
        Ok(Self::assemble(config, storage, notifications, Arc::new(SystemClock)))
    }

    fn assemble(
        config: &Config,
        storage: OrderStorage,
        notifications: NotificationQueue,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(
            config.max_connections_per_user,
            config.connection_buffer,
        ));
        let notifications = Arc::new(notifications);
        let fanout = Arc::new(NotificationFanout::new(
            registry.clone(),
            notifications.clone(),
            clock.clone(),
        ));
        let (bus, event_rx) = EventBus::channel(config.event_queue_capacity);
        let notifier: Arc<dyn Notifier> = Arc::new(bus);

        let (refund_tx, refund_rx) = mpsc::channel(REFUND_QUEUE_CAPACITY);
        let orders = OrdersManager::new(
            storage.clone(),
            PricingEngine::new(config.pricing.clone()),
            ManagerRules::from_config(config),
            notifier.clone(),
            clock.clone(),
        )
        .with_refund_queue(refund_tx);
        let rooms = RoomService::new(storage.clone(), notifier, clock.clone());

        Self {
            config: config.clone(),
            storage,
            orders: Arc::new(orders),
            rooms: Arc::new(rooms),
            registry,
            notifications,
            fanout,
            clock,
            refund_rx: Arc::new(Mutex::new(Some(refund_rx))),
            event_rx: Arc::new(Mutex::new(Some(event_rx))),
        }
    }

    /// 启动后台任务
    ///
    /// - expiration_sweeper (Periodic): 过期订单 + 过期通知队列
    /// - event_dispatcher (Worker): 推送 + 通知队列写入，仅第一次调用时启动
    /// - refund_worker (Worker): 仅第一次调用时启动
    /// - push_server (Listener): TCP 推送
    pub fn start_background_tasks(&self, gateway: Arc<dyn RefundGateway>) -> BackgroundTasks {
        let mut tasks = BackgroundTasks::new();
        let token = tasks.shutdown_token();

        let sweeper = ExpirationSweeper::new(
            self.orders.clone(),
            Duration::from_secs(self.config.sweep_interval_secs.max(1)),
        )
        .with_notification_queue(self.notifications.clone());
        tasks.spawn("expiration_sweeper", TaskKind::Periodic, sweeper.run(token.clone()));

        match self.event_rx.lock().take() {
            Some(rx) => {
                let dispatcher = run_dispatcher(self.fanout.clone(), rx, token.clone());
                tasks.spawn("event_dispatcher", TaskKind::Worker, dispatcher);
            }
            None => tracing::warn!("Event dispatcher already started, skipping"),
        }

        match self.refund_rx.lock().take() {
            Some(rx) => {
                let worker = RefundWorker::new(self.storage.clone(), gateway, self.clock.clone());
                tasks.spawn("refund_worker", TaskKind::Worker, worker.run(rx, token.clone()));
            }
            None => tracing::warn!("Refund worker already started, skipping"),
        }

        let server = PushServer::new(self.registry.clone(), token);
        let addr = self.config.push_listen_addr();
        tasks.spawn("push_server", TaskKind::Listener, async move {
            if let Err(e) = server.run(&addr).await {
                tracing::error!(error = %e, "Push server stopped");
            }
        });

        tasks.log_summary();
        tasks
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

impl std::fmt::Debug for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerState")
            .field("config", &self.config)
            .field("orders", &self.orders)
            .field("registry", &self.registry)
            .finish()
    }
}
