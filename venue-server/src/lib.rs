//! Venue Server - 包厢预订与点单引擎
//!
//! # 架构概述
//!
//! - **定价** (`pricing`): 小计、押金、会员折扣
//! - **预订检查** (`booking`): 包厢时段冲突检测
//! - **订单** (`orders`): 状态机、副作用、过期清扫、退款队列
//! - **包厢** (`rooms`): 包厢状态变更与推送
//! - **消息** (`message`): 连接注册表、通知扇出、TCP 推送服务
//!
//! # 模块结构
//!
//! ```text
//! venue-server/src/
//! ├── core/          # 配置、状态、后台任务
//! ├── utils/         # 错误、日志、时钟
//! ├── pricing/       # 定价引擎
//! ├── booking/       # 可用性检查
//! ├── orders/        # 订单状态机与存储
//! ├── rooms/         # 包厢服务
//! └── message/       # 推送与通知
//! ```
//!
//! # 数据流
//!
//! ```text
//! create_order ─► PricingEngine ─► AvailabilityChecker ─► OrderStorage (PENDING)
//!                                                              │
//! pay / confirm / start / complete / cancel ─► state machine ──┤
//!                                                              ▼
//!                          EventBus (Notifier) ─► event_dispatcher ─► NotificationFanout
//!                                                                     ├─► ConnectionRegistry (live push)
//!                                                                     └─► NotificationQueue (durable)
//! ```

pub mod booking;
pub mod core;
pub mod message;
pub mod orders;
pub mod pricing;
pub mod rooms;
pub mod utils;

// Re-export 公共类型
pub use core::{BackgroundTasks, Config, ServerState, TaskKind};
pub use message::{ConnectionRegistry, EventBus, NotificationFanout, NotificationQueue, Notifier};
pub use orders::{ExpirationSweeper, OrderError, OrderResult, OrderStorage, OrdersManager};
pub use pricing::{PricingEngine, PricingPolicy};
pub use rooms::RoomService;
pub use utils::{AppError, AppResult, Clock, SystemClock};

// Re-export logger functions
pub use utils::logger::{init_logger, init_logger_with_file};
