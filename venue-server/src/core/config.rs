use rust_decimal::Decimal;

use crate::pricing::PricingPolicy;

/// 服务器配置
///
/// # 环境变量
///
/// 所有配置项都可以通过环境变量覆盖：
///
/// | 环境变量 | 默认值 | 说明 |
/// |----------|--------|------|
/// | WORK_DIR | /var/lib/venue | 工作目录 (redb 文件、日志) |
/// | ENVIRONMENT | development | 运行环境 |
/// | PUSH_TCP_PORT | 8082 | TCP 推送服务端口 |
/// | ORDER_EXPIRY_MINUTES | 15 | 未支付订单保留时长 |
/// | SWEEP_INTERVAL_SECS | 60 | 过期清扫周期 |
/// | CANCEL_MIN_NOTICE_MINUTES | 120 | 用户取消需提前的分钟数 (0 = 不限制) |
/// | POINTS_RATE | 0.05 | 完成订单积分比例 |
/// | VIP_POINTS_MULTIPLIER | 2 | VIP 积分倍数 |
/// | VIP_DEPOSIT_EXEMPT_LEVEL | 3 | 免押金的 VIP 等级 |
/// | VIP_DISCOUNT_RATE_PER_LEVEL | 0.02 | 每级 VIP 折扣率 |
/// | VIP_DISCOUNT_MAX_RATE | 0.10 | 折扣率上限 |
/// | MAX_CONNECTIONS_PER_USER | 5 | 单用户最大连接数 |
/// | CONNECTION_BUFFER | 256 | 每连接待发送缓冲 |
/// | EVENT_QUEUE_CAPACITY | 1024 | 待分发事件通道容量 |
/// | NOTIFICATION_QUEUE_CAP | 100 | 单用户通知队列上限 |
/// | NOTIFICATION_TTL_DAYS | 30 | 通知队列过期天数 |
/// | LOG_LEVEL | info | 日志级别 |
/// | LOG_DIR | (unset) | 日志目录 (按天滚动) |
///
/// # 示例
///
/// ```ignore
/// WORK_DIR=/data/venue PUSH_TCP_PORT=9000 cargo run
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// 工作目录
    pub work_dir: String,
    /// 运行环境: development | staging | production
    pub environment: String,
    /// TCP 推送服务端口
    pub push_tcp_port: u16,

    // === 订单策略 ===
    /// 未支付订单保留时长 (分钟)
    pub order_expiry_minutes: i64,
    /// 过期清扫周期 (秒)
    pub sweep_interval_secs: u64,
    /// 用户取消需提前的分钟数，0 表示不限制
    pub cancel_min_notice_minutes: i64,
    /// 完成订单积分比例
    pub points_rate: Decimal,
    /// VIP 积分倍数
    pub vip_points_multiplier: u64,
    /// 定价策略
    pub pricing: PricingPolicy,

    // === 推送与通知 ===
    /// 单用户最大并发连接数
    pub max_connections_per_user: usize,
    /// 每个连接的待发送缓冲
    pub connection_buffer: usize,
    /// 待分发领域事件的通道容量
    pub event_queue_capacity: usize,
    /// 单用户通知队列上限
    pub notification_queue_cap: usize,
    /// 通知队列过期天数
    pub notification_ttl_days: i64,

    // === 日志 ===
    pub log_level: String,
    pub log_dir: Option<String>,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// 从环境变量加载配置
    ///
    /// 如果环境变量未设置或无法解析，使用默认值
    pub fn from_env() -> Self {
        Self {
            work_dir: std::env::var("WORK_DIR").unwrap_or_else(|_| "/var/lib/venue".into()),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into()),
            push_tcp_port: env_parse("PUSH_TCP_PORT", 8082),

            order_expiry_minutes: env_parse("ORDER_EXPIRY_MINUTES", 15),
            sweep_interval_secs: env_parse("SWEEP_INTERVAL_SECS", 60),
            cancel_min_notice_minutes: env_parse("CANCEL_MIN_NOTICE_MINUTES", 120),
            points_rate: env_parse("POINTS_RATE", Decimal::new(5, 2)),
            vip_points_multiplier: env_parse("VIP_POINTS_MULTIPLIER", 2),
            pricing: PricingPolicy {
                deposit_exempt_level: env_parse("VIP_DEPOSIT_EXEMPT_LEVEL", 3),
                rate_per_level: env_parse("VIP_DISCOUNT_RATE_PER_LEVEL", Decimal::new(2, 2)),
                max_rate: env_parse("VIP_DISCOUNT_MAX_RATE", Decimal::new(10, 2)),
            },

            max_connections_per_user: env_parse("MAX_CONNECTIONS_PER_USER", 5),
            connection_buffer: env_parse("CONNECTION_BUFFER", 256),
            event_queue_capacity: env_parse("EVENT_QUEUE_CAPACITY", 1024),
            notification_queue_cap: env_parse("NOTIFICATION_QUEUE_CAP", 100),
            notification_ttl_days: env_parse("NOTIFICATION_TTL_DAYS", 30),

            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            log_dir: std::env::var("LOG_DIR").ok(),
        }
    }

    /// 使用自定义值覆盖部分配置
    ///
    /// 常用于测试场景
    pub fn with_overrides(work_dir: impl Into<String>, push_tcp_port: u16) -> Self {
        let mut config = Self::from_env();
        config.work_dir = work_dir.into();
        config.push_tcp_port = push_tcp_port;
        config
    }

    /// 订单数据库路径
    pub fn orders_db_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.work_dir).join("orders.redb")
    }

    /// 通知数据库路径
    pub fn notifications_db_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.work_dir).join("notifications.redb")
    }

    /// 推送服务监听地址
    pub fn push_listen_addr(&self) -> String {
        format!("0.0.0.0:{}", self.push_tcp_port)
    }

    /// 是否生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
