//! 工具模块
//!
//! - [`error`] - 基础设施错误类型
//! - [`logger`] - 日志初始化
//! - [`clock`] - 可注入时钟

pub mod clock;
pub mod error;
pub mod logger;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{AppError, AppResult};
