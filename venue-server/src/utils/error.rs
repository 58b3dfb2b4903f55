//! 基础设施错误
//!
//! [`AppError`] covers transport, startup and wiring failures. Order
//! lifecycle failures use [`crate::orders::OrderError`]; both map onto
//! [`ErrorCode`] for clients.

use shared::ErrorCode;

/// 应用错误枚举
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Resource not found: {0}")]
    /// 资源不存在
    NotFound(String),

    #[error("Validation failed: {0}")]
    /// 验证失败
    Validation(String),

    #[error("Resource conflict: {0}")]
    /// 资源冲突
    Conflict(String),

    #[error("Invalid request: {0}")]
    /// 无效请求 (malformed frame, bad handshake)
    Invalid(String),

    #[error("Database error: {0}")]
    /// 数据库错误
    Database(String),

    #[error("Internal server error: {0}")]
    /// 内部错误
    Internal(String),

    #[error("Client disconnected")]
    /// 对端关闭连接
    ClientDisconnected,
}

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }

    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Client-facing error code
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::NotFound(_) => ErrorCode::NotFound,
            AppError::Validation(_) => ErrorCode::ValidationFailed,
            AppError::Conflict(_) => ErrorCode::Conflict,
            AppError::Invalid(_) => ErrorCode::ValidationFailed,
            AppError::Database(_) => ErrorCode::StorageError,
            AppError::Internal(_) | AppError::ClientDisconnected => ErrorCode::InternalError,
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Internal(e.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Invalid(e.to_string())
    }
}

impl From<crate::orders::storage::StorageError> for AppError {
    fn from(e: crate::orders::storage::StorageError) -> Self {
        AppError::Database(e.to_string())
    }
}

/// Result 类型别名
pub type AppResult<T> = Result<T, AppError>;
