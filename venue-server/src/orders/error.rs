//! Order lifecycle errors
//!
//! Raised by pricing, availability checking and the state machine. A
//! transport layer maps them to client codes via [`OrderError::code`].

use shared::ErrorCode;
use shared::order::OrderStatus;
use std::fmt;
use thiserror::Error;

use super::storage::StorageError;

/// Conflict reason for an occupied interval
pub const ROOM_NOT_AVAILABLE: &str = "ROOM_NOT_AVAILABLE";

/// Entity kind for `NotFound`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Order,
    Room,
    Store,
    Member,
    Dish,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::Order => write!(f, "Order"),
            Entity::Room => write!(f, "Room"),
            Entity::Store => write!(f, "Store"),
            Entity::Member => write!(f, "Member"),
            Entity::Dish => write!(f, "Dish"),
        }
    }
}

/// Order errors
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: Entity, id: String },

    #[error("Validation failed: {message}")]
    Validation { code: ErrorCode, message: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("Order expired: {0}")]
    OrderExpired(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl OrderError {
    pub fn not_found(entity: Entity, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Generic validation failure
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Validation {
            code: ErrorCode::ValidationFailed,
            message: message.into(),
        }
    }

    /// Validation failure with a specific client code
    pub fn validation(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Validation {
            code,
            message: message.into(),
        }
    }

    pub fn room_not_available() -> Self {
        Self::Conflict(ROOM_NOT_AVAILABLE.to_string())
    }

    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, OrderError::InvalidTransition { .. })
    }

    /// Client-facing error code
    pub fn code(&self) -> ErrorCode {
        match self {
            OrderError::NotFound { entity, .. } => match entity {
                Entity::Order => ErrorCode::OrderNotFound,
                Entity::Room => ErrorCode::RoomNotFound,
                Entity::Store => ErrorCode::StoreNotFound,
                Entity::Member => ErrorCode::MemberNotFound,
                Entity::Dish => ErrorCode::DishNotFound,
            },
            OrderError::Validation { code, .. } => *code,
            OrderError::Conflict(reason) if reason == ROOM_NOT_AVAILABLE => {
                ErrorCode::RoomNotAvailable
            }
            OrderError::Conflict(_) => ErrorCode::Conflict,
            OrderError::InvalidTransition { .. } => ErrorCode::InvalidTransition,
            OrderError::OrderExpired(_) => ErrorCode::OrderExpired,
            OrderError::Storage(e) => classify_storage_error(e),
        }
    }
}

pub type OrderResult<T> = Result<T, OrderError>;

/// 将存储错误转换为错误码（客户端负责本地化）
fn classify_storage_error(e: &StorageError) -> ErrorCode {
    if let StorageError::Serialization(_) = e {
        return ErrorCode::InternalError;
    }

    // redb 错误通过字符串匹配分类
    let err_str = e.to_string().to_lowercase();
    if err_str.contains("no space")
        || err_str.contains("disk full")
        || err_str.contains("corrupt")
        || err_str.contains("invalid database")
    {
        return ErrorCode::StorageError;
    }

    // 默认：系统繁忙（Database/Transaction/Table/Storage/Commit 错误）
    ErrorCode::SystemBusy
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            OrderError::not_found(Entity::Room, 7).code(),
            ErrorCode::RoomNotFound
        );
        assert_eq!(
            OrderError::room_not_available().code(),
            ErrorCode::RoomNotAvailable
        );
        assert_eq!(
            OrderError::Conflict("DUPLICATE".into()).code(),
            ErrorCode::Conflict
        );
        assert_eq!(
            OrderError::validation(ErrorCode::CapacityExceeded, "too many guests").code(),
            ErrorCode::CapacityExceeded
        );
    }

    #[test]
    fn test_invalid_transition_message_names_both_states() {
        let err = OrderError::InvalidTransition {
            from: OrderStatus::Cancelled,
            to: OrderStatus::Cancelled,
        };
        assert_eq!(err.to_string(), "Invalid transition: cancelled -> cancelled");
        assert!(err.is_invalid_transition());
    }
}
