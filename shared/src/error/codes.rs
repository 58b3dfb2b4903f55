use serde::{Deserialize, Serialize};
use std::fmt;

/// Unified error code enum
///
/// All error codes are represented as u16 values for efficient serialization
/// and cross-language compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
#[repr(u16)]
pub enum ErrorCode {
    // ==================== 0xxx: General ====================
    /// Operation completed successfully
    Success = 0,
    /// Unknown error
    Unknown = 1,
    /// Validation failed
    ValidationFailed = 2,
    /// Resource not found
    NotFound = 3,
    /// Resource conflict
    Conflict = 4,

    // ==================== 4xxx: Order ====================
    /// Order not found
    OrderNotFound = 4001,
    /// Requested status change is not in the transition table
    InvalidTransition = 4002,
    /// Payment attempted after the payment window closed
    OrderExpired = 4003,
    /// Order has no room and no items
    OrderEmpty = 4004,
    /// Too close to the booked start time to cancel
    CancelWindowClosed = 4005,

    // ==================== 5xxx: Payment ====================
    /// Paid amount differs from the order's actual amount
    PaymentAmountMismatch = 5001,
    /// Member balance does not cover the payment
    InsufficientBalance = 5002,
    /// Refund amount exceeds the paid amount
    RefundExceedsAmount = 5003,

    // ==================== 6xxx: Catalog ====================
    /// Store not found
    StoreNotFound = 6001,
    /// Dish not found
    DishNotFound = 6002,
    /// Dish is not on sale
    DishUnavailable = 6003,
    /// Member not found
    MemberNotFound = 6004,

    // ==================== 7xxx: Room ====================
    /// Room not found
    RoomNotFound = 7001,
    /// Room is not available for the requested interval
    RoomNotAvailable = 7002,
    /// Room capacity is below the guest count
    CapacityExceeded = 7003,

    // ==================== 8xxx: Connection ====================
    /// Too many concurrent connections for one user
    ConnectionLimit = 8001,
    /// Connection id already registered
    ConnectionExists = 8002,

    // ==================== 9xxx: System ====================
    /// Internal error
    InternalError = 9001,
    /// Storage error (IO, corruption)
    StorageError = 9002,
    /// System busy, retry later
    SystemBusy = 9003,
}

impl ErrorCode {
    /// Get the numeric code value
    #[inline]
    pub const fn code(&self) -> u16 {
        *self as u16
    }

    /// Check if this is a success code
    #[inline]
    pub const fn is_success(&self) -> bool {
        matches!(self, ErrorCode::Success)
    }

    /// Get the developer-facing English message for this error code
    pub const fn message(&self) -> &'static str {
        match self {
            ErrorCode::Success => "Operation completed successfully",
            ErrorCode::Unknown => "An unknown error occurred",
            ErrorCode::ValidationFailed => "Validation failed",
            ErrorCode::NotFound => "Resource not found",
            ErrorCode::Conflict => "Resource conflict",

            ErrorCode::OrderNotFound => "Order not found",
            ErrorCode::InvalidTransition => "Order status change not allowed",
            ErrorCode::OrderExpired => "Order payment window has expired",
            ErrorCode::OrderEmpty => "Order has no room and no items",
            ErrorCode::CancelWindowClosed => "Too close to start time to cancel",

            ErrorCode::PaymentAmountMismatch => "Payment amount does not match order",
            ErrorCode::InsufficientBalance => "Insufficient balance",
            ErrorCode::RefundExceedsAmount => "Refund exceeds paid amount",

            ErrorCode::StoreNotFound => "Store not found",
            ErrorCode::DishNotFound => "Dish not found",
            ErrorCode::DishUnavailable => "Dish is not available",
            ErrorCode::MemberNotFound => "Member not found",

            ErrorCode::RoomNotFound => "Room not found",
            ErrorCode::RoomNotAvailable => "Room not available",
            ErrorCode::CapacityExceeded => "Room capacity exceeded",

            ErrorCode::ConnectionLimit => "Too many connections",
            ErrorCode::ConnectionExists => "Connection already registered",

            ErrorCode::InternalError => "Internal error",
            ErrorCode::StorageError => "Storage error",
            ErrorCode::SystemBusy => "System busy, retry later",
        }
    }
}

impl From<ErrorCode> for u16 {
    #[inline]
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

/// Error when converting from an invalid u16 to ErrorCode
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid error code: {0}")]
pub struct InvalidErrorCode(pub u16);

impl TryFrom<u16> for ErrorCode {
    type Error = InvalidErrorCode;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ErrorCode::Success),
            1 => Ok(ErrorCode::Unknown),
            2 => Ok(ErrorCode::ValidationFailed),
            3 => Ok(ErrorCode::NotFound),
            4 => Ok(ErrorCode::Conflict),

            4001 => Ok(ErrorCode::OrderNotFound),
            4002 => Ok(ErrorCode::InvalidTransition),
            4003 => Ok(ErrorCode::OrderExpired),
            4004 => Ok(ErrorCode::OrderEmpty),
            4005 => Ok(ErrorCode::CancelWindowClosed),

            5001 => Ok(ErrorCode::PaymentAmountMismatch),
            5002 => Ok(ErrorCode::InsufficientBalance),
            5003 => Ok(ErrorCode::RefundExceedsAmount),

            6001 => Ok(ErrorCode::StoreNotFound),
            6002 => Ok(ErrorCode::DishNotFound),
            6003 => Ok(ErrorCode::DishUnavailable),
            6004 => Ok(ErrorCode::MemberNotFound),

            7001 => Ok(ErrorCode::RoomNotFound),
            7002 => Ok(ErrorCode::RoomNotAvailable),
            7003 => Ok(ErrorCode::CapacityExceeded),

            8001 => Ok(ErrorCode::ConnectionLimit),
            8002 => Ok(ErrorCode::ConnectionExists),

            9001 => Ok(ErrorCode::InternalError),
            9002 => Ok(ErrorCode::StorageError),
            9003 => Ok(ErrorCode::SystemBusy),

            _ => Err(InvalidErrorCode(value)),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_values() {
        assert_eq!(ErrorCode::Success.code(), 0);
        assert_eq!(ErrorCode::OrderNotFound.code(), 4001);
        assert_eq!(ErrorCode::InvalidTransition.code(), 4002);
        assert_eq!(ErrorCode::OrderExpired.code(), 4003);
        assert_eq!(ErrorCode::RoomNotAvailable.code(), 7002);
        assert_eq!(ErrorCode::ConnectionLimit.code(), 8001);
    }

    #[test]
    fn test_try_from_invalid() {
        assert_eq!(ErrorCode::try_from(4999), Err(InvalidErrorCode(4999)));
        assert_eq!(
            InvalidErrorCode(4999).to_string(),
            "invalid error code: 4999"
        );
    }

    #[test]
    fn test_serialize_as_number() {
        let json = serde_json::to_string(&ErrorCode::OrderExpired).unwrap();
        assert_eq!(json, "4003");
        let back: ErrorCode = serde_json::from_str("7002").unwrap();
        assert_eq!(back, ErrorCode::RoomNotAvailable);
        assert!(serde_json::from_str::<ErrorCode>("12345").is_err());
    }

    #[test]
    fn test_message() {
        assert_eq!(ErrorCode::Success.message(), "Operation completed successfully");
        assert_eq!(ErrorCode::RoomNotAvailable.message(), "Room not available");
        assert!(ErrorCode::Success.is_success());
        assert!(!ErrorCode::Unknown.is_success());
    }
}
