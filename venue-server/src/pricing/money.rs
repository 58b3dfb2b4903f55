//! Money helpers
//!
//! All amounts are `Decimal` rounded to 2 decimal places, half away from zero.

use rust_decimal::prelude::*;
use shared::ErrorCode;

use crate::orders::OrderError;

/// Rounding precision for monetary values
pub const DECIMAL_PLACES: u32 = 2;

/// Maximum allowed unit price
const MAX_PRICE: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);
/// Maximum allowed quantity per line
pub const MAX_QUANTITY: i32 = 9999;

/// Round to cents
#[inline]
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero)
}

/// Validate one priced line
pub fn validate_line(unit_price: Decimal, quantity: i32) -> Result<(), OrderError> {
    if unit_price.is_sign_negative() && !unit_price.is_zero() {
        return Err(OrderError::invalid(format!(
            "price must be non-negative, got {}",
            unit_price
        )));
    }
    if unit_price > MAX_PRICE {
        return Err(OrderError::invalid(format!(
            "price exceeds maximum allowed ({}), got {}",
            MAX_PRICE, unit_price
        )));
    }
    if quantity <= 0 {
        return Err(OrderError::invalid(format!(
            "quantity must be positive, got {}",
            quantity
        )));
    }
    if quantity > MAX_QUANTITY {
        return Err(OrderError::invalid(format!(
            "quantity exceeds maximum allowed ({}), got {}",
            MAX_QUANTITY, quantity
        )));
    }
    Ok(())
}

/// Validate a payment or refund amount: positive and at most `ceiling`
pub fn validate_amount(amount: Decimal, ceiling: Decimal, code: ErrorCode) -> Result<(), OrderError> {
    if amount <= Decimal::ZERO {
        return Err(OrderError::validation(
            code,
            format!("amount must be positive, got {}", amount),
        ));
    }
    if round_money(amount) != amount {
        return Err(OrderError::validation(
            code,
            format!("amount has more than {} decimal places: {}", DECIMAL_PLACES, amount),
        ));
    }
    if amount > ceiling {
        return Err(OrderError::validation(
            code,
            format!("amount {} exceeds {}", amount, ceiling),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_money_half_away_from_zero() {
        assert_eq!(round_money(Decimal::new(1005, 3)), Decimal::new(101, 2));
        assert_eq!(round_money(Decimal::new(1004, 3)), Decimal::new(100, 2));
        assert_eq!(round_money(Decimal::new(-1005, 3)), Decimal::new(-101, 2));
    }

    #[test]
    fn test_validate_line() {
        assert!(validate_line(Decimal::new(1000, 2), 1).is_ok());
        assert!(validate_line(Decimal::ZERO, 1).is_ok());
        assert!(validate_line(Decimal::new(-1, 2), 1).is_err());
        assert!(validate_line(Decimal::new(1000, 2), 0).is_err());
        assert!(validate_line(Decimal::new(1000, 2), -3).is_err());
        assert!(validate_line(Decimal::new(1000, 2), MAX_QUANTITY + 1).is_err());
    }

    #[test]
    fn test_validate_amount() {
        let ceiling = Decimal::new(10000, 2);
        assert!(validate_amount(Decimal::new(10000, 2), ceiling, ErrorCode::RefundExceedsAmount).is_ok());
        assert!(validate_amount(Decimal::new(10001, 2), ceiling, ErrorCode::RefundExceedsAmount).is_err());
        assert!(validate_amount(Decimal::ZERO, ceiling, ErrorCode::RefundExceedsAmount).is_err());
        assert!(validate_amount(Decimal::new(1, 3), ceiling, ErrorCode::RefundExceedsAmount).is_err());
    }
}
