// 💵 Monetary amounts - exact decimals, at most two places

use crate::error::{LedgerError, LedgerResult};
use rust_decimal::Decimal;

pub const MAX_SCALE: u32 = 2;

/// An operation amount: strictly positive, at most cents precision.
pub fn validate_amount(amount: Decimal) -> LedgerResult<()> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount(format!(
            "amount must be positive, got {}",
            amount
        )));
    }
    check_scale(amount)
}

/// A stored balance or threshold: non-negative, at most cents precision.
pub fn validate_balance(balance: Decimal) -> LedgerResult<()> {
    if balance.is_sign_negative() && !balance.is_zero() {
        return Err(LedgerError::InvalidAmount(format!(
            "balance cannot be negative, got {}",
            balance
        )));
    }
    check_scale(balance)
}

/// `balance + amount`, or `InvalidAmount` when the sum is not representable.
pub fn checked_credit(balance: Decimal, amount: Decimal) -> LedgerResult<Decimal> {
    balance.checked_add(amount).ok_or_else(|| {
        LedgerError::InvalidAmount(format!("{} would overflow a balance of {}", amount, balance))
    })
}

pub fn checked_debit(balance: Decimal, amount: Decimal) -> LedgerResult<Decimal> {
    balance.checked_sub(amount).ok_or_else(|| {
        LedgerError::InvalidAmount(format!("{} would overflow a balance of {}", amount, balance))
    })
}

fn check_scale(amount: Decimal) -> LedgerResult<()> {
    if amount.normalize().scale() > MAX_SCALE {
        return Err(LedgerError::InvalidAmount(format!(
            "at most {} decimal places allowed, got {}",
            MAX_SCALE, amount
        )));
    }
    Ok(())
}
