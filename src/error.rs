// ⚠️ Ledger Errors - Every declined operation is a value, never a panic
//
// All business errors are recoverable: the ledger guarantees no partial
// mutation, and the caller decides the user-facing message.

use crate::transaction::ResponseCode;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("insufficient funds: balance {available}, requested {requested}")]
    InsufficientFunds { available: Decimal, requested: Decimal },

    #[error("machine {machine_id} cannot dispense {requested} (cash on hand {available})")]
    MachineCashUnavailable {
        machine_id: String,
        available: Decimal,
        requested: Decimal,
    },

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("invalid PIN: must be exactly 4 digits")]
    InvalidPin,

    #[error("invalid phone number {0:?}: expected 7 to 14 digits with an optional leading +")]
    InvalidPhone(String),

    #[error("card on account {account_id} expired on {expired_on}")]
    CardExpired {
        account_id: String,
        expired_on: NaiveDate,
    },

    #[error("authentication failed for account {0}")]
    AuthenticationFailed(String),

    #[error("unknown account: {0}")]
    UnknownAccount(String),

    #[error("unknown machine: {0}")]
    UnknownMachine(String),

    #[error("account {0} is inactive")]
    AccountInactive(String),

    #[error("machine {0} is closed")]
    MachineClosed(String),

    #[error("cannot transfer from account {0} to itself")]
    SelfTransfer(String),

    #[error("{entity} already registered: {id}")]
    DuplicateEntity { entity: &'static str, id: String },

    #[error("storage failure: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl LedgerError {
    /// Response code recorded on the failed transaction for this error.
    pub fn response_code(&self) -> ResponseCode {
        match self {
            LedgerError::InsufficientFunds { .. } => ResponseCode::InsufficientFunds,
            LedgerError::MachineCashUnavailable { .. } => ResponseCode::CashUnavailable,
            LedgerError::InvalidAmount(_) => ResponseCode::InvalidAmount,
            LedgerError::InvalidPin => ResponseCode::InvalidPinFormat,
            LedgerError::InvalidPhone(_) => ResponseCode::InvalidPhoneFormat,
            LedgerError::CardExpired { .. } => ResponseCode::CardExpired,
            LedgerError::AuthenticationFailed(_) => ResponseCode::IncorrectPin,
            LedgerError::UnknownAccount(_) => ResponseCode::UnknownAccount,
            LedgerError::UnknownMachine(_) => ResponseCode::UnknownMachine,
            LedgerError::AccountInactive(_) => ResponseCode::AccountInactive,
            LedgerError::MachineClosed(_) => ResponseCode::MachineClosed,
            LedgerError::SelfTransfer(_) => ResponseCode::SelfTransfer,
            LedgerError::DuplicateEntity { .. } | LedgerError::Storage(_) => {
                ResponseCode::SystemError
            }
        }
    }

    /// True for errors caused by the request rather than the infrastructure.
    pub fn is_business(&self) -> bool {
        !matches!(self, LedgerError::Storage(_) | LedgerError::DuplicateEntity { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_response_codes() {
        let err = LedgerError::InsufficientFunds {
            available: dec!(100),
            requested: dec!(120),
        };
        assert_eq!(err.response_code().as_str(), "51");
        assert_eq!(LedgerError::InvalidPin.response_code().as_str(), "56");
        assert_eq!(
            LedgerError::AuthenticationFailed("acc".to_string()).response_code().as_str(),
            "55"
        );
        assert!(err.is_business());

        let expired = LedgerError::CardExpired {
            account_id: "acc".to_string(),
            expired_on: NaiveDate::from_ymd_opt(2025, 1, 31).unwrap(),
        };
        assert_eq!(expired.response_code().as_str(), "54");
        assert_eq!(LedgerError::InvalidPhone("x".into()).response_code().as_str(), "30");
    }

    #[test]
    fn test_storage_errors_are_not_business() {
        let err = LedgerError::from(anyhow::anyhow!("disk full"));
        assert!(!err.is_business());
        assert_eq!(err.response_code(), ResponseCode::SystemError);
        assert!(err.to_string().contains("disk full"));
    }
}
