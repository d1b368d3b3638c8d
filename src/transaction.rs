// 🧾 Transaction Log - Append-only, immutable once created
//
// Every mutation of a balance (or of a PIN or phone number) is described
// by exactly one Transaction. Declined attempts are recorded too, with
// status Failed and the response code of the error, and never touch a
// balance.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ============================================================================
// TRANSACTION TYPE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransactionType {
    /// Cash dispensed by a machine, debited from an account
    Withdrawal,

    /// One leg of an account-to-account transfer
    Transfer,

    /// PIN replaced on an account
    PinChange,

    /// Contact phone number replaced on an account
    PhoneChange,

    /// Cash loaded into a machine by an operator
    Refill,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Withdrawal => "withdrawal",
            TransactionType::Transfer => "transfer",
            TransactionType::PinChange => "pin-change",
            TransactionType::PhoneChange => "phone-change",
            TransactionType::Refill => "refill",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "withdrawal" => Some(TransactionType::Withdrawal),
            "transfer" => Some(TransactionType::Transfer),
            "pin-change" => Some(TransactionType::PinChange),
            "phone-change" => Some(TransactionType::PhoneChange),
            "refill" => Some(TransactionType::Refill),
            _ => None,
        }
    }
}

// ============================================================================
// STATUS & RESPONSE CODES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Success,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Success => "success",
            TransactionStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(TransactionStatus::Success),
            "failed" => Some(TransactionStatus::Failed),
            _ => None,
        }
    }
}

/// Two-character response codes, loosely modelled on ISO 8583 field 39.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseCode {
    Approved,
    InvalidAmount,
    UnknownAccount,
    UnknownMachine,
    InvalidPhoneFormat,
    InsufficientFunds,
    CardExpired,
    IncorrectPin,
    InvalidPinFormat,
    SelfTransfer,
    AccountInactive,
    MachineClosed,
    CashUnavailable,
    SystemError,
}

impl ResponseCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseCode::Approved => "00",
            ResponseCode::InvalidAmount => "13",
            ResponseCode::UnknownAccount => "14",
            ResponseCode::UnknownMachine => "15",
            ResponseCode::InvalidPhoneFormat => "30",
            ResponseCode::InsufficientFunds => "51",
            ResponseCode::CardExpired => "54",
            ResponseCode::IncorrectPin => "55",
            ResponseCode::InvalidPinFormat => "56",
            ResponseCode::SelfTransfer => "57",
            ResponseCode::AccountInactive => "62",
            ResponseCode::MachineClosed => "91",
            ResponseCode::CashUnavailable => "92",
            ResponseCode::SystemError => "96",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        let all = [
            ResponseCode::Approved,
            ResponseCode::InvalidAmount,
            ResponseCode::UnknownAccount,
            ResponseCode::UnknownMachine,
            ResponseCode::InvalidPhoneFormat,
            ResponseCode::InsufficientFunds,
            ResponseCode::CardExpired,
            ResponseCode::IncorrectPin,
            ResponseCode::InvalidPinFormat,
            ResponseCode::SelfTransfer,
            ResponseCode::AccountInactive,
            ResponseCode::MachineClosed,
            ResponseCode::CashUnavailable,
            ResponseCode::SystemError,
        ];
        all.into_iter().find(|rc| rc.as_str() == code)
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of a transfer a transaction records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferLeg {
    Debit,
    Credit,
}

impl TransferLeg {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferLeg::Debit => "debit",
            TransferLeg::Credit => "credit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "debit" => Some(TransferLeg::Debit),
            "credit" => Some(TransferLeg::Credit),
            _ => None,
        }
    }
}

// ============================================================================
// TRANSACTION
// ============================================================================

/// A recorded transaction. Only stores construct these, when they assign
/// the id inside their commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique, monotonically assigned by the store
    pub id: u64,

    pub account_id: Option<String>,
    pub machine_id: Option<String>,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub timestamp: DateTime<Utc>,
    pub status: TransactionStatus,
    pub response_code: ResponseCode,

    /// Shared by both legs of a transfer
    pub correlation_id: Option<String>,
    pub leg: Option<TransferLeg>,

    /// Extensible details (operator, previous balance, counterparty, ...)
    #[serde(default)]
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Transaction {
    pub fn is_success(&self) -> bool {
        self.status == TransactionStatus::Success
    }

    pub fn get_metadata(&self, key: &str) -> Option<&serde_json::Value> {
        self.metadata.get(key)
    }
}

/// A transaction waiting for its id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub account_id: Option<String>,
    pub machine_id: Option<String>,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub timestamp: DateTime<Utc>,
    pub status: TransactionStatus,
    pub response_code: ResponseCode,
    pub correlation_id: Option<String>,
    pub leg: Option<TransferLeg>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl NewTransaction {
    /// An approved transaction of the given type.
    pub fn new(
        transaction_type: TransactionType,
        amount: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Self {
        NewTransaction {
            account_id: None,
            machine_id: None,
            transaction_type,
            amount,
            timestamp,
            status: TransactionStatus::Success,
            response_code: ResponseCode::Approved,
            correlation_id: None,
            leg: None,
            metadata: HashMap::new(),
        }
    }

    pub fn account(mut self, account_id: &str) -> Self {
        self.account_id = Some(account_id.to_string());
        self
    }

    pub fn machine(mut self, machine_id: &str) -> Self {
        self.machine_id = Some(machine_id.to_string());
        self
    }

    pub fn declined(mut self, code: ResponseCode) -> Self {
        self.status = TransactionStatus::Failed;
        self.response_code = code;
        self
    }

    pub fn transfer_leg(mut self, correlation_id: &str, leg: TransferLeg) -> Self {
        self.correlation_id = Some(correlation_id.to_string());
        self.leg = Some(leg);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub fn assign(self, id: u64) -> Transaction {
        Transaction {
            id,
            account_id: self.account_id,
            machine_id: self.machine_id,
            transaction_type: self.transaction_type,
            amount: self.amount,
            timestamp: self.timestamp,
            status: self.status,
            response_code: self.response_code,
            correlation_id: self.correlation_id,
            leg: self.leg,
            metadata: self.metadata,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
