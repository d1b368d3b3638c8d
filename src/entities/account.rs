// 💳 Account Entity - Card holder account with a PIN and a cash balance
//
// "Account id is IDENTITY (never changes), balance and PIN are VALUES"
//
// - Balance is never negative and only changes through the ledger
// - PIN is held as a salted hash, never in clear
// - A card past its expiry date can no longer draw cash
// - Closing an account deactivates it, history stays in the log

use crate::error::{LedgerError, LedgerResult};
use crate::money::validate_balance;
use crate::pin::PinHash;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ============================================================================
// ACCOUNT STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    /// Card usable at machines, transfers allowed
    Active,

    /// Closed or blocked; rejected by every ledger operation
    Inactive,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Inactive => "inactive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(AccountStatus::Active),
            "inactive" => Some(AccountStatus::Inactive),
            _ => None,
        }
    }
}

// ============================================================================
// ACCOUNT ENTITY
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    // ========================================================================
    // IDENTITY
    // ========================================================================
    /// Account number, unique across the bank
    pub id: String,

    // ========================================================================
    // VALUES
    // ========================================================================
    /// Card holder name
    pub holder_name: String,

    /// Full card number (see `masked_card_number` for display)
    pub card_number: String,

    /// Last day the card can be used; `None` for cards without an expiry
    pub card_expires_on: Option<NaiveDate>,

    pub pin: PinHash,

    /// Contact number, at most 14 characters (see `validate_phone_number`)
    pub phone_number: Option<String>,

    pub balance: Decimal,

    pub status: AccountStatus,

    /// When the account was opened
    pub opened_at: DateTime<Utc>,
}

impl Account {
    /// Open an active account. Fails on a malformed PIN or a negative balance.
    pub fn open(
        id: &str,
        holder_name: &str,
        card_number: &str,
        pin: &str,
        opening_balance: Decimal,
    ) -> LedgerResult<Self> {
        validate_balance(opening_balance)?;
        Ok(Account {
            id: id.to_string(),
            holder_name: holder_name.to_string(),
            card_number: card_number.to_string(),
            card_expires_on: None,
            pin: PinHash::new(pin)?,
            phone_number: None,
            balance: opening_balance,
            status: AccountStatus::Active,
            opened_at: Utc::now(),
        })
    }

    pub fn with_phone_number(mut self, phone_number: &str) -> LedgerResult<Self> {
        validate_phone_number(phone_number)?;
        self.phone_number = Some(phone_number.to_string());
        Ok(self)
    }

    pub fn with_card_expiry(mut self, expires_on: NaiveDate) -> Self {
        self.card_expires_on = Some(expires_on);
        self
    }

    /// The card is valid through its expiry date, inclusive.
    pub fn card_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.card_expires_on
            .is_some_and(|last_day| now.date_naive() > last_day)
    }

    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    pub fn can_cover(&self, amount: Decimal) -> bool {
        self.balance >= amount
    }

    /// Card number showing only the last 4 digits
    pub fn masked_card_number(&self) -> String {
        mask_card_number(&self.card_number)
    }
}

/// Mask a card number (show only last 4 digits)
///
/// Example: "4000123412341234" → "*1234"
pub fn mask_card_number(full_number: &str) -> String {
    let chars: Vec<char> = full_number.chars().collect();
    if chars.len() <= 4 {
        return full_number.to_string();
    }
    let last4: String = chars[chars.len() - 4..].iter().collect();
    format!("*{}", last4)
}

/// Phone numbers: an optional leading `+` followed by 7 to 14 digits,
/// 14 characters at most.
pub fn validate_phone_number(phone_number: &str) -> LedgerResult<()> {
    let digits = phone_number.strip_prefix('+').unwrap_or(phone_number);
    let well_formed = phone_number.len() <= 14
        && (7..=14).contains(&digits.len())
        && digits.bytes().all(|b| b.is_ascii_digit());

    if well_formed {
        Ok(())
    } else {
        Err(LedgerError::InvalidPhone(phone_number.to_string()))
    }
}

// ============================================================================
// TESTS
// ============================================================================
