// 🏧 ATM Machine Entity - Cash reserve with a low-water mark
//
// Status is derived from cash on hand vs. the minimum-balance threshold,
// except Closed, which only an operator sets or clears.

use crate::error::{LedgerError, LedgerResult};
use crate::money::{validate_amount, validate_balance};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ============================================================================
// MACHINE STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineStatus {
    /// Cash at or above the minimum balance
    Available,

    /// Cash below the minimum balance; still dispenses what it can
    Low,

    /// Out of service
    Closed,
}

impl MachineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MachineStatus::Available => "available",
            MachineStatus::Low => "low",
            MachineStatus::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "available" => Some(MachineStatus::Available),
            "low" => Some(MachineStatus::Low),
            "closed" => Some(MachineStatus::Closed),
            _ => None,
        }
    }
}

// ============================================================================
// MACHINE ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtmMachine {
    /// Machine UID
    pub id: String,

    /// Branch or street address
    pub location: String,

    pub current_balance: Decimal,

    /// Below this the machine is reported Low
    pub minimum_balance: Decimal,

    pub status: MachineStatus,

    pub last_refill_at: Option<DateTime<Utc>>,

    /// Smallest note the machine dispenses; None accepts any amount
    pub denomination: Option<Decimal>,
}

impl AtmMachine {
    pub fn install(
        id: &str,
        location: &str,
        current_balance: Decimal,
        minimum_balance: Decimal,
    ) -> LedgerResult<Self> {
        validate_balance(current_balance)?;
        validate_balance(minimum_balance)?;
        let mut machine = AtmMachine {
            id: id.to_string(),
            location: location.to_string(),
            current_balance,
            minimum_balance,
            status: MachineStatus::Available,
            last_refill_at: None,
            denomination: None,
        };
        machine.status = machine.cash_status();
        Ok(machine)
    }

    pub fn with_denomination(mut self, denomination: Decimal) -> LedgerResult<Self> {
        validate_amount(denomination)?;
        self.denomination = Some(denomination);
        Ok(self)
    }

    /// Available or Low, judged on cash alone.
    pub fn cash_status(&self) -> MachineStatus {
        if self.current_balance < self.minimum_balance {
            MachineStatus::Low
        } else {
            MachineStatus::Available
        }
    }

    pub fn is_closed(&self) -> bool {
        self.status == MachineStatus::Closed
    }

    /// Reject amounts the machine cannot make up from its notes.
    pub fn check_denomination(&self, amount: Decimal) -> LedgerResult<()> {
        match self.denomination {
            Some(note) if !(amount % note).is_zero() => Err(LedgerError::InvalidAmount(format!(
                "machine {} dispenses multiples of {}, got {}",
                self.id, note, amount
            ))),
            _ => Ok(()),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
