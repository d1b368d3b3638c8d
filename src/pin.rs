// 🔐 PIN handling - validate 4 digits, store only a salted SHA-256
//
// Stored form: "<salt>$<hex digest>" where digest = SHA-256(salt || pin).

use crate::error::{LedgerError, LedgerResult};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

pub const PIN_LENGTH: usize = 4;

/// Check that a PIN is exactly four ASCII digits.
pub fn validate_pin(pin: &str) -> LedgerResult<()> {
    if pin.len() == PIN_LENGTH && pin.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(LedgerError::InvalidPin)
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinHash {
    salt: String,
    digest: String,
}

impl PinHash {
    /// Hash a new PIN with a fresh random salt.
    pub fn new(pin: &str) -> LedgerResult<Self> {
        validate_pin(pin)?;
        let salt = uuid::Uuid::new_v4().simple().to_string();
        let digest = digest(&salt, pin);
        Ok(PinHash { salt, digest })
    }

    pub fn verify(&self, pin: &str) -> bool {
        let candidate = digest(&self.salt, pin);
        constant_time_eq(candidate.as_bytes(), self.digest.as_bytes())
    }

    pub fn to_stored(&self) -> String {
        format!("{}${}", self.salt, self.digest)
    }

    pub fn from_stored(stored: &str) -> Result<Self> {
        let (salt, digest) = stored
            .split_once('$')
            .ok_or_else(|| anyhow!("malformed stored PIN hash"))?;
        if salt.is_empty() || digest.len() != 64 {
            return Err(anyhow!("malformed stored PIN hash"));
        }
        Ok(PinHash {
            salt: salt.to_string(),
            digest: digest.to_string(),
        })
    }
}

// Never print the digest.
impl fmt::Debug for PinHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PinHash(..)")
    }
}

fn digest(salt: &str, pin: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(pin.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
