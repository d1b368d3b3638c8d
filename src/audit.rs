// 📜 Audit Events - administrative changes that move no money
//
// Closing an account or taking a machine out of service is recorded here
// instead of in the transaction log, in the same commit as the change.

use crate::entities::{AccountStatus, MachineStatus};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    AccountClosed,
    MachineStatusChanged,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::AccountClosed => "account_closed",
            AuditAction::MachineStatusChanged => "machine_status_changed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "account_closed" => Some(AuditAction::AccountClosed),
            "machine_status_changed" => Some(AuditAction::MachineStatusChanged),
            _ => None,
        }
    }
}

/// What kind of entity an event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditEntity {
    Account,
    Machine,
}

impl AuditEntity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEntity::Account => "account",
            AuditEntity::Machine => "machine",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "account" => Some(AuditEntity::Account),
            "machine" => Some(AuditEntity::Machine),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AuditEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    pub entity: AuditEntity,
    pub entity_id: String,

    /// Action-specific details (previous status, balance at closing, ...)
    pub data: serde_json::Value,

    /// Operator or branch that made the change
    pub actor: String,
}

impl AuditEvent {
    fn new(
        action: AuditAction,
        entity: AuditEntity,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        AuditEvent {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            action,
            entity,
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }

    pub fn account_closed(
        account_id: &str,
        previous: AccountStatus,
        balance: Decimal,
        actor: &str,
    ) -> Self {
        AuditEvent::new(
            AuditAction::AccountClosed,
            AuditEntity::Account,
            account_id,
            json!({ "previous_status": previous.as_str(), "balance": balance.to_string() }),
            actor,
        )
    }

    pub fn machine_status_changed(
        machine_id: &str,
        from: MachineStatus,
        to: MachineStatus,
        actor: &str,
    ) -> Self {
        AuditEvent::new(
            AuditAction::MachineStatusChanged,
            AuditEntity::Machine,
            machine_id,
            json!({ "from": from.as_str(), "to": to.as_str() }),
            actor,
        )
    }
}
