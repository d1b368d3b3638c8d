// 🗄️ Storage contract for the ledger
//
// The ledger never holds entities between calls: it loads them by id under
// its own per-entity locks, and hands every resulting change to `commit`,
// which must apply all of it or none of it.

pub mod memory;
pub mod sqlite;

use crate::audit::{AuditEntity, AuditEvent};
use crate::entities::{Account, AtmMachine};
use crate::error::LedgerResult;
use crate::transaction::{NewTransaction, Transaction};
use anyhow::Result;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Everything one ledger operation writes.
#[derive(Debug, Default, Clone)]
pub struct Changeset {
    pub accounts: Vec<Account>,
    pub machines: Vec<AtmMachine>,
    pub transactions: Vec<NewTransaction>,
    pub events: Vec<AuditEvent>,
}

impl Changeset {
    pub fn account(mut self, account: Account) -> Self {
        self.accounts.push(account);
        self
    }

    pub fn machine(mut self, machine: AtmMachine) -> Self {
        self.machines.push(machine);
        self
    }

    pub fn record(mut self, transaction: NewTransaction) -> Self {
        self.transactions.push(transaction);
        self
    }

    pub fn event(mut self, event: AuditEvent) -> Self {
        self.events.push(event);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
            && self.machines.is_empty()
            && self.transactions.is_empty()
            && self.events.is_empty()
    }
}

pub trait LedgerStore: Send + Sync {
    /// Register a new account. Fails with `DuplicateEntity` if the id exists.
    fn insert_account(&self, account: &Account) -> LedgerResult<()>;

    /// Register a new machine. Fails with `DuplicateEntity` if the id exists.
    fn insert_machine(&self, machine: &AtmMachine) -> LedgerResult<()>;

    fn load_account(&self, id: &str) -> Result<Option<Account>>;

    fn load_machine(&self, id: &str) -> Result<Option<AtmMachine>>;

    /// Apply updates to existing entities and append transactions and
    /// events atomically. Returns the transactions with their assigned ids,
    /// in changeset order.
    fn commit(&self, changes: Changeset) -> Result<Vec<Transaction>>;

    /// Most recent transactions referencing an account, newest first.
    fn transactions_for_account(&self, account_id: &str, limit: usize) -> Result<Vec<Transaction>>;

    /// The whole log, oldest first.
    fn all_transactions(&self) -> Result<Vec<Transaction>>;

    /// Audit events about one entity, newest first.
    fn events_for_entity(&self, entity: AuditEntity, entity_id: &str) -> Result<Vec<AuditEvent>>;
}
