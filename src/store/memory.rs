// In-memory store: one mutex around all state, ids from a counter inside it.

use crate::audit::{AuditEntity, AuditEvent};
use crate::entities::{Account, AtmMachine};
use crate::error::{LedgerError, LedgerResult};
use crate::store::{Changeset, LedgerStore};
use crate::transaction::Transaction;
use anyhow::{anyhow, bail, Result};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct MemoryState {
    accounts: HashMap<String, Account>,
    machines: HashMap<String, AtmMachine>,
    transactions: Vec<Transaction>,
    events: Vec<AuditEvent>,
    next_id: u64,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }
}

impl LedgerStore for MemoryStore {
    fn insert_account(&self, account: &Account) -> LedgerResult<()> {
        let mut state = self.state()?;
        if state.accounts.contains_key(&account.id) {
            return Err(LedgerError::DuplicateEntity {
                entity: "account",
                id: account.id.clone(),
            });
        }
        state.accounts.insert(account.id.clone(), account.clone());
        Ok(())
    }

    fn insert_machine(&self, machine: &AtmMachine) -> LedgerResult<()> {
        let mut state = self.state()?;
        if state.machines.contains_key(&machine.id) {
            return Err(LedgerError::DuplicateEntity {
                entity: "machine",
                id: machine.id.clone(),
            });
        }
        state.machines.insert(machine.id.clone(), machine.clone());
        Ok(())
    }

    fn load_account(&self, id: &str) -> Result<Option<Account>> {
        Ok(self.state()?.accounts.get(id).cloned())
    }

    fn load_machine(&self, id: &str) -> Result<Option<AtmMachine>> {
        Ok(self.state()?.machines.get(id).cloned())
    }

    fn commit(&self, changes: Changeset) -> Result<Vec<Transaction>> {
        let mut state = self.state()?;

        // Validate before touching anything
        for account in &changes.accounts {
            if !state.accounts.contains_key(&account.id) {
                bail!("commit references unregistered account {}", account.id);
            }
        }
        for machine in &changes.machines {
            if !state.machines.contains_key(&machine.id) {
                bail!("commit references unregistered machine {}", machine.id);
            }
        }

        for account in changes.accounts {
            state.accounts.insert(account.id.clone(), account);
        }
        for machine in changes.machines {
            state.machines.insert(machine.id.clone(), machine);
        }

        let mut recorded = Vec::with_capacity(changes.transactions.len());
        for new_tx in changes.transactions {
            state.next_id += 1;
            let tx = new_tx.assign(state.next_id);
            state.transactions.push(tx.clone());
            recorded.push(tx);
        }
        state.events.extend(changes.events);

        Ok(recorded)
    }

    fn transactions_for_account(&self, account_id: &str, limit: usize) -> Result<Vec<Transaction>> {
        let state = self.state()?;
        Ok(state
            .transactions
            .iter()
            .rev()
            .filter(|tx| tx.account_id.as_deref() == Some(account_id))
            .take(limit)
            .cloned()
            .collect())
    }

    fn all_transactions(&self) -> Result<Vec<Transaction>> {
        Ok(self.state()?.transactions.clone())
    }

    fn events_for_entity(&self, entity: AuditEntity, entity_id: &str) -> Result<Vec<AuditEvent>> {
        let state = self.state()?;
        Ok(state
            .events
            .iter()
            .rev()
            .filter(|e| e.entity == entity && e.entity_id == entity_id)
            .cloned()
            .collect())
    }
}
