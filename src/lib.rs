// ATM Ledger - Core Library
// Exposes all modules for use in the CLI, a request-handling layer, and tests

pub mod audit;
pub mod config;
pub mod entities;
pub mod error;
pub mod import;
pub mod ledger;
pub mod locks;
pub mod logging;
pub mod money;
pub mod pin;
pub mod store;
pub mod transaction;

// Re-export commonly used types
pub use audit::{AuditAction, AuditEntity, AuditEvent};
pub use config::LedgerConfig;
pub use entities::{Account, AccountStatus, AtmMachine, MachineStatus};
pub use error::{LedgerError, LedgerResult};
pub use import::{export_journal, import_accounts, import_machines, ImportSummary};
pub use ledger::{AccountLedger, TransferReceipt};
pub use store::{Changeset, LedgerStore, MemoryStore, SqliteStore};
pub use transaction::{
    NewTransaction, ResponseCode, Transaction, TransactionStatus, TransactionType, TransferLeg,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
