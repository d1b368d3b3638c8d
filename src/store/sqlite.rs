// SQLite store - WAL journal, one connection behind a mutex
//
// Decimals are stored as TEXT to keep them exact; timestamps as RFC 3339.
// `commit` runs inside a single SQLite transaction, and transaction ids come
// from AUTOINCREMENT, so they are unique and never reused.

use crate::audit::{AuditAction, AuditEntity, AuditEvent};
use crate::entities::{Account, AccountStatus, AtmMachine, MachineStatus};
use crate::error::{LedgerError, LedgerResult};
use crate::pin::PinHash;
use crate::store::{Changeset, LedgerStore};
use crate::transaction::{
    ResponseCode, Transaction, TransactionStatus, TransactionType, TransferLeg,
};
use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database file and make sure the schema exists.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        setup_database(&conn)?;
        debug!(path = %path.display(), "sqlite store opened");
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        setup_database(&conn)?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("sqlite connection lock poisoned"))
    }

    pub fn count_transactions(&self) -> Result<i64> {
        let conn = self.conn()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))?;
        Ok(count)
    }
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Accounts & Machines
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS accounts (
            id TEXT PRIMARY KEY,
            holder_name TEXT NOT NULL,
            card_number TEXT NOT NULL,
            card_expires_on TEXT,
            pin_hash TEXT NOT NULL,
            phone_number TEXT,
            balance TEXT NOT NULL,
            status TEXT NOT NULL,
            opened_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS machines (
            id TEXT PRIMARY KEY,
            location TEXT NOT NULL,
            current_balance TEXT NOT NULL,
            minimum_balance TEXT NOT NULL,
            status TEXT NOT NULL,
            last_refill_at TEXT,
            denomination TEXT
        )",
        [],
    )?;

    // ==========================================================================
    // Transactions Table (append-only journal)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            account_id TEXT,
            machine_id TEXT,
            transaction_type TEXT NOT NULL,
            amount TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            status TEXT NOT NULL,
            response_code TEXT NOT NULL,
            correlation_id TEXT,
            leg TEXT,
            metadata TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tx_account ON transactions(account_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tx_correlation ON transactions(correlation_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// ROW CONVERSION
// ============================================================================

fn parse_decimal(s: &str) -> Result<Decimal> {
    Decimal::from_str(s).with_context(|| format!("Bad decimal in database: {:?}", s))
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("Bad timestamp in database: {:?}", s))?
        .with_timezone(&Utc))
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("Bad date in database: {:?}", s))
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

struct AccountRow {
    id: String,
    holder_name: String,
    card_number: String,
    card_expires_on: Option<String>,
    pin_hash: String,
    phone_number: Option<String>,
    balance: String,
    status: String,
    opened_at: String,
}

impl AccountRow {
    fn into_account(self) -> Result<Account> {
        Ok(Account {
            card_expires_on: self.card_expires_on.as_deref().map(parse_date).transpose()?,
            pin: PinHash::from_stored(&self.pin_hash)?,
            balance: parse_decimal(&self.balance)?,
            status: AccountStatus::parse(&self.status)
                .ok_or_else(|| anyhow!("Bad account status {:?}", self.status))?,
            opened_at: parse_time(&self.opened_at)?,
            id: self.id,
            holder_name: self.holder_name,
            card_number: self.card_number,
            phone_number: self.phone_number,
        })
    }
}

struct MachineRow {
    id: String,
    location: String,
    current_balance: String,
    minimum_balance: String,
    status: String,
    last_refill_at: Option<String>,
    denomination: Option<String>,
}

impl MachineRow {
    fn into_machine(self) -> Result<AtmMachine> {
        Ok(AtmMachine {
            current_balance: parse_decimal(&self.current_balance)?,
            minimum_balance: parse_decimal(&self.minimum_balance)?,
            status: MachineStatus::parse(&self.status)
                .ok_or_else(|| anyhow!("Bad machine status {:?}", self.status))?,
            last_refill_at: self.last_refill_at.as_deref().map(parse_time).transpose()?,
            denomination: self.denomination.as_deref().map(parse_decimal).transpose()?,
            id: self.id,
            location: self.location,
        })
    }
}

struct TransactionRow {
    id: i64,
    account_id: Option<String>,
    machine_id: Option<String>,
    transaction_type: String,
    amount: String,
    timestamp: String,
    status: String,
    response_code: String,
    correlation_id: Option<String>,
    leg: Option<String>,
    metadata: Option<String>,
}

const TRANSACTION_COLUMNS: &str = "id, account_id, machine_id, transaction_type, amount, timestamp,
     status, response_code, correlation_id, leg, metadata";

impl TransactionRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(TransactionRow {
            id: row.get(0)?,
            account_id: row.get(1)?,
            machine_id: row.get(2)?,
            transaction_type: row.get(3)?,
            amount: row.get(4)?,
            timestamp: row.get(5)?,
            status: row.get(6)?,
            response_code: row.get(7)?,
            correlation_id: row.get(8)?,
            leg: row.get(9)?,
            metadata: row.get(10)?,
        })
    }

    fn into_transaction(self) -> Result<Transaction> {
        let metadata: HashMap<String, serde_json::Value> = match self.metadata {
            Some(json) => serde_json::from_str(&json).context("Bad transaction metadata")?,
            None => HashMap::new(),
        };
        let leg = match self.leg {
            Some(leg) => {
                Some(TransferLeg::parse(&leg).ok_or_else(|| anyhow!("Bad leg {:?}", leg))?)
            }
            None => None,
        };

        Ok(Transaction {
            id: u64::try_from(self.id).context("Negative transaction id")?,
            account_id: self.account_id,
            machine_id: self.machine_id,
            transaction_type: TransactionType::parse(&self.transaction_type)
                .ok_or_else(|| anyhow!("Bad transaction type {:?}", self.transaction_type))?,
            amount: parse_decimal(&self.amount)?,
            timestamp: parse_time(&self.timestamp)?,
            status: TransactionStatus::parse(&self.status)
                .ok_or_else(|| anyhow!("Bad transaction status {:?}", self.status))?,
            response_code: ResponseCode::parse(&self.response_code)
                .ok_or_else(|| anyhow!("Bad response code {:?}", self.response_code))?,
            correlation_id: self.correlation_id,
            leg,
            metadata,
        })
    }
}

// ============================================================================
// STORE IMPLEMENTATION
// ============================================================================

impl LedgerStore for SqliteStore {
    fn insert_account(&self, account: &Account) -> LedgerResult<()> {
        let conn = self.conn()?;
        let result = conn.execute(
            "INSERT INTO accounts (
                id, holder_name, card_number, card_expires_on, pin_hash, phone_number,
                balance, status, opened_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                account.id,
                account.holder_name,
                account.card_number,
                account.card_expires_on.map(|d| d.to_string()),
                account.pin.to_stored(),
                account.phone_number,
                account.balance.to_string(),
                account.status.as_str(),
                account.opened_at.to_rfc3339(),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_constraint_violation(&e) => Err(LedgerError::DuplicateEntity {
                entity: "account",
                id: account.id.clone(),
            }),
            Err(e) => Err(anyhow::Error::from(e).context("Failed to insert account").into()),
        }
    }

    fn insert_machine(&self, machine: &AtmMachine) -> LedgerResult<()> {
        let conn = self.conn()?;
        let result = conn.execute(
            "INSERT INTO machines (
                id, location, current_balance, minimum_balance, status, last_refill_at,
                denomination
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                machine.id,
                machine.location,
                machine.current_balance.to_string(),
                machine.minimum_balance.to_string(),
                machine.status.as_str(),
                machine.last_refill_at.map(|t| t.to_rfc3339()),
                machine.denomination.map(|d| d.to_string()),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_constraint_violation(&e) => Err(LedgerError::DuplicateEntity {
                entity: "machine",
                id: machine.id.clone(),
            }),
            Err(e) => Err(anyhow::Error::from(e).context("Failed to insert machine").into()),
        }
    }

    fn load_account(&self, id: &str) -> Result<Option<Account>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, holder_name, card_number, card_expires_on, pin_hash, phone_number,
                        balance, status, opened_at
                 FROM accounts WHERE id = ?1",
                [id],
                |row| {
                    Ok(AccountRow {
                        id: row.get(0)?,
                        holder_name: row.get(1)?,
                        card_number: row.get(2)?,
                        card_expires_on: row.get(3)?,
                        pin_hash: row.get(4)?,
                        phone_number: row.get(5)?,
                        balance: row.get(6)?,
                        status: row.get(7)?,
                        opened_at: row.get(8)?,
                    })
                },
            )
            .optional()?;

        row.map(AccountRow::into_account).transpose()
    }

    fn load_machine(&self, id: &str) -> Result<Option<AtmMachine>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, location, current_balance, minimum_balance, status, last_refill_at,
                        denomination
                 FROM machines WHERE id = ?1",
                [id],
                |row| {
                    Ok(MachineRow {
                        id: row.get(0)?,
                        location: row.get(1)?,
                        current_balance: row.get(2)?,
                        minimum_balance: row.get(3)?,
                        status: row.get(4)?,
                        last_refill_at: row.get(5)?,
                        denomination: row.get(6)?,
                    })
                },
            )
            .optional()?;

        row.map(MachineRow::into_machine).transpose()
    }

    fn commit(&self, changes: Changeset) -> Result<Vec<Transaction>> {
        if changes.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn()?;
        // Dropping `db` without commit rolls everything back
        let db = conn.transaction()?;

        for account in &changes.accounts {
            let updated = db.execute(
                "UPDATE accounts
                 SET holder_name = ?2, card_number = ?3, card_expires_on = ?4, pin_hash = ?5,
                     phone_number = ?6, balance = ?7, status = ?8
                 WHERE id = ?1",
                params![
                    account.id,
                    account.holder_name,
                    account.card_number,
                    account.card_expires_on.map(|d| d.to_string()),
                    account.pin.to_stored(),
                    account.phone_number,
                    account.balance.to_string(),
                    account.status.as_str(),
                ],
            )?;
            if updated != 1 {
                bail!("commit references unregistered account {}", account.id);
            }
        }

        for machine in &changes.machines {
            let updated = db.execute(
                "UPDATE machines
                 SET location = ?2, current_balance = ?3, minimum_balance = ?4, status = ?5,
                     last_refill_at = ?6, denomination = ?7
                 WHERE id = ?1",
                params![
                    machine.id,
                    machine.location,
                    machine.current_balance.to_string(),
                    machine.minimum_balance.to_string(),
                    machine.status.as_str(),
                    machine.last_refill_at.map(|t| t.to_rfc3339()),
                    machine.denomination.map(|d| d.to_string()),
                ],
            )?;
            if updated != 1 {
                bail!("commit references unregistered machine {}", machine.id);
            }
        }

        let mut recorded = Vec::with_capacity(changes.transactions.len());
        for new_tx in changes.transactions {
            let metadata_json = if new_tx.metadata.is_empty() {
                None
            } else {
                Some(serde_json::to_string(&new_tx.metadata)?)
            };

            db.execute(
                "INSERT INTO transactions (
                    account_id, machine_id, transaction_type, amount, timestamp,
                    status, response_code, correlation_id, leg, metadata
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    new_tx.account_id,
                    new_tx.machine_id,
                    new_tx.transaction_type.as_str(),
                    new_tx.amount.to_string(),
                    new_tx.timestamp.to_rfc3339(),
                    new_tx.status.as_str(),
                    new_tx.response_code.as_str(),
                    new_tx.correlation_id,
                    new_tx.leg.map(|l| l.as_str()),
                    metadata_json,
                ],
            )?;

            let id = u64::try_from(db.last_insert_rowid()).context("Negative rowid")?;
            recorded.push(new_tx.assign(id));
        }

        for event in &changes.events {
            db.execute(
                "INSERT INTO events (
                    event_id, timestamp, event_type, entity_type, entity_id, data, actor
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    event.event_id,
                    event.timestamp.to_rfc3339(),
                    event.action.as_str(),
                    event.entity.as_str(),
                    event.entity_id,
                    serde_json::to_string(&event.data)?,
                    event.actor,
                ],
            )?;
        }

        db.commit().context("Failed to commit ledger changes")?;
        Ok(recorded)
    }

    fn transactions_for_account(&self, account_id: &str, limit: usize) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM transactions WHERE account_id = ?1 ORDER BY id DESC LIMIT ?2",
            TRANSACTION_COLUMNS
        ))?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(params![account_id, limit], TransactionRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(TransactionRow::into_transaction).collect()
    }

    fn all_transactions(&self) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM transactions ORDER BY id ASC",
            TRANSACTION_COLUMNS
        ))?;

        let rows = stmt
            .query_map([], TransactionRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(TransactionRow::into_transaction).collect()
    }

    fn events_for_entity(&self, entity: AuditEntity, entity_id: &str) -> Result<Vec<AuditEvent>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
             FROM events
             WHERE entity_type = ?1 AND entity_id = ?2
             ORDER BY id DESC",
        )?;

        let rows = stmt
            .query_map(params![entity.as_str(), entity_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(event_id, timestamp, event_type, entity_type, entity_id, data, actor)| {
                Ok(AuditEvent {
                    event_id,
                    timestamp: parse_time(&timestamp)?,
                    action: AuditAction::parse(&event_type)
                        .ok_or_else(|| anyhow!("Bad event type {:?}", event_type))?,
                    entity: AuditEntity::parse(&entity_type)
                        .ok_or_else(|| anyhow!("Bad entity type {:?}", entity_type))?,
                    entity_id,
                    data: serde_json::from_str(&data).context("Bad event data")?,
                    actor,
                })
            })
            .collect()
    }
}
