// 📂 CSV seed import and journal export
//
// accounts.csv: account_id,holder_name,card_number,pin,balance[,phone_number,card_expires_on]
//   (phone_number and card_expires_on, a YYYY-MM-DD date, are optional)
// machines.csv: machine_id,location,current_balance,minimum_balance,denomination
//   (minimum_balance and denomination may be empty)

use crate::entities::{Account, AtmMachine};
use crate::error::LedgerError;
use crate::ledger::AccountLedger;
use crate::store::LedgerStore;
use crate::transaction::Transaction;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct AccountSeed {
    account_id: String,
    holder_name: String,
    card_number: String,
    pin: String,
    balance: Decimal,
    #[serde(default)]
    phone_number: Option<String>,
    #[serde(default)]
    card_expires_on: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
struct MachineSeed {
    machine_id: String,
    location: String,
    current_balance: Decimal,
    minimum_balance: Option<Decimal>,
    denomination: Option<Decimal>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub inserted: usize,
    pub duplicates: usize,
}

pub fn read_accounts<R: Read>(reader: R) -> Result<Vec<Account>> {
    let mut rdr = csv::Reader::from_reader(reader);
    let mut accounts = Vec::new();

    for (line, result) in rdr.deserialize().enumerate() {
        let seed: AccountSeed = result.context("Failed to deserialize account")?;
        let context = || format!("Invalid account on data line {}", line + 1);

        let mut account = Account::open(
            &seed.account_id,
            &seed.holder_name,
            &seed.card_number,
            &seed.pin,
            seed.balance,
        )
        .with_context(context)?;
        if let Some(phone) = seed.phone_number.as_deref() {
            account = account.with_phone_number(phone).with_context(context)?;
        }
        if let Some(expires_on) = seed.card_expires_on {
            account = account.with_card_expiry(expires_on);
        }
        accounts.push(account);
    }

    Ok(accounts)
}

pub fn read_machines<R: Read>(
    reader: R,
    default_minimum_balance: Decimal,
) -> Result<Vec<AtmMachine>> {
    let mut rdr = csv::Reader::from_reader(reader);
    let mut machines = Vec::new();

    for (line, result) in rdr.deserialize().enumerate() {
        let seed: MachineSeed = result.context("Failed to deserialize machine")?;
        let context = || format!("Invalid machine on data line {}", line + 1);

        let mut machine = AtmMachine::install(
            &seed.machine_id,
            &seed.location,
            seed.current_balance,
            seed.minimum_balance.unwrap_or(default_minimum_balance),
        )
        .with_context(context)?;
        if let Some(note) = seed.denomination {
            machine = machine.with_denomination(note).with_context(context)?;
        }
        machines.push(machine);
    }

    Ok(machines)
}

pub fn import_accounts<S: LedgerStore>(
    ledger: &AccountLedger<S>,
    csv_path: &Path,
) -> Result<ImportSummary> {
    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("Failed to open CSV file {}", csv_path.display()))?;
    let accounts = read_accounts(file)?;

    let mut summary = ImportSummary::default();
    for account in &accounts {
        match ledger.open_account(account) {
            Ok(()) => summary.inserted += 1,
            Err(LedgerError::DuplicateEntity { id, .. }) => {
                warn!(account = %id, "account already registered, skipped");
                summary.duplicates += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    info!(inserted = summary.inserted, duplicates = summary.duplicates, "accounts imported");
    Ok(summary)
}

pub fn import_machines<S: LedgerStore>(
    ledger: &AccountLedger<S>,
    csv_path: &Path,
    default_minimum_balance: Decimal,
) -> Result<ImportSummary> {
    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("Failed to open CSV file {}", csv_path.display()))?;
    let machines = read_machines(file, default_minimum_balance)?;

    let mut summary = ImportSummary::default();
    for machine in &machines {
        match ledger.install_machine(machine) {
            Ok(()) => summary.inserted += 1,
            Err(LedgerError::DuplicateEntity { id, .. }) => {
                warn!(machine = %id, "machine already registered, skipped");
                summary.duplicates += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    info!(inserted = summary.inserted, duplicates = summary.duplicates, "machines imported");
    Ok(summary)
}

// ============================================================================
// JOURNAL EXPORT
// ============================================================================

#[derive(Debug, Serialize)]
struct JournalRow<'a> {
    id: u64,
    timestamp: String,
    transaction_type: &'static str,
    account_id: &'a str,
    machine_id: &'a str,
    amount: String,
    status: &'static str,
    response_code: &'static str,
    correlation_id: &'a str,
    leg: &'static str,
    metadata: String,
}

impl<'a> JournalRow<'a> {
    fn from_transaction(tx: &'a Transaction) -> Result<Self> {
        Ok(JournalRow {
            id: tx.id,
            timestamp: tx.timestamp.to_rfc3339(),
            transaction_type: tx.transaction_type.as_str(),
            account_id: tx.account_id.as_deref().unwrap_or(""),
            machine_id: tx.machine_id.as_deref().unwrap_or(""),
            amount: tx.amount.to_string(),
            status: tx.status.as_str(),
            response_code: tx.response_code.as_str(),
            correlation_id: tx.correlation_id.as_deref().unwrap_or(""),
            leg: tx.leg.map(|l| l.as_str()).unwrap_or(""),
            metadata: if tx.metadata.is_empty() {
                String::new()
            } else {
                serde_json::to_string(&tx.metadata)?
            },
        })
    }
}

/// Write transactions as CSV, one row each. Returns the row count.
pub fn write_journal<W: Write>(writer: W, transactions: &[Transaction]) -> Result<usize> {
    let mut wtr = csv::Writer::from_writer(writer);
    for tx in transactions {
        wtr.serialize(JournalRow::from_transaction(tx)?)?;
    }
    wtr.flush()?;
    Ok(transactions.len())
}

pub fn export_journal<S: LedgerStore>(store: &S, csv_path: &Path) -> Result<usize> {
    let transactions = store.all_transactions()?;
    let file = std::fs::File::create(csv_path)
        .with_context(|| format!("Failed to create {}", csv_path.display()))?;
    let written = write_journal(file, &transactions)?;
    info!(rows = written, path = %csv_path.display(), "journal exported");
    Ok(written)
}
