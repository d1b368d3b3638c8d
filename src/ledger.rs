// 🏦 Account Ledger - Keeps balances, machine cash and the log consistent
//
// Every operation follows the same shape:
//   1. lock the entities it touches (fixed global order, see locks.rs)
//   2. load them from the store
//   3. plan the change as a Changeset, or fail with a LedgerError
//   4. commit the Changeset atomically (or a failed record on a decline)
//
// Because planning happens under the entity locks, the check-then-act in
// `withdraw` and `transfer` cannot interleave with another operation on the
// same account or machine.

use crate::audit::AuditEvent;
use crate::entities::{Account, AccountStatus, AtmMachine, MachineStatus};
use crate::error::{LedgerError, LedgerResult};
use crate::locks::{EntityKey, LockTable};
use crate::money::{checked_credit, checked_debit, validate_amount};
use crate::pin::PinHash;
use crate::store::{Changeset, LedgerStore};
use crate::transaction::{NewTransaction, ResponseCode, Transaction, TransactionType, TransferLeg};
use anyhow::anyhow;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, instrument, warn};

/// Both legs of a completed transfer.
#[derive(Debug, Clone, Serialize)]
pub struct TransferReceipt {
    pub correlation_id: String,
    pub debit: Transaction,
    pub credit: Transaction,
}

pub struct AccountLedger<S: LedgerStore> {
    store: S,
    locks: LockTable,
}

impl<S: LedgerStore> AccountLedger<S> {
    pub fn new(store: S) -> Self {
        AccountLedger {
            store,
            locks: LockTable::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // ========================================================================
    // REGISTRATION
    // ========================================================================

    pub fn open_account(&self, account: &Account) -> LedgerResult<()> {
        self.store.insert_account(account)?;
        info!(account = %account.id, card = %account.masked_card_number(), "account opened");
        Ok(())
    }

    pub fn install_machine(&self, machine: &AtmMachine) -> LedgerResult<()> {
        self.store.insert_machine(machine)?;
        info!(machine = %machine.id, location = %machine.location, "machine installed");
        Ok(())
    }

    // ========================================================================
    // CASH WITHDRAWAL
    // ========================================================================

    /// Dispense `amount` at a machine, debiting the account.
    ///
    /// The machine drops to `Low` when the remaining cash falls below its
    /// minimum balance.
    #[instrument(skip(self))]
    pub fn withdraw(
        &self,
        account_id: &str,
        machine_id: &str,
        amount: Decimal,
    ) -> LedgerResult<Transaction> {
        let handles = self
            .locks
            .handles(&[EntityKey::account(account_id), EntityKey::machine(machine_id)]);
        let _guards = handles.lock();

        let account = self.require_account(account_id)?;
        let machine = self.require_machine(machine_id)?;
        let now = Utc::now();

        let attempt = plan_withdrawal(account, machine, amount, now);
        let recorded = self.settle(attempt, |code| {
            NewTransaction::new(TransactionType::Withdrawal, amount, now)
                .account(account_id)
                .machine(machine_id)
                .declined(code)
        })?;

        let tx = single(recorded)?;
        info!(tx_id = tx.id, "withdrawal approved");
        Ok(tx)
    }

    // ========================================================================
    // MACHINE REFILL
    // ========================================================================

    /// Load cash into a machine. A closed machine stays closed.
    #[instrument(skip(self))]
    pub fn refill(
        &self,
        machine_id: &str,
        amount: Decimal,
        operator: &str,
    ) -> LedgerResult<Transaction> {
        let handles = self.locks.handles(&[EntityKey::machine(machine_id)]);
        let _guards = handles.lock();

        let machine = self.require_machine(machine_id)?;
        let now = Utc::now();

        let attempt = plan_refill(machine, amount, operator, now);
        let recorded = self.settle(attempt, |code| {
            NewTransaction::new(TransactionType::Refill, amount, now)
                .machine(machine_id)
                .with_metadata("operator", json!(operator))
                .declined(code)
        })?;

        let tx = single(recorded)?;
        info!(tx_id = tx.id, "machine refilled");
        Ok(tx)
    }

    // ========================================================================
    // PIN CHANGE
    // ========================================================================

    #[instrument(skip(self, old_pin, new_pin))]
    pub fn change_pin(
        &self,
        account_id: &str,
        old_pin: &str,
        new_pin: &str,
    ) -> LedgerResult<Transaction> {
        let handles = self.locks.handles(&[EntityKey::account(account_id)]);
        let _guards = handles.lock();

        let account = self.require_account(account_id)?;
        let now = Utc::now();

        let attempt = plan_pin_change(account, old_pin, new_pin, now);
        let recorded = self.settle(attempt, |code| {
            NewTransaction::new(TransactionType::PinChange, Decimal::ZERO, now)
                .account(account_id)
                .declined(code)
        })?;

        let tx = single(recorded)?;
        info!(tx_id = tx.id, "PIN changed");
        Ok(tx)
    }

    // ========================================================================
    // PHONE CHANGE
    // ========================================================================

    /// Replace the contact phone number, authorised by the account PIN.
    #[instrument(skip(self, pin, new_phone))]
    pub fn change_phone(
        &self,
        account_id: &str,
        pin: &str,
        new_phone: &str,
    ) -> LedgerResult<Transaction> {
        let handles = self.locks.handles(&[EntityKey::account(account_id)]);
        let _guards = handles.lock();

        let account = self.require_account(account_id)?;
        let now = Utc::now();

        let attempt = plan_phone_change(account, pin, new_phone, now);
        let recorded = self.settle(attempt, |code| {
            NewTransaction::new(TransactionType::PhoneChange, Decimal::ZERO, now)
                .account(account_id)
                .declined(code)
        })?;

        let tx = single(recorded)?;
        info!(tx_id = tx.id, "phone number changed");
        Ok(tx)
    }

    // ========================================================================
    // TRANSFER
    // ========================================================================

    /// Move `amount` between two accounts, recording a debit and a credit
    /// leg that share one correlation id.
    #[instrument(skip(self))]
    pub fn transfer(
        &self,
        source_id: &str,
        destination_id: &str,
        amount: Decimal,
    ) -> LedgerResult<TransferReceipt> {
        let handles = self
            .locks
            .handles(&[EntityKey::account(source_id), EntityKey::account(destination_id)]);
        let _guards = handles.lock();

        let source = self.require_account(source_id)?;
        let now = Utc::now();
        let declined = |code: ResponseCode| {
            NewTransaction::new(TransactionType::Transfer, amount, now)
                .account(source_id)
                .with_metadata("counterparty", json!(destination_id))
                .declined(code)
        };

        if source_id == destination_id {
            let err = LedgerError::SelfTransfer(source_id.to_string());
            return Err(self.decline(err, declined));
        }
        let destination = self.require_account(destination_id)?;

        let correlation_id = uuid::Uuid::new_v4().to_string();
        let attempt = plan_transfer(source, destination, amount, &correlation_id, now);
        let recorded = self.settle(attempt, declined)?;

        let mut legs = recorded.into_iter();
        let (debit, credit) = match (legs.next(), legs.next()) {
            (Some(debit), Some(credit)) => (debit, credit),
            _ => return Err(anyhow!("transfer commit returned fewer than two legs").into()),
        };

        info!(%correlation_id, debit_id = debit.id, credit_id = credit.id, "transfer completed");
        Ok(TransferReceipt {
            correlation_id,
            debit,
            credit,
        })
    }

    // ========================================================================
    // ENQUIRIES
    // ========================================================================

    pub fn balance_enquiry(&self, account_id: &str) -> LedgerResult<Decimal> {
        let account = self.require_account(account_id)?;
        if !account.is_active() {
            return Err(LedgerError::AccountInactive(account.id));
        }
        Ok(account.balance)
    }

    /// The `limit` most recent transactions on an account, newest first.
    pub fn mini_statement(&self, account_id: &str, limit: usize) -> LedgerResult<Vec<Transaction>> {
        self.require_account(account_id)?;
        Ok(self.store.transactions_for_account(account_id, limit)?)
    }

    // ========================================================================
    // ADMINISTRATION
    // ========================================================================

    #[instrument(skip(self))]
    pub fn close_account(&self, account_id: &str, actor: &str) -> LedgerResult<Account> {
        let handles = self.locks.handles(&[EntityKey::account(account_id)]);
        let _guards = handles.lock();

        let mut account = self.require_account(account_id)?;
        let previous = account.status;
        account.status = AccountStatus::Inactive;

        let event = AuditEvent::account_closed(account_id, previous, account.balance, actor);
        self.store
            .commit(Changeset::default().account(account.clone()).event(event))?;

        info!("account closed");
        Ok(account)
    }

    #[instrument(skip(self))]
    pub fn close_machine(&self, machine_id: &str, actor: &str) -> LedgerResult<AtmMachine> {
        self.set_machine_status(machine_id, actor, |_| MachineStatus::Closed)
    }

    /// Put a machine back in service; Available or Low follows its cash.
    #[instrument(skip(self))]
    pub fn reopen_machine(&self, machine_id: &str, actor: &str) -> LedgerResult<AtmMachine> {
        self.set_machine_status(machine_id, actor, AtmMachine::cash_status)
    }

    fn set_machine_status<F>(
        &self,
        machine_id: &str,
        actor: &str,
        next: F,
    ) -> LedgerResult<AtmMachine>
    where
        F: FnOnce(&AtmMachine) -> MachineStatus,
    {
        let handles = self.locks.handles(&[EntityKey::machine(machine_id)]);
        let _guards = handles.lock();

        let mut machine = self.require_machine(machine_id)?;
        let previous = machine.status;
        machine.status = next(&machine);

        let event = AuditEvent::machine_status_changed(machine_id, previous, machine.status, actor);
        self.store
            .commit(Changeset::default().machine(machine.clone()).event(event))?;

        info!(from = previous.as_str(), to = machine.status.as_str(), "machine status changed");
        Ok(machine)
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    fn require_account(&self, id: &str) -> LedgerResult<Account> {
        self.store
            .load_account(id)?
            .ok_or_else(|| LedgerError::UnknownAccount(id.to_string()))
    }

    fn require_machine(&self, id: &str) -> LedgerResult<AtmMachine> {
        self.store
            .load_machine(id)?
            .ok_or_else(|| LedgerError::UnknownMachine(id.to_string()))
    }

    /// Commit a planned change, or record the decline and pass the error on.
    fn settle<F>(
        &self,
        attempt: LedgerResult<Changeset>,
        declined: F,
    ) -> LedgerResult<Vec<Transaction>>
    where
        F: FnOnce(ResponseCode) -> NewTransaction,
    {
        match attempt {
            Ok(changes) => Ok(self.store.commit(changes)?),
            Err(err) => Err(self.decline(err, declined)),
        }
    }

    /// The caller always gets the business error back, even when the
    /// failed record itself could not be written.
    fn decline<F>(&self, err: LedgerError, declined: F) -> LedgerError
    where
        F: FnOnce(ResponseCode) -> NewTransaction,
    {
        if !err.is_business() {
            return err;
        }
        let code = err.response_code();
        warn!(%code, error = %err, "operation declined");
        if let Err(storage) = self.store.commit(Changeset::default().record(declined(code))) {
            error!(%code, error = ?storage, "failed to record declined operation");
        }
        err
    }
}

fn single(recorded: Vec<Transaction>) -> LedgerResult<Transaction> {
    recorded
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("commit returned no transaction").into())
}

// ============================================================================
// PLANNING (pure: entity values in, Changeset out)
// ============================================================================

fn plan_withdrawal(
    mut account: Account,
    mut machine: AtmMachine,
    amount: Decimal,
    now: DateTime<Utc>,
) -> LedgerResult<Changeset> {
    validate_amount(amount)?;
    if !account.is_active() {
        return Err(LedgerError::AccountInactive(account.id));
    }
    if let Some(expired_on) = account.card_expires_on.filter(|_| account.card_expired_at(now)) {
        return Err(LedgerError::CardExpired {
            account_id: account.id,
            expired_on,
        });
    }
    if machine.is_closed() {
        return Err(LedgerError::MachineClosed(machine.id));
    }
    machine.check_denomination(amount)?;
    if !account.can_cover(amount) {
        return Err(LedgerError::InsufficientFunds {
            available: account.balance,
            requested: amount,
        });
    }
    if machine.current_balance < amount {
        return Err(LedgerError::MachineCashUnavailable {
            machine_id: machine.id,
            available: machine.current_balance,
            requested: amount,
        });
    }

    account.balance = checked_debit(account.balance, amount)?;
    machine.current_balance = checked_debit(machine.current_balance, amount)?;
    if machine.current_balance < machine.minimum_balance {
        machine.status = MachineStatus::Low;
    }

    let tx = NewTransaction::new(TransactionType::Withdrawal, amount, now)
        .account(&account.id)
        .machine(&machine.id);

    Ok(Changeset::default().account(account).machine(machine).record(tx))
}

fn plan_refill(
    mut machine: AtmMachine,
    amount: Decimal,
    operator: &str,
    now: DateTime<Utc>,
) -> LedgerResult<Changeset> {
    validate_amount(amount)?;

    let previous_balance = machine.current_balance;
    machine.current_balance = checked_credit(machine.current_balance, amount)?;
    machine.last_refill_at = Some(now);
    if !machine.is_closed() {
        machine.status = machine.cash_status();
    }

    let tx = NewTransaction::new(TransactionType::Refill, amount, now)
        .machine(&machine.id)
        .with_metadata("operator", json!(operator))
        .with_metadata("previous_balance", json!(previous_balance.to_string()))
        .with_metadata("new_balance", json!(machine.current_balance.to_string()));

    Ok(Changeset::default().machine(machine).record(tx))
}

fn plan_pin_change(
    mut account: Account,
    old_pin: &str,
    new_pin: &str,
    now: DateTime<Utc>,
) -> LedgerResult<Changeset> {
    if !account.is_active() {
        return Err(LedgerError::AccountInactive(account.id));
    }
    if !account.pin.verify(old_pin) {
        return Err(LedgerError::AuthenticationFailed(account.id));
    }
    account.pin = PinHash::new(new_pin)?;

    let tx =
        NewTransaction::new(TransactionType::PinChange, Decimal::ZERO, now).account(&account.id);
    Ok(Changeset::default().account(account).record(tx))
}

fn plan_phone_change(
    mut account: Account,
    pin: &str,
    new_phone: &str,
    now: DateTime<Utc>,
) -> LedgerResult<Changeset> {
    if !account.is_active() {
        return Err(LedgerError::AccountInactive(account.id));
    }
    if !account.pin.verify(pin) {
        return Err(LedgerError::AuthenticationFailed(account.id));
    }
    let had_phone = account.phone_number.is_some();
    account = account.with_phone_number(new_phone)?;

    let tx = NewTransaction::new(TransactionType::PhoneChange, Decimal::ZERO, now)
        .account(&account.id)
        .with_metadata("replaced_existing", json!(had_phone));
    Ok(Changeset::default().account(account).record(tx))
}

fn plan_transfer(
    mut source: Account,
    mut destination: Account,
    amount: Decimal,
    correlation_id: &str,
    now: DateTime<Utc>,
) -> LedgerResult<Changeset> {
    validate_amount(amount)?;
    if !source.is_active() {
        return Err(LedgerError::AccountInactive(source.id));
    }
    if !destination.is_active() {
        return Err(LedgerError::AccountInactive(destination.id));
    }
    if !source.can_cover(amount) {
        return Err(LedgerError::InsufficientFunds {
            available: source.balance,
            requested: amount,
        });
    }

    source.balance = checked_debit(source.balance, amount)?;
    destination.balance = checked_credit(destination.balance, amount)?;

    let debit = NewTransaction::new(TransactionType::Transfer, amount, now)
        .account(&source.id)
        .transfer_leg(correlation_id, TransferLeg::Debit)
        .with_metadata("counterparty", json!(destination.id));
    let credit = NewTransaction::new(TransactionType::Transfer, amount, now)
        .account(&destination.id)
        .transfer_leg(correlation_id, TransferLeg::Credit)
        .with_metadata("counterparty", json!(source.id));

    Ok(Changeset::default()
        .account(source)
        .account(destination)
        .record(debit)
        .record(credit))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditAction, AuditEntity};
    use crate::store::{MemoryStore, SqliteStore};
    use crate::transaction::TransactionStatus;
    use anyhow::bail;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use std::sync::Barrier;
    use std::thread;

    const ACC_A: &str = "1000000001";
    const ACC_B: &str = "1000000002";
    const ATM: &str = "ATM-001";

    fn ledger_with(
        balance_a: Decimal,
        balance_b: Decimal,
        cash: Decimal,
        minimum: Decimal,
    ) -> AccountLedger<MemoryStore> {
        let ledger = AccountLedger::new(MemoryStore::new());
        let a = Account::open(ACC_A, "Ada Obi", "4000123412341234", "1234", balance_a).unwrap();
        let b = Account::open(ACC_B, "Ben Eze", "4000567856785678", "5678", balance_b).unwrap();
        ledger.open_account(&a).unwrap();
        ledger.open_account(&b).unwrap();
        ledger
            .install_machine(&AtmMachine::install(ATM, "Main St", cash, minimum).unwrap())
            .unwrap();
        ledger
    }

    /// Memory store that refuses to write declined records.
    struct LogUnavailable(MemoryStore);

    impl LedgerStore for LogUnavailable {
        fn insert_account(&self, account: &Account) -> LedgerResult<()> {
            self.0.insert_account(account)
        }

        fn insert_machine(&self, machine: &AtmMachine) -> LedgerResult<()> {
            self.0.insert_machine(machine)
        }

        fn load_account(&self, id: &str) -> anyhow::Result<Option<Account>> {
            self.0.load_account(id)
        }

        fn load_machine(&self, id: &str) -> anyhow::Result<Option<AtmMachine>> {
            self.0.load_machine(id)
        }

        fn commit(&self, changes: Changeset) -> anyhow::Result<Vec<Transaction>> {
            if changes.transactions.iter().any(|t| t.status == TransactionStatus::Failed) {
                bail!("journal is read-only");
            }
            self.0.commit(changes)
        }

        fn transactions_for_account(
            &self,
            account_id: &str,
            limit: usize,
        ) -> anyhow::Result<Vec<Transaction>> {
            self.0.transactions_for_account(account_id, limit)
        }

        fn all_transactions(&self) -> anyhow::Result<Vec<Transaction>> {
            self.0.all_transactions()
        }

        fn events_for_entity(
            &self,
            entity: AuditEntity,
            entity_id: &str,
        ) -> anyhow::Result<Vec<AuditEvent>> {
            self.0.events_for_entity(entity, entity_id)
        }
    }

    fn balance(ledger: &AccountLedger<impl LedgerStore>, id: &str) -> Decimal {
        ledger.store().load_account(id).unwrap().unwrap().balance
    }

    fn machine(ledger: &AccountLedger<impl LedgerStore>) -> AtmMachine {
        ledger.store().load_machine(ATM).unwrap().unwrap()
    }

    fn successes(ledger: &AccountLedger<impl LedgerStore>) -> Vec<Transaction> {
        ledger
            .store()
            .all_transactions()
            .unwrap()
            .into_iter()
            .filter(|t| t.is_success())
            .collect()
    }

    // ------------------------------------------------------------------------
    // withdraw
    // ------------------------------------------------------------------------

    #[test]
    fn test_withdraw_debits_both_balances() {
        let ledger = ledger_with(dec!(500), dec!(0), dec!(1000), dec!(100));

        let tx = ledger.withdraw(ACC_A, ATM, dec!(120)).unwrap();

        assert_eq!(balance(&ledger, ACC_A), dec!(380));
        assert_eq!(machine(&ledger).current_balance, dec!(880));
        assert_eq!(tx.transaction_type, TransactionType::Withdrawal);
        assert_eq!(tx.response_code, ResponseCode::Approved);
        assert_eq!(tx.machine_id.as_deref(), Some(ATM));
        assert_eq!(successes(&ledger).len(), 1);
    }

    #[test]
    fn test_withdraw_more_than_balance_changes_nothing() {
        let ledger = ledger_with(dec!(100), dec!(0), dec!(1000), dec!(0));

        let err = ledger.withdraw(ACC_A, ATM, dec!(100.01)).unwrap_err();

        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
        assert_eq!(balance(&ledger, ACC_A), dec!(100));
        assert_eq!(machine(&ledger).current_balance, dec!(1000));

        let log = ledger.store().all_transactions().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].status, TransactionStatus::Failed);
        assert_eq!(log[0].response_code, ResponseCode::InsufficientFunds);
    }

    #[test]
    fn test_withdraw_more_than_machine_cash() {
        let ledger = ledger_with(dec!(1000), dec!(0), dec!(50), dec!(0));

        let err = ledger.withdraw(ACC_A, ATM, dec!(60)).unwrap_err();

        assert!(matches!(err, LedgerError::MachineCashUnavailable { .. }));
        assert_eq!(balance(&ledger, ACC_A), dec!(1000));
        assert_eq!(machine(&ledger).current_balance, dec!(50));
    }

    #[test]
    fn test_withdraw_marks_machine_low() {
        let ledger = ledger_with(dec!(1000), dec!(0), dec!(300), dec!(200));

        ledger.withdraw(ACC_A, ATM, dec!(100)).unwrap();
        assert_eq!(machine(&ledger).status, MachineStatus::Available);

        ledger.withdraw(ACC_A, ATM, dec!(0.01)).unwrap();
        assert_eq!(machine(&ledger).status, MachineStatus::Low);
    }

    #[test]
    fn test_withdraw_rejects_zero_and_unknowns() {
        let ledger = ledger_with(dec!(100), dec!(0), dec!(100), dec!(0));

        assert!(matches!(
            ledger.withdraw(ACC_A, ATM, dec!(0)),
            Err(LedgerError::InvalidAmount(_))
        ));
        assert!(matches!(
            ledger.withdraw("nobody", ATM, dec!(10)),
            Err(LedgerError::UnknownAccount(_))
        ));
        assert!(matches!(
            ledger.withdraw(ACC_A, "ATM-404", dec!(10)),
            Err(LedgerError::UnknownMachine(_))
        ));

        // Only the invalid amount against a known account is logged
        assert_eq!(ledger.store().all_transactions().unwrap().len(), 1);
    }

    #[test]
    fn test_withdraw_at_closed_machine() {
        let ledger = ledger_with(dec!(100), dec!(0), dec!(100), dec!(0));
        ledger.close_machine(ATM, "ops").unwrap();

        let err = ledger.withdraw(ACC_A, ATM, dec!(10)).unwrap_err();
        assert!(matches!(err, LedgerError::MachineClosed(_)));
        assert_eq!(err.response_code().as_str(), "91");
    }

    #[test]
    fn test_withdraw_respects_denomination() {
        let ledger = AccountLedger::new(MemoryStore::new());
        ledger
            .open_account(&Account::open(ACC_A, "Ada", "4000", "1234", dec!(500)).unwrap())
            .unwrap();
        let atm = AtmMachine::install(ATM, "Main St", dec!(1000), dec!(0))
            .unwrap()
            .with_denomination(dec!(20))
            .unwrap();
        ledger.install_machine(&atm).unwrap();

        assert!(matches!(
            ledger.withdraw(ACC_A, ATM, dec!(50)),
            Err(LedgerError::InvalidAmount(_))
        ));
        assert!(ledger.withdraw(ACC_A, ATM, dec!(60)).is_ok());
    }

    #[test]
    fn test_withdraw_with_expired_card() {
        let ledger = ledger_with(dec!(0), dec!(0), dec!(1000), dec!(0));
        let card = Account::open("2000000001", "Chi Okafor", "4000999999999999", "4321", dec!(500))
            .unwrap()
            .with_card_expiry(NaiveDate::from_ymd_opt(2020, 6, 30).unwrap());
        ledger.open_account(&card).unwrap();

        let err = ledger.withdraw("2000000001", ATM, dec!(50)).unwrap_err();

        assert!(matches!(err, LedgerError::CardExpired { .. }));
        assert_eq!(balance(&ledger, "2000000001"), dec!(500));
        assert_eq!(machine(&ledger).current_balance, dec!(1000));
        let log = ledger.store().all_transactions().unwrap();
        assert_eq!(log[0].response_code, ResponseCode::CardExpired);
    }

    #[test]
    fn test_concurrent_withdrawals_cannot_overdraw() {
        let ledger = ledger_with(dec!(100), dec!(0), dec!(1000), dec!(0));
        let barrier = Barrier::new(2);
        let (ledger_ref, barrier_ref) = (&ledger, &barrier);

        let results: Vec<LedgerResult<Transaction>> = thread::scope(|s| {
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    s.spawn(move || {
                        barrier_ref.wait();
                        ledger_ref.withdraw(ACC_A, ATM, dec!(60))
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let ok = results.iter().filter(|r| r.is_ok()).count();
        let insufficient = results
            .iter()
            .filter(|r| matches!(r, Err(LedgerError::InsufficientFunds { .. })))
            .count();
        assert_eq!(ok, 1);
        assert_eq!(insufficient, 1);
        assert_eq!(balance(&ledger, ACC_A), dec!(40));
        assert_eq!(machine(&ledger).current_balance, dec!(940));
    }

    #[test]
    fn test_many_concurrent_withdrawals_on_sqlite() {
        let ledger = AccountLedger::new(SqliteStore::open_in_memory().unwrap());
        ledger
            .open_account(&Account::open(ACC_A, "Ada", "4000", "1234", dec!(1000)).unwrap())
            .unwrap();
        ledger
            .install_machine(&AtmMachine::install(ATM, "Main St", dec!(700), dec!(0)).unwrap())
            .unwrap();
        let ledger_ref = &ledger;

        thread::scope(|s| {
            for _ in 0..10 {
                s.spawn(move || {
                    for _ in 0..10 {
                        let _ = ledger_ref.withdraw(ACC_A, ATM, dec!(10));
                    }
                });
            }
        });

        // Machine cash is the binding limit: exactly 70 withdrawals succeed
        assert_eq!(machine(&ledger).current_balance, dec!(0));
        assert_eq!(balance(&ledger, ACC_A), dec!(300));

        let log = ledger.store().all_transactions().unwrap();
        assert_eq!(log.len(), 100);
        assert_eq!(log.iter().filter(|t| t.is_success()).count(), 70);

        let mut ids: Vec<u64> = log.iter().map(|t| t.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 100, "transaction ids must be unique");
    }

    #[test]
    fn test_machine_cash_limits_withdrawals_from_many_accounts() {
        let ledger = AccountLedger::new(MemoryStore::new());
        let ids: Vec<String> = (0..10).map(|i| format!("30000000{:02}", i)).collect();
        for id in &ids {
            let account = Account::open(id, "Holder", "4000", "1234", dec!(1000)).unwrap();
            ledger.open_account(&account).unwrap();
        }
        ledger
            .install_machine(&AtmMachine::install(ATM, "Main St", dec!(500), dec!(0)).unwrap())
            .unwrap();
        let barrier = Barrier::new(ids.len());
        let (ledger_ref, barrier_ref) = (&ledger, &barrier);

        thread::scope(|s| {
            for id in &ids {
                s.spawn(move || {
                    barrier_ref.wait();
                    for _ in 0..10 {
                        let _ = ledger_ref.withdraw(id, ATM, dec!(20));
                    }
                });
            }
        });

        // 100 attempts of 20 against 500 in the machine: exactly 25 succeed
        let approved = successes(&ledger);
        assert_eq!(approved.len(), 25);
        assert_eq!(machine(&ledger).current_balance, dec!(0));

        let dispensed: Decimal = approved.iter().map(|t| t.amount).sum();
        assert_eq!(dispensed, dec!(500));
        let remaining: Decimal = ids.iter().map(|id| balance(&ledger, id)).sum();
        assert_eq!(remaining, dec!(9500));

        let cash_declines = ledger
            .store()
            .all_transactions()
            .unwrap()
            .into_iter()
            .filter(|t| t.response_code == ResponseCode::CashUnavailable)
            .count();
        assert_eq!(cash_declines, 75);
    }

    #[test]
    fn test_unknown_ids_leave_no_locks_behind() {
        let ledger = ledger_with(dec!(100), dec!(0), dec!(100), dec!(0));

        for i in 0..1000 {
            let _ = ledger.withdraw(&format!("nobody-{}", i), "ATM-404", dec!(1));
        }
        ledger.withdraw(ACC_A, ATM, dec!(10)).unwrap();
        ledger.transfer(ACC_A, ACC_B, dec!(10)).unwrap();

        assert!(ledger.locks.is_empty());
    }

    #[test]
    fn test_decline_survives_journal_failure() {
        let ledger = AccountLedger::new(LogUnavailable(MemoryStore::new()));
        let account = Account::open(ACC_A, "Ada", "4000", "1234", dec!(100)).unwrap();
        ledger.open_account(&account).unwrap();
        ledger
            .install_machine(&AtmMachine::install(ATM, "Main St", dec!(1000), dec!(0)).unwrap())
            .unwrap();

        let err = ledger.withdraw(ACC_A, ATM, dec!(500)).unwrap_err();

        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
        assert_eq!(err.response_code(), ResponseCode::InsufficientFunds);
        assert!(ledger.store().all_transactions().unwrap().is_empty());
    }

    // ------------------------------------------------------------------------
    // refill
    // ------------------------------------------------------------------------

    #[test]
    fn test_refill_restores_availability() {
        let ledger = ledger_with(dec!(0), dec!(0), dec!(100), dec!(200));
        assert_eq!(machine(&ledger).status, MachineStatus::Low);

        let tx = ledger.refill(ATM, dec!(500), "ops-team").unwrap();

        let m = machine(&ledger);
        assert_eq!(m.current_balance, dec!(600));
        assert_eq!(m.status, MachineStatus::Available);
        assert_eq!(m.last_refill_at, Some(tx.timestamp));
        assert_eq!(tx.transaction_type, TransactionType::Refill);
        assert!(tx.account_id.is_none());
        assert_eq!(tx.get_metadata("previous_balance"), Some(&json!("100")));
        assert_eq!(tx.get_metadata("operator"), Some(&json!("ops-team")));
    }

    #[test]
    fn test_refill_below_threshold_stays_low() {
        let ledger = ledger_with(dec!(0), dec!(0), dec!(0), dec!(1000));
        ledger.refill(ATM, dec!(400), "ops").unwrap();
        assert_eq!(machine(&ledger).status, MachineStatus::Low);
    }

    #[test]
    fn test_refill_rejects_non_positive() {
        let ledger = ledger_with(dec!(0), dec!(0), dec!(100), dec!(0));

        assert!(matches!(
            ledger.refill(ATM, dec!(0), "ops"),
            Err(LedgerError::InvalidAmount(_))
        ));
        assert!(matches!(
            ledger.refill(ATM, dec!(-5), "ops"),
            Err(LedgerError::InvalidAmount(_))
        ));
        assert_eq!(machine(&ledger).current_balance, dec!(100));
        assert!(successes(&ledger).is_empty());
    }

    #[test]
    fn test_refill_overflow_is_declined() {
        let ledger = ledger_with(dec!(0), dec!(0), dec!(100), dec!(0));

        let err = ledger.refill(ATM, Decimal::MAX, "ops").unwrap_err();

        assert!(matches!(err, LedgerError::InvalidAmount(_)));
        assert_eq!(machine(&ledger).current_balance, dec!(100));
        let log = ledger.store().all_transactions().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].response_code, ResponseCode::InvalidAmount);

        // the machine is still usable afterwards
        ledger.refill(ATM, dec!(50), "ops").unwrap();
        assert_eq!(machine(&ledger).current_balance, dec!(150));
    }

    #[test]
    fn test_refill_keeps_closed_machine_closed() {
        let ledger = ledger_with(dec!(0), dec!(0), dec!(0), dec!(100));
        ledger.close_machine(ATM, "ops").unwrap();

        ledger.refill(ATM, dec!(500), "ops").unwrap();
        assert_eq!(machine(&ledger).status, MachineStatus::Closed);

        let reopened = ledger.reopen_machine(ATM, "ops").unwrap();
        assert_eq!(reopened.status, MachineStatus::Available);
    }

    // ------------------------------------------------------------------------
    // change_pin
    // ------------------------------------------------------------------------

    #[test]
    fn test_change_pin() {
        let ledger = ledger_with(dec!(0), dec!(0), dec!(0), dec!(0));

        let tx = ledger.change_pin(ACC_A, "1234", "9876").unwrap();
        assert_eq!(tx.transaction_type, TransactionType::PinChange);

        let account = ledger.store().load_account(ACC_A).unwrap().unwrap();
        assert!(account.pin.verify("9876"));
        assert!(!account.pin.verify("1234"));
    }

    #[test]
    fn test_change_pin_wrong_old_pin() {
        let ledger = ledger_with(dec!(0), dec!(0), dec!(0), dec!(0));

        let err = ledger.change_pin(ACC_A, "0000", "9876").unwrap_err();
        assert!(matches!(err, LedgerError::AuthenticationFailed(_)));

        let account = ledger.store().load_account(ACC_A).unwrap().unwrap();
        assert!(account.pin.verify("1234"));

        let log = ledger.store().all_transactions().unwrap();
        assert_eq!(log[0].response_code, ResponseCode::IncorrectPin);
    }

    #[test]
    fn test_change_pin_invalid_new_pin() {
        let ledger = ledger_with(dec!(0), dec!(0), dec!(0), dec!(0));

        let err = ledger.change_pin(ACC_A, "1234", "98a6").unwrap_err();
        assert!(matches!(err, LedgerError::InvalidPin));
        let account = ledger.store().load_account(ACC_A).unwrap().unwrap();
        assert!(account.pin.verify("1234"));
    }

    // ------------------------------------------------------------------------
    // change_phone
    // ------------------------------------------------------------------------

    #[test]
    fn test_change_phone() {
        let ledger = ledger_with(dec!(0), dec!(0), dec!(0), dec!(0));

        let tx = ledger.change_phone(ACC_A, "1234", "+2348031234567").unwrap();

        assert_eq!(tx.transaction_type, TransactionType::PhoneChange);
        assert_eq!(tx.amount, Decimal::ZERO);
        assert_eq!(tx.get_metadata("replaced_existing"), Some(&json!(false)));
        let account = ledger.store().load_account(ACC_A).unwrap().unwrap();
        assert_eq!(account.phone_number.as_deref(), Some("+2348031234567"));
    }

    #[test]
    fn test_change_phone_failures_keep_old_number() {
        let ledger = ledger_with(dec!(0), dec!(0), dec!(0), dec!(0));
        ledger.change_phone(ACC_A, "1234", "08031234567").unwrap();

        let wrong_pin = ledger.change_phone(ACC_A, "0000", "08039999999").unwrap_err();
        assert!(matches!(wrong_pin, LedgerError::AuthenticationFailed(_)));

        let malformed = ledger.change_phone(ACC_A, "1234", "not a number").unwrap_err();
        assert!(matches!(malformed, LedgerError::InvalidPhone(_)));

        ledger.close_account(ACC_A, "branch").unwrap();
        let closed = ledger.change_phone(ACC_A, "1234", "08039999999").unwrap_err();
        assert!(matches!(closed, LedgerError::AccountInactive(_)));

        let account = ledger.store().load_account(ACC_A).unwrap().unwrap();
        assert_eq!(account.phone_number.as_deref(), Some("08031234567"));

        let codes: Vec<ResponseCode> = ledger
            .store()
            .all_transactions()
            .unwrap()
            .into_iter()
            .map(|t| t.response_code)
            .collect();
        assert_eq!(
            codes,
            vec![
                ResponseCode::Approved,
                ResponseCode::IncorrectPin,
                ResponseCode::InvalidPhoneFormat,
                ResponseCode::AccountInactive,
            ]
        );
    }

    // ------------------------------------------------------------------------
    // transfer
    // ------------------------------------------------------------------------

    #[test]
    fn test_transfer_links_two_legs() {
        let ledger = ledger_with(dec!(200), dec!(30), dec!(0), dec!(0));

        let receipt = ledger.transfer(ACC_A, ACC_B, dec!(50)).unwrap();

        assert_eq!(balance(&ledger, ACC_A), dec!(150));
        assert_eq!(balance(&ledger, ACC_B), dec!(80));
        assert_eq!(
            receipt.debit.correlation_id.as_deref(),
            Some(receipt.correlation_id.as_str())
        );
        assert_eq!(receipt.credit.correlation_id, receipt.debit.correlation_id);
        assert_eq!(receipt.debit.leg, Some(TransferLeg::Debit));
        assert_eq!(receipt.credit.leg, Some(TransferLeg::Credit));
        assert_eq!(receipt.debit.account_id.as_deref(), Some(ACC_A));
        assert_eq!(receipt.credit.account_id.as_deref(), Some(ACC_B));
        assert_ne!(receipt.debit.id, receipt.credit.id);
    }

    #[test]
    fn test_transfer_failures() {
        let ledger = ledger_with(dec!(20), dec!(0), dec!(0), dec!(0));

        assert!(matches!(
            ledger.transfer(ACC_A, ACC_B, dec!(50)),
            Err(LedgerError::InsufficientFunds { .. })
        ));
        assert!(matches!(
            ledger.transfer(ACC_A, "nobody", dec!(5)),
            Err(LedgerError::UnknownAccount(_))
        ));
        assert!(matches!(
            ledger.transfer(ACC_A, ACC_A, dec!(5)),
            Err(LedgerError::SelfTransfer(_))
        ));

        assert_eq!(balance(&ledger, ACC_A), dec!(20));
        assert_eq!(balance(&ledger, ACC_B), dec!(0));
        assert!(successes(&ledger).is_empty());
    }

    #[test]
    fn test_transfer_overflow_is_declined() {
        let ledger = ledger_with(Decimal::MAX, dec!(1), dec!(0), dec!(0));

        let err = ledger.transfer(ACC_A, ACC_B, Decimal::MAX).unwrap_err();

        assert!(matches!(err, LedgerError::InvalidAmount(_)));
        assert_eq!(balance(&ledger, ACC_A), Decimal::MAX);
        assert_eq!(balance(&ledger, ACC_B), dec!(1));
        assert!(successes(&ledger).is_empty());
    }

    #[test]
    fn test_transfer_to_closed_account() {
        let ledger = ledger_with(dec!(100), dec!(0), dec!(0), dec!(0));
        ledger.close_account(ACC_B, "branch").unwrap();

        assert!(matches!(
            ledger.transfer(ACC_A, ACC_B, dec!(10)),
            Err(LedgerError::AccountInactive(_))
        ));
        assert_eq!(balance(&ledger, ACC_A), dec!(100));
    }

    #[test]
    fn test_crossing_transfers_conserve_total() {
        let ledger = ledger_with(dec!(1000), dec!(1000), dec!(0), dec!(0));
        let ledger_ref = &ledger;

        thread::scope(|s| {
            for i in 0..4 {
                s.spawn(move || {
                    let (from, to) = if i % 2 == 0 { (ACC_A, ACC_B) } else { (ACC_B, ACC_A) };
                    for _ in 0..50 {
                        let _ = ledger_ref.transfer(from, to, dec!(7));
                    }
                });
            }
        });

        assert_eq!(balance(&ledger, ACC_A) + balance(&ledger, ACC_B), dec!(2000));
        assert_eq!(successes(&ledger).len() % 2, 0);
    }

    // ------------------------------------------------------------------------
    // enquiries & administration
    // ------------------------------------------------------------------------

    #[test]
    fn test_balance_enquiry_and_statement() {
        let ledger = ledger_with(dec!(300), dec!(0), dec!(1000), dec!(0));
        ledger.withdraw(ACC_A, ATM, dec!(40)).unwrap();
        ledger.transfer(ACC_A, ACC_B, dec!(10)).unwrap();

        assert_eq!(ledger.balance_enquiry(ACC_A).unwrap(), dec!(250));

        let statement = ledger.mini_statement(ACC_A, 5).unwrap();
        assert_eq!(statement.len(), 2);
        assert_eq!(statement[0].transaction_type, TransactionType::Transfer);
        assert_eq!(statement[1].transaction_type, TransactionType::Withdrawal);

        // Enquiries record nothing
        assert_eq!(ledger.store().all_transactions().unwrap().len(), 3);
        assert!(matches!(
            ledger.mini_statement("nobody", 5),
            Err(LedgerError::UnknownAccount(_))
        ));
    }

    #[test]
    fn test_close_account_blocks_operations() {
        let ledger = ledger_with(dec!(100), dec!(0), dec!(1000), dec!(0));

        let closed = ledger.close_account(ACC_A, "branch-7").unwrap();
        assert_eq!(closed.status, AccountStatus::Inactive);

        assert!(matches!(
            ledger.withdraw(ACC_A, ATM, dec!(10)),
            Err(LedgerError::AccountInactive(_))
        ));
        assert!(matches!(
            ledger.balance_enquiry(ACC_A),
            Err(LedgerError::AccountInactive(_))
        ));

        let events = ledger.store().events_for_entity(AuditEntity::Account, ACC_A).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, AuditAction::AccountClosed);
        assert_eq!(events[0].actor, "branch-7");
    }
}
