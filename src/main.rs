use anyhow::{Context, Result};
use atm_ledger::{
    export_journal, import_accounts, import_machines, logging, Account, AccountLedger, AtmMachine,
    LedgerConfig, LedgerError, LedgerStore, SqliteStore,
};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use rust_decimal::Decimal;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "atm-ledger", version, about = "ATM account and cash-machine ledger")]
struct Cli {
    /// JSON config file
    #[arg(long, env = "ATM_LEDGER_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database (overrides the config file)
    #[arg(long, env = "ATM_LEDGER_DB")]
    database: Option<PathBuf>,

    /// Actor recorded on refills and administrative changes
    #[arg(long)]
    operator: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the database schema
    Init,

    OpenAccount {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        card: String,
        #[arg(long)]
        pin: String,
        #[arg(long, default_value = "0")]
        balance: Decimal,
        #[arg(long)]
        phone: Option<String>,
        /// Last day the card is valid (YYYY-MM-DD)
        #[arg(long)]
        expires: Option<NaiveDate>,
    },

    InstallMachine {
        #[arg(long)]
        id: String,
        #[arg(long)]
        location: String,
        #[arg(long)]
        cash: Decimal,
        /// Defaults to `default_minimum_balance` from the config
        #[arg(long)]
        minimum: Option<Decimal>,
        #[arg(long)]
        denomination: Option<Decimal>,
    },

    ImportAccounts { csv: PathBuf },

    ImportMachines { csv: PathBuf },

    Withdraw {
        #[arg(long)]
        account: String,
        #[arg(long)]
        machine: String,
        #[arg(long)]
        amount: Decimal,
    },

    Refill {
        #[arg(long)]
        machine: String,
        #[arg(long)]
        amount: Decimal,
    },

    ChangePin {
        #[arg(long)]
        account: String,
        #[arg(long)]
        old: String,
        #[arg(long)]
        new: String,
    },

    ChangePhone {
        #[arg(long)]
        account: String,
        #[arg(long)]
        pin: String,
        #[arg(long)]
        phone: String,
    },

    Transfer {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: Decimal,
    },

    Balance {
        #[arg(long)]
        account: String,
    },

    Statement {
        #[arg(long)]
        account: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    CloseAccount {
        #[arg(long)]
        account: String,
    },

    MachineStatus {
        #[arg(long)]
        machine: String,
        action: MachineAction,
    },

    /// Write the whole transaction journal as CSV
    Export { csv: PathBuf },
}

#[derive(Clone, Copy, ValueEnum)]
enum MachineAction {
    Close,
    Reopen,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = LedgerConfig::load_or_default(cli.config.as_deref())?;
    if let Some(database) = cli.database.clone() {
        config.database_path = database;
    }
    if let Some(operator) = cli.operator.clone() {
        config.operator = operator;
    }
    logging::init(&config.log_level)?;

    let store = SqliteStore::open(&config.database_path)?;
    let ledger = AccountLedger::new(store);

    match run(&ledger, &config, cli.command) {
        Ok(()) => Ok(()),
        Err(e) => match e.downcast_ref::<LedgerError>() {
            Some(declined) if declined.is_business() => {
                eprintln!("❌ Declined [{}]: {}", declined.response_code(), declined);
                std::process::exit(2);
            }
            _ => Err(e),
        },
    }
}

fn run(ledger: &AccountLedger<SqliteStore>, config: &LedgerConfig, command: Command) -> Result<()> {
    match command {
        Command::Init => {
            println!("✓ Database ready at {}", config.database_path.display());
        }

        Command::OpenAccount { id, name, card, pin, balance, phone, expires } => {
            let mut account = Account::open(&id, &name, &card, &pin, balance)?;
            if let Some(phone) = phone {
                account = account.with_phone_number(&phone)?;
            }
            if let Some(expires) = expires {
                account = account.with_card_expiry(expires);
            }
            ledger.open_account(&account)?;
            println!("✓ Opened account {} ({})", account.id, account.masked_card_number());
        }

        Command::InstallMachine { id, location, cash, minimum, denomination } => {
            let minimum = minimum.unwrap_or(config.default_minimum_balance);
            let mut machine = AtmMachine::install(&id, &location, cash, minimum)?;
            if let Some(note) = denomination {
                machine = machine.with_denomination(note)?;
            }
            ledger.install_machine(&machine)?;
            println!(
                "✓ Installed machine {} at {} [{}]",
                machine.id,
                machine.location,
                machine.status.as_str()
            );
        }

        Command::ImportAccounts { csv } => {
            let summary = import_accounts(ledger, &csv)?;
            println!("✓ Inserted: {} accounts", summary.inserted);
            println!("✓ Skipped duplicates: {}", summary.duplicates);
        }

        Command::ImportMachines { csv } => {
            let summary = import_machines(ledger, &csv, config.default_minimum_balance)?;
            println!("✓ Inserted: {} machines", summary.inserted);
            println!("✓ Skipped duplicates: {}", summary.duplicates);
        }

        Command::Withdraw { account, machine, amount } => {
            let tx = ledger.withdraw(&account, &machine, amount)?;
            println!("✓ Dispensed {} (transaction #{})", tx.amount, tx.id);
            println!("  Balance: {}", ledger.balance_enquiry(&account)?);
        }

        Command::Refill { machine, amount } => {
            let tx = ledger.refill(&machine, amount, &config.operator)?;
            let machine = ledger
                .store()
                .load_machine(&machine)?
                .context("machine disappeared after refill")?;
            println!("✓ Refilled {} with {} (transaction #{})", machine.id, tx.amount, tx.id);
            println!("  Cash on hand: {} [{}]", machine.current_balance, machine.status.as_str());
        }

        Command::ChangePin { account, old, new } => {
            let tx = ledger.change_pin(&account, &old, &new)?;
            println!("✓ PIN changed (transaction #{})", tx.id);
        }

        Command::ChangePhone { account, pin, phone } => {
            let tx = ledger.change_phone(&account, &pin, &phone)?;
            println!("✓ Phone number changed (transaction #{})", tx.id);
        }

        Command::Transfer { from, to, amount } => {
            let receipt = ledger.transfer(&from, &to, amount)?;
            println!("✓ Transferred {} from {} to {}", amount, from, to);
            println!(
                "  Correlation {} (debit #{}, credit #{})",
                receipt.correlation_id, receipt.debit.id, receipt.credit.id
            );
        }

        Command::Balance { account } => {
            println!("{}", ledger.balance_enquiry(&account)?);
        }

        Command::Statement { account, limit } => {
            let transactions = ledger.mini_statement(&account, limit)?;
            println!("📊 Last {} transactions for {}", transactions.len(), account);
            for tx in transactions {
                println!(
                    "  #{:<6} {}  {:<10} {:>12}  {} ({})",
                    tx.id,
                    tx.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    tx.transaction_type.as_str(),
                    tx.amount,
                    tx.status.as_str(),
                    tx.response_code
                );
            }
        }

        Command::CloseAccount { account } => {
            ledger.close_account(&account, &config.operator)?;
            println!("✓ Account {} closed", account);
        }

        Command::MachineStatus { machine, action } => {
            let machine = match action {
                MachineAction::Close => ledger.close_machine(&machine, &config.operator)?,
                MachineAction::Reopen => ledger.reopen_machine(&machine, &config.operator)?,
            };
            println!("✓ Machine {} is now {}", machine.id, machine.status.as_str());
        }

        Command::Export { csv } => {
            let rows = export_journal(ledger.store(), &csv)?;
            println!("✓ Exported {} transactions to {}", rows, csv.display());
        }
    }

    Ok(())
}
