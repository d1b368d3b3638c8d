// Entity Models
//
// Each entity has:
// - Stable identity (account number / machine UID) that NEVER changes
// - Values (balance, status, PIN) that only the ledger mutates

pub mod account;
pub mod machine;

pub use account::{mask_card_number, validate_phone_number, Account, AccountStatus};
pub use machine::{AtmMachine, MachineStatus};
