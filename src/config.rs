// ⚙️ Configuration - JSON file with defaults, CLI flags override

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// SQLite database file
    pub database_path: PathBuf,

    /// Threshold applied to machines installed without one
    pub default_minimum_balance: Decimal,

    /// `tracing` filter used when RUST_LOG is unset
    pub log_level: String,

    /// Actor recorded on refills and administrative events
    pub operator: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            database_path: PathBuf::from("atm-ledger.db"),
            default_minimum_balance: Decimal::new(200, 0),
            log_level: "info".to_string(),
            operator: "operator".to_string(),
        }
    }
}

impl LedgerConfig {
    /// Read a JSON config file; missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("Invalid config {}", path.display()))
    }

    /// `load` when a path is given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}
