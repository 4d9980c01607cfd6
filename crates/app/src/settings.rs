//! Handles settings for the application. Configuration is read from
//! `settings.toml` (optional) and `CASHBOX__*` environment variables, e.g.
//! `CASHBOX__LEDGER__EGRESS_POLICY=allow_negative`.
use config::{Config, ConfigError, Environment, File};
use engine::{EgressPolicy, RegisterScope};
use serde::Deserialize;

const DEFAULT_SETTINGS: &str = "settings";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Database {
    Memory,
    Sqlite(String),
}

impl Default for Database {
    fn default() -> Self {
        Self::Sqlite("cashbox.db".to_string())
    }
}

impl Database {
    pub fn url(&self) -> String {
        match self {
            Self::Memory => String::from("sqlite::memory:"),
            Self::Sqlite(path) => format!("sqlite:{path}?mode=rwc"),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct App {
    pub level: String,
}

impl Default for App {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Ledger {
    pub egress_policy: EgressPolicy,
    pub register_scope: RegisterScope,
    /// Decimal string, e.g. `"100.00"`.
    pub default_tolerance: String,
    /// Identity recorded in the audit log for CLI actions.
    pub actor: String,
}

impl Default for Ledger {
    fn default() -> Self {
        Self {
            egress_policy: EgressPolicy::default(),
            register_scope: RegisterScope::default(),
            default_tolerance: "100.00".to_string(),
            actor: "admin".to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub app: App,
    pub database: Database,
    pub ledger: Ledger,
}

impl Settings {
    pub fn new(path: Option<&str>) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::with_name(path.unwrap_or(DEFAULT_SETTINGS)).required(false))
            .add_source(Environment::with_prefix("CASHBOX").separator("__"))
            .build()?;

        settings.try_deserialize()
    }
}
