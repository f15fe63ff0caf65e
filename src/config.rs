use rust_decimal::Decimal;

use crate::deposit::DEFAULT_DEPOSIT_THRESHOLD_PERCENT;
use crate::totals::DEFAULT_TAX_RATE;
use crate::units::DEFAULT_SMALL_WASTE_PERCENT;

/// Business constants that callers may tune per installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusinessRules {
    /// Minimum deposit (% of total) before inventory can be analyzed or committed
    pub deposit_threshold_percent: Decimal,
    /// IVA applied when an order includes tax
    pub tax_rate: Decimal,
    /// Offcuts below this % of a piece are suggested for discarding
    pub small_waste_percent: Decimal,
}

impl Default for BusinessRules {
    fn default() -> Self {
        Self {
            deposit_threshold_percent: DEFAULT_DEPOSIT_THRESHOLD_PERCENT,
            tax_rate: DEFAULT_TAX_RATE,
            small_waste_percent: DEFAULT_SMALL_WASTE_PERCENT,
        }
    }
}

/// Application configuration
///
/// # Environment variables
///
/// | Variable | Default | Meaning |
/// |----------|---------|---------|
/// | COTIZADOR_DB_PATH | cotizador.db | SQLite database file |
/// | LOG_LEVEL | info | tracing filter when RUST_LOG is unset |
/// | LOG_DIR | (none) | directory for daily rolling log files |
/// | DEPOSIT_THRESHOLD_PERCENT | 70 | deposit gate for inventory |
/// | TAX_RATE | 0.16 | IVA rate |
/// | SMALL_WASTE_PERCENT | 15 | small offcut threshold |
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: String,
    pub log_level: String,
    pub log_dir: Option<String>,
    pub rules: BusinessRules,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: "cotizador.db".into(),
            log_level: "info".into(),
            log_dir: None,
            rules: BusinessRules::default(),
        }
    }
}

fn env_decimal(key: &str) -> Option<Decimal> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

impl AppConfig {
    /// Load `.env` if present, then read the environment.
    pub fn load() -> Self {
        dotenv::dotenv().ok();
        Self::from_env()
    }

    /// Read configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let default_rules = defaults.rules;

        Self {
            db_path: std::env::var("COTIZADOR_DB_PATH").unwrap_or(defaults.db_path),
            log_level: std::env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_dir: std::env::var("LOG_DIR").ok().filter(|d| !d.is_empty()),
            rules: BusinessRules {
                deposit_threshold_percent: env_decimal("DEPOSIT_THRESHOLD_PERCENT")
                    .unwrap_or(default_rules.deposit_threshold_percent),
                tax_rate: env_decimal("TAX_RATE").unwrap_or(default_rules.tax_rate),
                small_waste_percent: env_decimal("SMALL_WASTE_PERCENT")
                    .unwrap_or(default_rules.small_waste_percent),
            },
        }
    }

    /// Defaults with a specific database file. Used by tests and embedders.
    pub fn with_db_path(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Self::default()
        }
    }
}
