//! Quotes (cotizaciones) for a stone fabrication shop.
//!
//! Orders are quoted per piece or per m², paid through deposits (anticipos)
//! and, once enough is paid, committed against piece stock. Rounding m² up
//! to whole pieces leaves offcuts (residuos) that are tracked for reuse.
//!
//! ```text
//! src/
//! ├── units.rs        # m² <-> pieces, waste, rounding policy
//! ├── totals.rs       # subtotal / IVA / total
//! ├── reconcile.rs    # piece deltas when an order's lines are replaced
//! ├── deposit.rs      # deposit gate and limits
//! ├── db.rs           # SQLite schema and row helpers
//! └── commands/       # operations exposed to the host application
//! ```

pub mod commands;
pub mod config;
pub mod db;
pub mod deposit;
pub mod error;
pub mod logger;
pub mod models;
pub mod reconcile;
pub mod totals;
pub mod units;

#[cfg(test)]
mod tests;

pub use config::{AppConfig, BusinessRules};
pub use db::Database;
pub use error::{AppError, AppResult, ErrorCategory};

/// Handle every command receives: the database plus the business rules.
pub struct AppContext {
    db: Database,
    config: AppConfig,
}

impl AppContext {
    pub fn new(db: Database, config: AppConfig) -> Self {
        Self { db, config }
    }

    /// Open (and migrate) the database named by `config`.
    pub fn open(config: AppConfig) -> AppResult<Self> {
        let db = Database::open(&config.db_path)?;
        db.initialize()?;
        Ok(Self::new(db, config))
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn rules(&self) -> &BusinessRules {
        &self.config.rules
    }
}

/// Load configuration from the environment, set up logging and open the store.
pub fn start() -> AppResult<AppContext> {
    let config = AppConfig::load();
    logger::init_logger_with_file(&config.log_level, config.log_dir.as_deref());
    tracing::info!(db_path = %config.db_path, "starting cotizador");
    AppContext::open(config)
}
