//! Unified error handling
//!
//! | Category | Meaning | Retry |
//! |----------|---------|-------|
//! | validation | missing or malformed input | never |
//! | not_found | referenced entity absent | never |
//! | state_conflict | operation not allowed in the current order status | never |
//! | business_rule | deposit threshold or limit not met | after fixing the data |
//! | internal | storage or transaction failure | safe to retry |

use rust_decimal::Decimal;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    NotFound,
    StateConflict,
    BusinessRule,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // ========== Caller errors ==========
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid product configuration: {0}")]
    InvalidProductConfig(String),

    #[error("Missing waste decision for product {product_id} ({product_name})")]
    MissingConfirmation { product_id: i64, product_name: String },

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("State conflict: {0}")]
    StateConflict(String),

    // ========== Business rules ==========
    #[error("Deposit is {current_percent}% of the total, {required_percent}% required")]
    InsufficientDeposit {
        current_percent: Decimal,
        required_percent: Decimal,
    },

    #[error("Deposit {attempted} exceeds order total {total}")]
    OverLimit { attempted: Decimal, total: Decimal },

    // ========== System ==========
    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn not_found(what: &str, id: i64) -> Self {
        AppError::NotFound(format!("{} {} not found", what, id))
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            AppError::Validation(_)
            | AppError::InvalidAmount(_)
            | AppError::InvalidProductConfig(_)
            | AppError::MissingConfirmation { .. } => ErrorCategory::Validation,
            AppError::NotFound(_) => ErrorCategory::NotFound,
            AppError::StateConflict(_) => ErrorCategory::StateConflict,
            AppError::InsufficientDeposit { .. } | AppError::OverLimit { .. } => {
                ErrorCategory::BusinessRule
            }
            AppError::Database(_) | AppError::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Stable machine-readable code for the host application.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "E0002",
            AppError::InvalidAmount(_) => "E5001",
            AppError::InvalidProductConfig(_) => "E6001",
            AppError::MissingConfirmation { .. } => "E6002",
            AppError::NotFound(_) => "E0003",
            AppError::StateConflict(_) => "E4001",
            AppError::InsufficientDeposit { .. } => "E5002",
            AppError::OverLimit { .. } => "E5003",
            AppError::Database(_) => "E9002",
            AppError::Internal(_) => "E9001",
        }
    }

    /// Message safe to show to the caller. Internal details stay in the log.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Database(msg) => {
                error!(target: "database", error = %msg, "Database error occurred");
                "Database error".to_string()
            }
            AppError::Internal(msg) => {
                error!(target: "internal", error = %msg, "Internal error occurred");
                "Internal error".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl Serialize for AppError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("AppError", 3)?;
        state.serialize_field("code", self.code())?;
        state.serialize_field("category", &self.category())?;
        state.serialize_field("message", &self.public_message())?;
        state.end()
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => AppError::NotFound("Record not found".into()),
            other => AppError::Database(other.to_string()),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for AppError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        AppError::Internal(format!("database lock poisoned: {}", err))
    }
}
