//! Deposit (anticipo) rules shared by the ledger and the inventory gate.

use rust_decimal::Decimal;

use crate::error::{AppError, AppResult};
use crate::models::OrderStatus;
use crate::units::{round_money, round_percent, to_decimal};

/// Share of the total that must be paid before material is committed.
pub const DEFAULT_DEPOSIT_THRESHOLD_PERCENT: Decimal = Decimal::from_parts(70, 0, 0, false, 0);

/// Deposit as a percentage of the total. A zero total has nothing left to
/// pay, so it counts as fully covered.
pub fn deposit_percent(deposit: Decimal, total: Decimal) -> Decimal {
    if total <= Decimal::ZERO {
        return Decimal::ONE_HUNDRED;
    }
    deposit / total * Decimal::ONE_HUNDRED
}

/// Refuse when the deposit is below `threshold_percent` of the total.
pub fn require_deposit_threshold(
    deposit: Decimal,
    total: Decimal,
    threshold_percent: Decimal,
) -> AppResult<Decimal> {
    let percent = deposit_percent(deposit, total);
    if percent < threshold_percent {
        return Err(AppError::InsufficientDeposit {
            current_percent: round_percent(percent),
            required_percent: threshold_percent,
        });
    }
    Ok(percent)
}

/// Amount added through the ledger: finite and strictly positive.
/// The check runs on the amount rounded to cents, so sub-cent amounts fail.
pub fn parse_increment(amount: f64) -> AppResult<Decimal> {
    let raw = to_decimal(amount, "deposit").map_err(|e| AppError::InvalidAmount(e.to_string()))?;
    let amount = round_money(raw);
    if amount <= Decimal::ZERO {
        return Err(AppError::InvalidAmount(format!(
            "deposit must be at least 0.01, got {}",
            raw
        )));
    }
    Ok(amount)
}

/// Absolute deposit written directly: finite and not negative.
pub fn parse_absolute(amount: f64) -> AppResult<Decimal> {
    let amount = to_decimal(amount, "deposit").map_err(|e| AppError::InvalidAmount(e.to_string()))?;
    if amount < Decimal::ZERO {
        return Err(AppError::InvalidAmount(format!(
            "deposit cannot be negative, got {}",
            amount
        )));
    }
    Ok(round_money(amount))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepositChange {
    pub deposit: Decimal,
    /// Set when this write covered the total
    pub marks_paid: bool,
}

/// Validate a new absolute deposit against the order total.
pub fn settle_deposit(new_deposit: Decimal, total: Decimal) -> AppResult<DepositChange> {
    if new_deposit > total {
        return Err(AppError::OverLimit {
            attempted: new_deposit,
            total,
        });
    }
    Ok(DepositChange {
        deposit: new_deposit,
        marks_paid: new_deposit > Decimal::ZERO && new_deposit >= total,
    })
}

/// Status after a deposit write, unless the caller picks one explicitly.
pub fn status_after_deposit(current: OrderStatus, change: &DepositChange) -> OrderStatus {
    if change.marks_paid {
        OrderStatus::Pagado
    } else {
        current
    }
}
