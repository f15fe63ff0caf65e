//! Quote totals: subtotal, IVA and total.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::units::round_money;

/// Mexican IVA (16%)
pub const DEFAULT_TAX_RATE: Decimal = Decimal::from_parts(16, 0, 0, false, 2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteTotals {
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

fn out_of_range(what: &str) -> AppError {
    AppError::Validation(format!("{} is too large to compute", what))
}

pub fn line_subtotal(unit_price: Decimal, quantity: Decimal) -> AppResult<Decimal> {
    unit_price
        .checked_mul(quantity)
        .ok_or_else(|| out_of_range("line subtotal"))
}

/// `line_subtotals` are the unrounded `price * quantity` products; the sum is
/// rounded once, then tax and total are derived from the rounded subtotal.
pub fn compute_totals<I>(
    line_subtotals: I,
    include_tax: bool,
    tax_rate: Decimal,
) -> AppResult<QuoteTotals>
where
    I: IntoIterator<Item = Decimal>,
{
    let sum = line_subtotals
        .into_iter()
        .try_fold(Decimal::ZERO, |acc, line| acc.checked_add(line))
        .ok_or_else(|| out_of_range("subtotal"))?;
    let subtotal = round_money(sum);
    let tax = if include_tax {
        round_money(
            subtotal
                .checked_mul(tax_rate)
                .ok_or_else(|| out_of_range("tax"))?,
        )
    } else {
        Decimal::ZERO
    };
    let total = round_money(subtotal.checked_add(tax).ok_or_else(|| out_of_range("total"))?);

    Ok(QuoteTotals {
        subtotal,
        tax,
        total,
    })
}
