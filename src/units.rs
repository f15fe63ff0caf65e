//! Area/piece conversion and the rounding policy.
//!
//! Products sold by area are stocked as whole pieces that each cover a fixed
//! `area_per_piece` (m²). Demand in m² always rounds *up* to whole pieces and
//! the leftover of the last piece is the offcut ("residuo").
//!
//! All math runs on [`Decimal`]. Rounding happens once, when a value is stored
//! or shown: areas to 4 places, percentages and money to 2.

use crate::error::{AppError, AppResult};
use crate::models::{MeasurementUnit, Product, SellingMode};
use rust_decimal::prelude::*;

pub const AREA_DECIMAL_PLACES: u32 = 4;
pub const PERCENT_DECIMAL_PLACES: u32 = 2;
pub const MONEY_DECIMAL_PLACES: u32 = 2;
/// Fractional piece counts are only reported, never stocked
pub const PIECES_DECIMAL_PLACES: u32 = 2;

/// Largest quantity a single line may request, in pieces or m².
pub const MAX_LINE_QUANTITY: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);

/// Offcuts below this share of one piece are not worth keeping.
pub const DEFAULT_SMALL_WASTE_PERCENT: Decimal = Decimal::from_parts(15, 0, 0, false, 0);

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

pub fn round_area(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(AREA_DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero)
}

pub fn round_percent(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(PERCENT_DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero)
}

pub fn round_pieces(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(PIECES_DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero)
}

pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero)
}

/// Convert caller-supplied f64 into a Decimal, rejecting NaN and infinities.
pub fn to_decimal(value: f64, field_name: &str) -> AppResult<Decimal> {
    if !value.is_finite() {
        return Err(AppError::Validation(format!(
            "{} must be a finite number, got {}",
            field_name, value
        )));
    }
    Decimal::from_f64(value).ok_or_else(|| {
        AppError::Validation(format!("{} is out of range: {}", field_name, value))
    })
}

fn require_positive_area_per_piece(area_per_piece: Decimal) -> AppResult<()> {
    if area_per_piece <= Decimal::ZERO {
        return Err(AppError::InvalidProductConfig(format!(
            "area per piece must be greater than zero, got {}",
            area_per_piece
        )));
    }
    Ok(())
}

pub fn pieces_to_area(pieces: i64, area_per_piece: Decimal) -> Decimal {
    Decimal::from(pieces) * area_per_piece
}

pub fn area_to_pieces_exact(area: Decimal, area_per_piece: Decimal) -> AppResult<Decimal> {
    require_positive_area_per_piece(area_per_piece)?;
    area.checked_div(area_per_piece).ok_or_else(|| {
        AppError::InvalidProductConfig(format!(
            "{} m² cannot be split into pieces of {} m²",
            area, area_per_piece
        ))
    })
}

/// Whole pieces needed to cover `area`. Pieces are indivisible, so this rounds up.
pub fn area_to_pieces_ceil(area: Decimal, area_per_piece: Decimal) -> AppResult<i64> {
    let exact = area_to_pieces_exact(area, area_per_piece)?;
    exact
        .ceil()
        .to_i64()
        .ok_or_else(|| AppError::Validation(format!("piece count out of range for {} m²", area)))
}

pub fn waste(pieces_ceil: i64, area_per_piece: Decimal, area_required: Decimal) -> Decimal {
    (pieces_to_area(pieces_ceil, area_per_piece) - area_required).max(Decimal::ZERO)
}

pub fn waste_percent_of_piece(waste: Decimal, area_per_piece: Decimal) -> AppResult<Decimal> {
    require_positive_area_per_piece(area_per_piece)?;
    Ok(waste / area_per_piece * HUNDRED)
}

/// Advisory only: small offcuts are suggested for discarding.
pub fn is_small_waste(waste_percent: Decimal, threshold_percent: Decimal) -> bool {
    waste_percent < threshold_percent
}

/// How an area demand maps onto whole pieces of one product.
///
/// Fields are unrounded; callers round when they build a report or a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PieceCut {
    pub area_required: Decimal,
    pub pieces_exact: Decimal,
    pub pieces_needed: i64,
    pub area_used: Decimal,
    pub waste_area: Decimal,
    pub waste_percent: Decimal,
    pub small_waste: bool,
}

pub fn cut_for_area(
    area_required: Decimal,
    area_per_piece: Decimal,
    small_waste_percent: Decimal,
) -> AppResult<PieceCut> {
    let pieces_exact = area_to_pieces_exact(area_required, area_per_piece)?;
    let pieces_needed = area_to_pieces_ceil(area_required, area_per_piece)?;
    let area_used = pieces_to_area(pieces_needed, area_per_piece);
    let waste_area = waste(pieces_needed, area_per_piece, area_required);
    let waste_percent = waste_percent_of_piece(waste_area, area_per_piece)?;

    Ok(PieceCut {
        area_required,
        pieces_exact,
        pieces_needed,
        area_used,
        waste_area,
        waste_percent,
        small_waste: is_small_waste(waste_percent, small_waste_percent),
    })
}

fn usable_area_per_piece(area_per_piece: Option<Decimal>) -> Option<Decimal> {
    area_per_piece.filter(|app| *app > Decimal::ZERO)
}

impl MeasurementUnit {
    /// Area covered by `quantity` in this unit. Piece lines of a product with
    /// no usable area per piece cover nothing.
    pub fn to_area(self, quantity: Decimal, area_per_piece: Option<Decimal>) -> Decimal {
        match self {
            MeasurementUnit::M2 => quantity,
            MeasurementUnit::Piezas => usable_area_per_piece(area_per_piece)
                .map(|app| quantity * app)
                .unwrap_or(Decimal::ZERO),
        }
    }

    /// Whole pieces taken from stock for `quantity` in this unit.
    pub fn to_pieces(self, quantity: Decimal, area_per_piece: Option<Decimal>) -> Option<i64> {
        match self {
            MeasurementUnit::Piezas => quantity.ceil().to_i64(),
            MeasurementUnit::M2 => usable_area_per_piece(area_per_piece)
                .and_then(|app| area_to_pieces_ceil(quantity, app).ok()),
        }
    }

    /// Check a requested quantity against the product's selling mode.
    pub fn validate_for_product(self, product: &Product, quantity: Decimal) -> AppResult<()> {
        if quantity <= Decimal::ZERO {
            return Err(AppError::Validation(format!(
                "quantity must be greater than 0 for product {}",
                product.name
            )));
        }
        if quantity > MAX_LINE_QUANTITY {
            return Err(AppError::Validation(format!(
                "quantity {} for product {} exceeds the limit of {}",
                quantity, product.name, MAX_LINE_QUANTITY
            )));
        }

        match (product.selling_mode(), self) {
            (None, _) => Err(AppError::Validation(format!(
                "product {} has an inconsistent measurement configuration",
                product.name
            ))),
            (Some(SellingMode::ByPiece), MeasurementUnit::M2) => Err(AppError::Validation(
                format!("product {} can only be sold by piece", product.name),
            )),
            (Some(SellingMode::ByArea), MeasurementUnit::Piezas) => Err(AppError::Validation(
                format!("product {} can only be sold by m²", product.name),
            )),
            (Some(_), MeasurementUnit::Piezas) if quantity.fract() != Decimal::ZERO => {
                Err(AppError::Validation(format!(
                    "pieces of {} are indivisible, got {}",
                    product.name, quantity
                )))
            }
            _ => Ok(()),
        }
    }
}
