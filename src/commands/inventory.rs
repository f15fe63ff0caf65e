//! Two-step inventory commitment: analyze, then confirm.
//!
//! Both steps require the deposit gate. Analysis writes nothing; confirmation
//! takes the pieces from stock and records the offcuts the caller keeps.
//! Confirming twice takes stock twice.

use rusqlite::{Connection, TransactionBehavior};
use rust_decimal::Decimal;
use tracing::{info, warn};

use super::{fetch_lines, fetch_order, fetch_product, fetch_user, insert_waste_best_effort, NewWaste};
use crate::deposit::require_deposit_threshold;
use crate::error::{AppError, AppResult};
use crate::models::{
    ConfirmedLine, InventoryAnalysis, InventoryConfirmation, InventoryLineAnalysis, KeptWaste,
    LineItem, Order, Product, WasteDecision, WasteStatus,
};
use crate::units::{cut_for_area, round_area, round_percent, round_pieces, PieceCut};
use crate::{AppContext, BusinessRules};

const DISCARD_SUGGESTION: &str = "Se recomienda descartar el residuo por ser muy pequeño";
const KEEP_SUGGESTION: &str = "Se recomienda guardar el residuo para futuros proyectos";

struct LineRequirement {
    line: LineItem,
    product: Product,
    area_per_piece: Decimal,
    cut: PieceCut,
}

/// Work out pieces and offcut for every line of a gated order.
fn line_requirements(
    conn: &Connection,
    order: &Order,
    rules: &BusinessRules,
) -> AppResult<Vec<LineRequirement>> {
    let lines = fetch_lines(conn, order.id)?;
    if lines.is_empty() {
        return Err(AppError::Validation(format!(
            "order {} has no products",
            order.id
        )));
    }

    let mut requirements = Vec::with_capacity(lines.len());
    for line in lines {
        let product = fetch_product(conn, line.product_id)?;
        let area_per_piece = match product.area_per_piece {
            Some(app) if app > Decimal::ZERO => app,
            other => {
                return Err(AppError::InvalidProductConfig(format!(
                    "product \"{}\" has an invalid area per piece ({})",
                    product.name,
                    other.map(|a| a.to_string()).unwrap_or_else(|| "none".to_string())
                )))
            }
        };
        let cut = cut_for_area(line.area_m2, area_per_piece, rules.small_waste_percent)?;

        requirements.push(LineRequirement {
            line,
            product,
            area_per_piece,
            cut,
        });
    }

    Ok(requirements)
}

pub fn analyze_inventory(ctx: &AppContext, order_id: i64) -> AppResult<InventoryAnalysis> {
    let conn = ctx.db().conn.lock()?;

    let order = fetch_order(&conn, order_id)?;
    let deposit_percent = require_deposit_threshold(
        order.deposit,
        order.total,
        ctx.rules().deposit_threshold_percent,
    )?;

    let requirements = line_requirements(&conn, &order, ctx.rules())?;

    let lines: Vec<InventoryLineAnalysis> = requirements
        .into_iter()
        .map(|req| {
            let pieces_available = req.product.stock_pieces.unwrap_or(0);
            InventoryLineAnalysis {
                line_id: req.line.id,
                product_id: req.product.id,
                product_name: req.product.name,
                area_required: round_area(req.cut.area_required),
                area_per_piece: req.area_per_piece,
                pieces_available,
                pieces_exact: round_pieces(req.cut.pieces_exact),
                pieces_needed: req.cut.pieces_needed,
                pieces_left_after: pieces_available - req.cut.pieces_needed,
                area_used: round_area(req.cut.area_used),
                waste_area: round_area(req.cut.waste_area),
                waste_percent: round_percent(req.cut.waste_percent),
                small_waste: req.cut.small_waste,
                has_enough_stock: pieces_available >= req.cut.pieces_needed,
                suggestion: if req.cut.small_waste {
                    DISCARD_SUGGESTION.to_string()
                } else {
                    KEEP_SUGGESTION.to_string()
                },
            }
        })
        .collect();

    let stock_errors: Vec<String> = lines
        .iter()
        .filter(|l| !l.has_enough_stock)
        .map(|l| {
            format!(
                "{}: needs {}, available {}",
                l.product_name, l.pieces_needed, l.pieces_available
            )
        })
        .collect();

    Ok(InventoryAnalysis {
        order_id: order.id,
        client_id: order.client_id,
        deposit: order.deposit,
        total: order.total,
        deposit_percent: round_percent(deposit_percent),
        can_confirm: stock_errors.is_empty(),
        lines,
        stock_errors,
    })
}

/// Take every line's pieces from stock and record the offcuts marked to keep.
///
/// Every line needs a decision (matched by product) before anything is
/// written. Stock may end negative; those lines carry the deficit.
pub fn confirm_inventory(
    ctx: &AppContext,
    order_id: i64,
    decisions: Vec<WasteDecision>,
    user_id: i64,
) -> AppResult<InventoryConfirmation> {
    if decisions.is_empty() {
        return Err(AppError::Validation(
            "a waste decision is required for each product".to_string(),
        ));
    }

    let mut conn = ctx.db().conn.lock()?;
    let mut tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    fetch_user(&tx, user_id)?;
    let order = fetch_order(&tx, order_id)?;
    require_deposit_threshold(
        order.deposit,
        order.total,
        ctx.rules().deposit_threshold_percent,
    )?;

    let requirements = line_requirements(&tx, &order, ctx.rules())?;
    let mut planned = Vec::with_capacity(requirements.len());
    for req in requirements {
        let decision = decisions
            .iter()
            .find(|d| d.product_id == req.product.id)
            .ok_or_else(|| AppError::MissingConfirmation {
                product_id: req.product.id,
                product_name: req.product.name.clone(),
            })?;
        planned.push((req, decision));
    }

    let mut lines = Vec::with_capacity(planned.len());
    let mut kept_waste = Vec::new();
    for (req, decision) in planned {
        let needed = req.cut.pieces_needed;
        let stock_before: i64 = tx.query_row(
            "SELECT COALESCE(stock_pieces, 0) FROM products WHERE id = ?1",
            [req.product.id],
            |row| row.get(0),
        )?;
        let stock_after = stock_before - needed;
        tx.execute(
            "UPDATE products SET stock_pieces = ?1 WHERE id = ?2",
            rusqlite::params![stock_after, req.product.id],
        )?;

        let insufficient_stock = stock_before < needed;
        let deficit = if insufficient_stock { needed - stock_before } else { 0 };

        let waste_id = if decision.keep_waste && req.cut.waste_area > Decimal::ZERO {
            insert_waste_best_effort(
                &mut tx,
                &NewWaste {
                    order_id,
                    product_id: req.product.id,
                    pieces_used: needed,
                    area_required: req.cut.area_required,
                    area_used: req.cut.area_used,
                    area_wasted: req.cut.waste_area,
                    waste_percent: req.cut.waste_percent,
                    area_per_piece: req.area_per_piece,
                    notes: decision.notes.clone(),
                    user_id: Some(user_id),
                },
            )
        } else {
            None
        };

        if let Some(waste_id) = waste_id {
            kept_waste.push(KeptWaste {
                waste_id,
                product_name: req.product.name.clone(),
                area_wasted: round_area(req.cut.waste_area),
                waste_percent: round_percent(req.cut.waste_percent),
                status: WasteStatus::Disponible,
            });
        }

        lines.push(ConfirmedLine {
            product_id: req.product.id,
            product_name: req.product.name,
            pieces_needed: needed,
            pieces_exact: round_pieces(req.cut.pieces_exact),
            stock_before,
            stock_after,
            area_required: round_area(req.cut.area_required),
            area_used: round_area(req.cut.area_used),
            waste_area: round_area(req.cut.waste_area),
            waste_kept: waste_id.is_some(),
            insufficient_stock,
            deficit,
        });
    }

    tx.commit()?;

    for line in lines.iter().filter(|l| l.insufficient_stock) {
        warn!(
            order_id,
            product_id = line.product_id,
            stock_after = line.stock_after,
            deficit = line.deficit,
            "confirmed with insufficient stock"
        );
    }
    info!(
        order_id,
        user_id,
        lines = lines.len(),
        kept_waste = kept_waste.len(),
        "inventory confirmed"
    );

    Ok(InventoryConfirmation {
        order_id,
        insufficient_stock: lines.iter().any(|l| l.insufficient_stock),
        lines,
        kept_waste,
    })
}
