use std::collections::HashMap;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use rust_decimal::Decimal;
use tracing::{info, warn};

use super::{
    fetch_client, fetch_lines, fetch_order, fetch_order_with_lines, fetch_product, fetch_user,
    find_product, insert_waste_best_effort, normalize_notes, order_from_row, NewWaste,
    ORDER_FROM, ORDER_SELECT,
};
use crate::db::{decimal_at, optional_decimal_at};
use crate::deposit::{self, settle_deposit, status_after_deposit};
use crate::error::{AppError, AppResult};
use crate::models::{
    CreateOrder, LineItem, MeasurementUnit, OrderLineInput, OrderStatus, OrderSummary,
    OrderUpdate, OrderWithLines, Product, StockAdjustment, UpdateOrder,
};
use crate::reconcile::{plan_piece_deltas, AreaDemand};
use crate::totals::{compute_totals, line_subtotal, QuoteTotals};
use crate::units::{pieces_to_area, round_area, round_money, to_decimal, waste_percent_of_piece};
use crate::AppContext;

const EDIT_WASTE_NOTES: &str = "Ajuste por edición de orden";

/// A requested line checked against its product, ready to insert.
struct PreparedLine {
    product: Product,
    unit: MeasurementUnit,
    quantity: Decimal,
    area_m2: Decimal,
    pieces_equivalent: Option<i64>,
    unit_price: Decimal,
    /// Unrounded `unit_price * quantity`
    exact_subtotal: Decimal,
    description: Option<String>,
}

fn prepare_lines(conn: &Connection, inputs: &[OrderLineInput]) -> AppResult<Vec<PreparedLine>> {
    if inputs.is_empty() {
        return Err(AppError::Validation(
            "an order needs at least one product".to_string(),
        ));
    }

    let mut prepared = Vec::with_capacity(inputs.len());
    for input in inputs {
        let product = fetch_product(conn, input.product_id)?;
        let quantity = to_decimal(input.quantity, "quantity")?;
        input.unit.validate_for_product(&product, quantity)?;
        let exact_subtotal = line_subtotal(product.price, quantity)?;

        prepared.push(PreparedLine {
            unit: input.unit,
            quantity,
            area_m2: round_area(input.unit.to_area(quantity, product.area_per_piece)),
            pieces_equivalent: input.unit.to_pieces(quantity, product.area_per_piece),
            unit_price: product.price,
            exact_subtotal,
            description: normalize_notes(input.description.clone()),
            product,
        });
    }

    Ok(prepared)
}

fn insert_lines(conn: &Connection, order_id: i64, lines: &[PreparedLine]) -> AppResult<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO order_lines (order_id, product_id, unit, quantity, area_m2, pieces_equivalent,
                                  unit_price, subtotal, description)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )?;

    for line in lines {
        stmt.execute(rusqlite::params![
            order_id,
            line.product.id,
            line.unit.as_str(),
            line.quantity.to_string(),
            line.area_m2.to_string(),
            line.pieces_equivalent,
            line.unit_price.to_string(),
            round_money(line.exact_subtotal).to_string(),
            line.description,
        ])?;
    }

    Ok(())
}

/// Totals from the stored lines, so header-only edits see the same figures.
fn stored_totals(
    conn: &Connection,
    order_id: i64,
    include_tax: bool,
    tax_rate: Decimal,
) -> AppResult<QuoteTotals> {
    let mut stmt =
        conn.prepare("SELECT unit_price, quantity FROM order_lines WHERE order_id = ?1")?;
    let subtotals = stmt
        .query_map([order_id], |row| Ok((decimal_at(row, 0)?, decimal_at(row, 1)?)))?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(|(price, quantity)| line_subtotal(price, quantity))
        .collect::<AppResult<Vec<_>>>()?;

    compute_totals(subtotals, include_tax, tax_rate)
}

pub fn create_order(ctx: &AppContext, order: CreateOrder) -> AppResult<OrderWithLines> {
    let title = order.title.trim();
    if title.is_empty() {
        return Err(AppError::Validation("title is required".to_string()));
    }
    if order.lines.is_empty() {
        return Err(AppError::Validation(
            "an order needs at least one product".to_string(),
        ));
    }
    let deposit = order
        .deposit
        .map(deposit::parse_absolute)
        .transpose()?
        .unwrap_or(Decimal::ZERO);

    let mut conn = ctx.db().conn.lock()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    fetch_user(&tx, order.user_id)?;
    fetch_client(&tx, order.client_id)?;
    let lines = prepare_lines(&tx, &order.lines)?;

    let totals = compute_totals(
        lines.iter().map(|l| l.exact_subtotal),
        order.include_tax,
        ctx.rules().tax_rate,
    )?;
    let change = settle_deposit(deposit, totals.total)?;
    let status = status_after_deposit(OrderStatus::Pendiente, &change);

    tx.execute(
        "INSERT INTO orders (title, client_id, user_id, subtotal, tax, total, include_tax, deposit, status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        rusqlite::params![
            title,
            order.client_id,
            order.user_id,
            totals.subtotal.to_string(),
            totals.tax.to_string(),
            totals.total.to_string(),
            order.include_tax,
            change.deposit.to_string(),
            status.as_str(),
        ],
    )?;
    let order_id = tx.last_insert_rowid();

    insert_lines(&tx, order_id, &lines)?;

    let created = fetch_order_with_lines(&tx, order_id)?;
    tx.commit()?;

    info!(
        order_id,
        total = %created.order.total,
        deposit = %created.order.deposit,
        status = %created.order.status,
        lines = created.lines.len(),
        "order created"
    );
    Ok(created)
}

pub fn get_order(ctx: &AppContext, order_id: i64) -> AppResult<OrderWithLines> {
    let conn = ctx.db().conn.lock()?;
    fetch_order_with_lines(&conn, order_id)
}

/// All orders, newest first, with a summary of their deposit ledger.
pub fn list_orders(ctx: &AppContext) -> AppResult<Vec<OrderSummary>> {
    let conn = ctx.db().conn.lock()?;

    let mut stmt = conn.prepare(&format!(
        "{},
            (SELECT COUNT(*) FROM deposit_history h WHERE h.order_id = o.id),
            (SELECT h.amount FROM deposit_history h WHERE h.order_id = o.id
             ORDER BY h.created_at DESC, h.id DESC LIMIT 1),
            (SELECT h.created_at FROM deposit_history h WHERE h.order_id = o.id
             ORDER BY h.created_at DESC, h.id DESC LIMIT 1)
         {}
         ORDER BY o.created_at DESC, o.id DESC",
        ORDER_SELECT, ORDER_FROM
    ))?;

    let orders = stmt
        .query_map([], |row| {
            Ok(OrderSummary {
                order: order_from_row(row)?,
                deposit_count: row.get(14)?,
                last_deposit_amount: optional_decimal_at(row, 15)?,
                last_deposit_at: row.get(16)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(orders)
}

/// Replace an order's lines and move piece stock by the difference.
///
/// Returned pieces go back to stock; extra pieces are taken from it and the
/// offcut they leave is recorded. Stock may go negative; that is reported,
/// not refused.
fn replace_lines_in_tx(
    tx: &mut Transaction<'_>,
    order_id: i64,
    current: &[LineItem],
    replacement: &[PreparedLine],
    edited_by: Option<i64>,
) -> AppResult<Vec<StockAdjustment>> {
    let before: AreaDemand = current.iter().map(|l| (l.product_id, l.area_m2)).collect();
    let after: AreaDemand = replacement
        .iter()
        .map(|l| (l.product.id, l.area_m2))
        .collect();

    let mut catalog: HashMap<i64, Product> = HashMap::new();
    for product_id in before.product_ids().chain(after.product_ids()) {
        if catalog.contains_key(&product_id) {
            continue;
        }
        if let Some(product) = find_product(tx, product_id)? {
            catalog.insert(product_id, product);
        }
    }

    let plans = plan_piece_deltas(&before, &after, |id| {
        catalog.get(&id).and_then(|p| p.area_per_piece)
    })?;

    let mut adjustments = Vec::with_capacity(plans.len());
    for plan in plans {
        let Some(product) = catalog.get(&plan.product_id) else {
            continue;
        };

        let stock_before = product.stock_pieces.unwrap_or(0);
        let stock_after = stock_before - plan.delta;
        tx.execute(
            "UPDATE products SET stock_pieces = ?1 WHERE id = ?2",
            rusqlite::params![stock_after, plan.product_id],
        )?;

        let insufficient_stock = plan.takes_stock() && stock_before < plan.delta;
        let deficit = if insufficient_stock {
            plan.delta - stock_before
        } else {
            0
        };

        let waste_record_id = if plan.takes_stock() && plan.waste_area > Decimal::ZERO {
            let waste_percent = waste_percent_of_piece(plan.waste_area, plan.area_per_piece)?;
            insert_waste_best_effort(
                tx,
                &NewWaste {
                    order_id,
                    product_id: plan.product_id,
                    pieces_used: plan.delta,
                    area_required: (plan.area_after - plan.area_before).max(Decimal::ZERO),
                    area_used: pieces_to_area(plan.delta, plan.area_per_piece),
                    area_wasted: plan.waste_area,
                    waste_percent,
                    area_per_piece: plan.area_per_piece,
                    notes: Some(EDIT_WASTE_NOTES.to_string()),
                    user_id: edited_by,
                },
            )
        } else {
            None
        };

        adjustments.push(StockAdjustment {
            product_id: plan.product_id,
            product_name: product.name.clone(),
            area_before: plan.area_before,
            area_after: plan.area_after,
            pieces_before: plan.pieces_before,
            pieces_after: plan.pieces_after,
            delta_pieces: plan.delta,
            stock_before,
            stock_after,
            insufficient_stock,
            deficit,
            waste_record_id,
        });
    }

    tx.execute("DELETE FROM order_lines WHERE order_id = ?1", [order_id])?;
    insert_lines(tx, order_id, replacement)?;

    Ok(adjustments)
}

/// Edit an order's header, lines, deposit and status in one transaction.
///
/// Lines can only change while the order is `pendiente`. A deposit given here
/// replaces the current one and marks the order `pagado` when it covers the
/// total, unless a status is given as well.
pub fn update_order(
    ctx: &AppContext,
    order_id: i64,
    changes: UpdateOrder,
) -> AppResult<OrderUpdate> {
    let new_status = changes
        .status
        .as_deref()
        .map(str::parse::<OrderStatus>)
        .transpose()?;
    let new_deposit = changes.deposit.map(deposit::parse_absolute).transpose()?;
    if matches!(&changes.lines, Some(lines) if lines.is_empty()) {
        return Err(AppError::Validation(
            "an order needs at least one product".to_string(),
        ));
    }

    let mut conn = ctx.db().conn.lock()?;
    let mut tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let mut order = fetch_order(&tx, order_id)?;

    if changes.lines.is_some() && order.status != OrderStatus::Pendiente {
        return Err(AppError::StateConflict(format!(
            "products of order {} can only change while it is pendiente (currently {})",
            order_id, order.status
        )));
    }

    if let Some(client_id) = changes.client_id {
        fetch_client(&tx, client_id)?;
        order.client_id = client_id;
    }
    if let Some(title) = changes.title.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        order.title = title.to_string();
    }
    if let Some(include_tax) = changes.include_tax {
        order.include_tax = include_tax;
    }

    let adjustments = match &changes.lines {
        Some(inputs) => {
            let replacement = prepare_lines(&tx, inputs)?;
            let current = fetch_lines(&tx, order_id)?;
            replace_lines_in_tx(&mut tx, order_id, &current, &replacement, changes.edited_by)?
        }
        None => Vec::new(),
    };

    let totals = stored_totals(&tx, order_id, order.include_tax, ctx.rules().tax_rate)?;
    order.subtotal = totals.subtotal;
    order.tax = totals.tax;
    order.total = totals.total;

    match new_deposit {
        Some(amount) => {
            let change = settle_deposit(amount, order.total)?;
            order.deposit = change.deposit;
            if new_status.is_none() {
                order.status = status_after_deposit(order.status, &change);
            }
        }
        None if order.deposit > order.total => {
            return Err(AppError::OverLimit {
                attempted: order.deposit,
                total: order.total,
            });
        }
        None => {}
    }
    if let Some(status) = new_status {
        order.status = status;
    }

    tx.execute(
        "UPDATE orders
         SET title = ?1, client_id = ?2, include_tax = ?3, subtotal = ?4, tax = ?5, total = ?6,
             deposit = ?7, status = ?8
         WHERE id = ?9",
        rusqlite::params![
            order.title,
            order.client_id,
            order.include_tax,
            order.subtotal.to_string(),
            order.tax.to_string(),
            order.total.to_string(),
            order.deposit.to_string(),
            order.status.as_str(),
            order_id,
        ],
    )?;

    let updated = fetch_order_with_lines(&tx, order_id)?;
    tx.commit()?;

    let insufficient_stock = adjustments.iter().any(|a| a.insufficient_stock);
    for adjustment in adjustments.iter().filter(|a| a.insufficient_stock) {
        warn!(
            order_id,
            product_id = adjustment.product_id,
            stock_after = adjustment.stock_after,
            deficit = adjustment.deficit,
            "order edit left stock negative"
        );
    }
    info!(
        order_id,
        total = %updated.order.total,
        status = %updated.order.status,
        adjusted_products = adjustments.len(),
        "order updated"
    );

    Ok(OrderUpdate {
        order: updated,
        inventory_adjusted: !adjustments.is_empty(),
        insufficient_stock,
        adjustments,
    })
}

pub fn replace_order_lines(
    ctx: &AppContext,
    order_id: i64,
    lines: Vec<OrderLineInput>,
) -> AppResult<OrderUpdate> {
    update_order(
        ctx,
        order_id,
        UpdateOrder {
            lines: Some(lines),
            ..Default::default()
        },
    )
}

/// Set any of the known statuses; transitions are not restricted.
pub fn set_status(ctx: &AppContext, order_id: i64, status: &str) -> AppResult<OrderWithLines> {
    let status: OrderStatus = status.parse()?;

    let conn = ctx.db().conn.lock()?;
    let changed = conn.execute(
        "UPDATE orders SET status = ?1 WHERE id = ?2",
        rusqlite::params![status.as_str(), order_id],
    )?;
    if changed == 0 {
        return Err(AppError::not_found("Order", order_id));
    }

    info!(order_id, %status, "order status changed");
    fetch_order_with_lines(&conn, order_id)
}
