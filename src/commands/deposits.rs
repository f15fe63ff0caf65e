use rusqlite::TransactionBehavior;
use tracing::info;

use super::{fetch_ledger, fetch_order, fetch_user, normalize_notes};
use crate::db::now_timestamp;
use crate::deposit::{parse_absolute, parse_increment, settle_deposit, status_after_deposit};
use crate::error::{AppError, AppResult};
use crate::models::{DepositHistory, DepositReceipt, LedgerKind, Order};
use crate::AppContext;

/// Add an amount to the order's deposit and record it in the ledger.
///
/// The ledger entry, the new deposit and `last_deposit_at` are written in one
/// transaction. Reaching the total marks the order `pagado`.
pub fn add_deposit(
    ctx: &AppContext,
    order_id: i64,
    amount: f64,
    user_id: i64,
    notes: Option<String>,
) -> AppResult<DepositReceipt> {
    let amount = parse_increment(amount)?;

    let mut conn = ctx.db().conn.lock()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let order = fetch_order(&tx, order_id)?;
    fetch_user(&tx, user_id)?;

    let change = settle_deposit(order.deposit + amount, order.total)?;
    let status = status_after_deposit(order.status, &change);
    let now = now_timestamp();

    tx.execute(
        "INSERT INTO deposit_history (order_id, user_id, amount, kind, notes, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            order_id,
            user_id,
            amount.to_string(),
            LedgerKind::Nuevo.as_str(),
            normalize_notes(notes),
            now,
        ],
    )?;
    let entry_id = tx.last_insert_rowid();

    tx.execute(
        "UPDATE orders SET deposit = ?1, last_deposit_at = ?2, status = ?3 WHERE id = ?4",
        rusqlite::params![change.deposit.to_string(), now, status.as_str(), order_id],
    )?;

    let order = fetch_order(&tx, order_id)?;
    let history = fetch_ledger(&tx, order_id)?;
    let entry = history
        .iter()
        .find(|e| e.id == entry_id)
        .cloned()
        .ok_or_else(|| AppError::Internal(format!("ledger entry {} vanished", entry_id)))?;
    tx.commit()?;

    info!(
        order_id,
        user_id,
        amount = %amount,
        deposit = %order.deposit,
        status = %order.status,
        "deposit recorded"
    );

    Ok(DepositReceipt {
        pending_balance: order.pending_balance(),
        order,
        entry,
        history,
    })
}

/// Overwrite the deposit without touching the ledger.
pub fn set_deposit(ctx: &AppContext, order_id: i64, amount: f64) -> AppResult<Order> {
    let amount = parse_absolute(amount)?;

    let mut conn = ctx.db().conn.lock()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let order = fetch_order(&tx, order_id)?;
    let change = settle_deposit(amount, order.total)?;
    let status = status_after_deposit(order.status, &change);

    tx.execute(
        "UPDATE orders SET deposit = ?1, status = ?2 WHERE id = ?3",
        rusqlite::params![change.deposit.to_string(), status.as_str(), order_id],
    )?;

    let order = fetch_order(&tx, order_id)?;
    tx.commit()?;

    info!(order_id, deposit = %order.deposit, status = %order.status, "deposit set");
    Ok(order)
}

pub fn get_deposit_history(ctx: &AppContext, order_id: i64) -> AppResult<DepositHistory> {
    let conn = ctx.db().conn.lock()?;

    let order = fetch_order(&conn, order_id)?;
    let entries = fetch_ledger(&conn, order_id)?;

    Ok(DepositHistory {
        order_id,
        deposit_total: order.deposit,
        order_total: order.total,
        pending_balance: order.pending_balance(),
        entries,
    })
}
