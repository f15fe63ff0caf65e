pub mod deposits;
pub mod inventory;
pub mod invoice;
pub mod orders;
pub mod waste;

use rusqlite::{Connection, OptionalExtension, Row, Transaction};
use rust_decimal::Decimal;
use tracing::warn;

use crate::db::{decimal_at, enum_at, optional_decimal_at};
use crate::error::{AppError, AppResult};
use crate::models::{
    Client, LedgerEntry, LineItem, Order, OrderWithLines, Product, User, WasteRecord,
};
use crate::units::{round_area, round_percent};

// ========== Row mapping ==========

pub(crate) const ORDER_SELECT: &str =
    "SELECT o.id, o.title, o.client_id, c.name, o.user_id, u.name, o.subtotal, o.tax, o.total,
            o.include_tax, o.deposit, o.last_deposit_at, o.status, o.created_at";

pub(crate) const ORDER_FROM: &str = "FROM orders o
             LEFT JOIN clients c ON o.client_id = c.id
             LEFT JOIN users u ON o.user_id = u.id";

pub(crate) fn order_from_row(row: &Row<'_>) -> rusqlite::Result<Order> {
    Ok(Order {
        id: row.get(0)?,
        title: row.get(1)?,
        client_id: row.get(2)?,
        client_name: row.get(3)?,
        user_id: row.get(4)?,
        user_name: row.get(5)?,
        subtotal: decimal_at(row, 6)?,
        tax: decimal_at(row, 7)?,
        total: decimal_at(row, 8)?,
        include_tax: row.get(9)?,
        deposit: decimal_at(row, 10)?,
        last_deposit_at: row.get(11)?,
        status: enum_at(row, 12)?,
        created_at: row.get(13)?,
    })
}

fn line_from_row(row: &Row<'_>) -> rusqlite::Result<LineItem> {
    Ok(LineItem {
        id: row.get(0)?,
        order_id: row.get(1)?,
        product_id: row.get(2)?,
        product_name: row.get(3)?,
        unit: enum_at(row, 4)?,
        quantity: decimal_at(row, 5)?,
        area_m2: decimal_at(row, 6)?,
        pieces_equivalent: row.get(7)?,
        unit_price: decimal_at(row, 8)?,
        subtotal: decimal_at(row, 9)?,
        description: row.get(10)?,
    })
}

fn product_from_row(row: &Row<'_>) -> rusqlite::Result<Product> {
    Ok(Product {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        price: decimal_at(row, 3)?,
        area_per_piece: optional_decimal_at(row, 4)?,
        stock_pieces: row.get(5)?,
        stock_area: optional_decimal_at(row, 6)?,
    })
}

pub(crate) fn waste_from_row(row: &Row<'_>) -> rusqlite::Result<WasteRecord> {
    Ok(WasteRecord {
        id: row.get(0)?,
        order_id: row.get(1)?,
        product_id: row.get(2)?,
        product_name: row.get(3)?,
        pieces_used: row.get(4)?,
        area_required: decimal_at(row, 5)?,
        area_used: decimal_at(row, 6)?,
        area_wasted: decimal_at(row, 7)?,
        waste_percent: decimal_at(row, 8)?,
        area_per_piece: decimal_at(row, 9)?,
        status: enum_at(row, 10)?,
        notes: row.get(11)?,
        user_id: row.get(12)?,
        created_at: row.get(13)?,
    })
}

fn ledger_from_row(row: &Row<'_>) -> rusqlite::Result<LedgerEntry> {
    Ok(LedgerEntry {
        id: row.get(0)?,
        order_id: row.get(1)?,
        user_id: row.get(2)?,
        user_name: row.get(3)?,
        amount: decimal_at(row, 4)?,
        kind: enum_at(row, 5)?,
        notes: row.get(6)?,
        created_at: row.get(7)?,
    })
}

// ========== Lookups ==========

pub(crate) fn fetch_order(conn: &Connection, id: i64) -> AppResult<Order> {
    conn.query_row(
        &format!("{} {} WHERE o.id = ?1", ORDER_SELECT, ORDER_FROM),
        [id],
        order_from_row,
    )
    .optional()?
    .ok_or_else(|| AppError::not_found("Order", id))
}

pub(crate) fn fetch_lines(conn: &Connection, order_id: i64) -> AppResult<Vec<LineItem>> {
    let mut stmt = conn.prepare(
        "SELECT l.id, l.order_id, l.product_id, p.name, l.unit, l.quantity, l.area_m2,
                l.pieces_equivalent, l.unit_price, l.subtotal, l.description
         FROM order_lines l
         LEFT JOIN products p ON l.product_id = p.id
         WHERE l.order_id = ?1
         ORDER BY l.id",
    )?;

    let lines = stmt
        .query_map([order_id], line_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(lines)
}

pub(crate) fn fetch_order_with_lines(conn: &Connection, id: i64) -> AppResult<OrderWithLines> {
    let order = fetch_order(conn, id)?;
    let lines = fetch_lines(conn, id)?;
    Ok(OrderWithLines { order, lines })
}

pub(crate) fn find_product(conn: &Connection, id: i64) -> AppResult<Option<Product>> {
    let product = conn
        .query_row(
            "SELECT id, name, description, price, area_per_piece, stock_pieces, stock_area
             FROM products WHERE id = ?1",
            [id],
            product_from_row,
        )
        .optional()?;
    Ok(product)
}

pub(crate) fn fetch_product(conn: &Connection, id: i64) -> AppResult<Product> {
    find_product(conn, id)?.ok_or_else(|| AppError::not_found("Product", id))
}

pub(crate) fn fetch_client(conn: &Connection, id: i64) -> AppResult<Client> {
    conn.query_row(
        "SELECT id, name, phone, rfc, address FROM clients WHERE id = ?1",
        [id],
        |row| {
            Ok(Client {
                id: row.get(0)?,
                name: row.get(1)?,
                phone: row.get(2)?,
                rfc: row.get(3)?,
                address: row.get(4)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| AppError::not_found("Client", id))
}

pub(crate) fn fetch_user(conn: &Connection, id: i64) -> AppResult<User> {
    conn.query_row(
        "SELECT id, name, email, phone FROM users WHERE id = ?1",
        [id],
        |row| {
            Ok(User {
                id: row.get(0)?,
                name: row.get(1)?,
                email: row.get(2)?,
                phone: row.get(3)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| AppError::not_found("User", id))
}

/// Deposit ledger for an order, newest first.
pub(crate) fn fetch_ledger(conn: &Connection, order_id: i64) -> AppResult<Vec<LedgerEntry>> {
    let mut stmt = conn.prepare(
        "SELECT h.id, h.order_id, h.user_id, u.name, h.amount, h.kind, h.notes, h.created_at
         FROM deposit_history h
         LEFT JOIN users u ON h.user_id = u.id
         WHERE h.order_id = ?1
         ORDER BY h.created_at DESC, h.id DESC",
    )?;

    let entries = stmt
        .query_map([order_id], ledger_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(entries)
}

pub(crate) fn normalize_notes(notes: Option<String>) -> Option<String> {
    notes
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
}

// ========== Offcuts ==========

/// Offcut about to be recorded. Values are rounded on insert.
pub(crate) struct NewWaste {
    pub order_id: i64,
    pub product_id: i64,
    pub pieces_used: i64,
    pub area_required: Decimal,
    pub area_used: Decimal,
    pub area_wasted: Decimal,
    pub waste_percent: Decimal,
    pub area_per_piece: Decimal,
    pub notes: Option<String>,
    pub user_id: Option<i64>,
}

/// Record an offcut inside its own savepoint. Stock is already committed to the
/// enclosing transaction, so a failure here is logged and dropped.
pub(crate) fn insert_waste_best_effort(tx: &mut Transaction<'_>, waste: &NewWaste) -> Option<i64> {
    let result = (|| -> rusqlite::Result<i64> {
        let sp = tx.savepoint()?;
        sp.execute(
            "INSERT INTO waste_records (order_id, product_id, pieces_used, area_required, area_used,
                                        area_wasted, waste_percent, area_per_piece, status, notes, user_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'disponible', ?9, ?10)",
            rusqlite::params![
                waste.order_id,
                waste.product_id,
                waste.pieces_used,
                round_area(waste.area_required).to_string(),
                round_area(waste.area_used).to_string(),
                round_area(waste.area_wasted).to_string(),
                round_percent(waste.waste_percent).to_string(),
                waste.area_per_piece.to_string(),
                waste.notes,
                waste.user_id,
            ],
        )?;
        let id = sp.last_insert_rowid();
        sp.commit()?;
        Ok(id)
    })();

    match result {
        Ok(id) => Some(id),
        Err(e) => {
            warn!(
                order_id = waste.order_id,
                product_id = waste.product_id,
                error = %e,
                "could not record offcut, continuing without it"
            );
            None
        }
    }
}
