use rusqlite::types::Type;
use rusqlite::{Connection, Result, Row};
use rust_decimal::Decimal;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

use crate::error::AppResult;

pub struct Database {
    pub conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| {
                crate::error::AppError::Internal(format!(
                    "failed to create database directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        info!(path = %path.display(), "database opened");

        Ok(Database {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> AppResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", true)?;

        Ok(Database {
            conn: Mutex::new(conn),
        })
    }

    pub fn initialize(&self) -> AppResult<()> {
        let conn = self.conn.lock()?;

        // Money and areas are TEXT so the stored value is exactly the rounded decimal
        conn.execute_batch(
            "
            -- Catalog owned elsewhere; this crate only reads it (and product stock)
            CREATE TABLE IF NOT EXISTS clients (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                phone TEXT,
                rfc TEXT,
                address TEXT
            );

            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                email TEXT,
                phone TEXT
            );

            CREATE TABLE IF NOT EXISTS products (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                description TEXT,
                price TEXT NOT NULL DEFAULT '0',
                area_per_piece TEXT,
                stock_pieces INTEGER,
                stock_area TEXT
            );

            -- Quotes (cotizaciones)
            CREATE TABLE IF NOT EXISTS orders (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                client_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                subtotal TEXT NOT NULL DEFAULT '0',
                tax TEXT NOT NULL DEFAULT '0',
                total TEXT NOT NULL DEFAULT '0',
                include_tax INTEGER NOT NULL DEFAULT 0,
                deposit TEXT NOT NULL DEFAULT '0',
                status TEXT NOT NULL DEFAULT 'pendiente',
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (client_id) REFERENCES clients(id),
                FOREIGN KEY (user_id) REFERENCES users(id)
            );

            CREATE TABLE IF NOT EXISTS order_lines (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                order_id INTEGER NOT NULL,
                product_id INTEGER NOT NULL,
                unit TEXT NOT NULL,
                quantity TEXT NOT NULL,
                area_m2 TEXT NOT NULL,
                pieces_equivalent INTEGER,
                unit_price TEXT NOT NULL,
                subtotal TEXT NOT NULL,
                FOREIGN KEY (order_id) REFERENCES orders(id),
                FOREIGN KEY (product_id) REFERENCES products(id)
            );

            -- Offcuts (residuos), append-only
            CREATE TABLE IF NOT EXISTS waste_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                order_id INTEGER NOT NULL,
                product_id INTEGER NOT NULL,
                pieces_used INTEGER NOT NULL,
                area_required TEXT NOT NULL,
                area_used TEXT NOT NULL,
                area_wasted TEXT NOT NULL,
                waste_percent TEXT NOT NULL,
                area_per_piece TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'disponible',
                notes TEXT,
                user_id INTEGER,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (order_id) REFERENCES orders(id),
                FOREIGN KEY (product_id) REFERENCES products(id)
            );

            -- Deposit ledger (historial de anticipos), append-only
            CREATE TABLE IF NOT EXISTS deposit_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                order_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                amount TEXT NOT NULL,
                kind TEXT NOT NULL DEFAULT 'nuevo',
                notes TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (order_id) REFERENCES orders(id),
                FOREIGN KEY (user_id) REFERENCES users(id)
            );

            CREATE INDEX IF NOT EXISTS idx_order_lines_order ON order_lines(order_id);
            CREATE INDEX IF NOT EXISTS idx_waste_product_status ON waste_records(product_id, status);
            CREATE INDEX IF NOT EXISTS idx_deposit_history_order ON deposit_history(order_id);
            ",
        )?;

        // Run migrations for existing databases (pass connection to avoid deadlock)
        Self::migrate_conn(&conn)?;

        Ok(())
    }

    fn migrate_conn(conn: &Connection) -> Result<()> {
        let order_columns = table_columns(conn, "orders")?;
        if !order_columns.contains(&"last_deposit_at".to_string()) {
            debug!("adding orders.last_deposit_at");
            conn.execute("ALTER TABLE orders ADD COLUMN last_deposit_at TEXT", [])?;
        }

        let line_columns = table_columns(conn, "order_lines")?;
        if !line_columns.contains(&"description".to_string()) {
            debug!("adding order_lines.description");
            conn.execute("ALTER TABLE order_lines ADD COLUMN description TEXT", [])?;
        }

        Ok(())
    }
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let columns = conn
        .prepare(&format!("PRAGMA table_info({})", table))?
        .query_map([], |row| row.get::<_, String>(1))?
        .filter_map(|r| r.ok())
        .collect();
    Ok(columns)
}

/// Timestamp in the same shape SQLite's CURRENT_TIMESTAMP produces.
pub fn now_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

pub(crate) fn decimal_at(row: &Row<'_>, idx: usize) -> Result<Decimal> {
    let text: String = row.get(idx)?;
    text.parse::<Decimal>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn optional_decimal_at(row: &Row<'_>, idx: usize) -> Result<Option<Decimal>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(text) => text
            .parse::<Decimal>()
            .map(Some)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))),
        None => Ok(None),
    }
}

/// Parse a TEXT enum column (status, unit, kind) into its typed form.
pub(crate) fn enum_at<T>(row: &Row<'_>, idx: usize) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: String = row.get(idx)?;
    text.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
