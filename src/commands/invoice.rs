use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;

use super::{fetch_client, fetch_lines, fetch_order, fetch_user};
use crate::db::now_timestamp;
use crate::error::{AppError, AppResult};
use crate::models::{Client, LineItem, Order, User};
use crate::AppContext;

/// Everything a renderer needs to print an invoice. Nothing left to look up.
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceDocument {
    pub order: Order,
    pub client: Client,
    pub user: User,
    pub lines: Vec<LineItem>,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub deposit: Decimal,
    pub balance: Decimal,
    pub issued_at: String,
}

/// Turns an invoice into document bytes (a PDF in production).
pub trait DocumentRenderer {
    fn render(
        &self,
        invoice: &InvoiceDocument,
    ) -> Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>>;
}

pub fn build_invoice(ctx: &AppContext, order_id: i64) -> AppResult<InvoiceDocument> {
    let conn = ctx.db().conn.lock()?;

    let order = fetch_order(&conn, order_id)?;
    let lines = fetch_lines(&conn, order_id)?;
    if lines.is_empty() {
        return Err(AppError::Validation(format!(
            "order {} has no products to invoice",
            order_id
        )));
    }
    let client = fetch_client(&conn, order.client_id)?;
    let user = fetch_user(&conn, order.user_id)?;

    Ok(InvoiceDocument {
        subtotal: order.subtotal,
        tax: order.tax,
        total: order.total,
        deposit: order.deposit,
        balance: order.pending_balance(),
        issued_at: now_timestamp(),
        order,
        client,
        user,
        lines,
    })
}

/// Build the invoice and hand it to `renderer`. The database lock is released
/// before rendering starts.
pub fn generate_invoice(
    ctx: &AppContext,
    order_id: i64,
    renderer: &dyn DocumentRenderer,
) -> AppResult<Vec<u8>> {
    let invoice = build_invoice(ctx, order_id)?;
    let bytes = renderer
        .render(&invoice)
        .map_err(|e| AppError::Internal(format!("failed to render invoice {}: {}", order_id, e)))?;

    info!(order_id, size = bytes.len(), "invoice rendered");
    Ok(bytes)
}
