use std::collections::BTreeMap;

use rust_decimal::Decimal;

use super::waste_from_row;
use crate::error::AppResult;
use crate::models::{ProductWaste, WasteFilter, WasteListing, WasteRecord, WasteStatus};
use crate::units::round_area;
use crate::AppContext;

/// Offcuts matching `filter`, newest first, with per-product totals.
/// Without a status only `disponible` offcuts are listed.
pub fn list_waste(ctx: &AppContext, filter: WasteFilter) -> AppResult<WasteListing> {
    let status = filter.status.unwrap_or(WasteStatus::Disponible);
    let conn = ctx.db().conn.lock()?;

    let mut stmt = conn.prepare(
        "SELECT w.id, w.order_id, w.product_id, p.name, w.pieces_used, w.area_required,
                w.area_used, w.area_wasted, w.waste_percent, w.area_per_piece, w.status,
                w.notes, w.user_id, w.created_at
         FROM waste_records w
         LEFT JOIN products p ON w.product_id = p.id
         WHERE w.status = ?1 AND (?2 IS NULL OR w.product_id = ?2)
         ORDER BY w.created_at DESC, w.id DESC",
    )?;

    let records = stmt
        .query_map(
            rusqlite::params![status.as_str(), filter.product_id],
            waste_from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(group_by_product(records))
}

fn group_by_product(records: Vec<WasteRecord>) -> WasteListing {
    let mut groups: BTreeMap<i64, ProductWaste> = BTreeMap::new();
    for record in &records {
        let group = groups
            .entry(record.product_id)
            .or_insert_with(|| ProductWaste {
                product_id: record.product_id,
                product_name: record
                    .product_name
                    .clone()
                    .unwrap_or_else(|| format!("product {}", record.product_id)),
                total_area: Decimal::ZERO,
                record_count: 0,
                records: Vec::new(),
            });
        group.total_area += record.area_wasted;
        group.record_count += 1;
        group.records.push(record.clone());
    }

    let by_product: Vec<ProductWaste> = groups
        .into_values()
        .map(|mut g| {
            g.total_area = round_area(g.total_area);
            g
        })
        .collect();

    WasteListing {
        total_records: records.len() as i64,
        total_area: round_area(records.iter().map(|r| r.area_wasted).sum()),
        by_product,
        records,
    }
}
