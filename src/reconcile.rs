//! Piece deltas between an order's current lines and a replacement set.
//!
//! Demand is summed per product in m², converted to whole pieces on both sides,
//! and only the difference touches stock. Growing demand takes pieces and may
//! leave an offcut; shrinking demand returns whole pieces and never rewrites
//! offcuts recorded earlier.

use rust_decimal::Decimal;
use std::collections::BTreeMap;

use crate::error::AppResult;
use crate::units::{area_to_pieces_ceil, pieces_to_area};

/// Required area per product id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AreaDemand {
    by_product: BTreeMap<i64, Decimal>,
}

impl AreaDemand {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, product_id: i64, area: Decimal) {
        *self.by_product.entry(product_id).or_insert(Decimal::ZERO) += area;
    }

    pub fn area(&self, product_id: i64) -> Decimal {
        self.by_product
            .get(&product_id)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub fn product_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.by_product.keys().copied()
    }
}

impl FromIterator<(i64, Decimal)> for AreaDemand {
    fn from_iter<T: IntoIterator<Item = (i64, Decimal)>>(iter: T) -> Self {
        let mut demand = AreaDemand::new();
        for (product_id, area) in iter {
            demand.add(product_id, area);
        }
        demand
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PiecePlan {
    pub product_id: i64,
    pub area_per_piece: Decimal,
    pub area_before: Decimal,
    pub area_after: Decimal,
    pub pieces_before: i64,
    pub pieces_after: i64,
    pub delta: i64,
    /// Offcut left by the extra pieces; zero unless `delta > 0`
    pub waste_area: Decimal,
}

impl PiecePlan {
    pub fn takes_stock(&self) -> bool {
        self.delta > 0
    }

    pub fn returns_stock(&self) -> bool {
        self.delta < 0
    }
}

/// Plan stock movements for every product touched by either side.
///
/// `area_per_piece` returns `None` for products that no longer exist; those and
/// products without a positive area per piece are skipped. Products whose
/// piece count does not change are left out of the plan.
pub fn plan_piece_deltas<F>(
    before: &AreaDemand,
    after: &AreaDemand,
    area_per_piece: F,
) -> AppResult<Vec<PiecePlan>>
where
    F: Fn(i64) -> Option<Decimal>,
{
    let mut product_ids: Vec<i64> = before.product_ids().chain(after.product_ids()).collect();
    product_ids.sort_unstable();
    product_ids.dedup();

    let mut plans = Vec::new();
    for product_id in product_ids {
        let app = match area_per_piece(product_id) {
            Some(app) if app > Decimal::ZERO => app,
            _ => continue,
        };

        let area_before = before.area(product_id);
        let area_after = after.area(product_id);
        let pieces_before = area_to_pieces_ceil(area_before, app)?;
        let pieces_after = area_to_pieces_ceil(area_after, app)?;
        let delta = pieces_after - pieces_before;
        if delta == 0 {
            continue;
        }

        let waste_area = if delta > 0 {
            let extra_area = (area_after - area_before).max(Decimal::ZERO);
            (pieces_to_area(delta, app) - extra_area).max(Decimal::ZERO)
        } else {
            Decimal::ZERO
        };

        plans.push(PiecePlan {
            product_id,
            area_per_piece: app,
            area_before,
            area_after,
            pieces_before,
            pieces_after,
            delta,
            waste_area,
        });
    }

    Ok(plans)
}
