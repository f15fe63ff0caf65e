use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

// ========== Enumerations ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pendiente,
    Pagado,
    Cancelado,
    EnProceso,
    Fabricado,
    EsperaMaterial,
    Entregado,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 7] = [
        OrderStatus::Pendiente,
        OrderStatus::Pagado,
        OrderStatus::Cancelado,
        OrderStatus::EnProceso,
        OrderStatus::Fabricado,
        OrderStatus::EsperaMaterial,
        OrderStatus::Entregado,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pendiente => "pendiente",
            OrderStatus::Pagado => "pagado",
            OrderStatus::Cancelado => "cancelado",
            OrderStatus::EnProceso => "en_proceso",
            OrderStatus::Fabricado => "fabricado",
            OrderStatus::EsperaMaterial => "espera_material",
            OrderStatus::Entregado => "entregado",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| {
                let valid: Vec<&str> = OrderStatus::ALL.iter().map(|s| s.as_str()).collect();
                AppError::Validation(format!(
                    "invalid status '{}', expected one of: {}",
                    s,
                    valid.join(", ")
                ))
            })
    }
}

/// Unit a line item is quoted in. Conversions live in `units.rs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasurementUnit {
    Piezas,
    M2,
}

impl MeasurementUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeasurementUnit::Piezas => "piezas",
            MeasurementUnit::M2 => "m2",
        }
    }
}

impl FromStr for MeasurementUnit {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "piezas" => Ok(MeasurementUnit::Piezas),
            "m2" => Ok(MeasurementUnit::M2),
            other => Err(AppError::Validation(format!(
                "invalid measurement unit '{}', expected 'piezas' or 'm2'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SellingMode {
    ByPiece,
    ByArea,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WasteStatus {
    Disponible,
    Utilizado,
    Descartado,
}

impl WasteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WasteStatus::Disponible => "disponible",
            WasteStatus::Utilizado => "utilizado",
            WasteStatus::Descartado => "descartado",
        }
    }
}

impl FromStr for WasteStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disponible" => Ok(WasteStatus::Disponible),
            "utilizado" => Ok(WasteStatus::Utilizado),
            "descartado" => Ok(WasteStatus::Descartado),
            other => Err(AppError::Validation(format!("invalid waste status '{}'", other))),
        }
    }
}

// ========== Catalog (read boundary) ==========

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Client {
    pub id: i64,
    pub name: String,
    pub phone: Option<String>,
    pub rfc: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    /// m² covered by one piece (`medida_por_unidad`)
    pub area_per_piece: Option<Decimal>,
    /// Whole pieces in stock; may go negative
    pub stock_pieces: Option<i64>,
    pub stock_area: Option<Decimal>,
}

impl Product {
    /// Piece-sold products track only pieces; area-sold products track area and
    /// know how much one piece covers. Anything else is misconfigured.
    pub fn selling_mode(&self) -> Option<SellingMode> {
        if self.stock_pieces.is_some() && self.stock_area.is_none() {
            Some(SellingMode::ByPiece)
        } else if self.stock_area.is_some() && self.area_per_piece.is_some() {
            Some(SellingMode::ByArea)
        } else {
            None
        }
    }
}

// ========== Orders ==========

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Order {
    pub id: i64,
    pub title: String,
    pub client_id: i64,
    pub client_name: Option<String>,
    pub user_id: i64,
    pub user_name: Option<String>,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub include_tax: bool,
    pub deposit: Decimal,
    pub last_deposit_at: Option<String>,
    pub status: OrderStatus,
    pub created_at: String,
}

impl Order {
    pub fn pending_balance(&self) -> Decimal {
        self.total - self.deposit
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LineItem {
    pub id: i64,
    pub order_id: i64,
    pub product_id: i64,
    pub product_name: Option<String>,
    pub unit: MeasurementUnit,
    pub quantity: Decimal,
    pub area_m2: Decimal,
    /// Whole pieces the line takes from stock, when the product can convert
    pub pieces_equivalent: Option<i64>,
    pub unit_price: Decimal,
    pub subtotal: Decimal,
    pub description: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderLineInput {
    pub product_id: i64,
    pub quantity: f64,
    pub unit: MeasurementUnit,
    pub description: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateOrder {
    pub title: String,
    pub client_id: i64,
    pub user_id: i64,
    pub lines: Vec<OrderLineInput>,
    #[serde(default)]
    pub include_tax: bool,
    pub deposit: Option<f64>,
}

/// Partial edit of an order. Absent fields are left untouched.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UpdateOrder {
    pub client_id: Option<i64>,
    pub title: Option<String>,
    pub include_tax: Option<bool>,
    pub lines: Option<Vec<OrderLineInput>>,
    pub deposit: Option<f64>,
    pub status: Option<String>,
    /// Attributed on offcuts created by a line edit
    pub edited_by: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OrderWithLines {
    pub order: Order,
    pub lines: Vec<LineItem>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OrderSummary {
    pub order: Order,
    pub deposit_count: i64,
    pub last_deposit_amount: Option<Decimal>,
    pub last_deposit_at: Option<String>,
}

/// Stock movement applied to one product while replacing an order's lines.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StockAdjustment {
    pub product_id: i64,
    pub product_name: String,
    pub area_before: Decimal,
    pub area_after: Decimal,
    pub pieces_before: i64,
    pub pieces_after: i64,
    /// Positive: pieces taken from stock. Negative: pieces returned.
    pub delta_pieces: i64,
    pub stock_before: i64,
    pub stock_after: i64,
    pub insufficient_stock: bool,
    pub deficit: i64,
    pub waste_record_id: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OrderUpdate {
    pub order: OrderWithLines,
    pub adjustments: Vec<StockAdjustment>,
    pub inventory_adjusted: bool,
    pub insufficient_stock: bool,
}

impl OrderUpdate {
    pub fn products_with_deficit(&self) -> Vec<&StockAdjustment> {
        self.adjustments.iter().filter(|a| a.insufficient_stock).collect()
    }
}

// ========== Waste (residuos) ==========

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WasteRecord {
    pub id: i64,
    pub order_id: i64,
    pub product_id: i64,
    pub product_name: Option<String>,
    pub pieces_used: i64,
    pub area_required: Decimal,
    pub area_used: Decimal,
    pub area_wasted: Decimal,
    pub waste_percent: Decimal,
    pub area_per_piece: Decimal,
    pub status: WasteStatus,
    pub notes: Option<String>,
    pub user_id: Option<i64>,
    pub created_at: String,
}

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct WasteFilter {
    pub product_id: Option<i64>,
    /// Defaults to `disponible` when absent
    pub status: Option<WasteStatus>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProductWaste {
    pub product_id: i64,
    pub product_name: String,
    pub total_area: Decimal,
    pub record_count: i64,
    pub records: Vec<WasteRecord>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WasteListing {
    pub total_records: i64,
    pub total_area: Decimal,
    pub by_product: Vec<ProductWaste>,
    pub records: Vec<WasteRecord>,
}

// ========== Inventory confirmation ==========

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct InventoryLineAnalysis {
    pub line_id: i64,
    pub product_id: i64,
    pub product_name: String,
    pub area_required: Decimal,
    pub area_per_piece: Decimal,
    pub pieces_available: i64,
    pub pieces_exact: Decimal,
    pub pieces_needed: i64,
    pub pieces_left_after: i64,
    pub area_used: Decimal,
    pub waste_area: Decimal,
    pub waste_percent: Decimal,
    pub small_waste: bool,
    pub has_enough_stock: bool,
    pub suggestion: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct InventoryAnalysis {
    pub order_id: i64,
    pub client_id: i64,
    pub deposit: Decimal,
    pub total: Decimal,
    pub deposit_percent: Decimal,
    pub can_confirm: bool,
    pub lines: Vec<InventoryLineAnalysis>,
    pub stock_errors: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WasteDecision {
    pub product_id: i64,
    pub keep_waste: bool,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ConfirmedLine {
    pub product_id: i64,
    pub product_name: String,
    pub pieces_needed: i64,
    pub pieces_exact: Decimal,
    pub stock_before: i64,
    pub stock_after: i64,
    pub area_required: Decimal,
    pub area_used: Decimal,
    pub waste_area: Decimal,
    pub waste_kept: bool,
    pub insufficient_stock: bool,
    pub deficit: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct KeptWaste {
    pub waste_id: i64,
    pub product_name: String,
    pub area_wasted: Decimal,
    pub waste_percent: Decimal,
    pub status: WasteStatus,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct InventoryConfirmation {
    pub order_id: i64,
    pub lines: Vec<ConfirmedLine>,
    pub kept_waste: Vec<KeptWaste>,
    pub insufficient_stock: bool,
}

impl InventoryConfirmation {
    pub fn lines_with_deficit(&self) -> Vec<&ConfirmedLine> {
        self.lines.iter().filter(|l| l.insufficient_stock).collect()
    }
}

// ========== Deposit ledger (anticipos) ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerKind {
    Nuevo,
}

impl LedgerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerKind::Nuevo => "nuevo",
        }
    }
}

impl FromStr for LedgerKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nuevo" => Ok(LedgerKind::Nuevo),
            other => Err(AppError::Validation(format!("invalid ledger kind '{}'", other))),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LedgerEntry {
    pub id: i64,
    pub order_id: i64,
    pub user_id: i64,
    pub user_name: Option<String>,
    pub amount: Decimal,
    pub kind: LedgerKind,
    pub notes: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DepositHistory {
    pub order_id: i64,
    pub deposit_total: Decimal,
    pub order_total: Decimal,
    pub pending_balance: Decimal,
    pub entries: Vec<LedgerEntry>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DepositReceipt {
    pub order: Order,
    pub entry: LedgerEntry,
    pub pending_balance: Decimal,
    pub history: Vec<LedgerEntry>,
}
