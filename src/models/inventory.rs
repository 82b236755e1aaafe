// src/models/inventory.rs

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::products::Product;

// --- Enums (Mapeamento do Postgres) ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "batch_tracking_mode", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchTrackingMode {
    Disabled, // Nunca usa lotes
    Optional, // Segue a configuração do produto
    Enforced, // Sempre exige lote
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "movement_type", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementType {
    In,
    Out,
    Transfer,
    Adjustment,
    Production,
    CycleCount,
}

/// Origens de documento reconhecidas pelo processador de movimentos.
/// O campo é texto livre no razão; estas são as chaves que o motor emite.
pub mod source_kind {
    pub const SALE: &str = "SALE";
    pub const POS_SALE: &str = "POS_SALE";
    pub const PURCHASE: &str = "PURCHASE";
    pub const DELIVERY: &str = "DELIVERY";
    pub const TRANSFER: &str = "TRANSFER";
    pub const ADJUSTMENT: &str = "ADJUSTMENT";
    pub const REVERSAL: &str = "REVERSAL";
    pub const CONVERSION: &str = "CONVERSION";
}

// --- Structs Principais ---

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct InventoryLocation {
    pub id: Uuid,
    pub code: String,
    pub name: String,

    pub allow_negative_stock: bool,
    pub default_markup_percentage: Decimal,
    pub batch_tracking_mode: BatchTrackingMode,

    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InventoryLocation {
    /// Decide se este local controla lotes para o produto dado.
    pub fn should_track_batches(&self, product: &Product) -> bool {
        match self.batch_tracking_mode {
            BatchTrackingMode::Disabled => false,
            BatchTrackingMode::Enforced => true,
            BatchTrackingMode::Optional => product.track_batches,
        }
    }
}

/// Registro imutável do razão de estoque. Nunca é alterado depois de
/// gravado; correções entram como novos registros (origem REVERSAL).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct InventoryMovement {
    pub id: Uuid,
    pub location_id: Uuid,
    pub product_id: Uuid,

    pub movement_type: MovementType,
    pub quantity: Decimal,
    pub cost_price: Decimal,

    // Preenchidos apenas em saídas de venda
    pub sale_price: Option<Decimal>,
    pub profit_amount: Option<Decimal>,
    pub profit_margin_percentage: Option<Decimal>,

    pub batch_number: Option<String>,
    pub expiry_date: Option<NaiveDate>,

    pub from_location_id: Option<Uuid>,
    pub to_location_id: Option<Uuid>,

    pub source_document_kind: String,
    pub source_document_number: String,
    pub source_document_line_id: Option<i32>,

    pub movement_date: NaiveDate,
    pub reason: String,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl InventoryMovement {
    pub fn total_cost_value(&self) -> Decimal {
        self.quantity * self.cost_price
    }

    pub fn total_sale_value(&self) -> Option<Decimal> {
        self.sale_price.map(|p| self.quantity * p)
    }

    pub fn total_profit(&self) -> Option<Decimal> {
        self.profit_amount.map(|p| self.quantity * p)
    }
}

/// Cache de saldo por (local, produto). Derivado do razão; pode ser
/// apagado e reconstruído a qualquer momento. Reservas não são derivadas.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItem {
    pub id: Uuid,
    pub location_id: Uuid,
    pub product_id: Uuid,

    pub current_qty: Decimal,
    pub reserved_qty: Decimal,

    pub avg_cost: Decimal,
    pub last_purchase_cost: Option<Decimal>,
    pub last_purchase_date: Option<NaiveDate>,
    pub last_sale_price: Option<Decimal>,
    pub last_sale_date: Option<NaiveDate>,

    pub min_stock_level: Decimal,
    pub max_stock_level: Decimal,

    pub last_movement_date: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl InventoryItem {
    /// Quantidade livre para venda (saldo físico menos reservas).
    pub fn available_qty(&self) -> Decimal {
        self.current_qty - self.reserved_qty
    }

    pub fn needs_reorder(&self) -> bool {
        self.min_stock_level > Decimal::ZERO && self.current_qty <= self.min_stock_level
    }

    pub fn stock_value(&self) -> Decimal {
        self.current_qty * self.avg_cost
    }
}

/// Cache de lote por (local, produto, lote, validade), consumido em FIFO.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct InventoryBatch {
    pub id: Uuid,
    pub location_id: Uuid,
    pub product_id: Uuid,

    pub batch_number: String,
    pub expiry_date: Option<NaiveDate>,

    pub received_qty: Decimal,
    pub remaining_qty: Decimal,
    pub cost_price: Decimal,
    pub received_date: DateTime<Utc>,

    pub is_unknown_batch: bool,
    pub conversion_date: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InventoryBatch {
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.expiry_date.map(|d| d < today).unwrap_or(false)
    }

    pub fn days_until_expiry(&self, today: NaiveDate) -> Option<i64> {
        self.expiry_date.map(|d| (d - today).num_days())
    }

    pub fn consumed_qty(&self) -> Decimal {
        self.received_qty - self.remaining_qty
    }
}

/// Lotes gerados automaticamente carregam estes prefixos no número.
pub fn is_unknown_batch_number(batch_number: &str) -> bool {
    batch_number.starts_with("AUTO_") || batch_number.starts_with("UNKNOWN_")
}

/// Rascunho de movimento montado pelo processador antes da gravação.
/// O processador resolve custo, preço e lucro; o razão só persiste.
#[derive(Debug, Clone)]
pub struct NewMovement {
    pub location_id: Uuid,
    pub product_id: Uuid,
    pub movement_type: MovementType,
    pub quantity: Decimal,
    pub cost_price: Decimal,
    pub sale_price: Option<Decimal>,
    pub profit_amount: Option<Decimal>,
    pub profit_margin_percentage: Option<Decimal>,
    pub batch_number: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    pub from_location_id: Option<Uuid>,
    pub to_location_id: Option<Uuid>,
    pub source_document_kind: String,
    pub source_document_number: String,
    pub source_document_line_id: Option<i32>,
    pub movement_date: NaiveDate,
    pub reason: String,
    pub created_by: Option<Uuid>,
}

/// Agregados do razão para relatórios de movimentação.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MovementStatsRow {
    pub total_movements: i64,
    pub total_in_qty: Decimal,
    pub total_out_qty: Decimal,
    pub total_in_value: Decimal,
    pub total_out_value: Decimal,
    pub total_revenue: Option<Decimal>,
    pub total_profit: Option<Decimal>,
    pub profit_movements_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn product(track_batches: bool) -> Product {
        use crate::models::products::{LifecycleStatus, UnitType};
        Product {
            id: Uuid::new_v4(),
            code: "P1".into(),
            name: "Produto".into(),
            base_unit: "un".into(),
            unit_type: UnitType::Piece,
            tax_group_id: None,
            lifecycle_status: LifecycleStatus::Active,
            sales_blocked: false,
            purchase_blocked: false,
            track_batches,
            track_serial_numbers: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn location(mode: BatchTrackingMode) -> InventoryLocation {
        InventoryLocation {
            id: Uuid::new_v4(),
            code: "L1".into(),
            name: "Loja".into(),
            allow_negative_stock: false,
            default_markup_percentage: dec!(30),
            batch_tracking_mode: mode,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn batch_tracking_follows_location_mode() {
        assert!(!location(BatchTrackingMode::Disabled).should_track_batches(&product(true)));
        assert!(location(BatchTrackingMode::Enforced).should_track_batches(&product(false)));
        assert!(location(BatchTrackingMode::Optional).should_track_batches(&product(true)));
        assert!(!location(BatchTrackingMode::Optional).should_track_batches(&product(false)));
    }

    #[test]
    fn unknown_batch_inferred_from_prefix() {
        assert!(is_unknown_batch_number("AUTO_P1_250801_L1"));
        assert!(is_unknown_batch_number("UNKNOWN_P1_20250801"));
        assert!(!is_unknown_batch_number("LOTE-2025-A"));
    }
}
