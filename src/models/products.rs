// src/models/products.rs

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// --- Enums (Mapeamento do Postgres) ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "unit_type", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnitType {
    Piece,  // Contável (un)
    Weight, // Peso (kg)
    Volume, // Volume (L)
    Length, // Comprimento (m)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "lifecycle_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleStatus {
    New,          // Cadastrado, ainda não vendável
    Active,       // Compra e venda liberadas
    PhaseOut,     // Vende o que resta, não compra mais
    Discontinued, // Fora de linha
}

// --- Structs Principais ---

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TaxGroup {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub rate: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: Uuid,
    pub code: String,
    pub name: String,

    pub base_unit: String,
    pub unit_type: UnitType,
    pub tax_group_id: Option<Uuid>,

    pub lifecycle_status: LifecycleStatus,
    pub sales_blocked: bool,
    pub purchase_blocked: bool,

    pub track_batches: bool,
    pub track_serial_numbers: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// PHASE_OUT ainda vende o saldo restante; NEW ainda não vende.
    pub fn is_sellable(&self) -> bool {
        !self.sales_blocked
            && matches!(
                self.lifecycle_status,
                LifecycleStatus::Active | LifecycleStatus::PhaseOut
            )
    }

    /// PHASE_OUT e DISCONTINUED não recebem compras novas.
    pub fn is_purchasable(&self) -> bool {
        !self.purchase_blocked
            && matches!(
                self.lifecycle_status,
                LifecycleStatus::New | LifecycleStatus::Active
            )
    }
}
