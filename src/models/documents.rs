// src/models/documents.rs

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

// --- Enums ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "document_kind", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentKind {
    PurchaseRequest,
    PurchaseOrder,
    DeliveryReceipt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "urgency_level", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UrgencyLevel {
    Low,
    Normal,
    High,
    Critical,
}

// --- Structs Principais ---

/// Cabeçalho único para pedido de compra, ordem de compra e recebimento.
/// O `kind` discrimina; o workflow vem do `document_type`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: Uuid,
    pub kind: DocumentKind,
    pub document_type_id: Uuid,

    pub document_number: String,
    pub document_date: NaiveDate,
    pub status: String,

    pub supplier_id: Option<Uuid>,
    pub location_id: Uuid,

    // Cache financeiro, recalculado quando as linhas mudam
    pub prices_include_vat: bool,
    pub total_amount: Decimal,
    pub vat_total: Decimal,

    // Campos de pedido de compra
    pub urgency_level: Option<UrgencyLevel>,
    pub requested_by: Option<Uuid>,
    pub converted_to_order_id: Option<Uuid>,

    pub notes: String,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DocumentLine {
    pub id: Uuid,
    pub document_id: Uuid,
    pub line_number: i32,
    pub product_id: Uuid,

    pub quantity: Decimal,
    pub unit: String,
    pub unit_price: Decimal,
    pub discount_percent: Decimal,

    pub batch_number: Option<String>,
    pub expiry_date: Option<NaiveDate>,

    // Calculados na gravação
    pub line_total: Decimal,
    pub vat_amount: Decimal,
}

// --- Payloads de criação ---

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewDocument {
    pub kind: DocumentKind,
    #[validate(length(min = 1, max = 30))]
    pub type_key: String,
    pub document_date: NaiveDate,
    pub location_id: Uuid,
    pub supplier_id: Option<Uuid>,
    #[serde(default)]
    pub prices_include_vat: bool,
    pub urgency_level: Option<UrgencyLevel>,
    pub requested_by: Option<Uuid>,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewDocumentLine {
    pub product_id: Uuid,
    pub quantity: Decimal,
    #[validate(length(min = 1, max = 10))]
    pub unit: String,
    pub unit_price: Decimal,
    #[serde(default)]
    pub discount_percent: Decimal,
    pub batch_number: Option<String>,
    pub expiry_date: Option<NaiveDate>,
}
