// src/models/pricing.rs

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// --- Enums ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "pricing_method", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PricingMethod {
    Fixed,  // Preço fixo cadastrado
    Markup, // Custo médio + margem própria
    Auto,   // Custo médio + margem padrão do local
}

/// Qual camada do resolvedor produziu o preço final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PricingRule {
    Promotion,
    CustomerGroup,
    StepPrice,
    BasePrice,
    Fallback,
}

// --- Structs Principais ---

/// Preço base por (local, produto). `effective_price` é o valor calculado
/// e cacheado; recalculado quando o custo médio muda mais de 5%.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ProductPrice {
    pub id: Uuid,
    pub location_id: Uuid,
    pub product_id: Uuid,

    pub pricing_method: PricingMethod,
    pub base_price: Option<Decimal>,
    pub markup_percentage: Option<Decimal>,
    pub effective_price: Decimal,

    pub is_active: bool,
    pub last_cost_update: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ProductGroupPrice {
    pub id: Uuid,
    pub location_id: Uuid,
    pub product_id: Uuid,
    pub price_group_id: Uuid,
    pub min_quantity: Decimal,
    pub price: Decimal,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ProductStepPrice {
    pub id: Uuid,
    pub location_id: Uuid,
    pub product_id: Uuid,
    pub min_quantity: Decimal,
    pub price: Decimal,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PromotionalPrice {
    pub id: Uuid,
    pub location_id: Uuid,
    pub product_id: Uuid,

    pub name: String,
    pub promotional_price: Decimal,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,

    pub min_quantity: Option<Decimal>,
    pub max_quantity: Option<Decimal>,

    // Sem grupo = promoção vale para qualquer cliente
    pub price_group_id: Option<Uuid>,

    pub priority: i32,
    pub is_active: bool,
}

impl PromotionalPrice {
    pub fn is_valid_for_date(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }

    pub fn is_valid_for_quantity(&self, quantity: Decimal) -> bool {
        if let Some(min) = self.min_quantity {
            if quantity < min {
                return false;
            }
        }
        if let Some(max) = self.max_quantity {
            if quantity > max {
                return false;
            }
        }
        true
    }

    pub fn applies_to_group(&self, price_group_id: Option<Uuid>) -> bool {
        match self.price_group_id {
            None => true,
            Some(required) => price_group_id == Some(required),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ProductPackaging {
    pub id: Uuid,
    pub product_id: Uuid,
    pub unit: String,
    pub conversion_factor: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PackagingPrice {
    pub id: Uuid,
    pub location_id: Uuid,
    pub packaging_id: Uuid,
    pub pricing_method: PricingMethod,
    pub price: Decimal,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ProductBarcode {
    pub id: Uuid,
    pub product_id: Uuid,
    pub packaging_id: Option<Uuid>,
    pub barcode: String,
    pub is_active: bool,
}
