// src/models/nomenclatures.rs

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// --- Enums ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "numbering_type", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NumberingType {
    Fiscal,   // Exatamente 10 dígitos, sem prefixo
    Internal, // {prefixo}{número com zeros à esquerda}
}

/// Direção de estoque dos documentos de um tipo ('IN', 'OUT' ou 'NONE').
pub mod inventory_direction {
    pub const IN: &str = "IN";
    pub const OUT: &str = "OUT";
    pub const NONE: &str = "NONE";
}

// --- Workflow configurável ---

/// Tipo de documento: declara os status permitidos, as transições (via
/// regras de aprovação) e os efeitos de estoque de cada status.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DocumentType {
    pub id: Uuid,
    pub type_key: String,
    pub name: String,
    pub requires_approval: bool,
    pub inventory_direction: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Dicionário de status; um status pode ser usado por vários tipos.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DocumentStatus {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub is_active: bool,
}

/// Configuração de um status dentro de um tipo de documento.
/// Os gatilhos de estoque moram aqui, não no código.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DocumentTypeStatus {
    pub id: Uuid,
    pub document_type_id: Uuid,
    pub status_id: Uuid,

    pub is_initial: bool,
    pub is_final: bool,
    pub is_cancellation: bool,
    pub allows_editing: bool,

    // === GATILHOS DE ESTOQUE ===
    pub creates_inventory_movements: bool,
    pub reverses_inventory_movements: bool,
    pub allows_movement_correction: bool,
    pub auto_correct_movements_on_edit: bool,

    pub sort_order: i32,
    pub is_active: bool,
}

// --- Aprovação ---

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRule {
    pub id: Uuid,
    pub document_type_id: Uuid,
    pub from_status: String,
    pub to_status: String,

    pub min_amount: Decimal,
    pub max_amount: Option<Decimal>,

    // Lista JSON de ids de usuário autorizados
    pub approver_user_ids: serde_json::Value,

    pub priority: i32,
    pub approval_level: i32,
    pub is_active: bool,
}

impl ApprovalRule {
    pub fn approvers(&self) -> Vec<Uuid> {
        serde_json::from_value(self.approver_user_ids.clone()).unwrap_or_default()
    }

    pub fn amount_in_range(&self, total: Decimal) -> bool {
        if total < self.min_amount {
            return false;
        }
        match self.max_amount {
            Some(max) => total <= max,
            None => true,
        }
    }

    /// Uma regra casa quando o total cabe na faixa e o ator pertence ao
    /// conjunto de aprovadores.
    pub fn matches(&self, total: Decimal, user_id: Uuid) -> bool {
        self.amount_in_range(total) && self.approvers().contains(&user_id)
    }
}

/// Trilha de auditoria imutável das transições executadas.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalLog {
    pub id: Uuid,
    pub document_id: Uuid,
    pub actor_id: Uuid,
    pub from_status: String,
    pub to_status: String,
    pub rule_id: Option<Uuid>,
    pub comments: String,
    pub created_at: DateTime<Utc>,
}

// --- Numeração ---

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct NumberingConfiguration {
    pub id: Uuid,
    pub document_type_id: Uuid,
    pub name: String,

    pub numbering_type: NumberingType,
    pub prefix: String,
    pub digits_count: i32,
    pub current_number: i64,
    pub max_number: Option<i64>,

    pub reset_yearly: bool,
    pub last_reset_year: Option<i32>,

    // Preferências: user > location > padrão do tipo
    pub location_id: Option<Uuid>,
    pub user_id: Option<Uuid>,

    pub is_active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn rule(min: Decimal, max: Option<Decimal>, approver: Uuid) -> ApprovalRule {
        ApprovalRule {
            id: Uuid::new_v4(),
            document_type_id: Uuid::new_v4(),
            from_status: "draft".into(),
            to_status: "submitted".into(),
            min_amount: min,
            max_amount: max,
            approver_user_ids: json!([approver]),
            priority: 0,
            approval_level: 1,
            is_active: true,
        }
    }

    #[test]
    fn rule_matches_amount_and_approver() {
        let user = Uuid::new_v4();
        let r = rule(dec!(0), Some(dec!(1000)), user);

        assert!(r.matches(dec!(500), user));
        assert!(r.matches(dec!(1000), user));
        assert!(!r.matches(dec!(1000.01), user));
        assert!(!r.matches(dec!(500), Uuid::new_v4()));
    }

    #[test]
    fn rule_without_upper_bound_is_open_ended() {
        let user = Uuid::new_v4();
        let r = rule(dec!(100), None, user);

        assert!(!r.matches(dec!(99.99), user));
        assert!(r.matches(dec!(1_000_000), user));
    }
}
