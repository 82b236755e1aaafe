// src/services/approval_service.rs

use rust_decimal::Decimal;
use sqlx::{Acquire, Executor, PgConnection, Postgres};
use uuid::Uuid;

use crate::{
    common::error::AppError,
    db::{DocumentsRepository, InventoryRepository, NomenclaturesRepository},
    models::documents::{Document, DocumentKind},
    models::inventory::source_kind,
    models::nomenclatures::{inventory_direction, ApprovalRule, DocumentTypeStatus},
    services::movement_service::MovementService,
};

/// Máquina de estados orientada a dados: as transições válidas são as
/// regras de aprovação; os efeitos de estoque moram na configuração
/// status × tipo. Toda transição executada deixa exatamente um registro
/// na trilha de auditoria.
#[derive(Clone)]
pub struct ApprovalService {
    documents_repo: DocumentsRepository,
    nomenclatures_repo: NomenclaturesRepository,
    inventory_repo: InventoryRepository,
    movement_service: MovementService,
}

// =========================================================================
//  CASAMENTO DE REGRAS (puro)
// =========================================================================

/// Seleciona a regra de maior prioridade para a transição. A ordem de
/// diagnóstico segue o contrato: sem regra para o destino → NO_RULE; fora
/// da faixa de valor → AMOUNT_OUT_OF_RANGE; ator fora do conjunto →
/// PERMISSION_DENIED.
fn select_matching_rule<'r>(
    rules: &'r [ApprovalRule],
    from_status: &str,
    to_status: &str,
    total_amount: Decimal,
    user_id: Uuid,
) -> Result<&'r ApprovalRule, AppError> {
    let for_target: Vec<&ApprovalRule> =
        rules.iter().filter(|r| r.to_status == to_status).collect();
    if for_target.is_empty() {
        return Err(AppError::NoRule {
            from: from_status.to_string(),
            to: to_status.to_string(),
        });
    }

    let in_range: Vec<&ApprovalRule> = for_target
        .iter()
        .copied()
        .filter(|r| r.amount_in_range(total_amount))
        .collect();
    if in_range.is_empty() {
        return Err(AppError::AmountOutOfRange);
    }

    // As regras chegam ordenadas por prioridade decrescente
    in_range
        .into_iter()
        .find(|r| r.approvers().contains(&user_id))
        .ok_or(AppError::PermissionDenied)
}

/// Origem de documento usada no razão para cada espécie.
fn document_source_kind(kind: DocumentKind) -> &'static str {
    match kind {
        DocumentKind::PurchaseRequest => "PURCHASE_REQUEST",
        DocumentKind::PurchaseOrder => source_kind::PURCHASE,
        DocumentKind::DeliveryReceipt => source_kind::DELIVERY,
    }
}

impl ApprovalService {
    pub fn new(
        documents_repo: DocumentsRepository,
        nomenclatures_repo: NomenclaturesRepository,
        inventory_repo: InventoryRepository,
        movement_service: MovementService,
    ) -> Self {
        Self {
            documents_repo,
            nomenclatures_repo,
            inventory_repo,
            movement_service,
        }
    }

    // =========================================================================
    //  CONSULTA
    // =========================================================================

    /// Regras que o usuário pode executar a partir do status atual do
    /// documento, em ordem de prioridade.
    pub async fn available_transitions<'e, E>(
        &self,
        executor: E,
        document_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<ApprovalRule>, AppError>
    where
        E: Executor<'e, Database = Postgres> + Acquire<'e, Database = Postgres>,
    {
        let mut tx = executor.begin().await?;

        let document = self.documents_repo.get_document(&mut *tx, document_id).await?;
        let rules = self
            .nomenclatures_repo
            .get_rules_from_status(&mut *tx, document.document_type_id, &document.status)
            .await?;
        tx.commit().await?;

        Ok(rules
            .into_iter()
            .filter(|rule| rule.matches(document.total_amount, user_id))
            .collect())
    }

    // =========================================================================
    //  EXECUÇÃO
    // =========================================================================

    /// Executa a transição: casa a regra, grava a trilha, muda o status e
    /// dispara os efeitos de estoque do status de destino. Falha em efeito
    /// colateral desfaz a transação inteira.
    pub async fn execute_transition<'e, E>(
        &self,
        executor: E,
        document_id: Uuid,
        to_status: &str,
        user_id: Uuid,
        comments: &str,
    ) -> Result<Document, AppError>
    where
        E: Executor<'e, Database = Postgres> + Acquire<'e, Database = Postgres>,
    {
        let mut tx = executor.begin().await?;

        // 1. Trava o cabeçalho: uma transição por vez por documento
        let document = self
            .documents_repo
            .get_document_for_update(&mut *tx, document_id)
            .await?;

        // 2. O status de destino precisa existir na configuração do tipo
        let target_status = self
            .nomenclatures_repo
            .get_type_status(&mut *tx, document.document_type_id, to_status)
            .await?
            .ok_or_else(|| AppError::InvalidTransition {
                from: document.status.clone(),
                to: to_status.to_string(),
            })?;

        // 3. Regra de maior prioridade que cubra valor e ator
        let rules = self
            .nomenclatures_repo
            .get_rules_from_status(&mut *tx, document.document_type_id, &document.status)
            .await?;
        let rule = select_matching_rule(
            &rules,
            &document.status,
            to_status,
            document.total_amount,
            user_id,
        )?;

        // 4. Trilha de auditoria (exatamente um registro por transição)
        self.nomenclatures_repo
            .insert_approval_log(
                &mut *tx,
                document.id,
                user_id,
                &document.status,
                to_status,
                Some(rule.id),
                comments,
            )
            .await?;

        // 5. Muda o status
        let updated = self
            .documents_repo
            .update_status(&mut *tx, document.id, to_status)
            .await?;

        // 6. Efeitos de estoque declarados no status de destino
        self.apply_status_side_effects(&mut tx, &updated, &target_status, user_id)
            .await?;

        tx.commit().await?;

        tracing::info!(
            "✅ Transição executada: {} {} → {to_status} por {user_id}",
            updated.document_number,
            document.status
        );
        Ok(updated)
    }

    /// Rejeita o documento levando-o ao status de cancelamento do tipo,
    /// se definido e se alguma regra autorizar o ator.
    pub async fn reject_document<'e, E>(
        &self,
        executor: E,
        document_id: Uuid,
        user_id: Uuid,
        reason: &str,
    ) -> Result<Document, AppError>
    where
        E: Executor<'e, Database = Postgres> + Acquire<'e, Database = Postgres>,
    {
        let mut tx = executor.begin().await?;

        let document = self.documents_repo.get_document(&mut *tx, document_id).await?;
        let cancellation = self
            .nomenclatures_repo
            .get_cancellation_status_code(&mut *tx, document.document_type_id)
            .await?
            .ok_or_else(|| AppError::InvalidTransition {
                from: document.status.clone(),
                to: "<cancelamento>".to_string(),
            })?;

        let rejected = self
            .execute_transition(&mut *tx, document_id, &cancellation, user_id, reason)
            .await?;

        tx.commit().await?;
        Ok(rejected)
    }

    // ---
    // Efeitos colaterais de status
    // ---

    async fn apply_status_side_effects(
        &self,
        conn: &mut PgConnection,
        document: &Document,
        target_status: &DocumentTypeStatus,
        user_id: Uuid,
    ) -> Result<(), AppError> {
        if target_status.creates_inventory_movements {
            self.create_movements_for_document(&mut *conn, document, user_id)
                .await
                .map_err(|e| AppError::SideEffectFailed(e.to_string()))?;
        }

        if target_status.reverses_inventory_movements {
            self.reverse_movements_for_document(&mut *conn, document, user_id)
                .await
                .map_err(|e| AppError::SideEffectFailed(e.to_string()))?;
        }

        Ok(())
    }

    // Uma perna de movimento por linha, na direção declarada pelo tipo
    async fn create_movements_for_document(
        &self,
        conn: &mut PgConnection,
        document: &Document,
        user_id: Uuid,
    ) -> Result<(), AppError> {
        let document_type = self
            .nomenclatures_repo
            .get_document_type(&mut *conn, document.document_type_id)
            .await?;
        let lines = self.documents_repo.get_lines(&mut *conn, document.id).await?;
        let kind = document_source_kind(document.kind);

        for line in &lines {
            match document_type.inventory_direction.as_str() {
                inventory_direction::IN => {
                    self.movement_service
                        .create_incoming(
                            &mut *conn,
                            document.location_id,
                            line.product_id,
                            line.quantity,
                            line.unit_price,
                            kind,
                            &document.document_number,
                            Some(line.line_number),
                            Some(document.document_date),
                            line.batch_number.clone(),
                            line.expiry_date,
                            &format!("Recebimento (linha {})", line.line_number),
                            Some(user_id),
                        )
                        .await?;
                }
                inventory_direction::OUT => {
                    self.movement_service
                        .create_outgoing(
                            &mut *conn,
                            document.location_id,
                            line.product_id,
                            line.quantity,
                            kind,
                            &document.document_number,
                            Some(line.line_number),
                            Some(document.document_date),
                            &format!("Expedição (linha {})", line.line_number),
                            Some(user_id),
                            true,
                            None,
                            None,
                            line.batch_number.clone(),
                            None,
                            None,
                        )
                        .await?;
                }
                _ => {}
            }
        }

        Ok(())
    }

    // Estorna tudo que o documento gerou, casando por (origem, número)
    async fn reverse_movements_for_document(
        &self,
        conn: &mut PgConnection,
        document: &Document,
        user_id: Uuid,
    ) -> Result<(), AppError> {
        let kind = document_source_kind(document.kind);
        let movements = self
            .inventory_repo
            .get_movements_for_document(&mut *conn, kind, &document.document_number)
            .await?;

        for movement in &movements {
            self.movement_service
                .reverse_movement(
                    &mut *conn,
                    movement.id,
                    &format!("Estorno do documento {}", document.document_number),
                    Some(user_id),
                )
                .await?;
        }

        tracing::info!(
            "Estornados {} movimentos do documento {}",
            movements.len(),
            document.document_number
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn rule(
        to_status: &str,
        min: Decimal,
        max: Option<Decimal>,
        approvers: Vec<Uuid>,
        priority: i32,
    ) -> ApprovalRule {
        ApprovalRule {
            id: Uuid::new_v4(),
            document_type_id: Uuid::new_v4(),
            from_status: "draft".into(),
            to_status: to_status.into(),
            min_amount: min,
            max_amount: max,
            approver_user_ids: json!(approvers),
            priority,
            approval_level: 1,
            is_active: true,
        }
    }

    #[test]
    fn no_rule_for_target_status() {
        let user = Uuid::new_v4();
        let rules = vec![rule("approved", dec!(0), None, vec![user], 0)];
        let err = select_matching_rule(&rules, "draft", "cancelled", dec!(10), user).unwrap_err();
        assert_eq!(err.code(), "NO_RULE");
    }

    #[test]
    fn amount_out_of_range_beats_permission() {
        let user = Uuid::new_v4();
        let rules = vec![rule("approved", dec!(0), Some(dec!(100)), vec![user], 0)];
        let err =
            select_matching_rule(&rules, "draft", "approved", dec!(500), user).unwrap_err();
        assert_eq!(err.code(), "AMOUNT_OUT_OF_RANGE");
    }

    #[test]
    fn actor_outside_approver_set_is_denied() {
        let rules = vec![rule("approved", dec!(0), None, vec![Uuid::new_v4()], 0)];
        let err = select_matching_rule(&rules, "draft", "approved", dec!(10), Uuid::new_v4())
            .unwrap_err();
        assert_eq!(err.code(), "PERMISSION_DENIED");
    }

    #[test]
    fn highest_priority_matching_rule_wins() {
        let user = Uuid::new_v4();
        // A lista chega ordenada por prioridade decrescente, como no repo
        let high = rule("approved", dec!(0), None, vec![user], 10);
        let low = rule("approved", dec!(0), None, vec![user], 1);
        let high_id = high.id;
        let rules = vec![high, low];

        let selected = select_matching_rule(&rules, "draft", "approved", dec!(10), user).unwrap();
        assert_eq!(selected.id, high_id);
    }

    #[test]
    fn source_kind_per_document_kind() {
        assert_eq!(document_source_kind(DocumentKind::DeliveryReceipt), "DELIVERY");
        assert_eq!(document_source_kind(DocumentKind::PurchaseOrder), "PURCHASE");
        assert_eq!(
            document_source_kind(DocumentKind::PurchaseRequest),
            "PURCHASE_REQUEST"
        );
    }
}
