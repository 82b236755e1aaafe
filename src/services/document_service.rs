// src/services/document_service.rs

use rust_decimal::Decimal;
use serde_json::json;
use sqlx::{Acquire, Executor, Postgres};
use uuid::Uuid;
use validator::Validate;

use crate::{
    common::{error::AppError, result::ServiceResult},
    db::{DocumentsRepository, NomenclaturesRepository},
    models::documents::{Document, DocumentKind, DocumentLine, NewDocument, NewDocumentLine},
    models::nomenclatures::inventory_direction,
    services::movement_service::MovementService,
    services::numbering_service::NumberingService,
};

/// Ciclo de vida de documentos: criação numerada, linhas com totais e
/// imposto calculados, edição controlada pelo status e correção automática
/// de movimentos quando o status configurar isso.
#[derive(Clone)]
pub struct DocumentService {
    documents_repo: DocumentsRepository,
    nomenclatures_repo: NomenclaturesRepository,
    numbering_service: NumberingService,
    movement_service: MovementService,
}

// =========================================================================
//  CÁLCULOS FINANCEIROS (puros)
// =========================================================================

/// Total da linha: quantidade × preço unitário × (1 − desconto%).
pub fn calculate_line_total(
    quantity: Decimal,
    unit_price: Decimal,
    discount_percent: Decimal,
) -> Decimal {
    (quantity * unit_price * (Decimal::ONE - discount_percent / Decimal::from(100))).round_dp(2)
}

/// Imposto da linha. Preço sem imposto: `total × alíquota`; preço com
/// imposto embutido: derivado por `total × alíquota / (100 + alíquota)`.
pub fn calculate_line_vat(
    line_total: Decimal,
    tax_rate: Decimal,
    prices_include_vat: bool,
) -> Decimal {
    if tax_rate <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let vat = if prices_include_vat {
        line_total * tax_rate / (Decimal::from(100) + tax_rate)
    } else {
        line_total * tax_rate / Decimal::from(100)
    };
    vat.round_dp(2)
}

impl DocumentService {
    pub fn new(
        documents_repo: DocumentsRepository,
        nomenclatures_repo: NomenclaturesRepository,
        numbering_service: NumberingService,
        movement_service: MovementService,
    ) -> Self {
        Self {
            documents_repo,
            nomenclatures_repo,
            numbering_service,
            movement_service,
        }
    }

    // =========================================================================
    //  CRIAÇÃO
    // =========================================================================

    /// Cria um documento no status inicial do tipo, com número alocado pelo
    /// serviço de numeração dentro da mesma transação.
    pub async fn create_document<'e, E>(
        &self,
        executor: E,
        payload: NewDocument,
        created_by: Option<Uuid>,
    ) -> Result<Document, AppError>
    where
        E: Executor<'e, Database = Postgres> + Acquire<'e, Database = Postgres>,
    {
        payload.validate()?;

        let mut tx = executor.begin().await?;

        let document_type = self
            .nomenclatures_repo
            .get_document_type_by_key(&mut *tx, &payload.type_key)
            .await?;

        let document_number = self
            .numbering_service
            .next_number(&mut *tx, &document_type, Some(payload.location_id), created_by)
            .await?;

        let initial_status = self
            .nomenclatures_repo
            .get_initial_status_code(&mut *tx, document_type.id)
            .await?;

        let document = self
            .documents_repo
            .insert_document(
                &mut *tx,
                payload.kind,
                document_type.id,
                &document_number,
                payload.document_date,
                &initial_status,
                payload.supplier_id,
                payload.location_id,
                payload.prices_include_vat,
                payload.urgency_level,
                payload.requested_by,
                &payload.notes,
                created_by,
            )
            .await?;

        tx.commit().await?;

        tracing::info!(
            "✅ Documento criado: {} ({:?}) no status '{}'",
            document.document_number,
            document.kind,
            document.status
        );
        Ok(document)
    }

    // =========================================================================
    //  LINHAS
    // =========================================================================

    /// Acrescenta uma linha: só em status com `allows_editing`, com total e
    /// imposto calculados e o cache financeiro do cabeçalho refeito. Status
    /// com `auto_correct_movements_on_edit` gera o ajuste compensatório.
    pub async fn add_line<'e, E>(
        &self,
        executor: E,
        document_id: Uuid,
        payload: NewDocumentLine,
        actor: Option<Uuid>,
    ) -> Result<DocumentLine, AppError>
    where
        E: Executor<'e, Database = Postgres> + Acquire<'e, Database = Postgres>,
    {
        payload.validate()?;
        if payload.quantity <= Decimal::ZERO {
            return Err(AppError::InvalidQuantity(payload.quantity));
        }
        if payload.discount_percent < Decimal::ZERO || payload.discount_percent > Decimal::from(100)
        {
            return Err(AppError::ValidationError(validator::ValidationErrors::new()));
        }

        let mut tx = executor.begin().await?;

        let document = self
            .documents_repo
            .get_document_for_update(&mut *tx, document_id)
            .await?;
        let type_status = self
            .nomenclatures_repo
            .get_type_status(&mut *tx, document.document_type_id, &document.status)
            .await?
            .ok_or_else(|| AppError::EditNotAllowed(document.status.clone()))?;

        if !type_status.allows_editing {
            return Err(AppError::EditNotAllowed(document.status.clone()));
        }

        // 1. Totais da linha
        let tax_rate = self
            .documents_repo
            .get_tax_rate_for_product(&mut *tx, payload.product_id)
            .await?;
        let line_total =
            calculate_line_total(payload.quantity, payload.unit_price, payload.discount_percent);
        let vat_amount =
            calculate_line_vat(line_total, tax_rate, document.prices_include_vat);

        // 2. Grava e refaz o cache do cabeçalho
        let line_number = self
            .documents_repo
            .next_line_number(&mut *tx, document_id)
            .await?;
        let line = self
            .documents_repo
            .insert_line(
                &mut *tx,
                document_id,
                line_number,
                payload.product_id,
                payload.quantity,
                &payload.unit,
                payload.unit_price,
                payload.discount_percent,
                payload.batch_number.as_deref(),
                payload.expiry_date,
                line_total,
                vat_amount,
            )
            .await?;
        self.documents_repo
            .recalculate_totals(&mut *tx, document_id)
            .await?;

        // 3. Status que corrige movimentos na edição: ajusta a diferença
        if type_status.auto_correct_movements_on_edit {
            self.compensate_line_delta(&mut tx, &document, &line, payload.quantity, actor)
                .await?;
        }

        tx.commit().await?;
        Ok(line)
    }

    /// Edita quantidade/preço/desconto de uma linha sob as mesmas regras.
    #[allow(clippy::too_many_arguments)]
    pub async fn update_line<'e, E>(
        &self,
        executor: E,
        document_id: Uuid,
        line_number: i32,
        quantity: Decimal,
        unit_price: Decimal,
        discount_percent: Decimal,
        actor: Option<Uuid>,
    ) -> Result<DocumentLine, AppError>
    where
        E: Executor<'e, Database = Postgres> + Acquire<'e, Database = Postgres>,
    {
        if quantity <= Decimal::ZERO {
            return Err(AppError::InvalidQuantity(quantity));
        }

        let mut tx = executor.begin().await?;

        let document = self
            .documents_repo
            .get_document_for_update(&mut *tx, document_id)
            .await?;
        let type_status = self
            .nomenclatures_repo
            .get_type_status(&mut *tx, document.document_type_id, &document.status)
            .await?
            .ok_or_else(|| AppError::EditNotAllowed(document.status.clone()))?;

        if !type_status.allows_editing {
            return Err(AppError::EditNotAllowed(document.status.clone()));
        }

        let old_line = self
            .documents_repo
            .get_line(&mut *tx, document_id, line_number)
            .await?;

        let tax_rate = self
            .documents_repo
            .get_tax_rate_for_product(&mut *tx, old_line.product_id)
            .await?;
        let line_total = calculate_line_total(quantity, unit_price, discount_percent);
        let vat_amount = calculate_line_vat(line_total, tax_rate, document.prices_include_vat);

        let line = self
            .documents_repo
            .update_line(
                &mut *tx,
                old_line.id,
                quantity,
                unit_price,
                discount_percent,
                line_total,
                vat_amount,
            )
            .await?;
        self.documents_repo
            .recalculate_totals(&mut *tx, document_id)
            .await?;

        let delta = quantity - old_line.quantity;
        if type_status.auto_correct_movements_on_edit && delta != Decimal::ZERO {
            self.compensate_line_delta(&mut tx, &document, &line, delta, actor)
                .await?;
        }

        tx.commit().await?;
        Ok(line)
    }

    // Ajuste compensatório para edições em status que já movimentou estoque
    async fn compensate_line_delta(
        &self,
        conn: &mut sqlx::PgConnection,
        document: &Document,
        line: &DocumentLine,
        quantity_delta: Decimal,
        actor: Option<Uuid>,
    ) -> Result<(), AppError> {
        let document_type = self
            .nomenclatures_repo
            .get_document_type(&mut *conn, document.document_type_id)
            .await?;

        let signed_qty = match document_type.inventory_direction.as_str() {
            inventory_direction::IN => quantity_delta,
            inventory_direction::OUT => -quantity_delta,
            _ => return Ok(()),
        };

        self.movement_service
            .create_adjustment(
                &mut *conn,
                document.location_id,
                line.product_id,
                signed_qty,
                &format!(
                    "Correção automática da linha {} do documento {}",
                    line.line_number, document.document_number
                ),
                Some(document.document_date),
                Some(line.unit_price),
                line.batch_number.clone(),
                actor,
            )
            .await?;
        Ok(())
    }

    // =========================================================================
    //  INTEGRIDADE
    // =========================================================================

    /// Valida a consistência estrutural do documento (linhas presentes,
    /// quantidades positivas) e devolve a lista de problemas.
    pub async fn validate_document_integrity<'e, E>(
        &self,
        executor: E,
        document_id: Uuid,
    ) -> Result<ServiceResult, AppError>
    where
        E: Executor<'e, Database = Postgres> + Acquire<'e, Database = Postgres>,
    {
        let mut tx = executor.begin().await?;
        let document = self.documents_repo.get_document(&mut *tx, document_id).await?;
        let lines = self.documents_repo.get_lines(&mut *tx, document_id).await?;
        tx.commit().await?;

        let mut issues = Vec::new();

        if lines.is_empty() {
            issues.push(json!({
                "type": "no_lines",
                "severity": "error",
                "message": "Documento sem linhas",
            }));
        }

        for line in &lines {
            if line.quantity <= Decimal::ZERO {
                issues.push(json!({
                    "type": "invalid_quantity",
                    "severity": "error",
                    "line": line.line_number,
                    "message": format!("Linha {}: quantidade inválida", line.line_number),
                }));
            }
        }

        let error_count = issues
            .iter()
            .filter(|i| i["severity"] == "error")
            .count();
        let is_valid = error_count == 0;

        Ok(ServiceResult::success(
            json!({
                "is_valid": is_valid,
                "error_count": error_count,
                "validation_issues": issues,
                "document_number": document.document_number,
            }),
            if is_valid { "Documento válido" } else { "Documento com problemas" },
        ))
    }

    // =========================================================================
    //  CONVERSÃO PEDIDO → ORDEM
    // =========================================================================

    /// Converte um pedido de compra em ordem de compra: a ordem nasce no
    /// status inicial do tipo informado com as mesmas linhas, e o pedido
    /// guarda a referência unidirecional para a ordem.
    pub async fn convert_request_to_order<'e, E>(
        &self,
        executor: E,
        request_id: Uuid,
        order_type_key: &str,
        actor: Option<Uuid>,
    ) -> Result<Document, AppError>
    where
        E: Executor<'e, Database = Postgres> + Acquire<'e, Database = Postgres>,
    {
        let mut tx = executor.begin().await?;

        let request = self
            .documents_repo
            .get_document_for_update(&mut *tx, request_id)
            .await?;

        if request.kind != DocumentKind::PurchaseRequest {
            return Err(AppError::ConversionNotAllowed(format!(
                "documento {} não é um pedido de compra",
                request.document_number
            )));
        }
        if request.converted_to_order_id.is_some() {
            return Err(AppError::ConversionNotAllowed(format!(
                "pedido {} já foi convertido",
                request.document_number
            )));
        }

        let order_type = self
            .nomenclatures_repo
            .get_document_type_by_key(&mut *tx, order_type_key)
            .await?;
        let order_number = self
            .numbering_service
            .next_number(&mut *tx, &order_type, Some(request.location_id), actor)
            .await?;
        let initial_status = self
            .nomenclatures_repo
            .get_initial_status_code(&mut *tx, order_type.id)
            .await?;

        let order = self
            .documents_repo
            .insert_document(
                &mut *tx,
                DocumentKind::PurchaseOrder,
                order_type.id,
                &order_number,
                request.document_date,
                &initial_status,
                request.supplier_id,
                request.location_id,
                request.prices_include_vat,
                None,
                None,
                &format!("Gerado do pedido {}", request.document_number),
                actor,
            )
            .await?;

        // Copia as linhas com os valores já calculados
        let lines = self.documents_repo.get_lines(&mut *tx, request_id).await?;
        for line in &lines {
            self.documents_repo
                .insert_line(
                    &mut *tx,
                    order.id,
                    line.line_number,
                    line.product_id,
                    line.quantity,
                    &line.unit,
                    line.unit_price,
                    line.discount_percent,
                    line.batch_number.as_deref(),
                    line.expiry_date,
                    line.line_total,
                    line.vat_amount,
                )
                .await?;
        }
        let order = self.documents_repo.recalculate_totals(&mut *tx, order.id).await?;

        self.documents_repo
            .set_converted_to_order(&mut *tx, request_id, order.id)
            .await?;

        tx.commit().await?;

        tracing::info!(
            "✅ Pedido {} convertido na ordem {}",
            request.document_number,
            order.document_number
        );
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn line_total_applies_discount() {
        assert_eq!(calculate_line_total(dec!(3), dec!(4), dec!(0)), dec!(12.00));
        assert_eq!(calculate_line_total(dec!(10), dec!(5), dec!(10)), dec!(45.00));
        assert_eq!(calculate_line_total(dec!(2), dec!(7.99), dec!(100)), dec!(0.00));
    }

    #[test]
    fn vat_excluded_is_rate_over_total() {
        // 12.00 a 20%: imposto por fora
        assert_eq!(calculate_line_vat(dec!(12.00), dec!(20), false), dec!(2.40));
    }

    #[test]
    fn vat_included_is_derived_from_total() {
        // 12.00 com 20% embutido: 12 × 20 / 120
        assert_eq!(calculate_line_vat(dec!(12.00), dec!(20), true), dec!(2.00));
    }

    #[test]
    fn zero_rate_means_zero_vat() {
        assert_eq!(calculate_line_vat(dec!(12.00), dec!(0), false), Decimal::ZERO);
        assert_eq!(calculate_line_vat(dec!(12.00), dec!(0), true), Decimal::ZERO);
    }
}
