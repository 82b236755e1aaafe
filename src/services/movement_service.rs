// src/services/movement_service.rs

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use sqlx::{Acquire, Executor, PgConnection, Postgres};
use uuid::Uuid;

use crate::{
    common::{error::AppError, result::ServiceResult},
    db::InventoryRepository,
    models::inventory::{
        source_kind, InventoryBatch, InventoryMovement, MovementType, NewMovement,
    },
    services::pricing_service::PricingService,
    services::validation_service::ProductValidation,
};

/// Processador de movimentos: a única porta de escrita do razão.
///
/// Cada operação roda em uma transação e trava as linhas na ordem
/// determinística saldo → lotes (e origem antes de destino nas
/// transferências) para evitar deadlock.
#[derive(Clone)]
pub struct MovementService {
    inventory_repo: InventoryRepository,
    pricing_service: PricingService,
    validator: Arc<dyn ProductValidation>,
}

// =========================================================================
//  NÚCLEO PURO (testável sem banco)
// =========================================================================

/// Uma fatia de quantidade retirada de um lote durante a alocação FIFO.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchAllocation {
    pub batch_number: String,
    pub expiry_date: Option<NaiveDate>,
    pub cost_price: Decimal,
    pub quantity: Decimal,
}

/// Distribui a quantidade pedida pelos lotes na ordem recebida (o SQL já
/// entrega validade asc com nulos por último, recebimento asc, lote asc).
/// Devolve as alocações e o que faltou.
fn plan_fifo_allocation(
    batches: &[InventoryBatch],
    required: Decimal,
) -> (Vec<BatchAllocation>, Decimal) {
    let mut allocations = Vec::new();
    let mut remaining = required;

    for batch in batches {
        if remaining <= Decimal::ZERO {
            break;
        }
        if batch.remaining_qty <= Decimal::ZERO {
            continue;
        }

        let take = remaining.min(batch.remaining_qty);
        allocations.push(BatchAllocation {
            batch_number: batch.batch_number.clone(),
            expiry_date: batch.expiry_date,
            cost_price: batch.cost_price,
            quantity: take,
        });
        remaining -= take;
    }

    (allocations, remaining)
}

/// Hierarquia de custo inteligente: manual > custo do lote > custo médio
/// do cache > zero.
fn smart_cost(
    manual: Option<Decimal>,
    batch_cost: Option<Decimal>,
    avg_cost: Option<Decimal>,
) -> Decimal {
    if let Some(cost) = manual {
        return cost;
    }
    if let Some(cost) = batch_cost.filter(|c| *c > Decimal::ZERO) {
        return cost;
    }
    if let Some(cost) = avg_cost.filter(|c| *c > Decimal::ZERO) {
        return cost;
    }
    Decimal::ZERO
}

/// Lucro por unidade e margem percentual (2 casas), quando há preço de venda.
fn derive_profit(
    sale_price: Option<Decimal>,
    cost_price: Decimal,
) -> (Option<Decimal>, Option<Decimal>) {
    let Some(sale) = sale_price else {
        return (None, None);
    };
    let profit = sale - cost_price;
    let margin = if sale > Decimal::ZERO {
        Some((profit / sale * Decimal::from(100)).round_dp(2))
    } else {
        None
    };
    (Some(profit), margin)
}

/// Número de lote gerado quando o local exige lote e nenhum foi informado.
fn auto_batch_number(product_code: &str, movement_date: NaiveDate, location_code: &str) -> String {
    format!(
        "AUTO_{}_{}_{}",
        product_code,
        movement_date.format("%y%m%d"),
        location_code
    )
}

/// Variação de custo médio acima de 5% dispara o recálculo dos preços MARKUP.
fn cost_change_exceeds_threshold(old_cost: Decimal, new_cost: Decimal) -> bool {
    if old_cost <= Decimal::ZERO {
        return false;
    }
    let change = (new_cost - old_cost).abs() / old_cost * Decimal::from(100);
    change > Decimal::from(5)
}

/// Margem ponderada pela receita; ausente quando não houve receita
/// (evita estourar com lucros de sinais mistos).
fn profit_margin_percentage(
    total_profit: Option<Decimal>,
    total_revenue: Option<Decimal>,
) -> Option<Decimal> {
    let revenue = total_revenue?;
    if revenue <= Decimal::ZERO {
        return None;
    }
    let profit = total_profit.unwrap_or(Decimal::ZERO);
    Some((profit / revenue * Decimal::from(100)).round_dp(2))
}

impl MovementService {
    pub fn new(
        inventory_repo: InventoryRepository,
        pricing_service: PricingService,
        validator: Arc<dyn ProductValidation>,
    ) -> Self {
        Self {
            inventory_repo,
            pricing_service,
            validator,
        }
    }

    // =========================================================================
    //  ENTRADA
    // =========================================================================

    /// Registra uma entrada de estoque: valida a compra, gera lote
    /// automático se o local exigir, grava o movimento IN e atualiza os
    /// caches. Variação de custo médio > 5% recalcula os preços MARKUP.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_incoming<'e, E>(
        &self,
        executor: E,
        location_id: Uuid,
        product_id: Uuid,
        quantity: Decimal,
        cost_price: Decimal,
        source_document_kind: &str,
        source_document_number: &str,
        source_document_line_id: Option<i32>,
        movement_date: Option<NaiveDate>,
        batch_number: Option<String>,
        expiry_date: Option<NaiveDate>,
        reason: &str,
        created_by: Option<Uuid>,
    ) -> Result<InventoryMovement, AppError>
    where
        E: Executor<'e, Database = Postgres> + Acquire<'e, Database = Postgres>,
    {
        if quantity <= Decimal::ZERO {
            return Err(AppError::InvalidQuantity(quantity));
        }

        let movement_date = movement_date.unwrap_or_else(|| Utc::now().date_naive());

        let mut tx = executor.begin().await?;

        let location = self.inventory_repo.get_location(&mut *tx, location_id).await?;
        let product = self.inventory_repo.get_product(&mut *tx, product_id).await?;

        // 1. Contrato de validação de produtos
        self.validator
            .validate_purchase(&mut tx, &product, quantity, None)
            .await?;

        // 2. Lote automático quando o local controla lotes e nada foi informado
        let should_track = location.should_track_batches(&product);
        let batch_number = match batch_number {
            Some(b) => Some(b),
            None if should_track => Some(auto_batch_number(
                &product.code,
                movement_date,
                &location.code,
            )),
            None => None,
        };

        // 3. Trava o saldo (ordem: saldo antes de lotes) e guarda o custo antigo
        let old_avg_cost = self
            .inventory_repo
            .get_item_for_update(&mut *tx, location_id, product_id)
            .await?
            .map(|item| item.avg_cost);

        // 4. Grava no razão
        let movement = self
            .inventory_repo
            .insert_movement(
                &mut *tx,
                &NewMovement {
                    location_id,
                    product_id,
                    movement_type: MovementType::In,
                    quantity,
                    cost_price,
                    sale_price: None,
                    profit_amount: None,
                    profit_margin_percentage: None,
                    batch_number: batch_number.clone(),
                    expiry_date,
                    from_location_id: None,
                    to_location_id: None,
                    source_document_kind: source_document_kind.to_string(),
                    source_document_number: source_document_number.to_string(),
                    source_document_line_id,
                    movement_date,
                    reason: reason.to_string(),
                    created_by,
                },
            )
            .await?;

        // 5. Atualiza caches (falha não desfaz o movimento; o razão é a verdade)
        let refreshed = match self
            .inventory_repo
            .refresh_item(&mut *tx, location_id, product_id)
            .await
        {
            Ok(item) => item,
            Err(e) => {
                tracing::error!("Erro ao atualizar cache de saldo após entrada: {e}");
                None
            }
        };

        // 6. Custo mudou mais de 5%? Recalcula os preços MARKUP do par
        if let (Some(old), Some(new_item)) =
            (old_avg_cost.filter(|c| *c > Decimal::ZERO), refreshed.as_ref())
        {
            if cost_change_exceeds_threshold(old, new_item.avg_cost) {
                if let Err(e) = self
                    .pricing_service
                    .update_markup_prices(&mut *tx, location_id, product_id, new_item.avg_cost)
                    .await
                {
                    tracing::error!("Erro ao propagar mudança de custo: {e}");
                }
            }
        }

        if let Some(batch) = &batch_number {
            if should_track {
                if let Err(e) = self
                    .inventory_repo
                    .refresh_batch(&mut *tx, location_id, product_id, batch, expiry_date)
                    .await
                {
                    tracing::error!("Erro ao atualizar cache do lote {batch}: {e}");
                }
            }
        }

        tx.commit().await?;

        tracing::info!(
            "✅ Entrada registrada: {} +{} @ {}",
            product.code,
            quantity,
            location.code
        );
        Ok(movement)
    }

    // =========================================================================
    //  SAÍDA (FIFO por lotes ou simples)
    // =========================================================================

    /// Registra uma saída. Com rastreio de lote e sem custo/lote manual, a
    /// quantidade é distribuída em FIFO e cada fatia vira um movimento OUT
    /// com o custo do próprio lote. Sem rastreio, um único OUT ao custo
    /// inteligente. Venda sem preço informado resolve pelo resolvedor.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_outgoing<'e, E>(
        &self,
        executor: E,
        location_id: Uuid,
        product_id: Uuid,
        quantity: Decimal,
        source_document_kind: &str,
        source_document_number: &str,
        source_document_line_id: Option<i32>,
        movement_date: Option<NaiveDate>,
        reason: &str,
        created_by: Option<Uuid>,
        use_fifo: bool,
        allow_negative_stock: Option<bool>,
        manual_cost_price: Option<Decimal>,
        manual_batch_number: Option<String>,
        sale_price: Option<Decimal>,
        customer_id: Option<Uuid>,
    ) -> Result<Vec<InventoryMovement>, AppError>
    where
        E: Executor<'e, Database = Postgres> + Acquire<'e, Database = Postgres>,
    {
        if quantity <= Decimal::ZERO {
            return Err(AppError::InvalidQuantity(quantity));
        }

        let movement_date = movement_date.unwrap_or_else(|| Utc::now().date_naive());

        let mut tx = executor.begin().await?;

        let location = self.inventory_repo.get_location(&mut *tx, location_id).await?;
        let product = self.inventory_repo.get_product(&mut *tx, product_id).await?;

        let allow_negative = allow_negative_stock.unwrap_or(location.allow_negative_stock);

        // 1. Validação de venda; com estoque negativo permitido ela não barra
        if let Err(e) = self
            .validator
            .validate_sale(&mut tx, &product, quantity, &location)
            .await
        {
            if !allow_negative {
                return Err(e);
            }
            tracing::warn!("Saída com validação ignorada ({}): {e}", product.code);
        }

        // 2. Preço de venda automático para vendas sem preço informado
        let sale_price = match sale_price {
            Some(p) => Some(p),
            None if source_document_kind == source_kind::SALE
                || source_document_kind == source_kind::POS_SALE =>
            {
                match self
                    .pricing_service
                    .get_sale_price(
                        &mut *tx,
                        &location,
                        product_id,
                        customer_id,
                        quantity,
                        movement_date,
                    )
                    .await
                {
                    Ok(p) if p > Decimal::ZERO => Some(p),
                    Ok(_) => {
                        tracing::warn!("Preço de venda zero detectado para {}", product.code);
                        None
                    }
                    Err(e) => {
                        tracing::error!("Erro ao resolver preço de venda: {e}");
                        None
                    }
                }
            }
            None => None,
        };

        let should_track = location.should_track_batches(&product);
        let mut movements: Vec<InventoryMovement> = Vec::new();

        // 3. Trava o saldo antes dos lotes (disciplina anti-deadlock)
        let item = self
            .inventory_repo
            .get_item_for_update(&mut *tx, location_id, product_id)
            .await?;

        if should_track && use_fifo && manual_cost_price.is_none() && manual_batch_number.is_none()
        {
            // --- Caminho FIFO ---
            let batches = self
                .inventory_repo
                .get_fifo_batches_for_update(&mut *tx, location_id, product_id)
                .await?;

            let (allocations, shortage) = plan_fifo_allocation(&batches, quantity);

            if shortage > Decimal::ZERO && !allow_negative {
                return Err(AppError::InsufficientBatchStock {
                    available: quantity - shortage,
                    required: quantity,
                });
            }

            for allocation in &allocations {
                let (profit, margin) = derive_profit(sale_price, allocation.cost_price);
                let movement = self
                    .inventory_repo
                    .insert_movement(
                        &mut *tx,
                        &NewMovement {
                            location_id,
                            product_id,
                            movement_type: MovementType::Out,
                            quantity: allocation.quantity,
                            cost_price: allocation.cost_price,
                            sale_price,
                            profit_amount: profit,
                            profit_margin_percentage: margin,
                            batch_number: Some(allocation.batch_number.clone()),
                            expiry_date: allocation.expiry_date,
                            from_location_id: None,
                            to_location_id: None,
                            source_document_kind: source_document_kind.to_string(),
                            source_document_number: source_document_number.to_string(),
                            source_document_line_id,
                            movement_date,
                            reason: format!("{reason} (lote FIFO: {})", allocation.batch_number),
                            created_by,
                        },
                    )
                    .await?;
                movements.push(movement);
            }

            // Falta com negativo permitido sai sem lote, ao custo inteligente
            if shortage > Decimal::ZERO {
                let cost =
                    smart_cost(None, None, item.as_ref().map(|i| i.avg_cost));
                let (profit, margin) = derive_profit(sale_price, cost);
                let movement = self
                    .inventory_repo
                    .insert_movement(
                        &mut *tx,
                        &NewMovement {
                            location_id,
                            product_id,
                            movement_type: MovementType::Out,
                            quantity: shortage,
                            cost_price: cost,
                            sale_price,
                            profit_amount: profit,
                            profit_margin_percentage: margin,
                            batch_number: None,
                            expiry_date: None,
                            from_location_id: None,
                            to_location_id: None,
                            source_document_kind: source_document_kind.to_string(),
                            source_document_number: source_document_number.to_string(),
                            source_document_line_id,
                            movement_date,
                            reason: format!("{reason} (saldo negativo sem lote)"),
                            created_by,
                        },
                    )
                    .await?;
                movements.push(movement);
            }
        } else {
            // --- Caminho simples ---
            let batch_cost = match &manual_batch_number {
                Some(batch) => self
                    .inventory_repo
                    .get_batch_by_number(&mut *tx, location_id, product_id, batch)
                    .await?
                    .map(|b| b.cost_price),
                None => None,
            };
            let cost = smart_cost(
                manual_cost_price,
                batch_cost,
                item.as_ref().map(|i| i.avg_cost),
            );
            if cost == Decimal::ZERO && manual_cost_price.is_none() {
                tracing::warn!(
                    "Sem dado de custo para {} @ {}, usando zero",
                    product.code,
                    location.code
                );
            }

            let (profit, margin) = derive_profit(sale_price, cost);
            let movement = self
                .inventory_repo
                .insert_movement(
                    &mut *tx,
                    &NewMovement {
                        location_id,
                        product_id,
                        movement_type: MovementType::Out,
                        quantity,
                        cost_price: cost,
                        sale_price,
                        profit_amount: profit,
                        profit_margin_percentage: margin,
                        batch_number: manual_batch_number.clone(),
                        expiry_date: None,
                        from_location_id: None,
                        to_location_id: None,
                        source_document_kind: source_document_kind.to_string(),
                        source_document_number: source_document_number.to_string(),
                        source_document_line_id,
                        movement_date,
                        reason: reason.to_string(),
                        created_by,
                    },
                )
                .await?;
            movements.push(movement);
        }

        // 4. Caches: saldo primeiro, depois cada lote afetado (não fatal)
        self.refresh_caches(&mut tx, location_id, product_id, &movements, should_track)
            .await;

        tx.commit().await?;

        let total_profit: Decimal = movements
            .iter()
            .filter_map(|m| m.total_profit())
            .sum();
        tracing::info!(
            "✅ Saída registrada: {} -{} @ {} ({} movimentos, lucro total {})",
            product.code,
            quantity,
            location.code,
            movements.len(),
            total_profit
        );

        Ok(movements)
    }

    // =========================================================================
    //  TRANSFERÊNCIA
    // =========================================================================

    /// Transfere entre locais: saídas FIFO na origem e, para cada perna OUT,
    /// uma entrada no destino com o mesmo lote, validade e custo. Tudo na
    /// mesma transação; a origem é travada integralmente antes do destino.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_transfer<'e, E>(
        &self,
        executor: E,
        from_location_id: Uuid,
        to_location_id: Uuid,
        product_id: Uuid,
        quantity: Decimal,
        source_document_number: &str,
        movement_date: Option<NaiveDate>,
        reason: &str,
        created_by: Option<Uuid>,
    ) -> Result<(Vec<InventoryMovement>, Vec<InventoryMovement>), AppError>
    where
        E: Executor<'e, Database = Postgres> + Acquire<'e, Database = Postgres>,
    {
        if from_location_id == to_location_id {
            return Err(AppError::TransferSameLocation);
        }

        let mut tx = executor.begin().await?;

        let from_location = self
            .inventory_repo
            .get_location(&mut *tx, from_location_id)
            .await?;
        let to_location = self
            .inventory_repo
            .get_location(&mut *tx, to_location_id)
            .await?;

        let outbound = self
            .create_outgoing(
                &mut *tx,
                from_location_id,
                product_id,
                quantity,
                source_kind::TRANSFER,
                source_document_number,
                None,
                movement_date,
                &format!("Transferência para {}: {reason}", to_location.code),
                created_by,
                true,
                None,
                None,
                None,
                None,
                None,
            )
            .await?;

        let mut inbound = Vec::with_capacity(outbound.len());
        for out_movement in &outbound {
            let in_movement = self
                .create_incoming(
                    &mut *tx,
                    to_location_id,
                    product_id,
                    out_movement.quantity,
                    out_movement.cost_price,
                    source_kind::TRANSFER,
                    source_document_number,
                    None,
                    movement_date,
                    out_movement.batch_number.clone(),
                    out_movement.expiry_date,
                    &format!("Transferência de {}: {reason}", from_location.code),
                    created_by,
                )
                .await?;
            inbound.push(in_movement);
        }

        tx.commit().await?;

        tracing::info!(
            "✅ Transferência concluída: {product_id} {quantity} de {} para {}",
            from_location.code,
            to_location.code
        );
        Ok((outbound, inbound))
    }

    // =========================================================================
    //  AJUSTE
    // =========================================================================

    /// Ajuste de inventário: quantidade positiva vira IN, negativa vira OUT,
    /// sempre ao custo inteligente. Permitido em qualquer ciclo de vida para
    /// viabilizar acertos de contagem.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_adjustment<'e, E>(
        &self,
        executor: E,
        location_id: Uuid,
        product_id: Uuid,
        adjustment_qty: Decimal,
        reason: &str,
        movement_date: Option<NaiveDate>,
        manual_cost_price: Option<Decimal>,
        batch_number: Option<String>,
        created_by: Option<Uuid>,
    ) -> Result<InventoryMovement, AppError>
    where
        E: Executor<'e, Database = Postgres> + Acquire<'e, Database = Postgres>,
    {
        if adjustment_qty == Decimal::ZERO {
            return Err(AppError::InvalidQuantity(adjustment_qty));
        }

        let movement_date = movement_date.unwrap_or_else(|| Utc::now().date_naive());
        let (movement_type, quantity) = if adjustment_qty > Decimal::ZERO {
            (MovementType::In, adjustment_qty)
        } else {
            (MovementType::Out, adjustment_qty.abs())
        };

        let mut tx = executor.begin().await?;

        let location = self.inventory_repo.get_location(&mut *tx, location_id).await?;
        let product = self.inventory_repo.get_product(&mut *tx, product_id).await?;

        let item = self
            .inventory_repo
            .get_item_for_update(&mut *tx, location_id, product_id)
            .await?;

        let batch_cost = match &batch_number {
            Some(batch) => self
                .inventory_repo
                .get_batch_by_number(&mut *tx, location_id, product_id, batch)
                .await?
                .map(|b| b.cost_price),
            None => None,
        };
        let cost = smart_cost(
            manual_cost_price,
            batch_cost,
            item.as_ref().map(|i| i.avg_cost),
        );

        let movement = self
            .inventory_repo
            .insert_movement(
                &mut *tx,
                &NewMovement {
                    location_id,
                    product_id,
                    movement_type,
                    quantity,
                    cost_price: cost,
                    sale_price: None,
                    profit_amount: None,
                    profit_margin_percentage: None,
                    batch_number: batch_number.clone(),
                    expiry_date: None,
                    from_location_id: None,
                    to_location_id: None,
                    source_document_kind: source_kind::ADJUSTMENT.to_string(),
                    source_document_number: format!(
                        "ADJ-{}",
                        Utc::now().format("%Y%m%d-%H%M%S")
                    ),
                    source_document_line_id: None,
                    movement_date,
                    reason: reason.to_string(),
                    created_by,
                },
            )
            .await?;

        let should_track = location.should_track_batches(&product)
            && movement.batch_number.is_some();
        self.refresh_caches(
            &mut tx,
            location_id,
            product_id,
            std::slice::from_ref(&movement),
            should_track,
        )
        .await;

        tx.commit().await?;

        tracing::info!(
            "✅ Ajuste registrado: {} {adjustment_qty:+} @ {}",
            product.code,
            location.code
        );
        Ok(movement)
    }

    // =========================================================================
    //  ESTORNO
    // =========================================================================

    /// Cria o movimento oposto com origem REVERSAL. O estorno sempre pode
    /// deixar o saldo negativo (a correção não pode ficar presa). Pernas de
    /// transferência são estornadas individualmente.
    pub async fn reverse_movement<'e, E>(
        &self,
        executor: E,
        movement_id: Uuid,
        reason: &str,
        created_by: Option<Uuid>,
    ) -> Result<Vec<InventoryMovement>, AppError>
    where
        E: Executor<'e, Database = Postgres> + Acquire<'e, Database = Postgres>,
    {
        let mut tx = executor.begin().await?;

        let original = self.inventory_repo.get_movement(&mut *tx, movement_id).await?;

        if original.movement_type == MovementType::Transfer {
            return Err(AppError::CannotReverseTransfer);
        }

        let reversal_number = format!("REV-{}", original.id);
        let reversals = match original.movement_type {
            MovementType::In | MovementType::Production => {
                // Estorno de entrada = saída forçada (mesmo custo e lote)
                self.create_outgoing(
                    &mut *tx,
                    original.location_id,
                    original.product_id,
                    original.quantity,
                    source_kind::REVERSAL,
                    &reversal_number,
                    None,
                    None,
                    &format!("Estorno do movimento {}: {reason}", original.id),
                    created_by,
                    true,
                    Some(true),
                    Some(original.cost_price),
                    original.batch_number.clone(),
                    None,
                    None,
                )
                .await?
            }
            _ => {
                // Estorno de saída = entrada com o custo original
                let movement = self
                    .create_incoming(
                        &mut *tx,
                        original.location_id,
                        original.product_id,
                        original.quantity,
                        original.cost_price,
                        source_kind::REVERSAL,
                        &reversal_number,
                        None,
                        None,
                        original.batch_number.clone(),
                        original.expiry_date,
                        &format!("Estorno do movimento {}: {reason}", original.id),
                        created_by,
                    )
                    .await?;
                vec![movement]
            }
        };

        tx.commit().await?;
        Ok(reversals)
    }

    // =========================================================================
    //  RELATÓRIOS
    // =========================================================================

    /// Agregados do razão com margem ponderada pela receita.
    pub async fn get_movement_statistics<'e, E>(
        &self,
        executor: E,
        location_id: Option<Uuid>,
        product_id: Option<Uuid>,
        date_from: Option<NaiveDate>,
        date_to: Option<NaiveDate>,
    ) -> Result<ServiceResult, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let stats = self
            .inventory_repo
            .get_movement_statistics(executor, location_id, product_id, date_from, date_to)
            .await?;

        let margin = profit_margin_percentage(stats.total_profit, stats.total_revenue);

        Ok(ServiceResult::success(
            json!({
                "total_movements": stats.total_movements,
                "total_in_qty": stats.total_in_qty,
                "total_out_qty": stats.total_out_qty,
                "total_in_value": stats.total_in_value,
                "total_out_value": stats.total_out_value,
                "net_quantity": stats.total_in_qty - stats.total_out_qty,
                "net_value": stats.total_in_value - stats.total_out_value,
                "total_revenue": stats.total_revenue,
                "total_profit": stats.total_profit,
                "profit_movements_count": stats.profit_movements_count,
                "profit_margin": margin,
            }),
            "Estatísticas de movimentação",
        ))
    }

    // ---
    // Interno
    // ---

    // Saldo primeiro, depois cada lote tocado. Falhas só geram log: o razão
    // já é a verdade e um refresh posterior reconstrói o estado.
    async fn refresh_caches(
        &self,
        conn: &mut PgConnection,
        location_id: Uuid,
        product_id: Uuid,
        movements: &[InventoryMovement],
        refresh_batches: bool,
    ) {
        if let Err(e) = self
            .inventory_repo
            .refresh_item(&mut *conn, location_id, product_id)
            .await
        {
            tracing::error!("Erro ao atualizar cache de saldo: {e}");
        }

        if !refresh_batches {
            return;
        }

        for movement in movements {
            if let Some(batch) = &movement.batch_number {
                if let Err(e) = self
                    .inventory_repo
                    .refresh_batch(
                        &mut *conn,
                        location_id,
                        product_id,
                        batch,
                        movement.expiry_date,
                    )
                    .await
                {
                    tracing::error!("Erro ao atualizar cache do lote {batch}: {e}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn batch(
        number: &str,
        remaining: Decimal,
        cost: Decimal,
        expiry: Option<NaiveDate>,
    ) -> InventoryBatch {
        InventoryBatch {
            id: Uuid::new_v4(),
            location_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            batch_number: number.to_string(),
            expiry_date: expiry,
            received_qty: remaining,
            remaining_qty: remaining,
            cost_price: cost,
            received_date: Utc::now(),
            is_unknown_batch: false,
            conversion_date: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn fifo_splits_across_batches_in_order() {
        // Lote A (4 un, custo 3, vence antes) e lote B (6 un, custo 4)
        let batches = vec![
            batch("A", dec!(4), dec!(3), NaiveDate::from_ymd_opt(2025, 6, 1)),
            batch("B", dec!(6), dec!(4), NaiveDate::from_ymd_opt(2025, 8, 1)),
        ];

        let (allocations, shortage) = plan_fifo_allocation(&batches, dec!(5));

        assert_eq!(shortage, Decimal::ZERO);
        assert_eq!(allocations.len(), 2);
        assert_eq!(allocations[0].batch_number, "A");
        assert_eq!(allocations[0].quantity, dec!(4));
        assert_eq!(allocations[0].cost_price, dec!(3));
        assert_eq!(allocations[1].batch_number, "B");
        assert_eq!(allocations[1].quantity, dec!(1));
        assert_eq!(allocations[1].cost_price, dec!(4));
    }

    #[test]
    fn fifo_reports_shortage() {
        let batches = vec![batch("A", dec!(3), dec!(2), None)];
        let (allocations, shortage) = plan_fifo_allocation(&batches, dec!(10));

        assert_eq!(allocations.len(), 1);
        assert_eq!(allocations[0].quantity, dec!(3));
        assert_eq!(shortage, dec!(7));
    }

    #[test]
    fn fifo_skips_empty_batches() {
        let batches = vec![
            batch("VAZIO", dec!(0), dec!(2), None),
            batch("CHEIO", dec!(5), dec!(2), None),
        ];
        let (allocations, shortage) = plan_fifo_allocation(&batches, dec!(2));

        assert_eq!(shortage, Decimal::ZERO);
        assert_eq!(allocations.len(), 1);
        assert_eq!(allocations[0].batch_number, "CHEIO");
    }

    #[test]
    fn smart_cost_hierarchy() {
        // Manual vence tudo
        assert_eq!(
            smart_cost(Some(dec!(9)), Some(dec!(7)), Some(dec!(5))),
            dec!(9)
        );
        // Depois o custo do lote
        assert_eq!(smart_cost(None, Some(dec!(7)), Some(dec!(5))), dec!(7));
        // Depois o custo médio
        assert_eq!(smart_cost(None, None, Some(dec!(5))), dec!(5));
        // Por fim zero
        assert_eq!(smart_cost(None, None, None), Decimal::ZERO);
        // Custos zerados não contam como fonte
        assert_eq!(smart_cost(None, Some(dec!(0)), Some(dec!(5))), dec!(5));
    }

    #[test]
    fn profit_derivation_and_margin() {
        let (profit, margin) = derive_profit(Some(dec!(10)), dec!(3));
        assert_eq!(profit, Some(dec!(7)));
        assert_eq!(margin, Some(dec!(70.00)));

        let (profit, margin) = derive_profit(None, dec!(3));
        assert_eq!(profit, None);
        assert_eq!(margin, None);

        // Venda a custo maior que o preço: lucro negativo, margem negativa
        let (profit, margin) = derive_profit(Some(dec!(4)), dec!(6));
        assert_eq!(profit, Some(dec!(-2)));
        assert_eq!(margin, Some(dec!(-50.00)));
    }

    #[test]
    fn auto_batch_number_format() {
        let date = NaiveDate::from_ymd_opt(2025, 8, 1).unwrap();
        assert_eq!(auto_batch_number("P2", date, "L2"), "AUTO_P2_250801_L2");
    }

    #[test]
    fn cost_change_threshold_is_five_percent() {
        assert!(!cost_change_exceeds_threshold(dec!(10), dec!(10.50)));
        assert!(cost_change_exceeds_threshold(dec!(10), dec!(10.51)));
        assert!(cost_change_exceeds_threshold(dec!(10), dec!(9.49)));
        // Sem custo anterior não há base de comparação
        assert!(!cost_change_exceeds_threshold(dec!(0), dec!(5)));
    }

    #[test]
    fn margin_absent_without_revenue() {
        assert_eq!(profit_margin_percentage(Some(dec!(10)), None), None);
        assert_eq!(profit_margin_percentage(Some(dec!(10)), Some(dec!(0))), None);
        assert_eq!(
            profit_margin_percentage(Some(dec!(25)), Some(dec!(100))),
            Some(dec!(25.00))
        );
    }
}
