// src/services/inventory_service.rs

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;
use sqlx::{Acquire, Executor, Postgres};
use uuid::Uuid;

use crate::{
    common::{error::AppError, result::ServiceResult},
    db::InventoryRepository,
    models::inventory::{InventoryItem, InventoryLocation},
};

/// Lado de leitura do estoque: disponibilidade, reservas e custos.
/// Todas as operações devolvem o resultado etiquetado do contrato.
#[derive(Clone)]
pub struct InventoryService {
    inventory_repo: InventoryRepository,
}

// Payload padrão de disponibilidade montado a partir do cache
fn availability_data(item: &InventoryItem, location: &InventoryLocation, required: Decimal) -> serde_json::Value {
    let available = item.available_qty();
    let can_fulfill = available >= required || location.allow_negative_stock;
    json!({
        "current_qty": item.current_qty,
        "available_qty": available,
        "reserved_qty": item.reserved_qty,
        "can_fulfill": can_fulfill,
        "shortage": if can_fulfill { Decimal::ZERO } else { required - available },
        "avg_cost": item.avg_cost,
        "last_purchase_cost": item.last_purchase_cost,
        "last_sale_price": item.last_sale_price,
        "allow_negative_stock": location.allow_negative_stock,
    })
}

impl InventoryService {
    pub fn new(inventory_repo: InventoryRepository) -> Self {
        Self { inventory_repo }
    }

    // =========================================================================
    //  DISPONIBILIDADE
    // =========================================================================

    /// Checagem primária de disponibilidade a partir do cache de saldo.
    pub async fn validate_availability<'e, E>(
        &self,
        executor: E,
        location_id: Uuid,
        product_id: Uuid,
        required_qty: Decimal,
    ) -> Result<ServiceResult, AppError>
    where
        E: Executor<'e, Database = Postgres> + Acquire<'e, Database = Postgres>,
    {
        let mut tx = executor.begin().await?;
        let location = self.inventory_repo.get_location(&mut *tx, location_id).await?;
        let item = self
            .inventory_repo
            .get_item(&mut *tx, location_id, product_id)
            .await?;
        tx.commit().await?;

        let Some(item) = item else {
            return Ok(ServiceResult::error(
                "ITEM_NOT_FOUND",
                format!("Produto {product_id} sem registro de estoque em {}", location.code),
                json!({
                    "product_id": product_id,
                    "location_code": location.code,
                    "current_qty": Decimal::ZERO,
                    "available_qty": Decimal::ZERO,
                    "can_fulfill": location.allow_negative_stock,
                }),
            ));
        };

        let data = availability_data(&item, &location, required_qty);
        let can_fulfill = data["can_fulfill"].as_bool().unwrap_or(false);

        if !can_fulfill {
            return Ok(ServiceResult::error(
                "INSUFFICIENT_STOCK",
                format!(
                    "Estoque insuficiente. Disponível: {}, necessário: {required_qty}",
                    item.available_qty()
                ),
                data,
            ));
        }

        Ok(ServiceResult::success(
            data,
            format!("Saldo disponível: {}", item.available_qty()),
        ))
    }

    /// Disponibilidade por lotes: enumera os lotes em FIFO até cobrir a
    /// quantidade, sinalizando vencidos e propondo a alocação por lote.
    pub async fn validate_batch_availability<'e, E>(
        &self,
        executor: E,
        location_id: Uuid,
        product_id: Uuid,
        required_qty: Decimal,
    ) -> Result<ServiceResult, AppError>
    where
        E: Executor<'e, Database = Postgres> + Acquire<'e, Database = Postgres>,
    {
        let mut tx = executor.begin().await?;

        let location = self.inventory_repo.get_location(&mut *tx, location_id).await?;
        let product = self.inventory_repo.get_product(&mut *tx, product_id).await?;

        if !location.should_track_batches(&product) {
            // Sem rastreio de lote, cai na checagem simples
            let item = self
                .inventory_repo
                .get_item(&mut *tx, location_id, product_id)
                .await?;
            tx.commit().await?;

            let Some(item) = item else {
                return Ok(ServiceResult::error(
                    "ITEM_NOT_FOUND",
                    format!("Produto {} sem registro de estoque em {}", product.code, location.code),
                    json!({
                        "product_code": product.code,
                        "location_code": location.code,
                        "current_qty": Decimal::ZERO,
                        "can_fulfill": location.allow_negative_stock,
                    }),
                ));
            };

            let data = availability_data(&item, &location, required_qty);
            let can_fulfill = data["can_fulfill"].as_bool().unwrap_or(false);
            if !can_fulfill {
                return Ok(ServiceResult::error(
                    "INSUFFICIENT_STOCK",
                    format!(
                        "Estoque insuficiente. Disponível: {}, necessário: {required_qty}",
                        item.available_qty()
                    ),
                    data,
                ));
            }
            return Ok(ServiceResult::success(
                data,
                format!("Saldo disponível: {}", item.available_qty()),
            ));
        }

        let batches = self
            .inventory_repo
            .get_fifo_batches(&mut *tx, location_id, product_id)
            .await?;
        tx.commit().await?;

        let today = Utc::now().date_naive();
        let mut total_available = Decimal::ZERO;
        let mut remaining_need = required_qty;
        let mut batch_details = Vec::new();
        let mut expired_batches = Vec::new();

        for batch in &batches {
            let can_use = remaining_need.min(batch.remaining_qty).max(Decimal::ZERO);
            let is_expired = batch.is_expired(today);

            let info = json!({
                "batch_number": batch.batch_number,
                "expiry_date": batch.expiry_date,
                "remaining_qty": batch.remaining_qty,
                "cost_price": batch.cost_price,
                "received_date": batch.received_date,
                "is_expired": is_expired,
                "batch_value": batch.remaining_qty * batch.cost_price,
                "can_use_qty": can_use,
            });
            if is_expired {
                expired_batches.push(info.clone());
            }
            batch_details.push(info);

            total_available += batch.remaining_qty;
            remaining_need = (remaining_need - can_use).max(Decimal::ZERO);
        }

        let can_fulfill = total_available >= required_qty || location.allow_negative_stock;
        let data = json!({
            "should_track_batches": true,
            "total_available": total_available,
            "required_qty": required_qty,
            "can_fulfill": can_fulfill,
            "shortage": if can_fulfill { Decimal::ZERO } else { required_qty - total_available },
            "batch_count": batch_details.len(),
            "batch_details": batch_details,
            "expired_batches": expired_batches,
            "location_code": location.code,
            "product_code": product.code,
        });

        if !can_fulfill {
            return Ok(ServiceResult::error(
                "INSUFFICIENT_BATCH_STOCK",
                format!(
                    "Estoque em lotes insuficiente. Disponível: {total_available}, necessário: {required_qty}"
                ),
                data,
            ));
        }

        Ok(ServiceResult::success(
            data,
            format!("Saldo em lotes: {total_available} em {} lotes", batches.len()),
        ))
    }

    // =========================================================================
    //  RESERVAS
    // =========================================================================

    /// Reserva quantidade revalidando a disponibilidade sob o lock exclusivo
    /// da linha: a pré-checagem do chamador é só otimização.
    pub async fn reserve_stock<'e, E>(
        &self,
        executor: E,
        location_id: Uuid,
        product_id: Uuid,
        quantity: Decimal,
        reason: &str,
    ) -> Result<ServiceResult, AppError>
    where
        E: Executor<'e, Database = Postgres> + Acquire<'e, Database = Postgres>,
    {
        if quantity <= Decimal::ZERO {
            return Ok(AppError::InvalidQuantity(quantity).to_service_result());
        }

        let mut tx = executor.begin().await?;

        let location = self.inventory_repo.get_location(&mut *tx, location_id).await?;
        let Some(item) = self
            .inventory_repo
            .get_item_for_update(&mut *tx, location_id, product_id)
            .await?
        else {
            return Ok(ServiceResult::error(
                "ITEM_NOT_FOUND",
                format!("Produto {product_id} sem registro de estoque em {}", location.code),
                json!({ "product_id": product_id, "location_code": location.code }),
            ));
        };

        // Revalidação sob lock: nunca reserva além do saldo físico, a menos
        // que o local permita negativo
        if item.available_qty() < quantity && !location.allow_negative_stock {
            return Ok(ServiceResult::error(
                "INSUFFICIENT_AVAILABLE",
                format!(
                    "Não é possível reservar {quantity}, apenas {} disponível",
                    item.available_qty()
                ),
                json!({
                    "requested_qty": quantity,
                    "available_qty": item.available_qty(),
                    "current_qty": item.current_qty,
                    "reserved_qty": item.reserved_qty,
                }),
            ));
        }

        let updated = self
            .inventory_repo
            .add_reserved_qty(&mut *tx, item.id, quantity)
            .await?;
        tx.commit().await?;

        Ok(ServiceResult::success(
            json!({
                "reserved_quantity": quantity,
                "total_reserved": updated.reserved_qty,
                "previous_reserved": item.reserved_qty,
                "available_after_reservation": updated.available_qty(),
                "reason": reason,
            }),
            format!("Reservado {quantity}. Total reservado: {}", updated.reserved_qty),
        ))
    }

    /// Libera reserva; falha se não houver reserva suficiente.
    pub async fn release_reservation<'e, E>(
        &self,
        executor: E,
        location_id: Uuid,
        product_id: Uuid,
        quantity: Decimal,
    ) -> Result<ServiceResult, AppError>
    where
        E: Executor<'e, Database = Postgres> + Acquire<'e, Database = Postgres>,
    {
        if quantity <= Decimal::ZERO {
            return Ok(AppError::InvalidQuantity(quantity).to_service_result());
        }

        let mut tx = executor.begin().await?;

        let Some(item) = self
            .inventory_repo
            .get_item_for_update(&mut *tx, location_id, product_id)
            .await?
        else {
            return Ok(ServiceResult::error(
                "ITEM_NOT_FOUND",
                format!("Produto {product_id} sem registro de estoque no local {location_id}"),
                json!({ "product_id": product_id, "location_id": location_id }),
            ));
        };

        if item.reserved_qty < quantity {
            return Ok(ServiceResult::error(
                "INSUFFICIENT_RESERVED",
                format!(
                    "Não é possível liberar {quantity}, apenas {} reservado",
                    item.reserved_qty
                ),
                json!({
                    "requested_qty": quantity,
                    "reserved_qty": item.reserved_qty,
                    "available_qty": item.available_qty(),
                }),
            ));
        }

        let updated = self
            .inventory_repo
            .add_reserved_qty(&mut *tx, item.id, -quantity)
            .await?;
        tx.commit().await?;

        Ok(ServiceResult::success(
            json!({
                "released_quantity": quantity,
                "total_reserved": updated.reserved_qty,
                "previous_reserved": item.reserved_qty,
                "available_after_release": updated.available_qty(),
            }),
            format!("Liberado {quantity}. Total reservado: {}", updated.reserved_qty),
        ))
    }

    // =========================================================================
    //  CUSTOS E RESUMOS
    // =========================================================================

    /// Custo vigente do par, com a fonte etiquetada: custo médio do cache,
    /// senão último custo de compra, senão zero.
    pub async fn get_cost_for_location<'e, E>(
        &self,
        executor: E,
        location_id: Uuid,
        product_id: Uuid,
    ) -> Result<ServiceResult, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let item = self
            .inventory_repo
            .get_item(executor, location_id, product_id)
            .await?;

        let (cost, source) = match &item {
            Some(i) if i.avg_cost > Decimal::ZERO => (i.avg_cost, "INVENTORY_ITEM_AVG_COST"),
            Some(i) => match i.last_purchase_cost.filter(|c| *c > Decimal::ZERO) {
                Some(last) => (last, "LAST_PURCHASE_COST"),
                None => (Decimal::ZERO, "FALLBACK_ZERO"),
            },
            None => (Decimal::ZERO, "FALLBACK_ZERO"),
        };

        Ok(ServiceResult::success(
            json!({
                "cost_price": cost,
                "source": source,
                "product_id": product_id,
                "location_id": location_id,
            }),
            format!("Custo resolvido por {source}: {cost}"),
        ))
    }

    /// Fotografia completa do estoque do par: cache de saldo + detalhe dos
    /// lotes em ordem FIFO.
    pub async fn get_stock_summary<'e, E>(
        &self,
        executor: E,
        location_id: Uuid,
        product_id: Uuid,
    ) -> Result<ServiceResult, AppError>
    where
        E: Executor<'e, Database = Postgres> + Acquire<'e, Database = Postgres>,
    {
        let mut tx = executor.begin().await?;

        let location = self.inventory_repo.get_location(&mut *tx, location_id).await?;
        let product = self.inventory_repo.get_product(&mut *tx, product_id).await?;

        let Some(item) = self
            .inventory_repo
            .get_item(&mut *tx, location_id, product_id)
            .await?
        else {
            return Ok(ServiceResult::error(
                "ITEM_NOT_FOUND",
                format!("Sem registro de estoque de {} em {}", product.code, location.code),
                json!({
                    "product_code": product.code,
                    "location_code": location.code,
                    "current_qty": Decimal::ZERO,
                    "stock_status": "NOT_TRACKED",
                }),
            ));
        };

        let tracks_batches = location.should_track_batches(&product);
        let batches = if tracks_batches {
            self.inventory_repo
                .get_fifo_batches(&mut *tx, location_id, product_id)
                .await?
        } else {
            Vec::new()
        };
        tx.commit().await?;

        let today = Utc::now().date_naive();
        let batch_total: Decimal = batches.iter().map(|b| b.remaining_qty).sum();
        let batch_infos: Vec<_> = batches
            .iter()
            .map(|b| {
                json!({
                    "batch_number": b.batch_number,
                    "remaining_qty": b.remaining_qty,
                    "received_qty": b.received_qty,
                    "expiry_date": b.expiry_date,
                    "cost_price": b.cost_price,
                    "received_date": b.received_date,
                    "is_expired": b.is_expired(today),
                    "days_until_expiry": b.days_until_expiry(today),
                    "is_unknown_batch": b.is_unknown_batch,
                    "batch_value": b.remaining_qty * b.cost_price,
                })
            })
            .collect();

        Ok(ServiceResult::success(
            json!({
                "product_code": product.code,
                "product_name": product.name,
                "location_code": location.code,
                "location_name": location.name,
                "current_qty": item.current_qty,
                "available_qty": item.available_qty(),
                "reserved_qty": item.reserved_qty,
                "avg_cost": item.avg_cost,
                "last_purchase_cost": item.last_purchase_cost,
                "last_purchase_date": item.last_purchase_date,
                "last_sale_price": item.last_sale_price,
                "last_sale_date": item.last_sale_date,
                "total_stock_value": item.stock_value(),
                "batches": batch_infos,
                "batch_count": batches.len(),
                "total_batch_qty": batch_total,
                "tracks_batches": tracks_batches,
                "stock_status": if item.current_qty > Decimal::ZERO { "IN_STOCK" } else { "OUT_OF_STOCK" },
                "last_updated": item.updated_at,
            }),
            format!("Resumo de estoque de {}: {}", product.code, item.current_qty),
        ))
    }

    // =========================================================================
    //  CONVERSÃO PARA RASTREIO DE LOTE
    // =========================================================================

    /// Quando um produto passa a rastrear lotes com saldo solto existente,
    /// semeia um lote UNKNOWN_* com a quantidade e o custo médio do cache.
    pub async fn create_unknown_batch_for_conversion<'e, E>(
        &self,
        executor: E,
        location_id: Uuid,
        product_id: Uuid,
    ) -> Result<ServiceResult, AppError>
    where
        E: Executor<'e, Database = Postgres> + Acquire<'e, Database = Postgres>,
    {
        let mut tx = executor.begin().await?;

        let product = self.inventory_repo.get_product(&mut *tx, product_id).await?;
        let Some(item) = self
            .inventory_repo
            .get_item_for_update(&mut *tx, location_id, product_id)
            .await?
        else {
            return Ok(ServiceResult::error(
                "ITEM_NOT_FOUND",
                format!("Produto {} sem saldo para converter", product.code),
                json!({ "product_code": product.code }),
            ));
        };

        if item.current_qty <= Decimal::ZERO {
            return Ok(ServiceResult::error(
                "NO_STOCK",
                format!("Produto {} sem saldo positivo para converter", product.code),
                json!({ "current_qty": item.current_qty }),
            ));
        }

        let batch_number = format!(
            "UNKNOWN_{}_{}",
            product.code,
            Utc::now().format("%Y%m%d")
        );
        let batch = self
            .inventory_repo
            .insert_unknown_batch(
                &mut *tx,
                location_id,
                product_id,
                &batch_number,
                item.current_qty,
                item.avg_cost,
            )
            .await?;
        tx.commit().await?;

        tracing::info!(
            "✅ Lote de conversão criado: {} ({} un a {})",
            batch.batch_number,
            batch.remaining_qty,
            batch.cost_price
        );
        Ok(ServiceResult::success(
            json!({
                "batch_number": batch.batch_number,
                "quantity": batch.remaining_qty,
                "cost_price": batch.cost_price,
                "is_unknown_batch": true,
            }),
            format!("Lote {} semeado na conversão", batch.batch_number),
        ))
    }
}
