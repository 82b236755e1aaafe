// src/db/inventory_repo.rs

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{Acquire, Executor, PgPool, Postgres};
use uuid::Uuid;

use crate::{
    common::error::AppError,
    models::inventory::{
        is_unknown_batch_number, InventoryBatch, InventoryItem, InventoryLocation,
        InventoryMovement, MovementStatsRow, NewMovement,
    },
    models::products::Product,
};

#[derive(Clone)]
pub struct InventoryRepository {
    pool: PgPool,
}

// Linha agregada usada pelos refreshes
#[derive(sqlx::FromRow)]
struct LedgerTotals {
    movement_count: i64,
    total_in: Decimal,
    total_out: Decimal,
    total_in_value: Decimal,
}

impl InventoryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ---
    // Leituras básicas
    // ---

    pub async fn get_location<'e, E>(
        &self,
        executor: E,
        location_id: Uuid,
    ) -> Result<InventoryLocation, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, InventoryLocation>("SELECT * FROM inventory_locations WHERE id = $1")
            .bind(location_id)
            .fetch_optional(executor)
            .await?
            .ok_or_else(|| AppError::ResourceNotFound(format!("local {location_id}")))
    }

    pub async fn get_product<'e, E>(
        &self,
        executor: E,
        product_id: Uuid,
    ) -> Result<Product, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = $1")
            .bind(product_id)
            .fetch_optional(executor)
            .await?
            .ok_or_else(|| AppError::ResourceNotFound(format!("produto {product_id}")))
    }

    pub async fn get_item<'e, E>(
        &self,
        executor: E,
        location_id: Uuid,
        product_id: Uuid,
    ) -> Result<Option<InventoryItem>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let item = sqlx::query_as::<_, InventoryItem>(
            "SELECT * FROM inventory_items WHERE location_id = $1 AND product_id = $2",
        )
        .bind(location_id)
        .bind(product_id)
        .fetch_optional(executor)
        .await?;
        Ok(item)
    }

    /// Trava a linha do cache de saldo (SELECT ... FOR UPDATE).
    /// A disciplina de travamento exige saldo antes de lotes.
    pub async fn get_item_for_update<'e, E>(
        &self,
        executor: E,
        location_id: Uuid,
        product_id: Uuid,
    ) -> Result<Option<InventoryItem>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let item = sqlx::query_as::<_, InventoryItem>(
            "SELECT * FROM inventory_items WHERE location_id = $1 AND product_id = $2 FOR UPDATE",
        )
        .bind(location_id)
        .bind(product_id)
        .fetch_optional(executor)
        .await?;
        Ok(item)
    }

    // ---
    // Razão de movimentos (append-only)
    // ---

    pub async fn insert_movement<'e, E>(
        &self,
        executor: E,
        draft: &NewMovement,
    ) -> Result<InventoryMovement, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let movement = sqlx::query_as::<_, InventoryMovement>(
            r#"
            INSERT INTO inventory_movements (
                location_id, product_id, movement_type, quantity, cost_price,
                sale_price, profit_amount, profit_margin_percentage,
                batch_number, expiry_date, from_location_id, to_location_id,
                source_document_kind, source_document_number, source_document_line_id,
                movement_date, reason, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            RETURNING *
            "#,
        )
        .bind(draft.location_id)
        .bind(draft.product_id)
        .bind(draft.movement_type)
        .bind(draft.quantity)
        .bind(draft.cost_price)
        .bind(draft.sale_price)
        .bind(draft.profit_amount)
        .bind(draft.profit_margin_percentage)
        .bind(&draft.batch_number)
        .bind(draft.expiry_date)
        .bind(draft.from_location_id)
        .bind(draft.to_location_id)
        .bind(&draft.source_document_kind)
        .bind(&draft.source_document_number)
        .bind(draft.source_document_line_id)
        .bind(draft.movement_date)
        .bind(&draft.reason)
        .bind(draft.created_by)
        .fetch_one(executor)
        .await?;
        Ok(movement)
    }

    pub async fn get_movement<'e, E>(
        &self,
        executor: E,
        movement_id: Uuid,
    ) -> Result<InventoryMovement, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, InventoryMovement>("SELECT * FROM inventory_movements WHERE id = $1")
            .bind(movement_id)
            .fetch_optional(executor)
            .await?
            .ok_or(AppError::MovementNotFound(movement_id))
    }

    /// Movimentos gerados por um documento, para estorno em bloco.
    pub async fn get_movements_for_document<'e, E>(
        &self,
        executor: E,
        source_kind: &str,
        source_number: &str,
    ) -> Result<Vec<InventoryMovement>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let movements = sqlx::query_as::<_, InventoryMovement>(
            r#"
            SELECT * FROM inventory_movements
            WHERE source_document_kind = $1 AND source_document_number = $2
            ORDER BY created_at ASC
            "#,
        )
        .bind(source_kind)
        .bind(source_number)
        .fetch_all(executor)
        .await?;
        Ok(movements)
    }

    pub async fn get_movement_statistics<'e, E>(
        &self,
        executor: E,
        location_id: Option<Uuid>,
        product_id: Option<Uuid>,
        date_from: Option<NaiveDate>,
        date_to: Option<NaiveDate>,
    ) -> Result<MovementStatsRow, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let stats = sqlx::query_as::<_, MovementStatsRow>(
            r#"
            SELECT
                COUNT(*)                                                                          AS total_movements,
                COALESCE(SUM(quantity) FILTER (WHERE movement_type IN ('IN', 'PRODUCTION')), 0)   AS total_in_qty,
                COALESCE(SUM(quantity) FILTER (WHERE movement_type = 'OUT'), 0)                   AS total_out_qty,
                COALESCE(SUM(quantity * cost_price)
                    FILTER (WHERE movement_type IN ('IN', 'PRODUCTION')), 0)                      AS total_in_value,
                COALESCE(SUM(quantity * cost_price) FILTER (WHERE movement_type = 'OUT'), 0)      AS total_out_value,
                SUM(quantity * sale_price)
                    FILTER (WHERE movement_type = 'OUT' AND sale_price IS NOT NULL)               AS total_revenue,
                SUM(quantity * (sale_price - cost_price))
                    FILTER (WHERE movement_type = 'OUT' AND sale_price IS NOT NULL)               AS total_profit,
                COUNT(*) FILTER (WHERE movement_type = 'OUT' AND sale_price IS NOT NULL)          AS profit_movements_count
            FROM inventory_movements
            WHERE ($1::uuid IS NULL OR location_id = $1)
              AND ($2::uuid IS NULL OR product_id = $2)
              AND ($3::date IS NULL OR movement_date >= $3)
              AND ($4::date IS NULL OR movement_date <= $4)
            "#,
        )
        .bind(location_id)
        .bind(product_id)
        .bind(date_from)
        .bind(date_to)
        .fetch_one(executor)
        .await?;
        Ok(stats)
    }

    // ---
    // Refresh dos caches (a única forma de escrevê-los)
    // ---

    /// Reconstrói o cache de saldo de uma combinação (local, produto) a
    /// partir do razão. Trava a linha do cache durante toda a atualização.
    ///
    /// Reservas e níveis mín/máx não derivam do razão e são preservados.
    /// Sem movimentos: a linha é apagada, exceto se ainda houver reserva.
    pub async fn refresh_item<'e, E>(
        &self,
        executor: E,
        location_id: Uuid,
        product_id: Uuid,
    ) -> Result<Option<InventoryItem>, AppError>
    where
        E: Executor<'e, Database = Postgres> + Acquire<'e, Database = Postgres>,
    {
        let mut tx = executor.begin().await?;

        // 1. Trava a linha existente (se houver) para evitar escrita rasgada
        let existing = self
            .get_item_for_update(&mut *tx, location_id, product_id)
            .await?;

        // 2. Agrega o razão
        let totals = sqlx::query_as::<_, LedgerTotals>(
            r#"
            SELECT
                COUNT(*) AS movement_count,
                COALESCE(SUM(quantity) FILTER (WHERE movement_type IN ('IN', 'PRODUCTION')), 0) AS total_in,
                COALESCE(SUM(quantity) FILTER (WHERE movement_type = 'OUT'), 0) AS total_out,
                COALESCE(SUM(quantity * cost_price)
                    FILTER (WHERE movement_type IN ('IN', 'PRODUCTION')), 0) AS total_in_value
            FROM inventory_movements
            WHERE location_id = $1 AND product_id = $2
            "#,
        )
        .bind(location_id)
        .bind(product_id)
        .fetch_one(&mut *tx)
        .await?;

        if totals.movement_count == 0 {
            let result = match existing {
                Some(item) if item.reserved_qty > Decimal::ZERO => {
                    // Reserva viva sem razão: zera os campos derivados mas
                    // não descarta a reserva silenciosamente.
                    let kept = sqlx::query_as::<_, InventoryItem>(
                        r#"
                        UPDATE inventory_items
                        SET current_qty = 0, avg_cost = 0,
                            last_purchase_cost = NULL, last_purchase_date = NULL,
                            last_sale_price = NULL, last_sale_date = NULL,
                            last_movement_date = NULL, updated_at = now()
                        WHERE id = $1
                        RETURNING *
                        "#,
                    )
                    .bind(item.id)
                    .fetch_one(&mut *tx)
                    .await?;
                    Some(kept)
                }
                Some(item) => {
                    sqlx::query("DELETE FROM inventory_items WHERE id = $1")
                        .bind(item.id)
                        .execute(&mut *tx)
                        .await?;
                    None
                }
                None => None,
            };
            tx.commit().await?;
            return Ok(result);
        }

        let current_qty = totals.total_in - totals.total_out;

        // Custo médio ponderado das entradas; zero quando o saldo zera
        let avg_cost = if current_qty == Decimal::ZERO || totals.total_in == Decimal::ZERO {
            Decimal::ZERO
        } else {
            (totals.total_in_value / totals.total_in).round_dp(4)
        };

        #[derive(sqlx::FromRow)]
        struct LastPurchase {
            cost_price: Decimal,
            movement_date: NaiveDate,
        }
        let last_purchase = sqlx::query_as::<_, LastPurchase>(
            r#"
            SELECT cost_price, movement_date FROM inventory_movements
            WHERE location_id = $1 AND product_id = $2
              AND movement_type IN ('IN', 'PRODUCTION')
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(location_id)
        .bind(product_id)
        .fetch_optional(&mut *tx)
        .await?;

        #[derive(sqlx::FromRow)]
        struct LastSale {
            sale_price: Option<Decimal>,
            movement_date: NaiveDate,
        }
        let last_sale = sqlx::query_as::<_, LastSale>(
            r#"
            SELECT sale_price, movement_date FROM inventory_movements
            WHERE location_id = $1 AND product_id = $2
              AND movement_type = 'OUT'
              AND source_document_kind IN ('SALE', 'POS_SALE')
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(location_id)
        .bind(product_id)
        .fetch_optional(&mut *tx)
        .await?;

        // 3. Upsert preservando reserved_qty e níveis mín/máx
        let item = sqlx::query_as::<_, InventoryItem>(
            r#"
            INSERT INTO inventory_items (
                location_id, product_id, current_qty, avg_cost,
                last_purchase_cost, last_purchase_date, last_sale_price, last_sale_date,
                last_movement_date, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8,
                    (SELECT MAX(created_at) FROM inventory_movements
                     WHERE location_id = $1 AND product_id = $2),
                    now())
            ON CONFLICT (location_id, product_id) DO UPDATE SET
                current_qty = EXCLUDED.current_qty,
                avg_cost = EXCLUDED.avg_cost,
                last_purchase_cost = EXCLUDED.last_purchase_cost,
                last_purchase_date = EXCLUDED.last_purchase_date,
                last_sale_price = EXCLUDED.last_sale_price,
                last_sale_date = EXCLUDED.last_sale_date,
                last_movement_date = EXCLUDED.last_movement_date,
                updated_at = now()
            RETURNING *
            "#,
        )
        .bind(location_id)
        .bind(product_id)
        .bind(current_qty)
        .bind(avg_cost)
        .bind(last_purchase.as_ref().map(|p| p.cost_price))
        .bind(last_purchase.as_ref().map(|p| p.movement_date))
        .bind(last_sale.as_ref().and_then(|s| s.sale_price))
        .bind(last_sale.as_ref().map(|s| s.movement_date))
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(item))
    }

    /// Reconstrói o cache de um lote específico a partir do razão.
    /// Lote totalmente consumido é apagado.
    pub async fn refresh_batch<'e, E>(
        &self,
        executor: E,
        location_id: Uuid,
        product_id: Uuid,
        batch_number: &str,
        expiry_date: Option<NaiveDate>,
    ) -> Result<Option<InventoryBatch>, AppError>
    where
        E: Executor<'e, Database = Postgres> + Acquire<'e, Database = Postgres>,
    {
        let mut tx = executor.begin().await?;

        let existing = sqlx::query_as::<_, InventoryBatch>(
            r#"
            SELECT * FROM inventory_batches
            WHERE location_id = $1 AND product_id = $2 AND batch_number = $3
              AND expiry_date IS NOT DISTINCT FROM $4
            FOR UPDATE
            "#,
        )
        .bind(location_id)
        .bind(product_id)
        .bind(batch_number)
        .bind(expiry_date)
        .fetch_optional(&mut *tx)
        .await?;

        let totals = sqlx::query_as::<_, LedgerTotals>(
            r#"
            SELECT
                COUNT(*) AS movement_count,
                COALESCE(SUM(quantity) FILTER (WHERE movement_type IN ('IN', 'PRODUCTION')), 0) AS total_in,
                COALESCE(SUM(quantity) FILTER (WHERE movement_type = 'OUT'), 0) AS total_out,
                COALESCE(SUM(quantity * cost_price)
                    FILTER (WHERE movement_type IN ('IN', 'PRODUCTION')), 0) AS total_in_value
            FROM inventory_movements
            WHERE location_id = $1 AND product_id = $2 AND batch_number = $3
              AND ($4::date IS NULL OR expiry_date IS NOT DISTINCT FROM $4)
            "#,
        )
        .bind(location_id)
        .bind(product_id)
        .bind(batch_number)
        .bind(expiry_date)
        .fetch_one(&mut *tx)
        .await?;

        let remaining = totals.total_in - totals.total_out;

        if totals.movement_count == 0 || remaining <= Decimal::ZERO {
            if let Some(batch) = existing {
                sqlx::query("DELETE FROM inventory_batches WHERE id = $1")
                    .bind(batch.id)
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit().await?;
            return Ok(None);
        }

        // Custo e data de recebimento vêm da primeira entrada do lote
        #[derive(sqlx::FromRow)]
        struct FirstIn {
            cost_price: Decimal,
            created_at: chrono::DateTime<Utc>,
        }
        let first_in = sqlx::query_as::<_, FirstIn>(
            r#"
            SELECT cost_price, created_at FROM inventory_movements
            WHERE location_id = $1 AND product_id = $2 AND batch_number = $3
              AND ($4::date IS NULL OR expiry_date IS NOT DISTINCT FROM $4)
              AND movement_type IN ('IN', 'PRODUCTION')
            ORDER BY created_at ASC
            LIMIT 1
            "#,
        )
        .bind(location_id)
        .bind(product_id)
        .bind(batch_number)
        .bind(expiry_date)
        .fetch_optional(&mut *tx)
        .await?;

        let (cost_price, received_date) = match &first_in {
            Some(f) => (f.cost_price, f.created_at),
            None => (Decimal::ZERO, Utc::now()),
        };
        let is_unknown = is_unknown_batch_number(batch_number);

        let batch = sqlx::query_as::<_, InventoryBatch>(
            r#"
            INSERT INTO inventory_batches (
                location_id, product_id, batch_number, expiry_date,
                received_qty, remaining_qty, cost_price, received_date,
                is_unknown_batch, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now())
            ON CONFLICT (location_id, product_id, batch_number, expiry_date) DO UPDATE SET
                received_qty = EXCLUDED.received_qty,
                remaining_qty = EXCLUDED.remaining_qty,
                cost_price = EXCLUDED.cost_price,
                received_date = EXCLUDED.received_date,
                is_unknown_batch = EXCLUDED.is_unknown_batch,
                updated_at = now()
            RETURNING *
            "#,
        )
        .bind(location_id)
        .bind(product_id)
        .bind(batch_number)
        .bind(expiry_date)
        .bind(totals.total_in)
        .bind(remaining)
        .bind(cost_price)
        .bind(received_date)
        .bind(is_unknown)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(batch))
    }

    // ---
    // Lotes (leitura FIFO)
    // ---

    /// Lotes com saldo em ordem FIFO: validade crescente (nulos por último),
    /// depois recebimento, depois número do lote.
    pub async fn get_fifo_batches<'e, E>(
        &self,
        executor: E,
        location_id: Uuid,
        product_id: Uuid,
    ) -> Result<Vec<InventoryBatch>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let batches = sqlx::query_as::<_, InventoryBatch>(
            r#"
            SELECT * FROM inventory_batches
            WHERE location_id = $1 AND product_id = $2 AND remaining_qty > 0
            ORDER BY expiry_date ASC NULLS LAST, received_date ASC, batch_number ASC
            "#,
        )
        .bind(location_id)
        .bind(product_id)
        .fetch_all(executor)
        .await?;
        Ok(batches)
    }

    /// Mesma ordem FIFO, mas travando as linhas para alocação de saída.
    /// Chamado sempre depois do lock do saldo (ordem anti-deadlock).
    pub async fn get_fifo_batches_for_update<'e, E>(
        &self,
        executor: E,
        location_id: Uuid,
        product_id: Uuid,
    ) -> Result<Vec<InventoryBatch>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let batches = sqlx::query_as::<_, InventoryBatch>(
            r#"
            SELECT * FROM inventory_batches
            WHERE location_id = $1 AND product_id = $2 AND remaining_qty > 0
            ORDER BY expiry_date ASC NULLS LAST, received_date ASC, batch_number ASC
            FOR UPDATE
            "#,
        )
        .bind(location_id)
        .bind(product_id)
        .fetch_all(executor)
        .await?;
        Ok(batches)
    }

    pub async fn get_batch_by_number<'e, E>(
        &self,
        executor: E,
        location_id: Uuid,
        product_id: Uuid,
        batch_number: &str,
    ) -> Result<Option<InventoryBatch>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let batch = sqlx::query_as::<_, InventoryBatch>(
            r#"
            SELECT * FROM inventory_batches
            WHERE location_id = $1 AND product_id = $2 AND batch_number = $3
            ORDER BY received_date ASC
            LIMIT 1
            "#,
        )
        .bind(location_id)
        .bind(product_id)
        .bind(batch_number)
        .fetch_optional(executor)
        .await?;
        Ok(batch)
    }

    // ---
    // Reservas (não derivadas do razão)
    // ---

    /// Soma `delta` à quantidade reservada. O chamador já deve ter travado a
    /// linha e re-validado a disponibilidade dentro da mesma transação.
    pub async fn add_reserved_qty<'e, E>(
        &self,
        executor: E,
        item_id: Uuid,
        delta: Decimal,
    ) -> Result<InventoryItem, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let item = sqlx::query_as::<_, InventoryItem>(
            r#"
            UPDATE inventory_items
            SET reserved_qty = reserved_qty + $2, updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(item_id)
        .bind(delta)
        .fetch_one(executor)
        .await?;
        Ok(item)
    }

    // ---
    // Conversão para rastreio de lote
    // ---

    /// Semeia um lote UNKNOWN_* quando um produto passa a rastrear lotes com
    /// saldo solto já existente. O lote herda quantidade e custo médio do
    /// cache de saldo.
    pub async fn insert_unknown_batch<'e, E>(
        &self,
        executor: E,
        location_id: Uuid,
        product_id: Uuid,
        batch_number: &str,
        quantity: Decimal,
        avg_cost: Decimal,
    ) -> Result<InventoryBatch, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let batch = sqlx::query_as::<_, InventoryBatch>(
            r#"
            INSERT INTO inventory_batches (
                location_id, product_id, batch_number, expiry_date,
                received_qty, remaining_qty, cost_price, received_date,
                is_unknown_batch, conversion_date
            )
            VALUES ($1, $2, $3, NULL, $4, $4, $5, now(), TRUE, now())
            RETURNING *
            "#,
        )
        .bind(location_id)
        .bind(product_id)
        .bind(batch_number)
        .bind(quantity)
        .bind(avg_cost)
        .fetch_one(executor)
        .await?;
        Ok(batch)
    }
}
