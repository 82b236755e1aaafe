// src/db/pricing_repo.rs

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{Executor, PgPool, Postgres};
use uuid::Uuid;

use crate::{
    common::error::AppError,
    models::pricing::{
        PackagingPrice, ProductBarcode, ProductGroupPrice, ProductPackaging, ProductPrice,
        ProductStepPrice, PromotionalPrice,
    },
};

#[derive(Clone)]
pub struct PricingRepository {
    pool: PgPool,
}

impl PricingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Promoções vigentes na data para (local, produto). A escolha da melhor
    /// promoção (quantidade, grupo, menor preço, prioridade) é feita no
    /// serviço, em código puro.
    pub async fn get_active_promotions<'e, E>(
        &self,
        executor: E,
        location_id: Uuid,
        product_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<PromotionalPrice>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let promotions = sqlx::query_as::<_, PromotionalPrice>(
            r#"
            SELECT * FROM promotional_prices
            WHERE location_id = $1 AND product_id = $2 AND is_active
              AND start_date <= $3 AND end_date >= $3
            ORDER BY priority DESC, start_date ASC
            "#,
        )
        .bind(location_id)
        .bind(product_id)
        .bind(date)
        .fetch_all(executor)
        .await?;
        Ok(promotions)
    }

    /// Melhor preço de grupo: maior `min_quantity` que ainda caiba na
    /// quantidade pedida.
    pub async fn get_group_price<'e, E>(
        &self,
        executor: E,
        location_id: Uuid,
        product_id: Uuid,
        price_group_id: Uuid,
        quantity: Decimal,
    ) -> Result<Option<ProductGroupPrice>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let price = sqlx::query_as::<_, ProductGroupPrice>(
            r#"
            SELECT * FROM product_group_prices
            WHERE location_id = $1 AND product_id = $2 AND price_group_id = $3
              AND is_active AND min_quantity <= $4
            ORDER BY min_quantity DESC
            LIMIT 1
            "#,
        )
        .bind(location_id)
        .bind(product_id)
        .bind(price_group_id)
        .bind(quantity)
        .fetch_optional(executor)
        .await?;
        Ok(price)
    }

    pub async fn get_step_price<'e, E>(
        &self,
        executor: E,
        location_id: Uuid,
        product_id: Uuid,
        quantity: Decimal,
    ) -> Result<Option<ProductStepPrice>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let price = sqlx::query_as::<_, ProductStepPrice>(
            r#"
            SELECT * FROM product_step_prices
            WHERE location_id = $1 AND product_id = $2
              AND is_active AND min_quantity <= $3
            ORDER BY min_quantity DESC
            LIMIT 1
            "#,
        )
        .bind(location_id)
        .bind(product_id)
        .bind(quantity)
        .fetch_optional(executor)
        .await?;
        Ok(price)
    }

    pub async fn get_base_price<'e, E>(
        &self,
        executor: E,
        location_id: Uuid,
        product_id: Uuid,
    ) -> Result<Option<ProductPrice>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let price = sqlx::query_as::<_, ProductPrice>(
            r#"
            SELECT * FROM product_prices
            WHERE location_id = $1 AND product_id = $2 AND is_active
            "#,
        )
        .bind(location_id)
        .bind(product_id)
        .fetch_optional(executor)
        .await?;
        Ok(price)
    }

    /// Preços MARKUP ativos do par, para recálculo quando o custo muda.
    pub async fn get_markup_prices<'e, E>(
        &self,
        executor: E,
        location_id: Uuid,
        product_id: Uuid,
    ) -> Result<Vec<ProductPrice>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let prices = sqlx::query_as::<_, ProductPrice>(
            r#"
            SELECT * FROM product_prices
            WHERE location_id = $1 AND product_id = $2
              AND pricing_method = 'MARKUP' AND is_active
            "#,
        )
        .bind(location_id)
        .bind(product_id)
        .fetch_all(executor)
        .await?;
        Ok(prices)
    }

    pub async fn update_effective_price<'e, E>(
        &self,
        executor: E,
        price_id: Uuid,
        new_price: Decimal,
    ) -> Result<ProductPrice, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let price = sqlx::query_as::<_, ProductPrice>(
            r#"
            UPDATE product_prices
            SET effective_price = $2, last_cost_update = $3, updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(price_id)
        .bind(new_price)
        .bind(Utc::now())
        .fetch_one(executor)
        .await?;
        Ok(price)
    }

    /// Desloca todos os preços efetivos ativos do local por um percentual.
    pub async fn bulk_update_location_prices<'e, E>(
        &self,
        executor: E,
        location_id: Uuid,
        markup_change_percentage: Decimal,
    ) -> Result<u64, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let result = sqlx::query(
            r#"
            UPDATE product_prices
            SET effective_price = ROUND(effective_price * (1 + $2 / 100), 2),
                last_cost_update = now(), updated_at = now()
            WHERE location_id = $1 AND is_active
            "#,
        )
        .bind(location_id)
        .bind(markup_change_percentage)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    // ---
    // Embalagens e códigos de barras
    // ---

    pub async fn get_barcode<'e, E>(
        &self,
        executor: E,
        barcode: &str,
    ) -> Result<Option<ProductBarcode>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let row = sqlx::query_as::<_, ProductBarcode>(
            "SELECT * FROM product_barcodes WHERE barcode = $1 AND is_active",
        )
        .bind(barcode)
        .fetch_optional(executor)
        .await?;
        Ok(row)
    }

    pub async fn get_packaging<'e, E>(
        &self,
        executor: E,
        packaging_id: Uuid,
    ) -> Result<ProductPackaging, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, ProductPackaging>("SELECT * FROM product_packagings WHERE id = $1")
            .bind(packaging_id)
            .fetch_optional(executor)
            .await?
            .ok_or_else(|| AppError::ResourceNotFound(format!("embalagem {packaging_id}")))
    }

    pub async fn get_packaging_price<'e, E>(
        &self,
        executor: E,
        location_id: Uuid,
        packaging_id: Uuid,
    ) -> Result<Option<PackagingPrice>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let price = sqlx::query_as::<_, PackagingPrice>(
            r#"
            SELECT * FROM packaging_prices
            WHERE location_id = $1 AND packaging_id = $2 AND is_active
            "#,
        )
        .bind(location_id)
        .bind(packaging_id)
        .fetch_optional(executor)
        .await?;
        Ok(price)
    }
}
