// src/db/documents_repo.rs

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::{Executor, PgPool, Postgres};
use uuid::Uuid;

use crate::{
    common::error::AppError,
    models::documents::{Document, DocumentKind, DocumentLine, UrgencyLevel},
};

#[derive(Clone)]
pub struct DocumentsRepository {
    pool: PgPool,
}

impl DocumentsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ---
    // Cabeçalhos
    // ---

    #[allow(clippy::too_many_arguments)]
    pub async fn insert_document<'e, E>(
        &self,
        executor: E,
        kind: DocumentKind,
        document_type_id: Uuid,
        document_number: &str,
        document_date: NaiveDate,
        status: &str,
        supplier_id: Option<Uuid>,
        location_id: Uuid,
        prices_include_vat: bool,
        urgency_level: Option<UrgencyLevel>,
        requested_by: Option<Uuid>,
        notes: &str,
        created_by: Option<Uuid>,
    ) -> Result<Document, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, Document>(
            r#"
            INSERT INTO documents (
                kind, document_type_id, document_number, document_date, status,
                supplier_id, location_id, prices_include_vat,
                urgency_level, requested_by, notes, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *
            "#,
        )
        .bind(kind)
        .bind(document_type_id)
        .bind(document_number)
        .bind(document_date)
        .bind(status)
        .bind(supplier_id)
        .bind(location_id)
        .bind(prices_include_vat)
        .bind(urgency_level)
        .bind(requested_by)
        .bind(notes)
        .bind(created_by)
        .fetch_one(executor)
        .await
        .map_err(|e| {
            if let Some(db_err) = e.as_database_error() {
                if db_err.is_unique_violation() {
                    return AppError::DocumentNumberAlreadyExists(document_number.to_string());
                }
            }
            e.into()
        })
    }

    pub async fn get_document<'e, E>(
        &self,
        executor: E,
        document_id: Uuid,
    ) -> Result<Document, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, Document>("SELECT * FROM documents WHERE id = $1")
            .bind(document_id)
            .fetch_optional(executor)
            .await?
            .ok_or_else(|| AppError::DocumentNotFound(document_id.to_string()))
    }

    /// Trava o cabeçalho para transição de status (uma transição por vez).
    pub async fn get_document_for_update<'e, E>(
        &self,
        executor: E,
        document_id: Uuid,
    ) -> Result<Document, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, Document>("SELECT * FROM documents WHERE id = $1 FOR UPDATE")
            .bind(document_id)
            .fetch_optional(executor)
            .await?
            .ok_or_else(|| AppError::DocumentNotFound(document_id.to_string()))
    }

    pub async fn update_status<'e, E>(
        &self,
        executor: E,
        document_id: Uuid,
        new_status: &str,
    ) -> Result<Document, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let doc = sqlx::query_as::<_, Document>(
            "UPDATE documents SET status = $2, updated_at = now() WHERE id = $1 RETURNING *",
        )
        .bind(document_id)
        .bind(new_status)
        .fetch_one(executor)
        .await?;
        Ok(doc)
    }

    pub async fn set_converted_to_order<'e, E>(
        &self,
        executor: E,
        request_id: Uuid,
        order_id: Uuid,
    ) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            "UPDATE documents SET converted_to_order_id = $2, updated_at = now() WHERE id = $1",
        )
        .bind(request_id)
        .bind(order_id)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Recalcula o cache financeiro do cabeçalho a partir das linhas.
    pub async fn recalculate_totals<'e, E>(
        &self,
        executor: E,
        document_id: Uuid,
    ) -> Result<Document, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let doc = sqlx::query_as::<_, Document>(
            r#"
            UPDATE documents SET
                total_amount = COALESCE(
                    (SELECT SUM(line_total) FROM document_lines WHERE document_id = $1), 0),
                vat_total = COALESCE(
                    (SELECT SUM(vat_amount) FROM document_lines WHERE document_id = $1), 0),
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(document_id)
        .fetch_one(executor)
        .await?;
        Ok(doc)
    }

    // ---
    // Linhas
    // ---

    pub async fn next_line_number<'e, E>(
        &self,
        executor: E,
        document_id: Uuid,
    ) -> Result<i32, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let next: i32 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(line_number), 0) + 1 FROM document_lines WHERE document_id = $1",
        )
        .bind(document_id)
        .fetch_one(executor)
        .await?;
        Ok(next)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn insert_line<'e, E>(
        &self,
        executor: E,
        document_id: Uuid,
        line_number: i32,
        product_id: Uuid,
        quantity: Decimal,
        unit: &str,
        unit_price: Decimal,
        discount_percent: Decimal,
        batch_number: Option<&str>,
        expiry_date: Option<NaiveDate>,
        line_total: Decimal,
        vat_amount: Decimal,
    ) -> Result<DocumentLine, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, DocumentLine>(
            r#"
            INSERT INTO document_lines (
                document_id, line_number, product_id, quantity, unit, unit_price,
                discount_percent, batch_number, expiry_date, line_total, vat_amount
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(document_id)
        .bind(line_number)
        .bind(product_id)
        .bind(quantity)
        .bind(unit)
        .bind(unit_price)
        .bind(discount_percent)
        .bind(batch_number)
        .bind(expiry_date)
        .bind(line_total)
        .bind(vat_amount)
        .fetch_one(executor)
        .await
        .map_err(|e| {
            if let Some(db_err) = e.as_database_error() {
                if db_err.is_unique_violation() {
                    return AppError::DuplicateLineNumber {
                        document: document_id.to_string(),
                        line: line_number,
                    };
                }
            }
            e.into()
        })
    }

    pub async fn get_line<'e, E>(
        &self,
        executor: E,
        document_id: Uuid,
        line_number: i32,
    ) -> Result<DocumentLine, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, DocumentLine>(
            "SELECT * FROM document_lines WHERE document_id = $1 AND line_number = $2",
        )
        .bind(document_id)
        .bind(line_number)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| {
            AppError::ResourceNotFound(format!("linha {line_number} do documento {document_id}"))
        })
    }

    pub async fn get_lines<'e, E>(
        &self,
        executor: E,
        document_id: Uuid,
    ) -> Result<Vec<DocumentLine>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let lines = sqlx::query_as::<_, DocumentLine>(
            "SELECT * FROM document_lines WHERE document_id = $1 ORDER BY line_number ASC",
        )
        .bind(document_id)
        .fetch_all(executor)
        .await?;
        Ok(lines)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn update_line<'e, E>(
        &self,
        executor: E,
        line_id: Uuid,
        quantity: Decimal,
        unit_price: Decimal,
        discount_percent: Decimal,
        line_total: Decimal,
        vat_amount: Decimal,
    ) -> Result<DocumentLine, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let line = sqlx::query_as::<_, DocumentLine>(
            r#"
            UPDATE document_lines
            SET quantity = $2, unit_price = $3, discount_percent = $4,
                line_total = $5, vat_amount = $6
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(line_id)
        .bind(quantity)
        .bind(unit_price)
        .bind(discount_percent)
        .bind(line_total)
        .bind(vat_amount)
        .fetch_one(executor)
        .await?;
        Ok(line)
    }

    /// Alíquota do grupo fiscal do produto (zero quando não há grupo).
    pub async fn get_tax_rate_for_product<'e, E>(
        &self,
        executor: E,
        product_id: Uuid,
    ) -> Result<Decimal, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let rate: Option<Decimal> = sqlx::query_scalar(
            r#"
            SELECT tg.rate FROM products p
            JOIN tax_groups tg ON tg.id = p.tax_group_id
            WHERE p.id = $1
            "#,
        )
        .bind(product_id)
        .fetch_optional(executor)
        .await?;
        Ok(rate.unwrap_or(Decimal::ZERO))
    }
}
