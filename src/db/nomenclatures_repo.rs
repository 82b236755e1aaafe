// src/db/nomenclatures_repo.rs

use sqlx::{Executor, PgPool, Postgres};
use uuid::Uuid;

use crate::{
    common::error::AppError,
    models::nomenclatures::{
        ApprovalLog, ApprovalRule, DocumentType, DocumentTypeStatus, NumberingConfiguration,
    },
};

#[derive(Clone)]
pub struct NomenclaturesRepository {
    pool: PgPool,
}

impl NomenclaturesRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ---
    // Tipos de documento e status
    // ---

    pub async fn get_document_type<'e, E>(
        &self,
        executor: E,
        document_type_id: Uuid,
    ) -> Result<DocumentType, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, DocumentType>("SELECT * FROM document_types WHERE id = $1")
            .bind(document_type_id)
            .fetch_optional(executor)
            .await?
            .ok_or_else(|| AppError::ResourceNotFound(format!("tipo de documento {document_type_id}")))
    }

    pub async fn get_document_type_by_key<'e, E>(
        &self,
        executor: E,
        type_key: &str,
    ) -> Result<DocumentType, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, DocumentType>(
            "SELECT * FROM document_types WHERE type_key = $1 AND is_active",
        )
        .bind(type_key)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| AppError::ResourceNotFound(format!("tipo de documento '{type_key}'")))
    }

    /// Configuração de um status dentro do tipo (gatilhos de estoque,
    /// edição, papéis no workflow). `None` = status não permitido no tipo.
    pub async fn get_type_status<'e, E>(
        &self,
        executor: E,
        document_type_id: Uuid,
        status_code: &str,
    ) -> Result<Option<DocumentTypeStatus>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let row = sqlx::query_as::<_, DocumentTypeStatus>(
            r#"
            SELECT dts.* FROM document_type_statuses dts
            JOIN document_statuses s ON s.id = dts.status_id
            WHERE dts.document_type_id = $1 AND s.code = $2 AND dts.is_active
            "#,
        )
        .bind(document_type_id)
        .bind(status_code)
        .fetch_optional(executor)
        .await?;
        Ok(row)
    }

    pub async fn get_initial_status_code<'e, E>(
        &self,
        executor: E,
        document_type_id: Uuid,
    ) -> Result<String, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let code: Option<String> = sqlx::query_scalar(
            r#"
            SELECT s.code FROM document_type_statuses dts
            JOIN document_statuses s ON s.id = dts.status_id
            WHERE dts.document_type_id = $1 AND dts.is_initial AND dts.is_active
            "#,
        )
        .bind(document_type_id)
        .fetch_optional(executor)
        .await?;
        code.ok_or_else(|| {
            AppError::ResourceNotFound(format!(
                "status inicial do tipo de documento {document_type_id}"
            ))
        })
    }

    pub async fn get_cancellation_status_code<'e, E>(
        &self,
        executor: E,
        document_type_id: Uuid,
    ) -> Result<Option<String>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let code: Option<String> = sqlx::query_scalar(
            r#"
            SELECT s.code FROM document_type_statuses dts
            JOIN document_statuses s ON s.id = dts.status_id
            WHERE dts.document_type_id = $1 AND dts.is_cancellation AND dts.is_active
            "#,
        )
        .bind(document_type_id)
        .fetch_optional(executor)
        .await?;
        Ok(code)
    }

    // ---
    // Regras e trilha de aprovação
    // ---

    /// Regras ativas saindo de `from_status`, da maior para a menor
    /// prioridade. O casamento por valor/aprovador é código puro do serviço.
    pub async fn get_rules_from_status<'e, E>(
        &self,
        executor: E,
        document_type_id: Uuid,
        from_status: &str,
    ) -> Result<Vec<ApprovalRule>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let rules = sqlx::query_as::<_, ApprovalRule>(
            r#"
            SELECT * FROM approval_rules
            WHERE document_type_id = $1 AND from_status = $2 AND is_active
            ORDER BY priority DESC, approval_level ASC
            "#,
        )
        .bind(document_type_id)
        .bind(from_status)
        .fetch_all(executor)
        .await?;
        Ok(rules)
    }

    pub async fn insert_approval_log<'e, E>(
        &self,
        executor: E,
        document_id: Uuid,
        actor_id: Uuid,
        from_status: &str,
        to_status: &str,
        rule_id: Option<Uuid>,
        comments: &str,
    ) -> Result<ApprovalLog, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let log = sqlx::query_as::<_, ApprovalLog>(
            r#"
            INSERT INTO approval_logs (document_id, actor_id, from_status, to_status, rule_id, comments)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(document_id)
        .bind(actor_id)
        .bind(from_status)
        .bind(to_status)
        .bind(rule_id)
        .bind(comments)
        .fetch_one(executor)
        .await?;
        Ok(log)
    }

    // ---
    // Numeração
    // ---

    /// Seleciona a configuração de numeração na ordem de preferência:
    /// usuário > local > padrão do tipo.
    pub async fn find_numbering_config<'e, E>(
        &self,
        executor: E,
        document_type_id: Uuid,
        location_id: Option<Uuid>,
        user_id: Option<Uuid>,
    ) -> Result<Option<NumberingConfiguration>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let config = sqlx::query_as::<_, NumberingConfiguration>(
            r#"
            SELECT * FROM numbering_configurations
            WHERE document_type_id = $1 AND is_active
              AND (user_id IS NOT DISTINCT FROM $3 OR user_id IS NULL)
              AND (location_id IS NOT DISTINCT FROM $2 OR location_id IS NULL)
            ORDER BY
                (user_id IS NOT NULL AND user_id IS NOT DISTINCT FROM $3) DESC,
                (location_id IS NOT NULL AND location_id IS NOT DISTINCT FROM $2) DESC
            LIMIT 1
            "#,
        )
        .bind(document_type_id)
        .bind(location_id)
        .bind(user_id)
        .fetch_optional(executor)
        .await?;
        Ok(config)
    }

    /// Trava a configuração pelo id para alocar o próximo número.
    pub async fn lock_numbering_config<'e, E>(
        &self,
        executor: E,
        config_id: Uuid,
    ) -> Result<NumberingConfiguration, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, NumberingConfiguration>(
            "SELECT * FROM numbering_configurations WHERE id = $1 FOR UPDATE",
        )
        .bind(config_id)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| AppError::ResourceNotFound(format!("configuração de numeração {config_id}")))
    }

    pub async fn save_numbering_counter<'e, E>(
        &self,
        executor: E,
        config_id: Uuid,
        current_number: i64,
        last_reset_year: Option<i32>,
    ) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            r#"
            UPDATE numbering_configurations
            SET current_number = $2, last_reset_year = $3
            WHERE id = $1
            "#,
        )
        .bind(config_id)
        .bind(current_number)
        .bind(last_reset_year)
        .execute(executor)
        .await?;
        Ok(())
    }
}
