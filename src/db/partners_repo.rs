// src/db/partners_repo.rs

use sqlx::{Executor, PgPool, Postgres};
use uuid::Uuid;

use crate::{
    common::error::AppError,
    models::partners::{Customer, Supplier, User},
};

#[derive(Clone)]
pub struct PartnersRepository {
    pool: PgPool,
}

impl PartnersRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_customer<'e, E>(
        &self,
        executor: E,
        customer_id: Uuid,
    ) -> Result<Customer, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE id = $1")
            .bind(customer_id)
            .fetch_optional(executor)
            .await?
            .ok_or_else(|| AppError::ResourceNotFound(format!("cliente {customer_id}")))
    }

    pub async fn get_supplier<'e, E>(
        &self,
        executor: E,
        supplier_id: Uuid,
    ) -> Result<Supplier, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, Supplier>("SELECT * FROM suppliers WHERE id = $1")
            .bind(supplier_id)
            .fetch_optional(executor)
            .await?
            .ok_or_else(|| AppError::ResourceNotFound(format!("fornecedor {supplier_id}")))
    }

    pub async fn get_user<'e, E>(&self, executor: E, user_id: Uuid) -> Result<User, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(executor)
            .await?
            .ok_or_else(|| AppError::ResourceNotFound(format!("usuário {user_id}")))
    }
}
