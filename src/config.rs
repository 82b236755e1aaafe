// src/config.rs

// Importe dos serviços
use crate::services::{
    ApprovalService, DocumentService, InventoryService, MovementService, NumberingService,
    PricingService, ProductValidationService,
};

// Importe dos repositórios
use crate::db::{
    DocumentsRepository, InventoryRepository, NomenclaturesRepository, PartnersRepository,
    PricingRepository,
};

use sqlx::{postgres::PgPoolOptions, PgPool};
use std::sync::Arc;
use std::{env, time::Duration};

/// Estado compartilhado do motor: a composição explícita de todo o gráfico
/// de dependências acontece aqui, na inicialização. Nenhum componente é
/// resolvido em tempo de execução por nome.
#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub inventory_repo: InventoryRepository,
    pub pricing_repo: PricingRepository,
    pub partners_repo: PartnersRepository,
    pub documents_repo: DocumentsRepository,
    pub nomenclatures_repo: NomenclaturesRepository,
    pub inventory_service: InventoryService,
    pub pricing_service: PricingService,
    pub movement_service: MovementService,
    pub numbering_service: NumberingService,
    pub document_service: DocumentService,
    pub approval_service: ApprovalService,
}

impl AppState {
    pub async fn new() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL").expect("DATABASE_URL deve ser definida");

        // Conecta ao banco de dados, usando '?' para propagar erros
        let db_pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(3))
            .connect(&database_url)
            .await?;

        tracing::info!("✅ Conexão com o banco de dados estabelecida com sucesso!");

        sqlx::migrate!().run(&db_pool).await?;
        tracing::info!("✅ Migrações aplicadas!");

        // --- Monta o gráfico de dependências ---
        let inventory_repo = InventoryRepository::new(db_pool.clone());
        let pricing_repo = PricingRepository::new(db_pool.clone());
        let partners_repo = PartnersRepository::new(db_pool.clone());
        let documents_repo = DocumentsRepository::new(db_pool.clone());
        let nomenclatures_repo = NomenclaturesRepository::new(db_pool.clone());

        // Serviços
        let pricing_service = PricingService::new(
            pricing_repo.clone(),
            inventory_repo.clone(),
            partners_repo.clone(),
        );
        let validator = Arc::new(ProductValidationService::new(inventory_repo.clone()));
        let movement_service = MovementService::new(
            inventory_repo.clone(),
            pricing_service.clone(),
            validator,
        );
        let inventory_service = InventoryService::new(inventory_repo.clone());
        let numbering_service = NumberingService::new(nomenclatures_repo.clone());
        let document_service = DocumentService::new(
            documents_repo.clone(),
            nomenclatures_repo.clone(),
            numbering_service.clone(),
            movement_service.clone(),
        );
        let approval_service = ApprovalService::new(
            documents_repo.clone(),
            nomenclatures_repo.clone(),
            inventory_repo.clone(),
            movement_service.clone(),
        );

        Ok(Self {
            db_pool,
            inventory_repo,
            pricing_repo,
            partners_repo,
            documents_repo,
            nomenclatures_repo,
            inventory_service,
            pricing_service,
            movement_service,
            numbering_service,
            document_service,
            approval_service,
        })
    }
}
