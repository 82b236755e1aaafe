// src/common/error.rs

use rust_decimal::Decimal;
use serde_json::json;
use thiserror::Error;

use crate::common::result::ServiceResult;

// Nosso tipo de erro principal (Enum do Backend)
#[derive(Debug, Error)]
pub enum AppError {

    #[error("Erro de validação")]
    ValidationError(#[from] validator::ValidationErrors),

    // --- Regras de estoque ---

    #[error("Quantidade inválida: {0}")]
    InvalidQuantity(Decimal),

    #[error("Produto sem registro de estoque neste local: {product} @ {location}")]
    ItemNotFound { product: String, location: String },

    #[error("Estoque insuficiente. Disponível: {available}, necessário: {required}")]
    InsufficientStock { available: Decimal, required: Decimal },

    #[error("Estoque insuficiente nos lotes. Disponível: {available}, necessário: {required}")]
    InsufficientBatchStock { available: Decimal, required: Decimal },

    #[error("Não é possível reservar {requested}, apenas {available} disponível")]
    InsufficientAvailable { requested: Decimal, available: Decimal },

    #[error("Não é possível liberar {requested}, apenas {reserved} reservado")]
    InsufficientReserved { requested: Decimal, reserved: Decimal },

    #[error("Venda bloqueada administrativamente para o produto {0}")]
    SalesBlocked(String),

    #[error("Compra bloqueada administrativamente para o produto {0}")]
    PurchaseBlocked(String),

    #[error("Ciclo de vida do produto {0} não permite esta operação")]
    LifecycleRestricted(String),

    #[error("Produto {0} é vendido por unidade e não aceita quantidade fracionada")]
    FractionalPieces(String),

    #[error("Sem estoque do produto {0} neste local")]
    NoStock(String),

    #[error("Transferência exige locais de origem e destino diferentes")]
    TransferSameLocation,

    #[error("Transferências não podem ser estornadas de uma vez; estorne cada perna")]
    CannotReverseTransfer,

    #[error("Movimento não encontrado: {0}")]
    MovementNotFound(uuid::Uuid),

    // --- Workflow de documentos ---

    #[error("Transição inválida: {from} → {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Nenhuma regra de aprovação cobre a transição {from} → {to}")]
    NoRule { from: String, to: String },

    #[error("Usuário não pertence ao conjunto de aprovadores")]
    PermissionDenied,

    #[error("Total do documento fora da faixa da regra de aprovação")]
    AmountOutOfRange,

    #[error("Efeito colateral da transição falhou: {0}")]
    SideEffectFailed(String),

    #[error("Documento não pode ser editado no status '{0}'")]
    EditNotAllowed(String),

    #[error("Documento não encontrado: {0}")]
    DocumentNotFound(String),

    #[error("Número de documento já existe: {0}")]
    DocumentNumberAlreadyExists(String),

    #[error("Linha {line} já existe no documento {document}")]
    DuplicateLineNumber { document: String, line: i32 },

    #[error("Conversão não permitida: {0}")]
    ConversionNotAllowed(String),

    // --- Numeração ---

    #[error("Limite de numeração atingido: {0}")]
    NumberLimitExceeded(i64),

    #[error("Nenhuma configuração de numeração para o tipo {0}")]
    NumberingConfigNotFound(String),

    // --- Genéricos ---

    #[error("Não foi encontrado o recurso: {0}")]
    ResourceNotFound(String),

    // Erros técnicos (wrappers)
    #[error("Erro de banco de dados")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Erro interno do servidor")]
    InternalServerError(#[from] anyhow::Error),
}

impl AppError {
    /// Código estável, legível por máquina, de cada variante.
    /// Os chamadores mapeiam código → mensagem localizada; o motor não localiza.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) => "VALIDATION",
            AppError::InvalidQuantity(_) => "INVALID_QUANTITY",
            AppError::ItemNotFound { .. } => "ITEM_NOT_FOUND",
            AppError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            AppError::InsufficientBatchStock { .. } => "INSUFFICIENT_BATCH_STOCK",
            AppError::InsufficientAvailable { .. } => "INSUFFICIENT_AVAILABLE",
            AppError::InsufficientReserved { .. } => "INSUFFICIENT_RESERVED",
            AppError::SalesBlocked(_) => "SALES_BLOCKED",
            AppError::PurchaseBlocked(_) => "PURCHASE_BLOCKED",
            AppError::LifecycleRestricted(_) => "LIFECYCLE_RESTRICTED",
            AppError::FractionalPieces(_) => "FRACTIONAL_PIECES",
            AppError::NoStock(_) => "NO_STOCK",
            AppError::TransferSameLocation => "INVALID_TRANSFER",
            AppError::CannotReverseTransfer => "CANNOT_REVERSE_TRANSFER",
            AppError::MovementNotFound(_) => "MOVEMENT_NOT_FOUND",
            AppError::InvalidTransition { .. } => "INVALID_TRANSITION",
            AppError::NoRule { .. } => "NO_RULE",
            AppError::PermissionDenied => "PERMISSION_DENIED",
            AppError::AmountOutOfRange => "AMOUNT_OUT_OF_RANGE",
            AppError::SideEffectFailed(_) => "SIDE_EFFECT_FAILED",
            AppError::EditNotAllowed(_) => "EDIT_NOT_ALLOWED",
            AppError::DocumentNotFound(_) => "DOCUMENT_NOT_FOUND",
            AppError::DocumentNumberAlreadyExists(_) => "DOCUMENT_NUMBER_EXISTS",
            AppError::DuplicateLineNumber { .. } => "DUPLICATE_LINE",
            AppError::ConversionNotAllowed(_) => "CONVERSION_NOT_ALLOWED",
            AppError::NumberLimitExceeded(_) => "NUMBER_LIMIT_EXCEEDED",
            AppError::NumberingConfigNotFound(_) => "NUMBERING_CONFIG_NOT_FOUND",
            AppError::ResourceNotFound(_) => "NOT_FOUND",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            AppError::InternalServerError(_) => "INTERNAL_ERROR",
        }
    }

    /// Converte o erro no resultado etiquetado do contrato de serviço.
    ///
    /// Erros de negócio viram `ok=false` com código estável; erros técnicos
    /// são registrados no log e escondem o detalhe do chamador.
    pub fn to_service_result(&self) -> ServiceResult {
        match self {
            // Erros Críticos (Servidor quebrou) - Vermelho/Error
            AppError::DatabaseError(e) => {
                tracing::error!("🔥 ERRO DE BANCO: {:?}", e);
                ServiceResult::error(self.code(), "Erro interno de banco de dados", json!({}))
            }
            AppError::InternalServerError(e) => {
                tracing::error!("🔥 ERRO INTERNO: {:?}", e);
                ServiceResult::error(self.code(), "Erro interno do servidor", json!({}))
            }

            // Avisos (regra de negócio) - Amarelo/Warn
            _ => {
                tracing::warn!("⚠️ Regra de negócio: {}", self);
                ServiceResult::error(self.code(), self.to_string(), self.context_data())
            }
        }
    }

    // Contexto estruturado que acompanha o código no payload do resultado
    fn context_data(&self) -> serde_json::Value {
        match self {
            AppError::InsufficientStock { available, required }
            | AppError::InsufficientBatchStock { available, required } => {
                json!({ "available": available, "required": required })
            }
            AppError::InsufficientAvailable { requested, available } => {
                json!({ "requested": requested, "available": available })
            }
            AppError::InsufficientReserved { requested, reserved } => {
                json!({ "requested": requested, "reserved": reserved })
            }
            AppError::ItemNotFound { product, location } => {
                json!({ "product_code": product, "location_code": location })
            }
            AppError::InvalidTransition { from, to } | AppError::NoRule { from, to } => {
                json!({ "from_status": from, "to_status": to })
            }
            AppError::InvalidQuantity(q) => json!({ "quantity": q }),
            AppError::NumberLimitExceeded(max) => json!({ "max_number": max }),
            _ => json!({}),
        }
    }
}
