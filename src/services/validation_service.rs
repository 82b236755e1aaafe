// src/services/validation_service.rs

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgConnection;

use crate::{
    common::error::AppError,
    db::InventoryRepository,
    models::inventory::InventoryLocation,
    models::products::{Product, UnitType},
};

/// Contrato de validação de produtos consumido pelo processador de
/// movimentos. Implementações concretas são injetadas na montagem do
/// AppState; nada de registro dinâmico por string.
#[async_trait]
pub trait ProductValidation: Send + Sync {
    /// O produto pode ser vendido nesta quantidade neste local?
    async fn validate_sale(
        &self,
        conn: &mut PgConnection,
        product: &Product,
        quantity: Decimal,
        location: &InventoryLocation,
    ) -> Result<(), AppError>;

    /// O produto pode ser comprado/recebido nesta quantidade?
    async fn validate_purchase(
        &self,
        conn: &mut PgConnection,
        product: &Product,
        quantity: Decimal,
        supplier_id: Option<uuid::Uuid>,
    ) -> Result<(), AppError>;
}

// Regras que não dependem do banco, compartilhadas pelos dois caminhos
fn check_sale_rules(product: &Product, quantity: Decimal) -> Result<(), AppError> {
    if !product.is_sellable() {
        if product.sales_blocked {
            return Err(AppError::SalesBlocked(product.code.clone()));
        }
        return Err(AppError::LifecycleRestricted(product.code.clone()));
    }

    if quantity <= Decimal::ZERO {
        return Err(AppError::InvalidQuantity(quantity));
    }

    // Produto contável só sai em números inteiros
    if product.unit_type == UnitType::Piece && quantity.fract() != Decimal::ZERO {
        return Err(AppError::FractionalPieces(product.code.clone()));
    }

    Ok(())
}

fn check_purchase_rules(product: &Product, quantity: Decimal) -> Result<(), AppError> {
    if !product.is_purchasable() {
        if product.purchase_blocked {
            return Err(AppError::PurchaseBlocked(product.code.clone()));
        }
        return Err(AppError::LifecycleRestricted(product.code.clone()));
    }

    if quantity <= Decimal::ZERO {
        return Err(AppError::InvalidQuantity(quantity));
    }

    if product.unit_type == UnitType::Piece && quantity.fract() != Decimal::ZERO {
        return Err(AppError::FractionalPieces(product.code.clone()));
    }

    Ok(())
}

/// Implementação padrão: regras de ciclo de vida + saldo do cache.
#[derive(Clone)]
pub struct ProductValidationService {
    inventory_repo: InventoryRepository,
}

impl ProductValidationService {
    pub fn new(inventory_repo: InventoryRepository) -> Self {
        Self { inventory_repo }
    }
}

#[async_trait]
impl ProductValidation for ProductValidationService {
    async fn validate_sale(
        &self,
        conn: &mut PgConnection,
        product: &Product,
        quantity: Decimal,
        location: &InventoryLocation,
    ) -> Result<(), AppError> {
        check_sale_rules(product, quantity)?;

        // Checagem de saldo só importa onde estoque negativo é proibido
        if !location.allow_negative_stock {
            match self
                .inventory_repo
                .get_item(&mut *conn, location.id, product.id)
                .await?
            {
                Some(item) => {
                    if item.available_qty() < quantity {
                        return Err(AppError::InsufficientStock {
                            available: item.available_qty(),
                            required: quantity,
                        });
                    }
                }
                None => return Err(AppError::NoStock(product.code.clone())),
            }
        }

        Ok(())
    }

    async fn validate_purchase(
        &self,
        _conn: &mut PgConnection,
        product: &Product,
        quantity: Decimal,
        _supplier_id: Option<uuid::Uuid>,
    ) -> Result<(), AppError> {
        check_purchase_rules(product, quantity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::products::LifecycleStatus;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn product(status: LifecycleStatus, unit_type: UnitType) -> Product {
        Product {
            id: Uuid::new_v4(),
            code: "P1".into(),
            name: "Produto".into(),
            base_unit: "un".into(),
            unit_type,
            tax_group_id: None,
            lifecycle_status: status,
            sales_blocked: false,
            purchase_blocked: false,
            track_batches: false,
            track_serial_numbers: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn discontinued_product_cannot_be_sold() {
        let p = product(LifecycleStatus::Discontinued, UnitType::Piece);
        let err = check_sale_rules(&p, dec!(1)).unwrap_err();
        assert_eq!(err.code(), "LIFECYCLE_RESTRICTED");
    }

    #[test]
    fn sales_block_wins_over_lifecycle() {
        let mut p = product(LifecycleStatus::Active, UnitType::Piece);
        p.sales_blocked = true;
        let err = check_sale_rules(&p, dec!(1)).unwrap_err();
        assert_eq!(err.code(), "SALES_BLOCKED");
    }

    #[test]
    fn piece_products_reject_fractional_quantities() {
        let p = product(LifecycleStatus::Active, UnitType::Piece);
        let err = check_sale_rules(&p, dec!(1.5)).unwrap_err();
        assert_eq!(err.code(), "FRACTIONAL_PIECES");

        let by_weight = product(LifecycleStatus::Active, UnitType::Weight);
        assert!(check_sale_rules(&by_weight, dec!(1.5)).is_ok());
    }

    #[test]
    fn phase_out_sells_but_does_not_purchase() {
        let p = product(LifecycleStatus::PhaseOut, UnitType::Piece);
        assert!(check_sale_rules(&p, dec!(1)).is_ok());
        let err = check_purchase_rules(&p, dec!(1)).unwrap_err();
        assert_eq!(err.code(), "LIFECYCLE_RESTRICTED");
    }

    #[test]
    fn zero_quantity_is_rejected() {
        let p = product(LifecycleStatus::Active, UnitType::Weight);
        let err = check_purchase_rules(&p, dec!(0)).unwrap_err();
        assert_eq!(err.code(), "INVALID_QUANTITY");
    }
}
