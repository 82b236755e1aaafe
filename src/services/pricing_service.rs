// src/services/pricing_service.rs

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde_json::json;
use sqlx::{Acquire, Executor, PgConnection, Postgres};
use uuid::Uuid;

use crate::{
    common::{error::AppError, result::ServiceResult},
    db::{InventoryRepository, PartnersRepository, PricingRepository},
    models::inventory::InventoryLocation,
    models::pricing::{PricingMethod, PricingRule, PromotionalPrice},
};

#[derive(Clone)]
pub struct PricingService {
    pricing_repo: PricingRepository,
    inventory_repo: InventoryRepository,
    partners_repo: PartnersRepository,
}

// =========================================================================
//  NÚCLEO PURO DO RESOLVEDOR (testável sem banco)
// =========================================================================

/// Escolhe a promoção aplicável: menor preço promocional, empate decidido
/// pela maior prioridade. Promoções fora da faixa de quantidade ou
/// restritas a outro grupo de clientes não participam.
fn pick_promotion(
    promotions: &[PromotionalPrice],
    quantity: Decimal,
    price_group_id: Option<Uuid>,
) -> Option<Decimal> {
    let mut best: Option<&PromotionalPrice> = None;

    for promo in promotions {
        if promo.promotional_price <= Decimal::ZERO {
            continue;
        }
        if !promo.is_valid_for_quantity(quantity) || !promo.applies_to_group(price_group_id) {
            continue;
        }

        best = match best {
            None => Some(promo),
            Some(current) => {
                if promo.promotional_price < current.promotional_price
                    || (promo.promotional_price == current.promotional_price
                        && promo.priority > current.priority)
                {
                    Some(promo)
                } else {
                    Some(current)
                }
            }
        };
    }

    best.map(|p| p.promotional_price)
}

/// Percorre as camadas em ordem estrita e devolve o primeiro valor
/// positivo: promoção → grupo → escalonado → base → fallback.
fn resolve_from_candidates(
    promotion: Option<Decimal>,
    group: Option<Decimal>,
    step: Option<Decimal>,
    base: Option<Decimal>,
    fallback: Decimal,
) -> (Decimal, PricingRule) {
    let positive = |v: Option<Decimal>| v.filter(|p| *p > Decimal::ZERO);

    if let Some(p) = positive(promotion) {
        return (p, PricingRule::Promotion);
    }
    if let Some(p) = positive(group) {
        return (p, PricingRule::CustomerGroup);
    }
    if let Some(p) = positive(step) {
        return (p, PricingRule::StepPrice);
    }
    if let Some(p) = positive(base) {
        return (p, PricingRule::BasePrice);
    }
    (fallback.max(Decimal::ZERO), PricingRule::Fallback)
}

/// Preço efetivo de um registro base: FIXED usa o valor cadastrado, MARKUP
/// aplica a margem própria sobre o custo, AUTO usa a margem padrão do local.
pub fn compute_effective_price(
    method: PricingMethod,
    base_price: Option<Decimal>,
    markup_percentage: Option<Decimal>,
    cost: Decimal,
    default_markup: Decimal,
) -> Decimal {
    let price = match method {
        PricingMethod::Fixed => base_price.unwrap_or(Decimal::ZERO),
        PricingMethod::Markup => match markup_percentage {
            Some(markup) if cost > Decimal::ZERO => {
                cost * (Decimal::ONE + markup / Decimal::from(100))
            }
            _ => Decimal::ZERO,
        },
        PricingMethod::Auto => {
            if cost > Decimal::ZERO {
                cost * (Decimal::ONE + default_markup / Decimal::from(100))
            } else {
                Decimal::ZERO
            }
        }
    };
    price.round_dp(2)
}

pub fn calculate_markup_percentage(cost_price: Decimal, sale_price: Decimal) -> Decimal {
    if cost_price <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    ((sale_price - cost_price) / cost_price * Decimal::from(100)).round_dp(2)
}

pub fn calculate_margin_percentage(cost_price: Decimal, sale_price: Decimal) -> Decimal {
    if sale_price <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    ((sale_price - cost_price) / sale_price * Decimal::from(100)).round_dp(2)
}

impl PricingService {
    pub fn new(
        pricing_repo: PricingRepository,
        inventory_repo: InventoryRepository,
        partners_repo: PartnersRepository,
    ) -> Self {
        Self {
            pricing_repo,
            inventory_repo,
            partners_repo,
        }
    }

    // =========================================================================
    //  RESOLUÇÃO DE PREÇO DE VENDA
    // =========================================================================

    /// Preço final de venda para (local, produto, cliente?, quantidade, data).
    /// Nunca devolve negativo; zero apenas se nenhuma camada produziu valor.
    pub async fn get_sale_price<'e, E>(
        &self,
        executor: E,
        location: &InventoryLocation,
        product_id: Uuid,
        customer_id: Option<Uuid>,
        quantity: Decimal,
        date: NaiveDate,
    ) -> Result<Decimal, AppError>
    where
        E: Executor<'e, Database = Postgres> + Acquire<'e, Database = Postgres>,
    {
        let mut tx = executor.begin().await?;
        let (price, _rule) = self
            .resolve_price(&mut tx, location, product_id, customer_id, quantity, date)
            .await?;
        tx.commit().await?;
        Ok(price)
    }

    /// Qual camada decidiu o preço (para análise e relatórios).
    pub async fn get_applied_pricing_rule<'e, E>(
        &self,
        executor: E,
        location: &InventoryLocation,
        product_id: Uuid,
        customer_id: Option<Uuid>,
        quantity: Decimal,
        date: NaiveDate,
    ) -> Result<PricingRule, AppError>
    where
        E: Executor<'e, Database = Postgres> + Acquire<'e, Database = Postgres>,
    {
        let mut tx = executor.begin().await?;
        let (_price, rule) = self
            .resolve_price(&mut tx, location, product_id, customer_id, quantity, date)
            .await?;
        tx.commit().await?;
        Ok(rule)
    }

    // As cinco camadas, na ordem do contrato
    async fn resolve_price(
        &self,
        conn: &mut PgConnection,
        location: &InventoryLocation,
        product_id: Uuid,
        customer_id: Option<Uuid>,
        quantity: Decimal,
        date: NaiveDate,
    ) -> Result<(Decimal, PricingRule), AppError> {
        // 1. Grupo de preço do cliente (se houver cliente)
        let price_group_id = match customer_id {
            Some(id) => {
                self.partners_repo
                    .get_customer(&mut *conn, id)
                    .await?
                    .price_group_id
            }
            None => None,
        };

        // 2. Promoções vigentes
        let promotions = self
            .pricing_repo
            .get_active_promotions(&mut *conn, location.id, product_id, date)
            .await?;
        let promo_price = pick_promotion(&promotions, quantity, price_group_id);

        // 3. Preço por grupo de cliente
        let group_price = match price_group_id {
            Some(group_id) => self
                .pricing_repo
                .get_group_price(&mut *conn, location.id, product_id, group_id, quantity)
                .await?
                .map(|g| g.price),
            None => None,
        };

        // 4. Preço escalonado por quantidade
        let step_price = self
            .pricing_repo
            .get_step_price(&mut *conn, location.id, product_id, quantity)
            .await?
            .map(|s| s.price);

        // 5. Preço base ativo
        let base_price = self
            .pricing_repo
            .get_base_price(&mut *conn, location.id, product_id)
            .await?
            .map(|b| b.effective_price);

        // 6. Fallback: custo médio + margem padrão do local
        let fallback = self
            .fallback_price(&mut *conn, location, product_id)
            .await?;

        Ok(resolve_from_candidates(
            promo_price,
            group_price,
            step_price,
            base_price,
            fallback,
        ))
    }

    async fn fallback_price(
        &self,
        conn: &mut PgConnection,
        location: &InventoryLocation,
        product_id: Uuid,
    ) -> Result<Decimal, AppError> {
        let cost = self
            .inventory_repo
            .get_item(&mut *conn, location.id, product_id)
            .await?
            .map(|item| item.avg_cost)
            .unwrap_or(Decimal::ZERO);

        if cost <= Decimal::ZERO {
            return Ok(Decimal::ZERO);
        }

        let price = (cost
            * (Decimal::ONE + location.default_markup_percentage / Decimal::from(100)))
        .round_dp(2);
        tracing::debug!(
            "Preço fallback para {product_id} @ {}: custo={cost}, margem={}%, preço={price}",
            location.code,
            location.default_markup_percentage
        );
        Ok(price)
    }

    // =========================================================================
    //  PROPAGAÇÃO DE MUDANÇA DE CUSTO
    // =========================================================================

    /// Reescreve o preço efetivo de todos os preços MARKUP ativos do par.
    /// Invocado pelo processador quando o custo médio varia mais de 5%.
    pub async fn update_markup_prices<'e, E>(
        &self,
        executor: E,
        location_id: Uuid,
        product_id: Uuid,
        new_avg_cost: Decimal,
    ) -> Result<u64, AppError>
    where
        E: Executor<'e, Database = Postgres> + Acquire<'e, Database = Postgres>,
    {
        let mut tx = executor.begin().await?;

        let markup_prices = self
            .pricing_repo
            .get_markup_prices(&mut *tx, location_id, product_id)
            .await?;

        let mut updated = 0u64;
        for record in markup_prices {
            let Some(markup) = record.markup_percentage.filter(|m| *m > Decimal::ZERO) else {
                continue;
            };
            let new_price =
                (new_avg_cost * (Decimal::ONE + markup / Decimal::from(100))).round_dp(2);

            self.pricing_repo
                .update_effective_price(&mut *tx, record.id, new_price)
                .await?;

            tracing::info!(
                "Preço MARKUP atualizado para {product_id}: {} → {new_price}",
                record.effective_price
            );
            updated += 1;
        }

        tx.commit().await?;
        Ok(updated)
    }

    /// Desloca todos os preços ativos de um local por um percentual.
    pub async fn bulk_update_location_prices<'e, E>(
        &self,
        executor: E,
        location_id: Uuid,
        markup_change_percentage: Decimal,
    ) -> Result<u64, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let updated = self
            .pricing_repo
            .bulk_update_location_prices(executor, location_id, markup_change_percentage)
            .await?;
        tracing::info!(
            "{updated} preços do local {location_id} deslocados em {markup_change_percentage}%"
        );
        Ok(updated)
    }

    // =========================================================================
    //  ANÁLISE DE PREÇOS
    // =========================================================================

    pub async fn get_pricing_analysis<'e, E>(
        &self,
        executor: E,
        location: &InventoryLocation,
        product_id: Uuid,
        customer_id: Option<Uuid>,
        quantity: Decimal,
        date: NaiveDate,
    ) -> Result<ServiceResult, AppError>
    where
        E: Executor<'e, Database = Postgres> + Acquire<'e, Database = Postgres>,
    {
        let mut tx = executor.begin().await?;

        let (final_price, rule) = self
            .resolve_price(&mut tx, location, product_id, customer_id, quantity, date)
            .await?;

        let base_price = self
            .pricing_repo
            .get_base_price(&mut *tx, location.id, product_id)
            .await?
            .map(|b| b.effective_price)
            .unwrap_or(Decimal::ZERO);

        let cost_price = self
            .inventory_repo
            .get_item(&mut *tx, location.id, product_id)
            .await?
            .map(|item| item.avg_cost)
            .unwrap_or(Decimal::ZERO);

        tx.commit().await?;

        let discount = if base_price > final_price {
            base_price - final_price
        } else {
            Decimal::ZERO
        };

        Ok(ServiceResult::success(
            json!({
                "base_price": base_price,
                "final_price": final_price,
                "cost_price": cost_price,
                "markup_percentage": calculate_markup_percentage(cost_price, final_price),
                "margin_percentage": calculate_margin_percentage(cost_price, final_price),
                "profit_amount": final_price - cost_price,
                "customer_discount": discount,
                "pricing_rule": rule,
                "quantity": quantity,
            }),
            format!("Análise de preço do produto {product_id}"),
        ))
    }

    // =========================================================================
    //  PREÇO POR CÓDIGO DE BARRAS / EMBALAGEM
    // =========================================================================

    /// Preço a partir de um código de barras. Código ligado a uma embalagem
    /// usa o preço da embalagem (unitário = preço / fator de conversão);
    /// caso contrário cai na resolução normal do produto.
    pub async fn get_barcode_pricing<'e, E>(
        &self,
        executor: E,
        location: &InventoryLocation,
        barcode: &str,
        customer_id: Option<Uuid>,
        quantity: Decimal,
        date: NaiveDate,
    ) -> Result<ServiceResult, AppError>
    where
        E: Executor<'e, Database = Postgres> + Acquire<'e, Database = Postgres>,
    {
        let mut tx = executor.begin().await?;

        let Some(barcode_row) = self.pricing_repo.get_barcode(&mut *tx, barcode).await? else {
            return Ok(ServiceResult::error(
                "BARCODE_NOT_FOUND",
                format!("Código de barras desconhecido: {barcode}"),
                json!({ "barcode": barcode }),
            ));
        };

        // Embalagem específica tem precedência sobre o preço do produto
        if let Some(packaging_id) = barcode_row.packaging_id {
            if let Some(packaging_price) = self
                .pricing_repo
                .get_packaging_price(&mut *tx, location.id, packaging_id)
                .await?
            {
                let packaging = self.pricing_repo.get_packaging(&mut *tx, packaging_id).await?;
                tx.commit().await?;

                let unit_price =
                    (packaging_price.price / packaging.conversion_factor).round_dp(2);
                return Ok(ServiceResult::success(
                    json!({
                        "product_id": barcode_row.product_id,
                        "packaging_id": packaging.id,
                        "price": packaging_price.price,
                        "unit_price": unit_price,
                        "quantity_represented": packaging.conversion_factor,
                        "pricing_type": "PACKAGING",
                        "barcode": barcode,
                    }),
                    format!("Preço de embalagem para {barcode}"),
                ));
            }
        }

        let (price, rule) = self
            .resolve_price(
                &mut tx,
                location,
                barcode_row.product_id,
                customer_id,
                quantity,
                date,
            )
            .await?;
        tx.commit().await?;

        Ok(ServiceResult::success(
            json!({
                "product_id": barcode_row.product_id,
                "packaging_id": null,
                "price": price,
                "unit_price": price,
                "quantity_represented": Decimal::ONE,
                "pricing_type": "PRODUCT",
                "pricing_rule": rule,
                "barcode": barcode,
            }),
            format!("Preço de produto para {barcode}"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn promo(price: Decimal, priority: i32) -> PromotionalPrice {
        PromotionalPrice {
            id: Uuid::new_v4(),
            location_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            name: "Promo".into(),
            promotional_price: price,
            start_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2025, 12, 31).unwrap(),
            min_quantity: None,
            max_quantity: None,
            price_group_id: None,
            priority,
            is_active: true,
        }
    }

    #[test]
    fn promotion_wins_then_step_then_base() {
        // Base FIXED 20, escalonado 18 (min 10), promoção 15
        let (price, rule) = resolve_from_candidates(
            Some(dec!(15)),
            None,
            Some(dec!(18)),
            Some(dec!(20)),
            Decimal::ZERO,
        );
        assert_eq!(price, dec!(15));
        assert_eq!(rule, PricingRule::Promotion);

        // Sem promoção, qty ainda >= 10
        let (price, rule) =
            resolve_from_candidates(None, None, Some(dec!(18)), Some(dec!(20)), Decimal::ZERO);
        assert_eq!(price, dec!(18));
        assert_eq!(rule, PricingRule::StepPrice);

        // qty 5: sem degrau aplicável
        let (price, rule) =
            resolve_from_candidates(None, None, None, Some(dec!(20)), Decimal::ZERO);
        assert_eq!(price, dec!(20));
        assert_eq!(rule, PricingRule::BasePrice);
    }

    #[test]
    fn fallback_never_negative_and_zero_only_without_tiers() {
        let (price, rule) = resolve_from_candidates(None, None, None, None, dec!(-3));
        assert_eq!(price, Decimal::ZERO);
        assert_eq!(rule, PricingRule::Fallback);

        let (price, _) = resolve_from_candidates(None, None, None, None, dec!(6.50));
        assert_eq!(price, dec!(6.50));
    }

    #[test]
    fn lowest_promotional_price_wins_ties_by_priority() {
        let promos = vec![promo(dec!(12), 0), promo(dec!(10), 1), promo(dec!(10), 5)];
        let best = pick_promotion(&promos, dec!(1), None);
        assert_eq!(best, Some(dec!(10)));
    }

    #[test]
    fn promotion_respects_quantity_bounds() {
        let mut p = promo(dec!(9), 0);
        p.min_quantity = Some(dec!(5));
        p.max_quantity = Some(dec!(20));
        let promos = vec![p];

        assert_eq!(pick_promotion(&promos, dec!(4), None), None);
        assert_eq!(pick_promotion(&promos, dec!(5), None), Some(dec!(9)));
        // Limite superior também é respeitado
        assert_eq!(pick_promotion(&promos, dec!(21), None), None);
    }

    #[test]
    fn promotion_group_restriction() {
        let group = Uuid::new_v4();
        let mut p = promo(dec!(8), 0);
        p.price_group_id = Some(group);
        let promos = vec![p];

        assert_eq!(pick_promotion(&promos, dec!(1), None), None);
        assert_eq!(pick_promotion(&promos, dec!(1), Some(Uuid::new_v4())), None);
        assert_eq!(pick_promotion(&promos, dec!(1), Some(group)), Some(dec!(8)));
    }

    #[test]
    fn effective_price_by_method() {
        // FIXED devolve o cadastrado
        assert_eq!(
            compute_effective_price(PricingMethod::Fixed, Some(dec!(20)), None, dec!(5), dec!(30)),
            dec!(20)
        );
        // MARKUP aplica margem própria sobre o custo
        assert_eq!(
            compute_effective_price(
                PricingMethod::Markup,
                None,
                Some(dec!(50)),
                dec!(10),
                dec!(30)
            ),
            dec!(15.00)
        );
        // AUTO usa a margem padrão do local
        assert_eq!(
            compute_effective_price(PricingMethod::Auto, None, None, dec!(10), dec!(30)),
            dec!(13.00)
        );
        // Sem custo, MARKUP/AUTO não produzem preço
        assert_eq!(
            compute_effective_price(PricingMethod::Markup, None, Some(dec!(50)), dec!(0), dec!(30)),
            Decimal::ZERO
        );
    }

    #[test]
    fn markup_and_margin_percentages() {
        assert_eq!(calculate_markup_percentage(dec!(10), dec!(15)), dec!(50.00));
        assert_eq!(calculate_margin_percentage(dec!(10), dec!(15)), dec!(33.33));
        assert_eq!(calculate_markup_percentage(dec!(0), dec!(15)), Decimal::ZERO);
        assert_eq!(calculate_margin_percentage(dec!(10), dec!(0)), Decimal::ZERO);
    }
}
