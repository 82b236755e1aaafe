// src/services/numbering_service.rs

use chrono::{Datelike, Utc};
use serde_json::json;
use sqlx::{Acquire, Executor, Postgres};
use uuid::Uuid;

use crate::{
    common::{error::AppError, result::ServiceResult},
    db::NomenclaturesRepository,
    models::nomenclatures::{DocumentType, NumberingConfiguration, NumberingType},
};

/// Alocação thread-safe de números de documento.
///
/// A configuração é escolhida por preferência (usuário > local > padrão do
/// tipo) e a linha é travada durante o incremento, então dois chamadores
/// nunca recebem o mesmo número.
#[derive(Clone)]
pub struct NumberingService {
    nomenclatures_repo: NomenclaturesRepository,
}

// =========================================================================
//  FORMATAÇÃO (pura)
// =========================================================================

/// Formata o número conforme o tipo:
/// - fiscal: exatamente 10 dígitos, sem prefixo, zeros à esquerda;
/// - interno: `{prefixo}{número com digits_count zeros}`.
fn format_number(
    prefix: &str,
    number: i64,
    digits_count: i32,
    numbering_type: NumberingType,
) -> String {
    let (prefix, digits_count) = match numbering_type {
        NumberingType::Fiscal => {
            if digits_count != 10 {
                tracing::warn!("Documentos fiscais exigem 10 dígitos, config tem {digits_count}");
            }
            if !prefix.is_empty() {
                tracing::warn!("Documentos fiscais não têm prefixo, ignorando '{prefix}'");
            }
            ("", 10)
        }
        NumberingType::Internal => (prefix, digits_count.max(1)),
    };

    format!("{prefix}{number:0width$}", width = digits_count as usize)
}

// Próximo número segundo o contrato: incrementa, zera no ano virado,
// valida o teto. Puro para poder ser testado e reusado no preview.
fn advance_counter(
    config: &NumberingConfiguration,
    current_year: i32,
) -> Result<(i64, Option<i32>), AppError> {
    let mut next = config.current_number + 1;
    let mut last_reset_year = config.last_reset_year;

    if config.reset_yearly && config.last_reset_year != Some(current_year) {
        next = 1;
        last_reset_year = Some(current_year);
    }

    if let Some(max) = config.max_number {
        if next > max {
            return Err(AppError::NumberLimitExceeded(max));
        }
    }

    Ok((next, last_reset_year))
}

impl NumberingService {
    pub fn new(nomenclatures_repo: NomenclaturesRepository) -> Self {
        Self { nomenclatures_repo }
    }

    /// Aloca o próximo número para o tipo, atomicamente: trava a linha da
    /// configuração, incrementa, aplica reset anual e o teto, formata.
    pub async fn next_number<'e, E>(
        &self,
        executor: E,
        document_type: &DocumentType,
        location_id: Option<Uuid>,
        user_id: Option<Uuid>,
    ) -> Result<String, AppError>
    where
        E: Executor<'e, Database = Postgres> + Acquire<'e, Database = Postgres>,
    {
        let mut tx = executor.begin().await?;

        // 1. Escolhe a configuração (user > location > padrão do tipo)
        let config = self
            .nomenclatures_repo
            .find_numbering_config(&mut *tx, document_type.id, location_id, user_id)
            .await?
            .ok_or_else(|| AppError::NumberingConfigNotFound(document_type.type_key.clone()))?;

        // 2. Trava a linha pelo id antes de incrementar
        let locked = self
            .nomenclatures_repo
            .lock_numbering_config(&mut *tx, config.id)
            .await?;

        let (next, last_reset_year) = advance_counter(&locked, Utc::now().year())?;

        self.nomenclatures_repo
            .save_numbering_counter(&mut *tx, locked.id, next, last_reset_year)
            .await?;

        tx.commit().await?;

        Ok(format_number(
            &locked.prefix,
            next,
            locked.digits_count,
            locked.numbering_type,
        ))
    }

    /// Mostra o próximo número sem consumi-lo (preview de interface).
    pub async fn preview_next_number<'e, E>(
        &self,
        executor: E,
        document_type: &DocumentType,
        location_id: Option<Uuid>,
        user_id: Option<Uuid>,
    ) -> Result<String, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let config = self
            .nomenclatures_repo
            .find_numbering_config(executor, document_type.id, location_id, user_id)
            .await?
            .ok_or_else(|| AppError::NumberingConfigNotFound(document_type.type_key.clone()))?;

        let (next, _) = advance_counter(&config, Utc::now().year())?;
        Ok(format_number(
            &config.prefix,
            next,
            config.digits_count,
            config.numbering_type,
        ))
    }

    /// Valida o setup de numeração do tipo antes de operações importantes.
    pub async fn validate_numbering_setup<'e, E>(
        &self,
        executor: E,
        document_type: &DocumentType,
        location_id: Option<Uuid>,
    ) -> Result<ServiceResult, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let config = self
            .nomenclatures_repo
            .find_numbering_config(executor, document_type.id, location_id, None)
            .await?;

        let Some(config) = config else {
            return Ok(ServiceResult::error(
                "NUMBERING_CONFIG_NOT_FOUND",
                format!("Nenhuma configuração de numeração para {}", document_type.type_key),
                json!({ "type_key": document_type.type_key }),
            ));
        };

        let mut issues: Vec<String> = Vec::new();
        let mut warnings: Vec<String> = Vec::new();

        if config.numbering_type == NumberingType::Fiscal {
            if config.digits_count != 10 {
                issues.push(format!(
                    "Documentos fiscais exigem 10 dígitos, config tem {}",
                    config.digits_count
                ));
            }
            if !config.prefix.is_empty() {
                issues.push(format!(
                    "Documentos fiscais não têm prefixo, config tem '{}'",
                    config.prefix
                ));
            }
        }

        if let Some(max) = config.max_number {
            if config.current_number >= max {
                issues.push(format!("Limite de numeração atingido: {}/{max}", config.current_number));
            } else if config.current_number * 10 > max * 9 {
                warnings.push(format!(
                    "Perto do limite de numeração: {}/{max}",
                    config.current_number
                ));
            }
        }

        let valid = issues.is_empty();
        Ok(ServiceResult::success(
            json!({
                "valid": valid,
                "issues": issues,
                "warnings": warnings,
                "config_name": config.name,
                "numbering_type": config.numbering_type,
                "current_number": config.current_number,
                "max_number": config.max_number,
            }),
            if valid { "Configuração de numeração válida" } else { "Configuração com problemas" },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(
        numbering_type: NumberingType,
        prefix: &str,
        digits: i32,
        current: i64,
        max: Option<i64>,
        reset_yearly: bool,
        last_reset_year: Option<i32>,
    ) -> NumberingConfiguration {
        NumberingConfiguration {
            id: Uuid::new_v4(),
            document_type_id: Uuid::new_v4(),
            name: "Série".into(),
            numbering_type,
            prefix: prefix.into(),
            digits_count: digits,
            current_number: current,
            max_number: max,
            reset_yearly,
            last_reset_year,
            location_id: None,
            user_id: None,
            is_active: true,
        }
    }

    #[test]
    fn fiscal_numbers_are_exactly_ten_digits_without_prefix() {
        let n = format_number("REQ", 1, 10, NumberingType::Fiscal);
        assert_eq!(n, "0000000001");
        assert_eq!(n.len(), 10);

        // Mesmo com configuração errada, o formato fiscal é normalizado
        let n = format_number("PO", 23, 6, NumberingType::Fiscal);
        assert_eq!(n, "0000000023");
    }

    #[test]
    fn internal_numbers_carry_prefix_and_padding() {
        assert_eq!(format_number("REQ", 1, 4, NumberingType::Internal), "REQ0001");
        assert_eq!(format_number("PO", 23, 6, NumberingType::Internal), "PO000023");
        assert_eq!(format_number("", 7, 4, NumberingType::Internal), "0007");
    }

    #[test]
    fn counter_increments_and_respects_limit() {
        let cfg = config(NumberingType::Internal, "REQ", 4, 41, Some(9999), false, None);
        let (next, reset) = advance_counter(&cfg, 2025).unwrap();
        assert_eq!(next, 42);
        assert_eq!(reset, None);

        let at_limit = config(NumberingType::Internal, "REQ", 4, 9999, Some(9999), false, None);
        let err = advance_counter(&at_limit, 2025).unwrap_err();
        assert_eq!(err.code(), "NUMBER_LIMIT_EXCEEDED");
    }

    #[test]
    fn yearly_reset_restarts_at_one() {
        let cfg = config(NumberingType::Internal, "REQ", 4, 873, None, true, Some(2024));
        let (next, reset) = advance_counter(&cfg, 2025).unwrap();
        assert_eq!(next, 1);
        assert_eq!(reset, Some(2025));

        // Mesmo ano: segue a sequência
        let cfg = config(NumberingType::Internal, "REQ", 4, 873, None, true, Some(2025));
        let (next, _) = advance_counter(&cfg, 2025).unwrap();
        assert_eq!(next, 874);
    }
}
