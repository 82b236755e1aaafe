// src/common/result.rs

use serde::Serialize;
use serde_json::Value;

/// Resultado etiquetado do contrato de serviço: {ok, code, msg, data}.
///
/// Toda operação pública do motor devolve este formato. O `code` é estável
/// entre versões; `msg` é apenas informativa e `data` carrega o contexto
/// estruturado (quantidades, códigos de produto, propostas de alocação).
#[derive(Debug, Clone, Serialize)]
pub struct ServiceResult {
    pub ok: bool,
    pub code: String,
    pub msg: String,
    pub data: Value,
}

impl ServiceResult {
    pub fn success(data: Value, msg: impl Into<String>) -> Self {
        Self {
            ok: true,
            code: "OK".to_string(),
            msg: msg.into(),
            data,
        }
    }

    pub fn error(code: impl Into<String>, msg: impl Into<String>, data: Value) -> Self {
        Self {
            ok: false,
            code: code.into(),
            msg: msg.into(),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_carries_ok_code() {
        let r = ServiceResult::success(json!({"qty": 10}), "tudo certo");
        assert!(r.ok);
        assert_eq!(r.code, "OK");
        assert_eq!(r.data["qty"], 10);
    }

    #[test]
    fn error_keeps_machine_code() {
        let r = ServiceResult::error("INSUFFICIENT_STOCK", "sem saldo", json!({}));
        assert!(!r.ok);
        assert_eq!(r.code, "INSUFFICIENT_STOCK");
    }
}
