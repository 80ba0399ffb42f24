// src/common/error.rs

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use sqlx::error::ErrorKind;
use thiserror::Error;

use crate::common::i18n::I18nStore;
use crate::middleware::i18n::Locale;

// Erro de domínio/infra. Não sabe nada de idioma; a tradução acontece em `to_api_error`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Erro de validação")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Credenciais inválidas")]
    InvalidCredentials,

    #[error("Conta bloqueada até {0}")]
    AccountLocked(DateTime<Utc>),

    #[error("Conta inativa")]
    AccountInactive,

    #[error("Token inválido")]
    InvalidToken,

    #[error("Acesso negado: {0}")]
    Forbidden(String),

    #[error("{0} não encontrado")]
    NotFound(&'static str),

    // A string é a chave do catálogo de mensagens
    #[error("Conflito: {0}")]
    Conflict(&'static str),

    #[error("Regra de negócio violada: {0}")]
    BadRequest(&'static str),

    #[error("Violação de unicidade: {0}")]
    UniqueConstraintViolation(String),

    #[error("Erro de banco de dados")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Erro interno do servidor")]
    InternalServerError(#[from] anyhow::Error),

    #[error("Erro de Bcrypt: {0}")]
    BcryptError(#[from] bcrypt::BcryptError),

    #[error("Erro de JWT: {0}")]
    JwtError(#[from] jsonwebtoken::errors::Error),

    #[error("Fonte não encontrada: {0}")]
    FontNotFound(String),
}

impl AppError {
    /// Converte erros de INSERT/UPDATE com violação de UNIQUE em `UniqueConstraintViolation`.
    pub fn from_write(e: sqlx::Error) -> Self {
        Self::classify(e, None)
    }

    /// DELETE barrado por chave estrangeira: a linha ainda é referenciada (`in_use` é a chave da mensagem).
    pub fn from_delete(e: sqlx::Error, in_use: &'static str) -> Self {
        Self::classify(e, Some(in_use))
    }

    fn classify(e: sqlx::Error, in_use: Option<&'static str>) -> Self {
        if let sqlx::Error::Database(db_err) = &e {
            if let Some(mapped) = constraint_error(db_err.kind(), db_err.constraint(), in_use) {
                return mapped;
            }
        }
        e.into()
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidCredentials
            | AppError::AccountLocked(_)
            | AppError::AccountInactive
            | AppError::InvalidToken => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) | AppError::UniqueConstraintViolation(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Traduz o erro para a resposta HTTP no idioma do cliente.
    pub fn to_api_error(&self, locale: &Locale, i18n: &I18nStore) -> ApiError {
        let lang = locale.0.as_str();
        let status = self.status();

        let (error, details) = match self {
            AppError::ValidationError(errors) => {
                let mut details = serde_json::Map::new();
                for (field, field_errors) in errors.field_errors() {
                    let messages: Vec<Value> = field_errors
                        .iter()
                        .map(|e| {
                            let msg = e
                                .message
                                .as_ref()
                                .map(|m| m.to_string())
                                .unwrap_or_else(|| i18n.translate(lang, &format!("validation.{}", e.code), &[]));
                            Value::String(msg)
                        })
                        .collect();
                    details.insert(field.to_string(), Value::Array(messages));
                }
                (i18n.translate(lang, "error.validation", &[]), Some(Value::Object(details)))
            }
            AppError::InvalidCredentials => (i18n.translate(lang, "auth.invalid_credentials", &[]), None),
            AppError::AccountLocked(until) => (
                i18n.translate(lang, "auth.account_locked", &[("until", until.to_rfc3339())]),
                Some(json!({ "lockedUntil": until })),
            ),
            AppError::AccountInactive => (i18n.translate(lang, "auth.account_inactive", &[]), None),
            AppError::InvalidToken => (i18n.translate(lang, "auth.invalid_token", &[]), None),
            AppError::Forbidden(reason) => (
                i18n.translate(lang, "error.forbidden", &[("reason", reason.clone())]),
                None,
            ),
            AppError::NotFound(entity) => {
                let entity_name = i18n.translate(lang, &format!("entity.{}", entity), &[]);
                (i18n.translate(lang, "error.not_found", &[("entity", entity_name)]), None)
            }
            AppError::Conflict(key) | AppError::BadRequest(key) => (i18n.translate(lang, key, &[]), None),
            AppError::UniqueConstraintViolation(constraint) => (
                i18n.translate(lang, "error.unique", &[]),
                Some(json!({ "constraint": constraint })),
            ),
            e => {
                tracing::error!("Erro Interno do Servidor: {:?}", e);
                (i18n.translate(lang, "error.internal", &[]), None)
            }
        };

        ApiError { status, error, details }
    }
}

fn constraint_error(kind: ErrorKind, constraint: Option<&str>, in_use: Option<&'static str>) -> Option<AppError> {
    match (kind, in_use) {
        (ErrorKind::UniqueViolation, _) => Some(AppError::UniqueConstraintViolation(
            constraint.unwrap_or("unique").to_string(),
        )),
        (ErrorKind::ForeignKeyViolation, Some(key)) => Some(AppError::Conflict(key)),
        _ => None,
    }
}

// Resposta de erro já traduzida
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub error: String,
    pub details: Option<Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match self.details {
            Some(details) => json!({ "error": self.error, "details": details }),
            None => json!({ "error": self.error }),
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator::{ValidationError, ValidationErrors};

    fn en() -> Locale {
        Locale("en".to_string())
    }

    #[test]
    fn maps_taxonomy_to_status_codes() {
        assert_eq!(AppError::InvalidToken.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::AccountLocked(Utc::now()).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::Forbidden("x".into()).status(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::NotFound("product").status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::Conflict("order.already_invoiced").status(), StatusCode::CONFLICT);
        assert_eq!(AppError::BadRequest("category.max_depth").status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AppError::UniqueConstraintViolation("users_email_key".into()).status(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn referenced_rows_become_conflicts_only_on_delete() {
        let on_delete = constraint_error(ErrorKind::ForeignKeyViolation, Some("users_chain_id_fkey"), Some("chain.in_use"));
        assert!(matches!(on_delete, Some(AppError::Conflict("chain.in_use"))));
        assert_eq!(on_delete.map(|e| e.status()), Some(StatusCode::CONFLICT));

        assert!(constraint_error(ErrorKind::ForeignKeyViolation, None, None).is_none());
        assert!(constraint_error(ErrorKind::CheckViolation, None, Some("chain.in_use")).is_none());
        assert!(matches!(
            constraint_error(ErrorKind::UniqueViolation, Some("stores_chain_code_key"), None),
            Some(AppError::UniqueConstraintViolation(c)) if c == "stores_chain_code_key"
        ));

        let api = AppError::Conflict("store.in_use").to_api_error(&en(), &I18nStore::load());
        assert_eq!(api.status, StatusCode::CONFLICT);
        assert_ne!(api.error, "store.in_use");
    }

    #[test]
    fn validation_errors_carry_field_details() {
        let mut errors = ValidationErrors::new();
        let mut err = ValidationError::new("length");
        err.message = Some("too short".into());
        errors.add("name", err);

        let api = AppError::ValidationError(errors).to_api_error(&en(), &I18nStore::load());
        assert_eq!(api.status, StatusCode::BAD_REQUEST);
        let details = api.details.expect("details");
        assert_eq!(details["name"][0], "too short");
    }

    #[test]
    fn not_found_interpolates_entity_name() {
        let api = AppError::NotFound("product").to_api_error(&en(), &I18nStore::load());
        assert_eq!(api.error, "Product not found.");
    }
}
