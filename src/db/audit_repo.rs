// src/db/audit_repo.rs

use serde_json::Value;
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use crate::common::error::AppError;

/// Trilha de auditoria. Sem pool próprio: grava sempre no executor do chamador,
/// dentro da mesma transação da mutação auditada.
#[derive(Clone, Copy, Default)]
pub struct AuditRepository;

impl AuditRepository {
    pub fn new() -> Self {
        Self
    }

    pub async fn record<'e, E>(
        &self,
        executor: E,
        user_id: Option<Uuid>,
        action: &str,
        entity: &str,
        entity_id: Option<Uuid>,
        details: Option<Value>,
    ) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (user_id, action, entity, entity_id, details)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(user_id)
        .bind(action)
        .bind(entity)
        .bind(entity_id)
        .bind(details)
        .execute(executor)
        .await?;
        Ok(())
    }
}
