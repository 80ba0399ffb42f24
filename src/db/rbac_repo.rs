// src/db/rbac_repo.rs

use chrono::{DateTime, Utc};
use sqlx::{Executor, PgPool, Postgres};
use uuid::Uuid;

use crate::common::error::AppError;
use crate::models::rbac::{GrantRow, Permission, Role, UserRoleDetail};

const ROLE_COLUMNS: &str = "id, code, name, description, level, is_system, created_at, updated_at";

const USER_ROLE_SELECT: &str = r#"
    SELECT ur.id, ur.user_id, ur.role_id, r.code AS role_code, r.name AS role_name, r.level,
           ur.chain_id, ur.store_id, ur.is_active, ur.expires_at, ur.created_at
    FROM user_roles ur
    JOIN roles r ON r.id = ur.role_id
"#;

#[derive(Clone)]
pub struct RbacRepository {
    pool: PgPool,
}

impl RbacRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ---
    // Resolução de permissões (usada pelo guardião em toda requisição)
    // ---

    /// Atribuições ativas e não expiradas, achatadas com as permissões de cada cargo.
    pub async fn find_active_grants(&self, user_id: Uuid) -> Result<Vec<GrantRow>, AppError> {
        let rows = sqlx::query_as::<_, GrantRow>(
            r#"
            SELECT ur.id AS assignment_id, r.code AS role_code, r.level,
                   ur.chain_id, ur.store_id, p.code AS permission_code
            FROM user_roles ur
            JOIN roles r ON r.id = ur.role_id
            LEFT JOIN role_permissions rp ON rp.role_id = r.id
            LEFT JOIN permissions p ON p.id = rp.permission_id
            WHERE ur.user_id = $1
              AND ur.is_active = TRUE
              AND (ur.expires_at IS NULL OR ur.expires_at > NOW())
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // ---
    // Cargos
    // ---

    pub async fn list_roles(&self) -> Result<Vec<Role>, AppError> {
        let roles = sqlx::query_as::<_, Role>(&format!("SELECT {ROLE_COLUMNS} FROM roles ORDER BY level, code"))
            .fetch_all(&self.pool)
            .await?;
        Ok(roles)
    }

    pub async fn find_role<'e, E>(&self, executor: E, id: Uuid) -> Result<Option<Role>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let role = sqlx::query_as::<_, Role>(&format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = $1"))
            .bind(id)
            .fetch_optional(executor)
            .await?;
        Ok(role)
    }

    pub async fn find_role_by_code(&self, code: &str) -> Result<Option<Role>, AppError> {
        let role = sqlx::query_as::<_, Role>(&format!("SELECT {ROLE_COLUMNS} FROM roles WHERE code = $1"))
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(role)
    }

    pub async fn create_role<'e, E>(
        &self,
        executor: E,
        code: &str,
        name: &str,
        description: Option<&str>,
        level: i32,
    ) -> Result<Role, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, Role>(&format!(
            r#"
            INSERT INTO roles (code, name, description, level, is_system)
            VALUES ($1, $2, $3, $4, FALSE)
            RETURNING {ROLE_COLUMNS}
            "#
        ))
        .bind(code)
        .bind(name)
        .bind(description)
        .bind(level)
        .fetch_one(executor)
        .await
        .map_err(AppError::from_write)
    }

    pub async fn update_role<'e, E>(
        &self,
        executor: E,
        id: Uuid,
        name: Option<&str>,
        description: Option<&str>,
        level: Option<i32>,
    ) -> Result<Role, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, Role>(&format!(
            r#"
            UPDATE roles SET
                name = COALESCE($2, name),
                description = COALESCE($3, description),
                level = COALESCE($4, level),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {ROLE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(name)
        .bind(description)
        .bind(level)
        .fetch_optional(executor)
        .await?
        .ok_or(AppError::NotFound("role"))
    }

    pub async fn role_in_use<'e, E>(&self, executor: E, role_id: Uuid) -> Result<bool, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let (exists,): (bool,) =
            sqlx::query_as("SELECT EXISTS (SELECT 1 FROM user_roles WHERE role_id = $1 AND is_active = TRUE)")
                .bind(role_id)
                .fetch_one(executor)
                .await?;
        Ok(exists)
    }

    pub async fn delete_role<'e, E>(&self, executor: E, role_id: Uuid) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        // Atribuições inativas ficam no histórico até aqui; o cargo sumindo, elas vão junto
        sqlx::query("WITH removed AS (DELETE FROM user_roles WHERE role_id = $1) DELETE FROM roles WHERE id = $1")
            .bind(role_id)
            .execute(executor)
            .await?;
        Ok(())
    }

    // ---
    // Permissões
    // ---

    // Buscar as permissões baseado nos códigos ("view_products" -> linha)
    pub async fn find_permissions_by_codes<'e, E>(&self, executor: E, codes: &[String]) -> Result<Vec<Permission>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        // O SQLx lida bem com arrays usando ANY
        let permissions = sqlx::query_as::<_, Permission>(
            "SELECT id, code, name, module FROM permissions WHERE code = ANY($1) ORDER BY code",
        )
        .bind(codes)
        .fetch_all(executor)
        .await?;
        Ok(permissions)
    }

    pub async fn permission_codes_for_role<'e, E>(&self, executor: E, role_id: Uuid) -> Result<Vec<String>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let codes: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT p.code FROM role_permissions rp
            JOIN permissions p ON p.id = rp.permission_id
            WHERE rp.role_id = $1
            ORDER BY p.code
            "#,
        )
        .bind(role_id)
        .fetch_all(executor)
        .await?;
        Ok(codes.into_iter().map(|(c,)| c).collect())
    }

    pub async fn clear_permissions<'e, E>(&self, executor: E, role_id: Uuid) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query("DELETE FROM role_permissions WHERE role_id = $1")
            .bind(role_id)
            .execute(executor)
            .await?;
        Ok(())
    }

    // Vincular Cargo <-> Permissão
    pub async fn assign_permissions<'e, E>(&self, executor: E, role_id: Uuid, permission_ids: &[Uuid]) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        // Inserção em massa usando UNNEST; o par (role, permissão) é único
        sqlx::query(
            r#"
            INSERT INTO role_permissions (role_id, permission_id)
            SELECT $1, unnest($2::uuid[])
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(role_id)
        .bind(permission_ids)
        .execute(executor)
        .await?;
        Ok(())
    }

    // Listar todas as permissões disponíveis (para o Frontend montar a tela)
    pub async fn list_all_permissions(&self) -> Result<Vec<Permission>, AppError> {
        let permissions = sqlx::query_as::<_, Permission>(
            "SELECT id, code, name, module FROM permissions ORDER BY module, code",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(permissions)
    }

    // ---
    // Atribuições (user_roles)
    // ---

    pub async fn list_user_roles(&self, user_id: Uuid, only_active: bool) -> Result<Vec<UserRoleDetail>, AppError> {
        let sql = format!(
            "{USER_ROLE_SELECT} WHERE ur.user_id = $1 AND ($2 = FALSE OR ur.is_active = TRUE) ORDER BY r.level, ur.created_at"
        );
        let roles = sqlx::query_as::<_, UserRoleDetail>(&sql)
            .bind(user_id)
            .bind(only_active)
            .fetch_all(&self.pool)
            .await?;
        Ok(roles)
    }

    pub async fn find_user_role(&self, user_id: Uuid, assignment_id: Uuid) -> Result<Option<UserRoleDetail>, AppError> {
        let sql = format!("{USER_ROLE_SELECT} WHERE ur.user_id = $1 AND ur.id = $2");
        let role = sqlx::query_as::<_, UserRoleDetail>(&sql)
            .bind(user_id)
            .bind(assignment_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(role)
    }

    pub async fn assign_role<'e, E>(
        &self,
        executor: E,
        user_id: Uuid,
        role_id: Uuid,
        chain_id: Option<Uuid>,
        store_id: Option<Uuid>,
        expires_at: Option<DateTime<Utc>>,
        assigned_by: Uuid,
    ) -> Result<Uuid, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let (id,): (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO user_roles (user_id, role_id, chain_id, store_id, expires_at, assigned_by)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(role_id)
        .bind(chain_id)
        .bind(store_id)
        .bind(expires_at)
        .bind(assigned_by)
        .fetch_one(executor)
        .await?;
        Ok(id)
    }

    /// Desativa a atribuição. A linha fica para o histórico de auditoria.
    pub async fn deactivate_user_role<'e, E>(&self, executor: E, user_id: Uuid, assignment_id: Uuid) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let result = sqlx::query("UPDATE user_roles SET is_active = FALSE WHERE user_id = $1 AND id = $2")
            .bind(user_id)
            .bind(assignment_id)
            .execute(executor)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("role_assignment"));
        }
        Ok(())
    }

    pub async fn deactivate_all_for_user<'e, E>(&self, executor: E, user_id: Uuid) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query("UPDATE user_roles SET is_active = FALSE WHERE user_id = $1")
            .bind(user_id)
            .execute(executor)
            .await?;
        Ok(())
    }
}
