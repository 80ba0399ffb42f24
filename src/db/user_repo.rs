// src/db/user_repo.rs

use chrono::{DateTime, Utc};
use sqlx::{Executor, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{
    authz::TenantScope,
    common::{
        db_utils::{like_pattern, search_term, PageWindow},
        error::AppError,
    },
    models::{
        auth::{User, UserStatus},
        users::UserListQuery,
    },
};

const USER_COLUMNS: &str = "id, username, email, password_hash, full_name, status, chain_id, store_id, \
     failed_login_attempts, locked_until, last_login_at, created_at, updated_at";

pub struct NewUser<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub full_name: Option<&'a str>,
    pub chain_id: Option<Uuid>,
    pub store_id: Option<Uuid>,
}

// O repositório de usuários, responsável por todas as interações com a tabela 'users'
#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // Busca pelo nome de usuário OU e-mail (login)
    pub async fn find_by_login(&self, username_or_email: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1 OR LOWER(email) = LOWER($1) LIMIT 1"
        ))
        .bind(username_or_email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    pub async fn count_users(&self) -> Result<i64, AppError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn list(
        &self,
        scope: &TenantScope,
        filter: &UserListQuery,
        window: PageWindow,
    ) -> Result<(Vec<User>, i64), AppError> {
        let mut count_qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM users u WHERE TRUE");
        push_user_filters(&mut count_qb, scope, filter);
        let (total,): (i64,) = count_qb.build_query_as().fetch_one(&self.pool).await?;

        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {USER_COLUMNS} FROM users u WHERE TRUE"));
        push_user_filters(&mut qb, scope, filter);
        qb.push(" ORDER BY u.username ASC LIMIT ")
            .push_bind(window.limit)
            .push(" OFFSET ")
            .push_bind(window.offset);

        let users = qb.build_query_as::<User>().fetch_all(&self.pool).await?;
        Ok((users, total))
    }

    pub async fn create_user<'e, E>(&self, executor: E, new_user: NewUser<'_>) -> Result<User, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (username, email, password_hash, full_name, chain_id, store_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(new_user.username)
        .bind(new_user.email)
        .bind(new_user.password_hash)
        .bind(new_user.full_name)
        .bind(new_user.chain_id)
        .bind(new_user.store_id)
        .fetch_one(executor)
        .await
        .map_err(AppError::from_write)
    }

    pub async fn update_profile<'e, E>(
        &self,
        executor: E,
        id: Uuid,
        email: Option<&str>,
        full_name: Option<&str>,
        affiliation: Option<(Option<Uuid>, Option<Uuid>)>,
    ) -> Result<User, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users SET
                email = COALESCE($2, email),
                full_name = COALESCE($3, full_name),
                chain_id = CASE WHEN $4 THEN $5 ELSE chain_id END,
                store_id = CASE WHEN $4 THEN $6 ELSE store_id END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(email)
        .bind(full_name)
        .bind(affiliation.is_some())
        .bind(affiliation.and_then(|(chain_id, _)| chain_id))
        .bind(affiliation.and_then(|(_, store_id)| store_id))
        .fetch_optional(executor)
        .await
        .map_err(AppError::from_write)?
        .ok_or(AppError::NotFound("user"))
    }

    pub async fn set_status<'e, E>(&self, executor: E, id: Uuid, status: UserStatus) -> Result<User, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET status = $2, updated_at = NOW() WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(status)
        .fetch_optional(executor)
        .await?
        .ok_or(AppError::NotFound("user"))
    }

    /// Trava a linha do usuário e devolve (tentativas, bloqueado_até) atuais.
    pub async fn lock_login_state<'e, E>(&self, executor: E, id: Uuid) -> Result<(i32, Option<DateTime<Utc>>), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, (i32, Option<DateTime<Utc>>)>(
            "SELECT failed_login_attempts, locked_until FROM users WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(executor)
        .await?
        .ok_or(AppError::NotFound("user"))
    }

    /// Grava o estado de bloqueio após uma tentativa de login.
    pub async fn record_login_failure<'e, E>(
        &self,
        executor: E,
        id: Uuid,
        failed_attempts: i32,
        locked_until: Option<DateTime<Utc>>,
    ) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query("UPDATE users SET failed_login_attempts = $2, locked_until = $3, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(failed_attempts)
            .bind(locked_until)
            .execute(executor)
            .await?;
        Ok(())
    }

    pub async fn record_login_success<'e, E>(&self, executor: E, id: Uuid, at: DateTime<Utc>) -> Result<User, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users SET failed_login_attempts = 0, locked_until = NULL, last_login_at = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(at)
        .fetch_one(executor)
        .await
        .map_err(Into::into)
    }

    // Desbloqueio administrativo
    pub async fn clear_lock<'e, E>(&self, executor: E, id: Uuid) -> Result<User, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET failed_login_attempts = 0, locked_until = NULL, updated_at = NOW() WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(executor)
        .await?
        .ok_or(AppError::NotFound("user"))
    }

    pub async fn update_password<'e, E>(&self, executor: E, id: Uuid, password_hash: &str) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let result = sqlx::query("UPDATE users SET password_hash = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .execute(executor)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("user"));
        }
        Ok(())
    }

    /// Usuário com pedidos, faturas ou auditoria não pode sumir fisicamente.
    pub async fn has_history<'e, E>(&self, executor: E, id: Uuid) -> Result<bool, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let (exists,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (SELECT 1 FROM orders WHERE created_by = $1)
                OR EXISTS (SELECT 1 FROM invoices WHERE created_by = $1)
                OR EXISTS (SELECT 1 FROM audit_logs WHERE user_id = $1)
            "#,
        )
        .bind(id)
        .fetch_one(executor)
        .await?;
        Ok(exists)
    }

    pub async fn delete_user<'e, E>(&self, executor: E, id: Uuid) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await?;
        Ok(())
    }
}

fn push_user_filters(qb: &mut QueryBuilder<'_, Postgres>, scope: &TenantScope, filter: &UserListQuery) {
    scope.push_filter(qb, "u.", false);

    if let Some(term) = search_term(&filter.search) {
        let pattern = like_pattern(term);
        qb.push(" AND (unaccent(u.username) ILIKE unaccent(")
            .push_bind(pattern.clone())
            .push(") OR unaccent(u.email) ILIKE unaccent(")
            .push_bind(pattern.clone())
            .push(") OR unaccent(COALESCE(u.full_name, '')) ILIKE unaccent(")
            .push_bind(pattern)
            .push("))");
    }
    if let Some(status) = filter.status {
        qb.push(" AND u.status = ").push_bind(status);
    }
    if let Some(chain_id) = filter.chain_id {
        qb.push(" AND u.chain_id = ").push_bind(chain_id);
    }
    if let Some(store_id) = filter.store_id {
        qb.push(" AND u.store_id = ").push_bind(store_id);
    }
}
