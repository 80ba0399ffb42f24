// src/db/tenancy_repo.rs

use sqlx::{Executor, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{
    authz::TenantScope,
    common::{
        db_utils::{like_pattern, search_term, PageWindow},
        error::AppError,
    },
    models::tenancy::{Chain, Store, TenancyListQuery},
};

const CHAIN_COLUMNS: &str = "id, code, name, description, is_active, created_at, updated_at";
const STORE_COLUMNS: &str = "id, chain_id, code, name, address, phone, is_active, created_at, updated_at";

#[derive(Clone)]
pub struct TenantRepository {
    pool: PgPool,
}

impl TenantRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // =========================================================================
    //  REDES
    // =========================================================================

    pub async fn list_chains(
        &self,
        scope: &TenantScope,
        filter: &TenancyListQuery,
        window: PageWindow,
    ) -> Result<(Vec<Chain>, i64), AppError> {
        let mut count_qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM chains c WHERE TRUE");
        push_chain_filters(&mut count_qb, scope, filter);
        let (total,): (i64,) = count_qb.build_query_as().fetch_one(&self.pool).await?;

        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {CHAIN_COLUMNS} FROM chains c WHERE TRUE"));
        push_chain_filters(&mut qb, scope, filter);
        qb.push(" ORDER BY c.name ASC LIMIT ")
            .push_bind(window.limit)
            .push(" OFFSET ")
            .push_bind(window.offset);

        let chains = qb.build_query_as::<Chain>().fetch_all(&self.pool).await?;
        Ok((chains, total))
    }

    pub async fn find_chain(&self, id: Uuid) -> Result<Option<Chain>, AppError> {
        let chain = sqlx::query_as::<_, Chain>(&format!("SELECT {CHAIN_COLUMNS} FROM chains WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(chain)
    }

    pub async fn create_chain<'e, E>(
        &self,
        executor: E,
        code: &str,
        name: &str,
        description: Option<&str>,
    ) -> Result<Chain, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, Chain>(&format!(
            "INSERT INTO chains (code, name, description) VALUES ($1, $2, $3) RETURNING {CHAIN_COLUMNS}"
        ))
        .bind(code)
        .bind(name)
        .bind(description)
        .fetch_one(executor)
        .await
        .map_err(AppError::from_write)
    }

    pub async fn update_chain<'e, E>(
        &self,
        executor: E,
        id: Uuid,
        name: Option<&str>,
        description: Option<&str>,
        is_active: Option<bool>,
    ) -> Result<Chain, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, Chain>(&format!(
            r#"
            UPDATE chains SET
                name = COALESCE($2, name),
                description = COALESCE($3, description),
                is_active = COALESCE($4, is_active),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {CHAIN_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(name)
        .bind(description)
        .bind(is_active)
        .fetch_optional(executor)
        .await?
        .ok_or(AppError::NotFound("chain"))
    }

    pub async fn chain_has_stores<'e, E>(&self, executor: E, id: Uuid) -> Result<bool, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let (exists,): (bool,) = sqlx::query_as("SELECT EXISTS (SELECT 1 FROM stores WHERE chain_id = $1)")
            .bind(id)
            .fetch_one(executor)
            .await?;
        Ok(exists)
    }

    pub async fn delete_chain<'e, E>(&self, executor: E, id: Uuid) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let result = sqlx::query("DELETE FROM chains WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await
            .map_err(|e| AppError::from_delete(e, "chain.in_use"))?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("chain"));
        }
        Ok(())
    }

    // =========================================================================
    //  LOJAS
    // =========================================================================

    pub async fn list_stores(
        &self,
        scope: &TenantScope,
        filter: &TenancyListQuery,
        window: PageWindow,
    ) -> Result<(Vec<Store>, i64), AppError> {
        let mut count_qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM stores s WHERE TRUE");
        push_store_filters(&mut count_qb, scope, filter);
        let (total,): (i64,) = count_qb.build_query_as().fetch_one(&self.pool).await?;

        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {STORE_COLUMNS} FROM stores s WHERE TRUE"));
        push_store_filters(&mut qb, scope, filter);
        qb.push(" ORDER BY s.name ASC LIMIT ")
            .push_bind(window.limit)
            .push(" OFFSET ")
            .push_bind(window.offset);

        let stores = qb.build_query_as::<Store>().fetch_all(&self.pool).await?;
        Ok((stores, total))
    }

    pub async fn find_store(&self, id: Uuid) -> Result<Option<Store>, AppError> {
        let store = sqlx::query_as::<_, Store>(&format!("SELECT {STORE_COLUMNS} FROM stores WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(store)
    }

    pub async fn create_store<'e, E>(
        &self,
        executor: E,
        chain_id: Uuid,
        code: &str,
        name: &str,
        address: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Store, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, Store>(&format!(
            r#"
            INSERT INTO stores (chain_id, code, name, address, phone)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {STORE_COLUMNS}
            "#
        ))
        .bind(chain_id)
        .bind(code)
        .bind(name)
        .bind(address)
        .bind(phone)
        .fetch_one(executor)
        .await
        .map_err(AppError::from_write)
    }

    pub async fn update_store<'e, E>(
        &self,
        executor: E,
        id: Uuid,
        name: Option<&str>,
        address: Option<&str>,
        phone: Option<&str>,
        is_active: Option<bool>,
    ) -> Result<Store, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, Store>(&format!(
            r#"
            UPDATE stores SET
                name = COALESCE($2, name),
                address = COALESCE($3, address),
                phone = COALESCE($4, phone),
                is_active = COALESCE($5, is_active),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {STORE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(name)
        .bind(address)
        .bind(phone)
        .bind(is_active)
        .fetch_optional(executor)
        .await?
        .ok_or(AppError::NotFound("store"))
    }

    pub async fn store_has_orders<'e, E>(&self, executor: E, id: Uuid) -> Result<bool, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let (exists,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (SELECT 1 FROM orders WHERE store_id = $1)
                OR EXISTS (SELECT 1 FROM invoices WHERE store_id = $1)
            "#,
        )
        .bind(id)
        .fetch_one(executor)
        .await?;
        Ok(exists)
    }

    pub async fn delete_store<'e, E>(&self, executor: E, id: Uuid) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let result = sqlx::query("DELETE FROM stores WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await
            .map_err(|e| AppError::from_delete(e, "store.in_use"))?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("store"));
        }
        Ok(())
    }
}

// A tabela de redes não tem chain_id: o escopo vira um filtro sobre o próprio id
fn push_chain_filters(qb: &mut QueryBuilder<'_, Postgres>, scope: &TenantScope, filter: &TenancyListQuery) {
    match scope {
        TenantScope::Unrestricted => {}
        TenantScope::Reach(reach) => {
            qb.push(" AND (c.id = ANY(")
                .push_bind(reach.chains.clone())
                .push(") OR c.id = ANY(")
                .push_bind(reach.visible_chains.clone())
                .push("))");
        }
        TenantScope::Nothing => {
            qb.push(" AND FALSE");
        }
    }

    if let Some(term) = search_term(&filter.search) {
        let pattern = like_pattern(term);
        qb.push(" AND (unaccent(c.name) ILIKE unaccent(")
            .push_bind(pattern.clone())
            .push(") OR unaccent(c.code) ILIKE unaccent(")
            .push_bind(pattern)
            .push("))");
    }
    if let Some(is_active) = filter.is_active {
        qb.push(" AND c.is_active = ").push_bind(is_active);
    }
}

fn push_store_filters(qb: &mut QueryBuilder<'_, Postgres>, scope: &TenantScope, filter: &TenancyListQuery) {
    match scope {
        TenantScope::Unrestricted => {}
        TenantScope::Reach(reach) => {
            qb.push(" AND (s.chain_id = ANY(")
                .push_bind(reach.chains.clone())
                .push(") OR s.id = ANY(")
                .push_bind(reach.stores.clone())
                .push("))");
        }
        TenantScope::Nothing => {
            qb.push(" AND FALSE");
        }
    }

    if let Some(term) = search_term(&filter.search) {
        let pattern = like_pattern(term);
        qb.push(" AND (unaccent(s.name) ILIKE unaccent(")
            .push_bind(pattern.clone())
            .push(") OR unaccent(s.code) ILIKE unaccent(")
            .push_bind(pattern)
            .push("))");
    }
    if let Some(is_active) = filter.is_active {
        qb.push(" AND s.is_active = ").push_bind(is_active);
    }
    if let Some(chain_id) = filter.chain_id {
        qb.push(" AND s.chain_id = ").push_bind(chain_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::identity::fixtures::{grant, identity};

    #[test]
    fn store_scope_sees_only_its_own_chain_and_store() {
        let chain = Uuid::new_v4();
        let scope = TenantScope::for_identity(&identity(Some(chain), Some(Uuid::new_v4()), vec![]));

        let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM chains c WHERE TRUE");
        push_chain_filters(&mut qb, &scope, &TenancyListQuery::default());
        assert!(qb.sql().ends_with(" AND (c.id = ANY($1) OR c.id = ANY($2))"));

        let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM stores s WHERE TRUE");
        push_store_filters(&mut qb, &scope, &TenancyListQuery::default());
        assert!(qb.sql().ends_with(" AND (s.chain_id = ANY($1) OR s.id = ANY($2))"));
    }

    #[test]
    fn chain_grant_lists_that_chain_without_affiliation() {
        let scope = TenantScope::for_identity(&identity(None, None, vec![grant("viewer", 5, Some(Uuid::new_v4()), None)]));
        let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM chains c WHERE TRUE");
        push_chain_filters(&mut qb, &scope, &TenancyListQuery::default());
        assert!(!qb.sql().ends_with(" AND FALSE"));
    }

    #[test]
    fn unaffiliated_scope_lists_nothing() {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM chains c WHERE TRUE");
        push_chain_filters(&mut qb, &TenantScope::Nothing, &TenancyListQuery::default());
        assert!(qb.sql().ends_with(" AND FALSE"));
    }
}
