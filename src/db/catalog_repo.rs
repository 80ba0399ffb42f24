// src/db/catalog_repo.rs

use rust_decimal::Decimal;
use sqlx::{Executor, FromRow, PgConnection, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{
    authz::TenantScope,
    common::{
        db_utils::{like_pattern, search_term, PageWindow},
        error::AppError,
    },
    models::catalog::{
        CatalogListQuery, Category, CategoryWithCount, Modifier, Product, ProductListQuery,
    },
};

const CATEGORY_COLUMNS: &str =
    "c.id, c.chain_id, c.store_id, c.parent_id, c.name, c.description, c.sort_order, c.is_active, c.created_at, c.updated_at";
const PRODUCT_COLUMNS: &str = "p.id, p.chain_id, p.store_id, p.category_id, p.sku, p.name, p.description, p.price, \
     p.image_url, p.is_available, p.track_stock, p.stock_quantity, p.created_at, p.updated_at";
const MODIFIER_COLUMNS: &str = "m.id, m.chain_id, m.store_id, m.name, m.price, m.is_active, m.created_at, m.updated_at";

/// Campos gravados na criação/edição de um produto.
pub struct ProductWrite<'a> {
    pub chain_id: Option<Uuid>,
    pub store_id: Option<Uuid>,
    pub category_id: Option<Uuid>,
    pub sku: Option<&'a str>,
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub price: Decimal,
    pub image_url: Option<&'a str>,
    pub is_available: bool,
    pub track_stock: bool,
    pub stock_quantity: i32,
}

// Modificador junto do produto ao qual está vinculado (precificação de pedidos)
#[derive(Debug, Clone, FromRow)]
pub struct AttachedModifier {
    pub product_id: Uuid,
    #[sqlx(flatten)]
    pub modifier: Modifier,
}

#[derive(Clone)]
pub struct CatalogRepository {
    pool: PgPool,
}

impl CatalogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // =========================================================================
    //  CATEGORIAS
    // =========================================================================

    pub async fn list_categories(
        &self,
        scope: &TenantScope,
        filter: &CatalogListQuery,
        window: PageWindow,
    ) -> Result<(Vec<CategoryWithCount>, i64), AppError> {
        let mut count_qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM categories c WHERE TRUE");
        push_category_filters(&mut count_qb, scope, filter);
        let (total,): (i64,) = count_qb.build_query_as().fetch_one(&self.pool).await?;

        let mut qb = QueryBuilder::<Postgres>::new(format!(
            r#"
            SELECT {CATEGORY_COLUMNS},
                (SELECT COUNT(*) FROM products p WHERE p.category_id = c.id) AS product_count,
                (SELECT COUNT(*) FROM categories k WHERE k.parent_id = c.id) AS children_count
            FROM categories c
            WHERE TRUE
            "#
        ));
        push_category_filters(&mut qb, scope, filter);
        qb.push(" ORDER BY c.sort_order ASC, c.name ASC LIMIT ")
            .push_bind(window.limit)
            .push(" OFFSET ")
            .push_bind(window.offset);

        let categories = qb.build_query_as::<CategoryWithCount>().fetch_all(&self.pool).await?;
        Ok((categories, total))
    }

    /// Todas as categorias visíveis, para montar a árvore.
    pub async fn all_categories(&self, scope: &TenantScope) -> Result<Vec<Category>, AppError> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {CATEGORY_COLUMNS} FROM categories c WHERE TRUE"));
        scope.push_filter(&mut qb, "c.", true);
        qb.push(" ORDER BY c.sort_order ASC, c.name ASC");
        let categories = qb.build_query_as::<Category>().fetch_all(&self.pool).await?;
        Ok(categories)
    }

    pub async fn find_category(&self, id: Uuid) -> Result<Option<Category>, AppError> {
        let category =
            sqlx::query_as::<_, Category>(&format!("SELECT {CATEGORY_COLUMNS} FROM categories c WHERE c.id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(category)
    }

    /// Serializa mudanças de estrutura da árvore até o fim da transação.
    pub async fn lock_category_tree(&self, conn: &mut PgConnection) -> Result<(), AppError> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext('categories:tree'))")
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Arestas (id, pai) dos ancestrais de `parent` e da subárvore de `root`:
    /// o suficiente para as checagens de profundidade e ciclo.
    pub async fn category_links(
        &self,
        conn: &mut PgConnection,
        parent: Option<Uuid>,
        root: Option<Uuid>,
    ) -> Result<Vec<(Uuid, Option<Uuid>)>, AppError> {
        let links = sqlx::query_as::<_, (Uuid, Option<Uuid>)>(
            r#"
            WITH RECURSIVE up AS (
                SELECT id, parent_id FROM categories WHERE id = $1
                UNION
                SELECT c.id, c.parent_id FROM categories c JOIN up ON c.id = up.parent_id
            ),
            down AS (
                SELECT id, parent_id FROM categories WHERE id = $2
                UNION
                SELECT c.id, c.parent_id FROM categories c JOIN down ON c.parent_id = down.id
            )
            SELECT id, parent_id FROM up
            UNION
            SELECT id, parent_id FROM down
            "#,
        )
        .bind(parent)
        .bind(root)
        .fetch_all(conn)
        .await?;
        Ok(links)
    }

    pub async fn create_category<'e, E>(
        &self,
        executor: E,
        chain_id: Option<Uuid>,
        store_id: Option<Uuid>,
        parent_id: Option<Uuid>,
        name: &str,
        description: Option<&str>,
        sort_order: i32,
    ) -> Result<Category, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, Category>(&format!(
            r#"
            INSERT INTO categories AS c (chain_id, store_id, parent_id, name, description, sort_order)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {CATEGORY_COLUMNS}
            "#
        ))
        .bind(chain_id)
        .bind(store_id)
        .bind(parent_id)
        .bind(name)
        .bind(description)
        .bind(sort_order)
        .fetch_one(executor)
        .await
        .map_err(AppError::from_write)
    }

    pub async fn update_category<'e, E>(
        &self,
        executor: E,
        id: Uuid,
        parent_id: Option<Option<Uuid>>,
        name: Option<&str>,
        description: Option<&str>,
        sort_order: Option<i32>,
        is_active: Option<bool>,
    ) -> Result<Category, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        // $2 diz se o pai muda (inclusive para NULL); $3 é o novo pai
        sqlx::query_as::<_, Category>(&format!(
            r#"
            UPDATE categories AS c SET
                parent_id = CASE WHEN $2 THEN $3 ELSE c.parent_id END,
                name = COALESCE($4, c.name),
                description = COALESCE($5, c.description),
                sort_order = COALESCE($6, c.sort_order),
                is_active = COALESCE($7, c.is_active),
                updated_at = NOW()
            WHERE c.id = $1
            RETURNING {CATEGORY_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(parent_id.is_some())
        .bind(parent_id.flatten())
        .bind(name)
        .bind(description)
        .bind(sort_order)
        .bind(is_active)
        .fetch_optional(executor)
        .await
        .map_err(AppError::from_write)?
        .ok_or(AppError::NotFound("category"))
    }

    /// (produtos, subcategorias) que impedem a remoção.
    pub async fn category_usage(&self, id: Uuid) -> Result<(i64, i64), AppError> {
        let usage: (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM products WHERE category_id = $1),
                (SELECT COUNT(*) FROM categories WHERE parent_id = $1)
            "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(usage)
    }

    pub async fn delete_category(&self, id: Uuid) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM categories WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("category"));
        }
        Ok(())
    }

    // =========================================================================
    //  PRODUTOS
    // =========================================================================

    pub async fn list_products(
        &self,
        scope: &TenantScope,
        filter: &ProductListQuery,
        window: PageWindow,
    ) -> Result<(Vec<Product>, i64), AppError> {
        let mut count_qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM products p WHERE TRUE");
        push_product_filters(&mut count_qb, scope, filter);
        let (total,): (i64,) = count_qb.build_query_as().fetch_one(&self.pool).await?;

        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {PRODUCT_COLUMNS} FROM products p WHERE TRUE"));
        push_product_filters(&mut qb, scope, filter);
        qb.push(" ORDER BY p.name ASC LIMIT ")
            .push_bind(window.limit)
            .push(" OFFSET ")
            .push_bind(window.offset);

        let products = qb.build_query_as::<Product>().fetch_all(&self.pool).await?;
        Ok((products, total))
    }

    pub async fn find_product(&self, id: Uuid) -> Result<Option<Product>, AppError> {
        let product = sqlx::query_as::<_, Product>(&format!("SELECT {PRODUCT_COLUMNS} FROM products p WHERE p.id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(product)
    }

    pub async fn find_products_by_ids<'e, E>(&self, executor: E, ids: &[Uuid]) -> Result<Vec<Product>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let products =
            sqlx::query_as::<_, Product>(&format!("SELECT {PRODUCT_COLUMNS} FROM products p WHERE p.id = ANY($1)"))
                .bind(ids)
                .fetch_all(executor)
                .await?;
        Ok(products)
    }

    pub async fn create_product<'e, E>(&self, executor: E, data: ProductWrite<'_>) -> Result<Product, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, Product>(&format!(
            r#"
            INSERT INTO products AS p (
                chain_id, store_id, category_id, sku, name, description, price,
                image_url, is_available, track_stock, stock_quantity
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {PRODUCT_COLUMNS}
            "#
        ))
        .bind(data.chain_id)
        .bind(data.store_id)
        .bind(data.category_id)
        .bind(data.sku)
        .bind(data.name)
        .bind(data.description)
        .bind(data.price)
        .bind(data.image_url)
        .bind(data.is_available)
        .bind(data.track_stock)
        .bind(data.stock_quantity)
        .fetch_one(executor)
        .await
        .map_err(AppError::from_write)
    }

    /// Regrava o produto inteiro; o serviço já mesclou o payload com a linha atual.
    pub async fn update_product<'e, E>(&self, executor: E, id: Uuid, data: ProductWrite<'_>) -> Result<Product, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, Product>(&format!(
            r#"
            UPDATE products AS p SET
                category_id = $2, sku = $3, name = $4, description = $5, price = $6,
                image_url = $7, is_available = $8, track_stock = $9, stock_quantity = $10,
                updated_at = NOW()
            WHERE p.id = $1
            RETURNING {PRODUCT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(data.category_id)
        .bind(data.sku)
        .bind(data.name)
        .bind(data.description)
        .bind(data.price)
        .bind(data.image_url)
        .bind(data.is_available)
        .bind(data.track_stock)
        .bind(data.stock_quantity)
        .fetch_optional(executor)
        .await
        .map_err(AppError::from_write)?
        .ok_or(AppError::NotFound("product"))
    }

    pub async fn set_availability(&self, id: Uuid, is_available: bool) -> Result<Product, AppError> {
        sqlx::query_as::<_, Product>(&format!(
            "UPDATE products AS p SET is_available = $2, updated_at = NOW() WHERE p.id = $1 RETURNING {PRODUCT_COLUMNS}"
        ))
        .bind(id)
        .bind(is_available)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AppError::NotFound("product"))
    }

    pub async fn delete_product(&self, id: Uuid) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("product"));
        }
        Ok(())
    }

    /// Baixa de estoque. Só afeta produtos com controle de estoque e saldo suficiente.
    pub async fn deduct_stock<'e, E>(&self, executor: E, product_id: Uuid, quantity: i32) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let result = sqlx::query(
            r#"
            UPDATE products
            SET stock_quantity = stock_quantity - $2, updated_at = NOW()
            WHERE id = $1 AND track_stock = TRUE AND stock_quantity >= $2
            "#,
        )
        .bind(product_id)
        .bind(quantity)
        .execute(executor)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::BadRequest("product.insufficient_stock"));
        }
        Ok(())
    }

    // =========================================================================
    //  MODIFICADORES
    // =========================================================================

    pub async fn list_modifiers(
        &self,
        scope: &TenantScope,
        filter: &CatalogListQuery,
        window: PageWindow,
    ) -> Result<(Vec<Modifier>, i64), AppError> {
        let mut count_qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM modifiers m WHERE TRUE");
        push_modifier_filters(&mut count_qb, scope, filter);
        let (total,): (i64,) = count_qb.build_query_as().fetch_one(&self.pool).await?;

        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {MODIFIER_COLUMNS} FROM modifiers m WHERE TRUE"));
        push_modifier_filters(&mut qb, scope, filter);
        qb.push(" ORDER BY m.name ASC LIMIT ")
            .push_bind(window.limit)
            .push(" OFFSET ")
            .push_bind(window.offset);

        let modifiers = qb.build_query_as::<Modifier>().fetch_all(&self.pool).await?;
        Ok((modifiers, total))
    }

    pub async fn find_modifier(&self, id: Uuid) -> Result<Option<Modifier>, AppError> {
        let modifier =
            sqlx::query_as::<_, Modifier>(&format!("SELECT {MODIFIER_COLUMNS} FROM modifiers m WHERE m.id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(modifier)
    }

    pub async fn find_modifiers_by_ids<'e, E>(&self, executor: E, ids: &[Uuid]) -> Result<Vec<Modifier>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let modifiers =
            sqlx::query_as::<_, Modifier>(&format!("SELECT {MODIFIER_COLUMNS} FROM modifiers m WHERE m.id = ANY($1)"))
                .bind(ids)
                .fetch_all(executor)
                .await?;
        Ok(modifiers)
    }

    pub async fn create_modifier(
        &self,
        chain_id: Option<Uuid>,
        store_id: Option<Uuid>,
        name: &str,
        price: Decimal,
    ) -> Result<Modifier, AppError> {
        sqlx::query_as::<_, Modifier>(&format!(
            r#"
            INSERT INTO modifiers AS m (chain_id, store_id, name, price)
            VALUES ($1, $2, $3, $4)
            RETURNING {MODIFIER_COLUMNS}
            "#
        ))
        .bind(chain_id)
        .bind(store_id)
        .bind(name)
        .bind(price)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::from_write)
    }

    pub async fn update_modifier(
        &self,
        id: Uuid,
        name: Option<&str>,
        price: Option<Decimal>,
        is_active: Option<bool>,
    ) -> Result<Modifier, AppError> {
        sqlx::query_as::<_, Modifier>(&format!(
            r#"
            UPDATE modifiers AS m SET
                name = COALESCE($2, m.name),
                price = COALESCE($3, m.price),
                is_active = COALESCE($4, m.is_active),
                updated_at = NOW()
            WHERE m.id = $1
            RETURNING {MODIFIER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(name)
        .bind(price)
        .bind(is_active)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AppError::NotFound("modifier"))
    }

    pub async fn modifier_in_use(&self, id: Uuid) -> Result<bool, AppError> {
        let (exists,): (bool,) =
            sqlx::query_as("SELECT EXISTS (SELECT 1 FROM product_modifiers WHERE modifier_id = $1)")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    pub async fn delete_modifier(&self, id: Uuid) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM modifiers WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("modifier"));
        }
        Ok(())
    }

    // --- Vínculo produto <-> modificador ---

    pub async fn modifiers_for_product(&self, product_id: Uuid) -> Result<Vec<Modifier>, AppError> {
        let modifiers = sqlx::query_as::<_, Modifier>(&format!(
            r#"
            SELECT {MODIFIER_COLUMNS}
            FROM product_modifiers pm
            JOIN modifiers m ON m.id = pm.modifier_id
            WHERE pm.product_id = $1
            ORDER BY m.name
            "#
        ))
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(modifiers)
    }

    pub async fn modifiers_for_products<'e, E>(
        &self,
        executor: E,
        product_ids: &[Uuid],
    ) -> Result<Vec<AttachedModifier>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let rows = sqlx::query_as::<_, AttachedModifier>(&format!(
            r#"
            SELECT pm.product_id, {MODIFIER_COLUMNS}
            FROM product_modifiers pm
            JOIN modifiers m ON m.id = pm.modifier_id
            WHERE pm.product_id = ANY($1)
            "#
        ))
        .bind(product_ids)
        .fetch_all(executor)
        .await?;
        Ok(rows)
    }

    pub async fn clear_product_modifiers<'e, E>(&self, executor: E, product_id: Uuid) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query("DELETE FROM product_modifiers WHERE product_id = $1")
            .bind(product_id)
            .execute(executor)
            .await?;
        Ok(())
    }

    pub async fn attach_modifiers<'e, E>(&self, executor: E, product_id: Uuid, modifier_ids: &[Uuid]) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            r#"
            INSERT INTO product_modifiers (product_id, modifier_id)
            SELECT $1, unnest($2::uuid[])
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(product_id)
        .bind(modifier_ids)
        .execute(executor)
        .await?;
        Ok(())
    }
}

fn push_category_filters(qb: &mut QueryBuilder<'_, Postgres>, scope: &TenantScope, filter: &CatalogListQuery) {
    scope.push_filter(qb, "c.", true);

    if let Some(term) = search_term(&filter.search) {
        qb.push(" AND unaccent(c.name) ILIKE unaccent(")
            .push_bind(like_pattern(term))
            .push(")");
    }
    if let Some(parent_id) = filter.parent_id {
        qb.push(" AND c.parent_id = ").push_bind(parent_id);
    }
    if let Some(is_active) = filter.is_active {
        qb.push(" AND c.is_active = ").push_bind(is_active);
    }
}

fn push_product_filters(qb: &mut QueryBuilder<'_, Postgres>, scope: &TenantScope, filter: &ProductListQuery) {
    scope.push_filter(qb, "p.", true);

    if let Some(term) = search_term(&filter.search) {
        let pattern = like_pattern(term);
        qb.push(" AND (unaccent(p.name) ILIKE unaccent(")
            .push_bind(pattern.clone())
            .push(") OR unaccent(COALESCE(p.sku, '')) ILIKE unaccent(")
            .push_bind(pattern)
            .push("))");
    }
    if let Some(category_id) = filter.category_id {
        qb.push(" AND p.category_id = ").push_bind(category_id);
    }
    if let Some(is_available) = filter.is_available {
        qb.push(" AND p.is_available = ").push_bind(is_available);
    }
    if let Some(store_id) = filter.store_id {
        qb.push(" AND (p.store_id = ")
            .push_bind(store_id)
            .push(" OR p.store_id IS NULL)");
    }
}

fn push_modifier_filters(qb: &mut QueryBuilder<'_, Postgres>, scope: &TenantScope, filter: &CatalogListQuery) {
    scope.push_filter(qb, "m.", true);

    if let Some(term) = search_term(&filter.search) {
        qb.push(" AND unaccent(m.name) ILIKE unaccent(")
            .push_bind(like_pattern(term))
            .push(")");
    }
    if let Some(is_active) = filter.is_active {
        qb.push(" AND m.is_active = ").push_bind(is_active);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::identity::fixtures::identity;

    #[test]
    fn product_search_is_accent_insensitive_and_scoped() {
        let chain = Uuid::new_v4();
        let filter = ProductListQuery {
            search: Some("pão".into()),
            ..Default::default()
        };
        let mut qb = QueryBuilder::<Postgres>::new("SELECT 1 FROM products p WHERE TRUE");
        let scope = TenantScope::for_identity(&identity(Some(chain), None, vec![]));
        push_product_filters(&mut qb, &scope, &filter);

        let sql = qb.sql();
        assert!(sql.contains("OR p.chain_id IS NULL)"));
        assert!(sql.contains("unaccent(p.name) ILIKE unaccent($4)"));
    }

    #[test]
    fn blank_search_adds_no_predicate() {
        let filter = CatalogListQuery {
            search: Some("   ".into()),
            ..Default::default()
        };
        let mut qb = QueryBuilder::<Postgres>::new("SELECT 1 FROM modifiers m WHERE TRUE");
        push_modifier_filters(&mut qb, &TenantScope::Unrestricted, &filter);
        assert_eq!(qb.sql(), "SELECT 1 FROM modifiers m WHERE TRUE");
    }
}
