// src/db/order_repo.rs

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{Executor, PgConnection, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{
    authz::TenantScope,
    common::{
        db_utils::{lock_sequence, PageWindow},
        error::AppError,
    },
    models::orders::{
        DiningTable, Order, OrderItem, OrderItemModifier, OrderListQuery, OrderStatus, TableListQuery, TableStatus,
    },
};

const TABLE_COLUMNS: &str = "t.id, t.chain_id, t.store_id, t.name, t.capacity, t.status, t.created_at, t.updated_at";
const ORDER_COLUMNS: &str = "o.id, o.chain_id, o.store_id, o.table_id, o.invoice_id, o.order_number, o.status, \
     o.subtotal, o.notes, o.created_by, o.created_at, o.updated_at, o.completed_at";
const ITEM_COLUMNS: &str =
    "i.id, i.order_id, i.product_id, i.product_name, i.quantity, i.unit_price, i.modifiers_total, i.line_total, i.notes";

// Um pedido está "aberto" enquanto não foi faturado nem encerrado
const OPEN_ORDER_PREDICATE: &str = "o.invoice_id IS NULL AND o.status NOT IN ('COMPLETED', 'CANCELLED')";

pub struct NewOrder<'a> {
    pub chain_id: Uuid,
    pub store_id: Uuid,
    pub table_id: Option<Uuid>,
    pub order_number: &'a str,
    pub subtotal: Decimal,
    pub notes: Option<&'a str>,
    pub created_by: Uuid,
}

pub struct NewOrderItem<'a> {
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub product_name: &'a str,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub modifiers_total: Decimal,
    pub line_total: Decimal,
    pub notes: Option<&'a str>,
}

#[derive(Clone)]
pub struct OrderRepository {
    pool: PgPool,
}

impl OrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // =========================================================================
    //  MESAS
    // =========================================================================

    pub async fn list_tables(
        &self,
        scope: &TenantScope,
        filter: &TableListQuery,
        window: PageWindow,
    ) -> Result<(Vec<DiningTable>, i64), AppError> {
        let mut count_qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM dining_tables t WHERE TRUE");
        push_table_filters(&mut count_qb, scope, filter);
        let (total,): (i64,) = count_qb.build_query_as().fetch_one(&self.pool).await?;

        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {TABLE_COLUMNS} FROM dining_tables t WHERE TRUE"));
        push_table_filters(&mut qb, scope, filter);
        qb.push(" ORDER BY t.name ASC LIMIT ")
            .push_bind(window.limit)
            .push(" OFFSET ")
            .push_bind(window.offset);

        let tables = qb.build_query_as::<DiningTable>().fetch_all(&self.pool).await?;
        Ok((tables, total))
    }

    pub async fn find_table<'e, E>(&self, executor: E, id: Uuid) -> Result<Option<DiningTable>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let table =
            sqlx::query_as::<_, DiningTable>(&format!("SELECT {TABLE_COLUMNS} FROM dining_tables t WHERE t.id = $1"))
                .bind(id)
                .fetch_optional(executor)
                .await?;
        Ok(table)
    }

    pub async fn create_table(&self, chain_id: Uuid, store_id: Uuid, name: &str, capacity: i32) -> Result<DiningTable, AppError> {
        sqlx::query_as::<_, DiningTable>(&format!(
            r#"
            INSERT INTO dining_tables AS t (chain_id, store_id, name, capacity)
            VALUES ($1, $2, $3, $4)
            RETURNING {TABLE_COLUMNS}
            "#
        ))
        .bind(chain_id)
        .bind(store_id)
        .bind(name)
        .bind(capacity)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::from_write)
    }

    pub async fn update_table(&self, id: Uuid, name: Option<&str>, capacity: Option<i32>) -> Result<DiningTable, AppError> {
        sqlx::query_as::<_, DiningTable>(&format!(
            r#"
            UPDATE dining_tables AS t SET
                name = COALESCE($2, t.name),
                capacity = COALESCE($3, t.capacity),
                updated_at = NOW()
            WHERE t.id = $1
            RETURNING {TABLE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(name)
        .bind(capacity)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::from_write)?
        .ok_or(AppError::NotFound("table"))
    }

    pub async fn set_table_status<'e, E>(&self, executor: E, id: Uuid, status: TableStatus) -> Result<DiningTable, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, DiningTable>(&format!(
            "UPDATE dining_tables AS t SET status = $2, updated_at = NOW() WHERE t.id = $1 RETURNING {TABLE_COLUMNS}"
        ))
        .bind(id)
        .bind(status)
        .fetch_optional(executor)
        .await?
        .ok_or(AppError::NotFound("table"))
    }

    pub async fn table_has_open_orders<'e, E>(&self, executor: E, table_id: Uuid) -> Result<bool, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let (exists,): (bool,) = sqlx::query_as(&format!(
            "SELECT EXISTS (SELECT 1 FROM orders o WHERE o.table_id = $1 AND {OPEN_ORDER_PREDICATE})"
        ))
        .bind(table_id)
        .fetch_one(executor)
        .await?;
        Ok(exists)
    }

    pub async fn delete_table(&self, id: Uuid) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM dining_tables WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("table"));
        }
        Ok(())
    }

    // =========================================================================
    //  PEDIDOS
    // =========================================================================

    /// Próximo sequencial do dia para a loja, a partir do maior número já emitido com o prefixo.
    pub async fn next_order_sequence(&self, conn: &mut PgConnection, store_id: Uuid, prefix: &str) -> Result<i64, AppError> {
        lock_sequence(&mut *conn, store_id, prefix).await?;

        let (last,): (Option<i64>,) = sqlx::query_as(
            r#"
            SELECT MAX(CAST(SUBSTRING(order_number FROM '[0-9]+$') AS BIGINT))
            FROM orders
            WHERE store_id = $1 AND order_number LIKE $2 || '%'
            "#,
        )
        .bind(store_id)
        .bind(prefix)
        .fetch_one(&mut *conn)
        .await?;
        Ok(last.unwrap_or(0) + 1)
    }

    pub async fn insert_order<'e, E>(&self, executor: E, order: NewOrder<'_>) -> Result<Order, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, Order>(&format!(
            r#"
            INSERT INTO orders AS o (chain_id, store_id, table_id, order_number, subtotal, notes, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(order.chain_id)
        .bind(order.store_id)
        .bind(order.table_id)
        .bind(order.order_number)
        .bind(order.subtotal)
        .bind(order.notes)
        .bind(order.created_by)
        .fetch_one(executor)
        .await
        .map_err(AppError::from_write)
    }

    pub async fn insert_item<'e, E>(&self, executor: E, item: NewOrderItem<'_>) -> Result<OrderItem, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let item = sqlx::query_as::<_, OrderItem>(&format!(
            r#"
            INSERT INTO order_items AS i (
                order_id, product_id, product_name, quantity, unit_price, modifiers_total, line_total, notes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {ITEM_COLUMNS}
            "#
        ))
        .bind(item.order_id)
        .bind(item.product_id)
        .bind(item.product_name)
        .bind(item.quantity)
        .bind(item.unit_price)
        .bind(item.modifiers_total)
        .bind(item.line_total)
        .bind(item.notes)
        .fetch_one(executor)
        .await?;
        Ok(item)
    }

    pub async fn insert_item_modifier<'e, E>(
        &self,
        executor: E,
        order_item_id: Uuid,
        modifier_id: Uuid,
        name: &str,
        price: Decimal,
    ) -> Result<OrderItemModifier, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let modifier = sqlx::query_as::<_, OrderItemModifier>(
            r#"
            INSERT INTO order_item_modifiers (order_item_id, modifier_id, name, price)
            VALUES ($1, $2, $3, $4)
            RETURNING order_item_id, modifier_id, name, price
            "#,
        )
        .bind(order_item_id)
        .bind(modifier_id)
        .bind(name)
        .bind(price)
        .fetch_one(executor)
        .await?;
        Ok(modifier)
    }

    pub async fn list_orders(
        &self,
        scope: &TenantScope,
        filter: &OrderListQuery,
        window: PageWindow,
    ) -> Result<(Vec<Order>, i64), AppError> {
        let mut count_qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM orders o WHERE TRUE");
        push_order_filters(&mut count_qb, scope, filter);
        let (total,): (i64,) = count_qb.build_query_as().fetch_one(&self.pool).await?;

        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {ORDER_COLUMNS} FROM orders o WHERE TRUE"));
        push_order_filters(&mut qb, scope, filter);
        qb.push(" ORDER BY o.created_at DESC LIMIT ")
            .push_bind(window.limit)
            .push(" OFFSET ")
            .push_bind(window.offset);

        let orders = qb.build_query_as::<Order>().fetch_all(&self.pool).await?;
        Ok((orders, total))
    }

    pub async fn find_order<'e, E>(&self, executor: E, id: Uuid) -> Result<Option<Order>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let order = sqlx::query_as::<_, Order>(&format!("SELECT {ORDER_COLUMNS} FROM orders o WHERE o.id = $1"))
            .bind(id)
            .fetch_optional(executor)
            .await?;
        Ok(order)
    }

    /// Trava a linha do pedido até o fim da transação (faturamento).
    pub async fn lock_order<'e, E>(&self, executor: E, id: Uuid) -> Result<Option<Order>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let order =
            sqlx::query_as::<_, Order>(&format!("SELECT {ORDER_COLUMNS} FROM orders o WHERE o.id = $1 FOR UPDATE"))
                .bind(id)
                .fetch_optional(executor)
                .await?;
        Ok(order)
    }

    /// Pedidos ainda não faturados da mesa, travados para o fechamento da conta.
    pub async fn lock_open_orders_for_table<'e, E>(&self, executor: E, table_id: Uuid) -> Result<Vec<Order>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let orders = sqlx::query_as::<_, Order>(&format!(
            r#"
            SELECT {ORDER_COLUMNS} FROM orders o
            WHERE o.table_id = $1 AND {OPEN_ORDER_PREDICATE}
            ORDER BY o.created_at
            FOR UPDATE
            "#
        ))
        .bind(table_id)
        .fetch_all(executor)
        .await?;
        Ok(orders)
    }

    pub async fn items_for_orders(&self, order_ids: &[Uuid]) -> Result<Vec<OrderItem>, AppError> {
        let items = sqlx::query_as::<_, OrderItem>(&format!(
            "SELECT {ITEM_COLUMNS} FROM order_items i WHERE i.order_id = ANY($1) ORDER BY i.order_id, i.id"
        ))
        .bind(order_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    pub async fn modifiers_for_items(&self, item_ids: &[Uuid]) -> Result<Vec<OrderItemModifier>, AppError> {
        let modifiers = sqlx::query_as::<_, OrderItemModifier>(
            "SELECT order_item_id, modifier_id, name, price FROM order_item_modifiers WHERE order_item_id = ANY($1)",
        )
        .bind(item_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(modifiers)
    }

    pub async fn update_status<'e, E>(&self, executor: E, id: Uuid, status: OrderStatus) -> Result<Order, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, Order>(&format!(
            r#"
            UPDATE orders AS o SET
                status = $2,
                completed_at = CASE WHEN $2 = 'COMPLETED'::order_status THEN NOW() ELSE o.completed_at END,
                updated_at = NOW()
            WHERE o.id = $1
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(status)
        .fetch_optional(executor)
        .await?
        .ok_or(AppError::NotFound("order"))
    }

    /// Vincula os pedidos à fatura e os encerra.
    pub async fn attach_invoice<'e, E>(
        &self,
        executor: E,
        order_ids: &[Uuid],
        invoice_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Vec<Order>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let orders = sqlx::query_as::<_, Order>(&format!(
            r#"
            UPDATE orders AS o SET
                invoice_id = $2,
                status = 'COMPLETED',
                completed_at = $3,
                updated_at = NOW()
            WHERE o.id = ANY($1)
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(order_ids)
        .bind(invoice_id)
        .bind(at)
        .fetch_all(executor)
        .await?;
        Ok(orders)
    }

    pub async fn order_ids_for_invoice(&self, invoice_id: Uuid) -> Result<Vec<Uuid>, AppError> {
        let rows: Vec<(Uuid,)> = sqlx::query_as("SELECT id FROM orders WHERE invoice_id = $1 ORDER BY created_at")
            .bind(invoice_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

fn push_table_filters(qb: &mut QueryBuilder<'_, Postgres>, scope: &TenantScope, filter: &TableListQuery) {
    scope.push_filter(qb, "t.", false);

    if let Some(store_id) = filter.store_id {
        qb.push(" AND t.store_id = ").push_bind(store_id);
    }
    if let Some(status) = filter.status {
        qb.push(" AND t.status = ").push_bind(status);
    }
}

fn push_order_filters(qb: &mut QueryBuilder<'_, Postgres>, scope: &TenantScope, filter: &OrderListQuery) {
    scope.push_filter(qb, "o.", false);

    if let Some(status) = filter.status {
        qb.push(" AND o.status = ").push_bind(status);
    }
    if let Some(store_id) = filter.store_id {
        qb.push(" AND o.store_id = ").push_bind(store_id);
    }
    if let Some(table_id) = filter.table_id {
        qb.push(" AND o.table_id = ").push_bind(table_id);
    }
    if let Some(from) = filter.from {
        qb.push(" AND o.created_at >= ").push_bind(from);
    }
    if let Some(to) = filter.to {
        qb.push(" AND o.created_at < ").push_bind(to);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::identity::fixtures::identity;

    #[test]
    fn order_filters_never_leave_the_store_scope() {
        let store = Uuid::new_v4();
        let filter = OrderListQuery {
            status: Some(OrderStatus::Pending),
            ..Default::default()
        };
        let mut qb = QueryBuilder::<Postgres>::new("SELECT 1 FROM orders o WHERE TRUE");
        let scope = TenantScope::for_identity(&identity(None, Some(store), vec![]));
        push_order_filters(&mut qb, &scope, &filter);

        assert_eq!(
            qb.sql(),
            "SELECT 1 FROM orders o WHERE TRUE AND (o.chain_id = ANY($1) OR o.store_id = ANY($2) \
             OR (o.store_id IS NULL AND o.chain_id = ANY($3))) AND o.status = $4"
        );
        assert!(scope.admits(Some(Uuid::new_v4()), Some(store), false));
    }
}
