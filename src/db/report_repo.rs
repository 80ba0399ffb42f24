// src/db/report_repo.rs

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{
    authz::TenantScope,
    common::error::AppError,
    models::reports::{RevenueRow, TopProductEntry},
};

/// Números brutos do resumo do dia; a média é calculada no serviço.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SummaryCounters {
    pub revenue: Decimal,
    pub invoices: i64,
    pub open_orders: i64,
}

#[derive(Clone)]
pub struct ReportRepository {
    pool: PgPool,
}

impl ReportRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Faturas do período (somente data e total); o agrupamento acontece em memória.
    pub async fn revenue_rows(
        &self,
        scope: &TenantScope,
        store_id: Option<Uuid>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RevenueRow>, AppError> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT v.created_at, v.total FROM invoices v WHERE TRUE");
        scope.push_filter(&mut qb, "v.", false);
        push_period(&mut qb, "v.", store_id, from, to);
        qb.push(" ORDER BY v.created_at");

        let rows = qb.build_query_as::<RevenueRow>().fetch_all(&self.pool).await?;
        Ok(rows)
    }

    pub async fn top_products(
        &self,
        scope: &TenantScope,
        store_id: Option<Uuid>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<TopProductEntry>, AppError> {
        let mut qb = QueryBuilder::<Postgres>::new(
            r#"
            SELECT i.product_id, i.product_name,
                   SUM(i.quantity)::BIGINT AS total_quantity,
                   COALESCE(SUM(i.line_total), 0) AS total_revenue
            FROM order_items i
            JOIN orders o ON o.id = i.order_id
            WHERE o.status = 'COMPLETED'
            "#,
        );
        scope.push_filter(&mut qb, "o.", false);
        push_period(&mut qb, "o.", store_id, from, to);
        qb.push(" GROUP BY i.product_id, i.product_name ORDER BY total_quantity DESC, total_revenue DESC LIMIT ")
            .push_bind(limit);

        let rows = qb.build_query_as::<TopProductEntry>().fetch_all(&self.pool).await?;
        Ok(rows)
    }

    pub async fn summary_counters(
        &self,
        scope: &TenantScope,
        store_id: Option<Uuid>,
        day_start: DateTime<Utc>,
        day_end: DateTime<Utc>,
    ) -> Result<SummaryCounters, AppError> {
        // As duas leituras enxergam o mesmo snapshot
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await?;

        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT COALESCE(SUM(v.total), 0), COUNT(*) FROM invoices v WHERE TRUE",
        );
        scope.push_filter(&mut qb, "v.", false);
        push_period(&mut qb, "v.", store_id, day_start, day_end);
        let (revenue, invoices): (Decimal, i64) = qb.build_query_as().fetch_one(&mut *tx).await?;

        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT COUNT(*) FROM orders o WHERE o.invoice_id IS NULL AND o.status NOT IN ('COMPLETED', 'CANCELLED')",
        );
        scope.push_filter(&mut qb, "o.", false);
        if let Some(store_id) = store_id {
            qb.push(" AND o.store_id = ").push_bind(store_id);
        }
        let (open_orders,): (i64,) = qb.build_query_as().fetch_one(&mut *tx).await?;

        tx.commit().await?;

        Ok(SummaryCounters { revenue, invoices, open_orders })
    }
}

fn push_period(
    qb: &mut QueryBuilder<'_, Postgres>,
    alias: &str,
    store_id: Option<Uuid>,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) {
    if let Some(store_id) = store_id {
        qb.push(format!(" AND {alias}store_id = ")).push_bind(store_id);
    }
    qb.push(format!(" AND {alias}created_at >= ")).push_bind(from);
    qb.push(format!(" AND {alias}created_at < ")).push_bind(to);
}
