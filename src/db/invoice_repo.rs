// src/db/invoice_repo.rs

use sqlx::{Executor, PgConnection, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{
    authz::TenantScope,
    common::{
        db_utils::{lock_sequence, PageWindow},
        error::AppError,
    },
    models::invoices::{Invoice, InvoiceListQuery, InvoiceTotals, PaymentMethod},
};

const INVOICE_COLUMNS: &str = "v.id, v.chain_id, v.store_id, v.table_id, v.invoice_number, v.subtotal, v.discount, \
     v.tax_rate, v.tax_amount, v.total, v.payment_method, v.created_by, v.created_at";

pub struct NewInvoice<'a> {
    pub chain_id: Uuid,
    pub store_id: Uuid,
    pub table_id: Option<Uuid>,
    pub invoice_number: &'a str,
    pub totals: InvoiceTotals,
    pub payment_method: PaymentMethod,
    pub created_by: Uuid,
}

#[derive(Clone)]
pub struct InvoiceRepository {
    pool: PgPool,
}

impl InvoiceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn next_invoice_sequence(&self, conn: &mut PgConnection, store_id: Uuid, prefix: &str) -> Result<i64, AppError> {
        lock_sequence(&mut *conn, store_id, prefix).await?;

        let (last,): (Option<i64>,) = sqlx::query_as(
            r#"
            SELECT MAX(CAST(SUBSTRING(invoice_number FROM '[0-9]+$') AS BIGINT))
            FROM invoices
            WHERE store_id = $1 AND invoice_number LIKE $2 || '%'
            "#,
        )
        .bind(store_id)
        .bind(prefix)
        .fetch_one(&mut *conn)
        .await?;
        Ok(last.unwrap_or(0) + 1)
    }

    pub async fn insert_invoice<'e, E>(&self, executor: E, invoice: NewInvoice<'_>) -> Result<Invoice, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, Invoice>(&format!(
            r#"
            INSERT INTO invoices AS v (
                chain_id, store_id, table_id, invoice_number, subtotal, discount,
                tax_rate, tax_amount, total, payment_method, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {INVOICE_COLUMNS}
            "#
        ))
        .bind(invoice.chain_id)
        .bind(invoice.store_id)
        .bind(invoice.table_id)
        .bind(invoice.invoice_number)
        .bind(invoice.totals.subtotal)
        .bind(invoice.totals.discount)
        .bind(invoice.totals.tax_rate)
        .bind(invoice.totals.tax_amount)
        .bind(invoice.totals.total)
        .bind(invoice.payment_method)
        .bind(invoice.created_by)
        .fetch_one(executor)
        .await
        .map_err(AppError::from_write)
    }

    pub async fn find_invoice(&self, id: Uuid) -> Result<Option<Invoice>, AppError> {
        let invoice =
            sqlx::query_as::<_, Invoice>(&format!("SELECT {INVOICE_COLUMNS} FROM invoices v WHERE v.id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(invoice)
    }

    pub async fn list_invoices(
        &self,
        scope: &TenantScope,
        filter: &InvoiceListQuery,
        window: PageWindow,
    ) -> Result<(Vec<Invoice>, i64), AppError> {
        let mut count_qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM invoices v WHERE TRUE");
        push_invoice_filters(&mut count_qb, scope, filter);
        let (total,): (i64,) = count_qb.build_query_as().fetch_one(&self.pool).await?;

        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {INVOICE_COLUMNS} FROM invoices v WHERE TRUE"));
        push_invoice_filters(&mut qb, scope, filter);
        qb.push(" ORDER BY v.created_at DESC LIMIT ")
            .push_bind(window.limit)
            .push(" OFFSET ")
            .push_bind(window.offset);

        let invoices = qb.build_query_as::<Invoice>().fetch_all(&self.pool).await?;
        Ok((invoices, total))
    }
}

fn push_invoice_filters(qb: &mut QueryBuilder<'_, Postgres>, scope: &TenantScope, filter: &InvoiceListQuery) {
    scope.push_filter(qb, "v.", false);

    if let Some(store_id) = filter.store_id {
        qb.push(" AND v.store_id = ").push_bind(store_id);
    }
    if let Some(method) = filter.payment_method {
        qb.push(" AND v.payment_method = ").push_bind(method);
    }
    if let Some(from) = filter.from {
        qb.push(" AND v.created_at >= ").push_bind(from);
    }
    if let Some(to) = filter.to {
        qb.push(" AND v.created_at < ").push_bind(to);
    }
}
