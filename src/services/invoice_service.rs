// src/services/invoice_service.rs

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::json;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::{
    authz::{Action, Identity, PolicyEngine, Resource, ResourceKind, TenantScope},
    common::{
        db_utils::{PageParams, Paginated},
        error::AppError,
    },
    db::{invoice_repo::NewInvoice, InvoiceRepository, OrderRepository},
    models::{
        invoices::{
            BillingOptions, CreateInvoicePayload, CreateTableInvoicePayload, Invoice, InvoiceDetail,
            InvoiceListQuery, InvoiceTotals,
        },
        orders::{DiningTable, Order, OrderStatus, TableStatus},
    },
    services::{
        order_service::{day_prefix, document_number},
        realtime::{RealtimeEvent, RealtimeHub, ORDER_UPDATED, TABLE_UPDATE},
    },
};

/// subtotal - desconto + imposto, com o imposto arredondado em 2 casas (meio para cima).
pub fn compute_totals(subtotal: Decimal, discount: Decimal, tax_rate: Decimal) -> Result<InvoiceTotals, AppError> {
    if discount.is_sign_negative() || discount > subtotal {
        return Err(AppError::BadRequest("invoice.invalid_discount"));
    }
    if tax_rate.is_sign_negative() || tax_rate > Decimal::ONE_HUNDRED {
        return Err(AppError::BadRequest("invoice.invalid_tax_rate"));
    }

    let taxable = subtotal - discount;
    let tax_amount =
        (taxable * tax_rate / Decimal::ONE_HUNDRED).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);

    Ok(InvoiceTotals {
        subtotal,
        discount,
        tax_rate,
        tax_amount,
        total: taxable + tax_amount,
    })
}

/// Pedidos da mesa que entram na conta: sem fatura e fora de estado terminal.
pub fn billable_orders(orders: Vec<Order>) -> Result<Vec<Order>, AppError> {
    let open: Vec<Order> = orders
        .into_iter()
        .filter(|o| o.invoice_id.is_none() && !o.status.is_terminal())
        .collect();
    if open.is_empty() {
        return Err(AppError::BadRequest("invoice.no_open_orders"));
    }
    Ok(open)
}

#[derive(Clone)]
pub struct InvoiceService {
    invoice_repo: InvoiceRepository,
    order_repo: OrderRepository,
    policy: Arc<PolicyEngine>,
    realtime: RealtimeHub,
    pool: PgPool,
}

impl InvoiceService {
    pub fn new(
        invoice_repo: InvoiceRepository,
        order_repo: OrderRepository,
        policy: Arc<PolicyEngine>,
        realtime: RealtimeHub,
        pool: PgPool,
    ) -> Self {
        Self { invoice_repo, order_repo, policy, realtime, pool }
    }

    pub async fn list_invoices(
        &self,
        identity: &Identity,
        filter: &InvoiceListQuery,
        page: PageParams,
    ) -> Result<Paginated<Invoice>, AppError> {
        self.policy
            .authorize(identity, &Resource::collection(ResourceKind::Invoice), Action::Read)?;

        let window = page.window();
        let scope = TenantScope::for_identity(identity);
        let (invoices, total) = self.invoice_repo.list_invoices(&scope, filter, window).await?;
        Ok(Paginated::new(invoices, total, window))
    }

    pub async fn get_invoice(&self, identity: &Identity, id: Uuid) -> Result<InvoiceDetail, AppError> {
        let invoice = self
            .invoice_repo
            .find_invoice(id)
            .await?
            .ok_or(AppError::NotFound("invoice"))?;
        self.policy.authorize(identity, &invoice_resource(&invoice), Action::Read)?;

        let order_ids = self.order_repo.order_ids_for_invoice(invoice.id).await?;
        Ok(InvoiceDetail { invoice, order_ids })
    }

    /// Fatura um único pedido.
    pub async fn create_for_order(&self, identity: &Identity, payload: CreateInvoicePayload) -> Result<InvoiceDetail, AppError> {
        let mut tx = self.pool.begin().await?;

        let order = self
            .order_repo
            .lock_order(&mut *tx, payload.order_id)
            .await?
            .ok_or(AppError::NotFound("order"))?;
        self.policy.authorize(
            identity,
            &Resource::row(ResourceKind::Invoice, Some(order.chain_id), Some(order.store_id)),
            Action::Create,
        )?;

        if order.invoice_id.is_some() {
            return Err(AppError::Conflict("order.already_invoiced"));
        }
        if order.status == OrderStatus::Cancelled {
            return Err(AppError::BadRequest("order.cancelled"));
        }

        let totals = compute_totals(order.subtotal, payload.billing.discount, payload.billing.tax_rate)?;
        let table_id = order.table_id;
        let invoice = self
            .issue(&mut tx, identity, &order, table_id, totals, &payload.billing)
            .await?;
        let orders = self
            .order_repo
            .attach_invoice(&mut *tx, &[order.id], invoice.id, invoice.created_at)
            .await?;

        // Era o último pedido aberto da mesa: libera
        let mut freed_table = None;
        if let Some(table_id) = table_id {
            if !self.order_repo.table_has_open_orders(&mut *tx, table_id).await? {
                freed_table = Some(
                    self.order_repo
                        .set_table_status(&mut *tx, table_id, TableStatus::Available)
                        .await?,
                );
            }
        }

        tx.commit().await?;

        tracing::info!(user_id = %identity.user_id, total = %invoice.total, "💰 Fatura emitida: {}", invoice.invoice_number);
        self.publish(&orders, freed_table.as_ref());

        Ok(InvoiceDetail { invoice, order_ids: vec![order.id] })
    }

    /// Fecha a conta da mesa: todos os pedidos abertos numa única fatura.
    pub async fn create_for_table(
        &self,
        identity: &Identity,
        payload: CreateTableInvoicePayload,
    ) -> Result<InvoiceDetail, AppError> {
        let table = self
            .order_repo
            .find_table(&self.pool, payload.table_id)
            .await?
            .ok_or(AppError::NotFound("table"))?;
        self.policy.authorize(
            identity,
            &Resource::row(ResourceKind::Invoice, Some(table.chain_id), Some(table.store_id)),
            Action::Create,
        )?;

        let mut tx = self.pool.begin().await?;

        let open_orders = billable_orders(self.order_repo.lock_open_orders_for_table(&mut *tx, table.id).await?)?;
        let first = open_orders
            .first()
            .ok_or(AppError::BadRequest("invoice.no_open_orders"))?;

        let subtotal: Decimal = open_orders.iter().map(|o| o.subtotal).sum();
        let totals = compute_totals(subtotal, payload.billing.discount, payload.billing.tax_rate)?;
        let invoice = self
            .issue(&mut tx, identity, first, Some(table.id), totals, &payload.billing)
            .await?;

        let order_ids: Vec<Uuid> = open_orders.iter().map(|o| o.id).collect();
        let orders = self
            .order_repo
            .attach_invoice(&mut *tx, &order_ids, invoice.id, invoice.created_at)
            .await?;
        let freed = self
            .order_repo
            .set_table_status(&mut *tx, table.id, TableStatus::Available)
            .await?;

        tx.commit().await?;

        tracing::info!(
            user_id = %identity.user_id,
            table = %table.name,
            orders = order_ids.len(),
            total = %invoice.total,
            "💰 Conta da mesa fechada: {}",
            invoice.invoice_number
        );
        self.publish(&orders, Some(&freed));

        Ok(InvoiceDetail { invoice, order_ids })
    }

    // Numera e grava a fatura dentro da transação do chamador
    async fn issue(
        &self,
        conn: &mut PgConnection,
        identity: &Identity,
        order: &Order,
        table_id: Option<Uuid>,
        totals: InvoiceTotals,
        billing: &BillingOptions,
    ) -> Result<Invoice, AppError> {
        let prefix = day_prefix("INV", Utc::now().date_naive());
        let sequence = self
            .invoice_repo
            .next_invoice_sequence(&mut *conn, order.store_id, &prefix)
            .await?;
        let invoice_number = document_number(&prefix, sequence);

        self.invoice_repo
            .insert_invoice(
                &mut *conn,
                NewInvoice {
                    chain_id: order.chain_id,
                    store_id: order.store_id,
                    table_id,
                    invoice_number: &invoice_number,
                    totals,
                    payment_method: billing.payment_method,
                    created_by: identity.user_id,
                },
            )
            .await
    }

    fn publish(&self, orders: &[Order], table: Option<&DiningTable>) {
        for order in orders {
            self.realtime.publish(RealtimeEvent::new(
                ORDER_UPDATED,
                order.chain_id,
                order.store_id,
                json!({
                    "orderId": order.id,
                    "orderNumber": order.order_number,
                    "status": order.status,
                    "invoiceId": order.invoice_id,
                }),
            ));
        }
        if let Some(table) = table {
            self.realtime
                .publish(RealtimeEvent::new(TABLE_UPDATE, table.chain_id, table.store_id, table));
        }
    }
}

fn invoice_resource(invoice: &Invoice) -> Resource {
    Resource::row(ResourceKind::Invoice, Some(invoice.chain_id), Some(invoice.store_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(raw: &str) -> Decimal {
        Decimal::from_str(raw).unwrap()
    }

    #[test]
    fn applies_discount_before_tax() {
        let totals = compute_totals(dec("100.00"), dec("10.00"), dec("10")).unwrap();
        assert_eq!(totals.tax_amount, dec("9.00"));
        assert_eq!(totals.total, dec("99.00"));
    }

    #[test]
    fn rounds_tax_half_up_to_cents() {
        // 10.05 * 5% = 0.5025 -> 0.50 ; 10.10 * 5% = 0.505 -> 0.51
        assert_eq!(compute_totals(dec("10.05"), Decimal::ZERO, dec("5")).unwrap().tax_amount, dec("0.50"));
        let totals = compute_totals(dec("10.10"), Decimal::ZERO, dec("5")).unwrap();
        assert_eq!(totals.tax_amount, dec("0.51"));
        assert_eq!(totals.total, dec("10.61"));
    }

    #[test]
    fn full_discount_is_allowed_but_not_more() {
        let totals = compute_totals(dec("50"), dec("50"), dec("12")).unwrap();
        assert_eq!(totals.total, Decimal::ZERO);

        assert!(matches!(
            compute_totals(dec("50"), dec("50.01"), Decimal::ZERO),
            Err(AppError::BadRequest("invoice.invalid_discount"))
        ));
        assert!(matches!(
            compute_totals(dec("50"), dec("-1"), Decimal::ZERO),
            Err(AppError::BadRequest("invoice.invalid_discount"))
        ));
    }

    fn order(status: OrderStatus, invoice_id: Option<Uuid>) -> Order {
        Order {
            id: Uuid::new_v4(),
            chain_id: Uuid::new_v4(),
            store_id: Uuid::new_v4(),
            table_id: Some(Uuid::new_v4()),
            invoice_id,
            order_number: "ORD-20250114-0001".into(),
            status,
            subtotal: dec("25.00"),
            notes: None,
            created_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: None,
        }
    }

    #[test]
    fn table_without_open_orders_cannot_be_billed() {
        assert!(matches!(billable_orders(vec![]), Err(AppError::BadRequest("invoice.no_open_orders"))));

        let closed = vec![
            order(OrderStatus::Completed, None),
            order(OrderStatus::Cancelled, None),
            order(OrderStatus::Served, Some(Uuid::new_v4())),
        ];
        assert!(matches!(billable_orders(closed), Err(AppError::BadRequest("invoice.no_open_orders"))));
    }

    #[test]
    fn table_bill_keeps_only_uninvoiced_open_orders() {
        let open = order(OrderStatus::Served, None);
        let open_id = open.id;
        let billed = billable_orders(vec![
            order(OrderStatus::Completed, None),
            open,
            order(OrderStatus::Pending, Some(Uuid::new_v4())),
        ])
        .unwrap();
        assert_eq!(billed.len(), 1);
        assert_eq!(billed[0].id, open_id);
    }

    #[test]
    fn tax_rate_must_be_a_percentage() {
        assert!(compute_totals(dec("10"), Decimal::ZERO, dec("100")).is_ok());
        assert!(matches!(
            compute_totals(dec("10"), Decimal::ZERO, dec("100.5")),
            Err(AppError::BadRequest("invoice.invalid_tax_rate"))
        ));
    }
}
