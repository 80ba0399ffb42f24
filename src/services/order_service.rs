// src/services/order_service.rs

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    authz::{Action, Identity, PolicyEngine, Resource, ResourceKind, TenantScope},
    common::{
        db_utils::{PageParams, Paginated},
        error::AppError,
    },
    db::{
        order_repo::{NewOrder, NewOrderItem},
        CatalogRepository, OrderRepository, TenantRepository,
    },
    models::{
        catalog::{Modifier, Product},
        orders::{
            CreateOrderPayload, CreateTablePayload, DiningTable, Order, OrderDetail, OrderItemDetail,
            OrderItemModifier, OrderItemPayload, OrderListQuery, OrderStatus, TableListQuery, TableStatus,
            UpdateTablePayload,
        },
        tenancy::Store,
    },
    services::realtime::{RealtimeEvent, RealtimeHub, ORDER_CREATED, ORDER_UPDATED, TABLE_UPDATE},
};

/// `ORD-20250114-` : o sequencial é reiniciado a cada dia, por loja.
pub fn day_prefix(kind: &str, date: NaiveDate) -> String {
    format!("{kind}-{}-", date.format("%Y%m%d"))
}

pub fn document_number(prefix: &str, sequence: i64) -> String {
    format!("{prefix}{sequence:04}")
}

/// Linha de pedido já precificada.
#[derive(Debug, Clone, PartialEq)]
pub struct PricedLine {
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub modifiers: Vec<(Uuid, String, Decimal)>,
    pub modifiers_total: Decimal,
    pub line_total: Decimal,
    pub notes: Option<String>,
}

/// (preço + soma dos modificadores) x quantidade
pub fn price_line(product: &Product, item: &OrderItemPayload, modifiers: &[&Modifier]) -> PricedLine {
    let modifiers_total: Decimal = modifiers.iter().map(|m| m.price).sum();
    PricedLine {
        product_id: product.id,
        product_name: product.name.clone(),
        quantity: item.quantity,
        unit_price: product.price,
        modifiers: modifiers.iter().map(|m| (m.id, m.name.clone(), m.price)).collect(),
        modifiers_total,
        line_total: (product.price + modifiers_total) * Decimal::from(item.quantity),
        notes: item.notes.clone(),
    }
}

/// Produto visível para uma loja: global, da rede ou da própria loja.
fn sold_in(product: &Product, store: &Store) -> bool {
    product.chain_id.is_none_or(|c| c == store.chain_id) && product.store_id.is_none_or(|s| s == store.id)
}

#[derive(Clone)]
pub struct OrderService {
    order_repo: OrderRepository,
    catalog_repo: CatalogRepository,
    tenant_repo: TenantRepository,
    policy: Arc<PolicyEngine>,
    realtime: RealtimeHub,
    pool: PgPool,
}

impl OrderService {
    pub fn new(
        order_repo: OrderRepository,
        catalog_repo: CatalogRepository,
        tenant_repo: TenantRepository,
        policy: Arc<PolicyEngine>,
        realtime: RealtimeHub,
        pool: PgPool,
    ) -> Self {
        Self { order_repo, catalog_repo, tenant_repo, policy, realtime, pool }
    }

    // =========================================================================
    //  MESAS
    // =========================================================================

    pub async fn list_tables(
        &self,
        identity: &Identity,
        filter: &TableListQuery,
        page: PageParams,
    ) -> Result<Paginated<DiningTable>, AppError> {
        self.policy
            .authorize(identity, &Resource::collection(ResourceKind::Table), Action::Read)?;

        let window = page.window();
        let scope = TenantScope::for_identity(identity);
        let (tables, total) = self.order_repo.list_tables(&scope, filter, window).await?;
        Ok(Paginated::new(tables, total, window))
    }

    pub async fn get_table(&self, identity: &Identity, id: Uuid) -> Result<DiningTable, AppError> {
        let table = self.find_table(id).await?;
        self.policy.authorize(identity, &table_resource(&table), Action::Read)?;
        Ok(table)
    }

    pub async fn create_table(&self, identity: &Identity, payload: CreateTablePayload) -> Result<DiningTable, AppError> {
        let store = self.find_store(payload.store_id).await?;
        self.policy.authorize(
            identity,
            &Resource::row(ResourceKind::Table, Some(store.chain_id), Some(store.id)),
            Action::Create,
        )?;

        let table = self
            .order_repo
            .create_table(store.chain_id, store.id, payload.name.trim(), payload.capacity)
            .await?;
        self.publish_table(&table);
        Ok(table)
    }

    pub async fn update_table(&self, identity: &Identity, id: Uuid, payload: UpdateTablePayload) -> Result<DiningTable, AppError> {
        let table = self.find_table(id).await?;
        self.policy.authorize(identity, &table_resource(&table), Action::Update)?;

        let table = self
            .order_repo
            .update_table(id, payload.name.as_deref().map(str::trim), payload.capacity)
            .await?;
        self.publish_table(&table);
        Ok(table)
    }

    pub async fn set_table_status(&self, identity: &Identity, id: Uuid, status: TableStatus) -> Result<DiningTable, AppError> {
        let table = self.find_table(id).await?;
        self.policy.authorize(identity, &table_resource(&table), Action::Update)?;

        let table = self.order_repo.set_table_status(&self.pool, id, status).await?;
        tracing::info!(user_id = %identity.user_id, table = %table.name, ?status, "Status da mesa alterado");
        self.publish_table(&table);
        Ok(table)
    }

    pub async fn delete_table(&self, identity: &Identity, id: Uuid) -> Result<(), AppError> {
        let table = self.find_table(id).await?;
        self.policy.authorize(identity, &table_resource(&table), Action::Delete)?;

        if self.order_repo.table_has_open_orders(&self.pool, id).await? {
            return Err(AppError::Conflict("table.has_open_orders"));
        }
        self.order_repo.delete_table(id).await
    }

    // =========================================================================
    //  PEDIDOS
    // =========================================================================

    pub async fn list_orders(
        &self,
        identity: &Identity,
        filter: &OrderListQuery,
        page: PageParams,
    ) -> Result<Paginated<Order>, AppError> {
        self.policy
            .authorize(identity, &Resource::collection(ResourceKind::Order), Action::Read)?;

        let window = page.window();
        let scope = TenantScope::for_identity(identity);
        let (orders, total) = self.order_repo.list_orders(&scope, filter, window).await?;
        Ok(Paginated::new(orders, total, window))
    }

    pub async fn get_order(&self, identity: &Identity, id: Uuid) -> Result<OrderDetail, AppError> {
        let order = self
            .order_repo
            .find_order(&self.pool, id)
            .await?
            .ok_or(AppError::NotFound("order"))?;
        self.policy.authorize(identity, &order_resource(&order), Action::Read)?;
        self.with_items(order).await
    }

    pub async fn create_order(&self, identity: &Identity, payload: CreateOrderPayload) -> Result<OrderDetail, AppError> {
        let store = self.find_store(payload.store_id).await?;
        self.policy.authorize(
            identity,
            &Resource::row(ResourceKind::Order, Some(store.chain_id), Some(store.id)),
            Action::Create,
        )?;

        let table = match payload.table_id {
            Some(table_id) => {
                let table = self.find_table(table_id).await?;
                if table.store_id != store.id {
                    return Err(AppError::BadRequest("table.wrong_store"));
                }
                Some(table)
            }
            None => None,
        };

        // 1. Carrega produtos e modificadores vinculados de uma vez
        let product_ids: Vec<Uuid> = payload
            .items
            .iter()
            .map(|i| i.product_id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let products: HashMap<Uuid, Product> = self
            .catalog_repo
            .find_products_by_ids(&self.pool, &product_ids)
            .await?
            .into_iter()
            .filter(|p| sold_in(p, &store))
            .map(|p| (p.id, p))
            .collect();

        let mut attached: HashMap<Uuid, Vec<Modifier>> = HashMap::new();
        for link in self.catalog_repo.modifiers_for_products(&self.pool, &product_ids).await? {
            attached.entry(link.product_id).or_default().push(link.modifier);
        }

        // 2. Precifica cada linha
        let mut lines = Vec::with_capacity(payload.items.len());
        for item in &payload.items {
            let product = products.get(&item.product_id).ok_or(AppError::NotFound("product"))?;
            if !product.is_available {
                return Err(AppError::BadRequest("product.unavailable"));
            }

            let options = attached.get(&product.id).map(Vec::as_slice).unwrap_or_default();
            let mut chosen = Vec::with_capacity(item.modifier_ids.len());
            for modifier_id in &item.modifier_ids {
                let modifier = options
                    .iter()
                    .find(|m| m.id == *modifier_id && m.is_active)
                    .ok_or(AppError::BadRequest("modifier.not_attached"))?;
                chosen.push(modifier);
            }
            lines.push(price_line(product, item, &chosen));
        }
        let subtotal: Decimal = lines.iter().map(|l| l.line_total).sum();

        // 3. Grava tudo na mesma transação
        let mut tx = self.pool.begin().await?;

        let prefix = day_prefix("ORD", Utc::now().date_naive());
        let sequence = self.order_repo.next_order_sequence(&mut *tx, store.id, &prefix).await?;
        let order_number = document_number(&prefix, sequence);

        let order = self
            .order_repo
            .insert_order(
                &mut *tx,
                NewOrder {
                    chain_id: store.chain_id,
                    store_id: store.id,
                    table_id: table.as_ref().map(|t| t.id),
                    order_number: &order_number,
                    subtotal,
                    notes: payload.notes.as_deref(),
                    created_by: identity.user_id,
                },
            )
            .await?;

        let mut items = Vec::with_capacity(lines.len());
        for line in &lines {
            let item = self
                .order_repo
                .insert_item(
                    &mut *tx,
                    NewOrderItem {
                        order_id: order.id,
                        product_id: line.product_id,
                        product_name: &line.product_name,
                        quantity: line.quantity,
                        unit_price: line.unit_price,
                        modifiers_total: line.modifiers_total,
                        line_total: line.line_total,
                        notes: line.notes.as_deref(),
                    },
                )
                .await?;

            let mut modifiers = Vec::with_capacity(line.modifiers.len());
            for (modifier_id, name, price) in &line.modifiers {
                modifiers.push(
                    self.order_repo
                        .insert_item_modifier(&mut *tx, item.id, *modifier_id, name, *price)
                        .await?,
                );
            }
            items.push(OrderItemDetail { item, modifiers });
        }

        let table = match table {
            Some(table) => Some(self.order_repo.set_table_status(&mut *tx, table.id, TableStatus::Occupied).await?),
            None => None,
        };

        tx.commit().await?;

        tracing::info!(
            user_id = %identity.user_id,
            store = %store.code,
            total = %order.subtotal,
            "🧾 Pedido criado: {}",
            order.order_number
        );

        // 4. Baixa de estoque fora da transação: falha não desfaz o pedido
        for line in &lines {
            let tracks_stock = products.get(&line.product_id).is_some_and(|p| p.track_stock);
            if !tracks_stock {
                continue;
            }
            if let Err(e) = self.catalog_repo.deduct_stock(&self.pool, line.product_id, line.quantity).await {
                tracing::warn!(
                    order = %order.order_number,
                    product_id = %line.product_id,
                    "Falha ao baixar estoque: {:?}",
                    e
                );
            }
        }

        let detail = OrderDetail { order, items };
        self.realtime.publish(RealtimeEvent::new(
            ORDER_CREATED,
            detail.order.chain_id,
            detail.order.store_id,
            &detail,
        ));
        if let Some(table) = &table {
            self.publish_table(table);
        }

        Ok(detail)
    }

    pub async fn update_status(&self, identity: &Identity, id: Uuid, next: OrderStatus) -> Result<Order, AppError> {
        let mut tx = self.pool.begin().await?;

        let order = self
            .order_repo
            .lock_order(&mut *tx, id)
            .await?
            .ok_or(AppError::NotFound("order"))?;
        self.policy.authorize(identity, &order_resource(&order), Action::Update)?;

        if !order.status.can_transition_to(next) {
            return Err(AppError::BadRequest("order.invalid_transition"));
        }

        let updated = self.order_repo.update_status(&mut *tx, id, next).await?;

        // Último pedido aberto encerrado: a mesa fica livre
        let mut freed_table = None;
        if let (true, Some(table_id)) = (next.is_terminal(), updated.table_id) {
            if !self.order_repo.table_has_open_orders(&mut *tx, table_id).await? {
                freed_table = Some(
                    self.order_repo
                        .set_table_status(&mut *tx, table_id, TableStatus::Available)
                        .await?,
                );
            }
        }

        tx.commit().await?;

        tracing::info!(
            user_id = %identity.user_id,
            from = ?order.status,
            to = ?next,
            "Pedido {} atualizado",
            updated.order_number
        );

        self.realtime.publish(RealtimeEvent::new(
            ORDER_UPDATED,
            updated.chain_id,
            updated.store_id,
            json!({ "orderId": updated.id, "orderNumber": updated.order_number, "status": updated.status }),
        ));
        if let Some(table) = &freed_table {
            self.publish_table(table);
        }

        Ok(updated)
    }

    // ---
    // Auxiliares
    // ---

    async fn with_items(&self, order: Order) -> Result<OrderDetail, AppError> {
        let items = self.order_repo.items_for_orders(&[order.id]).await?;
        let item_ids: Vec<Uuid> = items.iter().map(|i| i.id).collect();

        let mut modifiers: HashMap<Uuid, Vec<OrderItemModifier>> = HashMap::new();
        if !item_ids.is_empty() {
            for modifier in self.order_repo.modifiers_for_items(&item_ids).await? {
                modifiers.entry(modifier.order_item_id).or_default().push(modifier);
            }
        }

        let items = items
            .into_iter()
            .map(|item| OrderItemDetail {
                modifiers: modifiers.remove(&item.id).unwrap_or_default(),
                item,
            })
            .collect();
        Ok(OrderDetail { order, items })
    }

    fn publish_table(&self, table: &DiningTable) {
        self.realtime
            .publish(RealtimeEvent::new(TABLE_UPDATE, table.chain_id, table.store_id, table));
    }

    async fn find_table(&self, id: Uuid) -> Result<DiningTable, AppError> {
        self.order_repo
            .find_table(&self.pool, id)
            .await?
            .ok_or(AppError::NotFound("table"))
    }

    async fn find_store(&self, id: Uuid) -> Result<Store, AppError> {
        self.tenant_repo.find_store(id).await?.ok_or(AppError::NotFound("store"))
    }
}

fn table_resource(table: &DiningTable) -> Resource {
    Resource::row(ResourceKind::Table, Some(table.chain_id), Some(table.store_id))
}

fn order_resource(order: &Order) -> Resource {
    Resource::row(ResourceKind::Order, Some(order.chain_id), Some(order.store_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(raw: &str) -> Decimal {
        Decimal::from_str(raw).unwrap()
    }

    fn product(price: &str, chain: Option<Uuid>, store: Option<Uuid>) -> Product {
        Product {
            id: Uuid::new_v4(),
            chain_id: chain,
            store_id: store,
            category_id: None,
            sku: None,
            name: "X-Burger".into(),
            description: None,
            price: dec(price),
            image_url: None,
            is_available: true,
            track_stock: false,
            stock_quantity: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn modifier(name: &str, price: &str) -> Modifier {
        Modifier {
            id: Uuid::new_v4(),
            chain_id: None,
            store_id: None,
            name: name.into(),
            price: dec(price),
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn store(chain: Uuid) -> Store {
        Store {
            id: Uuid::new_v4(),
            chain_id: chain,
            code: "LJ01".into(),
            name: "Centro".into(),
            address: None,
            phone: None,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn numbers_are_daily_and_zero_padded() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 14).unwrap();
        let prefix = day_prefix("ORD", date);
        assert_eq!(prefix, "ORD-20250114-");
        assert_eq!(document_number(&prefix, 7), "ORD-20250114-0007");
        assert_eq!(document_number(&day_prefix("INV", date), 12345), "INV-20250114-12345");
    }

    #[test]
    fn line_total_includes_modifiers_times_quantity() {
        let burger = product("29.90", None, None);
        let bacon = modifier("Bacon", "4.50");
        let cheese = modifier("Queijo", "3.00");
        let item = OrderItemPayload {
            product_id: burger.id,
            quantity: 2,
            modifier_ids: vec![bacon.id, cheese.id],
            notes: Some("sem cebola".into()),
        };

        let line = price_line(&burger, &item, &[&bacon, &cheese]);
        assert_eq!(line.modifiers_total, dec("7.50"));
        assert_eq!(line.line_total, dec("74.80"));
        assert_eq!(line.modifiers.len(), 2);
        assert_eq!(line.notes.as_deref(), Some("sem cebola"));
    }

    #[test]
    fn only_global_chain_or_own_store_products_are_sold() {
        let chain = Uuid::new_v4();
        let here = store(chain);

        assert!(sold_in(&product("1", None, None), &here));
        assert!(sold_in(&product("1", Some(chain), None), &here));
        assert!(sold_in(&product("1", Some(chain), Some(here.id)), &here));
        assert!(!sold_in(&product("1", Some(chain), Some(Uuid::new_v4())), &here));
        assert!(!sold_in(&product("1", Some(Uuid::new_v4()), None), &here));
    }
}
