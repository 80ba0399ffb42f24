// src/services/tenancy_service.rs

use std::sync::Arc;

use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    authz::{Action, Identity, PolicyEngine, Resource, ResourceKind, TenantScope},
    common::{
        db_utils::{PageParams, Paginated},
        error::AppError,
    },
    db::TenantRepository,
    models::tenancy::{
        Chain, CreateChainPayload, CreateStorePayload, Store, TenancyListQuery, UpdateChainPayload, UpdateStorePayload,
    },
};

#[derive(Clone)]
pub struct TenancyService {
    tenant_repo: TenantRepository,
    policy: Arc<PolicyEngine>,
    pool: PgPool,
}

impl TenancyService {
    pub fn new(tenant_repo: TenantRepository, policy: Arc<PolicyEngine>, pool: PgPool) -> Self {
        Self { tenant_repo, policy, pool }
    }

    // =========================================================================
    //  REDES
    // =========================================================================

    pub async fn list_chains(
        &self,
        identity: &Identity,
        filter: &TenancyListQuery,
        page: PageParams,
    ) -> Result<Paginated<Chain>, AppError> {
        self.policy
            .authorize(identity, &Resource::collection(ResourceKind::Chain), Action::Read)?;

        let window = page.window();
        let scope = TenantScope::for_identity(identity);
        let (chains, total) = self.tenant_repo.list_chains(&scope, filter, window).await?;
        Ok(Paginated::new(chains, total, window))
    }

    pub async fn get_chain(&self, identity: &Identity, id: Uuid) -> Result<Chain, AppError> {
        let chain = self.find_chain(id).await?;
        self.policy.authorize(identity, &chain_resource(&chain), Action::Read)?;
        Ok(chain)
    }

    pub async fn create_chain(&self, identity: &Identity, payload: CreateChainPayload) -> Result<Chain, AppError> {
        self.policy
            .authorize(identity, &Resource::collection(ResourceKind::Chain), Action::Create)?;

        let chain = self
            .tenant_repo
            .create_chain(&self.pool, payload.code.trim(), &payload.name, payload.description.as_deref())
            .await?;

        tracing::info!(user_id = %identity.user_id, "🏢 Rede criada: {}", chain.code);
        Ok(chain)
    }

    pub async fn update_chain(&self, identity: &Identity, id: Uuid, payload: UpdateChainPayload) -> Result<Chain, AppError> {
        let chain = self.find_chain(id).await?;
        self.policy.authorize(identity, &chain_resource(&chain), Action::Update)?;

        self.tenant_repo
            .update_chain(&self.pool, id, payload.name.as_deref(), payload.description.as_deref(), payload.is_active)
            .await
    }

    pub async fn delete_chain(&self, identity: &Identity, id: Uuid) -> Result<(), AppError> {
        let chain = self.find_chain(id).await?;
        self.policy.authorize(identity, &chain_resource(&chain), Action::Delete)?;

        let mut tx = self.pool.begin().await?;
        if self.tenant_repo.chain_has_stores(&mut *tx, id).await? {
            return Err(AppError::Conflict("chain.has_stores"));
        }
        self.tenant_repo.delete_chain(&mut *tx, id).await?;
        tx.commit().await?;

        tracing::info!(user_id = %identity.user_id, "Rede removida: {}", chain.code);
        Ok(())
    }

    // =========================================================================
    //  LOJAS
    // =========================================================================

    pub async fn list_stores(
        &self,
        identity: &Identity,
        filter: &TenancyListQuery,
        page: PageParams,
    ) -> Result<Paginated<Store>, AppError> {
        self.policy
            .authorize(identity, &Resource::collection(ResourceKind::Store), Action::Read)?;

        let window = page.window();
        let scope = TenantScope::for_identity(identity);
        let (stores, total) = self.tenant_repo.list_stores(&scope, filter, window).await?;
        Ok(Paginated::new(stores, total, window))
    }

    pub async fn get_store(&self, identity: &Identity, id: Uuid) -> Result<Store, AppError> {
        let store = self.find_store(id).await?;
        self.policy.authorize(identity, &store_resource(&store), Action::Read)?;
        Ok(store)
    }

    pub async fn create_store(&self, identity: &Identity, payload: CreateStorePayload) -> Result<Store, AppError> {
        // A loja nasce dentro de uma rede que o chamador alcança
        let chain = self.find_chain(payload.chain_id).await?;
        self.policy.authorize(
            identity,
            &Resource::row(ResourceKind::Store, Some(chain.id), None),
            Action::Create,
        )?;

        let store = self
            .tenant_repo
            .create_store(
                &self.pool,
                chain.id,
                payload.code.trim(),
                &payload.name,
                payload.address.as_deref(),
                payload.phone.as_deref(),
            )
            .await?;

        tracing::info!(user_id = %identity.user_id, chain = %chain.code, "🏪 Loja criada: {}", store.code);
        Ok(store)
    }

    pub async fn update_store(&self, identity: &Identity, id: Uuid, payload: UpdateStorePayload) -> Result<Store, AppError> {
        let store = self.find_store(id).await?;
        self.policy.authorize(identity, &store_resource(&store), Action::Update)?;

        self.tenant_repo
            .update_store(
                &self.pool,
                id,
                payload.name.as_deref(),
                payload.address.as_deref(),
                payload.phone.as_deref(),
                payload.is_active,
            )
            .await
    }

    pub async fn delete_store(&self, identity: &Identity, id: Uuid) -> Result<(), AppError> {
        let store = self.find_store(id).await?;
        self.policy.authorize(identity, &store_resource(&store), Action::Delete)?;

        let mut tx = self.pool.begin().await?;
        if self.tenant_repo.store_has_orders(&mut *tx, id).await? {
            return Err(AppError::Conflict("store.has_orders"));
        }
        self.tenant_repo.delete_store(&mut *tx, id).await?;
        tx.commit().await?;

        tracing::info!(user_id = %identity.user_id, "Loja removida: {}", store.code);
        Ok(())
    }

    async fn find_chain(&self, id: Uuid) -> Result<Chain, AppError> {
        self.tenant_repo.find_chain(id).await?.ok_or(AppError::NotFound("chain"))
    }

    async fn find_store(&self, id: Uuid) -> Result<Store, AppError> {
        self.tenant_repo.find_store(id).await?.ok_or(AppError::NotFound("store"))
    }
}

fn chain_resource(chain: &Chain) -> Resource {
    Resource::row(ResourceKind::Chain, Some(chain.id), None)
}

fn store_resource(store: &Store) -> Resource {
    Resource::row(ResourceKind::Store, Some(store.chain_id), Some(store.id))
}
