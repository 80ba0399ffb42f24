// src/services/user_service.rs

use std::sync::Arc;

use serde_json::json;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::{
    authz::{Action, Identity, PolicyEngine, Resource, ResourceKind, TenantScope},
    common::{
        db_utils::{PageParams, Paginated},
        error::AppError,
    },
    db::{user_repo::NewUser, AuditRepository, RbacRepository, TenantRepository, UserRepository},
    models::{
        auth::{User, UserStatus},
        rbac::{AssignRolePayload, GrantRow, UserRoleDetail},
        users::{CreateUserPayload, DeleteUserResponse, UpdateUserPayload, UserDetail, UserListQuery},
    },
    services::{auth::hash_password, rbac_service::ensure_grantable},
};

#[derive(Clone)]
pub struct UserService {
    user_repo: UserRepository,
    rbac_repo: RbacRepository,
    tenant_repo: TenantRepository,
    audit_repo: AuditRepository,
    policy: Arc<PolicyEngine>,
    pool: PgPool,
}

impl UserService {
    pub fn new(
        user_repo: UserRepository,
        rbac_repo: RbacRepository,
        tenant_repo: TenantRepository,
        audit_repo: AuditRepository,
        policy: Arc<PolicyEngine>,
        pool: PgPool,
    ) -> Self {
        Self { user_repo, rbac_repo, tenant_repo, audit_repo, policy, pool }
    }

    pub async fn list_users(
        &self,
        identity: &Identity,
        filter: &UserListQuery,
        page: PageParams,
    ) -> Result<Paginated<User>, AppError> {
        self.policy
            .authorize(identity, &Resource::collection(ResourceKind::User), Action::Read)?;

        let window = page.window();
        let scope = TenantScope::for_identity(identity);
        let (users, total) = self.user_repo.list(&scope, filter, window).await?;
        Ok(Paginated::new(users, total, window))
    }

    pub async fn get_user(&self, identity: &Identity, id: Uuid) -> Result<UserDetail, AppError> {
        let user = self.find_visible(identity, id).await?;
        self.policy.authorize(identity, &user_resource(&user), Action::Read)?;

        let roles = self.rbac_repo.list_user_roles(user.id, false).await?;
        Ok(UserDetail { user, roles })
    }

    pub async fn create_user(&self, identity: &Identity, payload: CreateUserPayload) -> Result<UserDetail, AppError> {
        // Quem não é super_admin só cria usuários dentro do próprio escopo
        let scope = TenantScope::for_identity(identity);
        let chain_id = payload.chain_id.or_else(|| scope.pinned_chain());
        let store_id = payload.store_id.or_else(|| scope.pinned_store());
        let (chain_id, store_id) = self.normalize_affiliation(chain_id, store_id).await?;

        self.policy.authorize(
            identity,
            &Resource::row(ResourceKind::User, chain_id, store_id),
            Action::Create,
        )?;

        let hashed = hash_password(payload.password.clone()).await?;

        let mut tx = self.pool.begin().await?;
        let user = self
            .user_repo
            .create_user(
                &mut *tx,
                NewUser {
                    username: payload.username.trim(),
                    email: payload.email.trim(),
                    password_hash: &hashed,
                    full_name: payload.full_name.as_deref(),
                    chain_id,
                    store_id,
                },
            )
            .await?;

        for assignment in &payload.roles {
            self.grant(&mut tx, identity, user.id, assignment).await?;
        }

        self.audit_repo
            .record(
                &mut *tx,
                Some(identity.user_id),
                "CREATE_USER",
                "user",
                Some(user.id),
                Some(json!({ "username": user.username, "roles": payload.roles.len() })),
            )
            .await?;
        tx.commit().await?;

        tracing::info!(user_id = %identity.user_id, "👤 Usuário criado: {}", user.username);
        let roles = self.rbac_repo.list_user_roles(user.id, false).await?;
        Ok(UserDetail { user, roles })
    }

    pub async fn update_user(&self, identity: &Identity, id: Uuid, payload: UpdateUserPayload) -> Result<User, AppError> {
        let user = self.find_visible(identity, id).await?;
        self.policy.authorize(identity, &self.target_resource(&user).await?, Action::Update)?;

        let affiliation = match requested_affiliation(&user, &payload) {
            Some((chain_id, store_id)) => {
                let (chain_id, store_id) = self.normalize_affiliation(chain_id, store_id).await?;
                // O novo destino também precisa estar ao alcance (usuário global: só super_admin)
                self.policy.authorize(
                    identity,
                    &Resource::row(ResourceKind::User, chain_id, store_id),
                    Action::Update,
                )?;
                Some((chain_id, store_id))
            }
            None => None,
        };

        let mut tx = self.pool.begin().await?;
        let updated = self
            .user_repo
            .update_profile(
                &mut *tx,
                id,
                payload.email.as_deref().map(str::trim),
                payload.full_name.as_deref(),
                affiliation,
            )
            .await?;
        self.audit_repo
            .record(&mut *tx, Some(identity.user_id), "UPDATE_USER", "user", Some(id), None)
            .await?;
        tx.commit().await?;

        Ok(updated)
    }

    pub async fn set_status(&self, identity: &Identity, id: Uuid, status: UserStatus) -> Result<User, AppError> {
        if id == identity.user_id {
            return Err(AppError::BadRequest("user.self_action"));
        }
        let user = self.find_visible(identity, id).await?;
        self.policy.authorize(identity, &self.target_resource(&user).await?, Action::Update)?;

        let mut tx = self.pool.begin().await?;
        let updated = self.user_repo.set_status(&mut *tx, id, status).await?;
        self.audit_repo
            .record(
                &mut *tx,
                Some(identity.user_id),
                "SET_USER_STATUS",
                "user",
                Some(id),
                Some(json!({ "from": user.status, "to": status })),
            )
            .await?;
        tx.commit().await?;

        tracing::info!(user_id = %identity.user_id, target = %id, "Status do usuário alterado para {:?}", status);
        Ok(updated)
    }

    /// Desbloqueio administrativo: zera o contador e o bloqueio.
    pub async fn unlock(&self, identity: &Identity, id: Uuid) -> Result<User, AppError> {
        let user = self.find_visible(identity, id).await?;
        self.policy.authorize(identity, &self.target_resource(&user).await?, Action::Update)?;

        let mut tx = self.pool.begin().await?;
        let updated = self.user_repo.clear_lock(&mut *tx, id).await?;
        self.audit_repo
            .record(&mut *tx, Some(identity.user_id), "UNLOCK_USER", "user", Some(id), None)
            .await?;
        tx.commit().await?;

        tracing::info!(user_id = %identity.user_id, target = %id, "🔓 Usuário desbloqueado");
        Ok(updated)
    }

    pub async fn reset_password(&self, identity: &Identity, id: Uuid, new_password: &str) -> Result<(), AppError> {
        let user = self.find_visible(identity, id).await?;
        self.policy.authorize(identity, &self.target_resource(&user).await?, Action::Update)?;

        let hashed = hash_password(new_password.to_owned()).await?;

        let mut tx = self.pool.begin().await?;
        self.user_repo.update_password(&mut *tx, id, &hashed).await?;
        self.audit_repo
            .record(&mut *tx, Some(identity.user_id), "RESET_PASSWORD", "user", Some(id), None)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Remove fisicamente quem não tem histórico; caso contrário desativa e revoga os cargos.
    pub async fn delete_user(&self, identity: &Identity, id: Uuid) -> Result<DeleteUserResponse, AppError> {
        if id == identity.user_id {
            return Err(AppError::BadRequest("user.self_action"));
        }
        let user = self.find_visible(identity, id).await?;
        self.policy.authorize(identity, &self.target_resource(&user).await?, Action::Delete)?;

        let mut tx = self.pool.begin().await?;
        let hard_deleted = if self.user_repo.has_history(&mut *tx, id).await? {
            self.user_repo.set_status(&mut *tx, id, UserStatus::Inactive).await?;
            self.rbac_repo.deactivate_all_for_user(&mut *tx, id).await?;
            false
        } else {
            self.user_repo.delete_user(&mut *tx, id).await?;
            true
        };
        self.audit_repo
            .record(
                &mut *tx,
                Some(identity.user_id),
                "DELETE_USER",
                "user",
                Some(id),
                Some(json!({ "username": user.username, "hardDeleted": hard_deleted })),
            )
            .await?;
        tx.commit().await?;

        Ok(DeleteUserResponse { id, hard_deleted })
    }

    // ---
    // Atribuições de cargos
    // ---

    pub async fn list_roles(&self, identity: &Identity, user_id: Uuid) -> Result<Vec<UserRoleDetail>, AppError> {
        let user = self.find_visible(identity, user_id).await?;
        self.policy.authorize(identity, &user_resource(&user), Action::Read)?;
        self.rbac_repo.list_user_roles(user.id, false).await
    }

    pub async fn assign_role(
        &self,
        identity: &Identity,
        user_id: Uuid,
        payload: AssignRolePayload,
    ) -> Result<UserRoleDetail, AppError> {
        let user = self.find_visible(identity, user_id).await?;
        self.policy.authorize(identity, &self.target_resource(&user).await?, Action::Update)?;

        let mut tx = self.pool.begin().await?;
        let assignment_id = self.grant(&mut tx, identity, user.id, &payload).await?;
        tx.commit().await?;

        self.rbac_repo
            .find_user_role(user.id, assignment_id)
            .await?
            .ok_or(AppError::NotFound("role_assignment"))
    }

    pub async fn deactivate_role(&self, identity: &Identity, user_id: Uuid, assignment_id: Uuid) -> Result<(), AppError> {
        let user = self.find_visible(identity, user_id).await?;
        self.policy.authorize(identity, &self.target_resource(&user).await?, Action::Update)?;

        let assignment = self
            .rbac_repo
            .find_user_role(user.id, assignment_id)
            .await?
            .ok_or(AppError::NotFound("role_assignment"))?;
        ensure_grantable(identity, assignment.level)?;

        let mut tx = self.pool.begin().await?;
        self.rbac_repo.deactivate_user_role(&mut *tx, user.id, assignment_id).await?;
        self.audit_repo
            .record(
                &mut *tx,
                Some(identity.user_id),
                "REVOKE_ROLE",
                "user",
                Some(user.id),
                Some(json!({ "assignmentId": assignment_id, "role": assignment.role_code })),
            )
            .await?;
        tx.commit().await?;

        tracing::info!(user_id = %identity.user_id, target = %user.id, "Cargo {} revogado", assignment.role_code);
        Ok(())
    }

    /// Valida e grava uma atribuição: o cargo não pode ser mais privilegiado que o do chamador
    /// e o escopo (rede/loja) precisa estar ao alcance dele.
    async fn grant(
        &self,
        conn: &mut PgConnection,
        identity: &Identity,
        user_id: Uuid,
        payload: &AssignRolePayload,
    ) -> Result<Uuid, AppError> {
        let role = self
            .rbac_repo
            .find_role(&mut *conn, payload.role_id)
            .await?
            .ok_or(AppError::NotFound("role"))?;
        ensure_grantable(identity, role.level)?;

        let (chain_id, store_id) = self.normalize_affiliation(payload.chain_id, payload.store_id).await?;
        if !identity.can_access_row(chain_id, store_id, true) {
            return Err(AppError::Forbidden("access to the target chain/store".into()));
        }

        let assignment_id = self
            .rbac_repo
            .assign_role(&mut *conn, user_id, role.id, chain_id, store_id, payload.expires_at, identity.user_id)
            .await?;

        self.audit_repo
            .record(
                &mut *conn,
                Some(identity.user_id),
                "ASSIGN_ROLE",
                "user",
                Some(user_id),
                Some(json!({ "role": role.code, "chainId": chain_id, "storeId": store_id })),
            )
            .await?;

        tracing::info!(user_id = %identity.user_id, target = %user_id, "Cargo {} atribuído", role.code);
        Ok(assignment_id)
    }

    /// Loja informada define a rede; rede divergente da loja é rejeitada.
    async fn normalize_affiliation(
        &self,
        chain_id: Option<Uuid>,
        store_id: Option<Uuid>,
    ) -> Result<(Option<Uuid>, Option<Uuid>), AppError> {
        match store_id {
            Some(store_id) => {
                let store = self
                    .tenant_repo
                    .find_store(store_id)
                    .await?
                    .ok_or(AppError::NotFound("store"))?;
                if chain_id.is_some_and(|c| c != store.chain_id) {
                    return Err(AppError::BadRequest("store.chain_mismatch"));
                }
                Ok((Some(store.chain_id), Some(store.id)))
            }
            None => {
                if let Some(chain_id) = chain_id {
                    self.tenant_repo
                        .find_chain(chain_id)
                        .await?
                        .ok_or(AppError::NotFound("chain"))?;
                }
                Ok((chain_id, None))
            }
        }
    }

    /// Recurso de escrita sobre um usuário: carrega o nível dos cargos ativos dele.
    async fn target_resource(&self, user: &User) -> Result<Resource, AppError> {
        let grants = self.rbac_repo.find_active_grants(user.id).await?;
        Ok(user_resource(user).held_at_level(best_level(&grants)))
    }

    /// Usuários fora do escopo (inclusive os globais, para quem não é super_admin) não existem.
    async fn find_visible(&self, identity: &Identity, id: Uuid) -> Result<User, AppError> {
        let user = self.user_repo.find_by_id(id).await?.ok_or(AppError::NotFound("user"))?;
        let visible = identity.is_super_admin()
            || user.id == identity.user_id
            || (user.chain_id.is_some() && identity.can_access_row(user.chain_id, user.store_id, false));
        if !visible {
            return Err(AppError::NotFound("user"));
        }
        Ok(user)
    }
}

/// Afiliação pedida numa edição: `None` mantém a atual. Sem `clear_affiliation`,
/// campos ausentes herdam o valor atual.
fn requested_affiliation(user: &User, payload: &UpdateUserPayload) -> Option<(Option<Uuid>, Option<Uuid>)> {
    if payload.clear_affiliation {
        return Some((payload.chain_id, payload.store_id));
    }
    if payload.chain_id.is_none() && payload.store_id.is_none() {
        return None;
    }
    Some((payload.chain_id.or(user.chain_id), payload.store_id.or(user.store_id)))
}

fn best_level(grants: &[GrantRow]) -> Option<i32> {
    grants.iter().map(|g| g.level).min()
}

fn user_resource(user: &User) -> Resource {
    Resource::row(ResourceKind::User, user.chain_id, user.store_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::identity::fixtures::{grant, identity};
    use chrono::Utc;

    fn grant_row(role: &str, level: i32, chain: Option<Uuid>, store: Option<Uuid>) -> GrantRow {
        GrantRow {
            assignment_id: Uuid::new_v4(),
            role_code: role.into(),
            level,
            chain_id: chain,
            store_id: store,
            permission_code: Some("view_orders".into()),
        }
    }

    fn pinned_user(chain: Uuid, store: Uuid) -> User {
        User {
            id: Uuid::new_v4(),
            username: "boss".into(),
            email: "boss@example.com".into(),
            password_hash: String::new(),
            full_name: None,
            status: UserStatus::Active,
            chain_id: Some(chain),
            store_id: Some(store),
            failed_login_attempts: 0,
            locked_until: None,
            last_login_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn store_manager_cannot_take_over_a_superior_pinned_to_the_same_store() {
        let chain = Uuid::new_v4();
        let store = Uuid::new_v4();
        let engine = PolicyEngine::standard();
        let mut manager = identity(Some(chain), Some(store), vec![grant("store_manager", 3, Some(chain), Some(store))]);
        manager.permissions.insert("manage_users".into());

        let boss = pinned_user(chain, store);
        let grants = vec![
            grant_row("chain_admin", 2, Some(chain), None),
            grant_row("chain_admin", 2, Some(chain), None),
            grant_row("waiter", 5, Some(chain), Some(store)),
        ];
        assert_eq!(best_level(&grants), Some(2));

        let target = user_resource(&boss).held_at_level(best_level(&grants));
        assert!(matches!(
            engine.authorize(&manager, &target, Action::Update),
            Err(AppError::Forbidden(_))
        ));

        let waiter = user_resource(&boss).held_at_level(best_level(&grants[2..]));
        assert!(engine.authorize(&manager, &waiter, Action::Update).is_ok());
        assert_eq!(best_level(&[]), None);
    }

    fn edit(chain: Option<Uuid>, store: Option<Uuid>, clear: bool) -> UpdateUserPayload {
        UpdateUserPayload {
            email: None,
            full_name: None,
            chain_id: chain,
            store_id: store,
            clear_affiliation: clear,
        }
    }

    #[test]
    fn affiliation_can_be_kept_merged_or_cleared() {
        let chain = Uuid::new_v4();
        let store = Uuid::new_v4();
        let user = pinned_user(chain, store);

        assert_eq!(requested_affiliation(&user, &edit(None, None, false)), None);

        let other_store = Uuid::new_v4();
        assert_eq!(
            requested_affiliation(&user, &edit(None, Some(other_store), false)),
            Some((Some(chain), Some(other_store)))
        );

        // Sobe para o nível da rede: loja vira nula
        assert_eq!(requested_affiliation(&user, &edit(Some(chain), None, true)), Some((Some(chain), None)));
        assert_eq!(requested_affiliation(&user, &edit(None, None, true)), Some((None, None)));
    }
}
