// src/services/rbac_service.rs

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::json;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::{
    authz::{Action, Identity, PolicyEngine, Resource, ResourceKind},
    common::error::AppError,
    db::{AuditRepository, RbacRepository},
    models::rbac::{CreateRolePayload, Permission, PermissionGroup, Role, RoleResponse, UpdateRolePayload},
};

#[derive(Clone)]
pub struct RbacService {
    repo: RbacRepository,
    audit_repo: AuditRepository,
    policy: Arc<PolicyEngine>,
    pool: PgPool,
}

impl RbacService {
    pub fn new(repo: RbacRepository, audit_repo: AuditRepository, policy: Arc<PolicyEngine>, pool: PgPool) -> Self {
        Self { repo, audit_repo, policy, pool }
    }

    pub async fn list_roles(&self, identity: &Identity) -> Result<Vec<Role>, AppError> {
        self.policy
            .authorize(identity, &Resource::collection(ResourceKind::Role), Action::Read)?;
        self.repo.list_roles().await
    }

    pub async fn get_role(&self, identity: &Identity, id: Uuid) -> Result<RoleResponse, AppError> {
        let role = self.find_role(id).await?;
        self.policy
            .authorize(identity, &role_resource(&role), Action::Read)?;

        let permissions = self.repo.permission_codes_for_role(&self.pool, role.id).await?;
        Ok(RoleResponse { role, permissions })
    }

    pub async fn create_role(&self, identity: &Identity, payload: CreateRolePayload) -> Result<RoleResponse, AppError> {
        self.policy
            .authorize(identity, &Resource::collection(ResourceKind::Role), Action::Create)?;
        ensure_grantable(identity, payload.level)?;

        // 1. Inicia Transação
        let mut tx = self.pool.begin().await?;

        // 2. Cria o Cargo
        let role = self
            .repo
            .create_role(&mut *tx, payload.code.trim(), &payload.name, payload.description.as_deref(), payload.level)
            .await?;

        // 3. Resolve códigos ("view_products") para ids e salva o vínculo
        let permissions = self.link_permissions(&mut tx, role.id, &payload.permissions).await?;

        self.audit_repo
            .record(
                &mut *tx,
                Some(identity.user_id),
                "CREATE_ROLE",
                "role",
                Some(role.id),
                Some(json!({ "code": role.code, "permissions": permissions })),
            )
            .await?;

        // 4. Commit
        tx.commit().await?;

        tracing::info!(user_id = %identity.user_id, "Cargo criado: {}", role.code);
        Ok(RoleResponse { role, permissions })
    }

    pub async fn update_role(&self, identity: &Identity, id: Uuid, payload: UpdateRolePayload) -> Result<Role, AppError> {
        let role = self.find_role(id).await?;
        self.policy
            .authorize(identity, &role_resource(&role), Action::Update)?;
        ensure_grantable(identity, role.level)?;
        if let Some(level) = payload.level {
            ensure_grantable(identity, level)?;
        }

        let mut tx = self.pool.begin().await?;
        let updated = self
            .repo
            .update_role(&mut *tx, id, payload.name.as_deref(), payload.description.as_deref(), payload.level)
            .await?;
        self.audit_repo
            .record(&mut *tx, Some(identity.user_id), "UPDATE_ROLE", "role", Some(id), None)
            .await?;
        tx.commit().await?;

        Ok(updated)
    }

    /// Substitui o conjunto de permissões do cargo (apaga e recria na mesma transação).
    pub async fn replace_permissions(&self, identity: &Identity, id: Uuid, codes: Vec<String>) -> Result<RoleResponse, AppError> {
        let role = self.find_role(id).await?;
        self.policy
            .authorize(identity, &role_resource(&role), Action::Update)?;
        ensure_grantable(identity, role.level)?;

        let mut tx = self.pool.begin().await?;
        self.repo.clear_permissions(&mut *tx, role.id).await?;
        let permissions = self.link_permissions(&mut tx, role.id, &codes).await?;
        self.audit_repo
            .record(
                &mut *tx,
                Some(identity.user_id),
                "REPLACE_ROLE_PERMISSIONS",
                "role",
                Some(role.id),
                Some(json!({ "permissions": permissions })),
            )
            .await?;
        tx.commit().await?;

        Ok(RoleResponse { role, permissions })
    }

    pub async fn delete_role(&self, identity: &Identity, id: Uuid) -> Result<(), AppError> {
        let role = self.find_role(id).await?;
        self.policy
            .authorize(identity, &role_resource(&role), Action::Delete)?;

        let mut tx = self.pool.begin().await?;
        if self.repo.role_in_use(&mut *tx, role.id).await? {
            return Err(AppError::Conflict("role.in_use"));
        }
        self.repo.delete_role(&mut *tx, role.id).await?;
        self.audit_repo
            .record(
                &mut *tx,
                Some(identity.user_id),
                "DELETE_ROLE",
                "role",
                Some(role.id),
                Some(json!({ "code": role.code })),
            )
            .await?;
        tx.commit().await?;

        tracing::info!(user_id = %identity.user_id, "Cargo removido: {}", role.code);
        Ok(())
    }

    // Listar todas as permissões disponíveis, agrupadas por módulo (para o Frontend montar a tela)
    pub async fn list_permissions(&self, identity: &Identity) -> Result<Vec<PermissionGroup>, AppError> {
        self.policy
            .authorize(identity, &Resource::collection(ResourceKind::Role), Action::Read)?;
        let permissions = self.repo.list_all_permissions().await?;
        Ok(group_by_module(permissions))
    }

    async fn find_role(&self, id: Uuid) -> Result<Role, AppError> {
        self.repo
            .find_role(&self.pool, id)
            .await?
            .ok_or(AppError::NotFound("role"))
    }

    async fn link_permissions(
        &self,
        conn: &mut PgConnection,
        role_id: Uuid,
        codes: &[String],
    ) -> Result<Vec<String>, AppError> {
        let wanted: BTreeSet<String> = codes.iter().map(|c| c.trim().to_string()).collect();
        if wanted.is_empty() {
            return Ok(Vec::new());
        }

        let wanted: Vec<String> = wanted.into_iter().collect();
        let permissions = self.repo.find_permissions_by_codes(&mut *conn, &wanted).await?;

        // Código desconhecido é erro do cliente, não é ignorado
        if permissions.len() != wanted.len() {
            return Err(AppError::BadRequest("role.unknown_permission"));
        }

        let ids: Vec<Uuid> = permissions.iter().map(|p| p.id).collect();
        self.repo.assign_permissions(&mut *conn, role_id, &ids).await?;
        Ok(permissions.into_iter().map(|p| p.code).collect())
    }
}

fn role_resource(role: &Role) -> Resource {
    Resource::collection(ResourceKind::Role).system(role.is_system)
}

pub(crate) fn ensure_grantable(identity: &Identity, level: i32) -> Result<(), AppError> {
    if identity.can_grant_level(level) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!("role level >= {}", identity.best_level().unwrap_or(i32::MAX))))
    }
}

pub fn group_by_module(permissions: Vec<Permission>) -> Vec<PermissionGroup> {
    let mut groups: BTreeMap<String, Vec<Permission>> = BTreeMap::new();
    for permission in permissions {
        groups.entry(permission.module.clone()).or_default().push(permission);
    }
    groups
        .into_iter()
        .map(|(module, permissions)| PermissionGroup { module, permissions })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::identity::fixtures::{grant, identity};

    fn permission(code: &str, module: &str) -> Permission {
        Permission {
            id: Uuid::new_v4(),
            code: code.into(),
            name: code.into(),
            module: module.into(),
        }
    }

    #[test]
    fn groups_permissions_by_module() {
        let groups = group_by_module(vec![
            permission("view_products", "CATALOG"),
            permission("view_orders", "ORDERS"),
            permission("manage_products", "CATALOG"),
        ]);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].module, "CATALOG");
        assert_eq!(groups[0].permissions.len(), 2);
        assert_eq!(groups[1].permissions[0].code, "view_orders");
    }

    #[test]
    fn refuses_to_create_more_privileged_roles() {
        let manager = identity(None, None, vec![grant("store_manager", 3, None, None)]);
        assert!(ensure_grantable(&manager, 4).is_ok());
        assert!(matches!(ensure_grantable(&manager, 1), Err(AppError::Forbidden(_))));
    }
}
