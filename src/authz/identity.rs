// src/authz/identity.rs

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use uuid::Uuid;

use crate::models::{auth::User, rbac::GrantRow};

pub const SUPER_ADMIN: &str = "super_admin";

/// Nível a partir do qual um cargo alcança a rede inteira (chain_admin).
pub const CHAIN_WIDE_LEVEL: i32 = 2;

/// Uma atribuição de cargo ativa, já com o escopo em que vale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleGrant {
    pub role_code: String,
    pub level: i32,
    pub chain_id: Option<Uuid>,
    pub store_id: Option<Uuid>,
}

/// Identidade resolvida de quem faz a requisição: afiliação do usuário,
/// cargos ativos e o conjunto achatado de permissões.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: Uuid,
    pub username: String,
    pub chain_id: Option<Uuid>,
    pub store_id: Option<Uuid>,
    pub roles: Vec<RoleGrant>,
    pub permissions: BTreeSet<String>,
}

impl Identity {
    /// Monta a identidade a partir das linhas achatadas user_roles -> roles -> permissions.
    /// Uma atribuição aparece em várias linhas (uma por permissão); deduplicamos pelo id.
    pub fn resolve(user: &User, rows: Vec<GrantRow>) -> Self {
        let mut grants: BTreeMap<Uuid, RoleGrant> = BTreeMap::new();
        let mut permissions = BTreeSet::new();

        for row in rows {
            if let Some(code) = row.permission_code {
                permissions.insert(code);
            }
            grants.entry(row.assignment_id).or_insert(RoleGrant {
                role_code: row.role_code,
                level: row.level,
                chain_id: row.chain_id,
                store_id: row.store_id,
            });
        }

        let mut roles: Vec<RoleGrant> = grants.into_values().collect();
        roles.sort_by(|a, b| a.level.cmp(&b.level).then_with(|| a.role_code.cmp(&b.role_code)));

        Self {
            user_id: user.id,
            username: user.username.clone(),
            chain_id: user.chain_id,
            store_id: user.store_id,
            roles,
            permissions,
        }
    }

    pub fn is_super_admin(&self) -> bool {
        self.roles.iter().any(|r| r.role_code == SUPER_ADMIN)
    }

    pub fn has_permission(&self, code: &str) -> bool {
        self.is_super_admin() || self.permissions.contains(code)
    }

    pub fn has_any_role(&self, codes: &[&str]) -> bool {
        self.is_super_admin() || self.roles.iter().any(|r| codes.contains(&r.role_code.as_str()))
    }

    /// Nível mais privilegiado (menor número) entre os cargos ativos.
    pub fn best_level(&self) -> Option<i32> {
        self.roles.iter().map(|r| r.level).min()
    }

    /// Ninguém cria ou concede cargo mais privilegiado (nível menor) que o seu melhor.
    pub fn can_grant_level(&self, level: i32) -> bool {
        self.is_super_admin() || self.best_level().is_some_and(|best| level >= best)
    }

    pub fn can_access_chain(&self, chain_id: Uuid) -> bool {
        self.is_super_admin()
            || self.chain_id == Some(chain_id)
            || self.roles.iter().any(|r| r.chain_id == Some(chain_id))
    }

    /// Alcance de rede inteira: afiliado à rede sem loja fixa, ou cargo na rede sem loja.
    fn has_chain_level_access(&self, chain_id: Uuid) -> bool {
        (self.chain_id == Some(chain_id) && self.store_id.is_none())
            || self
                .roles
                .iter()
                .any(|r| r.chain_id == Some(chain_id) && r.store_id.is_none())
    }

    pub fn can_access_store(&self, store_id: Uuid, store_chain_id: Uuid) -> bool {
        if self.is_super_admin() || self.has_chain_level_access(store_chain_id) {
            return true;
        }
        if self.store_id == Some(store_id) {
            return true;
        }
        self.roles.iter().any(|r| {
            r.store_id == Some(store_id)
                || (r.level <= CHAIN_WIDE_LEVEL
                    && r.chain_id.or(self.chain_id) == Some(store_chain_id))
        })
    }

    /// Acesso a uma linha com escopo opcional. Linhas globais (sem rede) são legíveis por todos,
    /// mas só o super_admin as altera: quem decide isso é o chamador (`for_write`).
    pub fn can_access_row(&self, chain_id: Option<Uuid>, store_id: Option<Uuid>, for_write: bool) -> bool {
        match (chain_id, store_id) {
            (None, _) => !for_write || self.is_super_admin(),
            (Some(chain), None) => {
                if for_write {
                    self.is_super_admin() || self.has_chain_level_access(chain)
                } else {
                    self.can_access_chain(chain)
                }
            }
            (Some(chain), Some(store)) => self.can_access_store(store, chain),
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn identity(chain: Option<Uuid>, store: Option<Uuid>, roles: Vec<RoleGrant>) -> Identity {
        Identity {
            user_id: Uuid::new_v4(),
            username: "tester".into(),
            chain_id: chain,
            store_id: store,
            roles,
            permissions: BTreeSet::new(),
        }
    }

    pub fn grant(code: &str, level: i32, chain: Option<Uuid>, store: Option<Uuid>) -> RoleGrant {
        RoleGrant {
            role_code: code.into(),
            level,
            chain_id: chain,
            store_id: store,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::{grant, identity};
    use super::*;
    use crate::models::auth::UserStatus;
    use chrono::Utc;

    fn user(chain: Option<Uuid>, store: Option<Uuid>) -> User {
        User {
            id: Uuid::new_v4(),
            username: "mgr1".into(),
            email: "mgr1@example.com".into(),
            password_hash: String::new(),
            full_name: None,
            status: UserStatus::Active,
            chain_id: chain,
            store_id: store,
            failed_login_attempts: 0,
            locked_until: None,
            last_login_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn row(assignment: Uuid, role: &str, level: i32, perm: Option<&str>) -> GrantRow {
        GrantRow {
            assignment_id: assignment,
            role_code: role.into(),
            level,
            chain_id: None,
            store_id: None,
            permission_code: perm.map(String::from),
        }
    }

    #[test]
    fn resolve_deduplicates_grants_and_permissions() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let rows = vec![
            row(a, "store_manager", 3, Some("view_products")),
            row(a, "store_manager", 3, Some("manage_products")),
            row(b, "viewer", 5, Some("view_products")),
            row(b, "viewer", 5, None),
        ];

        let identity = Identity::resolve(&user(None, None), rows);
        assert_eq!(identity.roles.len(), 2);
        assert_eq!(identity.roles[0].role_code, "store_manager");
        assert_eq!(identity.permissions.len(), 2);
        assert_eq!(identity.best_level(), Some(3));
    }

    #[test]
    fn super_admin_has_every_permission() {
        let id = identity(None, None, vec![grant(SUPER_ADMIN, 1, None, None)]);
        assert!(id.has_permission("anything"));
        assert!(id.can_access_chain(Uuid::new_v4()));
        assert!(id.can_access_store(Uuid::new_v4(), Uuid::new_v4()));
    }

    #[test]
    fn chain_access_via_affiliation_or_grant() {
        let chain_a = Uuid::new_v4();
        let chain_b = Uuid::new_v4();
        let id = identity(Some(chain_a), None, vec![grant("viewer", 5, Some(chain_b), None)]);

        assert!(id.can_access_chain(chain_a));
        assert!(id.can_access_chain(chain_b));
        assert!(!id.can_access_chain(Uuid::new_v4()));
    }

    #[test]
    fn store_pinned_user_only_sees_own_store() {
        let chain = Uuid::new_v4();
        let store_a = Uuid::new_v4();
        let store_b = Uuid::new_v4();
        let id = identity(Some(chain), Some(store_a), vec![grant("waiter", 5, Some(chain), Some(store_a))]);

        assert!(id.can_access_store(store_a, chain));
        assert!(!id.can_access_store(store_b, chain));
    }

    #[test]
    fn chain_wide_level_reaches_every_store_of_its_chain() {
        let chain = Uuid::new_v4();
        let other_chain = Uuid::new_v4();
        let id = identity(None, None, vec![grant("chain_admin", 2, Some(chain), Some(Uuid::new_v4()))]);

        assert!(id.can_access_store(Uuid::new_v4(), chain));
        assert!(!id.can_access_store(Uuid::new_v4(), other_chain));
    }

    #[test]
    fn cannot_grant_above_own_level() {
        let id = identity(None, None, vec![grant("store_manager", 3, None, None)]);
        assert!(id.can_grant_level(3));
        assert!(id.can_grant_level(5));
        assert!(!id.can_grant_level(2));
        assert!(!identity(None, None, vec![]).can_grant_level(5));
    }

    #[test]
    fn global_rows_are_read_only_for_non_super_admins() {
        let chain = Uuid::new_v4();
        let id = identity(Some(chain), None, vec![grant("chain_admin", 2, Some(chain), None)]);

        assert!(id.can_access_row(None, None, false));
        assert!(!id.can_access_row(None, None, true));
        assert!(id.can_access_row(Some(chain), None, true));
    }
}
