// src/authz/policy.rs

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use crate::authz::identity::Identity;
use crate::common::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Chain,
    Store,
    User,
    Role,
    Table,
    Category,
    Product,
    Modifier,
    Order,
    Invoice,
    Report,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 11] = [
        ResourceKind::Chain,
        ResourceKind::Store,
        ResourceKind::User,
        ResourceKind::Role,
        ResourceKind::Table,
        ResourceKind::Category,
        ResourceKind::Product,
        ResourceKind::Modifier,
        ResourceKind::Order,
        ResourceKind::Invoice,
        ResourceKind::Report,
    ];

    /// Sufixo usado nos códigos de permissão (`view_<x>` / `manage_<x>`).
    pub fn permission_suffix(self) -> &'static str {
        match self {
            ResourceKind::Chain => "chains",
            ResourceKind::Store => "stores",
            ResourceKind::User => "users",
            ResourceKind::Role => "roles",
            ResourceKind::Table => "tables",
            ResourceKind::Category => "categories",
            ResourceKind::Product => "products",
            ResourceKind::Modifier => "modifiers",
            ResourceKind::Order => "orders",
            ResourceKind::Invoice => "invoices",
            ResourceKind::Report => "reports",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Read,
    Create,
    Update,
    Delete,
}

impl Action {
    pub fn is_write(self) -> bool {
        !matches!(self, Action::Read)
    }
}

/// O alvo de uma decisão: tipo + escopo da linha (quando existe).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resource {
    pub kind: ResourceKind,
    pub chain_id: Option<Uuid>,
    pub store_id: Option<Uuid>,
    pub is_system: bool,
    /// `false` para coleções (listagens), onde o escopo é aplicado depois pelo `TenantScope`.
    pub scoped: bool,
    /// Melhor nível (menor número) dos cargos ativos do usuário alvo, quando o recurso é um usuário.
    pub target_level: Option<i32>,
}

impl Resource {
    pub fn collection(kind: ResourceKind) -> Self {
        Self { kind, chain_id: None, store_id: None, is_system: false, scoped: false, target_level: None }
    }

    pub fn row(kind: ResourceKind, chain_id: Option<Uuid>, store_id: Option<Uuid>) -> Self {
        Self { kind, chain_id, store_id, is_system: false, scoped: true, target_level: None }
    }

    pub fn system(mut self, is_system: bool) -> Self {
        self.is_system = is_system;
        self
    }

    pub fn held_at_level(mut self, level: Option<i32>) -> Self {
        self.target_level = level;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(String),
}

pub struct PolicyContext<'a> {
    pub identity: &'a Identity,
    pub resource: &'a Resource,
    pub action: Action,
}

/// Predicado componível. `describe` entra na mensagem de negação.
pub trait Rule: Send + Sync {
    fn check(&self, ctx: &PolicyContext<'_>) -> bool;
    fn describe(&self) -> String;
}

pub type BoxedRule = Arc<dyn Rule>;

pub struct SuperAdmin;

impl Rule for SuperAdmin {
    fn check(&self, ctx: &PolicyContext<'_>) -> bool {
        ctx.identity.is_super_admin()
    }
    fn describe(&self) -> String {
        "super_admin".into()
    }
}

pub struct HasPermission(pub String);

impl Rule for HasPermission {
    fn check(&self, ctx: &PolicyContext<'_>) -> bool {
        ctx.identity.has_permission(&self.0)
    }
    fn describe(&self) -> String {
        format!("permission '{}'", self.0)
    }
}

pub struct HasRole(pub Vec<String>);

impl Rule for HasRole {
    fn check(&self, ctx: &PolicyContext<'_>) -> bool {
        let codes: Vec<&str> = self.0.iter().map(String::as_str).collect();
        ctx.identity.has_any_role(&codes)
    }
    fn describe(&self) -> String {
        format!("one of roles [{}]", self.0.join(", "))
    }
}

pub struct LevelAtMost(pub i32);

impl Rule for LevelAtMost {
    fn check(&self, ctx: &PolicyContext<'_>) -> bool {
        ctx.identity.best_level().is_some_and(|level| level <= self.0)
    }
    fn describe(&self) -> String {
        format!("role level <= {}", self.0)
    }
}

pub struct InTenantScope;

impl Rule for InTenantScope {
    fn check(&self, ctx: &PolicyContext<'_>) -> bool {
        if !ctx.resource.scoped {
            return true;
        }
        ctx.identity
            .can_access_row(ctx.resource.chain_id, ctx.resource.store_id, ctx.action.is_write())
    }
    fn describe(&self) -> String {
        "access to the target chain/store".into()
    }
}

pub struct NotSystem;

impl Rule for NotSystem {
    fn check(&self, ctx: &PolicyContext<'_>) -> bool {
        !ctx.resource.is_system
    }
    fn describe(&self) -> String {
        "a non-system resource".into()
    }
}

/// O alvo não pode ter cargo mais privilegiado que o melhor cargo do chamador.
pub struct OutranksTarget;

impl Rule for OutranksTarget {
    fn check(&self, ctx: &PolicyContext<'_>) -> bool {
        ctx.resource
            .target_level
            .is_none_or(|level| ctx.identity.can_grant_level(level))
    }
    fn describe(&self) -> String {
        "a role level at least as privileged as the target user".into()
    }
}

pub struct AllOf(pub Vec<BoxedRule>);

impl Rule for AllOf {
    fn check(&self, ctx: &PolicyContext<'_>) -> bool {
        self.0.iter().all(|r| r.check(ctx))
    }
    fn describe(&self) -> String {
        self.0.iter().map(|r| r.describe()).collect::<Vec<_>>().join(" and ")
    }
}

pub struct AnyOf(pub Vec<BoxedRule>);

impl Rule for AnyOf {
    fn check(&self, ctx: &PolicyContext<'_>) -> bool {
        self.0.iter().any(|r| r.check(ctx))
    }
    fn describe(&self) -> String {
        format!("({})", self.0.iter().map(|r| r.describe()).collect::<Vec<_>>().join(" or "))
    }
}

pub fn all(rules: Vec<BoxedRule>) -> BoxedRule {
    Arc::new(AllOf(rules))
}

pub fn any(rules: Vec<BoxedRule>) -> BoxedRule {
    Arc::new(AnyOf(rules))
}

pub fn permission(code: impl Into<String>) -> BoxedRule {
    Arc::new(HasPermission(code.into()))
}

pub fn super_admin() -> BoxedRule {
    Arc::new(SuperAdmin)
}

pub fn in_scope() -> BoxedRule {
    Arc::new(InTenantScope)
}

/// Ponto único de decisão: (identidade, recurso, ação) -> permitir/negar.
#[derive(Clone)]
pub struct PolicyEngine {
    rules: HashMap<(ResourceKind, Action), BoxedRule>,
}

impl fmt::Debug for PolicyEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyEngine").field("rules", &self.rules.len()).finish()
    }
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::standard()
    }
}

impl PolicyEngine {
    pub fn empty() -> Self {
        Self { rules: HashMap::new() }
    }

    /// Tabela padrão do POS:
    /// leitura exige `view_<recurso>` + escopo; escrita exige `manage_<recurso>` + escopo.
    pub fn standard() -> Self {
        let mut engine = Self::empty();

        for kind in ResourceKind::ALL {
            let suffix = kind.permission_suffix();
            engine = engine.with_rule(kind, Action::Read, all(vec![permission(format!("view_{suffix}")), in_scope()]));
            for action in [Action::Create, Action::Update, Action::Delete] {
                engine = engine.with_rule(kind, action, all(vec![permission(format!("manage_{suffix}")), in_scope()]));
            }
        }

        // Redes só nascem e morrem pela mão do super_admin
        engine = engine
            .with_rule(ResourceKind::Chain, Action::Create, super_admin())
            .with_rule(ResourceKind::Chain, Action::Delete, super_admin());

        // Alterar, bloquear, trocar senha ou remover um usuário exige hierarquia sobre ele
        for action in [Action::Update, Action::Delete] {
            engine = engine.with_rule(
                ResourceKind::User,
                action,
                all(vec![permission("manage_users"), in_scope(), Arc::new(OutranksTarget)]),
            );
        }

        // Cargos de sistema: só o super_admin altera ou remove
        let role_write = any(vec![
            super_admin(),
            all(vec![permission("manage_roles"), Arc::new(NotSystem)]),
        ]);
        engine
            .with_rule(ResourceKind::Role, Action::Update, role_write.clone())
            .with_rule(ResourceKind::Role, Action::Delete, role_write)
    }

    pub fn with_rule(mut self, kind: ResourceKind, action: Action, rule: BoxedRule) -> Self {
        self.rules.insert((kind, action), rule);
        self
    }

    pub fn evaluate(&self, identity: &Identity, resource: &Resource, action: Action) -> Decision {
        // Sem regra cadastrada: nega
        let Some(rule) = self.rules.get(&(resource.kind, action)) else {
            return Decision::Deny(format!("no rule for {:?}:{:?}", resource.kind, action));
        };

        let ctx = PolicyContext { identity, resource, action };
        if rule.check(&ctx) {
            Decision::Allow
        } else {
            Decision::Deny(rule.describe())
        }
    }

    pub fn authorize(&self, identity: &Identity, resource: &Resource, action: Action) -> Result<(), AppError> {
        match self.evaluate(identity, resource, action) {
            Decision::Allow => Ok(()),
            Decision::Deny(reason) => {
                tracing::debug!(
                    user_id = %identity.user_id,
                    ?action,
                    kind = ?resource.kind,
                    "Acesso negado: requer {}",
                    reason
                );
                Err(AppError::Forbidden(reason))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::identity::fixtures::{grant, identity};
    use crate::authz::identity::SUPER_ADMIN;

    fn with_perms(mut id: Identity, perms: &[&str]) -> Identity {
        id.permissions = perms.iter().map(|p| p.to_string()).collect();
        id
    }

    #[test]
    fn read_requires_view_permission_and_scope() {
        let engine = PolicyEngine::standard();
        let chain = Uuid::new_v4();
        let id = with_perms(
            identity(Some(chain), None, vec![grant("viewer", 5, Some(chain), None)]),
            &["view_products"],
        );

        let own = Resource::row(ResourceKind::Product, Some(chain), None);
        let foreign = Resource::row(ResourceKind::Product, Some(Uuid::new_v4()), None);
        let global = Resource::row(ResourceKind::Product, None, None);

        assert_eq!(engine.evaluate(&id, &own, Action::Read), Decision::Allow);
        assert_eq!(engine.evaluate(&id, &global, Action::Read), Decision::Allow);
        assert!(matches!(engine.evaluate(&id, &foreign, Action::Read), Decision::Deny(_)));
        assert!(matches!(engine.evaluate(&id, &own, Action::Update), Decision::Deny(_)));
    }

    #[test]
    fn global_catalog_is_writable_only_by_super_admin() {
        let engine = PolicyEngine::standard();
        let chain = Uuid::new_v4();
        let manager = with_perms(
            identity(Some(chain), None, vec![grant("chain_admin", 2, Some(chain), None)]),
            &["manage_products"],
        );
        let admin = identity(None, None, vec![grant(SUPER_ADMIN, 1, None, None)]);
        let global = Resource::row(ResourceKind::Product, None, None);

        assert!(engine.authorize(&manager, &global, Action::Update).is_err());
        assert!(engine.authorize(&admin, &global, Action::Update).is_ok());
    }

    #[test]
    fn system_roles_are_protected() {
        let engine = PolicyEngine::standard();
        let chain = Uuid::new_v4();
        let manager = with_perms(
            identity(Some(chain), None, vec![grant("chain_admin", 2, Some(chain), None)]),
            &["manage_roles"],
        );
        let system_role = Resource::collection(ResourceKind::Role).system(true);
        let custom_role = Resource::collection(ResourceKind::Role);

        assert!(matches!(engine.evaluate(&manager, &system_role, Action::Delete), Decision::Deny(_)));
        assert_eq!(engine.evaluate(&manager, &custom_role, Action::Delete), Decision::Allow);
    }

    #[test]
    fn only_super_admin_creates_chains() {
        let engine = PolicyEngine::standard();
        let manager = with_perms(identity(None, None, vec![]), &["manage_chains"]);
        let err = engine
            .authorize(&manager, &Resource::collection(ResourceKind::Chain), Action::Create)
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(reason) if reason == "super_admin"));
    }

    #[test]
    fn user_writes_require_outranking_the_target() {
        let engine = PolicyEngine::standard();
        let chain = Uuid::new_v4();
        let store = Uuid::new_v4();
        let manager = with_perms(
            identity(Some(chain), Some(store), vec![grant("store_manager", 3, Some(chain), Some(store))]),
            &["manage_users"],
        );
        let admin = identity(None, None, vec![grant(SUPER_ADMIN, 1, None, None)]);
        let pinned = Resource::row(ResourceKind::User, Some(chain), Some(store));

        let chain_admin = pinned.held_at_level(Some(2));
        let super_admin = pinned.held_at_level(Some(1));
        let waiter = pinned.held_at_level(Some(5));
        let peer = pinned.held_at_level(Some(3));
        let no_roles = pinned.held_at_level(None);

        for action in [Action::Update, Action::Delete] {
            assert!(engine.authorize(&manager, &chain_admin, action).is_err());
            assert!(engine.authorize(&manager, &super_admin, action).is_err());
            assert_eq!(engine.evaluate(&manager, &waiter, action), Decision::Allow);
            assert_eq!(engine.evaluate(&manager, &peer, action), Decision::Allow);
            assert_eq!(engine.evaluate(&manager, &no_roles, action), Decision::Allow);
            assert_eq!(engine.evaluate(&admin, &super_admin, action), Decision::Allow);
        }
        // Leitura não depende da hierarquia
        let viewer = with_perms(manager.clone(), &["view_users"]);
        assert_eq!(engine.evaluate(&viewer, &super_admin, Action::Read), Decision::Allow);
    }

    #[test]
    fn composes_custom_rules() {
        let engine = PolicyEngine::empty().with_rule(
            ResourceKind::Report,
            Action::Read,
            any(vec![Arc::new(LevelAtMost(3)), Arc::new(HasRole(vec!["auditor".into()]))]),
        );
        let manager = identity(None, None, vec![grant("store_manager", 3, None, None)]);
        let waiter = identity(None, None, vec![grant("waiter", 5, None, None)]);
        let auditor = identity(None, None, vec![grant("auditor", 9, None, None)]);
        let report = Resource::collection(ResourceKind::Report);

        assert_eq!(engine.evaluate(&manager, &report, Action::Read), Decision::Allow);
        assert_eq!(engine.evaluate(&auditor, &report, Action::Read), Decision::Allow);
        assert!(matches!(engine.evaluate(&waiter, &report, Action::Read), Decision::Deny(_)));
        assert!(matches!(engine.evaluate(&manager, &report, Action::Delete), Decision::Deny(_)));
    }
}
