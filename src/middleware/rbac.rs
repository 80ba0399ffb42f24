// src/middleware/rbac.rs

use std::marker::PhantomData;

use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};

use crate::{
    authz::Identity,
    common::error::{ApiError, AppError},
    config::AppState,
    middleware::i18n::Locale,
};

/// 1. O Trait que define o que é uma Permissão
pub trait PermissionDef: Send + Sync + 'static {
    fn code() -> &'static str;
}

/// Conjunto de cargos aceitos por uma rota
pub trait RoleDef: Send + Sync + 'static {
    fn codes() -> &'static [&'static str];
}

/// 2. Os Extractors (Guardiões). O super_admin sempre passa.
pub struct RequirePermission<T>(pub PhantomData<T>);

pub struct RequireRole<T>(pub PhantomData<T>);

// Rejeições já saem traduzidas
fn reject<S>(state: &S, parts: &Parts, err: AppError) -> ApiError
where
    AppState: FromRef<S>,
{
    let app_state = AppState::from_ref(state);
    err.to_api_error(&Locale::from_parts(parts), &app_state.i18n_store)
}

impl<T, S> FromRequestParts<S> for RequirePermission<T>
where
    T: PermissionDef,
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        // Identidade colocada pelo auth_guard
        let Some(identity) = parts.extensions.get::<Identity>() else {
            return Err(reject(state, parts, AppError::InvalidToken));
        };

        if !identity.has_permission(T::code()) {
            return Err(reject(state, parts, AppError::Forbidden(format!("permission:{}", T::code()))));
        }

        Ok(RequirePermission(PhantomData))
    }
}

impl<T, S> FromRequestParts<S> for RequireRole<T>
where
    T: RoleDef,
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Some(identity) = parts.extensions.get::<Identity>() else {
            return Err(reject(state, parts, AppError::InvalidToken));
        };

        if !identity.has_any_role(T::codes()) {
            return Err(reject(state, parts, AppError::Forbidden(format!("role:{}", T::codes().join("|")))));
        }

        Ok(RequireRole(PhantomData))
    }
}

// ---
// DEFINIÇÃO DAS PERMISSÕES E CARGOS (TIPOS)
// ---

pub struct PermViewReports;
impl PermissionDef for PermViewReports {
    fn code() -> &'static str { "view_reports" }
}

pub struct PermViewRoles;
impl PermissionDef for PermViewRoles {
    fn code() -> &'static str { "view_roles" }
}

pub struct PermManageUsers;
impl PermissionDef for PermManageUsers {
    fn code() -> &'static str { "manage_users" }
}

pub struct SuperAdminOnly;
impl RoleDef for SuperAdminOnly {
    fn codes() -> &'static [&'static str] { &["super_admin"] }
}

pub struct ChainManagement;
impl RoleDef for ChainManagement {
    fn codes() -> &'static [&'static str] { &["super_admin", "chain_admin"] }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::identity::fixtures::{grant, identity};
    use uuid::Uuid;

    #[test]
    fn permission_and_role_checks_follow_identity() {
        let chain = Uuid::new_v4();
        let mut manager = identity(Some(chain), None, vec![grant("chain_admin", 2, Some(chain), None)]);
        manager.permissions.insert("view_reports".into());

        assert!(manager.has_permission(PermViewReports::code()));
        assert!(!manager.has_permission(PermManageUsers::code()));
        assert!(manager.has_any_role(ChainManagement::codes()));
        assert!(!manager.has_any_role(SuperAdminOnly::codes()));

        let root = identity(None, None, vec![grant("super_admin", 0, None, None)]);
        assert!(root.has_permission(PermManageUsers::code()));
        assert!(root.has_any_role(SuperAdminOnly::codes()));
    }
}
