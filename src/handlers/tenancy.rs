// src/handlers/tenancy.rs

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    common::{
        db_utils::{PageParams, Paginated},
        error::{ApiError, AppError},
    },
    config::AppState,
    middleware::{
        auth::AuthenticatedUser,
        i18n::Locale,
        rbac::{ChainManagement, RequireRole, SuperAdminOnly},
    },
    models::tenancy::{
        Chain, CreateChainPayload, CreateStorePayload, Store, TenancyListQuery, UpdateChainPayload, UpdateStorePayload,
    },
};

// =============================================================================
//  1. REDES
// =============================================================================

#[utoipa::path(
    get,
    path = "/api/chains",
    tag = "Tenancy",
    params(TenancyListQuery, PageParams),
    responses(
        (status = 200, description = "Redes visíveis para o usuário (paginado)", body = Paginated<Chain>),
        (status = 403, description = "Sem permissão")
    ),
    security(("api_jwt" = []))
)]
pub async fn list_chains(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(identity): AuthenticatedUser,
    Query(filter): Query<TenancyListQuery>,
    Query(page): Query<PageParams>,
) -> Result<impl IntoResponse, ApiError> {
    let chains = app_state
        .tenancy_service
        .list_chains(&identity, &filter, page)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok(Json(chains))
}

#[utoipa::path(
    get,
    path = "/api/chains/{id}",
    tag = "Tenancy",
    params(("id" = Uuid, Path, description = "ID da Rede")),
    responses(
        (status = 200, description = "Rede", body = Chain),
        (status = 404, description = "Rede não encontrada")
    ),
    security(("api_jwt" = []))
)]
pub async fn get_chain(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(identity): AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let chain = app_state
        .tenancy_service
        .get_chain(&identity, id)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok(Json(chain))
}

// POST /api/chains (somente super_admin)
#[utoipa::path(
    post,
    path = "/api/chains",
    tag = "Tenancy",
    request_body = CreateChainPayload,
    responses(
        (status = 201, description = "Rede criada", body = Chain),
        (status = 403, description = "Somente super_admin"),
        (status = 409, description = "Código já utilizado")
    ),
    security(("api_jwt" = []))
)]
pub async fn create_chain(
    State(app_state): State<AppState>,
    locale: Locale,
    _guard: RequireRole<SuperAdminOnly>,
    AuthenticatedUser(identity): AuthenticatedUser,
    Json(payload): Json<CreateChainPayload>,
) -> Result<impl IntoResponse, ApiError> {
    payload
        .validate()
        .map_err(|e| AppError::ValidationError(e).to_api_error(&locale, &app_state.i18n_store))?;

    let chain = app_state
        .tenancy_service
        .create_chain(&identity, payload)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok((StatusCode::CREATED, Json(chain)))
}

#[utoipa::path(
    put,
    path = "/api/chains/{id}",
    tag = "Tenancy",
    request_body = UpdateChainPayload,
    params(("id" = Uuid, Path, description = "ID da Rede")),
    responses((status = 200, description = "Rede atualizada", body = Chain)),
    security(("api_jwt" = []))
)]
pub async fn update_chain(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(identity): AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateChainPayload>,
) -> Result<impl IntoResponse, ApiError> {
    payload
        .validate()
        .map_err(|e| AppError::ValidationError(e).to_api_error(&locale, &app_state.i18n_store))?;

    let chain = app_state
        .tenancy_service
        .update_chain(&identity, id, payload)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok(Json(chain))
}

#[utoipa::path(
    delete,
    path = "/api/chains/{id}",
    tag = "Tenancy",
    params(("id" = Uuid, Path, description = "ID da Rede")),
    responses(
        (status = 204, description = "Rede removida"),
        (status = 409, description = "A rede ainda possui lojas")
    ),
    security(("api_jwt" = []))
)]
pub async fn delete_chain(
    State(app_state): State<AppState>,
    locale: Locale,
    _guard: RequireRole<SuperAdminOnly>,
    AuthenticatedUser(identity): AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    app_state
        .tenancy_service
        .delete_chain(&identity, id)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
//  2. LOJAS
// =============================================================================

#[utoipa::path(
    get,
    path = "/api/stores-management",
    tag = "Tenancy",
    params(TenancyListQuery, PageParams),
    responses((status = 200, description = "Lojas no alcance do usuário (paginado)", body = Paginated<Store>)),
    security(("api_jwt" = []))
)]
pub async fn list_stores(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(identity): AuthenticatedUser,
    Query(filter): Query<TenancyListQuery>,
    Query(page): Query<PageParams>,
) -> Result<impl IntoResponse, ApiError> {
    let stores = app_state
        .tenancy_service
        .list_stores(&identity, &filter, page)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok(Json(stores))
}

#[utoipa::path(
    get,
    path = "/api/stores-management/{id}",
    tag = "Tenancy",
    params(("id" = Uuid, Path, description = "ID da Loja")),
    responses(
        (status = 200, description = "Loja", body = Store),
        (status = 404, description = "Loja não encontrada")
    ),
    security(("api_jwt" = []))
)]
pub async fn get_store(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(identity): AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let store = app_state
        .tenancy_service
        .get_store(&identity, id)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok(Json(store))
}

#[utoipa::path(
    post,
    path = "/api/stores-management",
    tag = "Tenancy",
    request_body = CreateStorePayload,
    responses(
        (status = 201, description = "Loja criada", body = Store),
        (status = 403, description = "Somente super_admin ou chain_admin"),
        (status = 409, description = "Código já utilizado na rede")
    ),
    security(("api_jwt" = []))
)]
pub async fn create_store(
    State(app_state): State<AppState>,
    locale: Locale,
    _guard: RequireRole<ChainManagement>,
    AuthenticatedUser(identity): AuthenticatedUser,
    Json(payload): Json<CreateStorePayload>,
) -> Result<impl IntoResponse, ApiError> {
    payload
        .validate()
        .map_err(|e| AppError::ValidationError(e).to_api_error(&locale, &app_state.i18n_store))?;

    let store = app_state
        .tenancy_service
        .create_store(&identity, payload)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok((StatusCode::CREATED, Json(store)))
}

#[utoipa::path(
    put,
    path = "/api/stores-management/{id}",
    tag = "Tenancy",
    request_body = UpdateStorePayload,
    params(("id" = Uuid, Path, description = "ID da Loja")),
    responses((status = 200, description = "Loja atualizada", body = Store)),
    security(("api_jwt" = []))
)]
pub async fn update_store(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(identity): AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStorePayload>,
) -> Result<impl IntoResponse, ApiError> {
    payload
        .validate()
        .map_err(|e| AppError::ValidationError(e).to_api_error(&locale, &app_state.i18n_store))?;

    let store = app_state
        .tenancy_service
        .update_store(&identity, id, payload)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok(Json(store))
}

#[utoipa::path(
    delete,
    path = "/api/stores-management/{id}",
    tag = "Tenancy",
    params(("id" = Uuid, Path, description = "ID da Loja")),
    responses(
        (status = 204, description = "Loja removida"),
        (status = 409, description = "A loja possui pedidos ou faturas")
    ),
    security(("api_jwt" = []))
)]
pub async fn delete_store(
    State(app_state): State<AppState>,
    locale: Locale,
    _guard: RequireRole<ChainManagement>,
    AuthenticatedUser(identity): AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    app_state
        .tenancy_service
        .delete_store(&identity, id)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok(StatusCode::NO_CONTENT)
}
