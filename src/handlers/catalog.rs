// src/handlers/catalog.rs

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
    middleware::{auth::AuthenticatedUser, i18n::Locale},
    models::catalog::{
        AvailabilityPayload, CatalogListQuery, Category, CategoryNode, CategoryWithCount, CreateCategoryPayload,
        CreateModifierPayload, CreateProductPayload, Modifier, Product, ProductDetail, ProductListQuery,
        ReplaceModifiersPayload, UpdateCategoryPayload, UpdateModifierPayload, UpdateProductPayload,
    },
};

// =============================================================================
//  1. CATEGORIAS
// =============================================================================

#[utoipa::path(
    get,
    path = "/api/categories",
    tag = "Catalog",
    params(CatalogListQuery, PageParams),
    responses((status = 200, description = "Categorias com contagem de produtos (paginado)", body = Paginated<CategoryWithCount>)),
    security(("api_jwt" = []))
)]
pub async fn list_categories(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(identity): AuthenticatedUser,
    Query(filter): Query<CatalogListQuery>,
    Query(page): Query<PageParams>,
) -> Result<impl IntoResponse, ApiError> {
    let categories = app_state
        .catalog_service
        .list_categories(&identity, &filter, page)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok(Json(categories))
}

// GET /api/categories/tree (árvore completa, órfãs sobem para a raiz)
#[utoipa::path(
    get,
    path = "/api/categories/tree",
    tag = "Catalog",
    responses((status = 200, description = "Árvore de categorias", body = Vec<CategoryNode>)),
    security(("api_jwt" = []))
)]
pub async fn category_tree(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(identity): AuthenticatedUser,
) -> Result<impl IntoResponse, ApiError> {
    let tree = app_state
        .catalog_service
        .category_tree(&identity)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok(Json(tree))
}

#[utoipa::path(
    get,
    path = "/api/categories/{id}",
    tag = "Catalog",
    params(("id" = Uuid, Path, description = "ID da Categoria")),
    responses(
        (status = 200, description = "Categoria", body = Category),
        (status = 404, description = "Categoria não encontrada")
    ),
    security(("api_jwt" = []))
)]
pub async fn get_category(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(identity): AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let category = app_state
        .catalog_service
        .get_category(&identity, id)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok(Json(category))
}

#[utoipa::path(
    post,
    path = "/api/categories",
    tag = "Catalog",
    request_body = CreateCategoryPayload,
    responses(
        (status = 201, description = "Categoria criada", body = Category),
        (status = 400, description = "Profundidade máxima excedida")
    ),
    security(("api_jwt" = []))
)]
pub async fn create_category(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(identity): AuthenticatedUser,
    Json(payload): Json<CreateCategoryPayload>,
) -> Result<impl IntoResponse, ApiError> {
    payload
        .validate()
        .map_err(|e| AppError::ValidationError(e).to_api_error(&locale, &app_state.i18n_store))?;

    let category = app_state
        .catalog_service
        .create_category(&identity, payload)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok((StatusCode::CREATED, Json(category)))
}

#[utoipa::path(
    patch,
    path = "/api/categories/{id}",
    tag = "Catalog",
    request_body = UpdateCategoryPayload,
    params(("id" = Uuid, Path, description = "ID da Categoria")),
    responses(
        (status = 200, description = "Categoria atualizada", body = Category),
        (status = 400, description = "Ciclo ou profundidade máxima excedida")
    ),
    security(("api_jwt" = []))
)]
pub async fn update_category(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(identity): AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateCategoryPayload>,
) -> Result<impl IntoResponse, ApiError> {
    payload
        .validate()
        .map_err(|e| AppError::ValidationError(e).to_api_error(&locale, &app_state.i18n_store))?;

    let category = app_state
        .catalog_service
        .update_category(&identity, id, payload)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok(Json(category))
}

#[utoipa::path(
    delete,
    path = "/api/categories/{id}",
    tag = "Catalog",
    params(("id" = Uuid, Path, description = "ID da Categoria")),
    responses(
        (status = 204, description = "Categoria removida"),
        (status = 400, description = "Categoria possui produtos ou subcategorias")
    ),
    security(("api_jwt" = []))
)]
pub async fn delete_category(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(identity): AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    app_state
        .catalog_service
        .delete_category(&identity, id)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
//  2. PRODUTOS
// =============================================================================

#[utoipa::path(
    get,
    path = "/api/products",
    tag = "Catalog",
    params(ProductListQuery, PageParams),
    responses((status = 200, description = "Produtos (paginado)", body = Paginated<Product>)),
    security(("api_jwt" = []))
)]
pub async fn list_products(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(identity): AuthenticatedUser,
    Query(filter): Query<ProductListQuery>,
    Query(page): Query<PageParams>,
) -> Result<impl IntoResponse, ApiError> {
    let products = app_state
        .catalog_service
        .list_products(&identity, &filter, page)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok(Json(products))
}

#[utoipa::path(
    get,
    path = "/api/products/{id}",
    tag = "Catalog",
    params(("id" = Uuid, Path, description = "ID do Produto")),
    responses(
        (status = 200, description = "Produto com modificadores", body = ProductDetail),
        (status = 404, description = "Produto não encontrado")
    ),
    security(("api_jwt" = []))
)]
pub async fn get_product(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(identity): AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let product = app_state
        .catalog_service
        .get_product(&identity, id)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok(Json(product))
}

#[utoipa::path(
    post,
    path = "/api/products",
    tag = "Catalog",
    request_body = CreateProductPayload,
    responses(
        (status = 201, description = "Produto criado", body = ProductDetail),
        (status = 409, description = "SKU já utilizado")
    ),
    security(("api_jwt" = []))
)]
pub async fn create_product(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(identity): AuthenticatedUser,
    Json(payload): Json<CreateProductPayload>,
) -> Result<impl IntoResponse, ApiError> {
    payload
        .validate()
        .map_err(|e| AppError::ValidationError(e).to_api_error(&locale, &app_state.i18n_store))?;

    let product = app_state
        .catalog_service
        .create_product(&identity, payload)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok((StatusCode::CREATED, Json(product)))
}

#[utoipa::path(
    patch,
    path = "/api/products/{id}",
    tag = "Catalog",
    request_body = UpdateProductPayload,
    params(("id" = Uuid, Path, description = "ID do Produto")),
    responses((status = 200, description = "Produto atualizado", body = Product)),
    security(("api_jwt" = []))
)]
pub async fn update_product(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(identity): AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateProductPayload>,
) -> Result<impl IntoResponse, ApiError> {
    payload
        .validate()
        .map_err(|e| AppError::ValidationError(e).to_api_error(&locale, &app_state.i18n_store))?;

    let product = app_state
        .catalog_service
        .update_product(&identity, id, payload)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok(Json(product))
}

// PATCH /api/products/{id}/availability (liga/desliga no cardápio)
#[utoipa::path(
    patch,
    path = "/api/products/{id}/availability",
    tag = "Catalog",
    request_body = AvailabilityPayload,
    params(("id" = Uuid, Path, description = "ID do Produto")),
    responses((status = 200, description = "Disponibilidade alterada", body = Product)),
    security(("api_jwt" = []))
)]
pub async fn set_availability(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(identity): AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<AvailabilityPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let product = app_state
        .catalog_service
        .set_availability(&identity, id, payload.is_available)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok(Json(product))
}

#[utoipa::path(
    put,
    path = "/api/products/{id}/modifiers",
    tag = "Catalog",
    request_body = ReplaceModifiersPayload,
    params(("id" = Uuid, Path, description = "ID do Produto")),
    responses(
        (status = 200, description = "Modificadores substituídos", body = ProductDetail),
        (status = 404, description = "Modificador não encontrado")
    ),
    security(("api_jwt" = []))
)]
pub async fn replace_modifiers(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(identity): AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReplaceModifiersPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let product = app_state
        .catalog_service
        .replace_modifiers(&identity, id, payload.modifier_ids)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok(Json(product))
}

#[utoipa::path(
    delete,
    path = "/api/products/{id}",
    tag = "Catalog",
    params(("id" = Uuid, Path, description = "ID do Produto")),
    responses((status = 204, description = "Produto removido")),
    security(("api_jwt" = []))
)]
pub async fn delete_product(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(identity): AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    app_state
        .catalog_service
        .delete_product(&identity, id)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
//  3. MODIFICADORES
// =============================================================================

#[utoipa::path(
    get,
    path = "/api/modifiers",
    tag = "Catalog",
    params(CatalogListQuery, PageParams),
    responses((status = 200, description = "Modificadores (paginado)", body = Paginated<Modifier>)),
    security(("api_jwt" = []))
)]
pub async fn list_modifiers(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(identity): AuthenticatedUser,
    Query(filter): Query<CatalogListQuery>,
    Query(page): Query<PageParams>,
) -> Result<impl IntoResponse, ApiError> {
    let modifiers = app_state
        .catalog_service
        .list_modifiers(&identity, &filter, page)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok(Json(modifiers))
}

#[utoipa::path(
    get,
    path = "/api/modifiers/{id}",
    tag = "Catalog",
    params(("id" = Uuid, Path, description = "ID do Modificador")),
    responses((status = 200, description = "Modificador", body = Modifier)),
    security(("api_jwt" = []))
)]
pub async fn get_modifier(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(identity): AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let modifier = app_state
        .catalog_service
        .get_modifier(&identity, id)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok(Json(modifier))
}

#[utoipa::path(
    post,
    path = "/api/modifiers",
    tag = "Catalog",
    request_body = CreateModifierPayload,
    responses((status = 201, description = "Modificador criado", body = Modifier)),
    security(("api_jwt" = []))
)]
pub async fn create_modifier(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(identity): AuthenticatedUser,
    Json(payload): Json<CreateModifierPayload>,
) -> Result<impl IntoResponse, ApiError> {
    payload
        .validate()
        .map_err(|e| AppError::ValidationError(e).to_api_error(&locale, &app_state.i18n_store))?;

    let modifier = app_state
        .catalog_service
        .create_modifier(&identity, payload)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok((StatusCode::CREATED, Json(modifier)))
}

#[utoipa::path(
    patch,
    path = "/api/modifiers/{id}",
    tag = "Catalog",
    request_body = UpdateModifierPayload,
    params(("id" = Uuid, Path, description = "ID do Modificador")),
    responses((status = 200, description = "Modificador atualizado", body = Modifier)),
    security(("api_jwt" = []))
)]
pub async fn update_modifier(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(identity): AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateModifierPayload>,
) -> Result<impl IntoResponse, ApiError> {
    payload
        .validate()
        .map_err(|e| AppError::ValidationError(e).to_api_error(&locale, &app_state.i18n_store))?;

    let modifier = app_state
        .catalog_service
        .update_modifier(&identity, id, payload)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok(Json(modifier))
}

#[utoipa::path(
    delete,
    path = "/api/modifiers/{id}",
    tag = "Catalog",
    params(("id" = Uuid, Path, description = "ID do Modificador")),
    responses(
        (status = 204, description = "Modificador removido"),
        (status = 409, description = "Modificador em uso por produtos")
    ),
    security(("api_jwt" = []))
)]
pub async fn delete_modifier(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(identity): AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    app_state
        .catalog_service
        .delete_modifier(&identity, id)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok(StatusCode::NO_CONTENT)
}
