// src/handlers/orders.rs

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
    models::orders::{
        CreateOrderPayload, CreateTablePayload, DiningTable, Order, OrderDetail, OrderListQuery, TableListQuery,
        UpdateOrderStatusPayload, UpdateTablePayload, UpdateTableStatusPayload,
    },
};

// =============================================================================
//  1. MESAS
// =============================================================================

#[utoipa::path(
    get,
    path = "/api/tables",
    tag = "Orders",
    params(TableListQuery, PageParams),
    responses((status = 200, description = "Mesas (paginado)", body = Paginated<DiningTable>)),
    security(("api_jwt" = []))
)]
pub async fn list_tables(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(identity): AuthenticatedUser,
    Query(filter): Query<TableListQuery>,
    Query(page): Query<PageParams>,
) -> Result<impl IntoResponse, ApiError> {
    let tables = app_state
        .order_service
        .list_tables(&identity, &filter, page)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok(Json(tables))
}

#[utoipa::path(
    get,
    path = "/api/tables/{id}",
    tag = "Orders",
    params(("id" = Uuid, Path, description = "ID da Mesa")),
    responses(
        (status = 200, description = "Mesa", body = DiningTable),
        (status = 404, description = "Mesa não encontrada")
    ),
    security(("api_jwt" = []))
)]
pub async fn get_table(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(identity): AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let table = app_state
        .order_service
        .get_table(&identity, id)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok(Json(table))
}

#[utoipa::path(
    post,
    path = "/api/tables",
    tag = "Orders",
    request_body = CreateTablePayload,
    responses(
        (status = 201, description = "Mesa criada", body = DiningTable),
        (status = 409, description = "Número já utilizado na loja")
    ),
    security(("api_jwt" = []))
)]
pub async fn create_table(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(identity): AuthenticatedUser,
    Json(payload): Json<CreateTablePayload>,
) -> Result<impl IntoResponse, ApiError> {
    payload
        .validate()
        .map_err(|e| AppError::ValidationError(e).to_api_error(&locale, &app_state.i18n_store))?;

    let table = app_state
        .order_service
        .create_table(&identity, payload)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok((StatusCode::CREATED, Json(table)))
}

#[utoipa::path(
    patch,
    path = "/api/tables/{id}",
    tag = "Orders",
    request_body = UpdateTablePayload,
    params(("id" = Uuid, Path, description = "ID da Mesa")),
    responses((status = 200, description = "Mesa atualizada", body = DiningTable)),
    security(("api_jwt" = []))
)]
pub async fn update_table(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(identity): AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateTablePayload>,
) -> Result<impl IntoResponse, ApiError> {
    payload
        .validate()
        .map_err(|e| AppError::ValidationError(e).to_api_error(&locale, &app_state.i18n_store))?;

    let table = app_state
        .order_service
        .update_table(&identity, id, payload)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok(Json(table))
}

// PATCH /api/tables/{id}/status (avisa os painéis conectados)
#[utoipa::path(
    patch,
    path = "/api/tables/{id}/status",
    tag = "Orders",
    request_body = UpdateTableStatusPayload,
    params(("id" = Uuid, Path, description = "ID da Mesa")),
    responses((status = 200, description = "Status da mesa alterado", body = DiningTable)),
    security(("api_jwt" = []))
)]
pub async fn set_table_status(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(identity): AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateTableStatusPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let table = app_state
        .order_service
        .set_table_status(&identity, id, payload.status)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok(Json(table))
}

#[utoipa::path(
    delete,
    path = "/api/tables/{id}",
    tag = "Orders",
    params(("id" = Uuid, Path, description = "ID da Mesa")),
    responses(
        (status = 204, description = "Mesa removida"),
        (status = 409, description = "Mesa com pedidos em aberto")
    ),
    security(("api_jwt" = []))
)]
pub async fn delete_table(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(identity): AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    app_state
        .order_service
        .delete_table(&identity, id)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
//  2. PEDIDOS
// =============================================================================

#[utoipa::path(
    get,
    path = "/api/orders",
    tag = "Orders",
    params(OrderListQuery, PageParams),
    responses((status = 200, description = "Pedidos (paginado)", body = Paginated<Order>)),
    security(("api_jwt" = []))
)]
pub async fn list_orders(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(identity): AuthenticatedUser,
    Query(filter): Query<OrderListQuery>,
    Query(page): Query<PageParams>,
) -> Result<impl IntoResponse, ApiError> {
    let orders = app_state
        .order_service
        .list_orders(&identity, &filter, page)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok(Json(orders))
}

#[utoipa::path(
    get,
    path = "/api/orders/{id}",
    tag = "Orders",
    params(("id" = Uuid, Path, description = "ID do Pedido")),
    responses(
        (status = 200, description = "Pedido com itens e modificadores", body = OrderDetail),
        (status = 404, description = "Pedido não encontrado")
    ),
    security(("api_jwt" = []))
)]
pub async fn get_order(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(identity): AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let order = app_state
        .order_service
        .get_order(&identity, id)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok(Json(order))
}

// POST /api/orders (numera, precifica e ocupa a mesa)
#[utoipa::path(
    post,
    path = "/api/orders",
    tag = "Orders",
    request_body = CreateOrderPayload,
    responses(
        (status = 201, description = "Pedido criado", body = OrderDetail),
        (status = 400, description = "Produto indisponível, mesa de outra loja ou modificador inválido")
    ),
    security(("api_jwt" = []))
)]
pub async fn create_order(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(identity): AuthenticatedUser,
    Json(payload): Json<CreateOrderPayload>,
) -> Result<impl IntoResponse, ApiError> {
    payload
        .validate()
        .map_err(|e| AppError::ValidationError(e).to_api_error(&locale, &app_state.i18n_store))?;

    let order = app_state
        .order_service
        .create_order(&identity, payload)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok((StatusCode::CREATED, Json(order)))
}

#[utoipa::path(
    patch,
    path = "/api/orders/{id}/status",
    tag = "Orders",
    request_body = UpdateOrderStatusPayload,
    params(("id" = Uuid, Path, description = "ID do Pedido")),
    responses(
        (status = 200, description = "Status do pedido alterado", body = Order),
        (status = 400, description = "Transição inválida")
    ),
    security(("api_jwt" = []))
)]
pub async fn update_order_status(
    State(app_state): State<AppState>,
    locale: Locale,
    AuthenticatedUser(identity): AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateOrderStatusPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let order = app_state
        .order_service
        .update_status(&identity, id, payload.status)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok(Json(order))
}
