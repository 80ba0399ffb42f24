// src/handlers/reports.rs

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};

use crate::{
    common::error::ApiError,
    config::AppState,
    middleware::{
        auth::AuthenticatedUser,
        i18n::Locale,
        rbac::{PermViewReports, RequirePermission},
    },
    models::reports::{DailySummary, ReportQuery, RevenueReport, TopProductEntry},
};

// GET /api/reports/revenue
#[utoipa::path(
    get,
    path = "/api/reports/revenue",
    tag = "Reports",
    params(ReportQuery),
    responses(
        (status = 200, description = "Receita agrupada por dia, semana ou mês", body = RevenueReport),
        (status = 400, description = "Intervalo inválido"),
        (status = 403, description = "Sem permissão")
    ),
    security(("api_jwt" = []))
)]
pub async fn revenue(
    State(app_state): State<AppState>,
    locale: Locale,
    _guard: RequirePermission<PermViewReports>,
    AuthenticatedUser(identity): AuthenticatedUser,
    Query(query): Query<ReportQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let report = app_state
        .report_service
        .revenue(&identity, &query)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok(Json(report))
}

#[utoipa::path(
    get,
    path = "/api/reports/top-products",
    tag = "Reports",
    params(ReportQuery),
    responses((status = 200, description = "Produtos mais vendidos", body = Vec<TopProductEntry>)),
    security(("api_jwt" = []))
)]
pub async fn top_products(
    State(app_state): State<AppState>,
    locale: Locale,
    _guard: RequirePermission<PermViewReports>,
    AuthenticatedUser(identity): AuthenticatedUser,
    Query(query): Query<ReportQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let products = app_state
        .report_service
        .top_products(&identity, &query)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok(Json(products))
}

// GET /api/reports/summary (cards do painel)
#[utoipa::path(
    get,
    path = "/api/reports/summary",
    tag = "Reports",
    params(ReportQuery),
    responses((status = 200, description = "Resumo do dia", body = DailySummary)),
    security(("api_jwt" = []))
)]
pub async fn summary(
    State(app_state): State<AppState>,
    locale: Locale,
    _guard: RequirePermission<PermViewReports>,
    AuthenticatedUser(identity): AuthenticatedUser,
    Query(query): Query<ReportQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let summary = app_state
        .report_service
        .summary(&identity, query.store_id)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok(Json(summary))
}
