// src/models/reports.rs

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    #[default]
    Day,
    Week,
    Month,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct ReportQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub group_by: Option<Granularity>,
    pub store_id: Option<Uuid>,
    pub limit: Option<i64>,
}

// Linha crua usada na agregação em memória
#[derive(Debug, Clone, FromRow)]
pub struct RevenueRow {
    pub created_at: DateTime<Utc>,
    pub total: Decimal,
}

// 1. Receita por período
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RevenueBucket {
    #[schema(example = "2025-01-14")]
    pub period: String,
    pub revenue: Decimal,
    pub invoice_count: i64,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RevenueReport {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub total_revenue: Decimal,
    pub buckets: Vec<RevenueBucket>,
}

// 2. Produtos mais vendidos
#[derive(Debug, Serialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TopProductEntry {
    pub product_id: Option<Uuid>,
    pub product_name: String,
    pub total_quantity: i64,
    pub total_revenue: Decimal,
}

// 3. Resumo do dia (os cards do topo)
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DailySummary {
    pub revenue_today: Decimal,
    pub invoices_today: i64,
    pub open_orders: i64,
    pub average_ticket: Decimal,
}
