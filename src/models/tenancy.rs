// src/models/tenancy.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

// ---
// 1. Chain (A "Rede")
// ---
// O tenant de topo: dona de uma ou mais lojas
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Chain {
    pub id: Uuid,
    #[schema(example = "BURGER-CO")]
    pub code: String,
    #[schema(example = "Burger Co.")]
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---
// 2. Store (A "Loja")
// ---
// Sempre pertence a exatamente uma rede
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Store {
    pub id: Uuid,
    pub chain_id: Uuid,
    #[schema(example = "CENTRO")]
    pub code: String,
    #[schema(example = "Loja Centro")]
    pub name: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateChainPayload {
    #[validate(length(min = 2, max = 50, message = "O código deve ter entre 2 e 50 caracteres."))]
    pub code: String,
    #[validate(length(min = 1, message = "O nome da rede é obrigatório."))]
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateChainPayload {
    #[validate(length(min = 1))]
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateStorePayload {
    pub chain_id: Uuid,
    #[validate(length(min = 1, max = 50, message = "O código da loja é obrigatório."))]
    pub code: String,
    #[validate(length(min = 1, message = "O nome da loja é obrigatório."))]
    pub name: String,
    pub address: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStorePayload {
    #[validate(length(min = 1))]
    pub name: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct TenancyListQuery {
    pub search: Option<String>,
    pub is_active: Option<bool>,
    pub chain_id: Option<Uuid>,
}
