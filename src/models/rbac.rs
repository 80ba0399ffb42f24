// src/models/rbac.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

// O que sai do banco (Tabela Roles)
#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    pub id: Uuid,

    #[schema(example = "store_manager")]
    pub code: String,

    #[schema(example = "Gerente de Loja")]
    pub name: String,

    pub description: Option<String>,

    /// Quanto menor, mais privilegiado (1 = super_admin)
    #[schema(example = 3)]
    pub level: i32,

    pub is_system: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// O que sai do banco (Tabela Permissions)
#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    pub id: Uuid,

    #[schema(example = "view_products")]
    pub code: String,

    #[schema(example = "Visualizar produtos")]
    pub name: String,

    #[schema(example = "CATALOG")]
    pub module: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PermissionGroup {
    pub module: String,
    pub permissions: Vec<Permission>,
}

// Linha "achatada" da consulta de atribuições ativas (user_roles -> roles -> permissions)
#[derive(Debug, Clone, FromRow)]
pub struct GrantRow {
    pub assignment_id: Uuid,
    pub role_code: String,
    pub level: i32,
    pub chain_id: Option<Uuid>,
    pub store_id: Option<Uuid>,
    pub permission_code: Option<String>,
}

// Atribuição de cargo com os dados do cargo
#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserRoleDetail {
    pub id: Uuid,
    pub user_id: Uuid,
    pub role_id: Uuid,
    pub role_code: String,
    pub role_name: String,
    pub level: i32,
    pub chain_id: Option<Uuid>,
    pub store_id: Option<Uuid>,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// O Payload para criar um cargo
#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateRolePayload {
    #[validate(length(min = 2, max = 100, message = "O código deve ter entre 2 e 100 caracteres."))]
    #[schema(example = "kitchen_lead")]
    pub code: String,

    #[validate(length(min = 1, message = "O nome é obrigatório."))]
    #[schema(example = "Chefe de Cozinha")]
    pub name: String,

    pub description: Option<String>,

    #[validate(range(min = 1, max = 99, message = "Nível deve estar entre 1 e 99."))]
    #[schema(example = 4)]
    pub level: i32,

    #[serde(default)]
    #[schema(example = json!(["view_orders", "manage_orders"]))]
    pub permissions: Vec<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRolePayload {
    #[validate(length(min = 1))]
    pub name: Option<String>,
    pub description: Option<String>,
    #[validate(range(min = 1, max = 99))]
    pub level: Option<i32>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReplacePermissionsPayload {
    #[schema(example = json!(["view_products"]))]
    pub permissions: Vec<String>,
}

// Resposta completa (Cargo + Lista de Permissões)
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoleResponse {
    #[serde(flatten)]
    pub role: Role,

    #[schema(example = json!(["view_products", "manage_products"]))]
    pub permissions: Vec<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssignRolePayload {
    pub role_id: Uuid,
    pub chain_id: Option<Uuid>,
    pub store_id: Option<Uuid>,
    pub expires_at: Option<DateTime<Utc>>,
}
