// src/models/users.rs

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::models::{
    auth::{User, UserStatus},
    rbac::{AssignRolePayload, UserRoleDetail},
};

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserPayload {
    #[validate(length(min = 3, max = 100, message = "O usuário deve ter entre 3 e 100 caracteres."))]
    pub username: String,
    #[validate(email(message = "O e-mail fornecido é inválido."))]
    pub email: String,
    #[validate(length(min = 8, message = "A senha deve ter no mínimo 8 caracteres."))]
    pub password: String,
    pub full_name: Option<String>,
    pub chain_id: Option<Uuid>,
    pub store_id: Option<Uuid>,
    /// Cargos atribuídos junto com a criação
    #[serde(default)]
    pub roles: Vec<AssignRolePayload>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserPayload {
    #[validate(email(message = "O e-mail fornecido é inválido."))]
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub chain_id: Option<Uuid>,
    pub store_id: Option<Uuid>,
    /// Com `true`, a afiliação passa a ser exatamente `chainId`/`storeId` (ausentes viram nulos).
    #[serde(default)]
    pub clear_affiliation: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserStatusPayload {
    pub status: UserStatus,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordPayload {
    #[validate(length(min = 8, message = "A senha deve ter no mínimo 8 caracteres."))]
    pub new_password: String,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct UserListQuery {
    pub search: Option<String>,
    pub status: Option<UserStatus>,
    pub chain_id: Option<Uuid>,
    pub store_id: Option<Uuid>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserDetail {
    #[serde(flatten)]
    pub user: User,
    pub roles: Vec<UserRoleDetail>,
}

/// Resultado da remoção: apagado de fato ou apenas desativado (usuário com histórico).
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeleteUserResponse {
    pub id: Uuid,
    pub hard_deleted: bool,
}
