// src/models/catalog.rs

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Profundidade máxima da árvore de categorias (raiz, filha, neta).
pub const MAX_CATEGORY_DEPTH: usize = 3;

pub fn validate_not_negative(val: &Decimal) -> Result<(), ValidationError> {
    if val.is_sign_negative() {
        let mut err = ValidationError::new("range");
        err.message = Some("O valor não pode ser negativo.".into());
        return Err(err);
    }
    Ok(())
}

// --- 1. Categorias ---
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: Uuid,
    pub chain_id: Option<Uuid>,
    pub store_id: Option<Uuid>,
    pub parent_id: Option<Uuid>,
    #[schema(example = "Bebidas")]
    pub name: String,
    pub description: Option<String>,
    pub sort_order: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// Categoria com a contagem de produtos (para a listagem e para a regra de remoção)
#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CategoryWithCount {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub category: Category,
    pub product_count: i64,
    pub children_count: i64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CategoryNode {
    #[serde(flatten)]
    pub category: Category,
    #[schema(no_recursion)]
    pub children: Vec<CategoryNode>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateCategoryPayload {
    #[validate(length(min = 1, message = "O nome é obrigatório."))]
    pub name: String,
    pub description: Option<String>,
    pub parent_id: Option<Uuid>,
    #[serde(default)]
    pub sort_order: i32,
    pub chain_id: Option<Uuid>,
    pub store_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCategoryPayload {
    #[validate(length(min = 1))]
    pub name: Option<String>,
    pub description: Option<String>,
    /// `Some(None)` move a categoria para a raiz
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<Uuid>)]
    pub parent_id: Option<Option<Uuid>>,
    pub sort_order: Option<i32>,
    pub is_active: Option<bool>,
}

// --- 2. Produtos ---
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: Uuid,
    pub chain_id: Option<Uuid>,
    pub store_id: Option<Uuid>,
    pub category_id: Option<Uuid>,
    pub sku: Option<String>,
    #[schema(example = "X-Burger")]
    pub name: String,
    pub description: Option<String>,
    #[schema(example = 29.9)]
    pub price: Decimal,
    pub image_url: Option<String>,
    pub is_available: bool,
    pub track_stock: bool,
    pub stock_quantity: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProductDetail {
    #[serde(flatten)]
    pub product: Product,
    pub modifiers: Vec<Modifier>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateProductPayload {
    #[validate(length(min = 1, message = "O nome é obrigatório."))]
    pub name: String,
    pub sku: Option<String>,
    pub description: Option<String>,
    pub category_id: Option<Uuid>,
    #[validate(custom(function = "validate_not_negative"))]
    pub price: Decimal,
    pub image_url: Option<String>,
    #[serde(default = "default_true")]
    pub is_available: bool,
    #[serde(default)]
    pub track_stock: bool,
    #[serde(default)]
    #[validate(range(min = 0, message = "O estoque não pode ser negativo."))]
    pub stock_quantity: i32,
    #[serde(default)]
    pub modifier_ids: Vec<Uuid>,
    pub chain_id: Option<Uuid>,
    pub store_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProductPayload {
    #[validate(length(min = 1))]
    pub name: Option<String>,
    pub sku: Option<String>,
    pub description: Option<String>,
    pub category_id: Option<Uuid>,
    #[validate(custom(function = "validate_not_negative"))]
    pub price: Option<Decimal>,
    pub image_url: Option<String>,
    pub is_available: Option<bool>,
    pub track_stock: Option<bool>,
    #[validate(range(min = 0))]
    pub stock_quantity: Option<i32>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityPayload {
    pub is_available: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceModifiersPayload {
    pub modifier_ids: Vec<Uuid>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct ProductListQuery {
    pub search: Option<String>,
    pub category_id: Option<Uuid>,
    pub is_available: Option<bool>,
    pub store_id: Option<Uuid>,
}

// --- 3. Modificadores ---
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Modifier {
    pub id: Uuid,
    pub chain_id: Option<Uuid>,
    pub store_id: Option<Uuid>,
    #[schema(example = "Bacon extra")]
    pub name: String,
    #[schema(example = 4.5)]
    pub price: Decimal,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateModifierPayload {
    #[validate(length(min = 1, message = "O nome é obrigatório."))]
    pub name: String,
    #[validate(custom(function = "validate_not_negative"))]
    #[serde(default)]
    pub price: Decimal,
    pub chain_id: Option<Uuid>,
    pub store_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateModifierPayload {
    #[validate(length(min = 1))]
    pub name: Option<String>,
    #[validate(custom(function = "validate_not_negative"))]
    pub price: Option<Decimal>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct CatalogListQuery {
    pub search: Option<String>,
    pub parent_id: Option<Uuid>,
    pub is_active: Option<bool>,
}

fn default_true() -> bool {
    true
}

// Distingue campo ausente (None) de `null` explícito (Some(None))
fn double_option<'de, D>(deserializer: D) -> Result<Option<Option<Uuid>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<Uuid>::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_id_distinguishes_missing_from_null() {
        let missing: UpdateCategoryPayload = serde_json::from_str(r#"{"name":"x"}"#).unwrap();
        assert_eq!(missing.parent_id, None);

        let null: UpdateCategoryPayload = serde_json::from_str(r#"{"parentId":null}"#).unwrap();
        assert_eq!(null.parent_id, Some(None));
    }

    #[test]
    fn negative_price_is_rejected() {
        let payload = CreateModifierPayload {
            name: "Queijo".into(),
            price: Decimal::new(-100, 2),
            chain_id: None,
            store_id: None,
        };
        assert!(payload.validate().is_err());
    }
}
