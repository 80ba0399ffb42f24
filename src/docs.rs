// src/docs.rs

use utoipa::OpenApi;
use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use crate::handlers;
use crate::models;

#[derive(OpenApi)]
#[openapi(
    paths(
        // --- Auth ---
        handlers::auth::login,
        handlers::auth::refresh,
        handlers::auth::get_me,
        handlers::auth::change_password,
        handlers::auth::logout,

        // --- RBAC ---
        handlers::rbac::list_roles,
        handlers::rbac::get_role,
        handlers::rbac::create_role,
        handlers::rbac::update_role,
        handlers::rbac::replace_permissions,
        handlers::rbac::delete_role,
        handlers::rbac::list_permissions,

        // --- Tenancy ---
        handlers::tenancy::list_chains,
        handlers::tenancy::get_chain,
        handlers::tenancy::create_chain,
        handlers::tenancy::update_chain,
        handlers::tenancy::delete_chain,
        handlers::tenancy::list_stores,
        handlers::tenancy::get_store,
        handlers::tenancy::create_store,
        handlers::tenancy::update_store,
        handlers::tenancy::delete_store,

        // --- Users ---
        handlers::users::list_users,
        handlers::users::get_user,
        handlers::users::create_user,
        handlers::users::update_user,
        handlers::users::set_user_status,
        handlers::users::unlock_user,
        handlers::users::reset_password,
        handlers::users::delete_user,
        handlers::users::list_user_roles,
        handlers::users::assign_role,
        handlers::users::remove_role,

        // --- Catalog ---
        handlers::catalog::list_categories,
        handlers::catalog::category_tree,
        handlers::catalog::get_category,
        handlers::catalog::create_category,
        handlers::catalog::update_category,
        handlers::catalog::delete_category,
        handlers::catalog::list_products,
        handlers::catalog::get_product,
        handlers::catalog::create_product,
        handlers::catalog::update_product,
        handlers::catalog::set_availability,
        handlers::catalog::replace_modifiers,
        handlers::catalog::delete_product,
        handlers::catalog::list_modifiers,
        handlers::catalog::get_modifier,
        handlers::catalog::create_modifier,
        handlers::catalog::update_modifier,
        handlers::catalog::delete_modifier,

        // --- Orders ---
        handlers::orders::list_tables,
        handlers::orders::get_table,
        handlers::orders::create_table,
        handlers::orders::update_table,
        handlers::orders::set_table_status,
        handlers::orders::delete_table,
        handlers::orders::list_orders,
        handlers::orders::get_order,
        handlers::orders::create_order,
        handlers::orders::update_order_status,

        // --- Invoices ---
        handlers::invoices::list_invoices,
        handlers::invoices::get_invoice,
        handlers::invoices::create_invoice,
        handlers::invoices::create_table_invoice,
        handlers::documents::invoice_pdf,

        // --- Reports ---
        handlers::reports::revenue,
        handlers::reports::top_products,
        handlers::reports::summary,

        // --- Realtime ---
        handlers::realtime::ws_handler,
    ),
    components(
        schemas(
            // --- Auth ---
            models::auth::UserStatus,
            models::auth::User,
            models::auth::LoginUserPayload,
            models::auth::RefreshTokenPayload,
            models::auth::ChangePasswordPayload,
            models::auth::AuthResponse,
            models::auth::MeResponse,

            // --- RBAC ---
            models::rbac::Role,
            models::rbac::Permission,
            models::rbac::PermissionGroup,
            models::rbac::UserRoleDetail,
            models::rbac::CreateRolePayload,
            models::rbac::UpdateRolePayload,
            models::rbac::ReplacePermissionsPayload,
            models::rbac::RoleResponse,
            models::rbac::AssignRolePayload,

            // --- Tenancy ---
            models::tenancy::Chain,
            models::tenancy::Store,
            models::tenancy::CreateChainPayload,
            models::tenancy::UpdateChainPayload,
            models::tenancy::CreateStorePayload,
            models::tenancy::UpdateStorePayload,

            // --- Users ---
            models::users::CreateUserPayload,
            models::users::UpdateUserPayload,
            models::users::UpdateUserStatusPayload,
            models::users::ResetPasswordPayload,
            models::users::UserDetail,
            models::users::DeleteUserResponse,

            // --- Catalog ---
            models::catalog::Category,
            models::catalog::CategoryWithCount,
            models::catalog::CategoryNode,
            models::catalog::CreateCategoryPayload,
            models::catalog::UpdateCategoryPayload,
            models::catalog::Product,
            models::catalog::ProductDetail,
            models::catalog::CreateProductPayload,
            models::catalog::UpdateProductPayload,
            models::catalog::AvailabilityPayload,
            models::catalog::ReplaceModifiersPayload,
            models::catalog::Modifier,
            models::catalog::CreateModifierPayload,
            models::catalog::UpdateModifierPayload,

            // --- Orders ---
            models::orders::TableStatus,
            models::orders::OrderStatus,
            models::orders::DiningTable,
            models::orders::CreateTablePayload,
            models::orders::UpdateTablePayload,
            models::orders::UpdateTableStatusPayload,
            models::orders::Order,
            models::orders::OrderItem,
            models::orders::OrderItemModifier,
            models::orders::OrderItemDetail,
            models::orders::OrderDetail,
            models::orders::OrderItemPayload,
            models::orders::CreateOrderPayload,
            models::orders::UpdateOrderStatusPayload,

            // --- Invoices ---
            models::invoices::PaymentMethod,
            models::invoices::Invoice,
            models::invoices::InvoiceDetail,
            models::invoices::BillingOptions,
            models::invoices::CreateInvoicePayload,
            models::invoices::CreateTableInvoicePayload,

            // --- Reports ---
            models::reports::Granularity,
            models::reports::RevenueBucket,
            models::reports::RevenueReport,
            models::reports::TopProductEntry,
            models::reports::DailySummary,
        )
    ),
    tags(
        (name = "Auth", description = "Login, refresh e sessão"),
        (name = "RBAC", description = "Controle de Acesso (Cargos e Permissões)"),
        (name = "Tenancy", description = "Redes e Lojas"),
        (name = "Users", description = "Gestão de Usuários e Atribuições"),
        (name = "Catalog", description = "Categorias, Produtos e Modificadores"),
        (name = "Orders", description = "Mesas e Pedidos"),
        (name = "Invoices", description = "Faturamento e PDF"),
        (name = "Reports", description = "Receita e Indicadores"),
        (name = "Realtime", description = "Eventos de mesa e pedido via WebSocket")
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "api_jwt",
            SecurityScheme::Http(
                Http::new(HttpAuthScheme::Bearer)
            ),
        );
    }
}
