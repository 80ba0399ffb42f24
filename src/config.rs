// src/config.rs

use std::{env, str::FromStr, sync::Arc, time::Duration};

use anyhow::{anyhow, Context};
use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::{
    authz::PolicyEngine,
    common::i18n::I18nStore,
    db::{
        AuditRepository, CatalogRepository, InvoiceRepository, OrderRepository, RbacRepository,
        ReportRepository, TenantRepository, UserRepository,
    },
    services::{
        auth::AuthService, catalog_service::CatalogService, document_service::DocumentService,
        invoice_service::InvoiceService, order_service::OrderService, rbac_service::RbacService,
        realtime::RealtimeHub, report_service::ReportService, tenancy_service::TenancyService,
        user_service::UserService,
    },
};

/// Configuração lida do ambiente (.env opcional).
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub jwt_secret: String,
    pub service_name: String,
    pub bind_addr: String,
    pub access_token_ttl_minutes: i64,
    pub refresh_token_ttl_days: i64,
    pub max_failed_logins: i32,
    pub lockout_minutes: i64,
    pub db_max_connections: u32,
    pub cors_origins: Vec<String>,
    pub fonts_dir: String,
    pub bootstrap_admin: Option<(String, String)>,
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Monta a configuração a partir de qualquer fonte chave -> valor.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| lookup(key).filter(|v| !v.is_empty()).ok_or_else(|| anyhow!("{key} deve ser definida"));

        let cors_origins = lookup("CORS_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let bootstrap_admin = match (lookup("BOOTSTRAP_ADMIN_USERNAME"), lookup("BOOTSTRAP_ADMIN_PASSWORD")) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => Some((user, pass)),
            _ => None,
        };

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            jwt_secret: required("JWT_SECRET")?,
            service_name: lookup("SERVICE_NAME").unwrap_or_else(|| "pos-backend".to_string()),
            bind_addr: lookup("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".to_string()),
            access_token_ttl_minutes: positive_or(&lookup, "ACCESS_TOKEN_TTL_MINUTES", 60)?,
            refresh_token_ttl_days: positive_or(&lookup, "REFRESH_TOKEN_TTL_DAYS", 7)?,
            max_failed_logins: positive_or(&lookup, "MAX_FAILED_LOGINS", 5)?,
            lockout_minutes: positive_or(&lookup, "LOCKOUT_MINUTES", 30)?,
            db_max_connections: positive_or(&lookup, "DB_MAX_CONNECTIONS", 10)?,
            cors_origins,
            fonts_dir: lookup("FONTS_DIR").unwrap_or_else(|| "./fonts".to_string()),
            bootstrap_admin,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} inválida: '{raw}'")),
        _ => Ok(default),
    }
}

/// Contadores, prazos e tamanhos de pool: zero ou negativo não faz sentido.
fn positive_or<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + PartialOrd + Default,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let value = parse_or(lookup, key, default)?;
    if value <= T::default() {
        return Err(anyhow!("{key} deve ser maior que zero"));
    }
    Ok(value)
}

#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub settings: Arc<Settings>,
    pub i18n_store: Arc<I18nStore>,
    pub policy: Arc<PolicyEngine>,
    pub realtime: RealtimeHub,

    pub auth_service: AuthService,
    pub rbac_service: RbacService,
    pub user_service: UserService,
    pub tenancy_service: TenancyService,
    pub catalog_service: CatalogService,
    pub order_service: OrderService,
    pub invoice_service: InvoiceService,
    pub report_service: ReportService,
    pub document_service: DocumentService,
}

impl AppState {
    pub async fn new(settings: Settings) -> anyhow::Result<Self> {
        // Conecta ao banco de dados, usando '?' para propagar erros
        let db_pool = PgPoolOptions::new()
            .max_connections(settings.db_max_connections)
            .acquire_timeout(Duration::from_secs(3))
            .connect(&settings.database_url)
            .await?;

        tracing::info!("✅ Conexão com o banco de dados estabelecida com sucesso!");

        Ok(Self::with_pool(db_pool, settings))
    }

    // --- Monta o gráfico de dependências ---
    pub fn with_pool(db_pool: PgPool, settings: Settings) -> Self {
        let settings = Arc::new(settings);
        let policy = Arc::new(PolicyEngine::standard());
        let realtime = RealtimeHub::new(256);

        let user_repo = UserRepository::new(db_pool.clone());
        let rbac_repo = RbacRepository::new(db_pool.clone());
        let tenant_repo = TenantRepository::new(db_pool.clone());
        let catalog_repo = CatalogRepository::new(db_pool.clone());
        let order_repo = OrderRepository::new(db_pool.clone());
        let invoice_repo = InvoiceRepository::new(db_pool.clone());
        let report_repo = ReportRepository::new(db_pool.clone());
        let audit_repo = AuditRepository::new();

        let auth_service = AuthService::new(
            user_repo.clone(),
            rbac_repo.clone(),
            audit_repo.clone(),
            settings.clone(),
            db_pool.clone(),
        );
        let rbac_service = RbacService::new(rbac_repo.clone(), audit_repo.clone(), policy.clone(), db_pool.clone());
        let user_service = UserService::new(
            user_repo,
            rbac_repo,
            tenant_repo.clone(),
            audit_repo,
            policy.clone(),
            db_pool.clone(),
        );
        let tenancy_service = TenancyService::new(tenant_repo.clone(), policy.clone(), db_pool.clone());
        let catalog_service = CatalogService::new(
            catalog_repo.clone(),
            tenant_repo.clone(),
            policy.clone(),
            db_pool.clone(),
        );
        let order_service = OrderService::new(
            order_repo.clone(),
            catalog_repo,
            tenant_repo.clone(),
            policy.clone(),
            realtime.clone(),
            db_pool.clone(),
        );
        let invoice_service = InvoiceService::new(
            invoice_repo.clone(),
            order_repo.clone(),
            policy.clone(),
            realtime.clone(),
            db_pool.clone(),
        );
        let report_service = ReportService::new(report_repo, tenant_repo.clone(), policy.clone());
        let document_service = DocumentService::new(
            invoice_repo,
            order_repo,
            tenant_repo,
            policy.clone(),
            settings.fonts_dir.clone(),
        );

        Self {
            db_pool,
            settings,
            i18n_store: Arc::new(I18nStore::load()),
            policy,
            realtime,
            auth_service,
            rbac_service,
            user_service,
            tenancy_service,
            catalog_service,
            order_service,
            invoice_service,
            report_service,
            document_service,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn applies_defaults() {
        let settings = Settings::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/pos"),
            ("JWT_SECRET", "secret"),
        ]))
        .unwrap();

        assert_eq!(settings.service_name, "pos-backend");
        assert_eq!(settings.max_failed_logins, 5);
        assert_eq!(settings.lockout_minutes, 30);
        assert!(settings.cors_origins.is_empty());
        assert!(settings.bootstrap_admin.is_none());
    }

    #[test]
    fn requires_secret_and_database() {
        let err = Settings::from_lookup(lookup(&[("DATABASE_URL", "postgres://x")])).unwrap_err();
        assert!(err.to_string().contains("JWT_SECRET"));
    }

    #[test]
    fn rejects_garbage_numbers_and_splits_origins() {
        let base = [
            ("DATABASE_URL", "postgres://x"),
            ("JWT_SECRET", "s"),
            ("LOCKOUT_MINUTES", "half an hour"),
        ];
        assert!(Settings::from_lookup(lookup(&base)).is_err());

        let settings = Settings::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://x"),
            ("JWT_SECRET", "s"),
            ("CORS_ORIGINS", "http://a.test, http://b.test,"),
        ]))
        .unwrap();
        assert_eq!(settings.cors_origins, vec!["http://a.test", "http://b.test"]);
    }

    #[test]
    fn rejects_non_positive_lockout_settings() {
        for (key, value) in [("MAX_FAILED_LOGINS", "0"), ("MAX_FAILED_LOGINS", "-3"), ("LOCKOUT_MINUTES", "0")] {
            let err = Settings::from_lookup(lookup(&[
                ("DATABASE_URL", "postgres://x"),
                ("JWT_SECRET", "s"),
                (key, value),
            ]))
            .unwrap_err();
            assert!(err.to_string().contains(key));
        }
    }
}
