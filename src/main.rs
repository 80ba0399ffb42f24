//src/main.rs

use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

// Declaração dos nossos módulos
mod authz;
mod common;
mod config;
mod db;
mod docs;
mod handlers;
mod middleware;
mod models;
mod routes;
mod services;

use crate::config::{AppState, Settings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG controla o nível; padrão "info"
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    // Se a configuração falhar, a aplicação não deve iniciar.
    let settings = Settings::from_env()?;
    let app_state = AppState::new(settings).await?;

    // Faz o app rodar as migrações do SQLx na inicialização
    sqlx::migrate!().run(&app_state.db_pool).await?;
    tracing::info!("✅ Migrações do banco de dados executadas com sucesso!");

    if let Some((username, password)) = app_state.settings.bootstrap_admin.clone() {
        if app_state.auth_service.ensure_bootstrap_admin(&username, &password).await? {
            tracing::info!("👤 Usuário super_admin inicial '{}' criado", username);
        }
    }

    let addr = app_state.settings.bind_addr.clone();
    let service_name = app_state.settings.service_name.clone();
    let app = routes::build_router(app_state);

    // Inicia o servidor
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("🚀 {} escutando em {}", service_name, listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
