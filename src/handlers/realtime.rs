// src/handlers/realtime.rs

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use utoipa::IntoParams;

use crate::{
    authz::Identity,
    common::error::{ApiError, AppError},
    config::AppState,
    middleware::i18n::Locale,
};

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct WsQuery {
    /// Access token (navegadores não enviam cabeçalhos no handshake)
    pub token: Option<String>,
}

// GET /ws?token=...
#[utoipa::path(
    get,
    path = "/ws",
    tag = "Realtime",
    params(WsQuery),
    responses(
        (status = 101, description = "Conexão WebSocket aberta"),
        (status = 401, description = "Token inválido ou ausente")
    )
)]
pub async fn ws_handler(
    State(app_state): State<AppState>,
    locale: Locale,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let token = query
        .token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::InvalidToken.to_api_error(&locale, &app_state.i18n_store))?;

    // Autentica antes do upgrade: sem identidade não há conexão
    let identity = app_state
        .auth_service
        .authenticate(&token)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, app_state, identity)))
}

/// Resposta a um `ping` do cliente (texto puro ou `{"event":"ping"}`).
pub fn pong_for(text: &str) -> Option<String> {
    let trimmed = text.trim();
    let is_ping = trimmed.eq_ignore_ascii_case("ping")
        || serde_json::from_str::<Value>(trimmed)
            .ok()
            .and_then(|v| v.get("event").and_then(Value::as_str).map(|e| e == "ping"))
            .unwrap_or(false);

    is_ping.then(|| json!({ "event": "pong" }).to_string())
}

async fn handle_socket(socket: WebSocket, app_state: AppState, identity: Identity) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = app_state.realtime.subscribe();

    tracing::info!(user_id = %identity.user_id, "🔌 Painel conectado ao realtime");

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(pong) = pong_for(text.as_str()) {
                            if sender.send(Message::Text(pong.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(user_id = %identity.user_id, "Erro no socket: {}", e);
                        break;
                    }
                }
            }
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        if !event.visible_to(&identity) {
                            continue;
                        }
                        let Ok(text) = serde_json::to_string(&event) else { continue };
                        if sender.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    // Painel lento: perde eventos, mas continua conectado
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(user_id = %identity.user_id, skipped, "Painel atrasado, eventos descartados");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    tracing::info!(user_id = %identity.user_id, "Painel desconectado do realtime");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answers_both_ping_shapes() {
        assert_eq!(pong_for("ping").as_deref(), Some(r#"{"event":"pong"}"#));
        assert_eq!(pong_for(r#"{"event":"ping"}"#).as_deref(), Some(r#"{"event":"pong"}"#));
        assert!(pong_for(r#"{"event":"subscribe"}"#).is_none());
        assert!(pong_for("hello").is_none());
    }
}
