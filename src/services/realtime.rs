// src/services/realtime.rs

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::authz::Identity;

pub const TABLE_UPDATE: &str = "table_update";
pub const ORDER_CREATED: &str = "order_created";
pub const ORDER_UPDATED: &str = "order_updated";

/// Evento empurrado para os painéis conectados em `/ws`.
#[derive(Debug, Clone, Serialize)]
pub struct RealtimeEvent {
    pub event: &'static str,
    pub data: Value,
    #[serde(skip)]
    pub chain_id: Uuid,
    #[serde(skip)]
    pub store_id: Uuid,
}

impl RealtimeEvent {
    pub fn new(event: &'static str, chain_id: Uuid, store_id: Uuid, data: impl Serialize) -> Self {
        Self {
            event,
            data: serde_json::to_value(data).unwrap_or(Value::Null),
            chain_id,
            store_id,
        }
    }

    /// Só recebe o evento quem alcança a loja de origem.
    pub fn visible_to(&self, identity: &Identity) -> bool {
        identity.can_access_store(self.store_id, self.chain_id)
    }
}

// Canal com perdas: quem atrasa pula eventos, o núcleo nunca espera.
#[derive(Clone)]
pub struct RealtimeHub {
    tx: broadcast::Sender<RealtimeEvent>,
}

impl RealtimeHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: RealtimeEvent) {
        let name = event.event;
        if self.tx.send(event).is_err() {
            tracing::debug!(event = name, "Nenhum painel conectado, evento descartado");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::identity::fixtures::{grant, identity};
    use serde_json::json;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let hub = RealtimeHub::new(8);
        let mut rx = hub.subscribe();
        let (chain, store) = (Uuid::new_v4(), Uuid::new_v4());

        hub.publish(RealtimeEvent::new(TABLE_UPDATE, chain, store, json!({ "status": "OCCUPIED" })));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event, TABLE_UPDATE);
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({ "event": "table_update", "data": { "status": "OCCUPIED" } })
        );
    }

    #[test]
    fn publishing_without_listeners_is_harmless() {
        let hub = RealtimeHub::new(4);
        hub.publish(RealtimeEvent::new(ORDER_CREATED, Uuid::new_v4(), Uuid::new_v4(), json!({})));
    }

    #[test]
    fn events_are_filtered_by_store_reach() {
        let (chain, store) = (Uuid::new_v4(), Uuid::new_v4());
        let event = RealtimeEvent::new(ORDER_UPDATED, chain, store, json!({}));

        let waiter = identity(Some(chain), Some(store), vec![grant("waiter", 5, Some(chain), Some(store))]);
        let other = identity(Some(chain), Some(Uuid::new_v4()), vec![grant("waiter", 5, Some(chain), Some(Uuid::new_v4()))]);
        let chain_admin = identity(Some(chain), None, vec![grant("chain_admin", 2, Some(chain), None)]);

        assert!(event.visible_to(&waiter));
        assert!(!event.visible_to(&other));
        assert!(event.visible_to(&chain_admin));
    }
}
