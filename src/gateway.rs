//! Per-room fan-out to connected clients. Each live connection owns an
//! unbounded outbound channel; a pump task drains it into the websocket.

use std::collections::HashMap;

use log::warn;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;
use warp::ws::Message;

use crate::messages::ServerEvent;

pub struct BroadcastGateway {
    connections: RwLock<HashMap<Uuid, mpsc::UnboundedSender<Message>>>,
}

impl Default for BroadcastGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastGateway {
    pub fn new() -> Self {
        BroadcastGateway {
            connections: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(&self, conn_id: Uuid) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.write().await.insert(conn_id, tx);
        rx
    }

    pub async fn unregister(&self, conn_id: Uuid) {
        self.connections.write().await.remove(&conn_id);
    }

    pub async fn send_to(&self, conn_id: Uuid, event: &ServerEvent) {
        let Some(text) = encode(event) else { return };
        let connections = self.connections.read().await;
        if let Some(sender) = connections.get(&conn_id) {
            let _ = sender.send(Message::text(text));
        }
    }

    /// Delivers `event` to every listed recipient except `except`, in the
    /// order calls are made. Recipients that have disconnected since the
    /// list was taken are skipped silently.
    pub async fn fan_out(&self, recipients: &[Uuid], event: &ServerEvent, except: Option<Uuid>) {
        let Some(text) = encode(event) else { return };
        let connections = self.connections.read().await;
        for conn_id in recipients {
            if Some(*conn_id) == except {
                continue;
            }
            if let Some(sender) = connections.get(conn_id) {
                let _ = sender.send(Message::text(text.clone()));
            }
        }
    }
}

fn encode(event: &ServerEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!("failed to encode server event: {e}");
            None
        }
    }
}
