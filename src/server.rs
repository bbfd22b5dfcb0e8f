//! Connection handling and event dispatch: client actions come in over the
//! websocket or the REST API, mutate the room they target, and their
//! effects fan back out through the gateway.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures_util::{SinkExt, StreamExt};
use log::debug;
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;
use warp::ws::WebSocket;

use crate::executor::{self, ExecutionRequest, ExecutionResult};
use crate::gateway::BroadcastGateway;
use crate::messages::{ClientEvent, ServerEvent};
use crate::room::{RegistryError, Room, RoomRegistry, User};
use crate::workspace::{Node, NodeKind};

pub struct Server {
    pub registry: RoomRegistry,
    pub gateway: BroadcastGateway,
    /// connection id -> joined room id
    sessions: RwLock<HashMap<Uuid, String>>,
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {
    pub fn new() -> Self {
        Server {
            registry: RoomRegistry::new(),
            gateway: BroadcastGateway::new(),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub async fn handle_connection(self: Arc<Self>, ws: WebSocket) {
        let conn_id = Uuid::new_v4();
        debug!("connection {conn_id} opened");

        let (mut ws_tx, mut ws_rx) = ws.split();
        let mut outbound = self.gateway.register(conn_id).await;

        tokio::spawn(async move {
            while let Some(message) = outbound.recv().await {
                if let Err(e) = ws_tx.send(message).await {
                    debug!("connection {conn_id} send failed: {e}");
                    break;
                }
            }
        });

        let server = Arc::clone(&self);
        tokio::spawn(async move {
            while let Some(incoming) = ws_rx.next().await {
                match incoming {
                    Ok(message) => {
                        let Ok(text) = message.to_str() else { continue };
                        match serde_json::from_str::<ClientEvent>(text) {
                            Ok(event) => server.handle_event(conn_id, event).await,
                            Err(e) => {
                                server
                                    .gateway
                                    .send_to(
                                        conn_id,
                                        &ServerEvent::ErrorNotice {
                                            message: format!("malformed event: {e}"),
                                        },
                                    )
                                    .await;
                            }
                        }
                    }
                    Err(e) => {
                        debug!("websocket error on {conn_id}: {e}");
                        break;
                    }
                }
            }
            server.handle_disconnect(conn_id).await;
        });
    }

    pub async fn handle_event(&self, conn_id: Uuid, event: ClientEvent) {
        match event {
            ClientEvent::Join { room_id, user_name } => {
                self.handle_join(conn_id, &room_id, user_name).await;
            }
            ClientEvent::EditContent {
                file_path,
                content,
                room_id,
            } => {
                let Some(room) = self.member_room(conn_id, &room_id).await else {
                    return;
                };
                let mut state = room.state.lock().await;
                state.tree.upsert_file(&file_path, content.clone());
                let members = state.member_ids();
                self.gateway
                    .fan_out(
                        &members,
                        &ServerEvent::ContentUpdated { file_path, content },
                        Some(conn_id),
                    )
                    .await;
            }
            ClientEvent::CursorMove { position, room_id } => {
                let Some(room) = self.member_room(conn_id, &room_id).await else {
                    return;
                };
                let state = room.state.lock().await;
                let members = state.member_ids();
                self.gateway
                    .fan_out(
                        &members,
                        &ServerEvent::CursorMoved {
                            user_id: conn_id.to_string(),
                            position,
                        },
                        Some(conn_id),
                    )
                    .await;
            }
            ClientEvent::CreateEntry {
                file_path,
                content,
                kind,
                room_id,
            } => {
                let Some(room) = self.member_room(conn_id, &room_id).await else {
                    return;
                };
                let node = match kind {
                    NodeKind::File => Node::file(content.unwrap_or_default()),
                    NodeKind::Directory => Node::directory(),
                };
                let mut state = room.state.lock().await;
                state.tree.upsert(&file_path, node);
                let Some(snapshot) = state.tree.snapshot_at(&file_path) else {
                    return;
                };
                let members = state.member_ids();
                self.gateway
                    .fan_out(
                        &members,
                        &ServerEvent::EntryCreated {
                            file_path,
                            node: snapshot,
                        },
                        Some(conn_id),
                    )
                    .await;
            }
            ClientEvent::DeleteEntry { file_path, room_id } => {
                let Some(room) = self.member_room(conn_id, &room_id).await else {
                    return;
                };
                let mut state = room.state.lock().await;
                if state.tree.remove(&file_path) {
                    let members = state.member_ids();
                    self.gateway
                        .fan_out(
                            &members,
                            &ServerEvent::EntryDeleted { file_path },
                            Some(conn_id),
                        )
                        .await;
                }
            }
            ClientEvent::RenameEntry {
                old_path,
                new_path,
                room_id,
            } => {
                let Some(room) = self.member_room(conn_id, &room_id).await else {
                    return;
                };
                let mut state = room.state.lock().await;
                if state.tree.rename(&old_path, &new_path) {
                    let members = state.member_ids();
                    self.gateway
                        .fan_out(
                            &members,
                            &ServerEvent::EntryRenamed { old_path, new_path },
                            Some(conn_id),
                        )
                        .await;
                }
            }
        }
    }

    async fn handle_join(&self, conn_id: Uuid, room_id: &str, user_name: String) {
        if self.sessions.read().await.contains_key(&conn_id) {
            self.error_notice(conn_id, "already joined a room").await;
            return;
        }
        let Some(room) = self.registry.get(room_id).await else {
            self.error_notice(conn_id, &format!("room {room_id} not found"))
                .await;
            return;
        };

        let mut state = room.state.lock().await;
        let user = User::new(conn_id, user_name);
        let member = user.member();
        state.users.push(user);
        self.sessions
            .write()
            .await
            .insert(conn_id, room_id.to_string());

        let snapshot = state.tree.snapshot();
        let roster = state.roster();
        let members = state.member_ids();

        // all three sends are enqueued under the room lock, so every member
        // observes join traffic in the same order
        self.gateway
            .send_to(conn_id, &ServerEvent::FilesSnapshot { tree: snapshot })
            .await;
        self.gateway
            .fan_out(
                &members,
                &ServerEvent::MemberJoined {
                    member,
                    roster: roster.clone(),
                },
                Some(conn_id),
            )
            .await;
        self.gateway
            .fan_out(&members, &ServerEvent::RosterChanged { members: roster }, None)
            .await;
        debug!("connection {conn_id} joined room {room_id}");
    }

    pub async fn handle_disconnect(&self, conn_id: Uuid) {
        let room_id = self.sessions.write().await.remove(&conn_id);
        if let Some(room_id) = room_id {
            if let Some(outcome) = self.registry.leave(&room_id, conn_id).await {
                if !outcome.destroyed {
                    self.gateway
                        .fan_out(
                            &outcome.member_ids,
                            &ServerEvent::MemberLeft {
                                member_id: conn_id.to_string(),
                                roster: outcome.roster.clone(),
                            },
                            None,
                        )
                        .await;
                    self.gateway
                        .fan_out(
                            &outcome.member_ids,
                            &ServerEvent::RosterChanged {
                                members: outcome.roster,
                            },
                            None,
                        )
                        .await;
                }
            }
        }
        self.gateway.unregister(conn_id).await;
        debug!("connection {conn_id} closed");
    }

    /// Runs the request against its room and broadcasts the outcome. The
    /// room lock is not held while the child processes run; only the
    /// membership snapshot for the completion broadcast takes it.
    pub async fn execute(
        &self,
        request: &ExecutionRequest,
    ) -> Result<ExecutionResult, RegistryError> {
        let room = self
            .registry
            .get(&request.room_id)
            .await
            .ok_or_else(|| RegistryError::RoomNotFound(request.room_id.clone()))?;

        let result = executor::execute(request).await;

        let members = room.state.lock().await.member_ids();
        self.gateway
            .fan_out(
                &members,
                &ServerEvent::ExecutionCompleted {
                    result: result.clone(),
                },
                None,
            )
            .await;
        Ok(result)
    }

    pub async fn create_room(&self) -> RoomCreated {
        let room = self.registry.create().await;
        RoomCreated {
            room_id: room.id.clone(),
        }
    }

    pub async fn room_summary(&self, room_id: &str) -> RoomLookup {
        match self.registry.get(room_id).await {
            Some(room) => {
                let state = room.state.lock().await;
                RoomLookup {
                    exists: true,
                    room: Some(RoomSummary {
                        room_id: room.id.clone(),
                        member_count: state.users.len(),
                        created_at: epoch_millis(room.created_at),
                    }),
                }
            }
            None => RoomLookup {
                exists: false,
                room: None,
            },
        }
    }

    /// Resolves the room when the connection has actually joined it;
    /// otherwise tells the client off and returns `None`.
    async fn member_room(&self, conn_id: Uuid, room_id: &str) -> Option<Arc<Room>> {
        let joined = self.sessions.read().await.get(&conn_id).cloned();
        if joined.as_deref() != Some(room_id) {
            self.error_notice(conn_id, &format!("not a member of room {room_id}"))
                .await;
            return None;
        }
        match self.registry.get(room_id).await {
            Some(room) => Some(room),
            None => {
                self.error_notice(conn_id, &format!("room {room_id} not found"))
                    .await;
                None
            }
        }
    }

    async fn error_notice(&self, conn_id: Uuid, message: &str) {
        self.gateway
            .send_to(
                conn_id,
                &ServerEvent::ErrorNotice {
                    message: message.to_string(),
                },
            )
            .await;
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomCreated {
    pub room_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomLookup {
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<RoomSummary>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub room_id: String,
    pub member_count: usize,
    pub created_at: u64,
}

fn epoch_millis(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}
