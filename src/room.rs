//! Rooms and their registry. A room owns its workspace tree and roster;
//! both are mutated only under the room's state lock, which is what keeps
//! concurrent edits from different members linearized.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use log::info;
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::workspace::VirtualFileTree;

const ROOM_CODE_LEN: usize = 8;

const STARTER_FILES: &[(&str, &str)] = &[
    ("/main.js", "console.log('Hello from your shared workspace');\n"),
    ("/example.py", "print('Hello from Python')\n"),
];

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("room not found: {0}")]
    RoomNotFound(String),
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub joined_at: SystemTime,
}

impl User {
    pub fn new(id: Uuid, name: impl Into<String>) -> Self {
        User {
            id,
            name: name.into(),
            joined_at: SystemTime::now(),
        }
    }

    pub fn member(&self) -> Member {
        Member {
            id: self.id.to_string(),
            name: self.name.clone(),
        }
    }
}

/// Wire form of a roster entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub id: String,
    pub name: String,
}

pub struct RoomState {
    /// Join order is preserved; the roster events rely on it.
    pub users: Vec<User>,
    pub tree: VirtualFileTree,
}

impl RoomState {
    pub fn roster(&self) -> Vec<Member> {
        self.users.iter().map(User::member).collect()
    }

    pub fn member_ids(&self) -> Vec<Uuid> {
        self.users.iter().map(|u| u.id).collect()
    }

    pub fn is_member(&self, user_id: Uuid) -> bool {
        self.users.iter().any(|u| u.id == user_id)
    }

    fn remove_user(&mut self, user_id: Uuid) -> Option<User> {
        let position = self.users.iter().position(|u| u.id == user_id)?;
        Some(self.users.remove(position))
    }
}

pub struct Room {
    pub id: String,
    pub created_at: SystemTime,
    pub state: Mutex<RoomState>,
}

pub struct LeaveOutcome {
    pub user: User,
    pub roster: Vec<Member>,
    pub member_ids: Vec<Uuid>,
    pub destroyed: bool,
}

pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Arc<Room>>>,
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomRegistry {
    pub fn new() -> Self {
        RoomRegistry {
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a room under a fresh shareable code, its tree seeded with
    /// the starter files.
    pub async fn create(&self) -> Arc<Room> {
        let mut tree = VirtualFileTree::new();
        for (path, content) in STARTER_FILES {
            tree.upsert_file(path, *content);
        }

        let mut rooms = self.rooms.write().await;
        let id = loop {
            let candidate = generate_room_code();
            if !rooms.contains_key(&candidate) {
                break candidate;
            }
        };

        let room = Arc::new(Room {
            id: id.clone(),
            created_at: SystemTime::now(),
            state: Mutex::new(RoomState {
                users: Vec::new(),
                tree,
            }),
        });
        rooms.insert(id.clone(), room.clone());
        info!("room {id} created");
        room
    }

    pub async fn get(&self, room_id: &str) -> Option<Arc<Room>> {
        self.rooms.read().await.get(room_id).cloned()
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Removes the user from the room's roster. Emptying the roster
    /// destroys the room immediately; abandoned rooms must not accumulate.
    pub async fn leave(&self, room_id: &str, user_id: Uuid) -> Option<LeaveOutcome> {
        let room = self.get(room_id).await?;
        let (user, roster, member_ids, empty) = {
            let mut state = room.state.lock().await;
            let user = state.remove_user(user_id)?;
            (
                user,
                state.roster(),
                state.member_ids(),
                state.users.is_empty(),
            )
        };

        let mut destroyed = false;
        if empty {
            let mut rooms = self.rooms.write().await;
            let still_empty = match rooms.get(room_id) {
                Some(room) => room.state.lock().await.users.is_empty(),
                None => false,
            };
            if still_empty {
                rooms.remove(room_id);
                destroyed = true;
                info!("room {room_id} destroyed, last member left");
            }
        }

        Some(LeaveOutcome {
            user,
            roster,
            member_ids,
            destroyed,
        })
    }
}

fn generate_room_code() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ROOM_CODE_LEN)
        .map(char::from)
        .collect()
}
