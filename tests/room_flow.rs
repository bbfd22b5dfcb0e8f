//! End-to-end room flows driven through the library: join, edit, structural
//! operations, execution dispatch and disconnect, with fake connections
//! registered straight on the gateway instead of real sockets.

use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;
use warp::ws::Message;

use coderoom::executor::ExecutionRequest;
use coderoom::messages::ClientEvent;
use coderoom::room::RegistryError;
use coderoom::server::Server;

fn drain(rx: &mut UnboundedReceiver<Message>) -> Vec<Value> {
    let mut events = Vec::new();
    while let Ok(message) = rx.try_recv() {
        let text = message.to_str().expect("text frame");
        events.push(serde_json::from_str(text).expect("valid json"));
    }
    events
}

fn event_types(events: &[Value]) -> Vec<String> {
    events
        .iter()
        .map(|e| e["type"].as_str().unwrap_or_default().to_string())
        .collect()
}

async fn join(
    server: &Server,
    room_id: &str,
    name: &str,
) -> (Uuid, UnboundedReceiver<Message>) {
    let conn_id = Uuid::new_v4();
    let rx = server.gateway.register(conn_id).await;
    server
        .handle_event(
            conn_id,
            ClientEvent::Join {
                room_id: room_id.to_string(),
                user_name: name.to_string(),
            },
        )
        .await;
    (conn_id, rx)
}

#[tokio::test]
async fn joining_user_receives_the_seeded_snapshot() {
    let server = Server::new();
    let room_id = server.create_room().await.room_id;

    let (_alice, mut rx) = join(&server, &room_id, "alice").await;
    let events = drain(&mut rx);

    assert_eq!(event_types(&events), vec!["filesSnapshot", "rosterChanged"]);
    let tree = &events[0]["tree"];
    let children = tree["children"].as_array().expect("root children");
    let paths: Vec<&str> = children
        .iter()
        .map(|c| c["path"].as_str().unwrap_or_default())
        .collect();
    assert_eq!(paths, vec!["/example.py", "/main.js"]);
}

#[tokio::test]
async fn join_notifies_existing_members_in_order() {
    let server = Server::new();
    let room_id = server.create_room().await.room_id;

    let (_alice, mut alice_rx) = join(&server, &room_id, "alice").await;
    drain(&mut alice_rx);

    let (_bob, mut bob_rx) = join(&server, &room_id, "bob").await;

    let alice_events = drain(&mut alice_rx);
    assert_eq!(
        event_types(&alice_events),
        vec!["memberJoined", "rosterChanged"]
    );
    assert_eq!(alice_events[0]["member"]["name"], "bob");
    assert_eq!(alice_events[1]["members"].as_array().map(Vec::len), Some(2));

    let bob_events = drain(&mut bob_rx);
    assert_eq!(event_types(&bob_events), vec!["filesSnapshot", "rosterChanged"]);
}

#[tokio::test]
async fn edits_reach_everyone_but_the_editor() {
    let server = Server::new();
    let room_id = server.create_room().await.room_id;
    let (alice, mut alice_rx) = join(&server, &room_id, "alice").await;
    let (_bob, mut bob_rx) = join(&server, &room_id, "bob").await;
    drain(&mut alice_rx);
    drain(&mut bob_rx);

    server
        .handle_event(
            alice,
            ClientEvent::EditContent {
                file_path: "/main.js".to_string(),
                content: "console.log(42);".to_string(),
                room_id: room_id.clone(),
            },
        )
        .await;

    assert!(drain(&mut alice_rx).is_empty());
    let bob_events = drain(&mut bob_rx);
    assert_eq!(event_types(&bob_events), vec!["contentUpdated"]);
    assert_eq!(bob_events[0]["filePath"], "/main.js");
    assert_eq!(bob_events[0]["content"], "console.log(42);");

    let room = server.registry.get(&room_id).await.expect("room exists");
    let state = room.state.lock().await;
    assert_eq!(
        state.tree.resolve("/main.js").and_then(|n| n.content()),
        Some("console.log(42);")
    );
}

#[tokio::test]
async fn create_then_delete_resolves_to_absent() {
    let server = Server::new();
    let room_id = server.create_room().await.room_id;
    let (alice, mut alice_rx) = join(&server, &room_id, "alice").await;
    let (_bob, mut bob_rx) = join(&server, &room_id, "bob").await;
    drain(&mut alice_rx);
    drain(&mut bob_rx);

    server
        .handle_event(
            alice,
            serde_json::from_str(
                &format!(r#"{{"type":"createEntry","filePath":"/a.txt","content":"x","kind":"file","roomId":"{room_id}"}}"#),
            )
            .expect("valid event"),
        )
        .await;
    server
        .handle_event(
            alice,
            ClientEvent::DeleteEntry {
                file_path: "/a.txt".to_string(),
                room_id: room_id.clone(),
            },
        )
        .await;

    let bob_events = drain(&mut bob_rx);
    assert_eq!(
        event_types(&bob_events),
        vec!["entryCreated", "entryDeleted"]
    );

    let room = server.registry.get(&room_id).await.expect("room exists");
    let state = room.state.lock().await;
    assert!(state.tree.resolve("/a.txt").is_none());
}

#[tokio::test]
async fn deleting_a_missing_entry_broadcasts_nothing() {
    let server = Server::new();
    let room_id = server.create_room().await.room_id;
    let (alice, mut alice_rx) = join(&server, &room_id, "alice").await;
    let (_bob, mut bob_rx) = join(&server, &room_id, "bob").await;
    drain(&mut alice_rx);
    drain(&mut bob_rx);

    server
        .handle_event(
            alice,
            ClientEvent::DeleteEntry {
                file_path: "/nowhere.txt".to_string(),
                room_id: room_id.clone(),
            },
        )
        .await;

    assert!(drain(&mut bob_rx).is_empty());
}

#[tokio::test]
async fn rename_into_a_missing_directory_creates_it() {
    let server = Server::new();
    let room_id = server.create_room().await.room_id;
    let (alice, mut alice_rx) = join(&server, &room_id, "alice").await;
    let (_bob, mut bob_rx) = join(&server, &room_id, "bob").await;
    drain(&mut alice_rx);
    drain(&mut bob_rx);

    server
        .handle_event(
            alice,
            ClientEvent::RenameEntry {
                old_path: "/main.js".to_string(),
                new_path: "/b/main.js".to_string(),
                room_id: room_id.clone(),
            },
        )
        .await;

    let bob_events = drain(&mut bob_rx);
    assert_eq!(event_types(&bob_events), vec!["entryRenamed"]);
    assert_eq!(bob_events[0]["oldPath"], "/main.js");
    assert_eq!(bob_events[0]["newPath"], "/b/main.js");

    let room = server.registry.get(&room_id).await.expect("room exists");
    let state = room.state.lock().await;
    assert!(state.tree.resolve("/main.js").is_none());
    assert!(state.tree.resolve("/b/main.js").is_some());
}

#[tokio::test]
async fn cursor_moves_are_relayed_to_the_rest_of_the_room() {
    let server = Server::new();
    let room_id = server.create_room().await.room_id;
    let (alice, mut alice_rx) = join(&server, &room_id, "alice").await;
    let (_bob, mut bob_rx) = join(&server, &room_id, "bob").await;
    drain(&mut alice_rx);
    drain(&mut bob_rx);

    server
        .handle_event(
            alice,
            ClientEvent::CursorMove {
                position: serde_json::json!({"line": 3, "column": 7}),
                room_id: room_id.clone(),
            },
        )
        .await;

    assert!(drain(&mut alice_rx).is_empty());
    let bob_events = drain(&mut bob_rx);
    assert_eq!(event_types(&bob_events), vec!["cursorMoved"]);
    assert_eq!(bob_events[0]["userId"], alice.to_string());
    assert_eq!(bob_events[0]["position"]["line"], 3);
}

#[tokio::test]
async fn events_for_rooms_you_never_joined_get_an_error_notice() {
    let server = Server::new();
    let room_id = server.create_room().await.room_id;
    let outsider = Uuid::new_v4();
    let mut rx = server.gateway.register(outsider).await;

    server
        .handle_event(
            outsider,
            ClientEvent::EditContent {
                file_path: "/main.js".to_string(),
                content: "hijack".to_string(),
                room_id: room_id.clone(),
            },
        )
        .await;

    let events = drain(&mut rx);
    assert_eq!(event_types(&events), vec!["errorNotice"]);

    let room = server.registry.get(&room_id).await.expect("room exists");
    let state = room.state.lock().await;
    assert_ne!(
        state.tree.resolve("/main.js").and_then(|n| n.content()),
        Some("hijack")
    );
}

#[tokio::test]
async fn last_disconnect_destroys_the_room() {
    let server = Server::new();
    let room_id = server.create_room().await.room_id;
    let (alice, mut alice_rx) = join(&server, &room_id, "alice").await;
    drain(&mut alice_rx);

    assert!(server.room_summary(&room_id).await.exists);
    server.handle_disconnect(alice).await;
    assert!(!server.room_summary(&room_id).await.exists);
}

#[tokio::test]
async fn departures_update_the_remaining_members() {
    let server = Server::new();
    let room_id = server.create_room().await.room_id;
    let (alice, mut alice_rx) = join(&server, &room_id, "alice").await;
    let (bob, mut bob_rx) = join(&server, &room_id, "bob").await;
    drain(&mut alice_rx);
    drain(&mut bob_rx);

    server.handle_disconnect(bob).await;

    let alice_events = drain(&mut alice_rx);
    assert_eq!(
        event_types(&alice_events),
        vec!["memberLeft", "rosterChanged"]
    );
    assert_eq!(alice_events[0]["memberId"], bob.to_string());
    assert_eq!(alice_events[1]["members"].as_array().map(Vec::len), Some(1));

    assert!(server.room_summary(&room_id).await.exists);
    server.handle_disconnect(alice).await;
    assert!(!server.room_summary(&room_id).await.exists);
}

#[tokio::test]
async fn execution_against_an_unknown_room_is_rejected() {
    let server = Server::new();
    let request = ExecutionRequest {
        code: "print('hi')".to_string(),
        language: Some("python".to_string()),
        room_id: "nope".to_string(),
        filename: None,
    };

    let err = server.execute(&request).await.expect_err("unknown room");
    assert!(matches!(err, RegistryError::RoomNotFound(_)));
}

#[tokio::test]
async fn execution_results_are_broadcast_to_the_room() {
    let server = Server::new();
    let room_id = server.create_room().await.room_id;
    let (_alice, mut alice_rx) = join(&server, &room_id, "alice").await;
    drain(&mut alice_rx);

    // an unsupported language resolves without spawning anything, which
    // keeps this test independent of installed toolchains
    let request = ExecutionRequest {
        code: "whatever".to_string(),
        language: Some("brainfuck".to_string()),
        room_id: room_id.clone(),
        filename: None,
    };

    let result = server.execute(&request).await.expect("room exists");
    assert!(result.error);
    assert!(result.output.contains("Unsupported language"));

    let events = drain(&mut alice_rx);
    assert_eq!(event_types(&events), vec!["executionCompleted"]);
    assert_eq!(events[0]["result"]["error"], true);
}
