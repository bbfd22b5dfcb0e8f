//! Wire protocol: tagged JSON events exchanged with clients over the
//! websocket. Event names are camelCase on the wire.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::executor::ExecutionResult;
use crate::room::Member;
use crate::workspace::{NodeKind, NodeSnapshot};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    Join { room_id: String, user_name: String },
    #[serde(rename_all = "camelCase")]
    EditContent {
        file_path: String,
        content: String,
        room_id: String,
    },
    #[serde(rename_all = "camelCase")]
    CursorMove { position: Value, room_id: String },
    #[serde(rename_all = "camelCase")]
    CreateEntry {
        file_path: String,
        #[serde(default)]
        content: Option<String>,
        kind: NodeKind,
        room_id: String,
    },
    #[serde(rename_all = "camelCase")]
    DeleteEntry { file_path: String, room_id: String },
    #[serde(rename_all = "camelCase")]
    RenameEntry {
        old_path: String,
        new_path: String,
        room_id: String,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Sent once to a joining user: the full workspace tree.
    #[serde(rename_all = "camelCase")]
    FilesSnapshot { tree: NodeSnapshot },
    #[serde(rename_all = "camelCase")]
    ContentUpdated { file_path: String, content: String },
    #[serde(rename_all = "camelCase")]
    EntryCreated {
        file_path: String,
        node: NodeSnapshot,
    },
    #[serde(rename_all = "camelCase")]
    EntryDeleted { file_path: String },
    #[serde(rename_all = "camelCase")]
    EntryRenamed { old_path: String, new_path: String },
    #[serde(rename_all = "camelCase")]
    CursorMoved { user_id: String, position: Value },
    #[serde(rename_all = "camelCase")]
    RosterChanged { members: Vec<Member> },
    #[serde(rename_all = "camelCase")]
    MemberJoined {
        member: Member,
        roster: Vec<Member>,
    },
    #[serde(rename_all = "camelCase")]
    MemberLeft {
        member_id: String,
        roster: Vec<Member>,
    },
    #[serde(rename_all = "camelCase")]
    ExecutionCompleted { result: ExecutionResult },
    #[serde(rename_all = "camelCase")]
    ErrorNotice { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_events_parse_from_camel_case_json() {
        let event: ClientEvent = serde_json::from_str(
            r#"{"type":"editContent","filePath":"/main.js","content":"x","roomId":"r1"}"#,
        )
        .expect("valid event");
        match event {
            ClientEvent::EditContent {
                file_path,
                content,
                room_id,
            } => {
                assert_eq!(file_path, "/main.js");
                assert_eq!(content, "x");
                assert_eq!(room_id, "r1");
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let event: ClientEvent = serde_json::from_str(
            r#"{"type":"createEntry","filePath":"/d","kind":"directory","roomId":"r1"}"#,
        )
        .expect("valid event");
        assert!(matches!(
            event,
            ClientEvent::CreateEntry {
                kind: NodeKind::Directory,
                content: None,
                ..
            }
        ));
    }

    #[test]
    fn server_events_serialize_with_camel_case_tags() {
        let event = ServerEvent::EntryRenamed {
            old_path: "/a".to_string(),
            new_path: "/b".to_string(),
        };
        let json: Value = serde_json::to_value(&event).expect("serializes");
        assert_eq!(json["type"], "entryRenamed");
        assert_eq!(json["oldPath"], "/a");
        assert_eq!(json["newPath"], "/b");

        let event = ServerEvent::MemberLeft {
            member_id: "abc".to_string(),
            roster: vec![],
        };
        let json: Value = serde_json::to_value(&event).expect("serializes");
        assert_eq!(json["type"], "memberLeft");
        assert_eq!(json["memberId"], "abc");
    }
}
