use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Events sent by a connected viewer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinRoom {
        room_id: String,
    },
    LeaveRoom,
    Play {
        position: f64,
        client_time_ms: u64,
    },
    Pause {
        position: f64,
        client_time_ms: u64,
    },
    Seek {
        position: f64,
        client_time_ms: u64,
    },
    ChatSend {
        text: String,
    },
    /// Keep-alive; resets the sender's presence timeout. No reply.
    Heartbeat,
}

/// Events pushed to viewers. Playback broadcasts carry the full authoritative
/// state rather than a diff so that late joiners and reconnecting clients
/// self-heal by overwriting local state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    RoomSnapshot {
        playback: PlaybackState,
        roster: Vec<MemberSummary>,
        chat_tail: Vec<ChatMessage>,
    },
    RosterUpdate {
        roster: Vec<MemberSummary>,
    },
    PlaybackUpdate {
        playback: PlaybackState,
    },
    PlaybackResync {
        playback: PlaybackState,
    },
    ChatMessage {
        message: ChatMessage,
    },
    Error {
        kind: ErrorKind,
    },
}

/// Typed error kinds delivered to the originating connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Full,
    Unauthorized,
    RoomTerminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackPhase {
    Paused,
    Playing,
}

/// Authoritative playback state as it crosses the wire. `position` is the
/// server's recomputed position at `updated_at_ms`; while Playing, the true
/// position at any later wall time is `position + (now - updated_at_ms)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackState {
    pub phase: PlaybackPhase,
    pub position: f64,
    pub revision: u64,
    pub updated_at_ms: u64,
    pub origin: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberSummary {
    pub id: Uuid,
    pub display_name: String,
    pub is_host: bool,
    pub joined_at_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub room_id: String,
    pub participant_id: Uuid,
    pub text: String,
    pub seq: u64,
    pub sent_at_ms: u64,
}

pub fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_events_use_snake_case_tags() {
        let ev: ClientEvent = serde_json::from_str(
            r#"{"type":"play","payload":{"position":12.5,"client_time_ms":1000}}"#,
        )
        .unwrap();
        match ev {
            ClientEvent::Play { position, .. } => assert_eq!(position, 12.5),
            other => panic!("unexpected event: {other:?}"),
        }

        let ev: ClientEvent = serde_json::from_str(r#"{"type":"heartbeat"}"#).unwrap();
        assert!(matches!(ev, ClientEvent::Heartbeat));
    }

    #[test]
    fn server_error_round_trips() {
        let json = serde_json::to_string(&ServerEvent::Error {
            kind: ErrorKind::RoomTerminated,
        })
        .unwrap();
        assert!(json.contains("room_terminated"));
    }
}
