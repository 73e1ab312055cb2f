//! WebSocket message DTOs.
//!
//! Every frame is a JSON object tagged by `"type"` with camelCase fields.

use serde::{Deserialize, Serialize};

use crate::domain::{MemberSummary, SignalKind, UserId};

fn default_role() -> String {
    "guest".to_string()
}

/// Inbound events (client → server)
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "authenticate", rename_all = "camelCase")]
    Authenticate {
        user_id: UserId,
        display_name: String,
        #[serde(default = "default_role")]
        role: String,
    },

    /// roomId は dispatcher で検証する（invalidRoomId を返すため文字列で受ける）
    #[serde(rename = "room.join", rename_all = "camelCase")]
    JoinRoom { room_id: String },

    #[serde(rename = "room.leave", rename_all = "camelCase")]
    LeaveRoom { room_id: String },

    #[serde(rename = "signal.offer", rename_all = "camelCase")]
    SignalOffer {
        to_user_id: UserId,
        payload: serde_json::Value,
    },

    #[serde(rename = "signal.answer", rename_all = "camelCase")]
    SignalAnswer {
        to_user_id: UserId,
        payload: serde_json::Value,
    },

    #[serde(rename = "signal.ice", rename_all = "camelCase")]
    SignalIce {
        to_user_id: UserId,
        payload: serde_json::Value,
    },

    #[serde(rename = "mic.request", rename_all = "camelCase")]
    RequestMic { room_id: String },

    #[serde(rename = "mic.approve", rename_all = "camelCase")]
    ApproveMic { room_id: String, user_id: UserId },

    #[serde(rename = "mic.reject", rename_all = "camelCase")]
    RejectMic { room_id: String, user_id: UserId },

    #[serde(rename = "speaker.remove", rename_all = "camelCase")]
    RemoveSpeaker { room_id: String, user_id: UserId },

    #[serde(rename = "presence.ping")]
    Ping,
}

impl ClientEvent {
    /// Signaling events as `(kind, to_user_id, payload)`
    pub fn into_signal(self) -> Option<(SignalKind, UserId, serde_json::Value)> {
        match self {
            ClientEvent::SignalOffer {
                to_user_id,
                payload,
            } => Some((SignalKind::Offer, to_user_id, payload)),
            ClientEvent::SignalAnswer {
                to_user_id,
                payload,
            } => Some((SignalKind::Answer, to_user_id, payload)),
            ClientEvent::SignalIce {
                to_user_id,
                payload,
            } => Some((SignalKind::Ice, to_user_id, payload)),
            _ => None,
        }
    }
}

/// Outbound events (server → client)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "authenticated", rename_all = "camelCase")]
    Authenticated {
        user_id: UserId,
        display_name: String,
        role: String,
    },

    #[serde(rename = "room.joined", rename_all = "camelCase")]
    RoomJoined {
        room_id: String,
        previous_room_id: Option<String>,
        member_count: usize,
        members: Vec<MemberSummary>,
    },

    #[serde(rename = "room.left", rename_all = "camelCase")]
    RoomLeft { room_id: String, member_count: usize },

    #[serde(rename = "room.memberJoined", rename_all = "camelCase")]
    MemberJoined {
        room_id: String,
        user_id: UserId,
        display_name: String,
        role: String,
    },

    #[serde(rename = "room.memberLeft", rename_all = "camelCase")]
    MemberLeft { room_id: String, user_id: UserId },

    #[serde(rename = "signal.offer", rename_all = "camelCase")]
    SignalOffer {
        from_user_id: UserId,
        payload: serde_json::Value,
    },

    #[serde(rename = "signal.answer", rename_all = "camelCase")]
    SignalAnswer {
        from_user_id: UserId,
        payload: serde_json::Value,
    },

    #[serde(rename = "signal.ice", rename_all = "camelCase")]
    SignalIce {
        from_user_id: UserId,
        payload: serde_json::Value,
    },

    #[serde(rename = "signal.delivered", rename_all = "camelCase")]
    SignalDelivered { to_user_id: UserId, kind: SignalKind },

    #[serde(rename = "room.broadcastState", rename_all = "camelCase")]
    BroadcastState {
        room_id: String,
        speaker_ids: Vec<UserId>,
        mic_queue: Vec<UserId>,
    },

    #[serde(rename = "presence.pong")]
    Pong { timestamp: i64 },

    #[serde(rename = "session.replaced")]
    SessionReplaced { reason: String },

    #[serde(rename = "session.expired")]
    SessionExpired { reason: String },

    #[serde(rename = "error")]
    Error { code: String, message: String },
}

impl ServerEvent {
    /// Signal forwarded to the target peer, tagged with the sender
    pub fn signal(kind: SignalKind, from_user_id: UserId, payload: serde_json::Value) -> Self {
        match kind {
            SignalKind::Offer => ServerEvent::SignalOffer {
                from_user_id,
                payload,
            },
            SignalKind::Answer => ServerEvent::SignalAnswer {
                from_user_id,
                payload,
            },
            SignalKind::Ice => ServerEvent::SignalIce {
                from_user_id,
                payload,
            },
        }
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerEvent::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }

    /// JSON テキストフレームに変換
    pub fn to_json(&self) -> String {
        match serde_json::to_string(self) {
            Ok(json) => json,
            Err(e) => {
                // Value と文字列のみで構成されるため通常は到達しない
                tracing::error!("Failed to serialize server event: {}", e);
                r#"{"type":"error","code":"internal","message":"serialization failed"}"#
                    .to_string()
            }
        }
    }
}
