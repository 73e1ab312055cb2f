//! Error types of the presence domain.

use thiserror::Error;

use super::value_object::{RoomId, UserId};

/// Validation errors raised while building value objects
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueObjectError {
    #[error("room id must not be empty")]
    RoomIdEmpty,

    #[error("room id must be at most {0} characters")]
    RoomIdTooLong(usize),

    #[error("room id '{0}' contains whitespace or control characters")]
    RoomIdInvalidCharacter(String),
}

/// Errors returned by membership operations.
///
/// All of these are caller-protocol errors: they are fatal to the single call
/// and are reported back to the initiating connection only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinatorError {
    /// The user was never registered (or was already evicted)
    #[error("user {0} is not registered")]
    UnknownUser(UserId),

    /// The user is not a member of the room the operation targets
    #[error("user {user_id} is not a member of room '{room_id}'")]
    NotMember { user_id: UserId, room_id: RoomId },

    /// The target user has no pending mic request in the room
    #[error("user {user_id} has no pending mic request in room '{room_id}'")]
    NotQueued { user_id: UserId, room_id: RoomId },
}

impl CoordinatorError {
    /// Stable error code sent over the wire
    pub fn code(&self) -> &'static str {
        match self {
            CoordinatorError::UnknownUser(_) => "unknownUser",
            CoordinatorError::NotMember { .. } => "notMember",
            CoordinatorError::NotQueued { .. } => "notQueued",
        }
    }
}

/// Errors returned by the signaling relay
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// The sender is not registered
    #[error("user {0} is not registered")]
    UnknownUser(UserId),

    /// The sender is not in any room
    #[error("user {0} is not in a room")]
    NotInRoom(UserId),

    /// The target peer is offline or its connection is gone
    #[error("peer {0} is unavailable")]
    PeerUnavailable(UserId),

    /// The target peer is not in the sender's room
    #[error("peer {to} is not in the same room as {from}")]
    NotInSameRoom { from: UserId, to: UserId },
}

impl RelayError {
    /// Stable error code sent over the wire
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::UnknownUser(_) => "unknownUser",
            RelayError::NotInRoom(_) => "notInRoom",
            RelayError::PeerUnavailable(_) => "peerUnavailable",
            RelayError::NotInSameRoom { .. } => "notInSameRoom",
        }
    }
}

/// Errors raised by a [`MessagePusher`](super::MessagePusher) implementation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessagePushError {
    #[error("client '{0}' not found")]
    ClientNotFound(String),

    #[error("failed to push message: {0}")]
    PushFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinator_error_codes() {
        // テスト項目: CoordinatorError が安定したエラーコードに変換される
        // given (前提条件):
        let room_id = RoomId::new("lobby".to_string()).unwrap();
        let errors = vec![
            CoordinatorError::UnknownUser(UserId::new(1)),
            CoordinatorError::NotMember {
                user_id: UserId::new(1),
                room_id: room_id.clone(),
            },
            CoordinatorError::NotQueued {
                user_id: UserId::new(2),
                room_id,
            },
        ];

        // when (操作):
        let codes: Vec<&str> = errors.iter().map(|e| e.code()).collect();

        // then (期待する結果):
        assert_eq!(codes, vec!["unknownUser", "notMember", "notQueued"]);
    }

    #[test]
    fn test_relay_error_message_names_peers() {
        // テスト項目: NotInSameRoom のメッセージに送信者と宛先が含まれる
        // given (前提条件):
        let error = RelayError::NotInSameRoom {
            from: UserId::new(1),
            to: UserId::new(2),
        };

        // when (操作):
        let message = error.to_string();

        // then (期待する結果):
        assert_eq!(error.code(), "notInSameRoom");
        assert_eq!(message, "peer 2 is not in the same room as 1");
    }
}
