//! Domain entities: the presence of a connected user and the state of a room.

use std::collections::{BTreeSet, VecDeque};

use serde::Serialize;

use super::{
    error::CoordinatorError,
    value_object::{ConnectionId, RoomId, Timestamp, UserId},
};

/// A user with a live connection.
///
/// Owned exclusively by the connection registry; the coordinator is the only
/// writer of `current_room`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectedUser {
    pub id: UserId,
    pub display_name: String,
    pub role: String,
    pub connection_id: ConnectionId,
    /// At most one room at any instant
    pub current_room: Option<RoomId>,
    pub last_activity: Timestamp,
    pub connected_at: Timestamp,
}

impl ConnectedUser {
    pub fn new(
        id: UserId,
        display_name: String,
        role: String,
        connection_id: ConnectionId,
        now: Timestamp,
    ) -> Self {
        Self {
            id,
            display_name,
            role,
            connection_id,
            current_room: None,
            last_activity: now,
            connected_at: now,
        }
    }

    /// Display information shared with other room members
    pub fn summary(&self) -> MemberSummary {
        MemberSummary {
            user_id: self.id,
            display_name: self.display_name.clone(),
            role: self.role.clone(),
        }
    }
}

/// Display information of a room member
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberSummary {
    pub user_id: UserId,
    pub display_name: String,
    pub role: String,
}

/// Speaker list and mic queue of a broadcast room
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastState {
    pub room_id: RoomId,
    pub speaker_ids: Vec<UserId>,
    pub mic_queue: Vec<UserId>,
}

/// Member count and activity of a single room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomStats {
    pub room_id: RoomId,
    pub member_count: usize,
    /// `member_count > 0`
    pub is_active: bool,
}

/// Process-wide presence counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GlobalStats {
    pub total_users: usize,
    pub total_rooms: usize,
    pub active_rooms: usize,
}

/// In-memory state of a room.
///
/// Invariants kept by this type:
/// - a member appears once (set semantics)
/// - every speaker is a member
/// - every queued user is a member and appears once in the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomState {
    pub id: RoomId,
    member_ids: BTreeSet<UserId>,
    speaker_ids: BTreeSet<UserId>,
    mic_request_queue: VecDeque<UserId>,
    pub last_activity: Timestamp,
    pub created_at: Timestamp,
}

impl RoomState {
    pub fn new(id: RoomId, now: Timestamp) -> Self {
        Self {
            id,
            member_ids: BTreeSet::new(),
            speaker_ids: BTreeSet::new(),
            mic_request_queue: VecDeque::new(),
            last_activity: now,
            created_at: now,
        }
    }

    /// Add a member. Returns `false` if the user was already a member.
    pub fn add_member(&mut self, user_id: UserId, now: Timestamp) -> bool {
        self.last_activity = now;
        self.member_ids.insert(user_id)
    }

    /// Remove a member along with any speaker slot or pending mic request.
    ///
    /// Returns `false` if the user was not a member.
    pub fn remove_member(&mut self, user_id: UserId, now: Timestamp) -> bool {
        let removed = self.member_ids.remove(&user_id);
        self.speaker_ids.remove(&user_id);
        self.mic_request_queue.retain(|queued| *queued != user_id);
        if removed {
            self.last_activity = now;
        }
        removed
    }

    pub fn contains(&self, user_id: UserId) -> bool {
        self.member_ids.contains(&user_id)
    }

    /// Member ids in ascending order
    pub fn member_ids(&self) -> Vec<UserId> {
        self.member_ids.iter().copied().collect()
    }

    pub fn member_count(&self) -> usize {
        self.member_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.member_ids.is_empty()
    }

    pub fn speaker_ids(&self) -> Vec<UserId> {
        self.speaker_ids.iter().copied().collect()
    }

    /// Pending mic requests in arrival order
    pub fn mic_queue(&self) -> Vec<UserId> {
        self.mic_request_queue.iter().copied().collect()
    }

    /// Queue a mic request for a member.
    ///
    /// Requesting again while queued, or while already a speaker, leaves the
    /// queue untouched.
    pub fn enqueue_mic_request(
        &mut self,
        user_id: UserId,
        now: Timestamp,
    ) -> Result<(), CoordinatorError> {
        self.require_member(user_id)?;
        if self.speaker_ids.contains(&user_id) || self.mic_request_queue.contains(&user_id) {
            return Ok(());
        }
        self.mic_request_queue.push_back(user_id);
        self.last_activity = now;
        Ok(())
    }

    /// Move a queued member to the speaker list
    pub fn promote_speaker(
        &mut self,
        user_id: UserId,
        now: Timestamp,
    ) -> Result<(), CoordinatorError> {
        self.require_member(user_id)?;
        self.dequeue(user_id)?;
        self.speaker_ids.insert(user_id);
        self.last_activity = now;
        Ok(())
    }

    /// Drop a pending mic request
    pub fn reject_mic_request(
        &mut self,
        user_id: UserId,
        now: Timestamp,
    ) -> Result<(), CoordinatorError> {
        self.dequeue(user_id)?;
        self.last_activity = now;
        Ok(())
    }

    /// Revoke a speaker slot. Returns `false` if the user was not speaking.
    pub fn remove_speaker(&mut self, user_id: UserId, now: Timestamp) -> bool {
        let removed = self.speaker_ids.remove(&user_id);
        if removed {
            self.last_activity = now;
        }
        removed
    }

    pub fn broadcast_state(&self) -> BroadcastState {
        BroadcastState {
            room_id: self.id.clone(),
            speaker_ids: self.speaker_ids(),
            mic_queue: self.mic_queue(),
        }
    }

    fn require_member(&self, user_id: UserId) -> Result<(), CoordinatorError> {
        if self.contains(user_id) {
            Ok(())
        } else {
            Err(CoordinatorError::NotMember {
                user_id,
                room_id: self.id.clone(),
            })
        }
    }

    fn dequeue(&mut self, user_id: UserId) -> Result<(), CoordinatorError> {
        match self
            .mic_request_queue
            .iter()
            .position(|queued| *queued == user_id)
        {
            Some(index) => {
                self.mic_request_queue.remove(index);
                Ok(())
            }
            None => Err(CoordinatorError::NotQueued {
                user_id,
                room_id: self.id.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(id: &str) -> RoomState {
        RoomState::new(RoomId::new(id.to_string()).unwrap(), Timestamp::new(1_000))
    }

    fn user(id: i64) -> UserId {
        UserId::new(id)
    }

    #[test]
    fn test_add_member_has_set_semantics() {
        // テスト項目: 同じユーザーを複数回追加しても重複しない
        // given (前提条件):
        let mut room = room("general");

        // when (操作):
        let first = room.add_member(user(1), Timestamp::new(2_000));
        let second = room.add_member(user(1), Timestamp::new(3_000));

        // then (期待する結果):
        assert!(first);
        assert!(!second);
        assert_eq!(room.member_count(), 1);
        assert_eq!(room.last_activity, Timestamp::new(3_000));
    }

    #[test]
    fn test_remove_member_strips_speaker_and_queue() {
        // テスト項目: メンバー削除時にスピーカーとマイク待ち行列からも削除される
        // given (前提条件):
        let mut room = room("stage");
        let now = Timestamp::new(2_000);
        room.add_member(user(1), now);
        room.add_member(user(2), now);
        room.enqueue_mic_request(user(1), now).unwrap();
        room.promote_speaker(user(1), now).unwrap();
        room.enqueue_mic_request(user(2), now).unwrap();

        // when (操作):
        let removed_speaker = room.remove_member(user(1), now);
        let removed_queued = room.remove_member(user(2), now);

        // then (期待する結果):
        assert!(removed_speaker);
        assert!(removed_queued);
        assert!(room.speaker_ids().is_empty());
        assert!(room.mic_queue().is_empty());
        assert!(room.is_empty());
    }

    #[test]
    fn test_remove_non_member_returns_false() {
        // テスト項目: メンバーでないユーザーの削除は false を返し状態を変えない
        // given (前提条件):
        let mut room = room("general");
        room.add_member(user(1), Timestamp::new(2_000));

        // when (操作):
        let removed = room.remove_member(user(9), Timestamp::new(5_000));

        // then (期待する結果):
        assert!(!removed);
        assert_eq!(room.member_ids(), vec![user(1)]);
        assert_eq!(room.last_activity, Timestamp::new(2_000));
    }

    #[test]
    fn test_mic_queue_preserves_fifo_order() {
        // テスト項目: マイク待ち行列は到着順を保持する
        // given (前提条件):
        let mut room = room("stage");
        let now = Timestamp::new(2_000);
        for id in [3, 1, 2] {
            room.add_member(user(id), now);
        }

        // when (操作):
        room.enqueue_mic_request(user(3), now).unwrap();
        room.enqueue_mic_request(user(1), now).unwrap();
        room.enqueue_mic_request(user(2), now).unwrap();
        room.enqueue_mic_request(user(3), now).unwrap();

        // then (期待する結果):
        assert_eq!(room.mic_queue(), vec![user(3), user(1), user(2)]);
    }

    #[test]
    fn test_enqueue_requires_membership() {
        // テスト項目: メンバーでないユーザーはマイクを要求できない
        // given (前提条件):
        let mut room = room("stage");

        // when (操作):
        let result = room.enqueue_mic_request(user(7), Timestamp::new(2_000));

        // then (期待する結果):
        assert_eq!(
            result,
            Err(CoordinatorError::NotMember {
                user_id: user(7),
                room_id: RoomId::new("stage".to_string()).unwrap(),
            })
        );
    }

    #[test]
    fn test_speaker_cannot_requeue() {
        // テスト項目: すでにスピーカーのユーザーは待ち行列に再度入らない
        // given (前提条件):
        let mut room = room("stage");
        let now = Timestamp::new(2_000);
        room.add_member(user(1), now);
        room.enqueue_mic_request(user(1), now).unwrap();
        room.promote_speaker(user(1), now).unwrap();

        // when (操作):
        room.enqueue_mic_request(user(1), now).unwrap();

        // then (期待する結果):
        assert!(room.mic_queue().is_empty());
        assert_eq!(room.speaker_ids(), vec![user(1)]);
    }

    #[test]
    fn test_promote_requires_pending_request() {
        // テスト項目: 待ち行列にいないユーザーはスピーカーに昇格できない
        // given (前提条件):
        let mut room = room("stage");
        room.add_member(user(1), Timestamp::new(2_000));

        // when (操作):
        let result = room.promote_speaker(user(1), Timestamp::new(3_000));

        // then (期待する結果):
        assert!(matches!(result, Err(CoordinatorError::NotQueued { .. })));
        assert!(room.speaker_ids().is_empty());
    }

    #[test]
    fn test_reject_and_remove_speaker() {
        // テスト項目: マイク要求の却下とスピーカーの解除ができる
        // given (前提条件):
        let mut room = room("stage");
        let now = Timestamp::new(2_000);
        room.add_member(user(1), now);
        room.add_member(user(2), now);
        room.enqueue_mic_request(user(1), now).unwrap();
        room.enqueue_mic_request(user(2), now).unwrap();
        room.promote_speaker(user(2), now).unwrap();

        // when (操作):
        let rejected = room.reject_mic_request(user(1), now);
        let removed = room.remove_speaker(user(2), now);
        let removed_again = room.remove_speaker(user(2), now);

        // then (期待する結果):
        assert!(rejected.is_ok());
        assert!(removed);
        assert!(!removed_again);
        let state = room.broadcast_state();
        assert!(state.speaker_ids.is_empty());
        assert!(state.mic_queue.is_empty());
    }

    #[test]
    fn test_member_summary_serializes_camel_case() {
        // テスト項目: MemberSummary は camelCase の JSON になる
        // given (前提条件):
        let connected = ConnectedUser::new(
            user(5),
            "Layla".to_string(),
            "member".to_string(),
            ConnectionId::generate(),
            Timestamp::new(1_000),
        );

        // when (操作):
        let json = serde_json::to_value(connected.summary()).unwrap();

        // then (期待する結果):
        assert_eq!(
            json,
            serde_json::json!({"userId": 5, "displayName": "Layla", "role": "member"})
        );
    }
}
