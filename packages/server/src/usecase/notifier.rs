//! UseCase: Room Notifier
//!
//! ルームのメンバーへのイベント配信。
//!
//! 配信先の接続は送信時点の所属から求める。送信に失敗した接続は
//! 退室処理の対象としてエビクションキューに積み、Presence Sweeper が処理する。

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::{
    domain::{
        BroadcastState, ConnectionId, MemberSummary, MessagePushError, MessagePusher, RoomId,
        UserId,
    },
    infrastructure::dto::websocket::ServerEvent,
};

use super::coordinator::MembershipCoordinator;

/// 送信に失敗した接続
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Eviction {
    pub user_id: UserId,
    pub connection_id: ConnectionId,
}

pub type EvictionSender = mpsc::UnboundedSender<Eviction>;
pub type EvictionReceiver = mpsc::UnboundedReceiver<Eviction>;

/// ルームへのファンアウトを担う
pub struct RoomNotifier {
    coordinator: Arc<MembershipCoordinator>,
    message_pusher: Arc<dyn MessagePusher>,
    evictions: EvictionSender,
}

impl RoomNotifier {
    pub fn new(
        coordinator: Arc<MembershipCoordinator>,
        message_pusher: Arc<dyn MessagePusher>,
        evictions: EvictionSender,
    ) -> Self {
        Self {
            coordinator,
            message_pusher,
            evictions,
        }
    }

    /// 特定の接続にイベントを送信する
    pub async fn send_to_connection(
        &self,
        connection_id: &ConnectionId,
        event: &ServerEvent,
    ) -> Result<(), MessagePushError> {
        self.message_pusher
            .push_to(connection_id, &event.to_json())
            .await
    }

    /// ルームの現在のメンバーにイベントを配信し、届いた数を返す
    pub async fn broadcast_to_room(
        &self,
        room_id: &RoomId,
        event: &ServerEvent,
        exclude: Option<UserId>,
    ) -> usize {
        let recipients: Vec<(UserId, ConnectionId)> = self
            .coordinator
            .room_member_ids(room_id)
            .into_iter()
            .filter(|member_id| Some(*member_id) != exclude)
            .filter_map(|member_id| {
                self.coordinator
                    .connection_of(member_id)
                    .map(|connection_id| (member_id, connection_id))
            })
            .collect();

        if recipients.is_empty() {
            return 0;
        }

        let targets: Vec<ConnectionId> = recipients.iter().map(|(_, cid)| *cid).collect();
        let failed = self
            .message_pusher
            .broadcast(targets, &event.to_json())
            .await;

        for connection_id in &failed {
            if let Some((user_id, _)) = recipients.iter().find(|(_, cid)| cid == connection_id) {
                self.schedule_eviction(*user_id, *connection_id);
            }
        }

        recipients.len().saturating_sub(failed.len())
    }

    /// `room.memberJoined` を入室したユーザー以外のメンバーに配信する
    pub async fn member_joined(&self, room_id: &RoomId, member: &MemberSummary) {
        let event = ServerEvent::MemberJoined {
            room_id: room_id.as_str().to_string(),
            user_id: member.user_id,
            display_name: member.display_name.clone(),
            role: member.role.clone(),
        };
        let delivered = self
            .broadcast_to_room(room_id, &event, Some(member.user_id))
            .await;
        tracing::debug!(
            "Broadcasted memberJoined for user {} to {} member(s) of '{}'",
            member.user_id,
            delivered,
            room_id
        );
    }

    /// `room.memberLeft` をルームの残りのメンバーに配信する
    pub async fn member_left(&self, room_id: &RoomId, user_id: UserId) {
        let event = ServerEvent::MemberLeft {
            room_id: room_id.as_str().to_string(),
            user_id,
        };
        let delivered = self.broadcast_to_room(room_id, &event, Some(user_id)).await;
        tracing::debug!(
            "Broadcasted memberLeft for user {} to {} member(s) of '{}'",
            user_id,
            delivered,
            room_id
        );
    }

    /// 退室した全てのルームに `room.memberLeft` を配信する
    pub async fn announce_departure(&self, user_id: UserId, rooms: &[RoomId]) {
        for room_id in rooms {
            self.member_left(room_id, user_id).await;
        }
    }

    /// `room.broadcastState` をルームの全メンバーに配信する
    pub async fn broadcast_state(&self, state: BroadcastState) {
        let room_id = state.room_id.clone();
        let event = ServerEvent::from(state);
        self.broadcast_to_room(&room_id, &event, None).await;
    }

    /// 接続を退室処理の対象にする
    pub fn schedule_eviction(&self, user_id: UserId, connection_id: ConnectionId) {
        tracing::warn!(
            "Transport failure for user {} on connection {}; scheduling disconnect",
            user_id,
            connection_id
        );
        if self
            .evictions
            .send(Eviction {
                user_id,
                connection_id,
            })
            .is_err()
        {
            tracing::debug!("Eviction queue closed; dropping eviction of user {}", user_id);
        }
    }
}
