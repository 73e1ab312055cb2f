//! UseCase: WebRTC シグナリングの中継
//!
//! offer / answer / ICE candidate を同じルームにいる相手にだけ転送する。
//! payload は解釈せずそのまま転送し、状態は保持しない。

use std::sync::Arc;

use crate::{
    domain::{RelayError, SignalKind, UserId},
    infrastructure::dto::websocket::ServerEvent,
};

use super::{coordinator::MembershipCoordinator, notifier::RoomNotifier};

/// シグナリング中継のユースケース
pub struct SignalingRelay {
    coordinator: Arc<MembershipCoordinator>,
    notifier: Arc<RoomNotifier>,
}

impl SignalingRelay {
    pub fn new(coordinator: Arc<MembershipCoordinator>, notifier: Arc<RoomNotifier>) -> Self {
        Self {
            coordinator,
            notifier,
        }
    }

    /// シグナルを中継する
    ///
    /// # Errors
    ///
    /// * `UnknownUser` - 送信者が未登録
    /// * `NotInRoom` - 送信者がどのルームにもいない
    /// * `PeerUnavailable` - 相手がオフライン、または送信に失敗した
    /// * `NotInSameRoom` - 相手が送信者と同じルームにいない
    pub async fn relay(
        &self,
        from_user_id: UserId,
        to_user_id: UserId,
        kind: SignalKind,
        payload: serde_json::Value,
    ) -> Result<(), RelayError> {
        let sender = self
            .coordinator
            .user(from_user_id)
            .ok_or(RelayError::UnknownUser(from_user_id))?;
        self.coordinator.touch(from_user_id);

        // 1. 送信者のルーム
        let room_id = sender
            .current_room
            .ok_or(RelayError::NotInRoom(from_user_id))?;

        // 2. 相手の接続
        let target_connection = self
            .coordinator
            .connection_of(to_user_id)
            .ok_or(RelayError::PeerUnavailable(to_user_id))?;

        // 3. 同じルームにいるか
        if !self.coordinator.is_member(&room_id, to_user_id) {
            return Err(RelayError::NotInSameRoom {
                from: from_user_id,
                to: to_user_id,
            });
        }

        // 4. 転送
        let event = ServerEvent::signal(kind, from_user_id, payload);
        if let Err(e) = self
            .notifier
            .send_to_connection(&target_connection, &event)
            .await
        {
            tracing::warn!(
                "Failed to relay {} from {} to {}: {}",
                kind,
                from_user_id,
                to_user_id,
                e
            );
            self.notifier
                .schedule_eviction(to_user_id, target_connection);
            return Err(RelayError::PeerUnavailable(to_user_id));
        }

        tracing::debug!(
            "Relayed {} from {} to {} in '{}'",
            kind,
            from_user_id,
            to_user_id,
            room_id
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::CoordinatorConfig,
        domain::{ConnectionId, MessagePushError, MockMessagePusher, RoomId},
        usecase::notifier::Eviction,
    };
    use majlis_shared::time::{Clock, ManualClock};
    use serde_json::json;
    use tokio::sync::mpsc;

    fn room_id(id: &str) -> RoomId {
        RoomId::new(id.to_string()).unwrap()
    }

    struct Fixture {
        coordinator: Arc<MembershipCoordinator>,
        clock: Arc<ManualClock>,
        connections: Vec<ConnectionId>,
    }

    /// user 1, 2 は lobby、user 3 は stage、user 4 はルーム無し
    async fn create_fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(1_000));
        let coordinator = Arc::new(MembershipCoordinator::new(
            CoordinatorConfig::new(room_id("general")),
            clock.clone(),
        ));
        let mut connections = Vec::new();
        for (id, room) in [(1, Some("lobby")), (2, Some("lobby")), (3, Some("stage")), (4, None)] {
            let connection_id = ConnectionId::generate();
            coordinator
                .register(
                    connection_id,
                    UserId::new(id),
                    format!("user-{}", id),
                    "member".to_string(),
                )
                .await;
            if let Some(room) = room {
                coordinator
                    .join_room(UserId::new(id), room_id(room))
                    .await
                    .unwrap();
            }
            connections.push(connection_id);
        }
        Fixture {
            coordinator,
            clock,
            connections,
        }
    }

    fn create_relay(
        fixture: &Fixture,
        pusher: MockMessagePusher,
    ) -> (SignalingRelay, mpsc::UnboundedReceiver<Eviction>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let notifier = Arc::new(RoomNotifier::new(
            fixture.coordinator.clone(),
            Arc::new(pusher),
            tx,
        ));
        (
            SignalingRelay::new(fixture.coordinator.clone(), notifier),
            rx,
        )
    }

    #[tokio::test]
    async fn test_relay_to_peer_in_same_room() {
        // テスト項目: 同じルームの相手に payload がそのまま fromUserId 付きで届く
        // given (前提条件):
        let fixture = create_fixture().await;
        let target = fixture.connections[1];
        let mut pusher = MockMessagePusher::new();
        pusher
            .expect_push_to()
            .withf(move |connection_id, content| {
                let value: serde_json::Value = serde_json::from_str(content).unwrap();
                *connection_id == target
                    && value
                        == json!({"type": "signal.offer", "fromUserId": 1, "payload": {"sdp": "v=0"}})
            })
            .times(1)
            .returning(|_, _| Ok(()));
        let (relay, _rx) = create_relay(&fixture, pusher);
        fixture.clock.advance(500);

        // when (操作):
        let result = relay
            .relay(UserId::new(1), UserId::new(2), SignalKind::Offer, json!({"sdp": "v=0"}))
            .await;

        // then (期待する結果):
        assert_eq!(result, Ok(()));
        let sender = fixture.coordinator.user(UserId::new(1)).unwrap();
        assert_eq!(sender.last_activity.value(), fixture.clock.now_millis());
    }

    #[tokio::test]
    async fn test_relay_rejects_peer_in_other_room() {
        // テスト項目: 別のルームにいる相手へのシグナルは拒否され、何も送信されない
        // given (前提条件):
        let fixture = create_fixture().await;
        let mut pusher = MockMessagePusher::new();
        pusher.expect_push_to().never();
        let (relay, _rx) = create_relay(&fixture, pusher);

        // when (操作):
        let result = relay
            .relay(UserId::new(1), UserId::new(3), SignalKind::Ice, json!({}))
            .await;

        // then (期待する結果):
        assert_eq!(
            result,
            Err(RelayError::NotInSameRoom {
                from: UserId::new(1),
                to: UserId::new(3)
            })
        );
    }

    #[tokio::test]
    async fn test_relay_precondition_errors() {
        // テスト項目: 送信者がルームにいない・未登録、相手がオフラインの場合のエラー
        // given (前提条件):
        let fixture = create_fixture().await;
        let mut pusher = MockMessagePusher::new();
        pusher.expect_push_to().never();
        let (relay, _rx) = create_relay(&fixture, pusher);

        // when (操作):
        let not_in_room = relay
            .relay(UserId::new(4), UserId::new(1), SignalKind::Offer, json!({}))
            .await;
        let unknown = relay
            .relay(UserId::new(9), UserId::new(1), SignalKind::Offer, json!({}))
            .await;
        let offline = relay
            .relay(UserId::new(1), UserId::new(9), SignalKind::Answer, json!({}))
            .await;

        // then (期待する結果):
        assert_eq!(not_in_room, Err(RelayError::NotInRoom(UserId::new(4))));
        assert_eq!(unknown, Err(RelayError::UnknownUser(UserId::new(9))));
        assert_eq!(offline, Err(RelayError::PeerUnavailable(UserId::new(9))));
    }

    #[tokio::test]
    async fn test_push_failure_reports_unavailable_and_evicts() {
        // テスト項目: 相手への送信失敗は PeerUnavailable となり、相手がエビクション対象になる
        // given (前提条件):
        let fixture = create_fixture().await;
        let target = fixture.connections[1];
        let mut pusher = MockMessagePusher::new();
        pusher
            .expect_push_to()
            .times(1)
            .returning(|_, _| Err(MessagePushError::PushFailed("closed".to_string())));
        let (relay, mut rx) = create_relay(&fixture, pusher);

        // when (操作):
        let result = relay
            .relay(UserId::new(1), UserId::new(2), SignalKind::Answer, json!({}))
            .await;

        // then (期待する結果):
        assert_eq!(result, Err(RelayError::PeerUnavailable(UserId::new(2))));
        assert_eq!(
            rx.try_recv().unwrap(),
            Eviction {
                user_id: UserId::new(2),
                connection_id: target
            }
        );
    }
}
