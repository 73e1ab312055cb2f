//! UseCase: Event Dispatcher
//!
//! WebSocket で受信したイベントを解釈し、Coordinator / Relay を呼び出して
//! 応答（ack / error）と通知を送る。
//!
//! - エラーは呼び出した接続にだけ返し、ブロードキャストは行わない
//! - 認証済みセッションからのイベントは全て最終アクティビティを更新する

use std::sync::Arc;

use crate::{
    domain::{
        BroadcastState, ConnectionId, CoordinatorError, MessagePusher, RoomId, UserId,
    },
    infrastructure::dto::websocket::{ClientEvent, ServerEvent},
};

use super::{
    coordinator::MembershipCoordinator, notifier::RoomNotifier, signaling::SignalingRelay,
};

/// 接続ごとのセッション状態
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub connection_id: ConnectionId,
    /// authenticate 前は None
    pub user_id: Option<UserId>,
}

impl Session {
    pub fn new(connection_id: ConnectionId) -> Self {
        Self {
            connection_id,
            user_id: None,
        }
    }
}

/// 受信イベントの振り分けを担う
pub struct EventDispatcher {
    coordinator: Arc<MembershipCoordinator>,
    relay: Arc<SignalingRelay>,
    notifier: Arc<RoomNotifier>,
    message_pusher: Arc<dyn MessagePusher>,
}

impl EventDispatcher {
    pub fn new(
        coordinator: Arc<MembershipCoordinator>,
        relay: Arc<SignalingRelay>,
        notifier: Arc<RoomNotifier>,
        message_pusher: Arc<dyn MessagePusher>,
    ) -> Self {
        Self {
            coordinator,
            relay,
            notifier,
            message_pusher,
        }
    }

    /// テキストフレームを処理する
    pub async fn handle_text(&self, session: &mut Session, text: &str) {
        match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => self.dispatch(session, event).await,
            Err(e) => {
                tracing::warn!(
                    "Invalid message from connection {}: {}",
                    session.connection_id,
                    e
                );
                self.reply(session, ServerEvent::error("invalidMessage", e.to_string()))
                    .await;
            }
        }
    }

    /// 解釈済みのイベントを処理する
    pub async fn dispatch(&self, session: &mut Session, event: ClientEvent) {
        if let ClientEvent::Authenticate {
            user_id,
            display_name,
            role,
        } = event
        {
            self.authenticate(session, user_id, display_name, role)
                .await;
            return;
        }

        if let ClientEvent::Ping = event {
            if let Some(user_id) = self.authorized_user(session) {
                self.coordinator.touch(user_id);
            }
            let timestamp = self.coordinator.now().value();
            self.reply(session, ServerEvent::Pong { timestamp }).await;
            return;
        }

        let Some(user_id) = self.authorized_user(session) else {
            self.reply(
                session,
                ServerEvent::error("notAuthenticated", "authenticate before sending events"),
            )
            .await;
            return;
        };
        self.coordinator.touch(user_id);

        match event {
            ClientEvent::JoinRoom { room_id } => {
                if let Some(room_id) = self.parse_room_id(session, room_id).await {
                    self.join_room(session, user_id, room_id).await;
                }
            }
            ClientEvent::LeaveRoom { room_id } => {
                if let Some(room_id) = self.parse_room_id(session, room_id).await {
                    self.leave_room(session, user_id, room_id).await;
                }
            }
            ClientEvent::RequestMic { room_id } => {
                if let Some(room_id) = self.parse_room_id(session, room_id).await {
                    let result = self.coordinator.request_mic(user_id, room_id).await;
                    self.publish_broadcast_state(session, result).await;
                }
            }
            ClientEvent::ApproveMic {
                room_id,
                user_id: target,
            } => {
                if let Some(room_id) = self.parse_room_id(session, room_id).await {
                    let result = self.coordinator.approve_mic(user_id, room_id, target).await;
                    self.publish_broadcast_state(session, result).await;
                }
            }
            ClientEvent::RejectMic {
                room_id,
                user_id: target,
            } => {
                if let Some(room_id) = self.parse_room_id(session, room_id).await {
                    let result = self.coordinator.reject_mic(user_id, room_id, target).await;
                    self.publish_broadcast_state(session, result).await;
                }
            }
            ClientEvent::RemoveSpeaker {
                room_id,
                user_id: target,
            } => {
                if let Some(room_id) = self.parse_room_id(session, room_id).await {
                    let result = self
                        .coordinator
                        .remove_speaker(user_id, room_id, target)
                        .await;
                    self.publish_broadcast_state(session, result).await;
                }
            }
            signal => {
                if let Some((kind, to_user_id, payload)) = signal.into_signal() {
                    match self.relay.relay(user_id, to_user_id, kind, payload).await {
                        Ok(()) => {
                            self.reply(session, ServerEvent::SignalDelivered { to_user_id, kind })
                                .await;
                        }
                        Err(e) => {
                            tracing::debug!("Signal from {} rejected: {}", user_id, e);
                            self.reply(session, ServerEvent::error(e.code(), e.to_string()))
                                .await;
                        }
                    }
                }
            }
        }
    }

    /// 接続の終了を処理する
    ///
    /// 置き換え済みの接続であれば所属には触れない。
    pub async fn handle_disconnect(&self, session: &Session) {
        if let Some(user_id) = session.user_id {
            if let Some(outcome) = self
                .coordinator
                .disconnect(user_id, Some(session.connection_id))
                .await
            {
                self.notifier
                    .announce_departure(user_id, &outcome.left_rooms)
                    .await;
            }
        }
        self.message_pusher
            .unregister_client(&session.connection_id)
            .await;
    }

    async fn authenticate(
        &self,
        session: &mut Session,
        user_id: UserId,
        display_name: String,
        role: String,
    ) {
        if session.user_id.is_some() {
            self.reply(
                session,
                ServerEvent::error("alreadyAuthenticated", "connection is already authenticated"),
            )
            .await;
            return;
        }

        let outcome = self
            .coordinator
            .register(session.connection_id, user_id, display_name, role)
            .await;
        session.user_id = Some(user_id);

        if let Some(replaced) = outcome.replaced {
            let notice = ServerEvent::SessionReplaced {
                reason: "signed in from another connection".to_string(),
            };
            let _ = self
                .notifier
                .send_to_connection(&replaced.connection_id, &notice)
                .await;
            // 古い接続の sender を破棄して接続を閉じる
            self.message_pusher
                .unregister_client(&replaced.connection_id)
                .await;
            self.notifier
                .announce_departure(user_id, &replaced.left_rooms)
                .await;
        }

        tracing::info!(
            "User {} authenticated on connection {}",
            user_id,
            session.connection_id
        );
        self.reply(
            session,
            ServerEvent::Authenticated {
                user_id,
                display_name: outcome.user.display_name,
                role: outcome.user.role,
            },
        )
        .await;
    }

    /// 接続が現在もユーザーの有効な接続であれば、そのユーザーを返す
    ///
    /// 再接続で置き換えられた接続はセッションの認証状態を破棄する。
    fn authorized_user(&self, session: &mut Session) -> Option<UserId> {
        let user_id = session.user_id?;
        match self.coordinator.resolve(&session.connection_id) {
            Some(user) if user.id == user_id => Some(user_id),
            _ => {
                tracing::debug!(
                    "Connection {} no longer belongs to user {}",
                    session.connection_id,
                    user_id
                );
                session.user_id = None;
                None
            }
        }
    }

    async fn join_room(&self, session: &Session, user_id: UserId, room_id: RoomId) {
        let outcome = match self.coordinator.join_room(user_id, room_id).await {
            Ok(outcome) => outcome,
            Err(e) => return self.reply_coordinator_error(session, e).await,
        };

        self.reply(
            session,
            ServerEvent::RoomJoined {
                room_id: outcome.room_id.as_str().to_string(),
                previous_room_id: outcome
                    .previous_room_id
                    .as_ref()
                    .map(|room_id| room_id.as_str().to_string()),
                member_count: outcome.member_count,
                members: outcome.members.clone(),
            },
        )
        .await;

        self.notifier
            .announce_departure(user_id, &outcome.repaired_rooms)
            .await;
        if let Some(previous) = &outcome.previous_room_id {
            self.notifier.member_left(previous, user_id).await;
        }
        if outcome.newly_joined {
            if let Some(member) = outcome.members.iter().find(|m| m.user_id == user_id) {
                self.notifier.member_joined(&outcome.room_id, member).await;
            }
        }
    }

    async fn leave_room(&self, session: &Session, user_id: UserId, room_id: RoomId) {
        let outcome = match self.coordinator.leave_room(user_id, room_id).await {
            Ok(outcome) => outcome,
            Err(e) => return self.reply_coordinator_error(session, e).await,
        };

        self.reply(
            session,
            ServerEvent::RoomLeft {
                room_id: outcome.room_id.as_str().to_string(),
                member_count: outcome.member_count,
            },
        )
        .await;

        if outcome.was_member {
            self.notifier.member_left(&outcome.room_id, user_id).await;
        }
    }

    async fn publish_broadcast_state(
        &self,
        session: &Session,
        result: Result<BroadcastState, CoordinatorError>,
    ) {
        match result {
            Ok(state) => self.notifier.broadcast_state(state).await,
            Err(e) => self.reply_coordinator_error(session, e).await,
        }
    }

    async fn parse_room_id(&self, session: &Session, raw: String) -> Option<RoomId> {
        match RoomId::new(raw) {
            Ok(room_id) => Some(room_id),
            Err(e) => {
                self.reply(session, ServerEvent::error("invalidRoomId", e.to_string()))
                    .await;
                None
            }
        }
    }

    async fn reply_coordinator_error(&self, session: &Session, error: CoordinatorError) {
        tracing::debug!(
            "Request from connection {} rejected: {}",
            session.connection_id,
            error
        );
        self.reply(session, ServerEvent::error(error.code(), error.to_string()))
            .await;
    }

    async fn reply(&self, session: &Session, event: ServerEvent) {
        if let Err(e) = self
            .notifier
            .send_to_connection(&session.connection_id, &event)
            .await
        {
            tracing::warn!(
                "Failed to reply to connection {}: {}",
                session.connection_id,
                e
            );
        }
    }
}
