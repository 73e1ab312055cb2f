//! Shared application state.

use std::sync::Arc;

use crate::{
    domain::MessagePusher,
    usecase::{EventDispatcher, MembershipCoordinator},
};

/// Shared application state
pub struct AppState {
    /// MembershipCoordinator（ルーム所属の調停）
    pub coordinator: Arc<MembershipCoordinator>,
    /// EventDispatcher（受信イベントの振り分け）
    pub dispatcher: Arc<EventDispatcher>,
    /// MessagePusher（メッセージ通知の抽象化）
    pub message_pusher: Arc<dyn MessagePusher>,
}
