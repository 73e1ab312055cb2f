//! MessagePusher trait 定義
//!
//! 接続中のクライアントへメッセージを届けるための抽象化。
//! 具体的な実装（WebSocket など）は Infrastructure 層が提供します（依存性の逆転）。

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{error::MessagePushError, value_object::ConnectionId};

/// クライアントへの送信チャンネル
pub type PusherChannel = mpsc::UnboundedSender<String>;

/// MessagePusher trait
///
/// UseCase 層はこの trait に依存し、トランスポートの具体的な実装には依存しない。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessagePusher: Send + Sync {
    /// 接続を登録
    async fn register_client(&self, connection_id: ConnectionId, sender: PusherChannel);

    /// 接続を登録解除
    ///
    /// sender を破棄するため、対応する WebSocket の送信ループが終了し接続が閉じられる。
    async fn unregister_client(&self, connection_id: &ConnectionId);

    /// 特定の接続にメッセージを送信
    async fn push_to(
        &self,
        connection_id: &ConnectionId,
        content: &str,
    ) -> Result<(), MessagePushError>;

    /// 複数の接続にメッセージを送信
    ///
    /// 一部の送信失敗は許容し、届かなかった接続の一覧を返す。
    async fn broadcast(&self, targets: Vec<ConnectionId>, content: &str) -> Vec<ConnectionId>;
}
