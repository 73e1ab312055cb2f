//! UseCase: Presence Sweeper
//!
//! 一定間隔で以下を行うバックグラウンドタスク。
//!
//! - 無操作のまま inactivity timeout を超えたユーザーを `session.expired` で通知して切断する
//! - 前回の sweep より前から空のままの非デフォルトルームを削除する
//! - 送信失敗で積まれたエビクションを切断する
//!
//! 状態の変更は全て MembershipCoordinator の通常の操作を経由する。

use std::sync::{
    Arc,
    atomic::{AtomicI64, Ordering},
};

use crate::{
    domain::{ConnectionId, MessagePusher, RoomId, Timestamp, UserId},
    infrastructure::dto::websocket::ServerEvent,
};

use super::{
    coordinator::MembershipCoordinator,
    notifier::{Eviction, EvictionReceiver, RoomNotifier},
};

const NO_PREVIOUS_SWEEP: i64 = i64::MIN;

/// 1 回の sweep の結果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_users: Vec<UserId>,
    pub reclaimed_rooms: Vec<RoomId>,
}

pub struct PresenceSweeper {
    coordinator: Arc<MembershipCoordinator>,
    notifier: Arc<RoomNotifier>,
    message_pusher: Arc<dyn MessagePusher>,
    /// 前回の sweep 時刻（ミリ秒）
    previous_sweep: AtomicI64,
}

impl PresenceSweeper {
    pub fn new(
        coordinator: Arc<MembershipCoordinator>,
        notifier: Arc<RoomNotifier>,
        message_pusher: Arc<dyn MessagePusher>,
    ) -> Self {
        Self {
            coordinator,
            notifier,
            message_pusher,
            previous_sweep: AtomicI64::new(NO_PREVIOUS_SWEEP),
        }
    }

    /// 1 回分の sweep を実行する
    pub async fn sweep_once(&self) -> SweepReport {
        let now = self.coordinator.now();
        let timeout = self.coordinator.config().inactivity_timeout_millis();
        let cutoff = Timestamp::new(now.value().saturating_sub(timeout));

        let mut expired_users = Vec::new();
        for (user_id, connection_id) in self.coordinator.inactive_users(cutoff) {
            // 一覧の取得後に操作があったユーザーはロック下の再確認で除外される
            let Some(outcome) = self
                .coordinator
                .expire_if_inactive(user_id, connection_id, cutoff)
                .await
            else {
                continue;
            };

            let expired = ServerEvent::SessionExpired {
                reason: "inactivity timeout".to_string(),
            };
            // 接続が既に切れていても切断処理は続ける
            let _ = self
                .notifier
                .send_to_connection(&connection_id, &expired)
                .await;
            self.message_pusher.unregister_client(&connection_id).await;
            self.notifier
                .announce_departure(user_id, &outcome.left_rooms)
                .await;
            expired_users.push(user_id);
        }

        let previous = self.previous_sweep.swap(now.value(), Ordering::SeqCst);
        let reclaimed_rooms = if previous == NO_PREVIOUS_SWEEP {
            Vec::new()
        } else {
            self.coordinator
                .reclaim_empty_rooms(Timestamp::new(previous))
        };

        if !expired_users.is_empty() || !reclaimed_rooms.is_empty() {
            tracing::info!(
                "Sweep expired {} user(s) and reclaimed {} room(s)",
                expired_users.len(),
                reclaimed_rooms.len()
            );
        }

        SweepReport {
            expired_users,
            reclaimed_rooms,
        }
    }

    /// 送信に失敗した接続を切断する
    pub async fn evict(&self, eviction: Eviction) -> bool {
        self.disconnect(eviction.user_id, eviction.connection_id)
            .await
    }

    /// 切断、接続のクローズ、退室通知。既に置き換えられた接続の場合は false
    async fn disconnect(&self, user_id: UserId, connection_id: ConnectionId) -> bool {
        let outcome = self
            .coordinator
            .disconnect(user_id, Some(connection_id))
            .await;
        // sender を破棄して送信ループを終了させる
        self.message_pusher.unregister_client(&connection_id).await;

        match outcome {
            Some(outcome) => {
                self.notifier
                    .announce_departure(user_id, &outcome.left_rooms)
                    .await;
                true
            }
            None => false,
        }
    }

    /// シャットダウンまで sweep とエビクションの処理を続ける
    pub async fn run(self: Arc<Self>, mut evictions: EvictionReceiver) {
        let shutdown = self.coordinator.shutdown_token();
        let mut interval = tokio::time::interval(self.coordinator.config().sweep_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // 最初の tick は即座に完了する
        interval.tick().await;

        tracing::info!(
            "Presence sweeper started (interval: {:?}, timeout: {:?})",
            self.coordinator.config().sweep_interval,
            self.coordinator.config().inactivity_timeout
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    tracing::info!("Presence sweeper shutting down");
                    break;
                }
                Some(eviction) = evictions.recv() => {
                    self.evict(eviction).await;
                }
                _ = interval.tick() => {
                    self.sweep_once().await;
                }
            }
        }
    }

    /// バックグラウンドタスクとして起動する
    pub fn spawn(self: Arc<Self>, evictions: EvictionReceiver) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(evictions))
    }
}
