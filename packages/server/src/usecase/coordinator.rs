//! UseCase: Membership Coordinator
//!
//! ルーム所属を変更する全ての操作の入口。
//!
//! - 同じユーザーに対する操作はユーザー単位のロックで到着順に直列化する
//! - 異なるユーザーの操作は並行に実行される（ルームテーブルのエントリ単位の原子性で整合性を保つ）
//! - ルームテーブルと `current_room` はこのモジュールのロック付き操作からのみ変更される
//!
//! ## テスト実装の作業記録
//!
//! ### 何をテストしているか
//! - join / leave / disconnect / register（再接続）と各不変条件
//! - 同一ユーザーへの並行 join で最後にロックを取得した join が勝つこと
//! - 不整合（複数ルームへの所属）の検出と修復
//! - マイクキューとスピーカーの操作

use std::sync::Arc;

use majlis_shared::time::Clock;
use tokio_util::sync::CancellationToken;

use crate::{
    config::CoordinatorConfig,
    domain::{
        BroadcastState, ConnectedUser, ConnectionId, CoordinatorError, GlobalStats,
        MemberSummary, RoomId, RoomState, RoomStats, Timestamp, UserId,
    },
    infrastructure::presence::{ConnectionRegistry, RoomTable},
};

use super::key_lock::KeyedLock;

/// 再接続で置き換えられた古いセッション
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplacedSession {
    pub connection_id: ConnectionId,
    /// 暗黙の退室を行ったルーム
    pub left_rooms: Vec<RoomId>,
}

/// `register` の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterOutcome {
    pub user: ConnectedUser,
    pub replaced: Option<ReplacedSession>,
}

/// `join_room` の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    pub room_id: RoomId,
    /// 退室したルーム（同じルームへの再入室では None）
    pub previous_room_id: Option<RoomId>,
    pub member_count: usize,
    pub members: Vec<MemberSummary>,
    /// 新たにメンバーになった場合 true（memberJoined を通知する）
    pub newly_joined: bool,
    /// 不整合の修復で取り除いたルーム
    pub repaired_rooms: Vec<RoomId>,
}

/// `leave_room` の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveOutcome {
    pub room_id: RoomId,
    pub member_count: usize,
    pub members: Vec<MemberSummary>,
    /// メンバーだった場合 true（memberLeft を通知する）
    pub was_member: bool,
    pub room_deleted: bool,
}

/// `disconnect` の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectOutcome {
    pub user: ConnectedUser,
    pub left_rooms: Vec<RoomId>,
}

/// ルーム所属の調停役
pub struct MembershipCoordinator {
    config: CoordinatorConfig,
    registry: ConnectionRegistry,
    rooms: RoomTable,
    locks: KeyedLock<UserId>,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
}

impl MembershipCoordinator {
    /// デフォルトルームを作成した状態で初期化する
    pub fn new(config: CoordinatorConfig, clock: Arc<dyn Clock>) -> Self {
        let registry = ConnectionRegistry::new(clock.clone());
        let rooms = RoomTable::new(config.default_room.clone(), clock.clone());
        tracing::info!("Default room '{}' ready", config.default_room);
        Self {
            config,
            registry,
            rooms,
            locks: KeyedLock::new(),
            clock,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn now(&self) -> Timestamp {
        Timestamp::new(self.clock.now_millis())
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn room_table(&self) -> &RoomTable {
        &self.rooms
    }

    /// シャットダウン時にキャンセルされるトークン
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// ユーザーのロックを直接取得する（ロック待ちの間の操作を再現するテスト用）
    #[cfg(test)]
    pub(crate) async fn lock_user(
        &self,
        user_id: UserId,
    ) -> super::key_lock::KeyedLockGuard<'_, UserId> {
        self.locks.lock(user_id).await
    }

    #[cfg(test)]
    pub(crate) fn lock_holders(&self, user_id: UserId) -> usize {
        self.locks.holders(&user_id)
    }

    // ========================================
    // Locked operations
    // ========================================

    /// 接続を登録する
    ///
    /// 同じユーザーの古いエントリがあれば、先にその全ルームから退室させてから置き換える。
    pub async fn register(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
        display_name: String,
        role: String,
    ) -> RegisterOutcome {
        let _guard = self.locks.lock(user_id).await;

        let replaced = match self.registry.get(user_id) {
            Some(previous) => {
                let left_rooms = self.remove_from_all_rooms_locked(user_id);
                tracing::info!(
                    "User {} reconnected; replacing connection {} (left {} room(s))",
                    user_id,
                    previous.connection_id,
                    left_rooms.len()
                );
                Some(ReplacedSession {
                    connection_id: previous.connection_id,
                    left_rooms,
                })
            }
            None => None,
        };

        let (user, _) = self
            .registry
            .register(connection_id, user_id, display_name, role);

        RegisterOutcome { user, replaced }
    }

    /// ルームに入室する
    ///
    /// 別のルームにいる場合はそのルームから退室する。新しいルームへの追加、
    /// `current_room` の確定、古いルームからの削除の順に行い、確定に失敗した場合は
    /// 新しいルームへの追加を取り消す。
    pub async fn join_room(
        &self,
        user_id: UserId,
        room_id: RoomId,
    ) -> Result<JoinOutcome, CoordinatorError> {
        let _guard = self.locks.lock(user_id).await;

        let user = self
            .registry
            .get(user_id)
            .ok_or(CoordinatorError::UnknownUser(user_id))?;
        let previous = user.current_room.clone();

        // 記録と異なるルームに残っている場合は修復する
        let repaired_rooms = self.repair_drift(user_id, previous.as_ref(), &room_id);

        // 1. 新しいルームへ追加（冪等）
        let already_member = self.rooms.contains_member(&room_id, user_id);
        self.rooms.add_member(&room_id, user_id);

        // 2. current_room を確定
        if let Err(e) = self
            .registry
            .set_current_room(user_id, Some(room_id.clone()))
        {
            if !already_member {
                self.rooms.remove_member(&room_id, user_id);
                self.rooms.delete_if_empty(&room_id);
            }
            tracing::warn!("Join of user {} to '{}' rolled back: {}", user_id, room_id, e);
            return Err(e);
        }

        // 3. 古いルームから削除
        let previous_room_id = match previous {
            Some(old) if old != room_id => {
                self.leave_room_table(&old, user_id);
                Some(old)
            }
            _ => None,
        };

        let member_count = self.rooms.member_count(&room_id);
        tracing::debug!(
            "User {} joined '{}' (members: {}, previous: {:?})",
            user_id,
            room_id,
            member_count,
            previous_room_id.as_ref().map(|r| r.as_str())
        );

        Ok(JoinOutcome {
            members: self.member_summaries(&room_id),
            room_id,
            previous_room_id,
            member_count,
            newly_joined: !already_member,
            repaired_rooms,
        })
    }

    /// ルームから退室する
    ///
    /// メンバーでない場合は何もせずに成功する。空になった非デフォルトルームは削除する。
    pub async fn leave_room(
        &self,
        user_id: UserId,
        room_id: RoomId,
    ) -> Result<LeaveOutcome, CoordinatorError> {
        let _guard = self.locks.lock(user_id).await;

        if !self.registry.contains(user_id) {
            return Err(CoordinatorError::UnknownUser(user_id));
        }

        let outcome = self.rooms.remove_member(&room_id, user_id);
        let room_deleted = outcome.is_empty && self.rooms.delete_if_empty(&room_id);

        if self.registry.current_room(user_id).as_ref() == Some(&room_id) {
            self.registry.set_current_room(user_id, None)?;
        } else {
            self.registry.touch(user_id);
        }

        if outcome.removed {
            tracing::debug!("User {} left '{}'", user_id, room_id);
        }

        Ok(LeaveOutcome {
            member_count: self.rooms.member_count(&room_id),
            members: self.member_summaries(&room_id),
            room_id,
            was_member: outcome.removed,
            room_deleted,
        })
    }

    /// ユーザーを所属している全てのルームから削除する
    pub async fn remove_from_all_rooms(&self, user_id: UserId) -> Vec<RoomId> {
        let _guard = self.locks.lock(user_id).await;
        self.remove_from_all_rooms_locked(user_id)
    }

    /// 全ルームからの退室と登録解除を一度のロック取得で行う
    ///
    /// `connection_id` が現在の接続と一致しない場合（再接続で置き換え済み）は何もしない。
    pub async fn disconnect(
        &self,
        user_id: UserId,
        connection_id: Option<ConnectionId>,
    ) -> Option<DisconnectOutcome> {
        let _guard = self.locks.lock(user_id).await;

        let user = self.registry.get(user_id)?;
        if let Some(connection_id) = connection_id {
            if user.connection_id != connection_id {
                tracing::debug!(
                    "Ignoring disconnect of stale connection {} for user {}",
                    connection_id,
                    user_id
                );
                return None;
            }
        }

        Some(self.disconnect_locked(user))
    }

    /// `cutoff` より前から操作がない場合に限り切断する
    ///
    /// 最終アクティビティはロック取得後に確認し直すため、ロック待ちの間に
    /// 操作したユーザーや再接続済みの接続は切断されない。
    pub async fn expire_if_inactive(
        &self,
        user_id: UserId,
        connection_id: ConnectionId,
        cutoff: Timestamp,
    ) -> Option<DisconnectOutcome> {
        let _guard = self.locks.lock(user_id).await;

        let user = self.registry.get(user_id)?;
        if user.connection_id != connection_id {
            return None;
        }
        if user.last_activity >= cutoff {
            tracing::debug!("User {} became active again; not expiring", user_id);
            return None;
        }

        Some(self.disconnect_locked(user))
    }

    /// マイクをリクエストする（キューの末尾に追加）
    pub async fn request_mic(
        &self,
        user_id: UserId,
        room_id: RoomId,
    ) -> Result<BroadcastState, CoordinatorError> {
        let _guard = self.locks.lock(user_id).await;
        self.require_registered(user_id)?;

        self.rooms
            .update(&room_id, |room, now| {
                room.enqueue_mic_request(user_id, now)?;
                Ok(room.broadcast_state())
            })
            .unwrap_or_else(|| Err(not_member(user_id, &room_id)))
    }

    /// キューに並んでいるユーザーをスピーカーにする
    pub async fn approve_mic(
        &self,
        acting_user_id: UserId,
        room_id: RoomId,
        target_user_id: UserId,
    ) -> Result<BroadcastState, CoordinatorError> {
        self.moderate(acting_user_id, room_id, |room, now| {
            room.promote_speaker(target_user_id, now)
        })
        .await
    }

    /// マイクのリクエストを取り下げさせる
    pub async fn reject_mic(
        &self,
        acting_user_id: UserId,
        room_id: RoomId,
        target_user_id: UserId,
    ) -> Result<BroadcastState, CoordinatorError> {
        self.moderate(acting_user_id, room_id, |room, now| {
            room.reject_mic_request(target_user_id, now)
        })
        .await
    }

    /// スピーカーから外す
    pub async fn remove_speaker(
        &self,
        acting_user_id: UserId,
        room_id: RoomId,
        target_user_id: UserId,
    ) -> Result<BroadcastState, CoordinatorError> {
        self.moderate(acting_user_id, room_id, |room, now| {
            room.remove_speaker(target_user_id, now);
            Ok(())
        })
        .await
    }

    /// 全ての状態を破棄し、バックグラウンドタスクを停止する
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        let users = self.registry.len();
        self.registry.clear();
        self.rooms.reset();
        tracing::info!("Membership coordinator shut down ({} user(s) dropped)", users);
    }

    // ========================================
    // Lock-free reads
    // ========================================

    /// ルームの統計（存在しないルームは 0 人）
    pub fn room_stats(&self, room_id: &RoomId) -> RoomStats {
        let member_count = self.rooms.member_count(room_id);
        RoomStats {
            room_id: room_id.clone(),
            member_count,
            is_active: member_count > 0,
        }
    }

    /// ルームのメンバー（user_id 順）
    pub fn room_members(&self, room_id: &RoomId) -> Vec<MemberSummary> {
        self.member_summaries(room_id)
    }

    pub fn room_member_ids(&self, room_id: &RoomId) -> Vec<UserId> {
        self.rooms.member_ids(room_id)
    }

    pub fn global_stats(&self) -> GlobalStats {
        GlobalStats {
            total_users: self.registry.len(),
            total_rooms: self.rooms.len(),
            active_rooms: self.rooms.active_count(),
        }
    }

    /// メンバーのいるルーム（ルーム ID 順）
    pub fn active_rooms(&self) -> Vec<RoomState> {
        self.rooms
            .rooms()
            .into_iter()
            .filter(|room| !room.is_empty())
            .collect()
    }

    pub fn resolve(&self, connection_id: &ConnectionId) -> Option<ConnectedUser> {
        self.registry.resolve(connection_id)
    }

    pub fn user(&self, user_id: UserId) -> Option<ConnectedUser> {
        self.registry.get(user_id)
    }

    pub fn connection_of(&self, user_id: UserId) -> Option<ConnectionId> {
        self.registry.connection_of(user_id)
    }

    pub fn current_room(&self, user_id: UserId) -> Option<RoomId> {
        self.registry.current_room(user_id)
    }

    pub fn is_member(&self, room_id: &RoomId, user_id: UserId) -> bool {
        self.rooms.contains_member(room_id, user_id)
    }

    pub fn touch(&self, user_id: UserId) {
        self.registry.touch(user_id);
    }

    /// `cutoff` より前から操作のないユーザーとその接続
    pub fn inactive_users(&self, cutoff: Timestamp) -> Vec<(UserId, ConnectionId)> {
        self.registry
            .inactive_since(cutoff)
            .into_iter()
            .filter_map(|user_id| {
                self.registry
                    .connection_of(user_id)
                    .map(|connection_id| (user_id, connection_id))
            })
            .collect()
    }

    /// `before` 以前から空の非デフォルトルームを削除し、削除したルームを返す
    pub fn reclaim_empty_rooms(&self, before: Timestamp) -> Vec<RoomId> {
        self.rooms
            .stale_empty_rooms(before)
            .into_iter()
            .filter(|room_id| self.rooms.delete_if_empty(room_id))
            .collect()
    }

    // ========================================
    // Helpers (caller must hold the user lock)
    // ========================================

    fn require_registered(&self, user_id: UserId) -> Result<(), CoordinatorError> {
        if self.registry.contains(user_id) {
            Ok(())
        } else {
            Err(CoordinatorError::UnknownUser(user_id))
        }
    }

    async fn moderate(
        &self,
        acting_user_id: UserId,
        room_id: RoomId,
        f: impl FnOnce(&mut RoomState, Timestamp) -> Result<(), CoordinatorError>,
    ) -> Result<BroadcastState, CoordinatorError> {
        let _guard = self.locks.lock(acting_user_id).await;
        self.require_registered(acting_user_id)?;

        self.rooms
            .update(&room_id, |room, now| {
                if !room.contains(acting_user_id) {
                    return Err(not_member(acting_user_id, &room.id));
                }
                f(room, now)?;
                Ok(room.broadcast_state())
            })
            .unwrap_or_else(|| Err(not_member(acting_user_id, &room_id)))
    }

    /// ルームテーブルからの削除と空ルームの削除
    fn leave_room_table(&self, room_id: &RoomId, user_id: UserId) -> bool {
        let outcome = self.rooms.remove_member(room_id, user_id);
        if outcome.is_empty {
            self.rooms.delete_if_empty(room_id);
        }
        outcome.removed
    }

    fn remove_from_all_rooms_locked(&self, user_id: UserId) -> Vec<RoomId> {
        let rooms = self.rooms.rooms_containing(user_id);
        if rooms.len() > 1 {
            tracing::warn!(
                "User {} found in {} rooms; removing from all of them",
                user_id,
                rooms.len()
            );
        }

        let left: Vec<RoomId> = rooms
            .into_iter()
            .filter(|room_id| self.leave_room_table(room_id, user_id))
            .collect();

        if self.registry.contains(user_id) {
            if let Err(e) = self.registry.set_current_room(user_id, None) {
                tracing::warn!("Failed to clear current room of user {}: {}", user_id, e);
            }
        }
        left
    }

    fn disconnect_locked(&self, user: ConnectedUser) -> DisconnectOutcome {
        let left_rooms = self.remove_from_all_rooms_locked(user.id);
        self.registry.unregister(user.id);
        tracing::info!(
            "User {} disconnected (left {} room(s))",
            user.id,
            left_rooms.len()
        );

        DisconnectOutcome { user, left_rooms }
    }

    /// 記録上のルームと入室先以外に残っている所属を取り除く
    fn repair_drift(
        &self,
        user_id: UserId,
        recorded: Option<&RoomId>,
        target: &RoomId,
    ) -> Vec<RoomId> {
        let stray: Vec<RoomId> = self
            .rooms
            .rooms_containing(user_id)
            .into_iter()
            .filter(|room_id| Some(room_id) != recorded && room_id != target)
            .collect();

        if !stray.is_empty() {
            tracing::warn!(
                "Membership drift for user {}: recorded {:?}, also found in {:?}; repairing",
                user_id,
                recorded.map(|r| r.as_str()),
                stray.iter().map(|r| r.as_str()).collect::<Vec<_>>()
            );
        }

        stray
            .into_iter()
            .filter(|room_id| self.leave_room_table(room_id, user_id))
            .collect()
    }

    fn member_summaries(&self, room_id: &RoomId) -> Vec<MemberSummary> {
        self.rooms
            .member_ids(room_id)
            .into_iter()
            .filter_map(|member_id| self.registry.get(member_id))
            .map(|user| user.summary())
            .collect()
    }
}

fn not_member(user_id: UserId, room_id: &RoomId) -> CoordinatorError {
    CoordinatorError::NotMember {
        user_id,
        room_id: room_id.clone(),
    }
}
