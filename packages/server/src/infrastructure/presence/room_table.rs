//! Room Table: ルーム ID ごとのメンバー集合とブロードキャスト用メタデータ。
//!
//! 操作の順序付けは MembershipCoordinator が担う。このテーブル自身は
//! エントリ単位の原子性（DashMap のシャードロック）だけを提供し、
//! 空ルームの削除は `delete_if_empty` で再確認してから行う。

use std::sync::Arc;

use dashmap::DashMap;
use majlis_shared::time::Clock;

use crate::domain::{RoomId, RoomState, Timestamp, UserId};

/// `remove_member` の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoveOutcome {
    /// ユーザーがメンバーだったか
    pub removed: bool,
    /// 削除後にルームが空か（ルームが存在しない場合も true）
    pub is_empty: bool,
}

/// インメモリのルームテーブル
pub struct RoomTable {
    rooms: DashMap<RoomId, RoomState>,
    /// 削除されないデフォルトルーム
    default_room: RoomId,
    clock: Arc<dyn Clock>,
}

impl RoomTable {
    /// デフォルトルームを作成した状態でテーブルを初期化する
    pub fn new(default_room: RoomId, clock: Arc<dyn Clock>) -> Self {
        let table = Self {
            rooms: DashMap::new(),
            default_room,
            clock,
        };
        table.ensure_exists(&table.default_room.clone());
        table
    }

    fn now(&self) -> Timestamp {
        Timestamp::new(self.clock.now_millis())
    }

    pub fn default_room(&self) -> &RoomId {
        &self.default_room
    }

    pub fn is_default_room(&self, room_id: &RoomId) -> bool {
        *room_id == self.default_room
    }

    /// ルームが無ければ作成する。作成した場合は true
    pub fn ensure_exists(&self, room_id: &RoomId) -> bool {
        let mut created = false;
        self.rooms.entry(room_id.clone()).or_insert_with(|| {
            created = true;
            RoomState::new(room_id.clone(), self.now())
        });
        if created {
            tracing::debug!("Room '{}' created", room_id);
        }
        created
    }

    /// メンバーを追加し（必要ならルームを作成）、追加後のメンバー数を返す
    pub fn add_member(&self, room_id: &RoomId, user_id: UserId) -> usize {
        let now = self.now();
        let mut room = self
            .rooms
            .entry(room_id.clone())
            .or_insert_with(|| RoomState::new(room_id.clone(), now));
        room.add_member(user_id, now);
        room.member_count()
    }

    /// メンバーを削除する
    ///
    /// ルームが空になっても削除はしない。呼び出し側が `delete_if_empty` を呼ぶ。
    pub fn remove_member(&self, room_id: &RoomId, user_id: UserId) -> RemoveOutcome {
        let now = self.now();
        match self.rooms.get_mut(room_id) {
            Some(mut room) => {
                let removed = room.remove_member(user_id, now);
                RemoveOutcome {
                    removed,
                    is_empty: room.is_empty(),
                }
            }
            None => RemoveOutcome {
                removed: false,
                is_empty: true,
            },
        }
    }

    /// 空の非デフォルトルームを削除する。削除した場合は true
    pub fn delete_if_empty(&self, room_id: &RoomId) -> bool {
        if self.is_default_room(room_id) {
            return false;
        }
        let deleted = self
            .rooms
            .remove_if(room_id, |_, room| room.is_empty())
            .is_some();
        if deleted {
            tracing::debug!("Empty room '{}' deleted", room_id);
        }
        deleted
    }

    pub fn exists(&self, room_id: &RoomId) -> bool {
        self.rooms.contains_key(room_id)
    }

    /// メンバー ID（昇順）。存在しないルームは空
    pub fn member_ids(&self, room_id: &RoomId) -> Vec<UserId> {
        self.rooms
            .get(room_id)
            .map(|room| room.member_ids())
            .unwrap_or_default()
    }

    pub fn member_count(&self, room_id: &RoomId) -> usize {
        self.rooms
            .get(room_id)
            .map(|room| room.member_count())
            .unwrap_or(0)
    }

    pub fn contains_member(&self, room_id: &RoomId, user_id: UserId) -> bool {
        self.rooms
            .get(room_id)
            .map(|room| room.contains(user_id))
            .unwrap_or(false)
    }

    /// ユーザーを含む全ルーム（最終アクティビティの新しい順）
    pub fn rooms_containing(&self, user_id: UserId) -> Vec<RoomId> {
        let mut rooms: Vec<(Timestamp, RoomId)> = self
            .rooms
            .iter()
            .filter(|entry| entry.contains(user_id))
            .map(|entry| (entry.last_activity, entry.key().clone()))
            .collect();
        rooms.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        rooms.into_iter().map(|(_, room_id)| room_id).collect()
    }

    pub fn snapshot(&self, room_id: &RoomId) -> Option<RoomState> {
        self.rooms.get(room_id).map(|room| room.clone())
    }

    /// ルームの状態を原子的に更新する。ルームが無ければ None
    pub fn update<R>(
        &self,
        room_id: &RoomId,
        f: impl FnOnce(&mut RoomState, Timestamp) -> R,
    ) -> Option<R> {
        let now = self.now();
        self.rooms.get_mut(room_id).map(|mut room| f(&mut room, now))
    }

    /// `before` 以前から空のままの非デフォルトルーム
    pub fn stale_empty_rooms(&self, before: Timestamp) -> Vec<RoomId> {
        let mut stale: Vec<RoomId> = self
            .rooms
            .iter()
            .filter(|entry| {
                entry.is_empty()
                    && entry.last_activity <= before
                    && !self.is_default_room(entry.key())
            })
            .map(|entry| entry.key().clone())
            .collect();
        stale.sort();
        stale
    }

    /// 全ルームのスナップショット（ルーム ID 順）
    pub fn rooms(&self) -> Vec<RoomState> {
        let mut rooms: Vec<RoomState> =
            self.rooms.iter().map(|entry| entry.value().clone()).collect();
        rooms.sort_by(|a, b| a.id.cmp(&b.id));
        rooms
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// メンバーのいるルーム数
    pub fn active_count(&self) -> usize {
        self.rooms.iter().filter(|entry| !entry.is_empty()).count()
    }

    /// デフォルトルーム以外を破棄し、デフォルトルームを空に戻す（シャットダウン用）
    pub fn reset(&self) {
        self.rooms.clear();
        self.ensure_exists(&self.default_room.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use majlis_shared::time::ManualClock;

    fn room_id(id: &str) -> RoomId {
        RoomId::new(id.to_string()).unwrap()
    }

    fn create_test_table() -> (RoomTable, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        (RoomTable::new(room_id("general"), clock.clone()), clock)
    }

    #[test]
    fn test_default_room_exists_on_creation() {
        // テスト項目: 初期化時にデフォルトルームが作成される
        // given (前提条件):
        let (table, _clock) = create_test_table();

        // when (操作):
        let exists = table.exists(&room_id("general"));

        // then (期待する結果):
        assert!(exists);
        assert!(table.is_default_room(&room_id("general")));
        assert!(!table.is_default_room(&room_id("lobby")));
        assert_eq!(table.len(), 1);
        assert_eq!(table.active_count(), 0);
    }

    #[test]
    fn test_add_member_creates_room_lazily() {
        // テスト項目: 存在しないルームへの追加でルームが作成される
        // given (前提条件):
        let (table, _clock) = create_test_table();

        // when (操作):
        let count = table.add_member(&room_id("lobby"), UserId::new(1));
        let count_again = table.add_member(&room_id("lobby"), UserId::new(1));

        // then (期待する結果):
        assert_eq!(count, 1);
        assert_eq!(count_again, 1);
        assert_eq!(table.member_ids(&room_id("lobby")), vec![UserId::new(1)]);
    }

    #[test]
    fn test_remove_last_member_signals_empty() {
        // テスト項目: 最後のメンバーを削除すると is_empty が true になる
        // given (前提条件):
        let (table, _clock) = create_test_table();
        table.add_member(&room_id("lobby"), UserId::new(1));

        // when (操作):
        let outcome = table.remove_member(&room_id("lobby"), UserId::new(1));

        // then (期待する結果):
        assert_eq!(
            outcome,
            RemoveOutcome {
                removed: true,
                is_empty: true
            }
        );
        // 削除は呼び出し側が行うまで残る
        assert!(table.exists(&room_id("lobby")));
    }

    #[test]
    fn test_remove_from_unknown_room() {
        // テスト項目: 存在しないルームからの削除は空として扱われる
        // given (前提条件):
        let (table, _clock) = create_test_table();

        // when (操作):
        let outcome = table.remove_member(&room_id("nowhere"), UserId::new(1));

        // then (期待する結果):
        assert!(!outcome.removed);
        assert!(outcome.is_empty);
        assert_eq!(table.member_count(&room_id("nowhere")), 0);
    }

    #[test]
    fn test_delete_if_empty_never_deletes_default_room() {
        // テスト項目: デフォルトルームは空でも削除されない
        // given (前提条件):
        let (table, _clock) = create_test_table();
        table.add_member(&room_id("general"), UserId::new(1));
        table.remove_member(&room_id("general"), UserId::new(1));

        // when (操作):
        let deleted = table.delete_if_empty(&room_id("general"));

        // then (期待する結果):
        assert!(!deleted);
        assert!(table.exists(&room_id("general")));
    }

    #[test]
    fn test_delete_if_empty_keeps_occupied_room() {
        // テスト項目: メンバーのいるルームは削除されない
        // given (前提条件):
        let (table, _clock) = create_test_table();
        table.add_member(&room_id("lobby"), UserId::new(1));

        // when (操作):
        let deleted = table.delete_if_empty(&room_id("lobby"));

        // then (期待する結果):
        assert!(!deleted);
        assert_eq!(table.member_count(&room_id("lobby")), 1);
    }

    #[test]
    fn test_rooms_containing_orders_most_recent_first() {
        // テスト項目: ユーザーを含むルームが新しい順に返される
        // given (前提条件):
        let (table, clock) = create_test_table();
        table.add_member(&room_id("older"), UserId::new(1));
        clock.advance(100);
        table.add_member(&room_id("newer"), UserId::new(1));
        table.add_member(&room_id("other"), UserId::new(2));

        // when (操作):
        let rooms = table.rooms_containing(UserId::new(1));

        // then (期待する結果):
        assert_eq!(rooms, vec![room_id("newer"), room_id("older")]);
    }

    #[test]
    fn test_stale_empty_rooms_excludes_default_and_recent() {
        // テスト項目: 指定時刻以前から空の非デフォルトルームだけが返される
        // given (前提条件):
        let (table, clock) = create_test_table();
        table.ensure_exists(&room_id("abandoned"));
        clock.advance(5_000);
        table.ensure_exists(&room_id("fresh"));
        table.add_member(&room_id("busy"), UserId::new(1));

        // when (操作):
        let stale = table.stale_empty_rooms(Timestamp::new(1_000));

        // then (期待する結果):
        assert_eq!(stale, vec![room_id("abandoned")]);
    }

    #[test]
    fn test_update_mutates_in_place() {
        // テスト項目: update でルーム状態を原子的に変更できる
        // given (前提条件):
        let (table, _clock) = create_test_table();
        table.add_member(&room_id("stage"), UserId::new(1));

        // when (操作):
        let result = table.update(&room_id("stage"), |room, now| {
            room.enqueue_mic_request(UserId::new(1), now)
        });
        let missing = table.update(&room_id("missing"), |room, _| room.member_count());

        // then (期待する結果):
        assert_eq!(result, Some(Ok(())));
        assert_eq!(missing, None);
        assert_eq!(
            table.snapshot(&room_id("stage")).unwrap().mic_queue(),
            vec![UserId::new(1)]
        );
    }

    #[test]
    fn test_reset_keeps_only_empty_default_room() {
        // テスト項目: reset 後はデフォルトルームだけが空で残る
        // given (前提条件):
        let (table, _clock) = create_test_table();
        table.add_member(&room_id("general"), UserId::new(1));
        table.add_member(&room_id("lobby"), UserId::new(2));

        // when (操作):
        table.reset();

        // then (期待する結果):
        assert_eq!(table.len(), 1);
        assert_eq!(table.member_count(&room_id("general")), 0);
    }
}
