//! Connection Registry: 接続とユーザーの対応、およびユーザーごとの最終アクティビティを保持する。
//!
//! `current_room` の書き込みは MembershipCoordinator がユーザー単位のロックを
//! 保持した状態でのみ行う。読み出しはロック不要。

use std::{collections::BTreeSet, sync::Arc};

use dashmap::DashMap;
use majlis_shared::time::Clock;

use crate::domain::{ConnectedUser, ConnectionId, CoordinatorError, RoomId, Timestamp, UserId};

/// インメモリの接続レジストリ
pub struct ConnectionRegistry {
    /// user_id -> 接続中ユーザー
    users: DashMap<UserId, ConnectedUser>,
    /// connection_id -> user_id（接続からの本人確認用）
    connections: DashMap<ConnectionId, UserId>,
    clock: Arc<dyn Clock>,
}

impl ConnectionRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            users: DashMap::new(),
            connections: DashMap::new(),
            clock,
        }
    }

    fn now(&self) -> Timestamp {
        Timestamp::new(self.clock.now_millis())
    }

    /// ユーザーを登録する
    ///
    /// 同じ user_id のエントリが既にある場合は置き換え、
    /// 登録したエントリと置き換えられたエントリを返す。
    /// 以前のルーム所属の解除は呼び出し側（coordinator）の責務。
    pub fn register(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
        display_name: String,
        role: String,
    ) -> (ConnectedUser, Option<ConnectedUser>) {
        let user = ConnectedUser::new(user_id, display_name, role, connection_id, self.now());
        let previous = self.users.insert(user_id, user.clone());
        if let Some(previous) = &previous {
            self.connections.remove(&previous.connection_id);
        }
        self.connections.insert(connection_id, user_id);
        tracing::debug!("User {} registered on connection {}", user_id, connection_id);
        (user, previous)
    }

    /// 接続から本人を解決する
    pub fn resolve(&self, connection_id: &ConnectionId) -> Option<ConnectedUser> {
        let user_id = *self.connections.get(connection_id)?;
        self.get(user_id)
    }

    pub fn get(&self, user_id: UserId) -> Option<ConnectedUser> {
        self.users.get(&user_id).map(|user| user.clone())
    }

    pub fn contains(&self, user_id: UserId) -> bool {
        self.users.contains_key(&user_id)
    }

    /// ユーザーの現在の接続
    pub fn connection_of(&self, user_id: UserId) -> Option<ConnectionId> {
        self.users.get(&user_id).map(|user| user.connection_id)
    }

    /// ユーザーの現在のルーム
    pub fn current_room(&self, user_id: UserId) -> Option<RoomId> {
        self.users
            .get(&user_id)
            .and_then(|user| user.current_room.clone())
    }

    /// 最終アクティビティを更新する（未登録ユーザーの場合は何もしない）
    pub fn touch(&self, user_id: UserId) {
        let now = self.now();
        if let Some(mut user) = self.users.get_mut(&user_id) {
            user.last_activity = now;
        }
    }

    /// `current_room` を更新し、以前の値を返す
    pub fn set_current_room(
        &self,
        user_id: UserId,
        room_id: Option<RoomId>,
    ) -> Result<Option<RoomId>, CoordinatorError> {
        let now = self.now();
        let mut user = self
            .users
            .get_mut(&user_id)
            .ok_or(CoordinatorError::UnknownUser(user_id))?;
        user.last_activity = now;
        Ok(std::mem::replace(&mut user.current_room, room_id))
    }

    /// ユーザーを削除し、所属していたルームを返す
    pub fn unregister(&self, user_id: UserId) -> BTreeSet<RoomId> {
        match self.users.remove(&user_id) {
            Some((_, user)) => {
                self.connections
                    .remove_if(&user.connection_id, |_, owner| *owner == user_id);
                tracing::debug!(
                    "User {} unregistered from connection {}",
                    user_id,
                    user.connection_id
                );
                user.current_room.into_iter().collect()
            }
            None => BTreeSet::new(),
        }
    }

    /// `cutoff` より前から操作のないユーザー
    pub fn inactive_since(&self, cutoff: Timestamp) -> Vec<UserId> {
        let mut inactive: Vec<UserId> = self
            .users
            .iter()
            .filter(|entry| entry.last_activity < cutoff)
            .map(|entry| *entry.key())
            .collect();
        inactive.sort();
        inactive
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// 全エントリを破棄する（シャットダウン用）
    pub fn clear(&self) {
        self.users.clear();
        self.connections.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use majlis_shared::time::ManualClock;

    fn create_test_registry() -> (ConnectionRegistry, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(10_000));
        (ConnectionRegistry::new(clock.clone()), clock)
    }

    fn register(registry: &ConnectionRegistry, user_id: i64) -> ConnectionId {
        let connection_id = ConnectionId::generate();
        registry.register(
            connection_id,
            UserId::new(user_id),
            format!("user-{}", user_id),
            "member".to_string(),
        );
        connection_id
    }

    #[test]
    fn test_register_and_resolve() {
        // テスト項目: 登録した接続からユーザーを解決できる
        // given (前提条件):
        let (registry, _clock) = create_test_registry();

        // when (操作):
        let connection_id = register(&registry, 1);
        let resolved = registry.resolve(&connection_id);

        // then (期待する結果):
        let user = resolved.expect("user should resolve");
        assert_eq!(user.id, UserId::new(1));
        assert_eq!(user.display_name, "user-1");
        assert_eq!(user.current_room, None);
        assert_eq!(user.last_activity, Timestamp::new(10_000));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_resolve_unknown_connection() {
        // テスト項目: 未登録の接続は解決できない
        // given (前提条件):
        let (registry, _clock) = create_test_registry();

        // when (操作):
        let resolved = registry.resolve(&ConnectionId::generate());

        // then (期待する結果):
        assert!(resolved.is_none());
    }

    #[test]
    fn test_register_replaces_previous_connection() {
        // テスト項目: 同じユーザーの再登録で古い接続が置き換えられる
        // given (前提条件):
        let (registry, _clock) = create_test_registry();
        let old_connection = register(&registry, 1);

        // when (操作):
        let new_connection = ConnectionId::generate();
        let (_, previous) = registry.register(
            new_connection,
            UserId::new(1),
            "renamed".to_string(),
            "admin".to_string(),
        );

        // then (期待する結果):
        assert_eq!(previous.unwrap().connection_id, old_connection);
        assert!(registry.resolve(&old_connection).is_none());
        assert_eq!(
            registry.resolve(&new_connection).unwrap().display_name,
            "renamed"
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_touch_updates_last_activity() {
        // テスト項目: touch で最終アクティビティが更新される
        // given (前提条件):
        let (registry, clock) = create_test_registry();
        register(&registry, 1);
        clock.advance(5_000);

        // when (操作):
        registry.touch(UserId::new(1));
        registry.touch(UserId::new(99));

        // then (期待する結果):
        assert_eq!(
            registry.get(UserId::new(1)).unwrap().last_activity,
            Timestamp::new(15_000)
        );
        assert!(registry.get(UserId::new(99)).is_none());
    }

    #[test]
    fn test_set_current_room_returns_previous() {
        // テスト項目: current_room を更新すると以前の値が返される
        // given (前提条件):
        let (registry, _clock) = create_test_registry();
        register(&registry, 1);
        let general = RoomId::new("general".to_string()).unwrap();
        let lobby = RoomId::new("lobby".to_string()).unwrap();

        // when (操作):
        let first = registry.set_current_room(UserId::new(1), Some(general.clone()));
        let second = registry.set_current_room(UserId::new(1), Some(lobby.clone()));

        // then (期待する結果):
        assert_eq!(first, Ok(None));
        assert_eq!(second, Ok(Some(general)));
        assert_eq!(registry.current_room(UserId::new(1)), Some(lobby));
    }

    #[test]
    fn test_set_current_room_unknown_user() {
        // テスト項目: 未登録ユーザーの current_room 更新はエラーになる
        // given (前提条件):
        let (registry, _clock) = create_test_registry();

        // when (操作):
        let result = registry.set_current_room(UserId::new(3), None);

        // then (期待する結果):
        assert_eq!(result, Err(CoordinatorError::UnknownUser(UserId::new(3))));
    }

    #[test]
    fn test_unregister_returns_current_room() {
        // テスト項目: 登録解除で所属していたルームが返され、接続も解決できなくなる
        // given (前提条件):
        let (registry, _clock) = create_test_registry();
        let connection_id = register(&registry, 1);
        let lobby = RoomId::new("lobby".to_string()).unwrap();
        registry
            .set_current_room(UserId::new(1), Some(lobby.clone()))
            .unwrap();

        // when (操作):
        let affected = registry.unregister(UserId::new(1));
        let again = registry.unregister(UserId::new(1));

        // then (期待する結果):
        assert_eq!(affected.into_iter().collect::<Vec<_>>(), vec![lobby]);
        assert!(again.is_empty());
        assert!(registry.resolve(&connection_id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_inactive_since() {
        // テスト項目: 指定時刻より前から操作のないユーザーだけが返される
        // given (前提条件):
        let (registry, clock) = create_test_registry();
        register(&registry, 1);
        register(&registry, 2);
        clock.advance(1_000);
        registry.touch(UserId::new(2));

        // when (操作):
        let inactive = registry.inactive_since(Timestamp::new(10_500));

        // then (期待する結果):
        assert_eq!(inactive, vec![UserId::new(1)]);
    }
}
