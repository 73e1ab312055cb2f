//! キー単位の非同期ロックテーブル
//!
//! 同じキーに対する操作を到着順（FIFO）に直列化し、異なるキーの操作は並行に実行する。
//! `tokio::sync::Mutex` は待機者を到着順に起こすため、取得順は FIFO になる。
//!
//! エントリは保持者も待機者もいなくなった時点でテーブルから取り除かれる。

use std::{hash::Hash, sync::Arc};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// キーごとの非同期 Mutex を保持するテーブル
pub struct KeyedLock<K>
where
    K: Eq + Hash + Clone,
{
    locks: DashMap<K, Arc<Mutex<()>>>,
}

impl<K> Default for KeyedLock<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }
}

impl<K> KeyedLock<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// キーのロックを取得する
    ///
    /// 返されたガードが破棄されるまでロックは保持される。
    pub async fn lock(&self, key: K) -> KeyedLockGuard<'_, K> {
        // シャードロックはここで解放されるため、await 中に DashMap をロックしない
        let mutex = self.locks.entry(key.clone()).or_default().value().clone();
        let guard = mutex.lock_owned().await;
        KeyedLockGuard {
            locks: &self.locks,
            key,
            guard: Some(guard),
        }
    }

    /// 保持者または待機者のいるキーの数
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// キーのロックを保持または待機しているタスクの数
    pub fn holders(&self, key: &K) -> usize {
        self.locks
            .get(key)
            .map(|mutex| Arc::strong_count(mutex.value()).saturating_sub(1))
            .unwrap_or(0)
    }
}

/// ロックのガード。破棄時にロックを解放し、不要になったエントリを回収する
pub struct KeyedLockGuard<'a, K>
where
    K: Eq + Hash + Clone,
{
    locks: &'a DashMap<K, Arc<Mutex<()>>>,
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K> Drop for KeyedLockGuard<'_, K>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        // 先に Mutex を解放してから、テーブル以外に参照が無ければエントリを削除する
        drop(self.guard.take());
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
