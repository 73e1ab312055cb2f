//! UseCase layer: membership coordination, signaling relay, fan-out and sweeping.

pub mod coordinator;
pub mod dispatcher;
pub mod key_lock;
pub mod notifier;
pub mod signaling;
pub mod sweeper;

pub use coordinator::{
    DisconnectOutcome, JoinOutcome, LeaveOutcome, MembershipCoordinator, RegisterOutcome,
    ReplacedSession,
};
pub use dispatcher::{EventDispatcher, Session};
pub use key_lock::{KeyedLock, KeyedLockGuard};
pub use notifier::{Eviction, EvictionReceiver, EvictionSender, RoomNotifier};
pub use signaling::SignalingRelay;
pub use sweeper::{PresenceSweeper, SweepReport};
