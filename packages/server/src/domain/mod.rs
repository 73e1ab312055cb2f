//! Domain layer: value objects, entities, errors and the transport seam.

pub mod entity;
pub mod error;
pub mod message_pusher;
pub mod value_object;

pub use entity::{
    BroadcastState, ConnectedUser, GlobalStats, MemberSummary, RoomState, RoomStats,
};
pub use error::{CoordinatorError, MessagePushError, RelayError, ValueObjectError};
pub use message_pusher::{MessagePusher, PusherChannel};
pub use value_object::{ConnectionId, RoomId, SignalKind, Timestamp, UserId};

#[cfg(test)]
pub use message_pusher::MockMessagePusher;
