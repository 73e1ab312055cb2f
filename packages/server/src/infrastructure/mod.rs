//! Infrastructure layer: in-memory presence state, transport and wire DTOs.

pub mod dto;
pub mod message_pusher;
pub mod presence;
