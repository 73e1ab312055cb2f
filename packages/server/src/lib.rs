//! Majlis presence server library.
//!
//! Tracks which user is in which room, keeps membership consistent under
//! concurrent join / leave / disconnect, relays WebRTC signaling between peers
//! of the same room and expires idle sessions.

// layers
pub mod domain;
pub mod infrastructure;
pub mod ui;
pub mod usecase;

pub mod config;
