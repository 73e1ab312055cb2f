//! Data Transfer Objects (DTOs) for the presence server.
//!
//! DTOs are organized by protocol:
//! - `websocket`: inbound / outbound WebSocket events
//! - `http`: HTTP API response DTOs
//! - `conversion`: domain → DTO conversions

pub mod conversion;
pub mod http;
pub mod websocket;
