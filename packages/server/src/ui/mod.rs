//! UI layer: Axum handlers, server wiring and shutdown handling.

mod handler;
mod server;
mod signal;
pub mod state;

pub use server::Server;
