//! Utilities shared by the Majlis packages: logging setup and clocks.

pub mod logger;
pub mod time;
