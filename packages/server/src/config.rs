//! Runtime configuration of the presence coordinator.

use std::time::Duration;

use thiserror::Error;

use crate::domain::{RoomId, ValueObjectError};

/// Room every user lands in by default; never deleted
pub const DEFAULT_ROOM_ID: &str = "general";
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_INACTIVITY_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid default room: {0}")]
    InvalidDefaultRoom(#[from] ValueObjectError),

    #[error("sweep interval must be greater than zero")]
    ZeroSweepInterval,

    #[error("inactivity timeout must be greater than zero")]
    ZeroInactivityTimeout,
}

/// Coordinator / sweeper settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    pub default_room: RoomId,
    pub sweep_interval: Duration,
    pub inactivity_timeout: Duration,
}

impl CoordinatorConfig {
    /// Build a config with default timings
    pub fn new(default_room: RoomId) -> Self {
        Self {
            default_room,
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            inactivity_timeout: Duration::from_secs(DEFAULT_INACTIVITY_TIMEOUT_SECS),
        }
    }

    /// Build a config from raw CLI / environment values
    pub fn from_parts(
        default_room: &str,
        sweep_interval_secs: u64,
        inactivity_timeout_secs: u64,
    ) -> Result<Self, ConfigError> {
        if sweep_interval_secs == 0 {
            return Err(ConfigError::ZeroSweepInterval);
        }
        if inactivity_timeout_secs == 0 {
            return Err(ConfigError::ZeroInactivityTimeout);
        }
        Ok(Self {
            default_room: RoomId::new(default_room.to_string())?,
            sweep_interval: Duration::from_secs(sweep_interval_secs),
            inactivity_timeout: Duration::from_secs(inactivity_timeout_secs),
        })
    }

    pub fn with_sweep_interval(mut self, sweep_interval: Duration) -> Self {
        self.sweep_interval = sweep_interval;
        self
    }

    pub fn with_inactivity_timeout(mut self, inactivity_timeout: Duration) -> Self {
        self.inactivity_timeout = inactivity_timeout;
        self
    }

    /// Inactivity timeout in milliseconds (clock unit)
    pub fn inactivity_timeout_millis(&self) -> i64 {
        i64::try_from(self.inactivity_timeout.as_millis()).unwrap_or(i64::MAX)
    }
}
