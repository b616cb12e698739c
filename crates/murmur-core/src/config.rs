//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Invalid configuration value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Interval `{0}` must be greater than zero")]
    ZeroInterval(&'static str),

    #[error("Fanout `{0}` must be greater than zero")]
    ZeroFanout(&'static str),

    #[error("Suspicion threshold must be greater than zero")]
    ZeroSuspicionThreshold,
}

/// Tunables of the gossip engine.
///
/// The engine itself is event-driven; `heartbeat_interval` is only the
/// cadence suggested to whoever drives [`tick`](crate::GossipEngine::tick).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GossipConfig {
    /// Suggested interval between tick calls.
    pub heartbeat_interval: Duration,

    /// Silence after which an online peer becomes suspect, and the pace at
    /// which suspicion escalates afterwards.
    pub failure_timeout: Duration,

    /// Number of peers pinged per tick.
    pub gossip_fanout: usize,

    /// Number of extra peer views piggybacked on each outbound message.
    pub sync_fanout: usize,

    /// Suspicion count above which a suspect is declared failed.
    pub suspicion_threshold: u32,

    /// Staleness bound for removing non-online peers in expiry cleanup.
    pub expiry_timeout: Duration,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(100),
            failure_timeout: Duration::from_millis(2000),
            gossip_fanout: 3,
            sync_fanout: 2,
            suspicion_threshold: 3,
            expiry_timeout: Duration::from_secs(60),
        }
    }
}

impl GossipConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_failure_timeout(mut self, timeout: Duration) -> Self {
        self.failure_timeout = timeout;
        self
    }

    pub fn with_gossip_fanout(mut self, fanout: usize) -> Self {
        self.gossip_fanout = fanout;
        self
    }

    pub fn with_sync_fanout(mut self, fanout: usize) -> Self {
        self.sync_fanout = fanout;
        self
    }

    pub fn with_suspicion_threshold(mut self, threshold: u32) -> Self {
        self.suspicion_threshold = threshold;
        self
    }

    pub fn with_expiry_timeout(mut self, timeout: Duration) -> Self {
        self.expiry_timeout = timeout;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::ZeroInterval("heartbeat_interval"));
        }
        if self.failure_timeout.is_zero() {
            return Err(ConfigError::ZeroInterval("failure_timeout"));
        }
        if self.expiry_timeout.is_zero() {
            return Err(ConfigError::ZeroInterval("expiry_timeout"));
        }
        if self.gossip_fanout == 0 {
            return Err(ConfigError::ZeroFanout("gossip_fanout"));
        }
        if self.sync_fanout == 0 {
            return Err(ConfigError::ZeroFanout("sync_fanout"));
        }
        if self.suspicion_threshold == 0 {
            return Err(ConfigError::ZeroSuspicionThreshold);
        }
        Ok(())
    }
}
