//! Server configuration.

use std::time::Duration;

use easync_engine::EngineConfig;

use crate::policy::DevicePolicy;

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Largest request body accepted, in bytes.
    pub max_body_size: usize,
    /// Policy for devices without one of their own.
    pub default_policy: DevicePolicy,
    /// State machine configuration.
    pub engine: EngineConfig,
}

impl ServerConfig {
    /// Creates a new server configuration.
    pub fn new() -> Self {
        Self {
            max_body_size: 16 * 1024 * 1024,
            default_policy: DevicePolicy::default(),
            engine: EngineConfig::default(),
        }
    }

    /// Sets the maximum request body size.
    pub fn with_max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }

    /// Sets the default device policy.
    pub fn with_default_policy(mut self, policy: DevicePolicy) -> Self {
        self.default_policy = policy;
        self
    }

    /// Sets the state machine configuration.
    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    /// Sets the stale turn timeout.
    pub fn with_stale_timeout(mut self, timeout: Duration) -> Self {
        self.engine.stale_timeout = timeout;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}
