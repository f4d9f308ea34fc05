//! Configuration for the sync engine.

use std::time::Duration;

use easync_state::KeyStyle;

/// Largest window a client may ask for.
pub const MAX_WINDOW_SIZE: u32 = 512;

/// Window used when neither the request nor the configuration sets one.
pub const DEFAULT_WINDOW_SIZE: u32 = 100;

/// Configuration for sync turns.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Changes delivered per collection and turn when the client sends no
    /// `WindowSize`.
    pub window_size: u32,
    /// Shape of newly issued sync keys.
    pub key_style: KeyStyle,
    /// Age after which an in-progress turn is considered abandoned.
    pub stale_timeout: Duration,
}

impl EngineConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            key_style: KeyStyle::default(),
            stale_timeout: Duration::from_secs(300),
        }
    }

    /// Sets the default window size. Clamped like a client value.
    pub fn with_window_size(mut self, size: u32) -> Self {
        self.window_size = clamp_window(size);
        self
    }

    /// Sets the key style.
    pub fn with_key_style(mut self, style: KeyStyle) -> Self {
        self.key_style = style;
        self
    }

    /// Sets the stale turn timeout.
    pub fn with_stale_timeout(mut self, timeout: Duration) -> Self {
        self.stale_timeout = timeout;
        self
    }

    /// Window for a turn, given the collection's and the request's
    /// `WindowSize`.
    pub fn effective_window(&self, requested: Option<u32>) -> usize {
        let size = requested.map_or(self.window_size, clamp_window);
        usize::try_from(size).unwrap_or(usize::MAX)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Zero and oversized windows mean "as many as allowed".
fn clamp_window(size: u32) -> u32 {
    if size == 0 || size > MAX_WINDOW_SIZE {
        MAX_WINDOW_SIZE
    } else {
        size
    }
}
