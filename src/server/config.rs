//! Server configuration.

use crate::config::ServerSection;

/// Runtime settings for one served connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Register experimental protocol versions
    pub experimental: bool,
    /// Requests buffered ahead of the worker
    pub queue_depth: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            experimental: false,
            queue_depth: 64,
        }
    }
}

impl ServerConfig {
    /// Offer experimental protocol versions
    pub fn with_experimental(mut self, experimental: bool) -> Self {
        self.experimental = experimental;
        self
    }

    /// Set request queue depth (at least 1)
    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth.max(1);
        self
    }
}

impl From<&ServerSection> for ServerConfig {
    fn from(section: &ServerSection) -> Self {
        Self::default()
            .with_experimental(section.experimental)
            .with_queue_depth(section.queue_depth)
    }
}
