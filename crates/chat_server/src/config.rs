//! Service configuration types and defaults.
//!
//! This module contains the chat service configuration structure and the
//! default values used to initialize registries, mailboxes, and the idle
//! reaper.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration structure for the chat service.
///
/// Contains the parameters governing registry capacity, per-client mailbox
/// sizing, the long-poll deadline, and idle eviction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Maximum number of concurrently registered clients
    pub max_users: usize,

    /// Capacity of each client's bounded response mailbox
    pub mailbox_capacity: usize,

    /// Long-poll deadline in seconds for `Client::receive`
    pub receive_timeout_secs: u64,

    /// Idle threshold in seconds after which an inactive client is reaped
    pub idle_timeout_secs: u64,

    /// Interval in seconds between idle-reaper passes (0 to disable)
    pub reap_interval_secs: u64,
}

impl ServiceConfig {
    /// The long-poll deadline as a [`Duration`].
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_secs(self.receive_timeout_secs)
    }

    /// The idle threshold as a [`Duration`].
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// The reaper interval as a [`Duration`].
    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_users: 1000,
            mailbox_capacity: 10_000,
            receive_timeout_secs: 10,
            idle_timeout_secs: 300,
            reap_interval_secs: 60,
        }
    }
}
