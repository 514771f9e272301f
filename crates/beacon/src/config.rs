//! Configuration management for the Beacon chat server.
//!
//! This module handles loading, validation, and conversion of server
//! configuration from TOML files and command-line arguments.

use chat_server::ServiceConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

/// Default registered-client capacity for serde deserialization
fn default_max_users() -> usize {
    1000
}

/// Default mailbox depth per client
fn default_mailbox_capacity() -> usize {
    10_000
}

/// Default long-poll window in seconds
fn default_receive_timeout() -> u64 {
    10
}

/// Default idle eviction threshold in seconds
fn default_idle_timeout() -> u64 {
    300
}

/// Default reaper period in seconds
fn default_reap_interval() -> u64 {
    60
}

/// Application configuration loaded from TOML file.
///
/// This is the main configuration structure that encompasses all server
/// settings including capacity limits, timeouts, and logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration settings
    pub server: ServerSettings,
    /// Logging configuration settings
    pub logging: LoggingSettings,
}

/// Server-specific configuration settings.
///
/// Controls registration capacity, mailbox sizing, and the timeouts that
/// drive long-polling and idle eviction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Maximum number of concurrently registered clients
    #[serde(default = "default_max_users")]
    pub max_users: usize,
    /// Bounded depth of each client's response mailbox
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
    /// How long a long-poll receive blocks before reporting a timeout, in seconds
    #[serde(default = "default_receive_timeout")]
    pub receive_timeout: u64,
    /// Inactivity threshold after which a client is evicted, in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,
    /// Period of the background idle-reaper task, in seconds
    #[serde(default = "default_reap_interval")]
    pub reap_interval: u64,
}

/// Logging system configuration.
///
/// Controls log output format, levels, and destination settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                max_users: default_max_users(),
                mailbox_capacity: default_mailbox_capacity(),
                receive_timeout: default_receive_timeout(),
                idle_timeout: default_idle_timeout(),
                reap_interval: default_reap_interval(),
            },
            logging: LoggingSettings {
                level: "info".to_string(),
                json_format: false,
            },
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, creates a default configuration file at
    /// the specified path and returns the default configuration.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// The loaded or default configuration, or an error if loading/creation
    /// failed.
    pub async fn load_from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            // Create default config file
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Converts the application configuration to a chat service
    /// configuration.
    pub fn to_service_config(&self) -> ServiceConfig {
        ServiceConfig {
            max_users: self.server.max_users,
            mailbox_capacity: self.server.mailbox_capacity,
            receive_timeout_secs: self.server.receive_timeout,
            idle_timeout_secs: self.server.idle_timeout,
            reap_interval_secs: self.server.reap_interval,
        }
    }

    /// Validates the configuration for consistency and correctness.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the configuration is valid, or an error string describing
    /// the issue.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.max_users == 0 {
            return Err("server.max_users must be greater than 0".to_string());
        }

        if self.server.mailbox_capacity == 0 {
            return Err("server.mailbox_capacity must be greater than 0".to_string());
        }

        if self.server.receive_timeout == 0 {
            return Err("server.receive_timeout must be greater than 0".to_string());
        }

        if self.server.reap_interval == 0 {
            return Err("server.reap_interval must be greater than 0".to_string());
        }

        // A client that long-polls on schedule must never look idle.
        if self.server.idle_timeout <= self.server.receive_timeout {
            return Err(
                "server.idle_timeout must be greater than server.receive_timeout".to_string(),
            );
        }

        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}
