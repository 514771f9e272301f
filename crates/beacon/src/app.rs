//! Main application logic and lifecycle management.
//!
//! This module contains the core `Application` struct that orchestrates
//! service startup, message dispatch, the idle-reaper task, and graceful
//! shutdown.

use crate::{
    cli::CliArgs,
    config::AppConfig,
    logging::display_banner,
    signals::{wait_for_shutdown, wait_for_shutdown_silent},
};
use chat_server::{
    create_service_with_config, ChatError, ChatService, Message, PluginRegistry, Response,
    SignalingRegistry,
};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Main application struct tying the service core to its dispatch layers.
///
/// The `Application` manages the complete lifecycle of the Beacon server:
/// configuration loading, registry construction, background housekeeping,
/// and graceful shutdown handling.
///
/// # Architecture
///
/// * **Configuration Management**: Loads and validates configuration from
///   files and CLI
/// * **Dispatch Routing**: Routes each inbound message to the chat command
///   registry or the signaling registry by its command identifier
/// * **Housekeeping**: Periodically evicts idle clients and prunes empty
///   groups
pub struct Application {
    /// Loaded application configuration
    config: AppConfig,
    /// Shared service state
    service: Arc<ChatService>,
    /// Chat command registry
    commands: Arc<PluginRegistry>,
    /// Call signaling registry
    signaling: Arc<SignalingRegistry>,
}

impl Application {
    /// Creates a new application instance.
    ///
    /// Loads configuration, applies CLI overrides, validates settings, and
    /// builds the service and its dispatch registries.
    ///
    /// # Arguments
    ///
    /// * `args` - Parsed command-line arguments
    ///
    /// # Returns
    ///
    /// A configured `Application` instance ready to run, or an error if
    /// initialization failed.
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        info!("🔧 Loading configuration from: {}", args.config_path.display());
        let mut config = AppConfig::load_from_file(&args.config_path).await?;

        // Apply CLI overrides
        if let Some(max_users) = args.max_users {
            config.server.max_users = max_users;
        }

        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }

        if args.json_logs {
            config.logging.json_format = true;
        }

        // Validate configuration
        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {e}").into());
        }
        info!("✅ Configuration loaded and validated successfully");

        display_banner();

        let service = create_service_with_config(config.to_service_config());
        let commands = PluginRegistry::new(service.clone());
        let signaling = SignalingRegistry::new(service.clone());

        info!(
            "📂 Config: {} | {} chat commands registered",
            args.config_path.display(),
            commands.usage_lines().len()
        );

        Ok(Self {
            config,
            service,
            commands,
            signaling,
        })
    }

    /// The shared service state.
    pub fn service(&self) -> &Arc<ChatService> {
        &self.service
    }

    /// Routes an inbound message to the right dispatch layer.
    ///
    /// Signaling kinds go to the signaling registry (where the `name` field
    /// carries the caller's client id); everything else goes to the chat
    /// command registry. When the acting client resolves, dispatch runs
    /// under its activity accounting so a command counts as liveness for
    /// the idle reaper.
    pub async fn dispatch(&self, message: Message) -> Result<Response, ChatError> {
        if self.signaling.handles(&message.command) {
            let signaling = self.signaling.clone();
            match self.service.get_client(&message.sender_name).await {
                Ok(client) => {
                    client
                        .execute(message, |m| async move { signaling.find_and_execute(m).await })
                        .await
                }
                Err(_) => signaling.find_and_execute(message).await,
            }
        } else {
            let commands = self.commands.clone();
            match self.service.get_client(&message.sender_client_id).await {
                Ok(client) => {
                    client
                        .execute(message, |m| async move { commands.find_and_execute(m).await })
                        .await
                }
                Err(_) => commands.find_and_execute(message).await,
            }
        }
    }

    /// Long-polls the given client's mailbox with the configured window.
    pub async fn receive(&self, client_id: &str) -> Result<Response, ChatError> {
        let client = self.service.get_client(client_id).await?;
        client.receive(self.service.config().receive_timeout()).await
    }

    /// Runs the application until a shutdown signal arrives.
    ///
    /// Starts the idle-reaper task, waits for termination signals, and
    /// performs cleanup with a final statistics report.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the application ran and shut down successfully, or an
    /// error if there was a critical failure during execution.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        info!("🌟 Starting Beacon Chat Server Application");
        self.log_configuration_summary();

        // Background housekeeping: evict idle clients and prune empty
        // groups on a timer.
        let reaper_handle = {
            let service = self.service.clone();
            let idle_timeout = self.service.config().idle_timeout();
            let reap_interval = self.service.config().reap_interval();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(reap_interval);
                interval.tick().await; // first tick fires immediately

                loop {
                    interval.tick().await;
                    let reaped = service.reap_idle(idle_timeout).await;
                    if reaped > 0 {
                        info!("🧹 Reaped {} idle client(s)", reaped);
                    }
                }
            })
        };

        info!("✅ Beacon Server is now running!");
        info!(
            "👥 Capacity: {} clients | 📬 Mailbox depth: {}",
            self.config.server.max_users, self.config.server.mailbox_capacity
        );
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        // Wait for shutdown signal
        wait_for_shutdown().await?;

        // A second signal skips graceful cleanup entirely.
        tokio::spawn(async move {
            if let Err(e) = wait_for_shutdown_silent().await {
                error!("Failed to set up second-signal handler: {e}");
                return;
            }

            warn!("Shutdown handler received again! I'll make this quick.");
            std::process::exit(1);
        });

        info!("🛑 Shutdown signal received, beginning graceful shutdown...");
        reaper_handle.abort();

        // Close every mailbox so blocked long-polls observe the shutdown.
        let clients = self.service.clients_snapshot().await;
        for client in &clients {
            client.close().await;
        }

        self.log_final_statistics().await;

        info!("✅ Beacon Chat Server shutdown complete");
        Ok(())
    }

    /// Logs the configuration summary at startup.
    fn log_configuration_summary(&self) {
        info!("📋 Configuration Summary:");
        info!("  👥 Max users: {}", self.config.server.max_users);
        info!(
            "  📬 Mailbox capacity: {}",
            self.config.server.mailbox_capacity
        );
        info!(
            "  ⏱️ Receive timeout: {}s",
            self.config.server.receive_timeout
        );
        info!(
            "  💤 Idle timeout: {}s (reap every {}s)",
            self.config.server.idle_timeout, self.config.server.reap_interval
        );
    }

    /// Logs final statistics during shutdown.
    async fn log_final_statistics(&self) {
        let clients = self.service.client_count().await;
        let groups = self.service.groups_snapshot().await.len();
        info!("📊 Final State:");
        info!("  - Registered clients: {}", clients);
        info!("  - Active groups: {}", groups);
    }
}
