//! Command dispatch: the plugin handler trait and registry.
//!
//! Incoming messages carry a command identifier; the registry looks up the
//! matching handler, enforces its registration-scope policy, and invokes
//! it. New commands are added by registering a handler, never by touching
//! dispatch logic.

pub mod commands;
pub mod group_commands;

use crate::error::ChatError;
use crate::messaging::{Message, Response};
use crate::service::ChatService;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// Registration-status precondition a command requires before dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Only callers without a registered client may run the command
    UnregisteredOnly,
    /// Only registered callers may run the command
    RegisteredOnly,
    /// No registration precondition
    Always,
}

/// Trait implemented by every command and signaling handler.
#[async_trait]
pub trait PluginHandler: Send + Sync {
    /// The registration scope enforced before dispatch.
    fn scope(&self) -> Scope;

    /// Human-readable usage template, listed by `/help`.
    fn usage(&self) -> &str;

    /// Executes the command against the shared service state.
    async fn execute(&self, message: &Message) -> Result<Response, ChatError>;
}

/// Registry mapping chat command identifiers to handlers.
///
/// Lookup failures and handler errors are converted into displayable
/// error responses at this boundary, so one client's bad input can never
/// affect another.
pub struct PluginRegistry {
    /// Shared service state handed to built-in commands
    service: Arc<ChatService>,

    /// Registered handlers, keyed by command identifier
    handlers: DashMap<String, Arc<dyn PluginHandler>>,
}

impl PluginRegistry {
    /// Creates a registry with all built-in chat commands registered.
    pub fn new(service: Arc<ChatService>) -> Arc<Self> {
        let registry = Arc::new(Self {
            service,
            handlers: DashMap::new(),
        });
        commands::register_builtins(&registry);
        registry
    }

    /// The shared service state.
    pub fn service(&self) -> &Arc<ChatService> {
        &self.service
    }

    /// Registers a handler for a command identifier, replacing any
    /// previous handler for the same identifier.
    pub fn register(&self, command: impl Into<String>, handler: Arc<dyn PluginHandler>) {
        let command = command.into();
        debug!("registered command handler '{}'", command);
        self.handlers.insert(command, handler);
    }

    /// Sorted usage lines of every registered command, for `/help`.
    pub fn usage_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .handlers
            .iter()
            .map(|entry| format!("/{} - {}", entry.key(), entry.value().usage()))
            .collect();
        lines.sort();
        lines
    }

    /// Looks up and runs the handler for a message's command.
    ///
    /// An unknown command produces a displayable `NoSuchCommand` response,
    /// not a hard error. The handler's scope is evaluated against the
    /// sender's registration status before dispatch; scope violations and
    /// handler failures also come back as error responses.
    pub async fn find_and_execute(&self, message: Message) -> Result<Response, ChatError> {
        let Some(handler) = self
            .handlers
            .get(&message.command)
            .map(|entry| entry.value().clone())
        else {
            return Ok(Response::from_error(
                &message,
                &ChatError::NoSuchCommand(message.command.clone()),
            ));
        };

        let registered = self
            .service
            .get_client(&message.sender_client_id)
            .await
            .is_ok();
        match handler.scope() {
            Scope::UnregisteredOnly if registered => {
                return Ok(Response::from_error(
                    &message,
                    &ChatError::AlreadyRegistered(message.sender_client_id.clone()),
                ));
            }
            Scope::RegisteredOnly if !registered => {
                return Ok(Response::from_error(&message, &ChatError::NotRegistered));
            }
            _ => {}
        }

        match handler.execute(&message).await {
            Ok(response) => Ok(response),
            Err(error) => {
                debug!("command '{}' failed: {}", message.command, error);
                Ok(Response::from_error(&message, &error))
            }
        }
    }
}
