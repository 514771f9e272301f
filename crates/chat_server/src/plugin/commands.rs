//! Built-in chat commands.
//!
//! Handlers for the standard command set: `help`, `time`, `users`,
//! `register`, `broadcast`, `quit`, `private`, and the `group` entry
//! point that re-enters the nested group registry.

use super::group_commands::GroupRegistry;
use super::{PluginHandler, PluginRegistry, Scope};
use crate::error::ChatError;
use crate::messaging::{Message, Response};
use crate::service::ChatService;
use crate::utils::current_timestamp;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::{Arc, Weak};

/// Name length bounds enforced by `/register`.
const NAME_MIN_CHARS: usize = 3;
const NAME_MAX_CHARS: usize = 50;

/// JSON entry produced by `/users` and `/group users`.
#[derive(Debug, Serialize)]
pub(crate) struct UserEntry {
    pub name: String,
    #[serde(rename = "clientId")]
    pub client_id: String,
}

/// Registers every built-in command into the given registry.
pub(crate) fn register_builtins(registry: &Arc<PluginRegistry>) {
    let service = registry.service().clone();

    registry.register(
        "help",
        Arc::new(HelpCommand {
            registry: Arc::downgrade(registry),
        }),
    );
    registry.register("time", Arc::new(TimeCommand));
    registry.register(
        "users",
        Arc::new(UsersCommand {
            service: service.clone(),
        }),
    );
    registry.register(
        "register",
        Arc::new(RegisterCommand {
            service: service.clone(),
        }),
    );
    registry.register(
        "broadcast",
        Arc::new(BroadcastCommand {
            service: service.clone(),
        }),
    );
    registry.register(
        "quit",
        Arc::new(QuitCommand {
            service: service.clone(),
        }),
    );
    registry.register(
        "private",
        Arc::new(PrivateCommand {
            service: service.clone(),
        }),
    );
    registry.register(
        "group",
        Arc::new(GroupCommand {
            groups: GroupRegistry::new(service),
        }),
    );
}

/// `/help` - lists every registered command with its usage template.
struct HelpCommand {
    registry: Weak<PluginRegistry>,
}

#[async_trait]
impl PluginHandler for HelpCommand {
    fn scope(&self) -> Scope {
        Scope::Always
    }

    fn usage(&self) -> &str {
        "list available commands"
    }

    async fn execute(&self, message: &Message) -> Result<Response, ChatError> {
        let registry = self
            .registry
            .upgrade()
            .ok_or_else(|| ChatError::InvalidInput("registry is shutting down".to_string()))?;
        Ok(Response::ok(
            &message.sender_client_id,
            "server",
            registry.usage_lines().join("\n"),
        ))
    }
}

/// `/time` - reports the current server time.
struct TimeCommand;

#[async_trait]
impl PluginHandler for TimeCommand {
    fn scope(&self) -> Scope {
        Scope::Always
    }

    fn usage(&self) -> &str {
        "show the server time (unix seconds)"
    }

    async fn execute(&self, message: &Message) -> Result<Response, ChatError> {
        Ok(Response::ok(
            &message.sender_client_id,
            "server",
            format!("server time: {}", current_timestamp()),
        ))
    }
}

/// `/users` - serializes the visible client set, honoring group scoping.
struct UsersCommand {
    service: Arc<ChatService>,
}

#[async_trait]
impl PluginHandler for UsersCommand {
    fn scope(&self) -> Scope {
        Scope::RegisteredOnly
    }

    fn usage(&self) -> &str {
        "list the clients visible to you"
    }

    async fn execute(&self, message: &Message) -> Result<Response, ChatError> {
        let sender = self.service.get_client(&message.sender_client_id).await?;

        let mut entries = Vec::new();
        match sender.group_id().await {
            Some(group_id) => {
                let group = self.service.get_group(&group_id).await?;
                for client in group.clients().await.into_values() {
                    entries.push(UserEntry {
                        name: client.name().to_string(),
                        client_id: client.client_id().to_string(),
                    });
                }
            }
            None => {
                for client in self.service.clients_snapshot().await {
                    if client.group_id().await.is_none() {
                        entries.push(UserEntry {
                            name: client.name().to_string(),
                            client_id: client.client_id().to_string(),
                        });
                    }
                }
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        let listing = serde_json::to_string(&entries)
            .map_err(|e| ChatError::InvalidInput(e.to_string()))?;
        Ok(Response::ok(&message.sender_client_id, "server", listing))
    }
}

/// `/register` - creates a client and returns its auth token.
struct RegisterCommand {
    service: Arc<ChatService>,
}

#[async_trait]
impl PluginHandler for RegisterCommand {
    fn scope(&self) -> Scope {
        Scope::UnregisteredOnly
    }

    fn usage(&self) -> &str {
        "register with your display name"
    }

    async fn execute(&self, message: &Message) -> Result<Response, ChatError> {
        let name = message.sender_name.trim();
        let length = name.chars().count();
        if !(NAME_MIN_CHARS..=NAME_MAX_CHARS).contains(&length) {
            return Err(ChatError::InvalidInput(format!(
                "name must be {NAME_MIN_CHARS} to {NAME_MAX_CHARS} characters"
            )));
        }

        let auth_token = self
            .service
            .register_client(name, &message.sender_client_id)
            .await?;
        Ok(Response::ok(&message.sender_client_id, "server", auth_token))
    }
}

/// `broadcast` - default handler for plain, non-slash-prefixed text.
struct BroadcastCommand {
    service: Arc<ChatService>,
}

#[async_trait]
impl PluginHandler for BroadcastCommand {
    fn scope(&self) -> Scope {
        Scope::RegisteredOnly
    }

    fn usage(&self) -> &str {
        "send a message to your room (default for plain text)"
    }

    async fn execute(&self, message: &Message) -> Result<Response, ChatError> {
        let sender = self.service.get_client(&message.sender_client_id).await?;
        let response = Response::ok(&message.sender_client_id, sender.name(), &message.content);

        // Empty content is tolerated as a no-op echo, not an error.
        if message.content.is_empty() {
            return Ok(response);
        }

        match sender.group_id().await {
            Some(group_id) => {
                let group = self.service.get_group(&group_id).await?;
                self.service
                    .broadcast(
                        Some(group.clients().await),
                        response.clone(),
                        &message.sender_client_id,
                    )
                    .await;
            }
            None => {
                self.service
                    .broadcast(None, response.clone(), &message.sender_client_id)
                    .await;
            }
        }
        Ok(response)
    }
}

/// `/quit` - deregisters the caller and notifies its peers.
struct QuitCommand {
    service: Arc<ChatService>,
}

#[async_trait]
impl PluginHandler for QuitCommand {
    fn scope(&self) -> Scope {
        Scope::RegisteredOnly
    }

    fn usage(&self) -> &str {
        "leave the chat"
    }

    async fn execute(&self, message: &Message) -> Result<Response, ChatError> {
        self.service.deregister(&message.sender_client_id).await?;
        Ok(Response::ok(&message.sender_client_id, "server", "goodbye"))
    }
}

/// `/private {id} {text}` - direct delivery to one client.
struct PrivateCommand {
    service: Arc<ChatService>,
}

#[async_trait]
impl PluginHandler for PrivateCommand {
    fn scope(&self) -> Scope {
        Scope::RegisteredOnly
    }

    fn usage(&self) -> &str {
        "send a private message: /private {id} {text}"
    }

    async fn execute(&self, message: &Message) -> Result<Response, ChatError> {
        let content = message.content.trim();
        let Some((target_id, text)) = content.split_once(char::is_whitespace) else {
            return Err(ChatError::InvalidInput(
                "usage: /private {id} {text}".to_string(),
            ));
        };

        let sender = self.service.get_client(&message.sender_client_id).await?;
        self.service
            .echo(
                target_id,
                Response::ok(&message.sender_client_id, sender.name(), text.trim_start()),
            )
            .await?;

        Ok(Response::ok(
            &message.sender_client_id,
            "server",
            format!("delivered to {target_id}"),
        ))
    }
}

/// `/group <verb> ...` - re-enters the nested group registry after
/// splitting the first token of content into a sub-command.
struct GroupCommand {
    groups: Arc<GroupRegistry>,
}

#[async_trait]
impl PluginHandler for GroupCommand {
    fn scope(&self) -> Scope {
        Scope::RegisteredOnly
    }

    fn usage(&self) -> &str {
        "group commands: /group {create|join|leave|list|users|help} ..."
    }

    async fn execute(&self, message: &Message) -> Result<Response, ChatError> {
        let content = message.content.trim();
        let (verb, rest) = match content.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim_start()),
            None if !content.is_empty() => (content, ""),
            None => {
                return Err(ChatError::InvalidInput(
                    "usage: /group {verb} ...".to_string(),
                ))
            }
        };

        let mut nested = message.clone();
        nested.command = verb.to_string();
        nested.content = rest.to_string();
        self.groups.find_and_execute(nested).await
    }
}
