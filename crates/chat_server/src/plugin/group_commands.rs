//! Nested dispatch for `/group` sub-commands.
//!
//! The group registry mirrors the top-level command registry at a smaller
//! scale: `/group join X` arrives here rewritten as command `join` with
//! content `X`. Every verb requires a registered caller.

use super::commands::UserEntry;
use super::{PluginHandler, Scope};
use crate::error::ChatError;
use crate::messaging::{Message, Response};
use crate::service::ChatService;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::{Arc, Weak};

/// JSON entry produced by `/group list`.
#[derive(Debug, Serialize)]
struct GroupEntry {
    id: String,
    name: String,
    size: usize,
}

/// Registry mapping group verbs (`create`, `join`, `leave`, `list`,
/// `users`, `help`) to handlers.
pub struct GroupRegistry {
    service: Arc<ChatService>,
    handlers: DashMap<String, Arc<dyn PluginHandler>>,
}

impl GroupRegistry {
    /// Creates the registry with all group verbs registered.
    pub fn new(service: Arc<ChatService>) -> Arc<Self> {
        let registry = Arc::new(Self {
            service: service.clone(),
            handlers: DashMap::new(),
        });

        registry.register(
            "create",
            Arc::new(CreateGroup {
                service: service.clone(),
            }),
        );
        registry.register(
            "join",
            Arc::new(JoinGroup {
                service: service.clone(),
            }),
        );
        registry.register(
            "leave",
            Arc::new(LeaveGroup {
                service: service.clone(),
            }),
        );
        registry.register(
            "list",
            Arc::new(ListGroups {
                service: service.clone(),
            }),
        );
        registry.register("users", Arc::new(GroupUsers { service }));
        registry.register(
            "help",
            Arc::new(GroupHelp {
                registry: Arc::downgrade(&registry),
            }),
        );
        registry
    }

    /// Registers a handler for a group verb.
    pub fn register(&self, verb: impl Into<String>, handler: Arc<dyn PluginHandler>) {
        self.handlers.insert(verb.into(), handler);
    }

    /// Sorted usage lines of every registered verb.
    pub fn usage_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .handlers
            .iter()
            .map(|entry| format!("/group {} - {}", entry.key(), entry.value().usage()))
            .collect();
        lines.sort();
        lines
    }

    /// Looks up and runs the handler for a rewritten group message.
    ///
    /// Same boundary policy as the top-level registry: unknown verbs and
    /// handler failures come back as displayable error responses.
    pub async fn find_and_execute(&self, message: Message) -> Result<Response, ChatError> {
        let Some(handler) = self
            .handlers
            .get(&message.command)
            .map(|entry| entry.value().clone())
        else {
            return Ok(Response::from_error(
                &message,
                &ChatError::NoSuchCommand(format!("group {}", message.command)),
            ));
        };

        if self
            .service
            .get_client(&message.sender_client_id)
            .await
            .is_err()
        {
            return Ok(Response::from_error(&message, &ChatError::NotRegistered));
        }

        match handler.execute(&message).await {
            Ok(response) => Ok(response),
            Err(error) => Ok(Response::from_error(&message, &error)),
        }
    }
}

/// `/group create {name}` - creates a group and joins the creator.
struct CreateGroup {
    service: Arc<ChatService>,
}

#[async_trait]
impl PluginHandler for CreateGroup {
    fn scope(&self) -> Scope {
        Scope::RegisteredOnly
    }

    fn usage(&self) -> &str {
        "create a group and join it: /group create {name}"
    }

    async fn execute(&self, message: &Message) -> Result<Response, ChatError> {
        let name = message.content.trim();
        if name.is_empty() {
            return Err(ChatError::InvalidInput(
                "usage: /group create {name}".to_string(),
            ));
        }

        let sender = self.service.get_client(&message.sender_client_id).await?;
        if let Some(current) = sender.group_id().await {
            return Err(ChatError::AlreadyMember(current));
        }

        let group = self.service.create_group(name).await?;
        group.add_client(sender.clone()).await?;
        sender.set_group_id(Some(group.id().to_string())).await;

        Ok(Response::ok(
            &message.sender_client_id,
            "server",
            group.id().to_string(),
        ))
    }
}

/// `/group join {id|name}` - joins an existing group.
struct JoinGroup {
    service: Arc<ChatService>,
}

#[async_trait]
impl PluginHandler for JoinGroup {
    fn scope(&self) -> Scope {
        Scope::RegisteredOnly
    }

    fn usage(&self) -> &str {
        "join a group: /group join {id or name}"
    }

    async fn execute(&self, message: &Message) -> Result<Response, ChatError> {
        let key = message.content.trim();
        if key.is_empty() {
            return Err(ChatError::InvalidInput(
                "usage: /group join {id or name}".to_string(),
            ));
        }

        let sender = self.service.get_client(&message.sender_client_id).await?;
        if let Some(current) = sender.group_id().await {
            return Err(ChatError::AlreadyMember(current));
        }

        let group = self.service.resolve_group(key).await?;
        group.add_client(sender.clone()).await?;
        sender.set_group_id(Some(group.id().to_string())).await;

        let notice = Response::ok(
            &message.sender_client_id,
            "server",
            format!("{} joined group {}", sender.name(), group.name()),
        );
        self.service
            .broadcast(
                Some(group.clients().await),
                notice,
                &message.sender_client_id,
            )
            .await;

        Ok(Response::ok(
            &message.sender_client_id,
            "server",
            format!("joined group {}", group.name()),
        ))
    }
}

/// `/group leave` - leaves the caller's current group.
struct LeaveGroup {
    service: Arc<ChatService>,
}

#[async_trait]
impl PluginHandler for LeaveGroup {
    fn scope(&self) -> Scope {
        Scope::RegisteredOnly
    }

    fn usage(&self) -> &str {
        "leave your current group"
    }

    async fn execute(&self, message: &Message) -> Result<Response, ChatError> {
        let sender = self.service.get_client(&message.sender_client_id).await?;
        let Some(group_id) = sender.group_id().await else {
            return Err(ChatError::NotMember("no current group".to_string()));
        };

        let group = self.service.get_group(&group_id).await?;
        group.remove_client(sender.client_id()).await?;
        sender.set_group_id(None).await;

        let notice = Response::ok(
            &message.sender_client_id,
            "server",
            format!("{} left group {}", sender.name(), group.name()),
        );
        self.service
            .broadcast(
                Some(group.clients().await),
                notice,
                &message.sender_client_id,
            )
            .await;

        Ok(Response::ok(
            &message.sender_client_id,
            "server",
            format!("left group {}", group.name()),
        ))
    }
}

/// `/group list` - serializes all active groups.
struct ListGroups {
    service: Arc<ChatService>,
}

#[async_trait]
impl PluginHandler for ListGroups {
    fn scope(&self) -> Scope {
        Scope::RegisteredOnly
    }

    fn usage(&self) -> &str {
        "list active groups"
    }

    async fn execute(&self, message: &Message) -> Result<Response, ChatError> {
        let mut entries = Vec::new();
        for group in self.service.groups_snapshot().await {
            entries.push(GroupEntry {
                id: group.id().to_string(),
                name: group.name().to_string(),
                size: group.len().await,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        let listing = serde_json::to_string(&entries)
            .map_err(|e| ChatError::InvalidInput(e.to_string()))?;
        Ok(Response::ok(&message.sender_client_id, "server", listing))
    }
}

/// `/group users` - serializes the caller's group members.
struct GroupUsers {
    service: Arc<ChatService>,
}

#[async_trait]
impl PluginHandler for GroupUsers {
    fn scope(&self) -> Scope {
        Scope::RegisteredOnly
    }

    fn usage(&self) -> &str {
        "list the members of your group"
    }

    async fn execute(&self, message: &Message) -> Result<Response, ChatError> {
        let sender = self.service.get_client(&message.sender_client_id).await?;
        let Some(group_id) = sender.group_id().await else {
            return Err(ChatError::NotMember("no current group".to_string()));
        };

        let group = self.service.get_group(&group_id).await?;
        let mut entries: Vec<UserEntry> = group
            .clients()
            .await
            .into_values()
            .map(|client| UserEntry {
                name: client.name().to_string(),
                client_id: client.client_id().to_string(),
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        let listing = serde_json::to_string(&entries)
            .map_err(|e| ChatError::InvalidInput(e.to_string()))?;
        Ok(Response::ok(&message.sender_client_id, "server", listing))
    }
}

/// `/group help` - lists the group verbs.
struct GroupHelp {
    registry: Weak<GroupRegistry>,
}

#[async_trait]
impl PluginHandler for GroupHelp {
    fn scope(&self) -> Scope {
        Scope::RegisteredOnly
    }

    fn usage(&self) -> &str {
        "list group commands"
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
