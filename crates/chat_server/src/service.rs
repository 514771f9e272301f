//! Central chat service: client registry, group registry, and delivery.
//!
//! The [`ChatService`] owns the two registries and provides lookup,
//! broadcast, echo, and idle-reaping. Registry maps are each behind one
//! reader/writer lock; per-entity locks are acquired after the registry
//! lock when both are needed, so lock ordering is consistent everywhere.

use crate::config::ServiceConfig;
use crate::connection::Client;
use crate::error::ChatError;
use crate::groups::Group;
use crate::messaging::Response;
use crate::utils::generate_auth_token;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Central coordinator for clients and groups.
///
/// All state is in-memory; nothing survives a restart. Delivery failures
/// during fan-out are logged and never abort the broadcast.
#[derive(Debug)]
pub struct ChatService {
    /// Service configuration (capacity, mailbox sizing, timeouts)
    config: ServiceConfig,

    /// Registered clients, keyed by client id
    clients: RwLock<HashMap<String, Arc<Client>>>,

    /// Active groups, keyed by group id
    groups: RwLock<HashMap<String, Arc<Group>>>,
}

impl ChatService {
    /// Creates a new service with the given configuration.
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            clients: RwLock::new(HashMap::new()),
            groups: RwLock::new(HashMap::new()),
        }
    }

    /// The service configuration.
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Registers a new client and issues its auth token.
    ///
    /// A "user joined" notice is broadcast asynchronously to every client
    /// currently outside a group.
    ///
    /// # Errors
    ///
    /// * [`ChatError::CapacityExceeded`] - the registry is at `max_users`
    /// * [`ChatError::AlreadyRegistered`] - the client id already exists
    pub async fn register_client(
        &self,
        name: &str,
        client_id: &str,
    ) -> Result<String, ChatError> {
        let client = {
            let mut clients = self.clients.write().await;
            if clients.len() >= self.config.max_users {
                return Err(ChatError::CapacityExceeded);
            }
            if clients.contains_key(client_id) {
                return Err(ChatError::AlreadyRegistered(client_id.to_string()));
            }

            let client = Arc::new(Client::new(
                name,
                client_id,
                generate_auth_token(),
                self.config.mailbox_capacity,
            ));
            clients.insert(client_id.to_string(), client.clone());
            client
        };

        info!("client '{}' registered ({})", name, client_id);

        let notice = Response::ok(client_id, "server", format!("{name} joined the chat"));
        let recipients = self.global_clients(client_id).await;
        tokio::spawn(async move {
            deliver_all(recipients, notice).await;
        });

        Ok(client.auth_token().to_string())
    }

    /// Removes a client: group membership, mailbox, and registry entry.
    ///
    /// The registry delete, group removal, and mailbox close happen under
    /// the registry write lock so a concurrent broadcast can never observe
    /// a deleted client in a member set. A "user left" notice goes to the
    /// peers the client was visible to.
    pub async fn deregister(&self, client_id: &str) -> Result<(), ChatError> {
        let (client, group) = {
            let mut clients = self.clients.write().await;
            let client = clients
                .remove(client_id)
                .ok_or_else(|| ChatError::ClientNotFound(client_id.to_string()))?;

            let group = match client.group_id().await {
                Some(group_id) => self.groups.read().await.get(&group_id).cloned(),
                None => None,
            };
            if let Some(ref group) = group {
                if let Err(e) = group.remove_client(client_id).await {
                    warn!("group cleanup for {} failed: {}", client_id, e);
                }
            }
            client.close().await;
            (client, group)
        };

        info!("client '{}' deregistered ({})", client.name(), client_id);

        let notice = Response::ok(
            client_id,
            "server",
            format!("{} left the chat", client.name()),
        );
        match group {
            Some(group) => {
                self.broadcast(Some(group.clients().await), notice, client_id)
                    .await;
            }
            None => self.broadcast(None, notice, client_id).await,
        }

        Ok(())
    }

    /// Delivers a response to a set of clients.
    ///
    /// With `targets` absent, delivery goes to every registered client
    /// outside any group; otherwise to every member of the given set. The
    /// excluded id (usually the sender) is skipped. Full or closed
    /// mailboxes are logged, never fatal to the broadcast.
    pub async fn broadcast(
        &self,
        targets: Option<HashMap<String, Arc<Client>>>,
        response: Response,
        exclude_client_id: &str,
    ) {
        let recipients: Vec<Arc<Client>> = match targets {
            Some(members) => members
                .into_iter()
                .filter(|(id, _)| id != exclude_client_id)
                .map(|(_, client)| client)
                .collect(),
            None => self.global_clients(exclude_client_id).await,
        };
        deliver_all(recipients, response).await;
    }

    /// Direct delivery to one client's mailbox.
    ///
    /// # Errors
    ///
    /// [`ChatError::ClientNotFound`] for an unknown id; otherwise the
    /// client's own send error (full or closed mailbox).
    pub async fn echo(&self, client_id: &str, response: Response) -> Result<(), ChatError> {
        let client = self.get_client(client_id).await?;
        client.send(response).await
    }

    /// Looks up a client by id.
    pub async fn get_client(&self, client_id: &str) -> Result<Arc<Client>, ChatError> {
        self.clients
            .read()
            .await
            .get(client_id)
            .cloned()
            .ok_or_else(|| ChatError::ClientNotFound(client_id.to_string()))
    }

    /// Looks up a group by id.
    pub async fn get_group(&self, group_id: &str) -> Result<Arc<Group>, ChatError> {
        self.groups
            .read()
            .await
            .get(group_id)
            .cloned()
            .ok_or_else(|| ChatError::GroupNotFound(group_id.to_string()))
    }

    /// Resolves a group by id first, then by name.
    pub async fn resolve_group(&self, key: &str) -> Result<Arc<Group>, ChatError> {
        let groups = self.groups.read().await;
        if let Some(group) = groups.get(key) {
            return Ok(group.clone());
        }
        groups
            .values()
            .find(|group| group.name() == key)
            .cloned()
            .ok_or_else(|| ChatError::GroupNotFound(key.to_string()))
    }

    /// Creates a new empty group with a fresh id.
    ///
    /// Group names are unique so a name-based `/group join` always has one
    /// target. The uniqueness check and the insert happen under the same
    /// write lock, so two concurrent creates with the same name cannot
    /// both succeed.
    ///
    /// # Errors
    ///
    /// [`ChatError::InvalidInput`] if a group with this name already
    /// exists.
    pub async fn create_group(&self, name: &str) -> Result<Arc<Group>, ChatError> {
        let mut groups = self.groups.write().await;
        if groups.values().any(|group| group.name() == name) {
            return Err(ChatError::InvalidInput(format!(
                "group name already in use: {name}"
            )));
        }

        let group = Arc::new(Group::new(Uuid::new_v4().to_string(), name));
        groups.insert(group.id().to_string(), group.clone());
        info!("group '{}' created ({})", name, group.id());
        Ok(group)
    }

    /// Snapshot of all active groups.
    pub async fn groups_snapshot(&self) -> Vec<Arc<Group>> {
        self.groups.read().await.values().cloned().collect()
    }

    /// Snapshot of every registered client.
    pub async fn clients_snapshot(&self) -> Vec<Arc<Client>> {
        self.clients.read().await.values().cloned().collect()
    }

    /// Number of registered clients.
    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Evicts idle clients and prunes empty groups.
    ///
    /// A client is idle if it is not currently servicing a request and its
    /// last activity is at least `limit` old. Intended to run periodically
    /// on a background timer; eviction errors are housekeeping, never
    /// surfaced to clients.
    ///
    /// Returns the number of clients reaped.
    pub async fn reap_idle(&self, limit: Duration) -> usize {
        let candidates: Vec<(String, Arc<Client>)> = self
            .clients
            .read()
            .await
            .iter()
            .map(|(id, client)| (id.clone(), client.clone()))
            .collect();

        let mut reaped = 0;
        for (client_id, client) in candidates {
            if client.is_idle(limit).await {
                debug!("reaping idle client '{}' ({})", client.name(), client_id);
                if self.deregister(&client_id).await.is_ok() {
                    reaped += 1;
                }
            }
        }

        let empty_groups: Vec<String> = {
            let groups: Vec<Arc<Group>> = self.groups.read().await.values().cloned().collect();
            let mut empty = Vec::new();
            for group in groups {
                if group.is_empty().await {
                    empty.push(group.id().to_string());
                }
            }
            empty
        };
        if !empty_groups.is_empty() {
            let mut groups = self.groups.write().await;
            for group_id in empty_groups {
                if groups.remove(&group_id).is_some() {
                    debug!("pruned empty group {}", group_id);
                }
            }
        }

        reaped
    }

    /// Every registered client outside any group, minus the excluded id.
    async fn global_clients(&self, exclude_client_id: &str) -> Vec<Arc<Client>> {
        let snapshot: Vec<Arc<Client>> = self
            .clients
            .read()
            .await
            .values()
            .filter(|client| client.client_id() != exclude_client_id)
            .cloned()
            .collect();

        let mut recipients = Vec::with_capacity(snapshot.len());
        for client in snapshot {
            if client.group_id().await.is_none() {
                recipients.push(client);
            }
        }
        recipients
    }
}

/// Fans a response out to a list of clients, logging delivery failures.
async fn deliver_all(recipients: Vec<Arc<Client>>, response: Response) {
    for client in recipients {
        if let Err(e) = client.send(response.clone()).await {
            warn!(
                "dropping broadcast for client {}: {}",
                client.client_id(),
                e
            );
        }
    }
}
