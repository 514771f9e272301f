//! Named groups: sub-broadcast domains with a pairwise connection ledger.
//!
//! A [`Group`] tracks its member set plus one record per member pair with
//! a call setup in flight or fully connected. The ledger is what dedupes
//! simultaneous call setups between the same two members.

use crate::connection::Client;
use crate::error::ChatError;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// State of a pairwise call setup inside a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionState {
    /// `false` while the negotiation is in flight, `true` once both sides
    /// reported a media connection
    pub connected: bool,
}

/// A named membership set of clients plus the pairwise connection ledger.
///
/// Created by `/group create` and destroyed by the reaper once membership
/// reaches zero. A client belongs to at most one group at a time.
#[derive(Debug)]
pub struct Group {
    /// Registry-stable group id
    id: String,

    /// Human-readable group name
    name: String,

    /// Current members, keyed by client id
    members: RwLock<HashMap<String, Arc<Client>>>,

    /// Pairwise call-setup records, keyed by normalized id pair
    connections: RwLock<HashMap<(String, String), ConnectionState>>,
}

/// Normalizes a member pair into an order-independent ledger key.
fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

impl Group {
    /// Creates a new empty group.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            members: RwLock::new(HashMap::new()),
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// The registry-stable group id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The human-readable group name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds a client to the member set.
    ///
    /// # Errors
    ///
    /// [`ChatError::AlreadyMember`] if the client id is already present.
    pub async fn add_client(&self, client: Arc<Client>) -> Result<(), ChatError> {
        let mut members = self.members.write().await;
        if members.contains_key(client.client_id()) {
            return Err(ChatError::AlreadyMember(self.id.clone()));
        }
        members.insert(client.client_id().to_string(), client);
        Ok(())
    }

    /// Removes a client from the member set.
    ///
    /// # Errors
    ///
    /// [`ChatError::NotMember`] if the client id is not present.
    pub async fn remove_client(&self, client_id: &str) -> Result<(), ChatError> {
        let mut members = self.members.write().await;
        if members.remove(client_id).is_none() {
            return Err(ChatError::NotMember(self.id.clone()));
        }
        Ok(())
    }

    /// Returns `true` if the client id is a member.
    pub async fn contains(&self, client_id: &str) -> bool {
        self.members.read().await.contains_key(client_id)
    }

    /// Snapshot of the member set for broadcast fan-out.
    pub async fn clients(&self) -> HashMap<String, Arc<Client>> {
        self.members.read().await.clone()
    }

    /// Number of current members.
    pub async fn len(&self) -> usize {
        self.members.read().await.len()
    }

    /// Returns `true` if the group has no members; the reaper deletes such
    /// groups.
    pub async fn is_empty(&self) -> bool {
        self.members.read().await.is_empty()
    }

    /// Returns `true` if a pairwise connection record exists for the two
    /// members, in either order.
    pub async fn check_connection(&self, a: &str, b: &str) -> bool {
        self.connections.read().await.contains_key(&pair_key(a, b))
    }

    /// Records or updates the pairwise connection between two members.
    /// Idempotent and order-independent.
    pub async fn set_connection(&self, a: &str, b: &str, connected: bool) {
        self.connections
            .write()
            .await
            .insert(pair_key(a, b), ConnectionState { connected });
    }

    /// The pairwise connection record, if any.
    pub async fn connection_state(&self, a: &str, b: &str) -> Option<ConnectionState> {
        self.connections.read().await.get(&pair_key(a, b)).copied()
    }

    /// Removes the pairwise connection record for two members.
    pub async fn remove_connection(&self, a: &str, b: &str) {
        self.connections.write().await.remove(&pair_key(a, b));
    }
}
