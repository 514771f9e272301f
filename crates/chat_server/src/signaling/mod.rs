//! WebRTC signaling coordination.
//!
//! This registry maps signaling message kinds to handlers that validate
//! and advance per-peer call state and relay SDP/ICE payloads. The server
//! never touches media; it only brokers the control strings and keeps the
//! two ends' negotiation views converging.
//!
//! Field roles differ from chat commands throughout this subsystem: the
//! message's `name` field carries the initiating client's id and
//! `clientId` addresses the peer.

pub mod handlers;

use crate::error::ChatError;
use crate::messaging::{Message, Response};
use crate::service::ChatService;
use crate::plugin::PluginHandler;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// Inbound signaling message kinds (command identifiers).
pub const INITIALIZE: &str = "initialize";
pub const OFFER: &str = "offer";
pub const ANSWER: &str = "answer";
pub const ICE_CANDIDATE: &str = "icecandidate";
pub const STABLE: &str = "stable";
pub const CONNECTED: &str = "connected";
pub const FAILED_CONNECTION: &str = "failedconnection";

/// Outbound relay tags carried in `Response::responder_name`.
pub const OFFER_SIGNAL: &str = "OfferSignal";
pub const ANSWER_SIGNAL: &str = "AnswerSignal";
pub const ICE_CANDIDATE_SIGNAL: &str = "IceCandidateSignal";
pub const FAILED_SIGNAL: &str = "FailedConnection";

/// Content value signaling that a cooperative rollback has completed and
/// the pairwise state may be cleared.
pub const ROLLBACK_DONE: &str = "rollback-done";

/// Registry mapping signaling kinds to their handlers.
///
/// Same dispatch-boundary policy as the chat command registry: unknown
/// kinds, unregistered callers, and handler failures are returned as
/// displayable error responses, never propagated between clients.
pub struct SignalingRegistry {
    service: Arc<ChatService>,
    handlers: DashMap<String, Arc<dyn PluginHandler>>,
}

impl SignalingRegistry {
    /// Creates the registry with every signaling kind registered.
    pub fn new(service: Arc<ChatService>) -> Arc<Self> {
        let registry = Arc::new(Self {
            service: service.clone(),
            handlers: DashMap::new(),
        });
        handlers::register_handlers(&registry, service);
        registry
    }

    /// Registers a handler for a signaling kind.
    pub fn register(&self, kind: impl Into<String>, handler: Arc<dyn PluginHandler>) {
        self.handlers.insert(kind.into(), handler);
    }

    /// Returns `true` if the given command identifier is a signaling kind,
    /// letting a dispatch layer route between chat and signaling.
    pub fn handles(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Looks up and runs the handler for a signaling message.
    ///
    /// The caller is identified by the `name` field and must be a
    /// registered client.
    pub async fn find_and_execute(&self, message: Message) -> Result<Response, ChatError> {
        let Some(handler) = self
            .handlers
            .get(&message.command)
            .map(|entry| entry.value().clone())
        else {
            return Ok(Response::error_for(
                &message.sender_name,
                &ChatError::NoSuchCommand(message.command.clone()),
            ));
        };

        if self.service.get_client(&message.sender_name).await.is_err() {
            return Ok(Response::error_for(
                &message.sender_name,
                &ChatError::NotRegistered,
            ));
        }

        match handler.execute(&message).await {
            Ok(response) => Ok(response),
            Err(error) => {
                debug!("signaling '{}' rejected: {}", message.command, error);
                Ok(Response::error_for(&message.sender_name, &error))
            }
        }
    }
}
