//! Signaling handlers: per-kind validation, state transitions, and relay.
//!
//! Each handler resolves the caller (id in the message's `name` field) and
//! the addressed peer (`clientId`), checks the negotiation preconditions,
//! advances the per-pair call state, and relays the payload into the
//! peer's mailbox. Requiring both sides to pass a compatible-state check
//! before any relay keeps stale or duplicate offers from corrupting an
//! in-progress negotiation, and doubles as the collision detector for
//! simultaneous offers.

use super::{
    SignalingRegistry, ANSWER, ANSWER_SIGNAL, CONNECTED, FAILED_CONNECTION, FAILED_SIGNAL,
    ICE_CANDIDATE, ICE_CANDIDATE_SIGNAL, INITIALIZE, OFFER, OFFER_SIGNAL, ROLLBACK_DONE, STABLE,
};
use crate::connection::{CallState, Client};
use crate::error::ChatError;
use crate::groups::Group;
use crate::messaging::{Message, Response};
use crate::plugin::{PluginHandler, Scope};
use crate::service::ChatService;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Registers every signaling kind into the given registry.
pub(crate) fn register_handlers(registry: &Arc<SignalingRegistry>, service: Arc<ChatService>) {
    registry.register(
        INITIALIZE,
        Arc::new(InitializeCall {
            service: service.clone(),
        }),
    );
    registry.register(
        OFFER,
        Arc::new(RelayOffer {
            service: service.clone(),
        }),
    );
    registry.register(
        ANSWER,
        Arc::new(RelayAnswer {
            service: service.clone(),
        }),
    );
    registry.register(
        ICE_CANDIDATE,
        Arc::new(RelayIceCandidate {
            service: service.clone(),
        }),
    );
    registry.register(
        STABLE,
        Arc::new(MarkStable {
            service: service.clone(),
        }),
    );
    registry.register(
        CONNECTED,
        Arc::new(MarkConnected {
            service: service.clone(),
        }),
    );
    registry.register(FAILED_CONNECTION, Arc::new(FailConnection { service }));
}

/// Resolved caller/peer pair sharing a group.
struct CallPair {
    caller: Arc<Client>,
    peer: Arc<Client>,
    group: Arc<Group>,
}

/// Resolves caller, peer, and their shared group from a signaling message.
///
/// The group comes from the message's `groupId` when present, otherwise
/// from the caller's current membership; both clients must be members.
async fn resolve_pair(service: &ChatService, message: &Message) -> Result<CallPair, ChatError> {
    let caller = service.get_client(&message.sender_name).await?;
    let peer = service.get_client(&message.sender_client_id).await?;

    let group_id = if !message.group_id.is_empty() {
        message.group_id.clone()
    } else {
        caller
            .group_id()
            .await
            .ok_or_else(|| ChatError::GroupNotFound("caller is not in a group".to_string()))?
    };

    let group = service.get_group(&group_id).await?;
    if !group.contains(caller.client_id()).await || !group.contains(peer.client_id()).await {
        return Err(ChatError::NotMember(group_id));
    }

    Ok(CallPair {
        caller,
        peer,
        group,
    })
}

/// Human-readable label for an optional call state, used in errors.
fn state_label(state: Option<CallState>) -> String {
    match state {
        Some(state) => state.to_string(),
        None => "none".to_string(),
    }
}

/// `initialize` - records a fresh pairwise negotiation.
///
/// Rejected while a connection record for the pair already exists, which
/// dedupes simultaneous call setups between the same two members.
struct InitializeCall {
    service: Arc<ChatService>,
}

#[async_trait]
impl PluginHandler for InitializeCall {
    fn scope(&self) -> Scope {
        Scope::RegisteredOnly
    }

    fn usage(&self) -> &str {
        "begin a call negotiation with a peer"
    }

    async fn execute(&self, message: &Message) -> Result<Response, ChatError> {
        let pair = resolve_pair(&self.service, message).await?;
        let caller_id = pair.caller.client_id();
        let peer_id = pair.peer.client_id();

        if pair.group.check_connection(caller_id, peer_id).await {
            return Err(ChatError::WrongCallState(
                "negotiation already in progress for this pair".to_string(),
            ));
        }

        pair.group.set_connection(caller_id, peer_id, false).await;
        pair.caller.set_call_state(peer_id, CallState::OfferSent).await;
        pair.peer.set_call_state(caller_id, CallState::AnswerSent).await;

        debug!("call initialized between {} and {}", caller_id, peer_id);
        Ok(Response::signal_echo(caller_id))
    }
}

/// `offer` - announces or relays an SDP offer.
///
/// Empty content is a local placeholder that only marks the sender's
/// intent. A non-empty offer is relayed only when both sides' states are
/// compatible; on glare (both sides in `OfferSent`) the lexicographically
/// smaller client id keeps the offering role and the peer is moved to the
/// answering role, so exactly one of the two racing offers goes through.
struct RelayOffer {
    service: Arc<ChatService>,
}

#[async_trait]
impl PluginHandler for RelayOffer {
    fn scope(&self) -> Scope {
        Scope::RegisteredOnly
    }

    fn usage(&self) -> &str {
        "relay an SDP offer to a peer"
    }

    async fn execute(&self, message: &Message) -> Result<Response, ChatError> {
        let pair = resolve_pair(&self.service, message).await?;
        let caller_id = pair.caller.client_id().to_string();
        let peer_id = pair.peer.client_id().to_string();

        if message.content.is_empty() {
            pair.caller.set_call_state(&peer_id, CallState::OfferSent).await;
            return Ok(Response::signal_echo(caller_id));
        }

        let caller_state = pair.caller.call_state(&peer_id).await;
        let peer_state = pair.peer.call_state(&caller_id).await;

        if !matches!(
            caller_state,
            Some(CallState::Stable) | Some(CallState::OfferSent)
        ) {
            return Err(ChatError::WrongCallState(format!(
                "cannot offer from state {}",
                state_label(caller_state)
            )));
        }

        match peer_state {
            Some(CallState::Stable) | Some(CallState::AnswerSent) => {}
            Some(CallState::OfferSent) if caller_id < peer_id => {
                // Glare: both sides offered. The smaller id wins the race
                // and the peer falls back to the answering role.
                debug!(
                    "offer glare between {} and {}: {} keeps the offer",
                    caller_id, peer_id, caller_id
                );
                pair.peer.set_call_state(&caller_id, CallState::AnswerSent).await;
            }
            _ => {
                return Err(ChatError::WrongCallState(format!(
                    "peer cannot accept an offer in state {}",
                    state_label(peer_state)
                )));
            }
        }

        pair.peer
            .send(Response::ok(&caller_id, OFFER_SIGNAL, &message.content))
            .await?;
        Ok(Response::signal_echo(caller_id))
    }
}

/// `answer` - announces or relays an SDP answer.
struct RelayAnswer {
    service: Arc<ChatService>,
}

#[async_trait]
impl PluginHandler for RelayAnswer {
    fn scope(&self) -> Scope {
        Scope::RegisteredOnly
    }

    fn usage(&self) -> &str {
        "relay an SDP answer to a peer"
    }

    async fn execute(&self, message: &Message) -> Result<Response, ChatError> {
        let pair = resolve_pair(&self.service, message).await?;
        let caller_id = pair.caller.client_id().to_string();
        let peer_id = pair.peer.client_id().to_string();

        if message.content.is_empty() {
            pair.caller.set_call_state(&peer_id, CallState::AnswerSent).await;
            return Ok(Response::signal_echo(caller_id));
        }

        let caller_state = pair.caller.call_state(&peer_id).await;
        let peer_state = pair.peer.call_state(&caller_id).await;

        if caller_state != Some(CallState::AnswerSent) {
            return Err(ChatError::WrongCallState(format!(
                "cannot answer from state {}",
                state_label(caller_state)
            )));
        }
        if peer_state != Some(CallState::OfferSent) {
            return Err(ChatError::WrongCallState(format!(
                "peer is not offering (state {})",
                state_label(peer_state)
            )));
        }

        pair.peer
            .send(Response::ok(&caller_id, ANSWER_SIGNAL, &message.content))
            .await?;
        Ok(Response::signal_echo(caller_id))
    }
}

/// `icecandidate` - relays an ICE candidate string verbatim.
///
/// Requires the pairwise connection record to exist; carries no state
/// change of its own.
struct RelayIceCandidate {
    service: Arc<ChatService>,
}

#[async_trait]
impl PluginHandler for RelayIceCandidate {
    fn scope(&self) -> Scope {
        Scope::RegisteredOnly
    }

    fn usage(&self) -> &str {
        "relay an ICE candidate to a peer"
    }

    async fn execute(&self, message: &Message) -> Result<Response, ChatError> {
        let pair = resolve_pair(&self.service, message).await?;
        let caller_id = pair.caller.client_id();
        let peer_id = pair.peer.client_id();

        if !pair.group.check_connection(caller_id, peer_id).await {
            return Err(ChatError::WrongCallState(
                "no registered connection for this pair".to_string(),
            ));
        }

        pair.peer
            .send(Response::ok(
                caller_id,
                ICE_CANDIDATE_SIGNAL,
                &message.content,
            ))
            .await?;
        Ok(Response::signal_echo(caller_id))
    }
}

/// `stable` - unconditionally settles the sender's view of the pair.
///
/// Re-arms both the offer and answer preconditions for the next
/// negotiation round.
struct MarkStable {
    service: Arc<ChatService>,
}

#[async_trait]
impl PluginHandler for MarkStable {
    fn scope(&self) -> Scope {
        Scope::RegisteredOnly
    }

    fn usage(&self) -> &str {
        "mark the negotiation with a peer as settled"
    }

    async fn execute(&self, message: &Message) -> Result<Response, ChatError> {
        let caller = self.service.get_client(&message.sender_name).await?;
        caller
            .set_call_state(&message.sender_client_id, CallState::Stable)
            .await;
        Ok(Response::signal_echo(caller.client_id()))
    }
}

/// `connected` - records an established media connection.
struct MarkConnected {
    service: Arc<ChatService>,
}

#[async_trait]
impl PluginHandler for MarkConnected {
    fn scope(&self) -> Scope {
        Scope::RegisteredOnly
    }

    fn usage(&self) -> &str {
        "mark the call with a peer as connected"
    }

    async fn execute(&self, message: &Message) -> Result<Response, ChatError> {
        let pair = resolve_pair(&self.service, message).await?;
        let caller_id = pair.caller.client_id();
        let peer_id = pair.peer.client_id();

        pair.caller.set_call_state(peer_id, CallState::Connected).await;
        pair.group.set_connection(caller_id, peer_id, true).await;

        debug!("call connected between {} and {}", caller_id, peer_id);
        Ok(Response::signal_echo(caller_id))
    }
}

/// `failedconnection` - cleanup and failure notification.
///
/// Three modes, selected by the message:
/// * empty peer id - purge every non-connected entry from the sender's
///   call-state map (local cleanup only, no relay)
/// * content [`ROLLBACK_DONE`] - terminal cleanup after a cooperative
///   rollback: clear the pairwise record and both sides' entries
/// * otherwise - echo a failure notice into both mailboxes, so an
///   asymmetric failure produces a symmetric notification
struct FailConnection {
    service: Arc<ChatService>,
}

#[async_trait]
impl PluginHandler for FailConnection {
    fn scope(&self) -> Scope {
        Scope::RegisteredOnly
    }

    fn usage(&self) -> &str {
        "abort a call negotiation"
    }

    async fn execute(&self, message: &Message) -> Result<Response, ChatError> {
        let caller = self.service.get_client(&message.sender_name).await?;
        let caller_id = caller.client_id().to_string();

        if message.sender_client_id.is_empty() {
            caller.purge_unconnected_calls().await;
            return Ok(Response::signal_echo(caller_id));
        }

        let peer_id = message.sender_client_id.clone();

        if message.content == ROLLBACK_DONE {
            // Best-effort terminal cleanup; the peer or group may already
            // be gone.
            caller.remove_call_state(&peer_id).await;
            if let Ok(peer) = self.service.get_client(&peer_id).await {
                peer.remove_call_state(&caller_id).await;
            }
            if let Some(group_id) = caller.group_id().await {
                if let Ok(group) = self.service.get_group(&group_id).await {
                    group.remove_connection(&caller_id, &peer_id).await;
                }
            }
            debug!("rollback completed between {} and {}", caller_id, peer_id);
            return Ok(Response::signal_echo(caller_id));
        }

        let notice = Response::ok(&caller_id, FAILED_SIGNAL, &message.content);
        if let Err(e) = caller.send(notice.clone()).await {
            warn!("failure notice undeliverable to {}: {}", caller_id, e);
        }
        match self.service.get_client(&peer_id).await {
            Ok(peer) => {
                if let Err(e) = peer.send(notice).await {
                    warn!("failure notice undeliverable to {}: {}", peer_id, e);
                }
            }
            Err(e) => warn!("failure notice peer lookup failed: {}", e),
        }

        Ok(Response::signal_echo(caller_id))
    }
}
