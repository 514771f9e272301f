//! Client representation: mailbox, activity accounting, and call states.
//!
//! A [`Client`] is created on successful registration and destroyed on
//! `/quit` or idle-timeout reaping. Its mailbox is a bounded FIFO of
//! [`Response`] values; enqueueing is always non-blocking so a slow or
//! stuck peer can never stall a sender.

use crate::error::ChatError;
use crate::messaging::{Message, Response};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::trace;

/// The negotiation phase a client believes it and a specific peer are in.
///
/// Call state is tracked per directed pair on each client, not in shared
/// storage: the two endpoints observe signaling events at independent
/// times, so their views may transiently disagree and are reconciled by
/// message exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// This side has sent (or locally announced) an SDP offer
    OfferSent,
    /// This side has taken the answering role
    AnswerSent,
    /// Negotiation settled; both offer and answer preconditions re-armed
    Stable,
    /// Media connection established
    Connected,
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            CallState::OfferSent => "offer-sent",
            CallState::AnswerSent => "answer-sent",
            CallState::Stable => "stable",
            CallState::Connected => "connected",
        };
        write!(f, "{label}")
    }
}

/// An individual registered client.
///
/// The client owns a bounded outbound mailbox, an activity timestamp used
/// by the idle reaper, the auth token issued at registration, and a map of
/// per-peer call states. All mutable fields are guarded by per-client
/// locks, acquired after any registry lock when both are needed.
#[derive(Debug)]
pub struct Client {
    /// Display name chosen at registration
    name: String,

    /// Session-stable client id (32 random bytes, base64url)
    client_id: String,

    /// Bearer token issued at registration (64 random bytes, base64url)
    auth_token: String,

    /// Sending half of the mailbox; taken exactly once on close
    mailbox_tx: RwLock<Option<mpsc::Sender<Response>>>,

    /// Receiving half of the mailbox, drained by long-poll receives
    mailbox_rx: Mutex<mpsc::Receiver<Response>>,

    /// Whether the client is currently servicing a request
    active: AtomicBool,

    /// Last time the client finished a receive or execute call
    last_activity: RwLock<Instant>,

    /// The group this client belongs to, if any (at most one at a time)
    group_id: RwLock<Option<String>>,

    /// Per-peer negotiation state, keyed by peer client id
    call_states: RwLock<HashMap<String, CallState>>,
}

impl Client {
    /// Creates a new client with a fresh bounded mailbox.
    pub fn new(
        name: impl Into<String>,
        client_id: impl Into<String>,
        auth_token: impl Into<String>,
        mailbox_capacity: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(mailbox_capacity);
        Self {
            name: name.into(),
            client_id: client_id.into(),
            auth_token: auth_token.into(),
            mailbox_tx: RwLock::new(Some(tx)),
            mailbox_rx: Mutex::new(rx),
            active: AtomicBool::new(false),
            last_activity: RwLock::new(Instant::now()),
            group_id: RwLock::new(None),
            call_states: RwLock::new(HashMap::new()),
        }
    }

    /// The client's display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The client's session-stable id.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// The bearer token issued at registration.
    pub fn auth_token(&self) -> &str {
        &self.auth_token
    }

    /// The group this client currently belongs to.
    pub async fn group_id(&self) -> Option<String> {
        self.group_id.read().await.clone()
    }

    /// Records the group this client belongs to (`None` = global room).
    pub async fn set_group_id(&self, group_id: Option<String>) {
        *self.group_id.write().await = group_id;
    }

    /// Long-poll primitive: blocks until a response is available, the
    /// mailbox is closed, or the deadline elapses.
    ///
    /// Marks the client active for the duration of the call and stamps the
    /// activity timestamp on return, so the idle reaper sees a client that
    /// keeps polling as live. Callers are expected to re-invoke this
    /// immediately after each return.
    ///
    /// # Errors
    ///
    /// * [`ChatError::ChannelClosed`] - the mailbox is gone; the caller
    ///   must re-register
    /// * [`ChatError::TimeoutReached`] - the deadline elapsed with no data
    pub async fn receive(&self, timeout: Duration) -> Result<Response, ChatError> {
        self.active.store(true, Ordering::SeqCst);

        let result = {
            let mut mailbox = self.mailbox_rx.lock().await;
            match tokio::time::timeout(timeout, mailbox.recv()).await {
                Ok(Some(response)) => Ok(response),
                Ok(None) => Err(ChatError::ChannelClosed),
                Err(_) => Err(ChatError::TimeoutReached),
            }
        };

        self.touch().await;
        self.active.store(false, Ordering::SeqCst);
        result
    }

    /// Attempts a non-blocking enqueue into the mailbox.
    ///
    /// Backpressure policy is drop-and-report: a full mailbox fails with
    /// [`ChatError::TimeoutReached`] instead of stalling the sender.
    pub async fn send(&self, response: Response) -> Result<(), ChatError> {
        let tx = self.mailbox_tx.read().await;
        let Some(tx) = tx.as_ref() else {
            return Err(ChatError::ChannelClosed);
        };

        match tx.try_send(response) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(ChatError::TimeoutReached),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ChatError::ChannelClosed),
        }
    }

    /// Runs a dispatch handler with the same activity accounting as
    /// [`Client::receive`], so both the pull and push paths count as
    /// liveness for the idle reaper.
    pub async fn execute<F, Fut>(&self, message: Message, dispatch: F) -> Result<Response, ChatError>
    where
        F: FnOnce(Message) -> Fut,
        Fut: Future<Output = Result<Response, ChatError>>,
    {
        self.active.store(true, Ordering::SeqCst);
        let result = dispatch(message).await;
        self.touch().await;
        self.active.store(false, Ordering::SeqCst);
        result
    }

    /// Closes the mailbox exactly once.
    ///
    /// Subsequent sends fail with [`ChatError::ChannelClosed`]; a blocked
    /// receive drains any buffered responses and then observes the close.
    pub async fn close(&self) {
        let mut tx = self.mailbox_tx.write().await;
        if tx.take().is_some() {
            trace!("mailbox closed for client {}", self.client_id);
        }
    }

    /// Returns `true` if the mailbox has been closed.
    pub async fn is_closed(&self) -> bool {
        self.mailbox_tx.read().await.is_none()
    }

    /// Returns `true` if the client is idle: not currently servicing a
    /// request and with no activity inside the limit.
    pub async fn is_idle(&self, limit: Duration) -> bool {
        if self.active.load(Ordering::SeqCst) {
            return false;
        }
        self.last_activity.read().await.elapsed() >= limit
    }

    /// Stamps the activity timestamp.
    pub async fn touch(&self) {
        *self.last_activity.write().await = Instant::now();
    }

    /// Records the negotiation state for a peer, overwriting any previous
    /// entry. Transition legality is enforced by the signaling handlers,
    /// not here.
    pub async fn set_call_state(&self, peer_id: impl Into<String>, state: CallState) {
        self.call_states.write().await.insert(peer_id.into(), state);
    }

    /// The negotiation state for a peer, if any.
    pub async fn call_state(&self, peer_id: &str) -> Option<CallState> {
        self.call_states.read().await.get(peer_id).copied()
    }

    /// Drops the call-state entry for a peer.
    pub async fn remove_call_state(&self, peer_id: &str) {
        self.call_states.write().await.remove(peer_id);
    }

    /// Drops every peer entry whose state is not [`CallState::Connected`].
    ///
    /// Used after a failed negotiation to garbage-collect abandoned
    /// attempts.
    pub async fn purge_unconnected_calls(&self) {
        self.call_states
            .write()
            .await
            .retain(|_, state| *state == CallState::Connected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client(capacity: usize) -> Client {
        Client::new("alice", "client-a", "token-a", capacity)
    }

    #[tokio::test]
    async fn send_then_receive_round_trip() {
        let client = test_client(8);
        let response = Response::ok("client-a", "bob", "hi");

        client.send(response.clone()).await.expect("send should succeed");
        let received = client
            .receive(Duration::from_millis(100))
            .await
            .expect("receive should return the queued response");
        assert_eq!(received, response);
    }

    #[tokio::test]
    async fn receive_times_out_on_empty_mailbox() {
        let client = test_client(8);
        let result = client.receive(Duration::from_millis(20)).await;
        assert!(matches!(result, Err(ChatError::TimeoutReached)));
    }

    #[tokio::test]
    async fn full_mailbox_rejects_without_blocking() {
        let client = test_client(2);
        client.send(Response::ok("client-a", "x", "1")).await.unwrap();
        client.send(Response::ok("client-a", "x", "2")).await.unwrap();

        let overflow = client.send(Response::ok("client-a", "x", "3")).await;
        assert!(matches!(overflow, Err(ChatError::TimeoutReached)));
    }

    #[tokio::test]
    async fn close_is_observed_by_both_paths() {
        let client = test_client(8);
        client.send(Response::ok("client-a", "x", "buffered")).await.unwrap();
        client.close().await;
        client.close().await; // second close is a no-op

        // Buffered data is still drained before the close is observed.
        let buffered = client.receive(Duration::from_millis(100)).await.unwrap();
        assert_eq!(buffered.content, "buffered");

        let closed = client.receive(Duration::from_millis(100)).await;
        assert!(matches!(closed, Err(ChatError::ChannelClosed)));

        let send = client.send(Response::ok("client-a", "x", "late")).await;
        assert!(matches!(send, Err(ChatError::ChannelClosed)));
    }

    #[tokio::test]
    async fn call_state_overwrite_and_purge() {
        let client = test_client(8);

        client.set_call_state("peer-1", CallState::OfferSent).await;
        // Re-negotiation overwrites rather than rejecting.
        client.set_call_state("peer-1", CallState::Stable).await;
        assert_eq!(client.call_state("peer-1").await, Some(CallState::Stable));

        client.set_call_state("peer-2", CallState::Connected).await;
        client.purge_unconnected_calls().await;
        assert_eq!(client.call_state("peer-1").await, None);
        assert_eq!(client.call_state("peer-2").await, Some(CallState::Connected));
    }

    #[tokio::test]
    async fn activity_accounting_marks_liveness() {
        let client = test_client(8);
        assert!(client.is_idle(Duration::from_millis(0)).await);

        let _ = client.receive(Duration::from_millis(10)).await;
        assert!(!client.is_idle(Duration::from_secs(60)).await);
    }
}
