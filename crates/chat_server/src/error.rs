//! Error types and handling for the chat server.
//!
//! This module defines the error taxonomy shared by the client registry,
//! the command dispatch layer, and the signaling state machine. Scope and
//! validation failures are converted into delivered [`Response`] values at
//! the dispatch boundary rather than propagated to other clients.
//!
//! [`Response`]: crate::messaging::Response

/// Enumeration of possible chat service errors.
///
/// Categorizes failures into lookup misses, registration-scope violations,
/// signaling precondition failures, and mailbox delivery problems.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// The referenced client id is not present in the registry
    #[error("client not found: {0}")]
    ClientNotFound(String),

    /// The referenced group id is not present in the registry
    #[error("group not found: {0}")]
    GroupNotFound(String),

    /// A client with this id is already registered
    #[error("client already registered: {0}")]
    AlreadyRegistered(String),

    /// The command requires a registered client
    #[error("client is not registered")]
    NotRegistered,

    /// The client is already a member of the group
    #[error("already a member of group: {0}")]
    AlreadyMember(String),

    /// The client is not a member of the group
    #[error("not a member of group: {0}")]
    NotMember(String),

    /// A signaling message arrived in an incompatible negotiation state
    #[error("wrong call state: {0}")]
    WrongCallState(String),

    /// The client's mailbox has been closed; the caller must re-register
    #[error("channel closed")]
    ChannelClosed,

    /// The long-poll deadline elapsed, or the target mailbox is full
    #[error("timeout reached")]
    TimeoutReached,

    /// The registry is at its configured maximum number of clients
    #[error("server capacity exceeded")]
    CapacityExceeded,

    /// A command argument failed validation
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// No handler is registered for the command identifier
    #[error("no such command: {0}")]
    NoSuchCommand(String),
}
