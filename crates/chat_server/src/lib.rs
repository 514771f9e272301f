//! # Chat Server - Long-Poll Messaging and Call Signaling Core
//!
//! A transport-agnostic chat service built around per-client bounded
//! mailboxes. Clients register a name, receive a session id and bearer
//! token, and then alternate between long-poll receives and slash-command
//! dispatches. All feature behavior lives behind pluggable command
//! handlers; the core only provides registries, mailboxes, and routing.
//!
//! ## Design Philosophy
//!
//! The service core contains **no command logic** - it only provides
//! infrastructure:
//!
//! * **Client registry** - Registration, session ids, auth tokens, and
//!   idle reaping
//! * **Bounded mailboxes** - Non-blocking enqueue with drop-and-report
//!   backpressure, so one stuck reader never stalls a sender
//! * **Group registry** - Named rooms with a pairwise connection ledger
//! * **Plugin dispatch** - Slash commands routed through a scope-checked
//!   handler registry
//! * **Call signaling** - A per-pair negotiation state machine for
//!   relaying session descriptions and transport candidates
//!
//! ## Message Flow
//!
//! 1. A client submits a message with `{name, content, plugin, clientId,
//!    groupId}` fields
//! 2. The dispatch layer routes it by the `plugin` field to a command or
//!    signaling handler
//! 3. The handler validates scope and state, then enqueues responses into
//!    the relevant mailboxes
//! 4. Each client drains its own mailbox through long-poll
//!    [`Client::receive`] calls
//!
//! ## Error Handling
//!
//! Failures are categorized by [`ChatError`] and surfaced to clients as
//! responses with a non-empty `errorString` rather than dropped
//! connections, so a single bad command never tears down a session.
//!
//! ## Thread Safety
//!
//! Registries use `Arc<RwLock<HashMap>>` and handler tables use
//! `DashMap`; per-client state is guarded by per-client locks acquired
//! after any registry lock.

// Re-export core types and functions for easy access
pub use config::ServiceConfig;
pub use connection::{CallState, Client};
pub use error::ChatError;
pub use groups::{ConnectionState, Group};
pub use messaging::{Message, Response, SIGNAL_ECHO};
pub use plugin::{PluginHandler, PluginRegistry, Scope};
pub use service::ChatService;
pub use signaling::SignalingRegistry;
pub use utils::{create_service, create_service_with_config};

// Public module declarations
pub mod config;
pub mod connection;
pub mod error;
pub mod groups;
pub mod messaging;
pub mod plugin;
pub mod service;
pub mod signaling;
pub mod utils;

mod tests;
