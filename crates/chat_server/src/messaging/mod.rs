//! Message and response types for client-server communication.
//!
//! This module provides the wire shapes exchanged with the external
//! transport layer: the inbound [`Message`] routed through a command
//! registry and the outbound [`Response`] delivered to client mailboxes.

pub mod types;

pub use types::{Message, Response, SIGNAL_ECHO};
