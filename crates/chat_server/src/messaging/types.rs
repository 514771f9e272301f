//! Wire type definitions for client-server communication.
//!
//! This module defines the inbound and outbound units of work exchanged
//! with the transport layer, providing a standardized format for command
//! dispatch and mailbox delivery.

use crate::error::ChatError;
use serde::{Deserialize, Serialize};

/// Reserved `error_text` sentinel marking an internal signaling echo.
///
/// Responses carrying this value acknowledge a signaling message to its
/// sender without being displayed; the transport filters them out.
pub const SIGNAL_ECHO: &str = "signal-echo";

/// A message sent from a client to the server.
///
/// Carries a command identifier plus payload; immutable once dispatched
/// except that handlers may rewrite `command`/`content` when un-nesting a
/// sub-command (e.g. `/group join X` becomes command `join`, content `X`).
///
/// # Example
///
/// ```json
/// {
///   "name": "alice",
///   "content": "hello everyone",
///   "plugin": "broadcast",
///   "clientId": "tqh1...",
///   "groupId": ""
/// }
/// ```
///
/// Within the signaling subsystem the field roles shift: `name` carries
/// the initiating client's id and `clientId` addresses the peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Display name of the sender (initiator id in signaling messages)
    #[serde(rename = "name")]
    pub sender_name: String,

    /// The message payload (chat text, SDP blob, ICE candidate string, ...)
    #[serde(default)]
    pub content: String,

    /// The command identifier used for handler lookup
    #[serde(rename = "plugin")]
    pub command: String,

    /// The sending client's id (addressed peer in signaling messages)
    #[serde(rename = "clientId")]
    pub sender_client_id: String,

    /// The group the message is scoped to, empty for the global room
    #[serde(rename = "groupId", default)]
    pub group_id: String,
}

/// A response delivered back to a client.
///
/// Returned synchronously from command dispatch and/or pushed into one or
/// more client mailboxes for asynchronous long-poll delivery. A non-empty
/// `error_text` signals a handler or validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Id of the client this response originates from
    #[serde(rename = "clientId")]
    pub origin_client_id: String,

    /// Name of the responder (or a signal tag such as `OfferSignal`)
    #[serde(rename = "name")]
    pub responder_name: String,

    /// The response payload
    #[serde(default)]
    pub content: String,

    /// Error description; empty on success
    #[serde(rename = "errorString", default)]
    pub error_text: String,
}

impl Response {
    /// Creates a successful response.
    pub fn ok(
        origin_client_id: impl Into<String>,
        responder_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            origin_client_id: origin_client_id.into(),
            responder_name: responder_name.into(),
            content: content.into(),
            error_text: String::new(),
        }
    }

    /// Creates an error response from a [`ChatError`], addressed back to
    /// the sender of the failed message.
    pub fn from_error(message: &Message, error: &ChatError) -> Self {
        Self {
            origin_client_id: message.sender_client_id.clone(),
            responder_name: "server".to_string(),
            content: String::new(),
            error_text: error.to_string(),
        }
    }

    /// Creates an error response addressed to a specific client id.
    ///
    /// Signaling messages carry the caller's id in the `name` field, so
    /// [`Response::from_error`] would misattribute the origin there.
    pub fn error_for(client_id: impl Into<String>, error: &ChatError) -> Self {
        Self {
            origin_client_id: client_id.into(),
            responder_name: "server".to_string(),
            content: String::new(),
            error_text: error.to_string(),
        }
    }

    /// Creates an internal signaling echo that the transport must not
    /// display.
    pub fn signal_echo(origin_client_id: impl Into<String>) -> Self {
        Self {
            origin_client_id: origin_client_id.into(),
            responder_name: "server".to_string(),
            content: String::new(),
            error_text: SIGNAL_ECHO.to_string(),
        }
    }

    /// Returns `true` if this response carries an error.
    pub fn is_error(&self) -> bool {
        !self.error_text.is_empty() && self.error_text != SIGNAL_ECHO
    }

    /// Returns `true` if this is an internal signaling echo.
    pub fn is_signal_echo(&self) -> bool {
        self.error_text == SIGNAL_ECHO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_wire_field_names() {
        let json = r#"{
            "name": "alice",
            "content": "hello",
            "plugin": "broadcast",
            "clientId": "abc123",
            "groupId": ""
        }"#;

        let message: Message = serde_json::from_str(json).expect("valid message JSON");
        assert_eq!(message.sender_name, "alice");
        assert_eq!(message.command, "broadcast");
        assert_eq!(message.sender_client_id, "abc123");
        assert!(message.group_id.is_empty());
    }

    #[test]
    fn response_wire_field_names() {
        let response = Response::ok("abc123", "alice", "hello");
        let json = serde_json::to_value(&response).expect("serializable response");

        assert_eq!(json["clientId"], "abc123");
        assert_eq!(json["name"], "alice");
        assert_eq!(json["content"], "hello");
        assert_eq!(json["errorString"], "");
    }

    #[test]
    fn signal_echo_is_not_an_error() {
        let echo = Response::signal_echo("abc123");
        assert!(echo.is_signal_echo());
        assert!(!echo.is_error());

        let message = Message {
            sender_name: "alice".to_string(),
            content: String::new(),
            command: "private".to_string(),
            sender_client_id: "abc123".to_string(),
            group_id: String::new(),
        };
        let error = Response::from_error(&message, &ChatError::ChannelClosed);
        assert!(error.is_error());
        assert!(!error.is_signal_echo());
    }
}
