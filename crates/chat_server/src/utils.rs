//! Utility functions and helper methods for the chat server.
//!
//! This module provides token generation, timestamp helpers, and factory
//! functions for creating service instances with different configurations.

use crate::config::ServiceConfig;
use crate::service::ChatService;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::RngCore;
use std::sync::Arc;

/// Number of random bytes in a client id.
const CLIENT_ID_BYTES: usize = 32;

/// Number of random bytes in an auth token.
const AUTH_TOKEN_BYTES: usize = 64;

/// Generates `num_bytes` cryptographically random bytes, base64url-encoded
/// without padding.
pub fn generate_token(num_bytes: usize) -> String {
    let mut bytes = vec![0u8; num_bytes];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(&bytes)
}

/// Generates a session-stable client id (32 random bytes).
pub fn generate_client_id() -> String {
    generate_token(CLIENT_ID_BYTES)
}

/// Generates a bearer auth token (64 random bytes).
pub fn generate_auth_token() -> String {
    generate_token(AUTH_TOKEN_BYTES)
}

/// Current Unix timestamp in seconds.
pub fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Creates a new chat service with default configuration.
///
/// Convenience function for quickly setting up a service with sensible
/// defaults for development and testing.
pub fn create_service() -> Arc<ChatService> {
    Arc::new(ChatService::new(ServiceConfig::default()))
}

/// Creates a new chat service with custom configuration.
pub fn create_service_with_config(config: ServiceConfig) -> Arc<ChatService> {
    Arc::new(ChatService::new(config))
}
