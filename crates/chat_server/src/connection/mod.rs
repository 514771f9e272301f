//! Client lifecycle and mailbox management.
//!
//! This module handles the per-client state of the chat service: the
//! bounded response mailbox drained by long-poll receives, activity
//! accounting used by the idle reaper, and the per-peer call-state map
//! driven by the signaling registry.

pub mod client;

pub use client::{CallState, Client};
