//! Core types and state handling for agent-crew-bridge (acb)
//!
//! This crate provides everything the bridge binary needs that is not tied
//! to a live tmux server or HTTP listener: configuration resolution, the
//! on-disk per-worker state layout, pending-marker bookkeeping, worker name
//! validation, chat-message splitting, and the shared error taxonomy.
//!
//! The authoritative record of which workers exist is *external* (the tmux
//! session list and on-disk marker files); everything in this crate treats
//! in-memory views as caches that must tolerate being stale.

pub mod config;
pub mod error;
pub mod home;
pub mod logging;
pub mod names;
pub mod pending;
pub mod state;
pub mod text;

pub use config::BridgeConfig;
pub use error::BridgeError;
pub use pending::PendingTracker;
pub use state::NodeState;
