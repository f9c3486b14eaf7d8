//! Terminal client for a turn-based, AI-narrated adventure game.
//!
//! The backend runs each turn as an asynchronous job. This crate submits a
//! turn, polls the job until it settles, then fetches the full conversation
//! log. The three fields needed to resume a session (thread, run handle,
//! run status) are persisted between launches.

pub mod api;
pub mod cli;
pub mod config;
pub mod controller;
pub mod error;
pub mod poller;
pub mod render;
pub mod session;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use controller::{ControllerHandle, SessionEvent, TurnController};
pub use error::{ApiError, ConfigError, SessionError, StoreError};
pub use session::TurnEnd;
