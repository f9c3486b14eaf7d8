//! Backend API: wire types and the HTTP client.

mod client;
pub mod types;

pub use client::{GameApi, HttpGameApi};
pub use types::{ActionRequest, ActionResponse, InitResponse, MessageLog};
