//! Core domain for the Lobby visitor-engagement client.
//!
//! This crate holds the authoritative state model and the seams to every
//! external collaborator: the backend visit API, durable identity storage,
//! and the two hosted real-time platforms (messaging and calls). No IO
//! happens here; implementations live in `lobby-infrastructure` and
//! `lobby-interaction`, and the controllers gluing them together live in
//! `lobby-application`.

pub mod call;
pub mod chat;
pub mod config;
pub mod error;
pub mod identity;
pub mod visit;

// Re-export common error type
pub use error::{LobbyError, Result};
