//! In-process chat and call platforms.
//!
//! Broadcast-backed stand-ins for the hosted real-time services, used by
//! the development runner and integration tests. They honor the same
//! seams as the real adapters, including track-event confirmation
//! semantics on the call side.

pub mod call;
pub mod chat;
pub mod permissions;

pub use call::{LocalCallPlatform, LocalCallRoom};
pub use chat::LocalChatPlatform;
pub use permissions::StaticPermissions;
