//! Durable client-local storage for the Lobby widget.

pub mod identity_store;
pub mod paths;

pub use crate::identity_store::TomlIdentityStore;
pub use crate::paths::LobbyPaths;
