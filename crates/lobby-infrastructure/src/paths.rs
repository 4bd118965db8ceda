//! Path resolution for client-local Lobby state.
//!
//! Everything the widget persists lives under one config directory:
//!
//! ```text
//! ~/.config/lobby/
//! └── identity.toml        # visitor and session identifiers
//! ```

use std::path::PathBuf;

use lobby_core::{LobbyError, Result};

/// Unified path management for Lobby's client-local files.
pub struct LobbyPaths;

impl LobbyPaths {
    /// Returns the Lobby configuration directory (`~/.config/lobby`).
    ///
    /// # Errors
    ///
    /// Returns a `Storage` error if the home directory cannot be
    /// determined; identity must never be stored in a location that could
    /// silently change between runs.
    pub fn config_dir() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| LobbyError::storage("cannot determine home directory"))?;
        Ok(home.join(".config").join("lobby"))
    }

    /// Returns the identity file path inside the config directory.
    pub fn identity_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("identity.toml"))
    }
}
