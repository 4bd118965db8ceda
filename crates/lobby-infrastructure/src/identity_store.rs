//! TOML-file-backed identity store.
//!
//! Persists the visitor and session ids in a single `identity.toml`,
//! written atomically (tmp file + fsync + rename) under an advisory file
//! lock so concurrent widget instances on one profile agree on identity.
//!
//! Fail-closed by contract: any storage problem is reported as an error
//! and the caller must not mount. Handing out an unpersisted id would
//! create duplicate backend sessions on the next load.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write as IoWrite;
use std::path::{Path, PathBuf};
use tracing::debug;

use lobby_core::identity::{IdentityStore, generate_id};
use lobby_core::{LobbyError, Result};

use crate::paths::LobbyPaths;

/// On-disk shape of `identity.toml`. Both fields start absent and are
/// filled on first use.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct StoredIdentity {
    #[serde(default)]
    visitor_id: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
}

/// Identity store backed by one TOML file.
pub struct TomlIdentityStore {
    path: PathBuf,
}

impl TomlIdentityStore {
    /// Creates a store reading and writing `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Creates a store at the default location (`~/.config/lobby/identity.toml`).
    pub fn default_location() -> Result<Self> {
        Ok(Self::new(LobbyPaths::identity_file()?))
    }

    fn load(&self) -> Result<StoredIdentity> {
        if !self.path.exists() {
            return Ok(StoredIdentity::default());
        }
        let content = fs::read_to_string(&self.path)
            .map_err(|e| LobbyError::storage(format!("read {}: {e}", self.path.display())))?;
        if content.trim().is_empty() {
            return Ok(StoredIdentity::default());
        }
        toml::from_str(&content)
            .map_err(|e| LobbyError::storage(format!("parse {}: {e}", self.path.display())))
    }

    /// Writes the identity atomically: serialize, write a sibling tmp
    /// file, fsync, rename over the target.
    fn save(&self, identity: &StoredIdentity) -> Result<()> {
        let parent = self
            .path
            .parent()
            .ok_or_else(|| LobbyError::storage("identity path has no parent directory"))?;
        if !parent.exists() {
            fs::create_dir_all(parent)
                .map_err(|e| LobbyError::storage(format!("create {}: {e}", parent.display())))?;
        }

        let serialized = toml::to_string_pretty(identity)
            .map_err(|e| LobbyError::storage(format!("serialize identity: {e}")))?;

        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| LobbyError::storage("identity path has no file name"))?;
        let tmp_path = parent.join(format!(".{}.tmp", file_name.to_string_lossy()));

        let mut tmp_file = File::create(&tmp_path)
            .map_err(|e| LobbyError::storage(format!("create {}: {e}", tmp_path.display())))?;
        tmp_file
            .write_all(serialized.as_bytes())
            .and_then(|_| tmp_file.sync_all())
            .map_err(|e| LobbyError::storage(format!("write {}: {e}", tmp_path.display())))?;
        drop(tmp_file);

        fs::rename(&tmp_path, &self.path)
            .map_err(|e| LobbyError::storage(format!("rename into {}: {e}", self.path.display())))
    }

    /// Runs `f` over the current identity under an exclusive lock and
    /// persists the result if it changed.
    fn update<F>(&self, f: F) -> Result<StoredIdentity>
    where
        F: FnOnce(&mut StoredIdentity),
    {
        let _lock = StoreLock::acquire(&self.path)?;
        let mut identity = self.load()?;
        let before = identity.clone();
        f(&mut identity);
        if identity != before {
            self.save(&identity)?;
        }
        Ok(identity)
    }
}

#[async_trait]
impl IdentityStore for TomlIdentityStore {
    async fn get_or_create_visitor_id(&self) -> Result<String> {
        let identity = self.update(|stored| {
            if stored.visitor_id.is_none() {
                let id = generate_id();
                debug!(visitor_id = %id, "created new visitor id");
                stored.visitor_id = Some(id);
            }
        })?;
        identity
            .visitor_id
            .ok_or_else(|| LobbyError::internal("visitor id missing after update"))
    }

    async fn get_or_create_session_id(&self) -> Result<String> {
        let identity = self.update(|stored| {
            if stored.session_id.is_none() {
                let id = generate_id();
                debug!(session_id = %id, "created new session id");
                stored.session_id = Some(id);
            }
        })?;
        identity
            .session_id
            .ok_or_else(|| LobbyError::internal("session id missing after update"))
    }

    async fn reset_session(&self) -> Result<()> {
        self.update(|stored| {
            stored.session_id = None;
        })?;
        debug!("cleared stored session id");
        Ok(())
    }
}

/// Advisory lock guard. Locks a sibling `.lock` file for the write and
/// removes it on drop.
struct StoreLock {
    #[allow(dead_code)]
    file: File,
    lock_path: PathBuf,
}

impl StoreLock {
    fn acquire(path: &Path) -> Result<Self> {
        let lock_path = path.with_extension("lock");
        if let Some(parent) = lock_path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    LobbyError::storage(format!("create {}: {e}", parent.display()))
                })?;
            }
        }

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| LobbyError::storage(format!("open {}: {e}", lock_path.display())))?;

        fs2::FileExt::lock_exclusive(&file)
            .map_err(|e| LobbyError::storage(format!("lock {}: {e}", lock_path.display())))?;

        Ok(Self { file, lock_path })
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        // The flock releases with the handle; the file itself is cosmetic.
        let _ = fs::remove_file(&self.lock_path);
    }
}
