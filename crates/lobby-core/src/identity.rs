//! Visitor identity: stable ids and their persistence seam.

use crate::error::Result;
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Url-safe alphabet for generated identifiers (64 symbols).
const ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789_-";

/// Length of generated identifiers.
const ID_LENGTH: usize = 21;

/// Generates a random url-safe identifier.
///
/// 21 characters over a 64-symbol alphabet is globally-unique-enough for
/// visitor and session handles; these ids are opaque, not secrets.
pub fn generate_id() -> String {
    let mut rng = rand::thread_rng();
    (0..ID_LENGTH)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect()
}

/// Stable identity for one visitor in one browsing session.
///
/// `visitor_id` is created once per profile and survives across sessions;
/// `session_id` is created once per browsing session and only changes when
/// the host clears storage (see [`IdentityStore::reset_session`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitorIdentity {
    pub visitor_id: String,
    pub session_id: String,
}

impl VisitorIdentity {
    pub fn new(visitor_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            visitor_id: visitor_id.into(),
            session_id: session_id.into(),
        }
    }

    /// Messaging-channel name for this session. Derived once and stable for
    /// the session's lifetime.
    pub fn chat_room_id(&self) -> String {
        format!("chat-{}-{}", self.visitor_id, self.session_id)
    }

    /// Client identifier this visitor presents on the messaging channel.
    pub fn chat_client_id(&self) -> String {
        format!("visitor-{}", self.visitor_id)
    }
}

/// An abstract store for visitor identity persistence.
///
/// Decouples identity handling from the storage mechanism (TOML file,
/// in-memory for tests). Implementations must be fail-closed: never hand
/// out an id that was not durably persisted first, since a lost identity
/// would create duplicate backend sessions. There is no degraded
/// "stateless" mode.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Returns the stored visitor id, generating and persisting one first
    /// if absent.
    async fn get_or_create_visitor_id(&self) -> Result<String>;

    /// Returns the stored session id, generating and persisting one first
    /// if absent.
    async fn get_or_create_session_id(&self) -> Result<String>;

    /// Clears the stored session id so the next load starts a fresh
    /// session. The visitor id is kept.
    async fn reset_session(&self) -> Result<()>;

    /// Loads (or creates) the full identity in one call.
    async fn get_or_create(&self) -> Result<VisitorIdentity> {
        Ok(VisitorIdentity {
            visitor_id: self.get_or_create_visitor_id().await?,
            session_id: self.get_or_create_session_id().await?,
        })
    }
}
