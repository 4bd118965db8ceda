//! Visit session domain model.
//!
//! `VisitSession` is the single authoritative in-memory snapshot of one
//! visitor's engagement. It has exactly two writers: the server-push
//! reconciler and optimistic local actions, both funneled through
//! [`VisitSession::apply`](crate::visit::patch).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of the human representative who claimed this visit.
///
/// Display-only: nothing in the state machine branches on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentIdentity {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

/// The authoritative state snapshot for one visit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitSession {
    /// Visitor is currently engaged with the page. Derived from tab
    /// visibility, subject to the suppression rules of the lifecycle
    /// watcher.
    pub active: bool,
    /// Visitor has requested or accepted being heard/seen in a call. This
    /// is the sole consent predicate.
    pub joined: bool,
    /// Set iff the backend has provisioned a call room. Presence of this
    /// field, not `joined`, is the sole predicate for "a call is
    /// happening".
    pub call_room_id: Option<String>,
    /// Messaging-channel id. Assigned once at initialization and stable
    /// for the session's lifetime.
    pub chat_room_id: Option<String>,
    /// Terminal marker. Once set it is never cleared, and the only
    /// permitted follow-up action is releasing local media.
    pub session_ended_at: Option<DateTime<Utc>>,
    /// Representative who claimed the visit, once a claim event arrives.
    pub agent: Option<AgentIdentity>,
    /// Whether this session resumed a prior unterminated visit. Seeded at
    /// initialization, never patched afterward. Affects only first-paint
    /// behavior.
    pub is_reused: bool,
}

impl Default for VisitSession {
    /// Neutral pre-initialization snapshot. The initialize response seeds
    /// the real values before anything reads the store.
    fn default() -> Self {
        Self {
            active: false,
            joined: false,
            call_room_id: None,
            chat_room_id: None,
            session_ended_at: None,
            agent: None,
            is_reused: false,
        }
    }
}

impl VisitSession {
    /// True once the session reached its terminal state.
    pub fn is_ended(&self) -> bool {
        self.session_ended_at.is_some()
    }

    /// True while a call room is provisioned for this visit.
    pub fn is_in_call(&self) -> bool {
        self.call_room_id.is_some()
    }
}
