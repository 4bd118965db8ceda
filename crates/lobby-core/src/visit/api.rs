//! Backend visit API seam.
//!
//! Defines the contract for the widget's HTTP backend, decoupling the
//! controllers from the transport. The production implementation lives in
//! `lobby-interaction`; tests substitute mocks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::model::{AgentIdentity, VisitSession};
use super::patch::VisitPatch;
use crate::error::Result;
use crate::identity::VisitorIdentity;

/// Result of the embed token pre-flight check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateResponse {
    pub valid: bool,
    #[serde(default)]
    pub company_id: Option<String>,
}

/// Full visit status as returned by `initialize` and `current_status`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitStatus {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub company_id: Option<String>,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub joined: bool,
    #[serde(default)]
    pub call_room_id: Option<String>,
    #[serde(default)]
    pub chat_room_id: Option<String>,
    #[serde(default)]
    pub session_ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_reused: bool,
    #[serde(default, rename = "user")]
    pub agent: Option<AgentIdentity>,
}

impl VisitStatus {
    /// Seeds a session snapshot from this status.
    ///
    /// `fallback_chat_room` covers backends that do not echo the chat room
    /// id; the id the client derived locally is used instead.
    pub fn into_session(self, fallback_chat_room: &str) -> VisitSession {
        VisitSession {
            active: self.active,
            joined: self.joined,
            call_room_id: self.call_room_id.filter(|s| !s.is_empty()),
            chat_room_id: self
                .chat_room_id
                .filter(|s| !s.is_empty())
                .or_else(|| Some(fallback_chat_room.to_string())),
            session_ended_at: self.session_ended_at,
            agent: self.agent,
            is_reused: self.is_reused,
        }
    }

    /// Re-expresses this snapshot as a patch, for merging into an already
    /// seeded session.
    ///
    /// The call room is always included, so a snapshot without one clears
    /// a stale room. The chat room, terminal timestamp, and agent are
    /// included only when present: a snapshot can never un-assign the
    /// chat room, revive an ended session, or retract a claim.
    pub fn as_patch(&self) -> VisitPatch {
        VisitPatch {
            active: Some(self.active),
            joined: Some(self.joined),
            call_room_id: Some(self.call_room_id.clone()),
            chat_room_id: self.chat_room_id.clone().map(Some),
            session_ended_at: self.session_ended_at.map(Some),
            agent: self.agent.clone(),
        }
    }
}

/// The backend HTTP surface the widget consumes.
///
/// All mutation calls are partial: fields absent from the patch are left
/// untouched server-side, matching [`VisitSession::apply`] on the client.
#[async_trait]
pub trait VisitApi: Send + Sync {
    /// Pre-flight check of the embed token against the hosting domain.
    /// Must pass before anything else loads.
    async fn validate(&self, token: &str, domain: &str) -> Result<ValidateResponse>;

    /// Idempotent upsert creating or resuming the visit. Safe to call once
    /// per session.
    async fn initialize(
        &self,
        identity: &VisitorIdentity,
        token: &str,
        chat_room_id: &str,
    ) -> Result<VisitStatus>;

    /// Partial status mutation. Fire-and-forget from the caller's point of
    /// view; the server echo on the event stream supersedes it.
    async fn update_status(
        &self,
        identity: &VisitorIdentity,
        company_id: &str,
        patch: &VisitPatch,
    ) -> Result<()>;

    /// Best-effort delivery of a final status mutation during page
    /// teardown. Implementations use the shortest reliable path available
    /// rather than the normal request pipeline.
    async fn send_final_status(
        &self,
        identity: &VisitorIdentity,
        company_id: &str,
        patch: &VisitPatch,
    ) -> Result<()>;

    /// On-demand snapshot fetch, polled before attaching heavyweight
    /// surfaces rather than continuously.
    async fn current_status(&self, identity: &VisitorIdentity) -> Result<VisitStatus>;

    /// Issues credentials for the messaging/presence platform. Re-callable
    /// for renewal.
    async fn chat_token(&self, identity: &VisitorIdentity, company_id: &str) -> Result<String>;

    /// Issues credentials for the call platform, scoped to a room.
    /// Re-callable for renewal.
    async fn call_token(&self, identity: &VisitorIdentity, room_id: &str) -> Result<String>;
}
