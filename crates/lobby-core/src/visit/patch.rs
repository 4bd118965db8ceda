//! Partial updates to the visit snapshot.
//!
//! One merge shape serves both writers: optimistic local actions and
//! reconciler messages from the server-push stream. Fields absent from a
//! patch retain their current value; fields present overwrite it
//! (last-writer-wins per field). `session_ended_at` is the one exception:
//! a patch can set it but never clear it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::model::{AgentIdentity, VisitSession};

/// Distinguishes "field absent" (`None`, retain) from "field null"
/// (`Some(None)`, clear) when deserializing.
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// A partial update to [`VisitSession`].
///
/// Mirrors the wire shape of both the `visit_update` stream message and
/// the status-mutation request body: camelCase keys, every field optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub joined: Option<bool>,
    /// `Some(None)` clears the room (explicit null on the wire).
    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub call_room_id: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub chat_room_id: Option<Option<String>>,
    /// `Some(None)` is accepted on the wire but never applied; the
    /// terminal timestamp cannot be cleared.
    #[serde(
        default,
        deserialize_with = "double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub session_ended_at: Option<Option<DateTime<Utc>>>,
    /// Claim event payload. A `null` value counts as absent.
    #[serde(default, rename = "user", skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentIdentity>,
}

impl VisitPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = Some(active);
        self
    }

    pub fn with_joined(mut self, joined: bool) -> Self {
        self.joined = Some(joined);
        self
    }

    /// Sets the call room field, `None` meaning an explicit clear.
    pub fn with_call_room(mut self, room: Option<String>) -> Self {
        self.call_room_id = Some(room);
        self
    }

    pub fn with_chat_room(mut self, room: Option<String>) -> Self {
        self.chat_room_id = Some(room);
        self
    }

    pub fn with_ended_at(mut self, at: DateTime<Utc>) -> Self {
        self.session_ended_at = Some(Some(at));
        self
    }

    pub fn with_agent(mut self, agent: AgentIdentity) -> Self {
        self.agent = Some(agent);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// What a merge did, reported to the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// At least one field changed value.
    pub changed: bool,
    /// This merge set `session_ended_at` for the first time. Teardown is
    /// the caller's side effect of this flag, never a replacement for the
    /// merge itself.
    pub ended_now: bool,
}

/// Empty room ids from the wire count as absent rooms.
fn normalized(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|s| !s.is_empty()).cloned()
}

impl VisitSession {
    /// Applies a partial update, field for field.
    ///
    /// Absent fields retain their value, so re-applying the same patch is
    /// idempotent. A non-null `session_ended_at` is sticky: a later patch
    /// can never clear it, though the other fields of such a patch still
    /// apply first. `is_reused` is never patched.
    pub fn apply(&mut self, patch: &VisitPatch) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();

        if let Some(active) = patch.active {
            if self.active != active {
                self.active = active;
                outcome.changed = true;
            }
        }
        if let Some(joined) = patch.joined {
            if self.joined != joined {
                self.joined = joined;
                outcome.changed = true;
            }
        }
        if let Some(room) = &patch.call_room_id {
            let room = normalized(room);
            if self.call_room_id != room {
                self.call_room_id = room;
                outcome.changed = true;
            }
        }
        if let Some(chat) = &patch.chat_room_id {
            let chat = normalized(chat);
            if self.chat_room_id != chat {
                self.chat_room_id = chat;
                outcome.changed = true;
            }
        }
        if let Some(ended) = &patch.session_ended_at {
            match (self.session_ended_at, ended) {
                (None, Some(at)) => {
                    self.session_ended_at = Some(*at);
                    outcome.changed = true;
                    outcome.ended_now = true;
                }
                (Some(current), Some(at)) if current != *at => {
                    // Still terminal, just a corrected timestamp.
                    self.session_ended_at = Some(*at);
                    outcome.changed = true;
                }
                // A terminal session is never revived.
                _ => {}
            }
        }
        if let Some(agent) = &patch.agent {
            let agent = Some(AgentIdentity {
                name: agent.name.as_ref().filter(|s| !s.is_empty()).cloned(),
                image: agent.image.as_ref().filter(|s| !s.is_empty()).cloned(),
            });
            if self.agent != agent {
                self.agent = agent;
                outcome.changed = true;
            }
        }

        outcome
    }
}
