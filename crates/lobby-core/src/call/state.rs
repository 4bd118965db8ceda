//! Derived call lifecycle state.
//!
//! There is no stored state enum. The call state is recomputed from the
//! current visit fields plus page-local intent every time either changes,
//! because the authoritative fields come from the network and can move
//! without any local action.

use serde::{Deserialize, Serialize};

use crate::visit::VisitSession;

/// The call lifecycle as presented to the surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    /// No call affordance beyond the "start call" button.
    #[default]
    Idle,
    /// The visitor asked for a call and the backend has not provisioned a
    /// room yet.
    Connecting,
    /// A room exists but the visitor has not consented. Remote playback
    /// stays muted here.
    Invited,
    /// Active participant: room exists and the visitor consented.
    Joined,
    /// Terminal. Overrides everything else, irreversibly.
    Ended,
}

impl CallState {
    /// True when the controller should hold a live room connection.
    pub fn wants_room(self) -> bool {
        matches!(self, Self::Invited | Self::Joined)
    }
}

/// Page-lifetime local intent. Never persisted, never sent to the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallIntent {
    /// Room id the visitor dismissed the invite for. Suppression is keyed
    /// to the room: a newly provisioned room invites again.
    pub declined_room: Option<String>,
}

impl CallIntent {
    pub fn decline(&mut self, room_id: impl Into<String>) {
        self.declined_room = Some(room_id.into());
    }

    pub fn clear_decline(&mut self) {
        self.declined_room = None;
    }

    pub fn has_declined(&self, room_id: &str) -> bool {
        self.declined_room.as_deref() == Some(room_id)
    }
}

/// Computes the call state from the current fields.
///
/// Pure: same inputs always produce the same state, with no dependence on
/// how the fields got there.
pub fn derive_call_state(session: &VisitSession, intent: &CallIntent) -> CallState {
    if session.is_ended() {
        return CallState::Ended;
    }
    match (&session.call_room_id, session.joined) {
        (Some(_), true) => CallState::Joined,
        (Some(room), false) => {
            if intent.has_declined(room) {
                CallState::Idle
            } else {
                CallState::Invited
            }
        }
        (None, true) => CallState::Connecting,
        (None, false) => CallState::Idle,
    }
}
