//! Call platform seam: room control plus the event bus feeding the
//! controller.
//!
//! The third-party WebRTC platform is consumed exclusively through these
//! traits. Adapters publish [`CallRoomEvent`]s on a broadcast channel so
//! controller logic can be tested by injecting synthetic events instead of
//! driving a real media stack.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::error::Result;

/// Which local/remote media track an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Audio,
    Video,
}

/// Events emitted by a call room adapter.
///
/// `track_started`/`track_stopped` are the source of truth for local media
/// flags; optimistic toggle intent must wait for them.
#[derive(Debug, Clone, PartialEq)]
pub enum CallRoomEvent {
    TrackStarted {
        participant_id: String,
        local: bool,
        kind: TrackKind,
    },
    TrackStopped {
        participant_id: String,
        local: bool,
        kind: TrackKind,
    },
    /// Carries the participant's current track state so a late subscriber
    /// (page refresh) can seed its flags from reality.
    ParticipantJoined {
        participant_id: String,
        local: bool,
        display_name: Option<String>,
        audio_on: bool,
        video_on: bool,
    },
    ParticipantLeft {
        participant_id: String,
        local: bool,
    },
}

/// Parameters for joining a call room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOptions {
    pub room_id: String,
    pub token: Option<String>,
    /// Join muted; tracks are enabled explicitly afterwards.
    pub start_audio_off: bool,
    pub start_video_off: bool,
}

impl JoinOptions {
    /// The widget always enters rooms with media off and enables tracks
    /// only after consent.
    pub fn muted(room_id: impl Into<String>, token: Option<String>) -> Self {
        Self {
            room_id: room_id.into(),
            token,
            start_audio_off: true,
            start_video_off: true,
        }
    }
}

/// One live connection surface to a call room.
///
/// Only the call session controller may call the mutating methods; other
/// components read track state through the event stream.
#[async_trait]
pub trait CallRoom: Send + Sync {
    async fn join(&self, options: JoinOptions) -> Result<()>;

    async fn leave(&self) -> Result<()>;

    /// Requests local microphone enablement. Confirmation arrives as a
    /// track event, not as this call's return.
    async fn set_local_audio(&self, enabled: bool) -> Result<()>;

    /// Requests local camera enablement. Confirmation arrives as a track
    /// event.
    async fn set_local_video(&self, enabled: bool) -> Result<()>;

    /// Mutes or unmutes playback of remote tracks. Stays muted while the
    /// visitor is invited but has not consented.
    async fn set_remote_playback(&self, enabled: bool) -> Result<()>;

    async fn is_joined(&self) -> bool;

    fn subscribe(&self) -> broadcast::Receiver<CallRoomEvent>;
}

/// Factory for room handles.
///
/// Called once per widget instance; the returned handle is owned by that
/// instance's controller for its whole lifetime and reused across joins.
/// Independent widget instances must receive independent handles.
#[async_trait]
pub trait CallPlatform: Send + Sync {
    async fn create_room(&self) -> Result<Arc<dyn CallRoom>>;
}

/// Device permission probe, checked before any track is turned on.
///
/// A denial must leave all track state untouched and produce no track
/// event.
#[async_trait]
pub trait MediaPermissions: Send + Sync {
    /// Resolves when the visitor has granted access for `kind`, errors
    /// with [`LobbyError::PermissionDenied`](crate::LobbyError) otherwise.
    async fn probe(&self, kind: TrackKind) -> Result<()>;
}
