//! In-process call platform.
//!
//! Mimics the hosted WebRTC service closely enough for controller logic:
//! track changes are confirmed by events, never by return values, and a
//! participant entry carries its current track state for late joiners.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};

use lobby_core::call::{CallPlatform, CallRoom, CallRoomEvent, JoinOptions, TrackKind};
use lobby_core::{LobbyError, Result};

const EVENT_BUFFER_CAPACITY: usize = 64;

/// Participant id the room reports for the local side.
pub const LOCAL_PARTICIPANT: &str = "local";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalRoomSnapshot {
    pub joined_room: Option<String>,
    pub local_audio: bool,
    pub local_video: bool,
    pub remote_playback: bool,
}

/// Factory handing each widget instance its own room handle.
///
/// Keeps the handles it created so a test or dev runner can reach the
/// same instance and play the far side.
#[derive(Default)]
pub struct LocalCallPlatform {
    created: RwLock<Vec<Arc<LocalCallRoom>>>,
}

impl LocalCallPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently created room handle.
    pub async fn latest_room(&self) -> Option<Arc<LocalCallRoom>> {
        self.created.read().await.last().cloned()
    }
}

#[async_trait]
impl CallPlatform for LocalCallPlatform {
    async fn create_room(&self) -> Result<Arc<dyn CallRoom>> {
        let room = Arc::new(LocalCallRoom::new());
        self.created.write().await.push(room.clone());
        Ok(room as Arc<dyn CallRoom>)
    }
}

/// One media connection surface.
pub struct LocalCallRoom {
    events: broadcast::Sender<CallRoomEvent>,
    state: RwLock<LocalRoomSnapshot>,
}

impl Default for LocalCallRoom {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalCallRoom {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER_CAPACITY);
        Self {
            events,
            state: RwLock::new(LocalRoomSnapshot::default()),
        }
    }

    /// Current connection state, for assertions and status displays.
    pub async fn snapshot(&self) -> LocalRoomSnapshot {
        self.state.read().await.clone()
    }

    fn emit(&self, event: CallRoomEvent) {
        // No subscribers is fine; events are informational.
        let _ = self.events.send(event);
    }

    // ------------------------------------------------------------------
    // Far-side controls for tests and the dev runner
    // ------------------------------------------------------------------

    pub fn remote_join(
        &self,
        participant_id: &str,
        display_name: Option<&str>,
        audio_on: bool,
        video_on: bool,
    ) {
        self.emit(CallRoomEvent::ParticipantJoined {
            participant_id: participant_id.to_string(),
            local: false,
            display_name: display_name.map(String::from),
            audio_on,
            video_on,
        });
    }

    pub fn remote_track(&self, participant_id: &str, kind: TrackKind, started: bool) {
        let event = if started {
            CallRoomEvent::TrackStarted {
                participant_id: participant_id.to_string(),
                local: false,
                kind,
            }
        } else {
            CallRoomEvent::TrackStopped {
                participant_id: participant_id.to_string(),
                local: false,
                kind,
            }
        };
        self.emit(event);
    }

    pub fn remote_leave(&self, participant_id: &str) {
        self.emit(CallRoomEvent::ParticipantLeft {
            participant_id: participant_id.to_string(),
            local: false,
        });
    }

    fn local_track_event(kind: TrackKind, started: bool) -> CallRoomEvent {
        if started {
            CallRoomEvent::TrackStarted {
                participant_id: LOCAL_PARTICIPANT.to_string(),
                local: true,
                kind,
            }
        } else {
            CallRoomEvent::TrackStopped {
                participant_id: LOCAL_PARTICIPANT.to_string(),
                local: true,
                kind,
            }
        }
    }
}

#[async_trait]
impl CallRoom for LocalCallRoom {
    async fn join(&self, options: JoinOptions) -> Result<()> {
        let mut state = self.state.write().await;
        if state.joined_room.as_deref() == Some(options.room_id.as_str()) {
            return Ok(());
        }
        if state.joined_room.is_some() {
            // Switching rooms implies leaving the old one first.
            self.emit(CallRoomEvent::ParticipantLeft {
                participant_id: LOCAL_PARTICIPANT.to_string(),
                local: true,
            });
        }

        state.joined_room = Some(options.room_id.clone());
        state.local_audio = !options.start_audio_off;
        state.local_video = !options.start_video_off;

        self.emit(CallRoomEvent::ParticipantJoined {
            participant_id: LOCAL_PARTICIPANT.to_string(),
            local: true,
            display_name: None,
            audio_on: state.local_audio,
            video_on: state.local_video,
        });
        if state.local_audio {
            self.emit(Self::local_track_event(TrackKind::Audio, true));
        }
        if state.local_video {
            self.emit(Self::local_track_event(TrackKind::Video, true));
        }
        Ok(())
    }

    async fn leave(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if state.joined_room.is_none() {
            return Ok(());
        }
        if state.local_audio {
            self.emit(Self::local_track_event(TrackKind::Audio, false));
        }
        if state.local_video {
            self.emit(Self::local_track_event(TrackKind::Video, false));
        }
        self.emit(CallRoomEvent::ParticipantLeft {
            participant_id: LOCAL_PARTICIPANT.to_string(),
            local: true,
        });
        *state = LocalRoomSnapshot::default();
        Ok(())
    }

    async fn set_local_audio(&self, enabled: bool) -> Result<()> {
        let mut state = self.state.write().await;
        if state.joined_room.is_none() {
            if enabled {
                return Err(LobbyError::platform("cannot enable audio outside a room"));
            }
            return Ok(());
        }
        if state.local_audio != enabled {
            state.local_audio = enabled;
            self.emit(Self::local_track_event(TrackKind::Audio, enabled));
        }
        Ok(())
    }

    async fn set_local_video(&self, enabled: bool) -> Result<()> {
        let mut state = self.state.write().await;
        if state.joined_room.is_none() {
            if enabled {
                return Err(LobbyError::platform("cannot enable video outside a room"));
            }
            return Ok(());
        }
        if state.local_video != enabled {
            state.local_video = enabled;
            self.emit(Self::local_track_event(TrackKind::Video, enabled));
        }
        Ok(())
    }

    async fn set_remote_playback(&self, enabled: bool) -> Result<()> {
        self.state.write().await.remote_playback = enabled;
        Ok(())
    }

    async fn is_joined(&self) -> bool {
        self.state.read().await.joined_room.is_some()
    }

    fn subscribe(&self) -> broadcast::Receiver<CallRoomEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn muted_join_reports_no_active_tracks() {
        let room = LocalCallRoom::new();
        let mut events = room.subscribe();
        room.join(JoinOptions::muted("r1", None)).await.unwrap();

        match events.recv().await.unwrap() {
            CallRoomEvent::ParticipantJoined {
                local,
                audio_on,
                video_on,
                ..
            } => {
                assert!(local);
                assert!(!audio_on);
                assert!(!video_on);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(room.is_joined().await);
    }

    #[tokio::test]
    async fn track_changes_are_confirmed_by_events_once() {
        let room = LocalCallRoom::new();
        room.join(JoinOptions::muted("r1", None)).await.unwrap();
        let mut events = room.subscribe();

        room.set_local_audio(true).await.unwrap();
        // Re-requesting the same state is silent.
        room.set_local_audio(true).await.unwrap();
        room.set_local_audio(false).await.unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            CallRoomEvent::TrackStarted {
                participant_id: LOCAL_PARTICIPANT.to_string(),
                local: true,
                kind: TrackKind::Audio,
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            CallRoomEvent::TrackStopped {
                participant_id: LOCAL_PARTICIPANT.to_string(),
                local: true,
                kind: TrackKind::Audio,
            }
        );
    }

    #[tokio::test]
    async fn leave_stops_active_tracks_first() {
        let room = LocalCallRoom::new();
        room.join(JoinOptions::muted("r1", None)).await.unwrap();
        room.set_local_audio(true).await.unwrap();

        let mut events = room.subscribe();
        room.leave().await.unwrap();

        assert!(matches!(
            events.recv().await.unwrap(),
            CallRoomEvent::TrackStopped {
                kind: TrackKind::Audio,
                local: true,
                ..
            }
        ));
        assert!(matches!(
            events.recv().await.unwrap(),
            CallRoomEvent::ParticipantLeft { local: true, .. }
        ));
        assert_eq!(room.snapshot().await, LocalRoomSnapshot::default());
    }

    #[tokio::test]
    async fn enabling_media_outside_a_room_is_refused() {
        let room = LocalCallRoom::new();
        assert!(room.set_local_audio(true).await.is_err());
        // Disabling is a harmless no-op.
        room.set_local_video(false).await.unwrap();
    }

    #[tokio::test]
    async fn platform_hands_out_independent_rooms() {
        let platform = LocalCallPlatform::new();
        let first = platform.create_room().await.unwrap();
        let second = platform.create_room().await.unwrap();

        first.join(JoinOptions::muted("r1", None)).await.unwrap();
        assert!(!second.is_joined().await);

        let latest = platform.latest_room().await.unwrap();
        assert!(!latest.is_joined().await);
    }
}
