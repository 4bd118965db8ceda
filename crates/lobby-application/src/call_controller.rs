//! Call session controller.
//!
//! There is no stored state machine. The controller re-derives
//! [`CallState`] from the visit snapshot plus page-local intent on every
//! change and then makes the platform room match: level-triggered
//! synchronization instead of a transition table, because the
//! authoritative fields arrive over the network and can move without any
//! local action.
//!
//! The controller owns this widget instance's one room handle for its
//! whole lifetime. Nothing else may join, leave, or touch tracks on it.

use std::sync::Arc;
use tokio::sync::{Mutex, broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use lobby_core::Result;
use lobby_core::call::{
    CallIntent, CallPlatform, CallRoom, CallRoomEvent, CallState, JoinOptions, MediaPermissions,
    TrackKind, derive_call_state,
};
use lobby_core::visit::{VisitApi, VisitPatch, VisitSession};

use crate::visit_coordinator::VisitCoordinator;

/// What the call surface renders.
///
/// The media flags follow confirmed track events, never toggle intent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallView {
    pub state: CallState,
    pub mic_enabled: bool,
    pub video_enabled: bool,
    /// Display name of the remote agent, once one is present in the room.
    pub agent_name: Option<String>,
}

pub struct CallController {
    coordinator: Arc<VisitCoordinator>,
    api: Arc<dyn VisitApi>,
    permissions: Arc<dyn MediaPermissions>,
    room: Arc<dyn CallRoom>,
    intent: Mutex<CallIntent>,
    /// Last derived state. The guard also serializes whole sync passes, so
    /// a user action re-deriving state never interleaves with the loop.
    last_state: Mutex<CallState>,
    view: watch::Sender<CallView>,
    cancel: CancellationToken,
}

impl CallController {
    /// Creates the controller and claims a fresh room handle from the
    /// platform. Call [`start`](Self::start) afterwards to begin syncing.
    pub async fn new(
        coordinator: Arc<VisitCoordinator>,
        api: Arc<dyn VisitApi>,
        platform: &dyn CallPlatform,
        permissions: Arc<dyn MediaPermissions>,
    ) -> Result<Arc<Self>> {
        let room = platform.create_room().await?;
        let (view, _) = watch::channel(CallView::default());
        Ok(Arc::new(Self {
            coordinator,
            api,
            permissions,
            room,
            intent: Mutex::new(CallIntent::default()),
            last_state: Mutex::new(CallState::Idle),
            view,
            cancel: CancellationToken::new(),
        }))
    }

    /// Spawns the sync loop: one task consuming visit changes and room
    /// events until shutdown.
    pub fn start(self: &Arc<Self>) {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let mut sessions = controller.coordinator.subscribe();
            // Subscribe before the first sync so a join triggered by the
            // initial snapshot is observed.
            let mut events = controller.room.subscribe();

            let initial = sessions.borrow_and_update().clone();
            controller.sync(&initial).await;

            loop {
                tokio::select! {
                    _ = controller.cancel.cancelled() => break,
                    changed = sessions.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let session = sessions.borrow_and_update().clone();
                        controller.sync(&session).await;
                    }
                    event = events.recv() => match event {
                        Ok(event) => controller.on_room_event(event),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "call room events lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });
    }

    /// Watch handle over the rendered call view.
    pub fn view(&self) -> watch::Receiver<CallView> {
        self.view.subscribe()
    }

    pub fn current_view(&self) -> CallView {
        self.view.borrow().clone()
    }

    // ------------------------------------------------------------------
    // User operations
    // ------------------------------------------------------------------

    /// "Start call": optimistic consent. The backend provisions the room,
    /// which arrives later over the stream.
    pub fn start_call(&self) {
        self.coordinator
            .update_fields(VisitPatch::new().with_joined(true));
    }

    /// Reverts a pending call attempt locally, without waiting for the
    /// backend. An in-flight provisioning is not cancelled; if a room
    /// lands afterwards it is judged against the fields current at that
    /// moment, which no longer carry consent.
    pub fn cancel_call(&self) {
        self.coordinator
            .update_fields(VisitPatch::new().with_joined(false));
    }

    /// Accepts a ringing invite.
    pub async fn accept_invite(&self) {
        self.intent.lock().await.clear_decline();
        self.coordinator
            .update_fields(VisitPatch::new().with_joined(true));
    }

    /// Dismisses a ringing invite. Local only: nothing is sent to the
    /// backend, and the suppression is keyed to this room so a newly
    /// provisioned room rings again.
    pub async fn decline_invite(&self) {
        let Some(room_id) = self.coordinator.snapshot().call_room_id else {
            return;
        };
        debug!(room_id = %room_id, "invite declined locally");
        self.intent.lock().await.decline(room_id);
        // Intent is not part of the visit snapshot, so re-derive by hand.
        let session = self.coordinator.snapshot();
        self.sync(&session).await;
    }

    /// Leaves the call for good: clears the room assignment and consent
    /// in one patch. The sync loop releases the platform room when the
    /// cleared fields come back around.
    pub fn hang_up(&self) {
        self.coordinator
            .update_fields(VisitPatch::new().with_call_room(None).with_joined(false));
    }

    /// Requests the opposite of the current microphone state.
    ///
    /// Every toggle pre-flights a permission probe; denial aborts with no
    /// flag touched. The view flag itself only flips when the platform
    /// confirms with a track event. Unmuting from a ringing or waiting
    /// state doubles as consent to the call.
    pub async fn toggle_mic(&self) -> Result<()> {
        self.permissions.probe(TrackKind::Audio).await?;
        let enable = !self.view.borrow().mic_enabled;
        self.room.set_local_audio(enable).await?;
        if enable && !self.coordinator.snapshot().joined {
            self.coordinator
                .update_fields(VisitPatch::new().with_joined(true));
        }
        Ok(())
    }

    /// Requests the opposite of the current camera state, with the same
    /// permission and confirmation rules as [`toggle_mic`](Self::toggle_mic).
    pub async fn toggle_video(&self) -> Result<()> {
        self.permissions.probe(TrackKind::Video).await?;
        let enable = !self.view.borrow().video_enabled;
        self.room.set_local_video(enable).await?;
        Ok(())
    }

    /// Stops the sync loop and releases the platform room.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Err(e) = self.room.leave().await {
            warn!(error = %e, "call room leave failed during shutdown");
        }
    }

    // ------------------------------------------------------------------
    // Synchronization
    // ------------------------------------------------------------------

    /// Makes the platform room and the published view match one snapshot.
    async fn sync(&self, session: &VisitSession) {
        let mut last = self.last_state.lock().await;
        let intent = self.intent.lock().await.clone();
        let state = derive_call_state(session, &intent);

        if state == CallState::Ended {
            if *last != CallState::Ended {
                self.teardown().await;
            }
            *last = CallState::Ended;
            self.view.send_if_modified(|view| {
                let cleared = CallView {
                    state: CallState::Ended,
                    ..CallView::default()
                };
                if *view == cleared {
                    false
                } else {
                    *view = cleared;
                    true
                }
            });
            return;
        }

        if state.wants_room() {
            if let Some(room_id) = session.call_room_id.as_deref() {
                if !self.room.is_joined().await {
                    let token = match self.api.call_token(self.coordinator.identity(), room_id).await
                    {
                        Ok(token) => Some(token),
                        Err(e) => {
                            warn!(error = %e, "call token fetch failed, joining without one");
                            None
                        }
                    };
                    debug!(room_id, "joining call room");
                    if let Err(e) = self.room.join(JoinOptions::muted(room_id, token)).await {
                        warn!(error = %e, room_id, "call room join failed");
                    }
                }
                // Remote audio stays muted until the visitor consents.
                if let Err(e) = self
                    .room
                    .set_remote_playback(state == CallState::Joined)
                    .await
                {
                    warn!(error = %e, "remote playback toggle failed");
                }
            }
        } else if self.room.is_joined().await {
            debug!("leaving call room");
            if let Err(e) = self.room.leave().await {
                warn!(error = %e, "call room leave failed");
            }
        }

        if state == CallState::Joined && *last != CallState::Joined {
            self.enable_audio_on_join().await;
        }

        *last = state;
        self.view.send_if_modified(|view| {
            if view.state == state {
                false
            } else {
                view.state = state;
                true
            }
        });
    }

    /// Entering the call turns the microphone on, permission willing.
    async fn enable_audio_on_join(&self) {
        if let Err(e) = self.permissions.probe(TrackKind::Audio).await {
            warn!(error = %e, "microphone permission missing, staying muted");
            return;
        }
        if let Err(e) = self.room.set_local_audio(true).await {
            warn!(error = %e, "enabling microphone failed");
        }
    }

    /// Terminal teardown, in order: audio off, video off, leave. Every
    /// step is attempted even if an earlier one failed.
    async fn teardown(&self) {
        debug!("session ended, releasing call media");
        if let Err(e) = self.room.set_local_audio(false).await {
            warn!(error = %e, "audio release failed");
        }
        if let Err(e) = self.room.set_local_video(false).await {
            warn!(error = %e, "video release failed");
        }
        if let Err(e) = self.room.leave().await {
            warn!(error = %e, "call room leave failed");
        }
    }

    /// Folds a platform event into the view. Track events are the sole
    /// authority over the media flags.
    fn on_room_event(&self, event: CallRoomEvent) {
        match event {
            CallRoomEvent::TrackStarted {
                local: true, kind, ..
            } => self.set_track_flag(kind, true),
            CallRoomEvent::TrackStopped {
                local: true, kind, ..
            } => self.set_track_flag(kind, false),
            CallRoomEvent::ParticipantJoined {
                local: true,
                audio_on,
                video_on,
                ..
            } => {
                // Re-seed from actual track presence, covering a rejoin
                // into a room where media was already live.
                self.view.send_if_modified(|view| {
                    if view.mic_enabled == audio_on && view.video_enabled == video_on {
                        false
                    } else {
                        view.mic_enabled = audio_on;
                        view.video_enabled = video_on;
                        true
                    }
                });
            }
            CallRoomEvent::ParticipantJoined {
                local: false,
                display_name,
                ..
            } => {
                if let Some(name) = display_name {
                    debug!(agent = %name, "remote agent present in room");
                    self.view.send_if_modified(|view| {
                        if view.agent_name.as_deref() == Some(name.as_str()) {
                            false
                        } else {
                            view.agent_name = Some(name.clone());
                            true
                        }
                    });
                }
            }
            CallRoomEvent::ParticipantLeft { local: false, .. } => {
                self.view.send_if_modified(|view| {
                    if view.agent_name.is_none() {
                        false
                    } else {
                        view.agent_name = None;
                        true
                    }
                });
            }
            _ => {}
        }
    }

    fn set_track_flag(&self, kind: TrackKind, enabled: bool) {
        self.view.send_if_modified(|view| {
            let flag = match kind {
                TrackKind::Audio => &mut view.mic_enabled,
                TrackKind::Video => &mut view.video_enabled,
            };
            if *flag == enabled {
                false
            } else {
                *flag = enabled;
                true
            }
        });
    }
}
