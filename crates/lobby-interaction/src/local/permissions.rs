//! Configurable permission probe for tests and the dev runner.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};

use lobby_core::call::{MediaPermissions, TrackKind};
use lobby_core::{LobbyError, Result};

/// Grants or denies device access per track kind.
///
/// Answers can be flipped at runtime to script a visitor revoking camera
/// access mid-session.
pub struct StaticPermissions {
    audio: AtomicBool,
    video: AtomicBool,
}

impl StaticPermissions {
    /// Everything allowed.
    pub fn granted() -> Self {
        Self {
            audio: AtomicBool::new(true),
            video: AtomicBool::new(true),
        }
    }

    pub fn denying(audio_denied: bool, video_denied: bool) -> Self {
        Self {
            audio: AtomicBool::new(!audio_denied),
            video: AtomicBool::new(!video_denied),
        }
    }

    pub fn set_allowed(&self, kind: TrackKind, allowed: bool) {
        match kind {
            TrackKind::Audio => self.audio.store(allowed, Ordering::SeqCst),
            TrackKind::Video => self.video.store(allowed, Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl MediaPermissions for StaticPermissions {
    async fn probe(&self, kind: TrackKind) -> Result<()> {
        let allowed = match kind {
            TrackKind::Audio => self.audio.load(Ordering::SeqCst),
            TrackKind::Video => self.video.load(Ordering::SeqCst),
        };
        if allowed {
            Ok(())
        } else {
            let device = match kind {
                TrackKind::Audio => "microphone",
                TrackKind::Video => "camera",
            };
            Err(LobbyError::permission_denied(format!(
                "{device} access denied"
            )))
        }
    }
}
