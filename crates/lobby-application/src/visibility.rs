//! Tab lifecycle and visibility handling.
//!
//! Translates host page signals into visit field updates. The rules are
//! asymmetric on purpose: a live call pins the visit regardless of tab
//! state, and a pending join is never marked away, but unloading the page
//! always ends the session.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use lobby_core::visit::VisitPatch;

use crate::visit_coordinator::VisitCoordinator;

pub struct VisibilityWatcher {
    coordinator: Arc<VisitCoordinator>,
}

impl VisibilityWatcher {
    pub fn new(coordinator: Arc<VisitCoordinator>) -> Self {
        Self { coordinator }
    }

    /// Host signal: the tab was hidden or revealed.
    ///
    /// While a call room exists the visit stays untouched in both
    /// directions, so backgrounding the tab mid-call never flaps the
    /// presence the agent sees.
    pub fn on_visibility_changed(&self, hidden: bool) {
        let session = self.coordinator.snapshot();
        if session.is_ended() {
            return;
        }
        if session.call_room_id.is_some() {
            debug!(hidden, "visibility change ignored during call");
            return;
        }
        if hidden {
            if session.joined {
                return;
            }
            if session.active {
                self.coordinator
                    .update_fields(VisitPatch::new().with_active(false));
            }
        } else if !session.active && !session.joined {
            self.coordinator
                .update_fields(VisitPatch::new().with_active(true));
        }
    }

    /// Host signal: the page is going away. Ends the session through the
    /// final delivery path, no matter what state the visit is in.
    pub async fn on_page_hide(&self) {
        self.coordinator.end_now().await;
    }

    /// Visitor-initiated end. One terminal patch through the regular
    /// update path; repeat calls are no-ops once the session is ended.
    pub fn end_session(&self) {
        if self.coordinator.snapshot().is_ended() {
            return;
        }
        self.coordinator.update_fields(
            VisitPatch::new()
                .with_ended_at(Utc::now())
                .with_active(false),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingApi, settle};
    use lobby_core::identity::VisitorIdentity;
    use lobby_core::visit::VisitSession;

    fn watcher_with(session: VisitSession) -> (VisibilityWatcher, Arc<RecordingApi>) {
        let api = Arc::new(RecordingApi::default());
        let coordinator = Arc::new(VisitCoordinator::new(
            VisitorIdentity::new("v1", "s1"),
            "co-1",
            api.clone(),
            session,
        ));
        (VisibilityWatcher::new(coordinator), api)
    }

    fn active_session() -> VisitSession {
        VisitSession {
            active: true,
            ..VisitSession::default()
        }
    }

    #[tokio::test]
    async fn hiding_marks_the_visit_away_and_revealing_restores_it() {
        let (watcher, api) = watcher_with(active_session());

        watcher.on_visibility_changed(true);
        assert!(!watcher.coordinator.snapshot().active);

        watcher.on_visibility_changed(false);
        assert!(watcher.coordinator.snapshot().active);

        settle().await;
        let updates = api.updates.lock().unwrap();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].active, Some(false));
        assert_eq!(updates[1].active, Some(true));
    }

    #[tokio::test]
    async fn a_live_call_pins_the_visit_in_both_directions() {
        let (watcher, api) = watcher_with(VisitSession {
            active: true,
            call_room_id: Some("r1".to_string()),
            ..VisitSession::default()
        });

        watcher.on_visibility_changed(true);
        watcher.on_visibility_changed(false);
        settle().await;

        assert!(watcher.coordinator.snapshot().active);
        assert!(api.updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn a_pending_join_is_never_marked_away() {
        let (watcher, api) = watcher_with(VisitSession {
            active: true,
            joined: true,
            ..VisitSession::default()
        });

        watcher.on_visibility_changed(true);
        settle().await;

        assert!(watcher.coordinator.snapshot().active);
        assert!(api.updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn hiding_an_already_away_visit_sends_nothing() {
        let (watcher, api) = watcher_with(VisitSession::default());

        watcher.on_visibility_changed(true);
        settle().await;

        assert!(api.updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn page_hide_ends_even_during_a_call() {
        let (watcher, api) = watcher_with(VisitSession {
            active: true,
            joined: true,
            call_room_id: Some("r1".to_string()),
            ..VisitSession::default()
        });

        watcher.on_page_hide().await;

        assert!(watcher.coordinator.snapshot().is_ended());
        let finals = api.finals.lock().unwrap();
        assert_eq!(finals.len(), 1);
        assert!(finals[0].session_ended_at.is_some());
    }

    #[tokio::test]
    async fn end_session_posts_one_terminal_patch() {
        let (watcher, api) = watcher_with(active_session());

        watcher.end_session();
        assert!(watcher.coordinator.snapshot().is_ended());
        watcher.end_session();

        settle().await;
        let updates = api.updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        assert!(updates[0].session_ended_at.is_some());
        assert_eq!(updates[0].active, Some(false));
    }
}
