//! Owner of the authoritative visit snapshot.
//!
//! Exactly two writers exist: the server-push reconciler
//! ([`apply_server_patch`](VisitCoordinator::apply_server_patch)) and
//! optimistic UI intent ([`update_fields`](VisitCoordinator::update_fields)).
//! Both funnel through the same per-field merge, so a later server echo
//! supersedes an optimistic guess without any special-casing.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

use lobby_core::Result;
use lobby_core::identity::VisitorIdentity;
use lobby_core::visit::{MergeOutcome, VisitApi, VisitPatch, VisitSession};

pub struct VisitCoordinator {
    identity: VisitorIdentity,
    company_id: String,
    api: Arc<dyn VisitApi>,
    state: watch::Sender<VisitSession>,
}

impl VisitCoordinator {
    /// Creates the coordinator around an initial snapshot, usually the
    /// seeded result of `initialize`.
    pub fn new(
        identity: VisitorIdentity,
        company_id: impl Into<String>,
        api: Arc<dyn VisitApi>,
        initial: VisitSession,
    ) -> Self {
        let (state, _) = watch::channel(initial);
        Self {
            identity,
            company_id: company_id.into(),
            api,
            state,
        }
    }

    pub fn identity(&self) -> &VisitorIdentity {
        &self.identity
    }

    pub fn company_id(&self) -> &str {
        &self.company_id
    }

    /// Watch handle for reactive consumers (controllers, UI).
    pub fn subscribe(&self) -> watch::Receiver<VisitSession> {
        self.state.subscribe()
    }

    /// Current snapshot by value.
    pub fn snapshot(&self) -> VisitSession {
        self.state.borrow().clone()
    }

    fn merge(&self, patch: &VisitPatch) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();
        self.state.send_modify(|session| {
            outcome = session.apply(patch);
        });
        outcome
    }

    /// Applies an authoritative server diff.
    ///
    /// Always accepted; the merge itself enforces terminal stickiness, so
    /// even a post-end message has its live fields applied while the end
    /// timestamp stays put.
    pub fn apply_server_patch(&self, patch: &VisitPatch) -> MergeOutcome {
        let outcome = self.merge(patch);
        if outcome.ended_now {
            debug!("server ended the session");
        }
        outcome
    }

    /// Applies an optimistic local mutation and delivers it to the
    /// backend on a detached task.
    ///
    /// The HTTP result is never awaited by the caller: the UI has already
    /// moved, and the event stream is the retry path. A delivery failure
    /// is logged once and dropped.
    ///
    /// Once the session has ended, further field updates are refused;
    /// the only thing left to do locally is release media.
    pub fn update_fields(&self, patch: VisitPatch) -> MergeOutcome {
        if patch.is_empty() {
            return MergeOutcome::default();
        }
        if self.state.borrow().is_ended() {
            warn!("dropping status update for ended session");
            return MergeOutcome::default();
        }

        let outcome = self.merge(&patch);

        let api = self.api.clone();
        let identity = self.identity.clone();
        let company_id = self.company_id.clone();
        tokio::spawn(async move {
            if let Err(e) = api.update_status(&identity, &company_id, &patch).await {
                warn!(error = %e, "status update delivery failed");
            }
        });

        outcome
    }

    /// Consistency backstop: fetches the authoritative snapshot and
    /// merges it like any server patch. The stream carries no replay, so
    /// this is the recovery path after a suspected gap.
    pub async fn refresh(&self) -> Result<MergeOutcome> {
        let status = self.api.current_status(&self.identity).await?;
        Ok(self.apply_server_patch(&status.as_patch()))
    }

    /// Ends the session through the short-deadline delivery path used
    /// during page teardown.
    ///
    /// Unconditional: runs even if the session already looks ended, since
    /// the backend may not have heard the first attempt.
    pub async fn end_now(&self) {
        let patch = VisitPatch::new()
            .with_ended_at(Utc::now())
            .with_active(false);
        self.merge(&patch);
        if let Err(e) = self
            .api
            .send_final_status(&self.identity, &self.company_id, &patch)
            .await
        {
            warn!(error = %e, "final status delivery failed");
        }
    }
}
