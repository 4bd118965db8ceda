//! Widget composition root.
//!
//! `mount` runs the bootstrap sequence in a fixed order: config check,
//! token validation, identity load, visit initialization, then wiring of
//! the stream pump, call controller, chat view, and visibility watcher.
//! Any failure up to and including visit initialization aborts the mount;
//! the widget never renders half-bootstrapped.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use lobby_core::call::{CallPlatform, MediaPermissions};
use lobby_core::chat::ChatPlatform;
use lobby_core::config::WidgetConfig;
use lobby_core::identity::IdentityStore;
use lobby_core::visit::{VisitApi, VisitSession};
use lobby_core::{LobbyError, Result};
use lobby_infrastructure::TomlIdentityStore;
use lobby_interaction::VisitApiClient;
use lobby_interaction::event_stream::{HttpStreamConnector, StreamConnector, VisitEventStream};

use crate::call_controller::CallController;
use crate::chat_view::ChatView;
use crate::visibility::VisibilityWatcher;
use crate::visit_coordinator::VisitCoordinator;

/// Everything the widget needs injected. The chat and call platforms and
/// the permission prompt always come from the host; the rest has a
/// standard production wiring.
pub struct WidgetDeps {
    pub identity_store: Arc<dyn IdentityStore>,
    pub api: Arc<dyn VisitApi>,
    /// Override for the server-push connector. `None` builds the HTTP
    /// connector from the config and the loaded visitor id.
    pub connector: Option<Arc<dyn StreamConnector>>,
    pub chat_platform: Arc<dyn ChatPlatform>,
    pub call_platform: Arc<dyn CallPlatform>,
    pub permissions: Arc<dyn MediaPermissions>,
}

impl WidgetDeps {
    /// Production wiring: HTTP backend client and the on-disk identity
    /// store at its default location.
    pub fn standard(
        config: &WidgetConfig,
        chat_platform: Arc<dyn ChatPlatform>,
        call_platform: Arc<dyn CallPlatform>,
        permissions: Arc<dyn MediaPermissions>,
    ) -> Result<Self> {
        Ok(Self {
            identity_store: Arc::new(TomlIdentityStore::default_location()?),
            api: Arc::new(VisitApiClient::new(config.api_base.clone())),
            connector: None,
            chat_platform,
            call_platform,
            permissions,
        })
    }
}

/// One mounted widget instance.
pub struct EngagementWidget {
    config: WidgetConfig,
    instance_id: String,
    coordinator: Arc<VisitCoordinator>,
    call: Arc<CallController>,
    chat: Arc<ChatView>,
    visibility: VisibilityWatcher,
    cancel: CancellationToken,
}

impl std::fmt::Debug for EngagementWidget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngagementWidget")
            .field("instance_id", &self.instance_id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl EngagementWidget {
    /// Bootstraps a widget instance. Fail-closed: a refused token, a
    /// failed identity load, or a refused initialization all abort before
    /// anything is wired.
    pub async fn mount(config: WidgetConfig, deps: WidgetDeps) -> Result<Self> {
        config.validate()?;

        let validation = deps.api.validate(&config.token, &config.domain).await?;
        if !validation.valid {
            return Err(LobbyError::token_rejected("embed token was refused"));
        }
        let Some(company_id) = validation.company_id else {
            return Err(LobbyError::token_rejected(
                "token validation carried no company",
            ));
        };

        let identity = deps.identity_store.get_or_create().await?;
        let chat_room_id = identity.chat_room_id();

        let status = deps
            .api
            .initialize(&identity, &config.token, &chat_room_id)
            .await?;
        if !status.success {
            return Err(LobbyError::api(200, "visit initialization was refused"));
        }
        if status.is_reused {
            debug!("backend resumed an existing visit");
        }
        let session = status.into_session(&chat_room_id);

        let instance_id = Uuid::new_v4().to_string();
        info!(
            instance_id = %instance_id,
            company_id = %company_id,
            visitor_id = %identity.visitor_id,
            "widget mounted"
        );

        let coordinator = Arc::new(VisitCoordinator::new(
            identity.clone(),
            company_id,
            deps.api.clone(),
            session.clone(),
        ));

        let connector = match deps.connector {
            Some(connector) => connector,
            None => Arc::new(HttpStreamConnector::new(
                config.api_base.clone(),
                identity.visitor_id.clone(),
            )) as Arc<dyn StreamConnector>,
        };
        let cancel = CancellationToken::new();
        Self::spawn_stream_pump(
            VisitEventStream::spawn_with_connector(connector),
            coordinator.clone(),
            cancel.clone(),
        );

        let call = CallController::new(
            coordinator.clone(),
            deps.api.clone(),
            deps.call_platform.as_ref(),
            deps.permissions.clone(),
        )
        .await?;
        call.start();

        // The chat channel is part of the widget's contract with the
        // visitor; failing to attach is a mount failure, not a degraded
        // mode.
        let chat_room = session
            .chat_room_id
            .clone()
            .unwrap_or_else(|| chat_room_id.clone());
        let channel = deps
            .chat_platform
            .attach(&chat_room, &identity.chat_client_id())
            .await?;
        let chat = ChatView::attach(channel, identity.chat_client_id(), coordinator.subscribe()).await;

        let visibility = VisibilityWatcher::new(coordinator.clone());

        Ok(Self {
            config,
            instance_id,
            coordinator,
            call,
            chat,
            visibility,
            cancel,
        })
    }

    /// Forwards server patches into the coordinator until shutdown.
    fn spawn_stream_pump(
        mut stream: VisitEventStream,
        coordinator: Arc<VisitCoordinator>,
        cancel: CancellationToken,
    ) {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    patch = stream.recv() => match patch {
                        Some(patch) => {
                            coordinator.apply_server_patch(&patch);
                        }
                        None => break,
                    },
                }
            }
            stream.shutdown();
        });
    }

    pub fn config(&self) -> &WidgetConfig {
        &self.config
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn coordinator(&self) -> &Arc<VisitCoordinator> {
        &self.coordinator
    }

    /// Watch handle over the reconciled visit session.
    pub fn sessions(&self) -> watch::Receiver<VisitSession> {
        self.coordinator.subscribe()
    }

    pub fn call(&self) -> &Arc<CallController> {
        &self.call
    }

    pub fn chat(&self) -> &Arc<ChatView> {
        &self.chat
    }

    pub fn visibility(&self) -> &VisibilityWatcher {
        &self.visibility
    }

    /// Releases the stream, the call room, and the chat attachment. The
    /// session itself is left to the lifecycle rules; unmounting a widget
    /// is not ending a visit.
    pub async fn shutdown(&self) {
        debug!(instance_id = %self.instance_id, "widget shutting down");
        self.cancel.cancel();
        self.call.shutdown().await;
        self.chat.detach().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingApi;
    use async_trait::async_trait;
    use futures::StreamExt;
    use futures::stream::BoxStream;
    use lobby_core::visit::{ValidateResponse, VisitPatch, VisitStatus};
    use lobby_interaction::event_stream::SseMessage;
    use lobby_interaction::local::{LocalCallPlatform, LocalChatPlatform, StaticPermissions};
    use lobby_core::identity::VisitorIdentity;

    /// Connector whose stream stays open and silent.
    struct PendingConnector;

    #[async_trait]
    impl StreamConnector for PendingConnector {
        async fn connect(&self) -> Result<BoxStream<'static, Result<SseMessage>>> {
            Ok(futures::stream::pending().boxed())
        }
    }

    struct RefusingApi;

    #[async_trait]
    impl VisitApi for RefusingApi {
        async fn validate(&self, _token: &str, _domain: &str) -> Result<ValidateResponse> {
            Ok(ValidateResponse {
                valid: false,
                company_id: None,
            })
        }

        async fn initialize(
            &self,
            _identity: &VisitorIdentity,
            _token: &str,
            _chat_room_id: &str,
        ) -> Result<VisitStatus> {
            unreachable!("mount must stop at validation")
        }

        async fn update_status(
            &self,
            _identity: &VisitorIdentity,
            _company_id: &str,
            _patch: &VisitPatch,
        ) -> Result<()> {
            unreachable!("mount must stop at validation")
        }

        async fn send_final_status(
            &self,
            _identity: &VisitorIdentity,
            _company_id: &str,
            _patch: &VisitPatch,
        ) -> Result<()> {
            unreachable!("mount must stop at validation")
        }

        async fn current_status(&self, _identity: &VisitorIdentity) -> Result<VisitStatus> {
            unreachable!("mount must stop at validation")
        }

        async fn chat_token(
            &self,
            _identity: &VisitorIdentity,
            _company_id: &str,
        ) -> Result<String> {
            unreachable!("mount must stop at validation")
        }

        async fn call_token(&self, _identity: &VisitorIdentity, _room_id: &str) -> Result<String> {
            unreachable!("mount must stop at validation")
        }
    }

    fn deps_with_api(api: Arc<dyn VisitApi>, store_path: &std::path::Path) -> WidgetDeps {
        WidgetDeps {
            identity_store: Arc::new(TomlIdentityStore::new(store_path)),
            api,
            connector: Some(Arc::new(PendingConnector)),
            chat_platform: Arc::new(LocalChatPlatform::new()),
            call_platform: Arc::new(LocalCallPlatform::new()),
            permissions: Arc::new(StaticPermissions::granted()),
        }
    }

    #[tokio::test]
    async fn mount_wires_the_stack_and_persists_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.toml");
        let deps = deps_with_api(Arc::new(RecordingApi::default()), &path);

        let widget = EngagementWidget::mount(WidgetConfig::new("tok", "example.com"), deps)
            .await
            .unwrap();

        assert!(path.exists());
        let session = widget.coordinator().snapshot();
        assert!(session.active);
        assert!(session.chat_room_id.is_some());
        assert!(widget.chat().local_client_id().starts_with("visitor-"));

        widget.shutdown().await;
    }

    #[tokio::test]
    async fn refused_token_fails_closed_before_identity_is_touched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.toml");
        let deps = deps_with_api(Arc::new(RefusingApi), &path);

        let err = EngagementWidget::mount(WidgetConfig::new("tok", "example.com"), deps)
            .await
            .unwrap_err();

        assert!(err.is_token_rejected());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn blank_token_is_rejected_without_any_backend_call() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.toml");
        // RefusingApi panics on anything past validation, and a blank
        // token must not even reach validation.
        struct UnreachableApi;

        #[async_trait]
        impl VisitApi for UnreachableApi {
            async fn validate(&self, _token: &str, _domain: &str) -> Result<ValidateResponse> {
                unreachable!("blank config must fail before any request")
            }
            async fn initialize(
                &self,
                _identity: &VisitorIdentity,
                _token: &str,
                _chat_room_id: &str,
            ) -> Result<VisitStatus> {
                unreachable!()
            }
            async fn update_status(
                &self,
                _identity: &VisitorIdentity,
                _company_id: &str,
                _patch: &VisitPatch,
            ) -> Result<()> {
                unreachable!()
            }
            async fn send_final_status(
                &self,
                _identity: &VisitorIdentity,
                _company_id: &str,
                _patch: &VisitPatch,
            ) -> Result<()> {
                unreachable!()
            }
            async fn current_status(&self, _identity: &VisitorIdentity) -> Result<VisitStatus> {
                unreachable!()
            }
            async fn chat_token(
                &self,
                _identity: &VisitorIdentity,
                _company_id: &str,
            ) -> Result<String> {
                unreachable!()
            }
            async fn call_token(
                &self,
                _identity: &VisitorIdentity,
                _room_id: &str,
            ) -> Result<String> {
                unreachable!()
            }
        }

        let deps = deps_with_api(Arc::new(UnreachableApi), &path);
        let err = EngagementWidget::mount(WidgetConfig::new("  ", "example.com"), deps)
            .await
            .unwrap_err();
        assert!(err.is_token_rejected());
    }
}
