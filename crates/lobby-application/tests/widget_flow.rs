//! End-to-end widget flows over the local platforms and a scripted
//! server-push stream.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use serde_json::json;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_stream::wrappers::UnboundedReceiverStream;

use lobby_application::{CallView, ChatViewEvent, EngagementWidget, WidgetDeps};
use lobby_core::Result;
use lobby_core::call::{CallRoom, CallState};
use lobby_core::chat::ChatChannel;
use lobby_core::config::WidgetConfig;
use lobby_core::identity::VisitorIdentity;
use lobby_core::visit::{ValidateResponse, VisitApi, VisitPatch, VisitStatus};
use lobby_infrastructure::TomlIdentityStore;
use lobby_interaction::event_stream::{SseMessage, StreamConnector};
use lobby_interaction::local::{LocalCallPlatform, LocalChatPlatform, StaticPermissions};

/// Backend stub answering the bootstrap calls and recording every
/// mutation the widget issues.
#[derive(Default)]
struct ScriptedApi {
    updates: Mutex<Vec<VisitPatch>>,
    finals: Mutex<Vec<VisitPatch>>,
}

#[async_trait]
impl VisitApi for ScriptedApi {
    async fn validate(&self, _token: &str, _domain: &str) -> Result<ValidateResponse> {
        Ok(ValidateResponse {
            valid: true,
            company_id: Some("co-42".to_string()),
        })
    }

    async fn initialize(
        &self,
        _identity: &VisitorIdentity,
        _token: &str,
        chat_room_id: &str,
    ) -> Result<VisitStatus> {
        Ok(VisitStatus {
            success: true,
            company_id: Some("co-42".to_string()),
            active: true,
            chat_room_id: Some(chat_room_id.to_string()),
            ..VisitStatus::default()
        })
    }

    async fn update_status(
        &self,
        _identity: &VisitorIdentity,
        _company_id: &str,
        patch: &VisitPatch,
    ) -> Result<()> {
        self.updates.lock().unwrap().push(patch.clone());
        Ok(())
    }

    async fn send_final_status(
        &self,
        _identity: &VisitorIdentity,
        _company_id: &str,
        patch: &VisitPatch,
    ) -> Result<()> {
        self.finals.lock().unwrap().push(patch.clone());
        Ok(())
    }

    async fn current_status(&self, _identity: &VisitorIdentity) -> Result<VisitStatus> {
        Ok(VisitStatus {
            success: true,
            active: true,
            ..VisitStatus::default()
        })
    }

    async fn chat_token(&self, _identity: &VisitorIdentity, _company_id: &str) -> Result<String> {
        Ok("chat-tok".to_string())
    }

    async fn call_token(&self, _identity: &VisitorIdentity, _room_id: &str) -> Result<String> {
        Ok("call-tok".to_string())
    }
}

/// Hands the scripted channel to the first connection; reconnects get a
/// silent open stream.
struct ScriptedConnector {
    first: Mutex<Option<mpsc::UnboundedReceiver<Result<SseMessage>>>>,
}

impl ScriptedConnector {
    fn new() -> (mpsc::UnboundedSender<Result<SseMessage>>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            tx,
            Self {
                first: Mutex::new(Some(rx)),
            },
        )
    }
}

#[async_trait]
impl StreamConnector for ScriptedConnector {
    async fn connect(&self) -> Result<BoxStream<'static, Result<SseMessage>>> {
        match self.first.lock().unwrap().take() {
            Some(rx) => Ok(UnboundedReceiverStream::new(rx).boxed()),
            None => Ok(stream::pending().boxed()),
        }
    }
}

fn visit_update(mut value: serde_json::Value) -> SseMessage {
    value["type"] = json!("visit_update");
    SseMessage {
        event: "message".to_string(),
        data: value.to_string(),
    }
}

struct Fixture {
    widget: EngagementWidget,
    api: Arc<ScriptedApi>,
    events: mpsc::UnboundedSender<Result<SseMessage>>,
    call_platform: Arc<LocalCallPlatform>,
    chat_platform: Arc<LocalChatPlatform>,
    _identity_dir: tempfile::TempDir,
}

async fn mount() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("identity.toml");
    let api = Arc::new(ScriptedApi::default());
    let (events, connector) = ScriptedConnector::new();
    let call_platform = Arc::new(LocalCallPlatform::new());
    let chat_platform = Arc::new(LocalChatPlatform::new());

    let deps = WidgetDeps {
        identity_store: Arc::new(TomlIdentityStore::new(&path)),
        api: api.clone(),
        connector: Some(Arc::new(connector)),
        chat_platform: chat_platform.clone(),
        call_platform: call_platform.clone(),
        permissions: Arc::new(StaticPermissions::granted()),
    };
    let widget = EngagementWidget::mount(WidgetConfig::new("tok-123", "example.com"), deps)
        .await
        .unwrap();
    assert!(path.exists(), "identity must be persisted during mount");

    Fixture {
        widget,
        api,
        events,
        call_platform,
        chat_platform,
        _identity_dir: dir,
    }
}

async fn wait_call(rx: &mut watch::Receiver<CallView>, f: impl FnMut(&CallView) -> bool) -> CallView {
    timeout(Duration::from_secs(2), rx.wait_for(f))
        .await
        .expect("timed out waiting for call view")
        .expect("call view channel closed")
        .clone()
}

async fn wait_for_update(api: &ScriptedApi, f: impl Fn(&VisitPatch) -> bool) {
    timeout(Duration::from_secs(2), async {
        loop {
            if api.updates.lock().unwrap().iter().any(|p| f(p)) {
                return;
            }
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("timed out waiting for a status update");
}

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn first_visit_through_call_to_ended() {
    let fx = mount().await;
    let call = fx.widget.call().clone();
    let mut view = call.view();
    assert_eq!(call.current_view().state, CallState::Idle);

    // Clicking "start call" shows the connecting state and posts consent.
    call.start_call();
    wait_call(&mut view, |v| v.state == CallState::Connecting).await;
    wait_for_update(&fx.api, |p| p.joined == Some(true)).await;

    // The backend provisions a room and pushes it over the stream.
    fx.events
        .send(Ok(visit_update(json!({"callRoomId": "room123"}))))
        .unwrap();
    wait_call(&mut view, |v| v.state == CallState::Joined).await;
    // Entering the call switches the microphone on.
    wait_call(&mut view, |v| v.mic_enabled).await;
    let room = fx.call_platform.latest_room().await.unwrap();
    assert_eq!(
        room.snapshot().await.joined_room.as_deref(),
        Some("room123")
    );
    assert!(room.snapshot().await.remote_playback);

    // Muting goes through the platform and comes back as a track event.
    call.toggle_mic().await.unwrap();
    wait_call(&mut view, |v| !v.mic_enabled).await;
    assert!(!room.snapshot().await.local_audio);

    // The agent ends the session server-side.
    fx.events
        .send(Ok(visit_update(
            json!({"sessionEndedAt": "2026-08-24T12:00:00Z"}),
        )))
        .unwrap();
    let ended = wait_call(&mut view, |v| v.state == CallState::Ended).await;
    assert!(!ended.mic_enabled);
    assert!(!ended.video_enabled);
    assert!(!room.is_joined().await);

    // Terminal state gates the chat input but keeps the transcript.
    assert!(!fx.widget.chat().send("too late").await.unwrap());
    assert!(fx.widget.coordinator().snapshot().is_ended());

    fx.widget.shutdown().await;
}

#[tokio::test]
async fn declining_an_invite_never_reaches_the_backend() {
    let fx = mount().await;
    let call = fx.widget.call().clone();
    let mut view = call.view();

    fx.events
        .send(Ok(visit_update(json!({"callRoomId": "room-a"}))))
        .unwrap();
    wait_call(&mut view, |v| v.state == CallState::Invited).await;

    call.decline_invite().await;
    wait_call(&mut view, |v| v.state == CallState::Idle).await;
    let room = fx.call_platform.latest_room().await.unwrap();
    assert_eq!(room.snapshot().await.joined_room, None);

    // An unrelated server change leaves the suppression in place.
    fx.events
        .send(Ok(visit_update(json!({"active": true}))))
        .unwrap();
    settle().await;
    assert_eq!(call.current_view().state, CallState::Idle);

    // A different room is a fresh invite.
    fx.events
        .send(Ok(visit_update(json!({"callRoomId": "room-b"}))))
        .unwrap();
    wait_call(&mut view, |v| v.state == CallState::Invited).await;

    assert!(fx.api.updates.lock().unwrap().is_empty());
    assert!(fx.api.finals.lock().unwrap().is_empty());

    fx.widget.shutdown().await;
}

#[tokio::test]
async fn chat_runs_both_ways_through_the_widget() {
    let fx = mount().await;
    let chat = fx.widget.chat().clone();
    let mut events = chat.subscribe();

    let room_id = fx
        .widget
        .coordinator()
        .snapshot()
        .chat_room_id
        .expect("mount seeds the chat room");
    let agent = fx.chat_platform.connect(&room_id, "agent-1").await;

    assert!(chat.send("Hi, anyone there?").await.unwrap());
    loop {
        match timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap()
        {
            ChatViewEvent::MessageReceived(msg) if msg.text == "Hi, anyone there?" => break,
            _ => continue,
        }
    }

    agent.set_typing(true).await.unwrap();
    loop {
        match timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap()
        {
            ChatViewEvent::TypingChanged { peers } => {
                assert_eq!(peers, vec!["agent-1"]);
                break;
            }
            _ => continue,
        }
    }

    agent.send("Hello! How can I help?").await.unwrap();
    loop {
        match timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap()
        {
            ChatViewEvent::MessageReceived(msg) if msg.client_id == "agent-1" => {
                assert_eq!(msg.text, "Hello! How can I help?");
                break;
            }
            _ => continue,
        }
    }

    let transcript = chat.messages().await;
    assert_eq!(transcript.len(), 2);

    fx.widget.shutdown().await;
}
