//! Chat session view.
//!
//! Maintains the transcript, peer typing presence, and the advisory agent
//! identity for one attached channel. The view never interprets message
//! text; classification and identity extraction live on
//! [`ChatMessage`] itself.

use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use lobby_core::chat::{ChatChannel, ChatEvent, ChatMessage, SYSTEM_CLIENT_PREFIX};
use lobby_core::visit::{AgentIdentity, VisitSession};
use lobby_core::Result;

/// Messages fetched when attaching to a channel that already has history.
pub const HISTORY_LIMIT: usize = 50;

const EVENT_BUFFER_CAPACITY: usize = 64;

/// Notifications for the chat surface.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatViewEvent {
    /// A message landed on the channel, own echoes included.
    MessageReceived(ChatMessage),
    /// The set of peers currently typing changed. Sorted, never contains
    /// the local client or synthetic system clients.
    TypingChanged { peers: Vec<String> },
    /// A message carried a representative identity in its metadata.
    AgentIdentified(AgentIdentity),
}

pub struct ChatView {
    channel: Arc<dyn ChatChannel>,
    client_id: String,
    sessions: watch::Receiver<VisitSession>,
    messages: RwLock<Vec<ChatMessage>>,
    typing: RwLock<BTreeSet<String>>,
    agent: RwLock<Option<AgentIdentity>>,
    events: broadcast::Sender<ChatViewEvent>,
    cancel: CancellationToken,
}

impl ChatView {
    /// Attaches the view to an already connected channel and starts the
    /// event pump. History is loaded best-effort; an empty transcript on
    /// fetch failure beats refusing to mount.
    pub async fn attach(
        channel: Arc<dyn ChatChannel>,
        local_client_id: impl Into<String>,
        sessions: watch::Receiver<VisitSession>,
    ) -> Arc<Self> {
        // Subscribe before fetching so nothing lands between the two.
        let channel_events = channel.subscribe();

        let mut history = match channel.history(HISTORY_LIMIT).await {
            Ok(messages) => messages,
            Err(e) => {
                warn!(error = %e, "chat history fetch failed, starting empty");
                Vec::new()
            }
        };
        // The channel pages newest first.
        history.reverse();
        let agent = history.iter().rev().find_map(|m| m.agent_identity());

        let (events, _) = broadcast::channel(EVENT_BUFFER_CAPACITY);
        let view = Arc::new(Self {
            channel,
            client_id: local_client_id.into(),
            sessions,
            messages: RwLock::new(history),
            typing: RwLock::new(BTreeSet::new()),
            agent: RwLock::new(agent),
            events,
            cancel: CancellationToken::new(),
        });
        view.spawn_pump(channel_events);
        view
    }

    fn spawn_pump(self: &Arc<Self>, mut channel_events: broadcast::Receiver<ChatEvent>) {
        let view = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = view.cancel.cancelled() => break,
                    event = channel_events.recv() => match event {
                        Ok(event) => view.on_channel_event(event).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "chat events lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });
    }

    async fn on_channel_event(&self, event: ChatEvent) {
        match event {
            ChatEvent::Message(message) => {
                if let Some(identity) = message.agent_identity() {
                    let mut agent = self.agent.write().await;
                    if agent.as_ref() != Some(&identity) {
                        *agent = Some(identity.clone());
                        self.emit(ChatViewEvent::AgentIdentified(identity));
                    }
                }
                self.messages.write().await.push(message.clone());
                self.emit(ChatViewEvent::MessageReceived(message));
            }
            ChatEvent::TypingStarted { client_id } => {
                if client_id == self.client_id || client_id.starts_with(SYSTEM_CLIENT_PREFIX) {
                    return;
                }
                let mut typing = self.typing.write().await;
                if typing.insert(client_id) {
                    let peers = typing.iter().cloned().collect();
                    self.emit(ChatViewEvent::TypingChanged { peers });
                }
            }
            ChatEvent::TypingStopped { client_id } => {
                let mut typing = self.typing.write().await;
                if typing.remove(&client_id) {
                    let peers = typing.iter().cloned().collect();
                    self.emit(ChatViewEvent::TypingChanged { peers });
                }
            }
        }
    }

    fn emit(&self, event: ChatViewEvent) {
        let _ = self.events.send(event);
    }

    /// Publishes a trimmed message. Returns whether anything was sent:
    /// blank input and ended sessions both swallow the message without
    /// error. The transcript stays readable after the session ends.
    pub async fn send(&self, text: &str) -> Result<bool> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(false);
        }
        if self.sessions.borrow().is_ended() {
            debug!("dropping outgoing chat message for ended session");
            return Ok(false);
        }
        self.channel.send(text).await?;
        Ok(true)
    }

    /// Forwards local typing presence, silently dropped after the session
    /// ends.
    pub async fn set_typing(&self, typing: bool) -> Result<()> {
        if self.sessions.borrow().is_ended() {
            return Ok(());
        }
        self.channel.set_typing(typing).await
    }

    /// Transcript in chronological order.
    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.messages.read().await.clone()
    }

    /// Peer client ids currently typing, sorted.
    pub async fn typing_peers(&self) -> Vec<String> {
        self.typing.read().await.iter().cloned().collect()
    }

    pub async fn agent(&self) -> Option<AgentIdentity> {
        self.agent.read().await.clone()
    }

    pub fn local_client_id(&self) -> &str {
        &self.client_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatViewEvent> {
        self.events.subscribe()
    }

    /// Stops the pump and releases the channel attachment.
    pub async fn detach(&self) {
        self.cancel.cancel();
        if let Err(e) = self.channel.detach().await {
            warn!(error = %e, "chat channel detach failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lobby_interaction::local::LocalChatPlatform;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;

    const ROOM: &str = "site-v1";

    fn sessions() -> (watch::Sender<VisitSession>, watch::Receiver<VisitSession>) {
        watch::channel(VisitSession {
            active: true,
            ..VisitSession::default()
        })
    }

    async fn recv_event(rx: &mut broadcast::Receiver<ChatViewEvent>) -> ChatViewEvent {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for chat view event")
            .expect("chat view event stream closed")
    }

    #[tokio::test]
    async fn history_is_reordered_chronologically() {
        let platform = LocalChatPlatform::new();
        let agent = platform.connect(ROOM, "agent-1").await;
        agent.send("one").await.unwrap();
        agent.send("two").await.unwrap();
        agent.send("three").await.unwrap();

        let (_tx, rx) = sessions();
        let channel = platform.connect(ROOM, "visitor-x").await;
        let view = ChatView::attach(channel, "visitor-x", rx).await;

        let texts: Vec<String> = view
            .messages()
            .await
            .into_iter()
            .map(|m| m.text)
            .collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn incoming_messages_append_and_notify() {
        let platform = LocalChatPlatform::new();
        let (_tx, rx) = sessions();
        let channel = platform.connect(ROOM, "visitor-x").await;
        let view = ChatView::attach(channel, "visitor-x", rx).await;
        let mut events = view.subscribe();

        let agent = platform.connect(ROOM, "agent-1").await;
        agent.send("hi there").await.unwrap();

        match recv_event(&mut events).await {
            ChatViewEvent::MessageReceived(msg) => {
                assert_eq!(msg.text, "hi there");
                assert_eq!(msg.client_id, "agent-1");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        let messages = view.messages().await;
        assert_eq!(messages.len(), 1);
    }

    #[tokio::test]
    async fn typing_skips_self_and_system_clients() {
        let platform = LocalChatPlatform::new();
        let (_tx, rx) = sessions();
        let channel = platform.connect(ROOM, "visitor-x").await;
        let view = ChatView::attach(channel, "visitor-x", rx).await;
        let mut events = view.subscribe();

        // Neither of these may surface.
        let own = platform.connect(ROOM, "visitor-x").await;
        own.set_typing(true).await.unwrap();
        let system = platform.connect(ROOM, "system-presence").await;
        system.set_typing(true).await.unwrap();

        let agent = platform.connect(ROOM, "agent-1").await;
        agent.set_typing(true).await.unwrap();

        match recv_event(&mut events).await {
            ChatViewEvent::TypingChanged { peers } => assert_eq!(peers, vec!["agent-1"]),
            other => panic!("unexpected event: {other:?}"),
        }

        agent.set_typing(false).await.unwrap();
        match recv_event(&mut events).await {
            ChatViewEvent::TypingChanged { peers } => assert!(peers.is_empty()),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn send_trims_and_stops_after_the_session_ends() {
        let platform = LocalChatPlatform::new();
        let (tx, rx) = sessions();
        let channel = platform.connect(ROOM, "visitor-x").await;
        let view = ChatView::attach(channel, "visitor-x", rx).await;

        assert!(!view.send("   ").await.unwrap());
        assert!(view.send("  hello  ").await.unwrap());

        tx.send_modify(|s| s.session_ended_at = Some(Utc::now()));
        assert!(!view.send("too late").await.unwrap());
        view.set_typing(true).await.unwrap();

        let agent = platform.connect(ROOM, "agent-1").await;
        let history = agent.history(HISTORY_LIMIT).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].text, "hello");
    }

    #[tokio::test]
    async fn agent_identity_comes_from_message_metadata() {
        let platform = LocalChatPlatform::new();
        let (_tx, rx) = sessions();
        let channel = platform.connect(ROOM, "visitor-x").await;
        let view = ChatView::attach(channel, "visitor-x", rx).await;
        let mut events = view.subscribe();

        let agent = platform.connect(ROOM, "agent-1").await;
        agent
            .send_with_metadata("hello", json!({"userName": "Dana"}))
            .await
            .unwrap();

        match recv_event(&mut events).await {
            ChatViewEvent::AgentIdentified(identity) => {
                assert_eq!(identity.name.as_deref(), Some("Dana"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(view.agent().await.is_some());
    }

    #[tokio::test]
    async fn history_seeds_the_agent_identity() {
        let platform = LocalChatPlatform::new();
        let agent = platform.connect(ROOM, "agent-1").await;
        agent
            .send_with_metadata("hi", json!({"userName": "Dana"}))
            .await
            .unwrap();

        let (_tx, rx) = sessions();
        let channel = platform.connect(ROOM, "visitor-x").await;
        let view = ChatView::attach(channel, "visitor-x", rx).await;

        let identity = view.agent().await.expect("identity from history");
        assert_eq!(identity.name.as_deref(), Some("Dana"));
    }
}
