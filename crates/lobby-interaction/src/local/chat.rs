//! In-process messaging platform.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};
use uuid::Uuid;

use lobby_core::Result;
use lobby_core::chat::{ChatChannel, ChatEvent, ChatMessage, ChatPlatform};

const ROOM_BUFFER_CAPACITY: usize = 64;

/// Shared state of one named room.
struct RoomState {
    events: broadcast::Sender<ChatEvent>,
    messages: RwLock<Vec<ChatMessage>>,
}

impl RoomState {
    fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(ROOM_BUFFER_CAPACITY);
        Arc::new(Self {
            events,
            messages: RwLock::new(Vec::new()),
        })
    }
}

/// Messaging platform keeping every room in process memory.
///
/// Any number of clients (the visitor, an agent console, tests) can
/// attach to the same room id and exchange messages and typing signals.
#[derive(Default)]
pub struct LocalChatPlatform {
    rooms: RwLock<HashMap<String, Arc<RoomState>>>,
}

impl LocalChatPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    async fn room(&self, room_id: &str) -> Arc<RoomState> {
        if let Some(room) = self.rooms.read().await.get(room_id) {
            return room.clone();
        }
        let mut rooms = self.rooms.write().await;
        rooms
            .entry(room_id.to_string())
            .or_insert_with(RoomState::new)
            .clone()
    }

    /// Concrete attachment, keeping the metadata-publishing surface that
    /// agent consoles and tests use.
    pub async fn connect(&self, room_id: &str, client_id: &str) -> Arc<LocalChatChannel> {
        let room = self.room(room_id).await;
        let events = room.events.clone();
        Arc::new(LocalChatChannel {
            room,
            events,
            client_id: client_id.to_string(),
        })
    }
}

#[async_trait]
impl ChatPlatform for LocalChatPlatform {
    async fn attach(&self, room_id: &str, client_id: &str) -> Result<Arc<dyn ChatChannel>> {
        Ok(self.connect(room_id, client_id).await as Arc<dyn ChatChannel>)
    }
}

/// One client's attachment to a local room.
pub struct LocalChatChannel {
    room: Arc<RoomState>,
    events: broadcast::Sender<ChatEvent>,
    client_id: String,
}

#[async_trait]
impl ChatChannel for LocalChatChannel {
    async fn history(&self, limit: usize) -> Result<Vec<ChatMessage>> {
        let messages = self.room.messages.read().await;
        // Newest first, like a backwards-paged history query.
        Ok(messages.iter().rev().take(limit).cloned().collect())
    }

    async fn send(&self, text: &str) -> Result<()> {
        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            client_id: self.client_id.clone(),
            text: text.to_string(),
            sent_at: Utc::now(),
            metadata: None,
        };
        self.room.messages.write().await.push(message.clone());
        let _ = self.events.send(ChatEvent::Message(message));
        Ok(())
    }

    async fn set_typing(&self, typing: bool) -> Result<()> {
        let event = if typing {
            ChatEvent::TypingStarted {
                client_id: self.client_id.clone(),
            }
        } else {
            ChatEvent::TypingStopped {
                client_id: self.client_id.clone(),
            }
        };
        let _ = self.events.send(event);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    async fn detach(&self) -> Result<()> {
        // Leaving while flagged as typing would strand the indicator.
        let _ = self.events.send(ChatEvent::TypingStopped {
            client_id: self.client_id.clone(),
        });
        Ok(())
    }
}

impl LocalChatChannel {
    /// Publishes a message with explicit metadata, used to mimic agent
    /// consoles and system notifications.
    pub async fn send_with_metadata(&self, text: &str, metadata: serde_json::Value) -> Result<()> {
        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            client_id: self.client_id.clone(),
            text: text.to_string(),
            sent_at: Utc::now(),
            metadata: Some(metadata),
        };
        self.room.messages.write().await.push(message.clone());
        let _ = self.events.send(ChatEvent::Message(message));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clients_in_the_same_room_see_each_other() {
        let platform = LocalChatPlatform::new();
        let visitor = platform.attach("room-1", "visitor-v1").await.unwrap();
        let agent = platform.attach("room-1", "agent-a1").await.unwrap();

        let mut visitor_events = visitor.subscribe();
        agent.send("hello there").await.unwrap();

        match visitor_events.recv().await.unwrap() {
            ChatEvent::Message(message) => {
                assert_eq!(message.client_id, "agent-a1");
                assert_eq!(message.text, "hello there");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn history_returns_newest_first_up_to_limit() {
        let platform = LocalChatPlatform::new();
        let client = platform.attach("room-1", "visitor-v1").await.unwrap();
        for i in 0..5 {
            client.send(&format!("m{i}")).await.unwrap();
        }

        let history = client.history(3).await.unwrap();
        let texts: Vec<&str> = history.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["m4", "m3", "m2"]);
    }

    #[tokio::test]
    async fn rooms_are_isolated() {
        let platform = LocalChatPlatform::new();
        let a = platform.attach("room-a", "visitor-1").await.unwrap();
        let b = platform.attach("room-b", "visitor-2").await.unwrap();

        a.send("only in a").await.unwrap();
        assert!(b.history(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn typing_signals_carry_the_client_id() {
        let platform = LocalChatPlatform::new();
        let visitor = platform.attach("room-1", "visitor-v1").await.unwrap();
        let agent = platform.attach("room-1", "agent-a1").await.unwrap();

        let mut events = visitor.subscribe();
        agent.set_typing(true).await.unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            ChatEvent::TypingStarted {
                client_id: "agent-a1".to_string()
            }
        );
    }
}
