//! Chat domain: messages, channel events, and the messaging platform seam.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::error::Result;
use crate::visit::AgentIdentity;

/// Synthetic sender ids (presence bots, join notifications) carry this
/// prefix and are excluded from typing presence.
pub const SYSTEM_CLIENT_PREFIX: &str = "system-";

/// Classification of a message for display purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatMessageKind {
    /// Sent by the local visitor.
    Visitor,
    /// Sent by the representative.
    Agent,
    /// Synthetic notification (agent joined, etc.), rendered inline.
    System,
}

/// One message on the session's channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    /// Channel client id of the sender.
    pub client_id: String,
    pub text: String,
    pub sent_at: DateTime<Utc>,
    /// Loose platform metadata; known keys are `type`, `eventType`,
    /// `userName` and `userImage`.
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

impl ChatMessage {
    pub fn kind(&self, local_client_id: &str) -> ChatMessageKind {
        if self.is_system() {
            ChatMessageKind::System
        } else if self.client_id == local_client_id {
            ChatMessageKind::Visitor
        } else {
            ChatMessageKind::Agent
        }
    }

    fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.as_ref()?.get(key)?.as_str()
    }

    /// Synthetic notifications are flagged in metadata rather than by
    /// sender id alone.
    pub fn is_system(&self) -> bool {
        self.metadata_str("type") == Some("system")
            || self.metadata_str("eventType") == Some("user_joined")
            || self.client_id.starts_with(SYSTEM_CLIENT_PREFIX)
    }

    /// Representative identity embedded in message metadata, when the
    /// platform provides it. Advisory, display-only.
    pub fn agent_identity(&self) -> Option<AgentIdentity> {
        let name = self.metadata_str("userName")?.to_string();
        if name.is_empty() {
            return None;
        }
        Some(AgentIdentity {
            name: Some(name),
            image: self
                .metadata_str("userImage")
                .filter(|s| !s.is_empty())
                .map(String::from),
        })
    }
}

/// Events emitted by a chat channel adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    Message(ChatMessage),
    TypingStarted { client_id: String },
    TypingStopped { client_id: String },
}

/// One attached messaging channel.
#[async_trait]
pub trait ChatChannel: Send + Sync {
    /// Fetches up to `limit` most recent messages, newest first. The view
    /// re-orders them chronologically.
    async fn history(&self, limit: usize) -> Result<Vec<ChatMessage>>;

    /// Publishes a message as the attached client.
    async fn send(&self, text: &str) -> Result<()>;

    /// Signals typing presence for the attached client.
    async fn set_typing(&self, typing: bool) -> Result<()>;

    fn subscribe(&self) -> broadcast::Receiver<ChatEvent>;

    /// Releases the attachment. The channel itself persists server-side.
    async fn detach(&self) -> Result<()>;
}

/// Factory connecting to named channels on the messaging platform.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    async fn attach(&self, room_id: &str, client_id: &str) -> Result<Arc<dyn ChatChannel>>;
}
