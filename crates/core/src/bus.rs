//! Message bus — the queue between channel adapters and the agent loop.
//!
//! Channels publish [`InboundMessage`]s; the agent loop drains them one at a
//! time and publishes [`OutboundMessage`]s (final answers, plan notices,
//! tool notifications) for the channels to deliver.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc};

use crate::error::ChannelError;

/// Metadata key marking an inbound message as a slash command.
pub const COMMAND_METADATA_KEY: &str = "command";

/// Metadata key for the collapsible tool digest on outbound messages.
pub const COLLAPSIBLE_METADATA_KEY: &str = "collapsible";

/// A message received from a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Channel name ("telegram", "cli", or "system" for internal events)
    pub channel: String,

    /// Sender identifier (platform-specific user ID)
    pub sender_id: String,

    /// The chat/group/DM identifier within the channel
    pub chat_id: String,

    /// The text content
    pub content: String,

    /// Local paths of attached media
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<String>,

    /// Platform-specific metadata
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    pub timestamp: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(
        channel: impl Into<String>,
        sender_id: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            sender_id: sender_id.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            media: Vec::new(),
            metadata: serde_json::Map::new(),
            timestamp: Utc::now(),
        }
    }

    /// Mark this message as a slash command.
    pub fn as_command(mut self) -> Self {
        self.metadata
            .insert(COMMAND_METADATA_KEY.into(), serde_json::Value::Bool(true));
        self
    }

    pub fn with_media(mut self, media: Vec<String>) -> Self {
        self.media = media;
        self
    }

    /// `channel:chat_id`
    pub fn session_key(&self) -> String {
        format!("{}:{}", self.channel, self.chat_id)
    }

    pub fn is_command(&self) -> bool {
        self.metadata
            .get(COMMAND_METADATA_KEY)
            .is_some_and(|v| v.as_bool().unwrap_or(false))
    }
}

/// A message to deliver to a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub channel: String,
    pub chat_id: String,
    pub content: String,

    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl OutboundMessage {
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Attach auxiliary content the channel may render collapsed.
    pub fn with_collapsible(mut self, collapsible: impl Into<String>) -> Self {
        self.metadata.insert(
            COLLAPSIBLE_METADATA_KEY.into(),
            serde_json::Value::String(collapsible.into()),
        );
        self
    }

    pub fn collapsible(&self) -> Option<&str> {
        self.metadata
            .get(COLLAPSIBLE_METADATA_KEY)
            .and_then(|v| v.as_str())
    }
}

/// An mpsc-based bus with one inbound and one outbound queue.
pub struct MessageBus {
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: Mutex<mpsc::Receiver<InboundMessage>>,
    outbound_tx: mpsc::Sender<OutboundMessage>,
    outbound_rx: Mutex<mpsc::Receiver<OutboundMessage>>,
}

impl MessageBus {
    /// Create a new bus with the given per-queue capacity.
    pub fn new(capacity: usize) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
        Self {
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            outbound_tx,
            outbound_rx: Mutex::new(outbound_rx),
        }
    }

    pub async fn publish_inbound(&self, msg: InboundMessage) -> Result<(), ChannelError> {
        self.inbound_tx
            .send(msg)
            .await
            .map_err(|e| ChannelError::Closed(e.to_string()))
    }

    /// Wait for the next inbound message.
    pub async fn consume_inbound(&self) -> Option<InboundMessage> {
        self.inbound_rx.lock().await.recv().await
    }

    pub async fn publish_outbound(&self, msg: OutboundMessage) -> Result<(), ChannelError> {
        self.outbound_tx
            .send(msg)
            .await
            .map_err(|e| ChannelError::DeliveryFailed {
                channel: e.0.channel.clone(),
                reason: "outbound queue closed".into(),
            })
    }

    /// Wait for the next outbound message.
    pub async fn consume_outbound(&self) -> Option<OutboundMessage> {
        self.outbound_rx.lock().await.recv().await
    }

    /// Take an outbound message if one is already queued.
    pub async fn try_consume_outbound(&self) -> Option<OutboundMessage> {
        self.outbound_rx.lock().await.try_recv().ok()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(256)
    }
}
