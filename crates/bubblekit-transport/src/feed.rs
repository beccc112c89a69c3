//! Background ↔ external real-time feed link
//!
//! Best-effort, at-most-once: frames that arrive while nothing is connected
//! are lost, not buffered. The reconnect policy (fixed delay, handshake per
//! connect) lives in the coordinator's feed client; this module defines the
//! socket seam and the frame shape.

use bubblekit_core::{Bubble, Priority};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Subscription handshake sent once per successful connect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscribe {
    pub event: String,
    pub channel: String,
}

impl Subscribe {
    pub fn to_channel(channel: impl Into<String>) -> Self {
        Self {
            event: "subscribe".to_string(),
            channel: channel.into(),
        }
    }
}

/// An inbound feed event, mapped 1:1 to a bubble.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedEvent {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub full_description: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
}

impl FeedEvent {
    pub fn into_bubble(self) -> Bubble {
        let full = self
            .full_description
            .unwrap_or_else(|| self.content.clone());
        Bubble::new(
            self.title,
            self.content,
            full,
            self.priority.unwrap_or(Priority::Medium),
        )
    }
}

/// A live feed connection: handshake frames out, event frames in.
pub trait FeedConnection: Send {
    /// Send a frame upstream.
    fn send(
        &mut self,
        frame: JsonValue,
    ) -> impl std::future::Future<Output = Result<(), FeedError>> + Send;

    /// Next inbound frame; `None` when the channel is lost.
    fn next(&mut self) -> impl std::future::Future<Output = Option<JsonValue>> + Send;
}

/// Factory for feed connections. Implementations wrap whatever real-time
/// channel the deployment uses; tests script one in memory.
pub trait FeedSocket: Send {
    type Conn: FeedConnection;

    fn connect(
        &mut self,
    ) -> impl std::future::Future<Output = Result<Self::Conn, FeedError>> + Send;
}

/// Feed channel errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FeedError {
    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Channel lost: {0}")]
    ChannelLost(String),
}
