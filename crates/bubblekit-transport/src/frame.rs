//! Content script ↔ widget frame link
//!
//! postMessage-style: one-way duplex, fire-and-forget, no replies. The
//! request/response pattern the frame needs (API proxying) is built on top
//! with explicit `request_id` correlation, because a dropped frame must
//! never leave the content script waiting.

use bubblekit_core::{Bubble, WidgetConfig, WidgetPosition};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

/// Allocate a process-unique id for API request correlation.
pub fn next_request_id() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Messages on the origin-restricted frame link. Wire tags match the
/// extension's frame protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FrameMessage {
    /// Frame → content: the UI finished booting; the lifecycle manager
    /// answers with `Configure`.
    WidgetReady,
    /// Content → frame: full current configuration.
    #[serde(rename_all = "camelCase")]
    Configure { config: WidgetConfig },
    /// Content → frame: display a bubble. A missing body asks the frame to
    /// generate a sample, the frame being the sample producer.
    #[serde(rename_all = "camelCase")]
    AddBubble {
        #[serde(default)]
        bubble: Option<Bubble>,
    },
    /// Content → frame: show or hide the whole surface.
    #[serde(rename_all = "camelCase")]
    ToggleVisibility { visible: bool },
    /// Content → frame: move to a corner.
    #[serde(rename_all = "camelCase")]
    UpdatePosition { position: WidgetPosition },
    /// Frame → content: user interacted with the widget.
    #[serde(rename_all = "camelCase")]
    WidgetInteraction { payload: JsonValue },
    /// Frame → content: proxy this API fetch.
    #[serde(rename_all = "camelCase")]
    ApiRequest {
        url: String,
        method: Option<String>,
        #[serde(default)]
        headers: HashMap<String, String>,
        body: Option<JsonValue>,
        request_id: u64,
    },
    /// Content → frame: API fetch succeeded.
    #[serde(rename_all = "camelCase")]
    ApiResponse { request_id: u64, data: JsonValue },
    /// Content → frame: API fetch failed.
    #[serde(rename_all = "camelCase")]
    ApiError { request_id: u64, error: String },
}

impl FrameMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::WidgetReady => "WIDGET_READY",
            Self::Configure { .. } => "CONFIGURE",
            Self::AddBubble { .. } => "ADD_BUBBLE",
            Self::ToggleVisibility { .. } => "TOGGLE_VISIBILITY",
            Self::UpdatePosition { .. } => "UPDATE_POSITION",
            Self::WidgetInteraction { .. } => "WIDGET_INTERACTION",
            Self::ApiRequest { .. } => "API_REQUEST",
            Self::ApiResponse { .. } => "API_RESPONSE",
            Self::ApiError { .. } => "API_ERROR",
        }
    }
}

/// One end of an entangled frame link pair. FIFO per direction; posting to
/// a torn-down peer reports closure so the sender can drop silently.
#[derive(Debug)]
pub struct FrameLink {
    tx: mpsc::UnboundedSender<FrameMessage>,
    rx: mpsc::UnboundedReceiver<FrameMessage>,
}

impl FrameLink {
    /// Create an entangled pair: one end for the content script, one for
    /// the frame.
    pub fn pair() -> (Self, Self) {
        let (tx1, rx1) = mpsc::unbounded_channel();
        let (tx2, rx2) = mpsc::unbounded_channel();
        (Self { tx: tx2, rx: rx1 }, Self { tx: tx1, rx: rx2 })
    }

    /// Fire-and-forget post. `false` means the peer is gone.
    pub fn post(&self, message: FrameMessage) -> bool {
        debug!(kind = message.kind(), "Posting frame message");
        self.tx.send(message).is_ok()
    }

    /// Wait for the next message. `None` once the peer end is dropped and
    /// the backlog drained.
    pub async fn recv(&mut self) -> Option<FrameMessage> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<FrameMessage> {
        self.rx.try_recv().ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frame_wire_tags() {
        let ready = serde_json::to_value(&FrameMessage::WidgetReady).unwrap();
        assert_eq!(ready, json!({ "type": "WIDGET_READY" }));

        let api = serde_json::to_value(&FrameMessage::ApiError {
            request_id: 7,
            error: "boom".to_string(),
        })
        .unwrap();
        assert_eq!(
            api,
            json!({ "type": "API_ERROR", "requestId": 7, "error": "boom" })
        );
    }

    #[tokio::test]
    async fn test_pair_is_duplex_fifo() {
        let (mut content, mut frame) = FrameLink::pair();

        assert!(frame.post(FrameMessage::WidgetReady));
        assert!(content.post(FrameMessage::ToggleVisibility { visible: false }));
        assert!(content.post(FrameMessage::UpdatePosition {
            position: WidgetPosition::TopRight,
        }));

        assert!(matches!(
            content.recv().await,
            Some(FrameMessage::WidgetReady)
        ));
        assert!(matches!(
            frame.recv().await,
            Some(FrameMessage::ToggleVisibility { visible: false })
        ));
        assert!(matches!(
            frame.recv().await,
            Some(FrameMessage::UpdatePosition { .. })
        ));
    }

    #[tokio::test]
    async fn test_post_after_peer_drop_reports_closed() {
        let (content, frame) = FrameLink::pair();
        drop(frame);
        assert!(content.is_closed());
        assert!(!content.post(FrameMessage::WidgetReady));
    }

    #[test]
    fn test_request_ids_unique() {
        let a = next_request_id();
        let b = next_request_id();
        assert_ne!(a, b);
    }
}
