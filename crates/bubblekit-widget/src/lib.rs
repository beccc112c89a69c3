//! # BubbleKit Widget Frame
//!
//! The sandboxed UI context embedded in the host page. It owns the bubble
//! queue, speaks the frame protocol with its content script over a
//! [`FrameLink`], and drives the visual layer through the [`RenderSurface`]
//! seam.
//!
//! Lifecycle: on startup the frame announces `WIDGET_READY`; the content
//! script answers with `CONFIGURE` carrying the full current configuration.
//! The frame holds no durable state — after a suspension the surface is
//! destroyed and a re-enabled widget starts with an empty queue by design.

pub mod samples;
pub mod surface;

pub use surface::{NullSurface, RecordingSurface, RenderSurface, SurfaceOp};

use bubblekit_core::{Bubble, BubbleId, BubbleState, Priority};
use bubblekit_queue::BubbleQueue;
use bubblekit_transport::{next_request_id, FrameLink, FrameMessage};
use hashbrown::HashMap;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

enum Event {
    Link(Option<FrameMessage>),
    SettleDue(Option<BubbleId>),
}

/// The widget frame actor.
pub struct WidgetFrame {
    link: FrameLink,
    queue: BubbleQueue,
    surface: Box<dyn RenderSurface>,
    visible: bool,
    auto_hide: bool,
    configured: bool,
    settle_delay: Duration,
    settle_tx: mpsc::UnboundedSender<BubbleId>,
    settle_rx: mpsc::UnboundedReceiver<BubbleId>,
    pending_api: HashMap<u64, BubbleId>,
}

impl WidgetFrame {
    pub fn new(link: FrameLink, surface: Box<dyn RenderSurface>, settle_delay: Duration) -> Self {
        let (settle_tx, settle_rx) = mpsc::unbounded_channel();
        Self {
            link,
            queue: BubbleQueue::new(5),
            surface,
            visible: true,
            auto_hide: false,
            configured: false,
            settle_delay,
            settle_tx,
            settle_rx,
            pending_api: HashMap::new(),
        }
    }

    /// Announce readiness to the content script. The lifecycle manager
    /// answers with `Configure`; until then the frame runs on defaults.
    pub fn announce_ready(&self) {
        self.link.post(FrameMessage::WidgetReady);
    }

    /// Run until the content script tears the frame down (link closed).
    pub async fn run(mut self) {
        self.announce_ready();
        loop {
            let event = tokio::select! {
                message = self.link.recv() => Event::Link(message),
                id = self.settle_rx.recv() => Event::SettleDue(id),
            };
            match event {
                Event::Link(Some(message)) => self.handle(message),
                Event::Link(None) => {
                    debug!("Frame link closed, widget frame stopping");
                    break;
                }
                Event::SettleDue(Some(id)) => self.settle_due(id),
                // All settle senders live in this struct; cannot close first.
                Event::SettleDue(None) => break,
            }
        }
    }

    /// Handle one inbound frame message. Unexpected kinds are ignored with
    /// a log line, never an error.
    pub fn handle(&mut self, message: FrameMessage) {
        debug!(kind = message.kind(), "Frame message received");
        match message {
            FrameMessage::Configure { config } => {
                self.queue.set_capacity(config.max_bubbles as usize);
                self.auto_hide = config.auto_hide;
                self.surface.set_position(config.position);
                self.configured = true;
            }
            FrameMessage::AddBubble { bubble } => match bubble {
                Some(bubble) => self.display(bubble),
                None => {
                    self.add_sample();
                }
            },
            FrameMessage::ToggleVisibility { visible } => {
                self.visible = visible;
                self.surface.set_visible(visible);
            }
            FrameMessage::UpdatePosition { position } => {
                self.surface.set_position(position);
            }
            FrameMessage::ApiResponse { request_id, data } => {
                self.resolve_api(request_id, data);
            }
            FrameMessage::ApiError { request_id, error } => {
                warn!(request_id, error, "API request failed");
                if let Some(id) = self.pending_api.remove(&request_id) {
                    if self.queue.dismiss(id) {
                        self.surface.remove_bubble(id);
                    }
                }
            }
            // Frame-originated kinds arriving at the frame are a protocol
            // mix-up on the other side; drop them.
            FrameMessage::WidgetReady
            | FrameMessage::WidgetInteraction { .. }
            | FrameMessage::ApiRequest { .. } => {
                debug!(kind = message.kind(), "Ignoring unexpected frame message");
            }
        }
    }

    /// Enqueue and render a bubble. Loading placeholders get a deferred
    /// fill-in after the fixed settle delay.
    pub fn display(&mut self, bubble: Bubble) {
        let loading = bubble.state == BubbleState::Loading;
        let result = self.queue.enqueue(bubble);

        if let Some(evicted) = result.evicted {
            self.surface.remove_bubble(evicted);
        }
        if let Some(bubble) = self.queue.get(result.id) {
            self.surface.render_bubble(bubble);
        }
        if loading {
            self.schedule_settle(result.id);
        }
    }

    /// Generate and display a sample bubble (the `addBubble` message with
    /// no body).
    pub fn add_sample(&mut self) -> BubbleId {
        let bubble = samples::sample_bubble();
        let id = bubble.id;
        self.display(bubble);
        id
    }

    /// User dismissed a bubble. Absent ids (already evicted) are a no-op;
    /// the interaction is still reported upstream.
    pub fn dismiss(&mut self, id: BubbleId) {
        if self.queue.dismiss(id) {
            self.surface.remove_bubble(id);
        }
        self.link.post(FrameMessage::WidgetInteraction {
            payload: serde_json::json!({ "kind": "dismiss", "bubbleId": id.0 }),
        });
    }

    /// Show a placeholder immediately and ask the content script to proxy
    /// an API fetch; the reply settles the placeholder in place.
    pub fn request_api(&mut self, url: impl Into<String>, options: ApiFetch) -> BubbleId {
        let placeholder = Bubble::placeholder("Fetching…", Priority::Medium);
        let id = placeholder.id;
        // Placeholder settles via the API reply, not the timer.
        self.queue.enqueue(placeholder);
        if let Some(bubble) = self.queue.get(id) {
            self.surface.render_bubble(bubble);
        }

        let request_id = next_request_id();
        self.pending_api.insert(request_id, id);
        self.link.post(FrameMessage::ApiRequest {
            url: url.into(),
            method: options.method,
            headers: options.headers,
            body: options.body,
            request_id,
        });
        id
    }

    /// Deferred fill-in for a timer-scheduled placeholder: reveal the final
    /// content in place, same id, same position.
    pub fn settle_due(&mut self, id: BubbleId) {
        let Some(bubble) = self.queue.get(id).cloned() else {
            // Evicted or dismissed before the fill-in resolved.
            return;
        };
        self.queue.settle(
            id,
            bubble.title,
            bubble.content,
            bubble.full_description,
        );
        if let Some(settled) = self.queue.get(id) {
            self.surface.update_bubble(settled);
        }
    }

    fn resolve_api(&mut self, request_id: u64, data: JsonValue) {
        let Some(id) = self.pending_api.remove(&request_id) else {
            debug!(request_id, "API reply for unknown request ignored");
            return;
        };
        let title = json_str(&data, "title").unwrap_or_else(|| "Notification".to_string());
        let content = json_str(&data, "content").unwrap_or_default();
        let full = json_str(&data, "fullDescription").unwrap_or_else(|| content.clone());
        if self.queue.settle(id, title, content, full) {
            if let Some(bubble) = self.queue.get(id) {
                self.surface.update_bubble(bubble);
            }
        }
    }

    fn schedule_settle(&self, id: BubbleId) {
        let tx = self.settle_tx.clone();
        let delay = self.settle_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(id);
        });
    }

    pub fn queue(&self) -> &BubbleQueue {
        &self.queue
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }
}

/// Parameters of a proxied API fetch.
#[derive(Debug, Clone, Default)]
pub struct ApiFetch {
    pub method: Option<String>,
    pub headers: std::collections::HashMap<String, String>,
    pub body: Option<JsonValue>,
}

fn json_str(value: &JsonValue, key: &str) -> Option<String> {
    value.get(key).and_then(JsonValue::as_str).map(str::to_string)
}
