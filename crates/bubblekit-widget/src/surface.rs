//! Render surface seam
//!
//! The visual layer (HTML, CSS, animations) is an external collaborator: it
//! consumes the typed event feed and exposes only render/update/remove
//! operations back. Everything behind this trait is out of scope for the
//! coordination core.

use bubblekit_core::{Bubble, BubbleId, WidgetPosition};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Operations the coordination core may ask of the visual layer.
pub trait RenderSurface: Send {
    /// A new bubble entered the queue; show it (loading or settled).
    fn render_bubble(&mut self, bubble: &Bubble);

    /// An existing bubble changed in place (placeholder settled).
    fn update_bubble(&mut self, bubble: &Bubble);

    /// A bubble left the queue (dismissed or evicted).
    fn remove_bubble(&mut self, id: BubbleId);

    /// Show or hide the whole widget surface.
    fn set_visible(&mut self, visible: bool);

    /// Move the widget to a corner.
    fn set_position(&mut self, position: WidgetPosition);
}

/// Surface that only logs. Used when no visual layer is attached.
#[derive(Debug, Default)]
pub struct NullSurface;

impl RenderSurface for NullSurface {
    fn render_bubble(&mut self, bubble: &Bubble) {
        debug!(id = ?bubble.id, title = %bubble.title, "render bubble");
    }

    fn update_bubble(&mut self, bubble: &Bubble) {
        debug!(id = ?bubble.id, "update bubble");
    }

    fn remove_bubble(&mut self, id: BubbleId) {
        debug!(?id, "remove bubble");
    }

    fn set_visible(&mut self, visible: bool) {
        debug!(visible, "set visible");
    }

    fn set_position(&mut self, position: WidgetPosition) {
        debug!(position = position.as_str(), "set position");
    }
}

/// One recorded surface operation.
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceOp {
    Render(BubbleId),
    Update(BubbleId),
    Remove(BubbleId),
    Visible(bool),
    Position(WidgetPosition),
}

/// Surface that records every operation; used by tests and the smoke
/// harness to assert on what the visual layer would have been asked to do.
#[derive(Debug, Clone, Default)]
pub struct RecordingSurface {
    ops: Arc<Mutex<Vec<SurfaceOp>>>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ops(&self) -> Vec<SurfaceOp> {
        self.ops.lock().map(|ops| ops.clone()).unwrap_or_default()
    }

    fn push(&self, op: SurfaceOp) {
        if let Ok(mut ops) = self.ops.lock() {
            ops.push(op);
        }
    }
}

impl RenderSurface for RecordingSurface {
    fn render_bubble(&mut self, bubble: &Bubble) {
        self.push(SurfaceOp::Render(bubble.id));
    }

    fn update_bubble(&mut self, bubble: &Bubble) {
        self.push(SurfaceOp::Update(bubble.id));
    }

    fn remove_bubble(&mut self, id: BubbleId) {
        self.push(SurfaceOp::Remove(id));
    }

    fn set_visible(&mut self, visible: bool) {
        self.push(SurfaceOp::Visible(visible));
    }

    fn set_position(&mut self, position: WidgetPosition) {
        self.push(SurfaceOp::Position(position));
    }
}
