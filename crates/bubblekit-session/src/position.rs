//! Widget placement
//!
//! When an anchor element is available the widget sits relative to its
//! bounding box, offset by a fixed margin. Otherwise it falls back to one of
//! the four fixed corners keyed by the `widgetPosition` preference.
//!
//! The anchor is a non-owning lookup handle into the host page: the element
//! may vanish at any time (the SPA re-renders freely), in which case the
//! cached rect is dropped and re-resolved lazily on the next position
//! computation. No eager polling.

use bubblekit_core::WidgetPosition;
use tracing::debug;
use url::Url;

/// Fixed widget surface size used for placement math.
pub const WIDGET_SIZE: Size = Size {
    width: 320.0,
    height: 400.0,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// What the content script can observe of its host page.
pub trait HostPage: Send + Sync {
    /// Current page URL (tracks SPA navigation).
    fn current_url(&self) -> Url;

    /// Visible viewport.
    fn viewport(&self) -> Rect;

    /// Bounding box of the element matching the selector, if it currently
    /// exists.
    fn anchor_rect(&self, selector: &str) -> Option<Rect>;
}

/// Non-owning reference to a host-page anchor element.
#[derive(Debug, Clone)]
pub struct AnchorHandle {
    selector: String,
    last: Option<Rect>,
}

impl AnchorHandle {
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            last: None,
        }
    }

    /// Re-resolve against the page. A vanished element drops the cached
    /// rect; the next call tries again.
    pub fn resolve(&mut self, page: &dyn HostPage) -> Option<Rect> {
        match page.anchor_rect(&self.selector) {
            Some(rect) => {
                self.last = Some(rect);
                Some(rect)
            }
            None => {
                if self.last.take().is_some() {
                    debug!(selector = %self.selector, "Anchor element gone, handle dropped");
                }
                None
            }
        }
    }

    pub fn selector(&self) -> &str {
        &self.selector
    }
}

/// Top-left origin for a corner-pinned widget.
pub fn corner_origin(
    viewport: Rect,
    widget: Size,
    position: WidgetPosition,
    margin: f64,
) -> Point {
    let left = viewport.x + margin;
    let right = viewport.x + viewport.width - widget.width - margin;
    let top = viewport.y + margin;
    let bottom = viewport.y + viewport.height - widget.height - margin;

    match position {
        WidgetPosition::TopLeft => Point { x: left, y: top },
        WidgetPosition::TopRight => Point { x: right, y: top },
        WidgetPosition::BottomLeft => Point { x: left, y: bottom },
        WidgetPosition::BottomRight => Point { x: right, y: bottom },
    }
}

/// Top-left origin for an anchor-relative widget: above the anchor,
/// right-aligned with it, offset by the margin.
pub fn anchored_origin(anchor: Rect, widget: Size, margin: f64) -> Point {
    Point {
        x: anchor.x + anchor.width - widget.width,
        y: anchor.y - widget.height - margin,
    }
}
