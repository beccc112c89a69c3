//! BubbleKit Session - per-tab widget lifecycle
//!
//! Everything that runs "inside" one tab: the session state machine that
//! decides whether the widget surface exists, the content script actor that
//! drives it from the tab's event sources, and the placement math for the
//! widget surface.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────── one tab ──────────────────────────────┐
//! │                                                                      │
//! │  router mailbox ──┐                                                  │
//! │  navigation feed ─┼─► ContentScript ─► WidgetSession ─► WidgetHost   │
//! │  frame link ──────┘        │               │                         │
//! │                            │               └─► PreferenceStore       │
//! │                            └─► Router (background proxying)          │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The session never trusts its own memory of the enabled flag across
//! navigation: every probe re-reads the store, so concurrent toggles from
//! other contexts converge within one event round trip.

mod content;
mod position;
mod session;

pub use content::ContentScript;
pub use position::{
    anchored_origin, corner_origin, AnchorHandle, HostPage, Point, Rect, Size, WIDGET_SIZE,
};
pub use session::{SessionState, WidgetHost, WidgetSession};
