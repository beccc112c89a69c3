//! BubbleKit Coordinator - the background context
//!
//! Process-wide half of the extension: install seeding, user-initiated
//! commands, the periodic sample push and cleanup alarm, the external feed
//! client, and the API proxy that performs fetches on behalf of sandboxed
//! widget frames.
//!
//! # Architecture
//!
//! ```text
//!                  ┌───────────────── background ─────────────────┐
//!  icon / popup ──►│ Coordinator ──► Router ──► per-tab sessions  │
//!                  │     │                                        │
//!  external feed ─►│ FeedClient ─► active tab                     │
//!                  │                                              │
//!  content script ►│ BackgroundTask ─► PreferenceStore / ApiProxy │
//!                  └──────────────────────────────────────────────┘
//! ```
//!
//! The background context tolerates being restarted at any time: nothing it
//! keeps in memory is durable, and every handler re-reads the store.

mod api;
mod coordinator;
mod feed;

pub use api::ApiProxy;
pub use coordinator::{
    BackgroundTask, ContentInjector, Coordinator, IconOutcome, InstallReason, PopupStatus,
    UserAction,
};
pub use feed::{FeedClient, FeedStats};
