//! BubbleKit Core Library
//!
//! This crate provides shared types, errors, and configuration for BubbleKit,
//! the cross-context coordination layer of the floating bubble widget
//! extension. The three execution contexts (background coordinator, per-tab
//! content script, sandboxed widget frame) all speak in terms of these types.

pub mod config;
pub mod error;
pub mod types;

pub use config::CoordinatorConfig;
pub use error::{BubbleKitError, BubbleKitResult};
pub use types::{
    pref_keys, timestamp_ms, Bubble, BubbleId, BubbleState, Preferences, Priority, TabId,
    TabStatus, WidgetConfig, WidgetPosition,
};
