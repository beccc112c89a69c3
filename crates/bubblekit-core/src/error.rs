//! Error types for BubbleKit
//!
//! Cross-context errors are caught at message-handler boundaries and turned
//! into structured failure replies; none of these may escape a handler and
//! take down its context.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for BubbleKit operations
pub type BubbleKitResult<T> = Result<T, BubbleKitError>;

/// Main error type for BubbleKit
#[derive(Error, Debug)]
pub enum BubbleKitError {
    /// The target context no longer exists (tab closed, frame unloaded).
    /// Callers must assume no effect happened and drop silently; the only
    /// documented retry is the single retry-after-injection in the
    /// coordinator.
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// No response within the bound. Outcome unknown; assume none.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// The receiving context explicitly declined to respond.
    #[error("Receiver declined to respond")]
    NoResponse,

    /// Action requested on a tab not showing the target site.
    #[error("Not applicable on this page: {0}")]
    NotApplicablePage(String),

    /// The persistence layer rejected a write; the prior value stays in
    /// effect.
    #[error("Preference store write failed: {0}")]
    StoreWrite(String),

    /// The external real-time feed is down. Never fatal; the feed client
    /// reconnects with a fixed delay.
    #[error("External feed unavailable: {0}")]
    FeedUnavailable(String),

    /// Unrecognized or undecodable envelope. Answered with a generic
    /// failure reply, never a crash.
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BubbleKitError {
    /// Create a new channel-closed error
    pub fn channel_closed(msg: impl Into<String>) -> Self {
        Self::ChannelClosed(msg.into())
    }

    /// Create a new not-applicable-page error
    pub fn not_applicable(msg: impl Into<String>) -> Self {
        Self::NotApplicablePage(msg.into())
    }

    /// Create a new store-write error
    pub fn store_write(msg: impl Into<String>) -> Self {
        Self::StoreWrite(msg.into())
    }

    /// Create a new feed-unavailable error
    pub fn feed_unavailable(msg: impl Into<String>) -> Self {
        Self::FeedUnavailable(msg.into())
    }

    /// Create a new malformed-message error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedMessage(msg.into())
    }

    /// Whether the error is a transient channel failure that callers
    /// swallow (silent no-op, no user-visible dialog).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ChannelClosed(_) | Self::Timeout(_) | Self::NoResponse
        )
    }
}
