//! # BubbleKit Transport
//!
//! Typed message transport between the three isolated extension contexts.
//! Delivery has the semantics of the browser messaging APIs: asynchronous,
//! at-most-once, FIFO per point-to-point link, nothing persisted across a
//! context teardown, and no ordering across different links.
//!
//! ## Architecture
//!
//! ```text
//! Background ◄── Router (runtime messaging) ──► Content(tab N)
//!     │                                              │
//!     └── FeedSocket ──► external feed               └── FrameLink ──► Frame(tab N)
//!         (subscribe handshake, fixed-delay              (postMessage-style,
//!          reconnect)                                     fire-and-forget)
//! ```
//!
//! Three sub-links:
//! - background ↔ content script per tab: [`Router`] request/response with
//!   [`Envelope`]/[`Reply`]
//! - content script ↔ embedded widget frame: [`FrameLink`] carrying
//!   [`FrameMessage`], one-way duplex
//! - background ↔ external real-time feed: the [`feed`] traits

pub mod envelope;
pub mod feed;
pub mod frame;
pub mod router;

pub use envelope::{ApiOptions, Envelope, Reply};
pub use feed::{FeedConnection, FeedError, FeedEvent, FeedSocket, Subscribe};
pub use frame::{next_request_id, FrameLink, FrameMessage};
pub use router::{ContextId, Inbound, Mailbox, Responder, Router, TransportError};
