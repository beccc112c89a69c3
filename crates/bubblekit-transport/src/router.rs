//! Context registry and point-to-point delivery
//!
//! The router stands in for the browser's runtime messaging: each live
//! context registers a mailbox, senders address a [`ContextId`], and a
//! request either completes with a [`Reply`] or fails with one of the three
//! channel outcomes. A failed outcome means "unknown effect, assume none";
//! callers retry only idempotent operations.

use crate::envelope::{Envelope, Reply};
use bubblekit_core::{BubbleKitError, TabId};
use hashbrown::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, warn};

/// Transport delivery errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The target context no longer exists (or was never registered).
    #[error("Channel to {0} closed")]
    ChannelClosed(ContextId),

    /// No response within the bound.
    #[error("No response from {0} within {1:?}")]
    Timeout(ContextId, Duration),

    /// The handler explicitly declined to respond.
    #[error("{0} declined to respond")]
    NoResponse(ContextId),
}

impl From<TransportError> for BubbleKitError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::ChannelClosed(ctx) => BubbleKitError::ChannelClosed(ctx.to_string()),
            TransportError::Timeout(_, bound) => BubbleKitError::Timeout(bound),
            TransportError::NoResponse(_) => BubbleKitError::NoResponse,
        }
    }
}

/// Identity of an isolated execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextId {
    /// The extension-wide background process.
    Background,
    /// The content script of one tab.
    Content(TabId),
    /// The sandboxed widget frame embedded in one tab.
    Frame(TabId),
}

impl ContextId {
    pub fn tab(&self) -> Option<TabId> {
        match self {
            Self::Background => None,
            Self::Content(tab) | Self::Frame(tab) => Some(*tab),
        }
    }

    pub fn is_content(&self) -> bool {
        matches!(self, Self::Content(_))
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Background => write!(f, "background"),
            Self::Content(tab) => write!(f, "content(tab {})", tab.0),
            Self::Frame(tab) => write!(f, "frame(tab {})", tab.0),
        }
    }
}

/// An envelope delivered to a context's mailbox.
#[derive(Debug)]
pub struct Inbound {
    pub from: ContextId,
    pub envelope: Envelope,
    pub responder: Responder,
}

/// One-shot reply channel handed to the handler. Dropping it without
/// responding surfaces [`TransportError::NoResponse`] to the sender.
#[derive(Debug)]
pub struct Responder {
    tx: Option<oneshot::Sender<Reply>>,
}

impl Responder {
    fn new(tx: oneshot::Sender<Reply>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A responder with no sender attached, for locally-generated events.
    pub fn detached() -> Self {
        Self { tx: None }
    }

    /// Send the reply. The sender may already be gone (timeout, teardown);
    /// that is not the handler's problem.
    pub fn respond(mut self, reply: Reply) {
        if let Some(tx) = self.tx.take() {
            if tx.send(reply).is_err() {
                debug!("Reply dropped, sender gone");
            }
        }
    }

    /// Explicitly decline to respond.
    pub fn decline(mut self) {
        self.tx.take();
    }
}

/// Receiving end of a registered context.
#[derive(Debug)]
pub struct Mailbox {
    id: ContextId,
    rx: mpsc::UnboundedReceiver<Inbound>,
}

impl Mailbox {
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Wait for the next envelope. `None` once the context is unregistered
    /// and the backlog drained.
    pub async fn recv(&mut self) -> Option<Inbound> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Inbound> {
        self.rx.try_recv().ok()
    }
}

#[derive(Debug, Default)]
struct RouterInner {
    contexts: HashMap<ContextId, mpsc::UnboundedSender<Inbound>>,
}

/// Registry of live contexts plus request/response delivery.
#[derive(Debug, Clone)]
pub struct Router {
    inner: Arc<RwLock<RouterInner>>,
    timeout: Duration,
}

impl Router {
    pub fn new(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(RouterInner::default())),
            timeout,
        }
    }

    /// Register a context and get its mailbox. Re-registering replaces the
    /// previous registration: a recreated context (page reload) starts with
    /// an empty mailbox and the old one drains into the void.
    pub async fn register(&self, id: ContextId) -> Mailbox {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.write().await;
        if inner.contexts.insert(id, tx).is_some() {
            debug!(%id, "Context re-registered, prior mailbox dropped");
        } else {
            debug!(%id, "Context registered");
        }
        Mailbox { id, rx }
    }

    /// Remove a context. Subsequent sends fail with `ChannelClosed` and are
    /// dropped silently by callers.
    pub async fn unregister(&self, id: ContextId) {
        if self.inner.write().await.contexts.remove(&id).is_some() {
            debug!(%id, "Context unregistered");
        }
    }

    pub async fn is_registered(&self, id: ContextId) -> bool {
        self.inner.read().await.contexts.contains_key(&id)
    }

    /// Snapshot of currently registered contexts.
    pub async fn contexts(&self) -> Vec<ContextId> {
        self.inner.read().await.contexts.keys().copied().collect()
    }

    /// Send an envelope and wait for the reply, bounded by the router
    /// timeout. Every message is logged; logging never affects delivery.
    pub async fn send(
        &self,
        from: ContextId,
        target: ContextId,
        envelope: Envelope,
    ) -> Result<Reply, TransportError> {
        debug!(%from, %target, action = envelope.action(), "Sending envelope");

        let tx = {
            let inner = self.inner.read().await;
            inner.contexts.get(&target).cloned()
        }
        .ok_or(TransportError::ChannelClosed(target))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        let inbound = Inbound {
            from,
            envelope,
            responder: Responder::new(reply_tx),
        };

        if tx.send(inbound).is_err() {
            // Mailbox dropped without unregistering; prune it.
            self.inner.write().await.contexts.remove(&target);
            return Err(TransportError::ChannelClosed(target));
        }

        match tokio::time::timeout(self.timeout, reply_rx).await {
            Ok(Ok(reply)) => {
                debug!(%target, "Reply received");
                Ok(reply)
            }
            Ok(Err(_)) => Err(TransportError::NoResponse(target)),
            Err(_) => Err(TransportError::Timeout(target, self.timeout)),
        }
    }

    /// Best-effort fan-out to every context matching the predicate.
    /// Per-target failures are logged and isolated; the broadcast never
    /// aborts early. Returns the ids that acknowledged.
    pub async fn broadcast(
        &self,
        from: ContextId,
        predicate: impl Fn(&ContextId) -> bool,
        envelope: Envelope,
    ) -> Vec<ContextId> {
        let targets: Vec<ContextId> = {
            let inner = self.inner.read().await;
            inner
                .contexts
                .keys()
                .copied()
                .filter(|id| *id != from && predicate(id))
                .collect()
        };

        let mut delivered = Vec::new();
        for target in targets {
            match self.send(from, target, envelope.clone()).await {
                Ok(Reply::Failure { error }) => {
                    warn!(%target, error, "Broadcast target reported failure");
                }
                Ok(_) => delivered.push(target),
                Err(e) => {
                    warn!(%target, error = %e, "Broadcast target unreachable");
                }
            }
        }
        delivered
    }
}
