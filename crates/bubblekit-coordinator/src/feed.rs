//! External real-time feed client
//!
//! Maintains one subscription to the external event channel and maps each
//! inbound frame to a bubble pushed at the active tab. Best effort,
//! at-most-once: frames with no live session are dropped, never buffered.
//!
//! Reconnect policy: fixed delay, forever, never exponential. Every
//! successful connect re-sends the subscription handshake exactly once and
//! nothing else; the receiving end treats a repeated handshake as a fresh
//! subscription.

use bubblekit_core::{CoordinatorConfig, TabId};
use bubblekit_transport::{
    ContextId, Envelope, FeedConnection, FeedEvent, FeedSocket, Reply, Router, Subscribe,
};
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Counters for the feed lifecycle, readable from any thread.
#[derive(Debug, Default)]
pub struct FeedStats {
    connects: AtomicU64,
    handshakes: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl FeedStats {
    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::Relaxed)
    }

    pub fn handshakes(&self) -> u64 {
        self.handshakes.load(Ordering::Relaxed)
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Long-running feed pump. Generic over the socket so tests can script the
/// channel in memory.
pub struct FeedClient<S: FeedSocket> {
    socket: S,
    router: Router,
    config: Arc<CoordinatorConfig>,
    active_tab: watch::Receiver<Option<TabId>>,
    stats: Arc<FeedStats>,
}

impl<S: FeedSocket> FeedClient<S> {
    pub fn new(
        socket: S,
        router: Router,
        config: Arc<CoordinatorConfig>,
        active_tab: watch::Receiver<Option<TabId>>,
    ) -> Self {
        Self {
            socket,
            router,
            config,
            active_tab,
            stats: Arc::new(FeedStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<FeedStats> {
        self.stats.clone()
    }

    /// Connect, subscribe, pump, reconnect. Runs until `shutdown` flips.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.socket.connect().await {
                Ok(mut conn) => {
                    self.stats.connects.fetch_add(1, Ordering::Relaxed);
                    if self.subscribe(&mut conn).await {
                        info!(channel = %self.config.feed_channel, "Feed connected");
                        self.pump(&mut conn, &mut shutdown).await;
                        if *shutdown.borrow() {
                            break;
                        }
                        warn!("Feed channel lost, reconnecting");
                    }
                }
                Err(e) => {
                    debug!(error = %e, "Feed connect failed");
                }
            }

            // Fixed delay, never exponential.
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(self.config.feed_reconnect_delay()) => {}
            }
        }
        info!("Feed client stopped");
    }

    async fn subscribe(&self, conn: &mut S::Conn) -> bool {
        let handshake = Subscribe::to_channel(self.config.feed_channel.clone());
        let frame = match serde_json::to_value(&handshake) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Handshake not serializable");
                return false;
            }
        };
        match conn.send(frame).await {
            Ok(()) => {
                self.stats.handshakes.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                warn!(error = %e, "Handshake send failed");
                false
            }
        }
    }

    async fn pump(&self, conn: &mut S::Conn, shutdown: &mut watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                frame = conn.next() => match frame {
                    Some(frame) => self.deliver(frame).await,
                    None => return,
                }
            }
        }
    }

    /// One inbound frame → one bubble at the active tab, or dropped.
    async fn deliver(&self, frame: JsonValue) {
        let event: FeedEvent = match serde_json::from_value(frame) {
            Ok(event) => event,
            Err(e) => {
                debug!(error = %e, "Malformed feed frame dropped");
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let Some(tab) = *self.active_tab.borrow() else {
            debug!(title = %event.title, "No active session, feed event dropped");
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };

        let envelope = Envelope::AddBubble {
            bubble: Some(event.into_bubble()),
        };
        let target = ContextId::Content(tab);
        match self
            .router
            .send(ContextId::Background, target, envelope)
            .await
        {
            Ok(Reply::Failure { error }) => {
                debug!(tab = tab.0, error, "Feed event refused");
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Ok(_) => {
                self.stats.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                debug!(tab = tab.0, error = %e, "Feed event dropped");
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bubblekit_transport::FeedError;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct ScriptedConn {
        outbound: mpsc::UnboundedSender<JsonValue>,
        inbound: mpsc::UnboundedReceiver<JsonValue>,
    }

    impl FeedConnection for ScriptedConn {
        async fn send(&mut self, frame: JsonValue) -> Result<(), FeedError> {
            self.outbound
                .send(frame)
                .map_err(|_| FeedError::ChannelLost("peer gone".to_string()))
        }

        async fn next(&mut self) -> Option<JsonValue> {
            self.inbound.recv().await
        }
    }

    /// Socket handing out pre-scripted connections; `connect` waits for the
    /// test to supply the next one.
    struct ScriptedSocket {
        connections: mpsc::UnboundedReceiver<ScriptedConn>,
    }

    impl FeedSocket for ScriptedSocket {
        type Conn = ScriptedConn;

        async fn connect(&mut self) -> Result<ScriptedConn, FeedError> {
            self.connections
                .recv()
                .await
                .ok_or_else(|| FeedError::Connect("script exhausted".to_string()))
        }
    }

    struct Feed {
        supply: mpsc::UnboundedSender<ScriptedConn>,
        stats: Arc<FeedStats>,
        active_tab: watch::Sender<Option<TabId>>,
        shutdown: watch::Sender<bool>,
        router: Router,
    }

    fn start_feed() -> Feed {
        let config = Arc::new(CoordinatorConfig {
            feed_reconnect_delay_ms: 10,
            ..CoordinatorConfig::default()
        });
        let router = Router::new(Duration::from_millis(500));
        let (supply, connections) = mpsc::unbounded_channel();
        let (active_tx, active_rx) = watch::channel(None);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let client = FeedClient::new(
            ScriptedSocket { connections },
            router.clone(),
            config,
            active_rx,
        );
        let stats = client.stats();
        tokio::spawn(client.run(shutdown_rx));

        Feed {
            supply,
            stats,
            active_tab: active_tx,
            shutdown: shutdown_tx,
            router,
        }
    }

    /// Supply one scripted connection; returns the frame injector and the
    /// handshake observer.
    fn connect(
        feed: &Feed,
    ) -> (
        mpsc::UnboundedSender<JsonValue>,
        mpsc::UnboundedReceiver<JsonValue>,
    ) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        feed.supply
            .send(ScriptedConn {
                outbound: outbound_tx,
                inbound: inbound_rx,
            })
            .unwrap();
        (inbound_tx, outbound_rx)
    }

    #[tokio::test]
    async fn test_handshake_once_per_reconnect() {
        // Scenario D.
        let feed = start_feed();

        let (frames1, mut sent1) = connect(&feed);
        let handshake = sent1.recv().await.unwrap();
        assert_eq!(
            handshake,
            json!({ "event": "subscribe", "channel": "meeting-events" })
        );
        assert_eq!(feed.stats.handshakes(), 1);

        // Channel lost: reconnect re-sends the handshake exactly once.
        drop(frames1);
        let (_frames2, mut sent2) = connect(&feed);
        let handshake = sent2.recv().await.unwrap();
        assert_eq!(handshake["event"], "subscribe");
        assert_eq!(feed.stats.connects(), 2);
        assert_eq!(feed.stats.handshakes(), 2);

        feed.shutdown.send(true).unwrap();
    }

    #[tokio::test]
    async fn test_event_delivered_to_active_tab() {
        let feed = start_feed();
        let tab = TabId::new();
        let mut mailbox = feed.router.register(ContextId::Content(tab)).await;
        feed.active_tab.send(Some(tab)).unwrap();

        let (frames, mut sent) = connect(&feed);
        let _handshake = sent.recv().await.unwrap();

        frames
            .send(json!({ "title": "New participant", "content": "Ana joined" }))
            .unwrap();

        let inbound = mailbox.recv().await.unwrap();
        match inbound.envelope {
            Envelope::AddBubble { bubble: Some(bubble) } => {
                assert_eq!(bubble.title, "New participant");
            }
            other => panic!("unexpected envelope: {other:?}"),
        }
        inbound.responder.respond(Reply::Ack);

        feed.shutdown.send(true).unwrap();
    }

    #[tokio::test]
    async fn test_event_without_session_is_dropped() {
        let feed = start_feed();
        let (frames, mut sent) = connect(&feed);
        let _handshake = sent.recv().await.unwrap();

        frames
            .send(json!({ "title": "Chat activity", "content": "hi" }))
            .unwrap();
        frames
            .send(json!({ "not": "a feed event" }))
            .unwrap();

        // Both dropped: no active tab, then malformed.
        tokio::time::timeout(Duration::from_secs(1), async {
            while feed.stats.dropped() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(feed.stats.delivered(), 0);

        feed.shutdown.send(true).unwrap();
    }
}
