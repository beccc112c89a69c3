//! Content script actor
//!
//! Single-threaded event loop for one tab, multiplexing four sources:
//!
//! ```text
//!   router mailbox ──┐
//!   navigation feed ─┤
//!   debounce timers ─┼──► ContentScript::run ──► WidgetSession
//!   frame link ──────┘
//! ```
//!
//! SPA URL changes are debounced with a generation counter: every change
//! bumps the generation and spawns a delayed token, and only a token whose
//! generation is still current triggers a probe. Navigating off the target
//! site removes the session and unregisters the context, ending the loop.

use crate::session::{SessionState, WidgetSession};
use bubblekit_transport::{
    ApiOptions, ContextId, Envelope, FrameMessage, Inbound, Mailbox, Reply, Router,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

enum Event {
    Inbound(Option<Inbound>),
    Navigated(Option<Url>),
    ProbeDue(u64),
    Frame(Option<FrameMessage>),
}

/// Per-tab actor driving a [`WidgetSession`] from the tab's event sources.
pub struct ContentScript {
    session: WidgetSession,
    mailbox: Mailbox,
    router: Router,
    nav_rx: mpsc::UnboundedReceiver<Url>,
    probe_tx: mpsc::UnboundedSender<u64>,
    probe_rx: mpsc::UnboundedReceiver<u64>,
    nav_generation: u64,
}

impl ContentScript {
    pub fn new(
        session: WidgetSession,
        mailbox: Mailbox,
        router: Router,
        nav_rx: mpsc::UnboundedReceiver<Url>,
    ) -> Self {
        let (probe_tx, probe_rx) = mpsc::unbounded_channel();
        Self {
            session,
            mailbox,
            router,
            nav_rx,
            probe_tx,
            probe_rx,
            nav_generation: 0,
        }
    }

    pub fn session(&self) -> &WidgetSession {
        &self.session
    }

    /// Run until the tab goes away. The initial probe happens immediately;
    /// the actor exists because a page finished loading.
    pub async fn run(mut self) {
        let tab = self.session.tab_id();
        info!(tab = tab.0, "Content script started");

        if let Err(e) = self.session.probe().await {
            warn!(tab = tab.0, error = %e, "Initial probe failed");
        }

        // A closed mailbox means the registration was replaced or removed
        // by someone else (page reload); unregistering then would tear down
        // the replacement.
        let mut deregister = true;
        loop {
            // Branches only wrap their result; all mutation happens in the
            // match below, where `self` is free again.
            let event = tokio::select! {
                inbound = self.mailbox.recv() => Event::Inbound(inbound),
                url = self.nav_rx.recv() => Event::Navigated(url),
                generation = self.probe_rx.recv() => {
                    // probe_tx is held by self, so recv never yields None.
                    match generation {
                        Some(generation) => Event::ProbeDue(generation),
                        None => continue,
                    }
                }
                message = frame_recv(&mut self.session) => Event::Frame(message),
            };

            match event {
                Event::Inbound(Some(inbound)) => self.handle_inbound(inbound).await,
                Event::Inbound(None) => {
                    debug!(tab = tab.0, "Mailbox closed, stopping");
                    deregister = false;
                    break;
                }
                Event::Navigated(Some(url)) => {
                    if self.handle_navigation(url) {
                        break;
                    }
                }
                Event::Navigated(None) => {
                    debug!(tab = tab.0, "Navigation source closed, stopping");
                    break;
                }
                Event::ProbeDue(generation) => {
                    if generation == self.nav_generation {
                        if let Err(e) = self.session.probe().await {
                            warn!(tab = tab.0, error = %e, "Probe failed");
                        }
                    }
                }
                Event::Frame(Some(message)) => self.handle_frame(message).await,
                Event::Frame(None) => self.session.on_frame_closed(),
            }
        }

        self.session.remove();
        if deregister {
            self.router.unregister(ContextId::Content(tab)).await;
        }
        info!(tab = tab.0, "Content script stopped");
    }

    async fn handle_inbound(&mut self, inbound: Inbound) {
        match self.session.handle_envelope(inbound.envelope).await {
            Some(reply) => inbound.responder.respond(reply),
            // Removed session: drop silently, sender observes NoResponse.
            None => inbound.responder.decline(),
        }
    }

    /// Returns `true` when the tab left the target site and the actor
    /// should stop.
    fn handle_navigation(&mut self, url: Url) -> bool {
        if self.session.state() == SessionState::Removed {
            return true;
        }
        debug!(tab = self.session.tab_id().0, %url, "Navigation detected");

        // The probe re-reads the URL itself, so the debounce only has to
        // coalesce bursts, not track the final destination.
        self.nav_generation += 1;
        let generation = self.nav_generation;
        let probe_tx = self.probe_tx.clone();
        let debounce = self.session.config().spa_debounce();
        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            let _ = probe_tx.send(generation);
        });
        false
    }

    async fn handle_frame(&mut self, message: FrameMessage) {
        match message {
            FrameMessage::WidgetReady => {
                // Frame recreated behind our back; re-push configuration.
                self.session.reconfigure_frame().await;
            }
            FrameMessage::WidgetInteraction { payload } => {
                // Best effort: interaction logs never block the frame.
                let result = self
                    .router
                    .send(
                        ContextId::Content(self.session.tab_id()),
                        ContextId::Background,
                        Envelope::LogEvent {
                            event: "widget_interaction".to_string(),
                            data: payload,
                        },
                    )
                    .await;
                if let Err(e) = result {
                    debug!(error = %e, "Interaction log dropped");
                }
            }
            FrameMessage::ApiRequest {
                url,
                method,
                headers,
                body,
                request_id,
            } => {
                let reply = self
                    .router
                    .send(
                        ContextId::Content(self.session.tab_id()),
                        ContextId::Background,
                        Envelope::GetApiData {
                            url,
                            options: ApiOptions {
                                method,
                                headers,
                                body,
                            },
                        },
                    )
                    .await;
                let answer = match reply {
                    Ok(Reply::ApiData { data }) => {
                        FrameMessage::ApiResponse { request_id, data }
                    }
                    Ok(Reply::Failure { error }) => {
                        FrameMessage::ApiError { request_id, error }
                    }
                    Ok(other) => {
                        warn!(reply = ?other, "Unexpected API reply shape");
                        FrameMessage::ApiError {
                            request_id,
                            error: "malformed reply".to_string(),
                        }
                    }
                    Err(e) => FrameMessage::ApiError {
                        request_id,
                        error: e.to_string(),
                    },
                };
                if let Some(frame) = self.session.frame_mut() {
                    frame.post(answer);
                }
            }
            other => {
                debug!(kind = other.kind(), "Content-bound frame kind ignored");
            }
        }
    }
}

/// Pending forever while no frame is mounted, so the select loop never busy
/// spins on a missing link.
async fn frame_recv(session: &mut WidgetSession) -> Option<FrameMessage> {
    match session.frame_mut() {
        Some(link) => link.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::{HostPage, Rect};
    use crate::session::WidgetHost;
    use bubblekit_core::{BubbleKitResult, CoordinatorConfig, TabId};
    use bubblekit_store::PreferenceStore;
    use bubblekit_transport::FrameLink;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct SharedPage {
        url: Arc<Mutex<Url>>,
    }

    impl HostPage for SharedPage {
        fn current_url(&self) -> Url {
            self.url.lock().unwrap().clone()
        }

        fn viewport(&self) -> Rect {
            Rect {
                x: 0.0,
                y: 0.0,
                width: 1280.0,
                height: 720.0,
            }
        }

        fn anchor_rect(&self, _selector: &str) -> Option<Rect> {
            None
        }
    }

    /// Host handing the frame end of each mounted link to the test.
    struct CapturingHost {
        frames: mpsc::UnboundedSender<FrameLink>,
    }

    impl WidgetHost for CapturingHost {
        fn mount_frame(&mut self, _tab: TabId) -> BubbleKitResult<FrameLink> {
            let (content_end, frame_end) = FrameLink::pair();
            frame_end.post(FrameMessage::WidgetReady);
            let _ = self.frames.send(frame_end);
            Ok(content_end)
        }

        fn unmount_frame(&mut self, _tab: TabId) {}
    }

    struct Harness {
        router: Router,
        tab: TabId,
        nav_tx: mpsc::UnboundedSender<Url>,
        frames: mpsc::UnboundedReceiver<FrameLink>,
        url: Arc<Mutex<Url>>,
    }

    impl Harness {
        /// Next mounted frame, with the handshake CONFIGURE consumed.
        async fn mounted_frame(&mut self) -> FrameLink {
            let mut frame = self.frames.recv().await.unwrap();
            match frame.recv().await.unwrap() {
                FrameMessage::Configure { .. } => frame,
                other => panic!("expected CONFIGURE, got {other:?}"),
            }
        }
    }

    async fn spawn_content(initial_url: &str) -> Harness {
        let config = Arc::new(CoordinatorConfig {
            request_timeout_ms: 500,
            spa_debounce_ms: 20,
            ..CoordinatorConfig::default()
        });
        let router = Router::new(config.request_timeout());
        let tab = TabId::new();
        let url = Arc::new(Mutex::new(Url::parse(initial_url).unwrap()));
        let (frame_tx, frames) = mpsc::unbounded_channel();
        let (nav_tx, nav_rx) = mpsc::unbounded_channel();

        let session = WidgetSession::new(
            tab,
            Arc::new(PreferenceStore::in_memory()),
            config,
            Box::new(CapturingHost { frames: frame_tx }),
            Box::new(SharedPage { url: url.clone() }),
        );
        let mailbox = router.register(ContextId::Content(tab)).await;
        let script = ContentScript::new(session, mailbox, router.clone(), nav_rx);
        tokio::spawn(script.run());

        Harness {
            router,
            tab,
            nav_tx,
            frames,
            url,
        }
    }

    #[tokio::test]
    async fn test_initial_probe_and_status_round_trip() {
        let mut harness = spawn_content("https://meet.google.com/abc-defg-hij").await;

        // Initial probe mounts one frame.
        let _frame = harness.mounted_frame().await;

        let reply = harness
            .router
            .send(
                ContextId::Background,
                ContextId::Content(harness.tab),
                Envelope::GetStatus,
            )
            .await
            .unwrap();
        match reply {
            Reply::Status { status } => {
                assert!(status.enabled);
                assert!(status.injected);
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_navigation_burst_probes_once() {
        let mut harness = spawn_content("https://meet.google.com/a").await;
        let _first = harness.mounted_frame().await;

        // Burst of SPA changes within the debounce window.
        for room in ["b", "c", "d"] {
            let url = Url::parse(&format!("https://meet.google.com/{room}")).unwrap();
            *harness.url.lock().unwrap() = url.clone();
            harness.nav_tx.send(url).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(120)).await;

        // The session was already injected, so the single debounced probe
        // is a no-op: no second frame is mounted.
        assert!(harness.frames.try_recv().is_err());
        let reply = harness
            .router
            .send(
                ContextId::Background,
                ContextId::Content(harness.tab),
                Envelope::GetStatus,
            )
            .await
            .unwrap();
        assert!(matches!(reply, Reply::Status { status } if status.injected));
    }

    #[tokio::test]
    async fn test_navigating_off_site_tears_down() {
        let mut harness = spawn_content("https://meet.google.com/a").await;
        let _frame = harness.mounted_frame().await;

        let away = Url::parse("https://docs.google.com/").unwrap();
        *harness.url.lock().unwrap() = away.clone();
        harness.nav_tx.send(away).unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;

        // Context unregistered: sends now fail with ChannelClosed.
        let result = harness
            .router
            .send(
                ContextId::Background,
                ContextId::Content(harness.tab),
                Envelope::GetStatus,
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_api_request_proxied_to_background() {
        let mut harness = spawn_content("https://meet.google.com/a").await;
        let mut frame = harness.mounted_frame().await;

        // Stand-in background answering getApiData.
        let mut background = harness.router.register(ContextId::Background).await;
        tokio::spawn(async move {
            while let Some(inbound) = background.recv().await {
                match inbound.envelope {
                    Envelope::GetApiData { url, .. } => {
                        inbound.responder.respond(Reply::ApiData {
                            data: json!({ "echo": url }),
                        });
                    }
                    _ => inbound.responder.respond(Reply::Ack),
                }
            }
        });

        frame.post(FrameMessage::ApiRequest {
            url: "https://api.example.com/v1/meeting".to_string(),
            method: Some("GET".to_string()),
            headers: Default::default(),
            body: None,
            request_id: 42,
        });

        match frame.recv().await.unwrap() {
            FrameMessage::ApiResponse { request_id, data } => {
                assert_eq!(request_id, 42);
                assert_eq!(data, json!({ "echo": "https://api.example.com/v1/meeting" }));
            }
            other => panic!("unexpected frame message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_api_request_failure_reported_as_error() {
        let mut harness = spawn_content("https://meet.google.com/a").await;
        let mut frame = harness.mounted_frame().await;

        // No background registered: the proxied send fails fast and the
        // frame gets API_ERROR instead of hanging.
        frame.post(FrameMessage::ApiRequest {
            url: "https://api.example.com/v1/meeting".to_string(),
            method: None,
            headers: Default::default(),
            body: None,
            request_id: 7,
        });

        match frame.recv().await.unwrap() {
            FrameMessage::ApiError { request_id, .. } => assert_eq!(request_id, 7),
            other => panic!("unexpected frame message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_toggle_through_router() {
        let mut harness = spawn_content("https://meet.google.com/a").await;
        let _frame = harness.mounted_frame().await;

        let reply = harness
            .router
            .send(
                ContextId::Background,
                ContextId::Content(harness.tab),
                Envelope::Toggle,
            )
            .await
            .unwrap();
        assert!(matches!(reply, Reply::Toggled { enabled: false }));

        let reply = harness
            .router
            .send(
                ContextId::Background,
                ContextId::Content(harness.tab),
                Envelope::Toggle,
            )
            .await
            .unwrap();
        assert!(matches!(reply, Reply::Toggled { enabled: true }));

        // Re-enable mounted a fresh frame.
        assert!(harness.frames.recv().await.is_some());
    }
}
