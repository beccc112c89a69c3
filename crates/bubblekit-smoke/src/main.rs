//! BubbleKit Smoke Harness
//!
//! Runs the whole coordination stack in one process: a background
//! coordinator, content script actors, and widget frames wired through one
//! router, plus a scripted external feed. Three scenarios are exercised in
//! sequence (lifecycle, capacity churn, feed drop/reconnect) and a JSON
//! summary is printed on stdout.

use bubblekit_coordinator::{
    ContentInjector, Coordinator, FeedClient, InstallReason, PopupStatus, UserAction,
};
use bubblekit_core::{BubbleKitResult, CoordinatorConfig, TabId};
use bubblekit_session::{ContentScript, HostPage, Rect, WidgetHost, WidgetSession};
use bubblekit_store::PreferenceStore;
use bubblekit_transport::{
    ContextId, FeedConnection, FeedError, FeedSocket, FrameLink, Reply, Router,
};
use bubblekit_widget::{RecordingSurface, SurfaceOp, WidgetFrame};
use serde_json::{json, Value as JsonValue};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use url::Url;

/// Parse command line arguments
struct Args {
    bubbles: usize,
    summary_output: Option<String>,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut bubbles = 8usize;
        let mut summary_output = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--bubbles" => {
                    if let Some(val) = args.next() {
                        bubbles = val.parse().unwrap_or(8);
                    }
                }
                "--summary-output" => {
                    summary_output = args.next();
                }
                _ => {}
            }
        }

        Self {
            bubbles,
            summary_output,
        }
    }
}

struct StaticPage {
    url: Url,
}

impl HostPage for StaticPage {
    fn current_url(&self) -> Url {
        self.url.clone()
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

/// Host that mounts a real widget frame actor and records every surface
/// operation it performs.
struct RecordingHost {
    settle: Duration,
    surfaces: Arc<Mutex<Vec<RecordingSurface>>>,
}

impl WidgetHost for RecordingHost {
    fn mount_frame(&mut self, tab: TabId) -> BubbleKitResult<FrameLink> {
        let (content_end, frame_end) = FrameLink::pair();
        let surface = RecordingSurface::new();
        if let Ok(mut surfaces) = self.surfaces.lock() {
            surfaces.push(surface.clone());
        }
        info!(tab = tab.0, "Mounting widget frame");
        let frame = WidgetFrame::new(frame_end, Box::new(surface), self.settle);
        tokio::spawn(frame.run());
        Ok(content_end)
    }

    fn unmount_frame(&mut self, tab: TabId) {
        info!(tab = tab.0, "Unmounting widget frame");
    }
}

struct ScriptInjector {
    router: Router,
    store: Arc<PreferenceStore>,
    config: Arc<CoordinatorConfig>,
    page_url: Url,
    surfaces: Arc<Mutex<Vec<RecordingSurface>>>,
    injections: Arc<Mutex<usize>>,
    nav_handles: Vec<mpsc::UnboundedSender<Url>>,
}

impl ContentInjector for ScriptInjector {
    async fn inject(&mut self, tab: TabId) -> BubbleKitResult<()> {
        if let Ok(mut count) = self.injections.lock() {
            *count += 1;
        }
        let session = WidgetSession::new(
            tab,
            self.store.clone(),
            self.config.clone(),
            Box::new(RecordingHost {
                settle: self.config.settle_delay(),
                surfaces: self.surfaces.clone(),
            }),
            Box::new(StaticPage {
                url: self.page_url.clone(),
            }),
        );
        let mailbox = self.router.register(ContextId::Content(tab)).await;
        let (nav_tx, nav_rx) = mpsc::unbounded_channel();
        self.nav_handles.push(nav_tx);
        tokio::spawn(ContentScript::new(session, mailbox, self.router.clone(), nav_rx).run());
        Ok(())
    }
}

struct ScriptedConn {
    handshakes: mpsc::UnboundedSender<JsonValue>,
    frames: mpsc::UnboundedReceiver<JsonValue>,
}

impl FeedConnection for ScriptedConn {
    async fn send(&mut self, frame: JsonValue) -> Result<(), FeedError> {
        self.handshakes
            .send(frame)
            .map_err(|_| FeedError::ChannelLost("observer gone".to_string()))
    }

    async fn next(&mut self) -> Option<JsonValue> {
        self.frames.recv().await
    }
}

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

struct Harness {
    coordinator: Coordinator<ScriptInjector>,
    router: Router,
    store: Arc<PreferenceStore>,
    config: Arc<CoordinatorConfig>,
    surfaces: Arc<Mutex<Vec<RecordingSurface>>>,
    injections: Arc<Mutex<usize>>,
    page_url: Url,
}

impl Harness {
    fn new() -> anyhow::Result<Self> {
        let config = Arc::new(CoordinatorConfig {
            request_timeout_ms: 1_000,
            spa_debounce_ms: 50,
            feed_reconnect_delay_ms: 50,
            settle_delay_ms: 50,
            notification_interval_ms: 60_000,
            store_path: None,
            ..CoordinatorConfig::default()
        });
        let store = Arc::new(PreferenceStore::in_memory());
        let router = Router::new(config.request_timeout());
        let page_url = Url::parse("https://meet.google.com/abc-defg-hij")?;
        let surfaces = Arc::new(Mutex::new(Vec::new()));
        let injections = Arc::new(Mutex::new(0));

        let injector = ScriptInjector {
            router: router.clone(),
            store: store.clone(),
            config: config.clone(),
            page_url: page_url.clone(),
            surfaces: surfaces.clone(),
            injections: injections.clone(),
            nav_handles: Vec::new(),
        };
        let coordinator =
            Coordinator::new(config.clone(), store.clone(), router.clone(), injector)?;

        Ok(Self {
            coordinator,
            router,
            store,
            config,
            surfaces,
            injections,
            page_url,
        })
    }

    fn injections(&self) -> usize {
        self.injections.lock().map(|count| *count).unwrap_or(0)
    }

    fn surface_ops(&self) -> Vec<SurfaceOp> {
        self.surfaces
            .lock()
            .map(|surfaces| surfaces.iter().flat_map(|s| s.ops()).collect())
            .unwrap_or_default()
    }
}

/// Install, inject, toggle off and on, and query the popup along the way.
async fn run_lifecycle(harness: &mut Harness) -> anyhow::Result<JsonValue> {
    let url = harness.page_url.clone();
    let tab = TabId::new();

    let onboarding = harness.coordinator.on_install(InstallReason::Install).await?;

    let reply = harness
        .coordinator
        .handle_user_action(tab, &url, UserAction::AddBubble)
        .await?;
    anyhow::ensure!(matches!(reply, Reply::Ack), "first action not acked: {reply:?}");
    anyhow::ensure!(harness.injections() == 1, "expected one injection");

    let injected = match harness.coordinator.popup_status(tab, &url).await {
        PopupStatus::Active { status } => status.injected,
        PopupStatus::NotApplicable { message } => anyhow::bail!("popup disabled: {message}"),
    };
    anyhow::ensure!(injected, "popup does not see the injected session");

    let reply = harness
        .coordinator
        .handle_user_action(tab, &url, UserAction::Toggle)
        .await?;
    anyhow::ensure!(
        matches!(reply, Reply::Toggled { enabled: false }),
        "toggle off failed: {reply:?}"
    );
    anyhow::ensure!(
        !harness.store.widget_enabled().await,
        "disabled state not persisted"
    );

    let reply = harness
        .coordinator
        .handle_user_action(tab, &url, UserAction::Toggle)
        .await?;
    anyhow::ensure!(
        matches!(reply, Reply::Toggled { enabled: true }),
        "toggle on failed: {reply:?}"
    );

    // Off-site tab: disabled popup, icon click opens the target site.
    let away = Url::parse("https://docs.google.com/")?;
    let off_site_ok = matches!(
        harness.coordinator.popup_status(TabId::new(), &away).await,
        PopupStatus::NotApplicable { .. }
    );

    Ok(json!({
        "onboarding_url": onboarding,
        "injections": harness.injections(),
        "off_site_popup_disabled": off_site_ok,
    }))
}

/// Push more bubbles than the queue holds and count surface churn.
async fn run_capacity_churn(harness: &mut Harness, bubbles: usize) -> anyhow::Result<JsonValue> {
    let url = harness.page_url.clone();
    let tab = TabId::new();

    for _ in 0..bubbles {
        let reply = harness
            .coordinator
            .handle_user_action(tab, &url, UserAction::AddBubble)
            .await?;
        anyhow::ensure!(!reply.is_failure(), "add bubble refused: {reply:?}");
    }
    // Let the settle timers fire.
    tokio::time::sleep(harness.config.settle_delay() * 3).await;

    let ops = harness.surface_ops();
    let renders = ops.iter().filter(|op| matches!(op, SurfaceOp::Render(_))).count();
    let removes = ops.iter().filter(|op| matches!(op, SurfaceOp::Remove(_))).count();
    let updates = ops.iter().filter(|op| matches!(op, SurfaceOp::Update(_))).count();

    anyhow::ensure!(renders >= bubbles, "missing renders: {renders} < {bubbles}");
    let max = bubblekit_core::Preferences::default().max_bubbles as usize;
    anyhow::ensure!(
        removes >= bubbles.saturating_sub(max),
        "capacity eviction did not reach the surface"
    );

    Ok(json!({
        "bubbles_pushed": bubbles,
        "renders": renders,
        "evictions": removes,
        "settled": updates,
    }))
}

/// Drop and re-establish the feed; the handshake count must track the
/// connect count exactly.
async fn run_feed_cycle(harness: &mut Harness) -> anyhow::Result<JsonValue> {
    let url = harness.page_url.clone();
    let tab = TabId::new();
    harness
        .coordinator
        .handle_user_action(tab, &url, UserAction::AddBubble)
        .await?;
    harness.coordinator.set_active_tab(Some(tab));

    let (supply, connections) = mpsc::unbounded_channel();
    let client = FeedClient::new(
        ScriptedSocket { connections },
        harness.router.clone(),
        harness.config.clone(),
        harness.coordinator.active_tab_watch(),
    );
    let stats = client.stats();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(client.run(shutdown_rx));

    let cycle = |event: JsonValue| -> anyhow::Result<(
        mpsc::UnboundedSender<JsonValue>,
        mpsc::UnboundedReceiver<JsonValue>,
        JsonValue,
    )> {
        let (handshake_tx, handshake_rx) = mpsc::unbounded_channel();
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        supply
            .send(ScriptedConn {
                handshakes: handshake_tx,
                frames: frame_rx,
            })
            .map_err(|_| anyhow::anyhow!("feed client gone"))?;
        Ok((frame_tx, handshake_rx, event))
    };

    // First connection: handshake, one event, then loss.
    let (frames, mut handshakes, event) =
        cycle(json!({ "title": "New participant", "content": "Ana joined" }))?;
    let handshake = handshakes
        .recv()
        .await
        .ok_or_else(|| anyhow::anyhow!("no handshake on first connect"))?;
    anyhow::ensure!(handshake["event"] == "subscribe", "bad handshake: {handshake}");
    frames.send(event)?;
    wait_for(|| stats.delivered() >= 1).await?;
    drop(frames);

    // Reconnect: exactly one more handshake, then another event.
    let (frames, mut handshakes, event) =
        cycle(json!({ "title": "Screen sharing", "content": "Deck is live" }))?;
    handshakes
        .recv()
        .await
        .ok_or_else(|| anyhow::anyhow!("no handshake on reconnect"))?;
    frames.send(event)?;
    wait_for(|| stats.delivered() >= 2).await?;

    anyhow::ensure!(stats.connects() == 2, "connects: {}", stats.connects());
    anyhow::ensure!(
        stats.handshakes() == stats.connects(),
        "handshakes diverged from connects"
    );

    shutdown_tx.send(true)?;
    Ok(json!({
        "connects": stats.connects(),
        "handshakes": stats.handshakes(),
        "delivered": stats.delivered(),
        "dropped": stats.dropped(),
    }))
}

async fn wait_for(mut done: impl FnMut() -> bool) -> anyhow::Result<()> {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .map_err(|_| anyhow::anyhow!("condition not reached in time"))
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    info!(bubbles = args.bubbles, "Starting BubbleKit smoke harness");
    let start = Instant::now();

    let result = run(&args).await;
    let summary = match result {
        Ok(scenarios) => json!({
            "status": "pass",
            "elapsed_ms": start.elapsed().as_millis(),
            "scenarios": scenarios,
        }),
        Err(e) => {
            error!(error = %e, "Smoke harness failed");
            json!({
                "status": "fail",
                "elapsed_ms": start.elapsed().as_millis(),
                "reason": e.to_string(),
            })
        }
    };

    if let Some(path) = &args.summary_output {
        if let Err(e) = std::fs::write(path, summary.to_string()) {
            error!(error = %e, path, "Failed to write summary");
        }
    }
    println!("{summary}");

    if summary["status"] != "pass" {
        std::process::exit(1);
    }
}

async fn run(args: &Args) -> anyhow::Result<JsonValue> {
    let mut harness = Harness::new()?;

    // Background context serving preferences, logs, and API fetches.
    let mailbox = harness.router.register(ContextId::Background).await;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(harness.coordinator.background_task().run(mailbox, shutdown_rx));

    let lifecycle = run_lifecycle(&mut harness).await?;
    info!("Lifecycle scenario passed");
    let churn = run_capacity_churn(&mut harness, args.bubbles).await?;
    info!("Capacity churn scenario passed");
    let feed = run_feed_cycle(&mut harness).await?;
    info!("Feed cycle scenario passed");

    shutdown_tx.send(true)?;
    Ok(json!({
        "lifecycle": lifecycle,
        "capacity_churn": churn,
        "feed_cycle": feed,
    }))
}
