//! Background coordinator
//!
//! Process-wide singleton by construction: built once at startup, torn down
//! with the process, and restartable at any time because every durable
//! value lives in the preference store. The coordinator owns install
//! seeding, user-initiated actions (icon, context menu, popup), the
//! periodic sample push, the store cleanup alarm, and the background
//! message loop that serves preference and API envelopes.

use crate::api::ApiProxy;
use bubblekit_core::{
    pref_keys, timestamp_ms, BubbleKitError, BubbleKitResult, CoordinatorConfig, Preferences,
    TabId, TabStatus, WidgetPosition,
};
use bubblekit_store::PreferenceStore;
use bubblekit_transport::{
    ContextId, Envelope, Inbound, Mailbox, Reply, Router, TransportError,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use url::Url;

/// Why the install hook fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallReason {
    Install,
    Update,
}

/// A user-initiated command from the icon, context menu, or popup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAction {
    Toggle,
    AddBubble,
    SetPosition(WidgetPosition),
}

impl UserAction {
    fn into_envelope(self) -> Envelope {
        match self {
            Self::Toggle => Envelope::Toggle,
            Self::AddBubble => Envelope::AddBubble { bubble: None },
            Self::SetPosition(position) => Envelope::UpdatePosition { position },
        }
    }
}

/// What the popup control surface should show for a tab.
#[derive(Debug, Clone, PartialEq)]
pub enum PopupStatus {
    /// Tab is not on the target site: disabled controls plus status text.
    NotApplicable { message: String },
    /// Tab is on the target site.
    Active { status: TabStatus },
}

/// Outcome of clicking the extension icon.
#[derive(Debug, Clone, PartialEq)]
pub enum IconOutcome {
    Toggled { enabled: bool },
    OpenUrl(String),
}

/// Seam for creating a content script in a tab that has none. The real
/// implementation asks the host browser to execute the script; tests and
/// the smoke harness spawn an in-process actor.
pub trait ContentInjector: Send {
    fn inject(&mut self, tab: TabId) -> impl Future<Output = BubbleKitResult<()>> + Send;
}

/// The background coordinator.
pub struct Coordinator<I: ContentInjector> {
    config: Arc<CoordinatorConfig>,
    store: Arc<PreferenceStore>,
    router: Router,
    injector: I,
    api: ApiProxy,
    active_tab: watch::Sender<Option<TabId>>,
}

impl<I: ContentInjector> Coordinator<I> {
    pub fn new(
        config: Arc<CoordinatorConfig>,
        store: Arc<PreferenceStore>,
        router: Router,
        injector: I,
    ) -> BubbleKitResult<Self> {
        let api = ApiProxy::new(config.request_timeout())?;
        let (active_tab, _) = watch::channel(None);
        Ok(Self {
            config,
            store,
            router,
            injector,
            api,
            active_tab,
        })
    }

    /// Where the external feed delivers: the currently focused target-site
    /// tab.
    pub fn active_tab_watch(&self) -> watch::Receiver<Option<TabId>> {
        self.active_tab.subscribe()
    }

    pub fn set_active_tab(&self, tab: Option<TabId>) {
        // send_replace stores the value even while nobody subscribes yet;
        // the feed client may attach after the first tab focus.
        self.active_tab.send_replace(tab);
    }

    /// Install hook. Fresh installs seed defaults (absent keys only, user
    /// values are never overwritten) and return an onboarding URL to open;
    /// updates only log.
    pub async fn on_install(&self, reason: InstallReason) -> BubbleKitResult<Option<String>> {
        match reason {
            InstallReason::Install => {
                self.store.seed_defaults(&Preferences::default()).await?;
                info!("Installed, defaults seeded");
                Ok(Some(self.config.onboarding_url.clone()))
            }
            InstallReason::Update => {
                info!("Updated, no state mutation");
                Ok(None)
            }
        }
    }

    /// Route a user command to the tab's session. A tab without a live
    /// session gets an injection first, then the action is retried exactly
    /// once. Every other failure is returned as-is; the caller must assume
    /// no effect.
    pub async fn handle_user_action(
        &mut self,
        tab: TabId,
        tab_url: &Url,
        action: UserAction,
    ) -> BubbleKitResult<Reply> {
        if !self.config.is_target_url(tab_url) {
            return Err(BubbleKitError::not_applicable(tab_url.as_str()));
        }

        let envelope = action.into_envelope();
        let target = ContextId::Content(tab);
        match self
            .router
            .send(ContextId::Background, target, envelope.clone())
            .await
        {
            Ok(reply) => Ok(reply),
            Err(e @ TransportError::ChannelClosed(_)) => {
                debug!(tab = tab.0, error = %e, "No live session, injecting first");
                self.injector.inject(tab).await?;
                let reply = self
                    .router
                    .send(ContextId::Background, target, envelope)
                    .await?;
                Ok(reply)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Icon activation: toggles on the target site, opens it elsewhere.
    pub async fn handle_icon_click(
        &mut self,
        tab: TabId,
        tab_url: &Url,
    ) -> BubbleKitResult<IconOutcome> {
        if !self.config.is_target_url(tab_url) {
            return Ok(IconOutcome::OpenUrl(self.config.onboarding_url.clone()));
        }
        match self.handle_user_action(tab, tab_url, UserAction::Toggle).await? {
            Reply::Toggled { enabled } => Ok(IconOutcome::Toggled { enabled }),
            Reply::Failure { error } => Err(BubbleKitError::malformed(error)),
            other => Err(BubbleKitError::malformed(format!(
                "unexpected toggle reply: {other:?}"
            ))),
        }
    }

    /// Popup query. Off-site tabs get a disabled state with explanatory
    /// text; on-site tabs without a live session fall back to the persisted
    /// preferences with `injected: false`.
    pub async fn popup_status(&self, tab: TabId, tab_url: &Url) -> PopupStatus {
        if !self.config.is_target_url(tab_url) {
            return PopupStatus::NotApplicable {
                message: format!("Open {} to use the widget", self.config.target_host),
            };
        }

        let sent = self
            .router
            .send(
                ContextId::Background,
                ContextId::Content(tab),
                Envelope::GetStatus,
            )
            .await;
        match sent {
            Ok(Reply::Status { status }) => PopupStatus::Active { status },
            other => {
                debug!(tab = tab.0, outcome = ?other, "Status from store fallback");
                let prefs = self.store.preferences().await;
                PopupStatus::Active {
                    status: TabStatus {
                        enabled: prefs.widget_enabled,
                        injected: false,
                        position: prefs.widget_position,
                    },
                }
            }
        }
    }

    /// Build the long-running background service half. Handles the
    /// background mailbox and both recurring timers; the coordinator itself
    /// stays available for user-initiated calls.
    pub fn background_task(&self) -> BackgroundTask {
        BackgroundTask {
            config: self.config.clone(),
            store: self.store.clone(),
            router: self.router.clone(),
            api: self.api.clone(),
        }
    }
}

/// Background message loop plus the periodic triggers.
pub struct BackgroundTask {
    config: Arc<CoordinatorConfig>,
    store: Arc<PreferenceStore>,
    router: Router,
    api: ApiProxy,
}

impl BackgroundTask {
    /// Serve until `shutdown` flips or the mailbox closes.
    pub async fn run(self, mut mailbox: Mailbox, mut shutdown: watch::Receiver<bool>) {
        // The push cadence is re-read from the store on every arm, so a
        // savePreference of notificationFrequency takes effect one tick
        // later without a restart.
        let samples = tokio::time::sleep(self.sample_period().await);
        tokio::pin!(samples);
        let mut cleanup = tokio::time::interval(self.config.cleanup_interval());
        cleanup.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The interval fires immediately once; swallow that.
        cleanup.tick().await;

        info!("Background coordinator running");
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                inbound = mailbox.recv() => match inbound {
                    Some(inbound) => self.handle(inbound).await,
                    None => break,
                },
                _ = &mut samples => {
                    let pushed = self.push_samples().await;
                    debug!(pushed, "Periodic sample push");
                    let period = self.sample_period().await;
                    samples.as_mut().reset(tokio::time::Instant::now() + period);
                }
                _ = cleanup.tick() => self.run_cleanup().await,
            }
        }
        info!("Background coordinator stopped");
    }

    /// Sample push cadence: the persisted `notificationFrequency`
    /// preference when set, the config interval otherwise.
    async fn sample_period(&self) -> Duration {
        match self
            .store
            .get(pref_keys::NOTIFICATION_FREQUENCY)
            .await
            .and_then(|v| v.as_u64())
        {
            Some(ms) if ms > 0 => Duration::from_millis(ms),
            _ => self.config.notification_interval(),
        }
    }

    async fn handle(&self, inbound: Inbound) {
        let from = inbound.from;
        let reply = match inbound.envelope {
            Envelope::GetPreferences { keys } => Reply::Preferences {
                preferences: self.store.get_keys(&keys).await,
            },
            Envelope::SavePreference { key, value } => {
                match self.store.set(&key, value).await {
                    Ok(()) => Reply::Ack,
                    Err(e) => Reply::failure(BubbleKitError::from(e)),
                }
            }
            Envelope::LogEvent { event, data } => {
                info!(%from, event, %data, "Event logged");
                Reply::Ack
            }
            Envelope::GetApiData { url, options } => {
                // Fetches run detached so a slow origin never stalls the
                // background loop.
                let api = self.api.clone();
                let responder = inbound.responder;
                tokio::spawn(async move {
                    let reply = match api.fetch(&url, &options).await {
                        Ok(data) => Reply::ApiData { data },
                        Err(e) => Reply::failure(e),
                    };
                    responder.respond(reply);
                });
                return;
            }
            other => {
                warn!(%from, action = other.action(), "Envelope not for the background context");
                Reply::failure("not handled by the background context")
            }
        };
        inbound.responder.respond(reply);
    }

    /// Push one sample bubble to every live target-site session. Sessions
    /// that are suspended refuse with a failure reply and are skipped.
    pub async fn push_samples(&self) -> usize {
        if !self.store.widget_enabled().await {
            return 0;
        }
        self.router
            .broadcast(
                ContextId::Background,
                |id| id.is_content(),
                Envelope::AddBubble { bubble: None },
            )
            .await
            .len()
    }

    pub async fn run_cleanup(&self) {
        match self
            .store
            .cleanup_expired(self.config.cleanup_retention(), timestamp_ms())
            .await
        {
            Ok(0) => {}
            Ok(removed) => debug!(removed, "Cleanup removed expired entries"),
            Err(e) => warn!(error = %e, "Cleanup failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bubblekit_core::pref_keys;
    use serde_json::json;
    use std::time::Duration;

    struct NoInjector;

    impl ContentInjector for NoInjector {
        async fn inject(&mut self, _tab: TabId) -> BubbleKitResult<()> {
            Err(BubbleKitError::channel_closed("injection unavailable"))
        }
    }

    fn coordinator() -> Coordinator<NoInjector> {
        let config = Arc::new(CoordinatorConfig {
            request_timeout_ms: 200,
            ..CoordinatorConfig::default()
        });
        let store = Arc::new(PreferenceStore::in_memory());
        let router = Router::new(config.request_timeout());
        Coordinator::new(config, store, router, NoInjector).unwrap()
    }

    #[tokio::test]
    async fn test_install_seeds_absent_keys_only() {
        let coordinator = coordinator();
        coordinator
            .store
            .set(pref_keys::MAX_BUBBLES, json!(3))
            .await
            .unwrap();

        let onboarding = coordinator
            .on_install(InstallReason::Install)
            .await
            .unwrap();
        assert_eq!(onboarding.as_deref(), Some("https://meet.google.com"));

        let prefs = coordinator.store.preferences().await;
        assert_eq!(prefs.max_bubbles, 3, "user value clobbered");
        assert!(prefs.widget_enabled, "default not seeded");

        // Seeding again changes nothing.
        coordinator
            .on_install(InstallReason::Install)
            .await
            .unwrap();
        assert_eq!(coordinator.store.preferences().await.max_bubbles, 3);
    }

    #[tokio::test]
    async fn test_update_mutates_nothing() {
        let coordinator = coordinator();
        let onboarding = coordinator.on_install(InstallReason::Update).await.unwrap();
        assert!(onboarding.is_none());
        assert!(coordinator.store.get(pref_keys::WIDGET_ENABLED).await.is_none());
    }

    #[tokio::test]
    async fn test_action_off_site_is_not_applicable() {
        let mut coordinator = coordinator();
        let url = Url::parse("https://docs.google.com/").unwrap();
        let result = coordinator
            .handle_user_action(TabId::new(), &url, UserAction::Toggle)
            .await;
        assert!(matches!(
            result,
            Err(BubbleKitError::NotApplicablePage(_))
        ));
    }

    #[tokio::test]
    async fn test_icon_click_off_site_opens_target() {
        let mut coordinator = coordinator();
        let url = Url::parse("https://example.com/").unwrap();
        let outcome = coordinator
            .handle_icon_click(TabId::new(), &url)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            IconOutcome::OpenUrl("https://meet.google.com".to_string())
        );
    }

    #[tokio::test]
    async fn test_action_without_session_injects_then_retries_once() {
        struct CountingInjector {
            calls: usize,
        }

        impl ContentInjector for CountingInjector {
            async fn inject(&mut self, _tab: TabId) -> BubbleKitResult<()> {
                self.calls += 1;
                // Injection "succeeds" but never registers a context, so
                // the single retry still fails.
                Ok(())
            }
        }

        let config = Arc::new(CoordinatorConfig {
            request_timeout_ms: 200,
            ..CoordinatorConfig::default()
        });
        let store = Arc::new(PreferenceStore::in_memory());
        let router = Router::new(config.request_timeout());
        let mut coordinator =
            Coordinator::new(config, store, router, CountingInjector { calls: 0 }).unwrap();

        let url = Url::parse("https://meet.google.com/abc").unwrap();
        let result = coordinator
            .handle_user_action(TabId::new(), &url, UserAction::Toggle)
            .await;

        assert!(result.is_err(), "retry without a session must still fail");
        assert_eq!(coordinator.injector.calls, 1, "exactly one injection");
    }

    #[tokio::test]
    async fn test_popup_status_off_site_and_fallback() {
        let coordinator = coordinator();

        let off = Url::parse("https://example.com/").unwrap();
        match coordinator.popup_status(TabId::new(), &off).await {
            PopupStatus::NotApplicable { message } => {
                assert!(message.contains("meet.google.com"))
            }
            other => panic!("unexpected status: {other:?}"),
        }

        // On-site, no session: persisted preferences with injected=false.
        coordinator
            .store
            .set_widget_position(WidgetPosition::TopLeft)
            .await
            .unwrap();
        let on = Url::parse("https://meet.google.com/abc").unwrap();
        match coordinator.popup_status(TabId::new(), &on).await {
            PopupStatus::Active { status } => {
                assert!(!status.injected);
                assert_eq!(status.position, WidgetPosition::TopLeft);
            }
            other => panic!("unexpected status: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_background_serves_preferences_and_rejects_misdirected() {
        let coordinator = coordinator();
        let router = coordinator.router.clone();
        let mailbox = router.register(ContextId::Background).await;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(coordinator.background_task().run(mailbox, shutdown_rx));

        let tab = TabId::new();
        let from = ContextId::Content(tab);
        let reply = router
            .send(
                from,
                ContextId::Background,
                Envelope::SavePreference {
                    key: pref_keys::AUTO_HIDE.to_string(),
                    value: json!(true),
                },
            )
            .await
            .unwrap();
        assert!(matches!(reply, Reply::Ack));

        let reply = router
            .send(
                from,
                ContextId::Background,
                Envelope::GetPreferences {
                    keys: vec![pref_keys::AUTO_HIDE.to_string()],
                },
            )
            .await
            .unwrap();
        match reply {
            Reply::Preferences { preferences } => {
                assert_eq!(preferences[pref_keys::AUTO_HIDE], json!(true))
            }
            other => panic!("unexpected reply: {other:?}"),
        }

        // A tab-directed envelope at the background answers Failure, never
        // crashes the loop.
        let reply = router
            .send(from, ContextId::Background, Envelope::Toggle)
            .await
            .unwrap();
        assert!(reply.is_failure());

        shutdown_tx.send(true).unwrap();
    }

    #[tokio::test]
    async fn test_active_tab_set_before_any_subscriber_is_kept() {
        // Tab focus usually lands before the feed client subscribes; the
        // value must survive the window with zero receivers.
        let coordinator = coordinator();
        let tab = TabId::new();
        coordinator.set_active_tab(Some(tab));

        let watch = coordinator.active_tab_watch();
        assert_eq!(*watch.borrow(), Some(tab));

        coordinator.set_active_tab(None);
        assert_eq!(*coordinator.active_tab_watch().borrow(), None);
    }

    #[tokio::test]
    async fn test_sample_cadence_follows_store_preference() {
        let config = Arc::new(CoordinatorConfig {
            request_timeout_ms: 200,
            notification_interval_ms: 3_600_000,
            ..CoordinatorConfig::default()
        });
        let store = Arc::new(PreferenceStore::in_memory());
        store
            .set(pref_keys::NOTIFICATION_FREQUENCY, json!(25))
            .await
            .unwrap();
        let router = Router::new(config.request_timeout());
        let coordinator =
            Coordinator::new(config, store, router.clone(), NoInjector).unwrap();

        let tab = TabId::new();
        let mut tab_mailbox = router.register(ContextId::Content(tab)).await;
        let background = router.register(ContextId::Background).await;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(coordinator.background_task().run(background, shutdown_rx));

        // The persisted 25 ms cadence wins over the hour-long config value.
        let inbound = tokio::time::timeout(Duration::from_secs(2), tab_mailbox.recv())
            .await
            .expect("no sample push within the preference cadence")
            .expect("mailbox closed");
        assert!(matches!(
            inbound.envelope,
            Envelope::AddBubble { bubble: None }
        ));
        inbound.responder.respond(Reply::Ack);
        shutdown_tx.send(true).unwrap();
    }

    #[tokio::test]
    async fn test_cleanup_preserves_well_known_keys() {
        let coordinator = coordinator();
        let store = &coordinator.store;
        store.seed_defaults(&Preferences::default()).await.unwrap();
        store
            .set("session_1", json!({ "timestamp": 0, "note": "stale" }))
            .await
            .unwrap();

        coordinator.background_task().run_cleanup().await;

        assert!(store.get("session_1").await.is_none());
        assert!(store.get(pref_keys::WIDGET_ENABLED).await.is_some());
    }
}
