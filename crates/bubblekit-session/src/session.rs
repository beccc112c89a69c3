//! Per-tab widget session state machine
//!
//! One session per browser tab. States:
//!
//! ```text
//! Absent ──► Probing ──► Injected ◄──► Suspended
//!    │          │            │             │
//!    └──────────┴────────────┴─────────────┴──► Removed (terminal)
//! ```
//!
//! Probing re-reads the preference store, then checks a process-local
//! injected marker so redundant navigation events cannot double-inject.
//! Suspension destroys the UI surface; re-enabling is a full re-injection
//! and the bubble queue starts empty by design.

use crate::position::{
    anchored_origin, corner_origin, AnchorHandle, HostPage, Point, WIDGET_SIZE,
};
use bubblekit_core::{
    Bubble, BubbleKitError, BubbleKitResult, CoordinatorConfig, Preferences, TabId, TabStatus,
    WidgetConfig, WidgetPosition,
};
use bubblekit_store::PreferenceStore;
use bubblekit_transport::{Envelope, FrameLink, FrameMessage, Reply};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Mounting seam: what the content script does to the host DOM. The
/// returned link is the content-script end; the implementation owns
/// spawning whatever sits at the frame end.
pub trait WidgetHost: Send + Sync {
    fn mount_frame(&mut self, tab: TabId) -> BubbleKitResult<FrameLink>;
    fn unmount_frame(&mut self, tab: TabId);
}

/// Lifecycle state of one tab session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No widget; default on tab creation.
    Absent,
    /// Re-checking preferences and injection state after a navigation
    /// event.
    Probing,
    /// UI surface mounted and configured.
    Injected,
    /// Disabled by the user; surface destroyed, preference persisted.
    Suspended,
    /// Tab closed or navigated off the target site. Terminal; messages to
    /// a removed session are silently dropped.
    Removed,
}

/// Widget lifecycle manager for a single tab.
pub struct WidgetSession {
    tab_id: TabId,
    state: SessionState,
    enabled: bool,
    position: WidgetPosition,
    store: Arc<PreferenceStore>,
    config: Arc<CoordinatorConfig>,
    host: Box<dyn WidgetHost>,
    page: Box<dyn HostPage>,
    frame: Option<FrameLink>,
    anchor: Option<AnchorHandle>,
}

impl WidgetSession {
    pub fn new(
        tab_id: TabId,
        store: Arc<PreferenceStore>,
        config: Arc<CoordinatorConfig>,
        host: Box<dyn WidgetHost>,
        page: Box<dyn HostPage>,
    ) -> Self {
        Self {
            tab_id,
            state: SessionState::Absent,
            enabled: true,
            position: WidgetPosition::default(),
            store,
            config,
            host,
            page,
            frame: None,
            anchor: None,
        }
    }

    pub fn tab_id(&self) -> TabId {
        self.tab_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn status(&self) -> TabStatus {
        TabStatus {
            enabled: self.enabled,
            injected: self.state == SessionState::Injected,
            position: self.position,
        }
    }

    /// Use a host-page element as the position anchor.
    pub fn set_anchor(&mut self, selector: impl Into<String>) {
        self.anchor = Some(AnchorHandle::new(selector));
    }

    pub fn frame_mut(&mut self) -> Option<&mut FrameLink> {
        self.frame.as_mut()
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Navigation-complete (or debounced SPA change) entry point.
    /// Idempotent: probing an already-injected session is a detected no-op
    /// via the process-local marker, not a round trip.
    pub async fn probe(&mut self) -> BubbleKitResult<()> {
        if self.state == SessionState::Removed {
            return Ok(());
        }

        let url = self.page.current_url();
        if !self.config.is_target_url(&url) {
            debug!(tab = self.tab_id.0, %url, "Probe on non-target page, removing session");
            self.remove();
            return Ok(());
        }

        self.state = SessionState::Probing;
        let prefs = self.store.preferences().await;
        self.enabled = prefs.widget_enabled;
        self.position = prefs.widget_position;

        if !prefs.widget_enabled {
            if self.frame.is_some() {
                self.unmount();
            }
            self.state = SessionState::Suspended;
            debug!(tab = self.tab_id.0, "Probe found widget disabled, suspending");
            return Ok(());
        }

        if self.frame.as_ref().is_some_and(|link| !link.is_closed()) {
            // Already injected; redundant event, no mutation.
            self.state = SessionState::Injected;
            debug!(tab = self.tab_id.0, "Probe found surface already present");
            return Ok(());
        }

        self.inject(&prefs).await
    }

    /// Mount the frame and complete the ready/configure handshake.
    async fn inject(&mut self, prefs: &Preferences) -> BubbleKitResult<()> {
        let mut link = self.host.mount_frame(self.tab_id)?;

        let timeout = self.config.request_timeout();
        let ready = tokio::time::timeout(timeout, async {
            while let Some(message) = link.recv().await {
                match message {
                    FrameMessage::WidgetReady => return true,
                    other => {
                        debug!(kind = other.kind(), "Frame message before ready ignored")
                    }
                }
            }
            false
        })
        .await;

        match ready {
            Ok(true) => {
                link.post(FrameMessage::Configure {
                    config: WidgetConfig::from(prefs),
                });
                self.frame = Some(link);
                self.state = SessionState::Injected;
                info!(tab = self.tab_id.0, "Widget injected");
                Ok(())
            }
            Ok(false) => {
                self.host.unmount_frame(self.tab_id);
                self.state = SessionState::Absent;
                Err(BubbleKitError::channel_closed("frame closed before ready"))
            }
            Err(_) => {
                self.host.unmount_frame(self.tab_id);
                self.state = SessionState::Absent;
                Err(BubbleKitError::Timeout(timeout))
            }
        }
    }

    /// Flip the widget on or off. Returns the new enabled state.
    pub async fn toggle(&mut self) -> BubbleKitResult<bool> {
        match self.state {
            SessionState::Removed => {
                Err(BubbleKitError::channel_closed("session removed"))
            }
            SessionState::Injected => {
                self.unmount();
                self.state = SessionState::Suspended;
                self.enabled = false;
                self.persist_enabled(false).await;
                info!(tab = self.tab_id.0, "Widget suspended");
                Ok(false)
            }
            _ => {
                self.enabled = true;
                self.persist_enabled(true).await;
                let prefs = Preferences {
                    widget_enabled: true,
                    ..self.store.preferences().await
                };
                self.position = prefs.widget_position;
                self.inject(&prefs).await?;
                Ok(true)
            }
        }
    }

    /// Move the widget to a corner; persisted and forwarded to the frame.
    pub async fn update_position(&mut self, position: WidgetPosition) {
        self.position = position;
        if let Err(e) = self.store.set_widget_position(position).await {
            warn!(error = %e, "Position not persisted, prior value kept in store");
        }
        if let Some(frame) = &self.frame {
            frame.post(FrameMessage::UpdatePosition { position });
        }
    }

    /// Push a bubble to the frame; `None` asks the frame for a sample.
    pub fn add_bubble(&mut self, bubble: Option<Bubble>) -> BubbleKitResult<()> {
        let SessionState::Injected = self.state else {
            return Err(BubbleKitError::not_applicable("widget is disabled"));
        };
        match &self.frame {
            Some(frame) if frame.post(FrameMessage::AddBubble { bubble }) => Ok(()),
            _ => Err(BubbleKitError::channel_closed("frame gone")),
        }
    }

    /// Late `WIDGET_READY` (frame recreated behind our back): re-send the
    /// full current configuration rather than assuming prior state.
    pub async fn reconfigure_frame(&mut self) {
        let prefs = self.store.preferences().await;
        self.position = prefs.widget_position;
        if let Some(frame) = &self.frame {
            frame.post(FrameMessage::Configure {
                config: WidgetConfig::from(&prefs),
            });
        }
    }

    /// The frame link died without an unmount (frame crash, host page
    /// tore the iframe out). Drop the marker so the next probe re-injects.
    pub fn on_frame_closed(&mut self) {
        if self.frame.take().is_some() {
            warn!(tab = self.tab_id.0, "Frame link closed unexpectedly");
            if self.state == SessionState::Injected {
                self.state = SessionState::Absent;
            }
        }
    }

    /// Tab closed or navigated away. Terminal.
    pub fn remove(&mut self) {
        if self.state == SessionState::Removed {
            return;
        }
        if self.frame.is_some() {
            self.unmount();
        }
        self.state = SessionState::Removed;
        info!(tab = self.tab_id.0, "Session removed");
    }

    fn unmount(&mut self) {
        self.frame = None;
        self.host.unmount_frame(self.tab_id);
    }

    async fn persist_enabled(&self, enabled: bool) {
        if let Err(e) = self.store.set_widget_enabled(enabled).await {
            warn!(error = %e, "Enabled flag not persisted, prior value kept in store");
        }
    }

    /// Current widget origin: anchor-relative when the anchor resolves,
    /// corner fallback otherwise. Resolution is lazy; a vanished anchor is
    /// retried on the next call, never polled.
    pub fn widget_origin(&mut self) -> Point {
        let margin = self.config.anchor_margin_px;
        if let Some(anchor) = &mut self.anchor {
            if let Some(rect) = anchor.resolve(self.page.as_ref()) {
                return anchored_origin(rect, WIDGET_SIZE, margin);
            }
        }
        corner_origin(self.page.viewport(), WIDGET_SIZE, self.position, margin)
    }

    /// Handle one envelope addressed to this tab. `None` means the session
    /// is removed and the message is silently dropped (the sender sees
    /// `NoResponse`, not an error reply).
    pub async fn handle_envelope(&mut self, envelope: Envelope) -> Option<Reply> {
        if self.state == SessionState::Removed {
            debug!(tab = self.tab_id.0, action = envelope.action(), "Dropped for removed session");
            return None;
        }

        let reply = match envelope {
            Envelope::Toggle => match self.toggle().await {
                Ok(enabled) => Reply::Toggled { enabled },
                Err(e) => Reply::failure(e),
            },
            Envelope::GetStatus => {
                // Re-read the store so writes from other contexts are
                // visible within one round trip.
                let prefs = self.store.preferences().await;
                self.enabled = prefs.widget_enabled;
                self.position = prefs.widget_position;
                Reply::Status {
                    status: self.status(),
                }
            }
            Envelope::UpdatePosition { position } => {
                self.update_position(position).await;
                Reply::Ack
            }
            Envelope::AddBubble { bubble } => match self.add_bubble(bubble) {
                Ok(()) => Reply::Ack,
                Err(e) => Reply::failure(e),
            },
            Envelope::Configure { config } => {
                self.position = config.position;
                if let Some(frame) = &self.frame {
                    frame.post(FrameMessage::Configure { config });
                }
                Reply::Ack
            }
            Envelope::LogEvent { event, data } => {
                debug!(tab = self.tab_id.0, event, %data, "Widget event");
                Reply::Ack
            }
            Envelope::GetPreferences { keys } => Reply::Preferences {
                preferences: self.store.get_keys(&keys).await,
            },
            Envelope::SavePreference { key, value } => {
                match self.store.set(&key, value).await {
                    Ok(()) => Reply::Ack,
                    Err(e) => Reply::failure(BubbleKitError::from(e)),
                }
            }
            Envelope::GetApiData { .. } => {
                Reply::failure("API fetches are proxied by the background context")
            }
        };
        Some(reply)
    }
}
