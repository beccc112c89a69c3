//! Coordinator configuration
//!
//! Fixed timings live here rather than in the preference store: the SPA
//! debounce, feed reconnect delay, and cleanup cadence are deliberately not
//! user-configurable.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Process-wide configuration for the coordination layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Host of the target web application
    pub target_host: String,

    /// Opened on first install and when the icon is clicked off-site
    pub onboarding_url: String,

    /// Bound on cross-context request/response round trips, in milliseconds
    pub request_timeout_ms: u64,

    /// Fixed delay after a detected SPA URL change before re-probing
    /// injection state, in milliseconds
    pub spa_debounce_ms: u64,

    /// Fixed delay between external feed reconnect attempts, in
    /// milliseconds. Never exponential.
    pub feed_reconnect_delay_ms: u64,

    /// Channel name sent in the feed subscription handshake
    pub feed_channel: String,

    /// Interval of the periodic sample-bubble trigger, in milliseconds
    pub notification_interval_ms: u64,

    /// Interval of the store cleanup alarm, in milliseconds
    pub cleanup_interval_ms: u64,

    /// Retention window for timestamped store entries, in milliseconds
    pub cleanup_retention_ms: u64,

    /// Delay before a loading placeholder settles into final content, in
    /// milliseconds
    pub settle_delay_ms: u64,

    /// Margin between the widget and its anchor's bounding box, in pixels
    pub anchor_margin_px: f64,

    /// Preference store file; `None` keeps the store in memory only
    pub store_path: Option<PathBuf>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            target_host: "meet.google.com".to_string(),
            onboarding_url: "https://meet.google.com".to_string(),
            request_timeout_ms: 2_000,
            spa_debounce_ms: 1_000,
            feed_reconnect_delay_ms: 5_000,
            feed_channel: "meeting-events".to_string(),
            notification_interval_ms: 120_000,
            cleanup_interval_ms: 60 * 60 * 1_000,
            cleanup_retention_ms: 24 * 60 * 60 * 1_000,
            settle_delay_ms: 2_000,
            anchor_margin_px: 16.0,
            store_path: default_store_path(),
        }
    }
}

fn default_store_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("bubblekit").join("preferences.json"))
}

impl CoordinatorConfig {
    /// Whether a URL belongs to the target web application.
    pub fn is_target_url(&self, url: &Url) -> bool {
        url.host_str() == Some(self.target_host.as_str())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn spa_debounce(&self) -> Duration {
        Duration::from_millis(self.spa_debounce_ms)
    }

    pub fn feed_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.feed_reconnect_delay_ms)
    }

    pub fn notification_interval(&self) -> Duration {
        Duration::from_millis(self.notification_interval_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    pub fn cleanup_retention(&self) -> Duration {
        Duration::from_millis(self.cleanup_retention_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_url_matching() {
        let config = CoordinatorConfig::default();
        let meet = Url::parse("https://meet.google.com/abc-defg-hij").unwrap();
        let docs = Url::parse("https://docs.google.com/").unwrap();
        assert!(config.is_target_url(&meet));
        assert!(!config.is_target_url(&docs));
    }

    #[test]
    fn test_fixed_delays() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.spa_debounce(), Duration::from_secs(1));
        assert_eq!(config.cleanup_retention(), Duration::from_secs(24 * 3600));
    }
}
