//! Common types used throughout BubbleKit

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Unique identifier for a browser tab
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TabId(pub u64);

/// Unique identifier for a bubble. Unique within the process lifetime of
/// the owning queue (monotonic counter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BubbleId(pub u64);

impl TabId {
    pub fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl BubbleId {
    pub fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for TabId {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for BubbleId {
    fn default() -> Self {
        Self::new()
    }
}

/// Current time in milliseconds since the Unix epoch
pub fn timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Widget screen corner, the fallback placement when no anchor element is
/// available. Serialized as the persisted preference values
/// (`"bottom-right"` etc.).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WidgetPosition {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl Default for WidgetPosition {
    fn default() -> Self {
        Self::BottomRight
    }
}

impl WidgetPosition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TopLeft => "top-left",
            Self::TopRight => "top-right",
            Self::BottomLeft => "bottom-left",
            Self::BottomRight => "bottom-right",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "top-left" => Some(Self::TopLeft),
            "top-right" => Some(Self::TopRight),
            "bottom-left" => Some(Self::BottomLeft),
            "bottom-right" => Some(Self::BottomRight),
            _ => None,
        }
    }
}

/// Notification priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

/// Display state of a bubble. A bubble may be enqueued as a loading
/// placeholder and settled in place later, keeping its id and position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BubbleState {
    Loading,
    Settled,
}

/// A single notification unit displayed by the UI layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bubble {
    pub id: BubbleId,
    pub title: String,
    pub content: String,
    pub full_description: String,
    pub priority: Priority,
    /// Milliseconds since the Unix epoch
    pub created_at: u64,
    pub state: BubbleState,
}

impl Bubble {
    /// Create a settled bubble with final content.
    pub fn new(
        title: impl Into<String>,
        content: impl Into<String>,
        full_description: impl Into<String>,
        priority: Priority,
    ) -> Self {
        Self {
            id: BubbleId::new(),
            title: title.into(),
            content: content.into(),
            full_description: full_description.into(),
            priority,
            created_at: timestamp_ms(),
            state: BubbleState::Settled,
        }
    }

    /// Create a loading placeholder shown immediately while the real
    /// content is resolved asynchronously.
    pub fn placeholder(title: impl Into<String>, priority: Priority) -> Self {
        Self {
            id: BubbleId::new(),
            title: title.into(),
            content: String::new(),
            full_description: String::new(),
            priority,
            created_at: timestamp_ms(),
            state: BubbleState::Loading,
        }
    }
}

/// Well-known preference store keys
pub mod pref_keys {
    pub const WIDGET_ENABLED: &str = "widgetEnabled";
    pub const WIDGET_POSITION: &str = "widgetPosition";
    pub const MAX_BUBBLES: &str = "maxBubbles";
    pub const AUTO_HIDE: &str = "autoHide";
    pub const NOTIFICATION_FREQUENCY: &str = "notificationFrequency";

    /// Keys the cleanup pass must never remove.
    pub const WELL_KNOWN: &[&str] = &[
        WIDGET_ENABLED,
        WIDGET_POSITION,
        MAX_BUBBLES,
        AUTO_HIDE,
        NOTIFICATION_FREQUENCY,
    ];
}

/// The process-wide preference record. Physically a flat key-value map in
/// the store; this struct is the typed view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    pub widget_enabled: bool,
    pub widget_position: WidgetPosition,
    pub max_bubbles: u32,
    pub auto_hide: bool,
    /// Interval for automatic sample notifications, in milliseconds
    pub notification_frequency_ms: u64,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            widget_enabled: true,
            widget_position: WidgetPosition::BottomRight,
            max_bubbles: 5,
            auto_hide: false,
            notification_frequency_ms: 120_000,
        }
    }
}

impl Preferences {
    /// Flatten into store keys (last-writer-wins per key).
    pub fn to_map(&self) -> HashMap<String, JsonValue> {
        let mut map = HashMap::new();
        map.insert(
            pref_keys::WIDGET_ENABLED.to_string(),
            JsonValue::Bool(self.widget_enabled),
        );
        map.insert(
            pref_keys::WIDGET_POSITION.to_string(),
            JsonValue::String(self.widget_position.as_str().to_string()),
        );
        map.insert(
            pref_keys::MAX_BUBBLES.to_string(),
            JsonValue::from(self.max_bubbles),
        );
        map.insert(
            pref_keys::AUTO_HIDE.to_string(),
            JsonValue::Bool(self.auto_hide),
        );
        map.insert(
            pref_keys::NOTIFICATION_FREQUENCY.to_string(),
            JsonValue::from(self.notification_frequency_ms),
        );
        map
    }

    /// Rebuild from store keys, falling back to defaults for missing or
    /// malformed values.
    pub fn from_map(map: &HashMap<String, JsonValue>) -> Self {
        let defaults = Self::default();
        Self {
            widget_enabled: map
                .get(pref_keys::WIDGET_ENABLED)
                .and_then(JsonValue::as_bool)
                .unwrap_or(defaults.widget_enabled),
            widget_position: map
                .get(pref_keys::WIDGET_POSITION)
                .and_then(JsonValue::as_str)
                .and_then(WidgetPosition::parse)
                .unwrap_or(defaults.widget_position),
            max_bubbles: map
                .get(pref_keys::MAX_BUBBLES)
                .and_then(JsonValue::as_u64)
                .map(|n| n as u32)
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_bubbles),
            auto_hide: map
                .get(pref_keys::AUTO_HIDE)
                .and_then(JsonValue::as_bool)
                .unwrap_or(defaults.auto_hide),
            notification_frequency_ms: map
                .get(pref_keys::NOTIFICATION_FREQUENCY)
                .and_then(JsonValue::as_u64)
                .unwrap_or(defaults.notification_frequency_ms),
        }
    }
}

/// Configuration pushed to the widget frame on handshake and after any
/// reconnection. Always the full current configuration, never a delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidgetConfig {
    pub position: WidgetPosition,
    pub max_bubbles: u32,
    pub auto_hide: bool,
}

impl From<&Preferences> for WidgetConfig {
    fn from(prefs: &Preferences) -> Self {
        Self {
            position: prefs.widget_position,
            max_bubbles: prefs.max_bubbles,
            auto_hide: prefs.auto_hide,
        }
    }
}

/// Reply to a `getStatus` query
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TabStatus {
    pub enabled: bool,
    pub injected: bool,
    pub position: WidgetPosition,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_round_trip() {
        for pos in [
            WidgetPosition::TopLeft,
            WidgetPosition::TopRight,
            WidgetPosition::BottomLeft,
            WidgetPosition::BottomRight,
        ] {
            assert_eq!(WidgetPosition::parse(pos.as_str()), Some(pos));
        }
        assert_eq!(WidgetPosition::parse("center"), None);
    }

    #[test]
    fn test_position_serde_matches_store_values() {
        let json = serde_json::to_value(WidgetPosition::TopLeft).unwrap();
        assert_eq!(json, serde_json::json!("top-left"));
    }

    #[test]
    fn test_bubble_ids_unique() {
        let a = Bubble::new("a", "b", "c", Priority::Low);
        let b = Bubble::new("a", "b", "c", Priority::Low);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_preferences_map_round_trip() {
        let prefs = Preferences {
            widget_enabled: false,
            widget_position: WidgetPosition::TopRight,
            max_bubbles: 8,
            auto_hide: true,
            notification_frequency_ms: 60_000,
        };
        assert_eq!(Preferences::from_map(&prefs.to_map()), prefs);
    }

    #[test]
    fn test_preferences_from_partial_map() {
        let mut map = HashMap::new();
        map.insert(
            pref_keys::WIDGET_ENABLED.to_string(),
            JsonValue::Bool(false),
        );
        let prefs = Preferences::from_map(&map);
        assert!(!prefs.widget_enabled);
        assert_eq!(prefs.max_bubbles, 5);
        assert_eq!(prefs.widget_position, WidgetPosition::BottomRight);
    }

    #[test]
    fn test_zero_max_bubbles_rejected() {
        let mut map = HashMap::new();
        map.insert(pref_keys::MAX_BUBBLES.to_string(), JsonValue::from(0u32));
        assert_eq!(Preferences::from_map(&map).max_bubbles, 5);
    }
}
