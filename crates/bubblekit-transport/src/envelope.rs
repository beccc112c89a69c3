//! Message envelopes and replies
//!
//! One tagged variant per message kind, exhaustively matched at every
//! handler, so adding a message type is a compile-time-checked change. The
//! wire tags match the extension's historical `action` strings.

use bubblekit_core::{Bubble, TabStatus, WidgetConfig, WidgetPosition};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// Options for a proxied API fetch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiOptions {
    pub method: Option<String>,
    pub headers: HashMap<String, String>,
    pub body: Option<JsonValue>,
}

/// A typed message exchanged between contexts over the runtime channel.
///
/// Stateless; carries no ordering information beyond the FIFO order of the
/// single link it travels on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Envelope {
    /// Flip the widget on/off for the receiving tab.
    Toggle,
    /// Query the receiving tab's session status.
    GetStatus,
    /// Move the widget to a corner.
    #[serde(rename_all = "camelCase")]
    UpdatePosition { position: WidgetPosition },
    /// Push a bubble. A missing body asks the producer to generate a
    /// sample.
    #[serde(rename_all = "camelCase")]
    AddBubble { bubble: Option<Bubble> },
    /// Push the full current configuration (sent after every handshake or
    /// reconnection, never as a delta).
    #[serde(rename_all = "camelCase")]
    Configure { config: WidgetConfig },
    /// Diagnostic event forwarded to the background log.
    #[serde(rename_all = "camelCase")]
    LogEvent { event: String, data: JsonValue },
    /// Read preference keys from the store.
    #[serde(rename_all = "camelCase")]
    GetPreferences { keys: Vec<String> },
    /// Write one preference key, last-writer-wins.
    #[serde(rename_all = "camelCase")]
    SavePreference { key: String, value: JsonValue },
    /// Proxy an external API fetch through the background context.
    #[serde(rename_all = "camelCase")]
    GetApiData { url: String, options: ApiOptions },
}

impl Envelope {
    /// Stable tag used in diagnostics.
    pub fn action(&self) -> &'static str {
        match self {
            Self::Toggle => "toggle",
            Self::GetStatus => "getStatus",
            Self::UpdatePosition { .. } => "updatePosition",
            Self::AddBubble { .. } => "addBubble",
            Self::Configure { .. } => "configure",
            Self::LogEvent { .. } => "logEvent",
            Self::GetPreferences { .. } => "getPreferences",
            Self::SavePreference { .. } => "savePreference",
            Self::GetApiData { .. } => "getApiData",
        }
    }
}

/// Structured response to an [`Envelope`].
///
/// Handler errors are converted into [`Reply::Failure`] at the boundary;
/// they never escape and terminate a context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "camelCase")]
pub enum Reply {
    /// Generic success without payload.
    Ack,
    /// `toggle` result with the new enabled state.
    #[serde(rename_all = "camelCase")]
    Toggled { enabled: bool },
    /// `getStatus` result.
    #[serde(rename_all = "camelCase")]
    Status { status: TabStatus },
    /// `getPreferences` result.
    #[serde(rename_all = "camelCase")]
    Preferences {
        preferences: HashMap<String, JsonValue>,
    },
    /// `getApiData` result.
    #[serde(rename_all = "camelCase")]
    ApiData { data: JsonValue },
    /// Structured failure. The message is user-presentable status text.
    #[serde(rename_all = "camelCase")]
    Failure { error: String },
}

impl Reply {
    pub fn failure(error: impl std::fmt::Display) -> Self {
        Self::Failure {
            error: error.to_string(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_wire_tags() {
        let toggle = serde_json::to_value(&Envelope::Toggle).unwrap();
        assert_eq!(toggle, json!({ "action": "toggle" }));

        let status = serde_json::to_value(&Envelope::GetStatus).unwrap();
        assert_eq!(status, json!({ "action": "getStatus" }));

        let update = serde_json::to_value(&Envelope::UpdatePosition {
            position: WidgetPosition::TopLeft,
        })
        .unwrap();
        assert_eq!(
            update,
            json!({ "action": "updatePosition", "position": "top-left" })
        );
    }

    #[test]
    fn test_save_preference_round_trip() {
        let wire = json!({
            "action": "savePreference",
            "key": "widgetEnabled",
            "value": false,
        });
        let envelope: Envelope = serde_json::from_value(wire).unwrap();
        match envelope {
            Envelope::SavePreference { ref key, ref value } => {
                assert_eq!(key, "widgetEnabled");
                assert_eq!(value, &json!(false));
            }
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_action_fails_decode() {
        let wire = json!({ "action": "selfDestruct" });
        assert!(serde_json::from_value::<Envelope>(wire).is_err());
    }

    #[test]
    fn test_api_options_defaults() {
        let options: ApiOptions = serde_json::from_value(json!({})).unwrap();
        assert!(options.method.is_none());
        assert!(options.headers.is_empty());
    }
}
