//! # BubbleKit Preference Store
//!
//! Durable key-value preference map shared by every context. Flat JSON
//! values, last-writer-wins per key, no transactions and no versioning —
//! concurrent writers from different contexts are resolved by whichever
//! write lands last.
//!
//! Persistence is a single JSON document written through a temp file and
//! rename. A failed write leaves the prior value in effect; there are no
//! partial writes.

use bubblekit_core::types::pref_keys;
use bubblekit_core::{BubbleKitError, Preferences, WidgetPosition};
use hashbrown::HashMap;
use serde_json::Value as JsonValue;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Preference store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Write failed: {0}")]
    Write(String),

    #[error("Corrupt store file: {0}")]
    Corrupt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for BubbleKitError {
    fn from(err: StoreError) -> Self {
        BubbleKitError::StoreWrite(err.to_string())
    }
}

/// Shared preference store. Cheap to clone handles via `Arc` at call sites;
/// all methods take `&self`.
#[derive(Debug)]
pub struct PreferenceStore {
    entries: RwLock<HashMap<String, JsonValue>>,
    path: Option<PathBuf>,
}

impl PreferenceStore {
    /// In-memory store, used by tests and the smoke harness.
    pub fn in_memory() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            path: None,
        }
    }

    /// File-backed store. Loads the existing document when present; a
    /// missing file is an empty store, a corrupt file is an error so the
    /// caller can decide whether to discard user data.
    pub fn with_file(path: PathBuf) -> Result<Self, StoreError> {
        let entries = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str::<HashMap<String, JsonValue>>(&contents)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        info!(?path, keys = entries.len(), "Preference store loaded");
        Ok(Self {
            entries: RwLock::new(entries),
            path: Some(path),
        })
    }

    /// Read a single key.
    pub async fn get(&self, key: &str) -> Option<JsonValue> {
        self.entries.read().await.get(key).cloned()
    }

    /// Read several keys at once (the `getPreferences` message). Missing
    /// keys are simply absent from the reply.
    pub async fn get_keys(
        &self,
        keys: &[String],
    ) -> std::collections::HashMap<String, JsonValue> {
        let entries = self.entries.read().await;
        keys.iter()
            .filter_map(|k| entries.get(k).map(|v| (k.clone(), v.clone())))
            .collect()
    }

    /// Write a single key, last-writer-wins. On persistence failure the
    /// in-memory map is rolled back so readers keep seeing the prior value.
    pub async fn set(&self, key: &str, value: JsonValue) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        let prior = entries.insert(key.to_string(), value);

        if let Err(e) = self.persist(&entries) {
            warn!(key, error = %e, "Store write failed, keeping prior value");
            match prior {
                Some(v) => {
                    entries.insert(key.to_string(), v);
                }
                None => {
                    entries.remove(key);
                }
            }
            return Err(e);
        }

        debug!(key, "Preference saved");
        Ok(())
    }

    /// Remove a key. Removal of an absent key is a no-op.
    pub async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        if let Some(prior) = entries.remove(key) {
            if let Err(e) = self.persist(&entries) {
                entries.insert(key.to_string(), prior);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Seed defaults for keys that are absent. Never overwrites an existing
    /// value, so repeated installs and extension updates keep user
    /// preferences intact.
    pub async fn seed_defaults(&self, defaults: &Preferences) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        let mut seeded = 0usize;
        for (key, value) in defaults.to_map() {
            if !entries.contains_key(&key) {
                entries.insert(key, value);
                seeded += 1;
            }
        }
        if seeded > 0 {
            self.persist(&entries)?;
            info!(seeded, "Seeded default preferences");
        }
        Ok(())
    }

    /// Typed view of the current preference record.
    pub async fn preferences(&self) -> Preferences {
        let entries = self.entries.read().await;
        let map: std::collections::HashMap<String, JsonValue> =
            entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        Preferences::from_map(&map)
    }

    pub async fn widget_enabled(&self) -> bool {
        self.preferences().await.widget_enabled
    }

    pub async fn set_widget_enabled(&self, enabled: bool) -> Result<(), StoreError> {
        self.set(pref_keys::WIDGET_ENABLED, JsonValue::Bool(enabled))
            .await
    }

    pub async fn widget_position(&self) -> WidgetPosition {
        self.preferences().await.widget_position
    }

    pub async fn set_widget_position(&self, position: WidgetPosition) -> Result<(), StoreError> {
        self.set(
            pref_keys::WIDGET_POSITION,
            JsonValue::String(position.as_str().to_string()),
        )
        .await
    }

    /// Remove entries whose value object carries a `timestamp` field older
    /// than the retention window. Well-known preference keys are never
    /// removed, whatever their shape.
    pub async fn cleanup_expired(
        &self,
        retention: Duration,
        now_ms: u64,
    ) -> Result<usize, StoreError> {
        let cutoff = now_ms.saturating_sub(retention.as_millis() as u64);
        let mut entries = self.entries.write().await;

        let expired: Vec<String> = entries
            .iter()
            .filter(|(key, value)| {
                if pref_keys::WELL_KNOWN.contains(&key.as_str()) {
                    return false;
                }
                value
                    .get("timestamp")
                    .and_then(JsonValue::as_u64)
                    .is_some_and(|ts| ts < cutoff)
            })
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            entries.remove(key);
        }

        if !expired.is_empty() {
            self.persist(&entries)?;
            info!(removed = expired.len(), "Expired store entries removed");
        }
        Ok(expired.len())
    }

    fn persist(&self, entries: &HashMap<String, JsonValue>) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(entries)
            .map_err(|e| StoreError::Write(e.to_string()))?;

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}
