//! Runtime tunables for the command bus and the query processor, and the
//! embedder's overrides of the dashboard configuration slice.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::{ConfigState, Separators};

/// Configuration for the command bus actor.
///
/// Pass to [`DashboardBuilder::bus_config`](crate::DashboardBuilder::bus_config)
/// to customize.
///
/// # Examples
///
/// ```
/// use dashboard_model::BusConfig;
///
/// let config = BusConfig {
///     emit_command_started: true,
///     ..BusConfig::default()
/// };
/// assert_eq!(config.queue_capacity, 64);
/// assert!(config.emit_command_started);
/// ```
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Capacity of the command queue.
    ///
    /// `dispatch` waits for room once the queue is full; `try_dispatch`
    /// fails with `QueueFull` instead.
    ///
    /// Default: 64.
    pub queue_capacity: usize,

    /// Capacity of the broadcast channel behind `Dashboard::events`.
    ///
    /// Stream consumers that fall further behind skip events. Synchronous
    /// handlers registered with `on` are unaffected.
    ///
    /// Default: 256.
    pub event_buffer: usize,

    /// Emit a `commandStarted` event before each command is validated.
    ///
    /// Default: `false`.
    pub emit_command_started: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            event_buffer: 256,
            emit_command_started: false,
        }
    }
}

/// Configuration for the query processor cache.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use dashboard_model::QueryConfig;
///
/// let config = QueryConfig {
///     error_ttl: Some(Duration::from_secs(30)),
///     ..QueryConfig::default()
/// };
/// assert_eq!(config.eviction_grace, Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// How long a settled entry survives once its last subscriber leaves.
    ///
    /// A subscriber arriving within the grace period reuses the cached
    /// result. Zero evicts immediately.
    ///
    /// Default: 5 seconds.
    pub eviction_grace: Duration,

    /// How long a failed result is served to new subscribers.
    ///
    /// `None` never caches errors: the next subscriber after a failure
    /// re-issues the query. A cached failure outlives a shorter
    /// `eviction_grace`.
    ///
    /// Default: `None`.
    pub error_ttl: Option<Duration>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            eviction_grace: Duration::from_secs(5),
            error_ttl: None,
        }
    }
}

/// Embedder-supplied overrides applied on top of the backend's dashboard
/// configuration on every load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigOverrides {
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub separators: Option<Separators>,
    #[serde(default)]
    pub is_read_only: Option<bool>,
    #[serde(default)]
    pub mapbox_token: Option<String>,
    #[serde(default)]
    pub date_format: Option<String>,
    /// Merged into the backend settings; keys present here win.
    #[serde(default)]
    pub settings: BTreeMap<String, Value>,
}

impl ConfigOverrides {
    pub(crate) fn apply(&self, config: &mut ConfigState) {
        if let Some(locale) = &self.locale {
            config.locale.clone_from(locale);
        }
        if let Some(separators) = &self.separators {
            config.separators = separators.clone();
        }
        if let Some(read_only) = self.is_read_only {
            config.is_read_only = read_only;
        }
        if let Some(token) = &self.mapbox_token {
            config.mapbox_token = Some(token.clone());
        }
        if let Some(format) = &self.date_format {
            config.date_format.clone_from(format);
        }
        for (key, value) in &self.settings {
            config.settings.insert(key.clone(), value.clone());
        }
    }
}
