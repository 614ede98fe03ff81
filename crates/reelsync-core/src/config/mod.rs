//! Runtime configuration for replicas.
//!
//! `SyncSettings` tunes the scheduler and broadcast layer; `RemoteConfig`
//! locates the remote authority. Both read overrides from the process
//! environment and fall back to built-in defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::util::{compact_text, is_http_url, normalize_text_option};
use crate::{Error, Result};

pub const DEFAULT_DEBOUNCE_MS: u64 = 2_000;
pub const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_SUCCESS_DISPLAY_MS: u64 = 1_500;
pub const DEFAULT_TOMBSTONE_RETENTION_DAYS: u32 = 30;
pub const DEFAULT_CHANNEL_NAME: &str = "watchlist-sync";
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;

const MS_PER_DAY: i64 = 24 * 60 * 60 * 1_000;

/// Scheduler and broadcast tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Quiet period that coalesces bursts of local edits into one pass
    pub debounce: Duration,
    /// Upper bound on any single call to the remote authority
    pub remote_timeout: Duration,
    /// How long `Success` is shown before returning to `Idle`
    pub success_display: Duration,
    /// Age after which synced tombstones are garbage collected
    pub tombstone_retention_days: u32,
    /// Broadcast topic shared by replicas of one origin
    pub channel_name: String,
    /// Interval for polling remote subscriptions
    pub poll_interval: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            remote_timeout: Duration::from_secs(DEFAULT_REMOTE_TIMEOUT_SECS),
            success_display: Duration::from_millis(DEFAULT_SUCCESS_DISPLAY_MS),
            tombstone_retention_days: DEFAULT_TOMBSTONE_RETENTION_DAYS,
            channel_name: DEFAULT_CHANNEL_NAME.to_string(),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
        }
    }
}

impl SyncSettings {
    /// Defaults overlaid with `REELSYNC_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut settings = Self::default();
        let read = |key: &str| normalize_text_option(lookup(key));

        if let Some(raw) = read("REELSYNC_DEBOUNCE_MS") {
            settings.debounce = Duration::from_millis(parse_number("REELSYNC_DEBOUNCE_MS", &raw)?);
        }
        if let Some(raw) = read("REELSYNC_REMOTE_TIMEOUT_SECS") {
            let secs: u64 = parse_number("REELSYNC_REMOTE_TIMEOUT_SECS", &raw)?;
            if secs == 0 {
                return Err(Error::InvalidInput(
                    "REELSYNC_REMOTE_TIMEOUT_SECS must be greater than zero".to_string(),
                ));
            }
            settings.remote_timeout = Duration::from_secs(secs);
        }
        if let Some(raw) = read("REELSYNC_TOMBSTONE_RETENTION_DAYS") {
            settings.tombstone_retention_days =
                parse_number("REELSYNC_TOMBSTONE_RETENTION_DAYS", &raw)?;
        }
        if let Some(channel) = read("REELSYNC_CHANNEL") {
            settings.channel_name = channel;
        }

        Ok(settings)
    }

    /// Oldest `lastModified` a synced tombstone may carry and survive GC.
    pub fn tombstone_cutoff(&self, now: i64) -> i64 {
        now.saturating_sub(i64::from(self.tombstone_retention_days).saturating_mul(MS_PER_DAY))
    }
}

/// Location and credentials of the remote authority.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub owner_id: Option<String>,
}

impl std::fmt::Debug for RemoteConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RemoteConfig")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("owner_id", &self.owner_id)
            .finish()
    }
}

impl RemoteConfig {
    /// Build a config, validating and normalizing the base URL.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        Ok(Self {
            base_url,
            token: None,
            owner_id: None,
        })
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = normalize_text_option(Some(token.into()));
        self
    }

    #[must_use]
    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = normalize_text_option(Some(owner_id.into()));
        self
    }

    /// Read `REELSYNC_REMOTE_URL`, `REELSYNC_REMOTE_TOKEN` and `REELSYNC_OWNER`.
    ///
    /// Returns `Ok(None)` when no remote URL is configured (local-only mode).
    pub fn from_env() -> Result<Option<Self>> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Option<Self>> {
        let Some(base_url) = normalize_text_option(lookup("REELSYNC_REMOTE_URL")) else {
            return Ok(None);
        };

        let mut config = Self::new(base_url)?;
        config.token = normalize_text_option(lookup("REELSYNC_REMOTE_TOKEN"));
        config.owner_id = normalize_text_option(lookup("REELSYNC_OWNER"));
        Ok(Some(config))
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.parse::<T>().map_err(|_| {
        Error::InvalidInput(format!(
            "{key} must be a non-negative integer, got `{}`",
            compact_text(raw)
        ))
    })
}

fn normalize_base_url(raw: String) -> Result<String> {
    let url = normalize_text_option(Some(raw))
        .ok_or_else(|| Error::InvalidInput("remote URL must not be empty".to_string()))?;
    if is_http_url(&url) {
        Ok(url.trim_end_matches('/').to_string())
    } else {
        Err(Error::InvalidInput(format!(
            "remote URL must include http:// or https://, got `{}`",
            compact_text(&url)
        )))
    }
}
