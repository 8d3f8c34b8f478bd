use std::time::Duration;

use chrono::{FixedOffset, Local, Offset};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Top-level config (reposter.toml + REPOSTER_* env overrides).
///
/// Nested keys are addressed with a double underscore in the environment,
/// e.g. `REPOSTER_SCHEDULER__MAX_WORKERS=8`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReposterConfig {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Bot API base URL override (self-hosted Bot API server).
    pub api_url: Option<String>,
    /// Remove the "message pinned" service notice after auto-pin.
    #[serde(default = "bool_true")]
    pub clean_pin_notifications: bool,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_url: None,
            clean_pin_notifications: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// What the due check concludes when the history lookup itself fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryErrorPolicy {
    /// Treat the group as due; the materializer still dedups in-flight work.
    #[default]
    FailOpen,
    /// Treat the group as not due until history can be read again.
    FailClosed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between due-check ticks.
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    /// Seconds between dispatch ticks. Must not exceed `check_interval_secs`.
    #[serde(default = "default_dispatch_interval")]
    pub dispatch_interval_secs: u64,
    /// Upper bound on concurrent deliveries.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    /// Delay before a failed record becomes due again.
    #[serde(default = "default_retry_interval")]
    pub retry_interval_secs: u64,
    /// Number of recent records the due check inspects.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    #[serde(default)]
    pub on_history_error: HistoryErrorPolicy,
    /// Wall-clock offset for time points and calendar days.
    /// Defaults to the host's local offset at startup.
    pub utc_offset_minutes: Option<i32>,
    /// Delay after each dispatched record.
    #[serde(default = "default_pace_delay")]
    pub pace_delay_ms: u64,
    /// Every `burst_size`-th dispatch waits `burst_pause_ms` instead.
    #[serde(default = "default_burst_size")]
    pub burst_size: usize,
    #[serde(default = "default_burst_pause")]
    pub burst_pause_ms: u64,
    /// Delay between channels of a manual send.
    #[serde(default = "default_manual_pace")]
    pub manual_pace_ms: u64,
    /// How long a finished manual operation keeps its group claimed.
    #[serde(default = "default_manual_grace")]
    pub manual_grace_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval(),
            dispatch_interval_secs: default_dispatch_interval(),
            max_workers: default_max_workers(),
            max_retry_attempts: default_max_retry_attempts(),
            retry_interval_secs: default_retry_interval(),
            history_window: default_history_window(),
            on_history_error: HistoryErrorPolicy::default(),
            utc_offset_minutes: None,
            pace_delay_ms: default_pace_delay(),
            burst_size: default_burst_size(),
            burst_pause_ms: default_burst_pause(),
            manual_pace_ms: default_manual_pace(),
            manual_grace_ms: default_manual_grace(),
        }
    }
}

impl SchedulerConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_secs(self.dispatch_interval_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    /// Resolve the configured offset, falling back to the host's local one.
    pub fn utc_offset(&self) -> FixedOffset {
        self.utc_offset_minutes
            .and_then(|m| FixedOffset::east_opt(m.saturating_mul(60)))
            .unwrap_or_else(|| Local::now().offset().fix())
    }

    fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(CoreError::Config(format!("scheduler: {msg}")));
        if self.check_interval_secs == 0 || self.dispatch_interval_secs == 0 {
            return fail("intervals must be at least one second");
        }
        if self.dispatch_interval_secs > self.check_interval_secs {
            return fail("dispatch_interval_secs must not exceed check_interval_secs");
        }
        if self.max_workers == 0 {
            return fail("max_workers must be at least 1");
        }
        if self.burst_size == 0 {
            return fail("burst_size must be at least 1");
        }
        if self.history_window == 0 {
            return fail("history_window must be at least 1");
        }
        if let Some(m) = self.utc_offset_minutes {
            if m.abs() >= 24 * 60 {
                return fail("utc_offset_minutes must be within +/- 23:59");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default level for reposter crates when RUST_LOG is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.reposter/reposter.db", home)
}
fn default_check_interval() -> u64 {
    60
}
fn default_dispatch_interval() -> u64 {
    10
}
fn default_max_workers() -> usize {
    5
}
fn default_max_retry_attempts() -> u32 {
    3
}
fn default_retry_interval() -> u64 {
    300
}
fn default_history_window() -> usize {
    50
}
fn default_pace_delay() -> u64 {
    200
}
fn default_burst_size() -> usize {
    5
}
fn default_burst_pause() -> u64 {
    2000
}
fn default_manual_pace() -> u64 {
    400
}
fn default_manual_grace() -> u64 {
    1000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl ReposterConfig {
    /// Load config from a TOML file with REPOSTER_* env var overrides.
    ///
    /// Uses the explicit path when given, otherwise `~/.reposter/reposter.toml`.
    /// A missing file is not an error; every section has defaults.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: ReposterConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("REPOSTER_").split("__"))
            .extract()
            .map_err(|e| CoreError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.scheduler.validate()
    }

    /// Fails with a config error unless a bot token is present.
    pub fn require_bot_token(&self) -> Result<&str> {
        let token = self.telegram.bot_token.trim();
        if token.is_empty() {
            return Err(CoreError::Config(
                "telegram.bot_token is required".to_string(),
            ));
        }
        Ok(token)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.reposter/reposter.toml", home)
}
