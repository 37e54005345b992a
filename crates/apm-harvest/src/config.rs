// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Agent configuration snapshot.
//!
//! An [`AgentConfig`] is never mutated once published. Updates build a new
//! snapshot and swap it in wholesale through [`ConfigWatch`], so readers
//! always see a consistent view.
//!
//! # Environment variables
//!
//! [`AgentConfig::from_env`] reads `APM_*` variables. Unparseable values fall
//! back to their defaults, except the log level which must be known.
//!
//! Per telemetry kind (`{KIND}` is e.g. `TRANSACTION_EVENTS`):
//! - `APM_{KIND}_ENABLED`
//! - `APM_{KIND}_HARVEST_INTERVAL_SECS`
//! - `APM_{KIND}_MAX_SAMPLES_STORED`

use std::env;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use apm_sampling::{SamplerConfig, SamplerSettings, SamplerType};
use serde::{Deserialize, Deserializer};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::HarvestError;

pub const DEFAULT_HARVEST_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);
pub const DEFAULT_SEND_DATA_ON_EXIT_THRESHOLD: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_SQL_TRACES_PER_HARVEST: usize = 10;

const ENV_PREFIX: &str = "APM_";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryKind {
    TransactionEvents,
    CustomEvents,
    ErrorEvents,
    SpanEvents,
    LogEvents,
    Metrics,
    SqlTraces,
}

impl TelemetryKind {
    pub const ALL: [TelemetryKind; 7] = [
        TelemetryKind::TransactionEvents,
        TelemetryKind::CustomEvents,
        TelemetryKind::ErrorEvents,
        TelemetryKind::SpanEvents,
        TelemetryKind::LogEvents,
        TelemetryKind::Metrics,
        TelemetryKind::SqlTraces,
    ];

    fn env_name(self) -> String {
        self.as_ref().to_uppercase()
    }
}

impl AsRef<str> for TelemetryKind {
    fn as_ref(&self) -> &str {
        match self {
            TelemetryKind::TransactionEvents => "transaction_events",
            TelemetryKind::CustomEvents => "custom_events",
            TelemetryKind::ErrorEvents => "error_events",
            TelemetryKind::SpanEvents => "span_events",
            TelemetryKind::LogEvents => "log_events",
            TelemetryKind::Metrics => "metrics",
            TelemetryKind::SqlTraces => "sql_traces",
        }
    }
}

impl fmt::Display for TelemetryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`.
    #[must_use]
    pub fn as_filter_directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl AsRef<str> for LogLevel {
    fn as_ref(&self) -> &str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" | "finest" => Ok(LogLevel::Trace),
            _ => Err(format!(
                "Invalid log level: '{s}'. Valid levels are: error, warn, info, debug, trace",
            )),
        }
    }
}

impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Ok(LogLevel::from_str(&value).unwrap_or_else(|e| {
            warn!("{e}, using WARN");
            LogLevel::Warn
        }))
    }
}

/// Harvest behaviour of one telemetry kind.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct HarvestSettings {
    pub enabled: bool,
    #[serde(with = "duration_secs")]
    pub interval: Duration,
    /// Buffer capacity. Unused by accumulating kinds.
    pub max_samples_stored: usize,
}

impl HarvestSettings {
    #[must_use]
    pub fn with_capacity(max_samples_stored: usize) -> Self {
        Self {
            enabled: true,
            interval: DEFAULT_HARVEST_INTERVAL,
            max_samples_stored,
        }
    }
}

impl Default for HarvestSettings {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct HarvestSchedule {
    pub transaction_events: HarvestSettings,
    pub custom_events: HarvestSettings,
    pub error_events: HarvestSettings,
    pub span_events: HarvestSettings,
    pub log_events: HarvestSettings,
    pub metrics: HarvestSettings,
    pub sql_traces: HarvestSettings,
}

impl HarvestSchedule {
    #[must_use]
    pub fn get(&self, kind: TelemetryKind) -> &HarvestSettings {
        match kind {
            TelemetryKind::TransactionEvents => &self.transaction_events,
            TelemetryKind::CustomEvents => &self.custom_events,
            TelemetryKind::ErrorEvents => &self.error_events,
            TelemetryKind::SpanEvents => &self.span_events,
            TelemetryKind::LogEvents => &self.log_events,
            TelemetryKind::Metrics => &self.metrics,
            TelemetryKind::SqlTraces => &self.sql_traces,
        }
    }

    pub fn get_mut(&mut self, kind: TelemetryKind) -> &mut HarvestSettings {
        match kind {
            TelemetryKind::TransactionEvents => &mut self.transaction_events,
            TelemetryKind::CustomEvents => &mut self.custom_events,
            TelemetryKind::ErrorEvents => &mut self.error_events,
            TelemetryKind::SpanEvents => &mut self.span_events,
            TelemetryKind::LogEvents => &mut self.log_events,
            TelemetryKind::Metrics => &mut self.metrics,
            TelemetryKind::SqlTraces => &mut self.sql_traces,
        }
    }
}

impl Default for HarvestSchedule {
    fn default() -> Self {
        Self {
            transaction_events: HarvestSettings::with_capacity(10_000),
            custom_events: HarvestSettings::with_capacity(30_000),
            error_events: HarvestSettings::with_capacity(100),
            span_events: HarvestSettings::with_capacity(2_000),
            log_events: HarvestSettings::with_capacity(10_000),
            metrics: HarvestSettings::default(),
            // distinct statements tracked between harvests
            sql_traces: HarvestSettings::with_capacity(200),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub harvest: HarvestSchedule,
    pub max_sql_traces_per_harvest: usize,
    pub sampling: SamplerConfig,
    pub distributed_tracing_enabled: bool,
    pub trusted_account_key: String,
    pub account_id: String,
    pub primary_application_id: String,
    pub send_data_on_exit: bool,
    /// Minimum uptime before the final harvest on exit is attempted.
    #[serde(with = "duration_millis")]
    pub send_data_on_exit_threshold: Duration,
    #[serde(with = "duration_millis")]
    pub shutdown_grace: Duration,
    /// No background clock: harvests and adaptive interval rollover are
    /// driven by explicit ticks.
    pub serverless_mode: bool,
    pub log_level: LogLevel,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            harvest: HarvestSchedule::default(),
            max_sql_traces_per_harvest: DEFAULT_MAX_SQL_TRACES_PER_HARVEST,
            sampling: SamplerConfig::default(),
            distributed_tracing_enabled: true,
            trusted_account_key: String::new(),
            account_id: String::new(),
            primary_application_id: String::new(),
            send_data_on_exit: false,
            send_data_on_exit_threshold: DEFAULT_SEND_DATA_ON_EXIT_THRESHOLD,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            serverless_mode: false,
            log_level: LogLevel::default(),
        }
    }
}

impl AgentConfig {
    /// Reads the configuration from `APM_*` environment variables and
    /// validates it.
    pub fn from_env() -> Result<Self, HarvestError> {
        let mut config = AgentConfig::default();

        for kind in TelemetryKind::ALL {
            let name = kind.env_name();
            let settings = config.harvest.get_mut(kind);
            if let Some(enabled) = env_bool(&format!("{name}_ENABLED")) {
                settings.enabled = enabled;
            }
            if let Some(secs) = env_parse::<u64>(&format!("{name}_HARVEST_INTERVAL_SECS")) {
                settings.interval = Duration::from_secs(secs);
            }
            if let Some(capacity) = env_parse::<usize>(&format!("{name}_MAX_SAMPLES_STORED")) {
                settings.max_samples_stored = capacity;
            }
        }

        if let Some(max) = env_parse("MAX_SQL_TRACES_PER_HARVEST") {
            config.max_sql_traces_per_harvest = max;
        }
        if let Some(enabled) = env_bool("DISTRIBUTED_TRACING_ENABLED") {
            config.distributed_tracing_enabled = enabled;
        }
        config.account_id = env_string("ACCOUNT_ID").unwrap_or_default();
        config.primary_application_id = env_string("PRIMARY_APPLICATION_ID").unwrap_or_default();
        config.trusted_account_key =
            env_string("TRUSTED_ACCOUNT_KEY").unwrap_or_else(|| config.account_id.clone());

        if let Some(enabled) = env_bool("SEND_DATA_ON_EXIT") {
            config.send_data_on_exit = enabled;
        }
        if let Some(ms) = env_parse::<u64>("SEND_DATA_ON_EXIT_THRESHOLD_MS") {
            config.send_data_on_exit_threshold = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("SHUTDOWN_GRACE_MS") {
            config.shutdown_grace = Duration::from_millis(ms);
        }
        if let Some(enabled) = env_bool("SERVERLESS_MODE") {
            config.serverless_mode = enabled;
        }
        if let Some(level) = env_string("LOG_LEVEL") {
            config.log_level = LogLevel::from_str(&level).map_err(HarvestError::Config)?;
        }

        config.sampling = sampler_config_from_env(config.serverless_mode);
        config.validate()?;
        debug!("Agent configuration loaded from environment");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), HarvestError> {
        for kind in TelemetryKind::ALL {
            let settings = self.harvest.get(kind);
            if settings.enabled && settings.interval.is_zero() {
                return Err(HarvestError::Config(format!(
                    "harvest interval for {kind} must be positive"
                )));
            }
        }
        if self.distributed_tracing_enabled && self.trusted_account_key.is_empty() {
            return Err(HarvestError::Config(
                "trusted account key is required when distributed tracing is enabled".to_string(),
            ));
        }
        Ok(())
    }
}

fn sampler_config_from_env(serverless_mode: bool) -> SamplerConfig {
    let defaults = SamplerConfig::default();
    let role = |name: &str, default: SamplerSettings| match env_string(&format!("SAMPLER_{name}")) {
        Some(value) => SamplerSettings::new(
            SamplerType::parse(&value),
            env_parse(&format!("SAMPLER_{name}_RATIO")),
        ),
        None => default,
    };

    SamplerConfig {
        root: role("ROOT", defaults.root),
        remote_parent_sampled: role("REMOTE_PARENT_SAMPLED", defaults.remote_parent_sampled),
        remote_parent_not_sampled: role(
            "REMOTE_PARENT_NOT_SAMPLED",
            defaults.remote_parent_not_sampled,
        ),
        adaptive_target: env_parse("ADAPTIVE_SAMPLING_TARGET").unwrap_or(defaults.adaptive_target),
        adaptive_interval: env_parse("ADAPTIVE_SAMPLING_INTERVAL_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.adaptive_interval),
        manual_interval_check: serverless_mode,
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}{key}"))
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let value = env_string(key)?;
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!("Ignoring unparseable value '{value}' for {ENV_PREFIX}{key}");
            None
        }
    }
}

fn env_bool(key: &str) -> Option<bool> {
    env_string(key).map(|value| value.trim().to_lowercase() != "false")
}

/// Publishes configuration snapshots to every interested component.
#[derive(Clone, Debug)]
pub struct ConfigWatch {
    tx: Arc<watch::Sender<Arc<AgentConfig>>>,
}

impl ConfigWatch {
    #[must_use]
    pub fn new(config: AgentConfig) -> Self {
        let (tx, _) = watch::channel(Arc::new(config));
        Self { tx: Arc::new(tx) }
    }

    #[must_use]
    pub fn current(&self) -> Arc<AgentConfig> {
        Arc::clone(&self.tx.borrow())
    }

    /// Replaces the current snapshot and wakes every subscriber.
    pub fn publish(&self, config: AgentConfig) -> Arc<AgentConfig> {
        let config = Arc::new(config);
        self.tx.send_replace(Arc::clone(&config));
        config
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<AgentConfig>> {
        self.tx.subscribe()
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serial_test::serial;

    use super::*;

    const ALL_VARS: [&str; 12] = [
        "APM_TRUSTED_ACCOUNT_KEY",
        "APM_ACCOUNT_ID",
        "APM_LOG_LEVEL",
        "APM_SPAN_EVENTS_MAX_SAMPLES_STORED",
        "APM_SPAN_EVENTS_HARVEST_INTERVAL_SECS",
        "APM_ERROR_EVENTS_ENABLED",
        "APM_SERVERLESS_MODE",
        "APM_SAMPLER_ROOT",
        "APM_SAMPLER_ROOT_RATIO",
        "APM_ADAPTIVE_SAMPLING_TARGET",
        "APM_SEND_DATA_ON_EXIT",
        "APM_DISTRIBUTED_TRACING_ENABLED",
    ];

    fn clear_env() {
        for var in ALL_VARS {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        clear_env();
        env::set_var("APM_ACCOUNT_ID", "1234");

        let config = AgentConfig::from_env().unwrap();
        assert_eq!(config.trusted_account_key, "1234");
        assert_eq!(config.harvest.transaction_events.max_samples_stored, 10_000);
        assert_eq!(config.harvest.span_events.interval, DEFAULT_HARVEST_INTERVAL);
        assert_eq!(config.shutdown_grace, DEFAULT_SHUTDOWN_GRACE);
        assert_eq!(config.log_level, LogLevel::Warn);
        assert_eq!(config.sampling, SamplerConfig::default());
        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_env();
        env::set_var("APM_TRUSTED_ACCOUNT_KEY", "33");
        env::set_var("APM_LOG_LEVEL", "debug");
        env::set_var("APM_SPAN_EVENTS_MAX_SAMPLES_STORED", "500");
        env::set_var("APM_SPAN_EVENTS_HARVEST_INTERVAL_SECS", "5");
        env::set_var("APM_ERROR_EVENTS_ENABLED", "false");
        env::set_var("APM_SERVERLESS_MODE", "true");
        env::set_var("APM_SAMPLER_ROOT", "traceIdRatioBased");
        env::set_var("APM_SAMPLER_ROOT_RATIO", "0.25");
        env::set_var("APM_ADAPTIVE_SAMPLING_TARGET", "not-a-number");

        let config = AgentConfig::from_env().unwrap();
        assert_eq!(config.trusted_account_key, "33");
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.harvest.span_events.max_samples_stored, 500);
        assert_eq!(config.harvest.span_events.interval, Duration::from_secs(5));
        assert!(!config.harvest.error_events.enabled);
        assert!(config.serverless_mode);
        assert!(config.sampling.manual_interval_check);
        assert_eq!(
            config.sampling.root,
            SamplerSettings::new(SamplerType::TraceIdRatioBased, Some(0.25))
        );
        assert_eq!(config.sampling.adaptive_target, 10);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_invalid_log_level() {
        clear_env();
        env::set_var("APM_TRUSTED_ACCOUNT_KEY", "33");
        env::set_var("APM_LOG_LEVEL", "verbose");

        let err = AgentConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("Invalid log level: 'verbose'"));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_requires_trusted_key() {
        clear_env();
        assert!(matches!(
            AgentConfig::from_env(),
            Err(HarvestError::Config(_))
        ));

        env::set_var("APM_DISTRIBUTED_TRACING_ENABLED", "false");
        assert!(AgentConfig::from_env().is_ok());
        clear_env();
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let mut config = AgentConfig {
            trusted_account_key: "33".to_string(),
            ..AgentConfig::default()
        };
        config.harvest.metrics.interval = Duration::ZERO;
        assert!(config.validate().is_err());

        config.harvest.metrics.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_watch_swaps_snapshot() {
        let watch = ConfigWatch::new(AgentConfig::default());
        let mut rx = watch.subscribe();
        let before = watch.current();

        watch.publish(AgentConfig {
            max_sql_traces_per_harvest: 3,
            ..AgentConfig::default()
        });

        assert_eq!(before.max_sql_traces_per_harvest, 10);
        assert_eq!(watch.current().max_sql_traces_per_harvest, 3);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().max_sql_traces_per_harvest, 3);
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!(LogLevel::from_str("INFO").unwrap(), LogLevel::Info);
        assert_eq!(LogLevel::from_str("finest").unwrap(), LogLevel::Trace);
        assert!(LogLevel::from_str("loud").is_err());
        assert_eq!(LogLevel::Debug.as_filter_directive(), "debug");
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(TelemetryKind::SqlTraces.to_string(), "sql_traces");
        assert_eq!(TelemetryKind::LogEvents.env_name(), "LOG_EVENTS");
    }
}
