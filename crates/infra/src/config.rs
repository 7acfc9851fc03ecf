//! Process configuration loaded from environment variables.
//!
//! | var | default |
//! |-----|---------|
//! | `LISTEN_ADDR` | `0.0.0.0:8080` |
//! | `USE_PERSISTENT_STORES` | `false` |
//! | `DATABASE_URL` | required when persistent |
//! | `REDIS_URL` | `redis://localhost:6379` |
//! | `LIVE_CHANNEL_PREFIX` | `commands` |
//! | `COMMAND_STREAM_KEY` | `commandrelay:commands` |
//! | `COMMAND_DLQ_KEY` | `commandrelay:commands:dlq` |
//! | `INTAKE_CONSUMER_GROUP` | `commandrelay.intake` |
//! | `INTAKE_CLAIM_IDLE_MS` | `30000` |
//! | `LIVE_TIMEOUT_MS` | `2000` (1..=9999) |
//! | `INTAKE_WORKERS` | `4` |
//! | `INTAKE_MAX_DELIVERIES` | `5` |
//! | `PENDING_TTL_HOURS` | `720` (1..=876000) |
//! | `ACKNOWLEDGED_RETENTION_HOURS` | `168` (0..=876000) |
//! | `RETENTION_SWEEP_SECS` | `3600` |
//! | `ELEVATED_ROLES` | `supervisor,admin` |

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use commandrelay_auth::Role;
use commandrelay_events::DEFAULT_LIVE_PREFIX;
use thiserror::Error;

use crate::pending_store::RetentionPolicy;

const MAX_LIVE_TIMEOUT_MS: u64 = 9_999;
/// One hundred years.
const MAX_RETENTION_HOURS: i64 = 876_000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub listen_addr: SocketAddr,
    pub use_persistent_stores: bool,
    pub database_url: Option<String>,
    pub redis_url: String,
    pub live_channel_prefix: String,
    pub command_stream_key: String,
    pub command_dlq_key: String,
    pub intake_consumer_group: String,
    pub intake_claim_idle: Duration,
    pub live_timeout: Duration,
    pub intake_workers: usize,
    pub intake_max_deliveries: u64,
    pub pending_ttl_hours: i64,
    pub acknowledged_retention_hours: i64,
    pub retention_sweep_interval: Duration,
    pub elevated_roles: Vec<Role>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            use_persistent_stores: false,
            database_url: None,
            redis_url: "redis://localhost:6379".to_string(),
            live_channel_prefix: DEFAULT_LIVE_PREFIX.to_string(),
            command_stream_key: "commandrelay:commands".to_string(),
            command_dlq_key: "commandrelay:commands:dlq".to_string(),
            intake_consumer_group: "commandrelay.intake".to_string(),
            intake_claim_idle: Duration::from_millis(30_000),
            live_timeout: Duration::from_millis(2_000),
            intake_workers: 4,
            intake_max_deliveries: 5,
            pending_ttl_hours: 720,
            acknowledged_retention_hours: 168,
            retention_sweep_interval: Duration::from_secs(3_600),
            elevated_roles: vec![Role::SUPERVISOR, Role::ADMIN],
        }
    }
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let live_timeout_ms: u64 = parse_or(&get, "LIVE_TIMEOUT_MS", 2_000)?;
        if !(1..=MAX_LIVE_TIMEOUT_MS).contains(&live_timeout_ms) {
            return Err(invalid("LIVE_TIMEOUT_MS", live_timeout_ms, "must be between 1 and 9999 ms"));
        }

        let intake_workers: usize = parse_or(&get, "INTAKE_WORKERS", defaults.intake_workers)?;
        if intake_workers == 0 {
            return Err(invalid("INTAKE_WORKERS", intake_workers, "must be at least 1"));
        }

        let intake_max_deliveries: u64 = parse_or(&get, "INTAKE_MAX_DELIVERIES", defaults.intake_max_deliveries)?;
        if intake_max_deliveries == 0 {
            return Err(invalid("INTAKE_MAX_DELIVERIES", intake_max_deliveries, "must be at least 1"));
        }

        let pending_ttl_hours: i64 = parse_or(&get, "PENDING_TTL_HOURS", defaults.pending_ttl_hours)?;
        if !(1..=MAX_RETENTION_HOURS).contains(&pending_ttl_hours) {
            return Err(invalid("PENDING_TTL_HOURS", pending_ttl_hours, "must be between 1 and 876000 hours"));
        }
        let acknowledged_retention_hours: i64 =
            parse_or(&get, "ACKNOWLEDGED_RETENTION_HOURS", defaults.acknowledged_retention_hours)?;
        if !(0..=MAX_RETENTION_HOURS).contains(&acknowledged_retention_hours) {
            return Err(invalid(
                "ACKNOWLEDGED_RETENTION_HOURS",
                acknowledged_retention_hours,
                "must be between 0 and 876000 hours",
            ));
        }

        let sweep_secs: u64 = parse_or(&get, "RETENTION_SWEEP_SECS", 3_600)?;
        if sweep_secs == 0 {
            return Err(invalid("RETENTION_SWEEP_SECS", sweep_secs, "must be at least 1"));
        }

        let use_persistent_stores = match get("USE_PERSISTENT_STORES") {
            Some(raw) => parse_bool("USE_PERSISTENT_STORES", &raw)?,
            None => defaults.use_persistent_stores,
        };
        let database_url = get("DATABASE_URL");
        if use_persistent_stores && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        let elevated_roles = match get("ELEVATED_ROLES") {
            Some(raw) => raw.split(',').filter_map(Role::parse).collect(),
            None => defaults.elevated_roles,
        };

        Ok(Self {
            listen_addr: parse_or(&get, "LISTEN_ADDR", defaults.listen_addr)?,
            use_persistent_stores,
            database_url,
            redis_url: get("REDIS_URL").unwrap_or(defaults.redis_url),
            live_channel_prefix: get("LIVE_CHANNEL_PREFIX").unwrap_or(defaults.live_channel_prefix),
            command_stream_key: get("COMMAND_STREAM_KEY").unwrap_or(defaults.command_stream_key),
            command_dlq_key: get("COMMAND_DLQ_KEY").unwrap_or(defaults.command_dlq_key),
            intake_consumer_group: get("INTAKE_CONSUMER_GROUP").unwrap_or(defaults.intake_consumer_group),
            intake_claim_idle: Duration::from_millis(parse_or(&get, "INTAKE_CLAIM_IDLE_MS", 30_000)?),
            live_timeout: Duration::from_millis(live_timeout_ms),
            intake_workers,
            intake_max_deliveries,
            pending_ttl_hours,
            acknowledged_retention_hours,
            retention_sweep_interval: Duration::from_secs(sweep_secs),
            elevated_roles,
        })
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            acknowledged_retention: chrono::Duration::hours(self.acknowledged_retention_hours),
            pending_ttl: chrono::Duration::hours(self.pending_ttl_hours),
        }
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, raw, "expected a boolean")),
    }
}

fn invalid(key: &'static str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
