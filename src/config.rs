//! # Listener configuration.
//!
//! Provides [`ListenerConfig`], the centralized settings for the session and
//! polling loops.
//!
//! Config is built in two ways:
//! 1. **In code**: `ListenerConfig { pool_id: 7, ..Default::default() }`
//! 2. **From the environment**: [`ListenerConfig::from_env`] overlays
//!    `AGENT_LISTENER_*` variables on the defaults.
//!
//! ## Sentinel values
//! - `delete_timeout = 0s` → no bound on cleanup calls
//! - `idle_heartbeat = 0s` → no idle heartbeat note
//! - `flag_timeout = 0s` → flag fetch is not bounded
//! - `keep_alive_interval = 0s` → no keep-alive while a message is handled

use std::time::Duration;

use crate::classify::SessionConflictTracker;
use crate::error::ConfigError;

const ENV_PREFIX: &str = "AGENT_LISTENER_";

/// Settings for the listener engine.
///
/// ## Field semantics
/// - `pool_id`: pool the agent is registered in
/// - `endpoint`: service URL handed to `AgentService::connect`
/// - `owner_name`: name the session is opened under
/// - `disable_session_recover`: treat an expired session as fatal instead of recreating it
/// - `delete_timeout`: bound for delete-session / delete-message
/// - `conflict_ceiling` / `skew_ceiling`: wall-clock budgets for recurring creation failures
/// - `idle_heartbeat`: how long without messages before an observability note
/// - `keep_alive_interval`: keep-alive period while a message is being handled
/// - `refresh_timeout`: bound for `AgentService::refresh_connection`
/// - `flag_name` / `flag_timeout`: progressive-backoff feature gate and its fetch bound
/// - `bus_capacity`: event bus ring buffer size (min 1; clamped by Bus)
#[derive(Clone, Debug)]
pub struct ListenerConfig {
    pub pool_id: u64,
    pub endpoint: String,
    pub owner_name: String,
    pub disable_session_recover: bool,
    pub delete_timeout: Duration,
    pub conflict_ceiling: Duration,
    pub skew_ceiling: Duration,
    pub idle_heartbeat: Duration,
    pub keep_alive_interval: Duration,
    pub refresh_timeout: Duration,
    pub flag_name: String,
    pub flag_timeout: Duration,
    pub bus_capacity: usize,
}

impl ListenerConfig {
    /// Defaults overlaid with `AGENT_LISTENER_*` environment variables.
    ///
    /// `AGENT_LISTENER_POOL_ID` is required. Durations are given in whole seconds (`*_SECS`). Empty variables count
    /// as unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let d = Self::default();
        Ok(Self {
            pool_id: required_env("POOL_ID")?,
            endpoint: string_env("ENDPOINT")?.unwrap_or(d.endpoint),
            owner_name: string_env("OWNER_NAME")?.unwrap_or(d.owner_name),
            disable_session_recover: bool_env(
                "DISABLE_SESSION_RECOVER",
                d.disable_session_recover,
            )?,
            delete_timeout: secs_env("DELETE_TIMEOUT_SECS", d.delete_timeout)?,
            conflict_ceiling: secs_env("CONFLICT_CEILING_SECS", d.conflict_ceiling)?,
            skew_ceiling: secs_env("SKEW_CEILING_SECS", d.skew_ceiling)?,
            idle_heartbeat: secs_env("IDLE_HEARTBEAT_SECS", d.idle_heartbeat)?,
            keep_alive_interval: secs_env("KEEP_ALIVE_INTERVAL_SECS", d.keep_alive_interval)?,
            refresh_timeout: secs_env("REFRESH_TIMEOUT_SECS", d.refresh_timeout)?,
            flag_name: string_env("FLAG_NAME")?.unwrap_or(d.flag_name),
            flag_timeout: secs_env("FLAG_TIMEOUT_SECS", d.flag_timeout)?,
            bus_capacity: parse_env("BUS_CAPACITY", d.bus_capacity)?,
        })
    }

    /// Cleanup bound as an `Option` (`None` → unbounded).
    #[inline]
    pub fn delete_bound(&self) -> Option<Duration> {
        (self.delete_timeout > Duration::ZERO).then_some(self.delete_timeout)
    }

    /// Idle heartbeat as an `Option` (`None` → disabled).
    #[inline]
    pub fn idle_heartbeat_interval(&self) -> Option<Duration> {
        (self.idle_heartbeat > Duration::ZERO).then_some(self.idle_heartbeat)
    }

    /// Flag fetch bound as an `Option` (`None` → unbounded).
    #[inline]
    pub fn flag_bound(&self) -> Option<Duration> {
        (self.flag_timeout > Duration::ZERO).then_some(self.flag_timeout)
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Whether an expired session should be recreated transparently.
    #[inline]
    pub fn session_recover_enabled(&self) -> bool {
        !self.disable_session_recover
    }
}

impl Default for ListenerConfig {
    /// Default configuration:
    ///
    /// - `delete_timeout = 30s`
    /// - `conflict_ceiling = 4m`, `skew_ceiling = 30m`
    /// - `idle_heartbeat = 30m`
    /// - `keep_alive_interval = 30s`
    /// - `refresh_timeout = 60s`
    /// - `flag_timeout = 10s`
    /// - `bus_capacity = 1024`
    fn default() -> Self {
        Self {
            pool_id: 0,
            endpoint: String::new(),
            owner_name: String::from("agent"),
            disable_session_recover: false,
            delete_timeout: Duration::from_secs(30),
            conflict_ceiling: SessionConflictTracker::CONFLICT_CEILING,
            skew_ceiling: SessionConflictTracker::SKEW_CEILING,
            idle_heartbeat: Duration::from_secs(30 * 60),
            keep_alive_interval: Duration::from_secs(30),
            refresh_timeout: Duration::from_secs(60),
            flag_name: String::from("agent.listener.progressive-backoff"),
            flag_timeout: Duration::from_secs(10),
            bus_capacity: 1024,
        }
    }
}

fn string_env(suffix: &str) -> Result<Option<String>, ConfigError> {
    let key = format!("{ENV_PREFIX}{suffix}");
    match std::env::var(&key) {
        Ok(val) if val.is_empty() => Ok(None),
        Ok(val) => Ok(Some(val)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(ConfigError::InvalidValue {
            key,
            message: e.to_string(),
        }),
    }
}

fn parse_env<T>(suffix: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    string_env(suffix)?
        .map(|s| {
            s.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                key: format!("{ENV_PREFIX}{suffix}"),
                message: e.to_string(),
            })
        })
        .transpose()
        .map(|opt| opt.unwrap_or(default))
}

fn required_env<T>(suffix: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let key = format!("{ENV_PREFIX}{suffix}");
    let raw = string_env(suffix)?.ok_or_else(|| ConfigError::Missing(key.clone()))?;
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key,
        message: e.to_string(),
    })
}

fn secs_env(suffix: &str, default: Duration) -> Result<Duration, ConfigError> {
    parse_env(suffix, default.as_secs()).map(Duration::from_secs)
}

/// Accepts "true"/"1" and "false"/"0".
fn bool_env(suffix: &str, default: bool) -> Result<bool, ConfigError> {
    match string_env(suffix)? {
        Some(s) => match s.to_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            other => Err(ConfigError::InvalidValue {
                key: format!("{ENV_PREFIX}{suffix}"),
                message: format!("expected true/false, got {other:?}"),
            }),
        },
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Every test touching process environment holds this lock.
    static ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

    fn set(key: &str, val: &str) {
        // SAFETY: serialized by ENV_MUTEX.
        unsafe { std::env::set_var(format!("{ENV_PREFIX}{key}"), val) };
    }

    fn unset(key: &str) {
        // SAFETY: serialized by ENV_MUTEX.
        unsafe { std::env::remove_var(format!("{ENV_PREFIX}{key}")) };
    }

    #[test]
    fn defaults_match_protocol_constants() {
        let cfg = ListenerConfig::default();
        assert_eq!(cfg.delete_bound(), Some(Duration::from_secs(30)));
        assert_eq!(cfg.conflict_ceiling, Duration::from_secs(240));
        assert_eq!(cfg.skew_ceiling, Duration::from_secs(1800));
        assert_eq!(cfg.idle_heartbeat_interval(), Some(Duration::from_secs(1800)));
        assert!(cfg.session_recover_enabled());
    }

    #[test]
    fn sentinels() {
        let cfg = ListenerConfig {
            delete_timeout: Duration::ZERO,
            idle_heartbeat: Duration::ZERO,
            flag_timeout: Duration::ZERO,
            bus_capacity: 0,
            ..Default::default()
        };
        assert_eq!(cfg.delete_bound(), None);
        assert_eq!(cfg.idle_heartbeat_interval(), None);
        assert_eq!(cfg.flag_bound(), None);
        assert_eq!(cfg.bus_capacity_clamped(), 1);
    }

    #[test]
    fn env_overrides() {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        set("POOL_ID", "42");
        set("DISABLE_SESSION_RECOVER", "1");
        set("CONFLICT_CEILING_SECS", "60");
        set("ENDPOINT", "");

        let cfg = ListenerConfig::from_env().unwrap();
        assert_eq!(cfg.pool_id, 42);
        assert!(!cfg.session_recover_enabled());
        assert_eq!(cfg.conflict_ceiling, Duration::from_secs(60));
        assert_eq!(cfg.endpoint, "");

        for key in ["POOL_ID", "DISABLE_SESSION_RECOVER", "CONFLICT_CEILING_SECS", "ENDPOINT"] {
            unset(key);
        }
    }

    #[test]
    fn env_rejects_garbage() {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        set("POOL_ID", "1");
        set("KEEP_ALIVE_INTERVAL_SECS", "soon");
        let err = ListenerConfig::from_env().unwrap_err();
        unset("KEEP_ALIVE_INTERVAL_SECS");
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref key, .. } if key == "AGENT_LISTENER_KEEP_ALIVE_INTERVAL_SECS"
        ));

        set("DISABLE_SESSION_RECOVER", "maybe");
        let err = ListenerConfig::from_env().unwrap_err();
        unset("DISABLE_SESSION_RECOVER");
        unset("POOL_ID");
        assert_eq!(err.as_label(), "config_invalid_value");
    }

    #[test]
    fn env_requires_pool() {
        let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        unset("POOL_ID");
        assert_eq!(
            ListenerConfig::from_env().unwrap_err(),
            ConfigError::Missing("AGENT_LISTENER_POOL_ID".into())
        );
    }
}
