//! # Runtime and per-workflow configuration.
//!
//! Provides [`SupervisorConfig`] (runtime-wide settings) and [`WorkflowConfig`]
//! (the static schedule of one workflow, reported by `status()`).
//!
//! Both can be read from the process environment (a `.env` file is loaded
//! first when present) or from any key lookup, which keeps parsing testable.
//!
//! ## Variables
//! | Variable                        | Field                              |
//! |---------------------------------|------------------------------------|
//! | `LINEVISOR_BUS_CAPACITY`        | [`SupervisorConfig::bus_capacity`] |
//! | `LINEVISOR_JOIN_GRACE_SECS`     | [`SupervisorConfig::join_grace`]   |
//! | `LINEVISOR_TASK_TIMEOUT_SECS`   | [`SupervisorConfig::task_timeout`] |
//! | `<PREFIX>_POLL_INTERVAL_SECS`   | [`WorkflowConfig::poll_interval`]  |
//! | `<PREFIX>_TASK_TIMEOUT_SECS`    | [`WorkflowConfig::task_timeout`]   |
//! | `<PREFIX>_RUN_AFTER_HOUR`       | [`WorkflowConfig::run_after_hour`] |
//!
//! ## Sentinel values
//! - `task_timeout = 0s` → no timeout
//! - `join_grace = 0s` → `stop()` does not wait for the loop at all

use std::str::FromStr;
use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::error::ConfigError;

const BUS_CAPACITY_KEY: &str = "LINEVISOR_BUS_CAPACITY";
const JOIN_GRACE_KEY: &str = "LINEVISOR_JOIN_GRACE_SECS";
const TASK_TIMEOUT_KEY: &str = "LINEVISOR_TASK_TIMEOUT_SECS";

/// Global configuration for the supervisor runtime.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Capacity of the event bus ring buffer (min 1; clamped by the bus).
    pub bus_capacity: usize,

    /// How long `stop()` waits for a workflow loop to exit before reporting
    /// a join timeout and forcing the workflow to the stopped state.
    pub join_grace: Duration,

    /// Default timeout for gated sub-tasks, inherited by workflow configs
    /// that do not set their own.
    pub task_timeout: Duration,
}

impl SupervisorConfig {
    /// Reads the configuration from the process environment.
    ///
    /// Loads `.env` from the working directory (if any) before reading.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`; absent keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(cap) = parse_key::<usize, _>(&lookup, BUS_CAPACITY_KEY)? {
            cfg.bus_capacity = cap;
        }
        if let Some(secs) = parse_key::<u64, _>(&lookup, JOIN_GRACE_KEY)? {
            cfg.join_grace = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_key::<u64, _>(&lookup, TASK_TIMEOUT_KEY)? {
            cfg.task_timeout = Duration::from_secs(secs);
        }
        Ok(cfg)
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for SupervisorConfig {
    /// - `bus_capacity = 1024`
    /// - `join_grace = 3s`
    /// - `task_timeout = 300s`
    fn default() -> Self {
        Self {
            bus_capacity: 1024,
            join_grace: Duration::from_secs(3),
            task_timeout: Duration::from_secs(300),
        }
    }
}

/// Static schedule of one workflow.
///
/// Not every field is meaningful for every schedule: the daily batch ignores
/// `poll_interval`, the interval schedules ignore `run_after_hour`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WorkflowConfig {
    /// Target length of one cycle (pipeline) or pause between polls (integration).
    #[serde(rename = "poll_interval_secs", serialize_with = "as_secs")]
    pub poll_interval: Duration,

    /// Timeout applied to every gated sub-task (`0s` = none).
    #[serde(rename = "task_timeout_secs", serialize_with = "as_secs")]
    pub task_timeout: Duration,

    /// Hour of day (`0..=23`, local time) after which the daily batch may run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_after_hour: Option<u32>,
}

impl WorkflowConfig {
    /// Config for an interval-driven workflow.
    pub fn interval(poll_interval: Duration, task_timeout: Duration) -> Self {
        Self {
            poll_interval,
            task_timeout,
            run_after_hour: None,
        }
    }

    /// Config for a calendar-day workflow.
    pub fn daily(run_after_hour: u32, task_timeout: Duration) -> Self {
        Self {
            run_after_hour: Some(run_after_hour),
            task_timeout,
            ..Self::default()
        }
    }

    /// Reads `<prefix>_*` variables from the process environment.
    pub fn from_env(prefix: &str, base: &SupervisorConfig) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(prefix, base, |key| std::env::var(key).ok())
    }

    /// Reads `<prefix>_*` keys through `lookup`.
    ///
    /// The task timeout falls back to `base.task_timeout`.
    pub fn from_lookup<F>(prefix: &str, base: &SupervisorConfig, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self {
            task_timeout: base.task_timeout,
            ..Self::default()
        };

        if let Some(secs) = parse_key::<u64, _>(&lookup, &format!("{prefix}_POLL_INTERVAL_SECS"))? {
            cfg.poll_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_key::<u64, _>(&lookup, &format!("{prefix}_TASK_TIMEOUT_SECS"))? {
            cfg.task_timeout = Duration::from_secs(secs);
        }
        let hour_key = format!("{prefix}_RUN_AFTER_HOUR");
        if let Some(hour) = parse_key::<u32, _>(&lookup, &hour_key)? {
            if hour > 23 {
                return Err(ConfigError::HourOutOfRange { key: hour_key, hour });
            }
            cfg.run_after_hour = Some(hour);
        }
        Ok(cfg)
    }

    /// Returns the task timeout as an `Option` (`None` = no timeout).
    #[inline]
    pub fn timeout(&self) -> Option<Duration> {
        if self.task_timeout.is_zero() {
            None
        } else {
            Some(self.task_timeout)
        }
    }
}

impl Default for WorkflowConfig {
    /// - `poll_interval = 60s`
    /// - `task_timeout = 300s`
    /// - `run_after_hour = None`
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            task_timeout: Duration::from_secs(300),
            run_after_hour: None,
        }
    }
}

fn parse_key<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed.parse::<T>().map(Some).map_err(|_| ConfigError::Invalid {
        key: key.to_string(),
        value: raw.clone(),
    })
}

fn as_secs<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_supervisor_defaults_when_unset() {
        let cfg = SupervisorConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg, SupervisorConfig::default());
        assert_eq!(cfg.join_grace, Duration::from_secs(3));
    }

    #[test]
    fn test_supervisor_overrides() {
        let cfg = SupervisorConfig::from_lookup(lookup(&[
            ("LINEVISOR_BUS_CAPACITY", "0"),
            ("LINEVISOR_JOIN_GRACE_SECS", "10"),
            ("LINEVISOR_TASK_TIMEOUT_SECS", " 45 "),
        ]))
        .unwrap();
        assert_eq!(cfg.bus_capacity_clamped(), 1);
        assert_eq!(cfg.join_grace, Duration::from_secs(10));
        assert_eq!(cfg.task_timeout, Duration::from_secs(45));
    }

    #[test]
    fn test_invalid_number_is_reported() {
        let err = SupervisorConfig::from_lookup(lookup(&[("LINEVISOR_JOIN_GRACE_SECS", "soon")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "LINEVISOR_JOIN_GRACE_SECS".into(),
                value: "soon".into()
            }
        );
    }

    #[test]
    fn test_workflow_inherits_timeout() {
        let base = SupervisorConfig {
            task_timeout: Duration::from_secs(90),
            ..SupervisorConfig::default()
        };
        let cfg = WorkflowConfig::from_lookup(
            "LINES",
            &base,
            lookup(&[("LINES_POLL_INTERVAL_SECS", "30")]),
        )
        .unwrap();
        assert_eq!(cfg.poll_interval, Duration::from_secs(30));
        assert_eq!(cfg.task_timeout, Duration::from_secs(90));
        assert_eq!(cfg.run_after_hour, None);
    }

    #[test]
    fn test_run_after_hour_range() {
        let base = SupervisorConfig::default();
        let ok = WorkflowConfig::from_lookup("KNR", &base, lookup(&[("KNR_RUN_AFTER_HOUR", "6")]))
            .unwrap();
        assert_eq!(ok.run_after_hour, Some(6));

        let err = WorkflowConfig::from_lookup("KNR", &base, lookup(&[("KNR_RUN_AFTER_HOUR", "24")]))
            .unwrap_err();
        assert_eq!(err.as_label(), "config_hour_out_of_range");
    }

    #[test]
    fn test_zero_timeout_means_none() {
        let cfg = WorkflowConfig::interval(Duration::from_secs(10), Duration::ZERO);
        assert_eq!(cfg.timeout(), None);
    }

    #[test]
    fn test_serializes_seconds() {
        let cfg = WorkflowConfig::daily(6, Duration::from_secs(120));
        let json = serde_json::to_value(&cfg).unwrap();
        assert_eq!(json["task_timeout_secs"], 120);
        assert_eq!(json["run_after_hour"], 6);

        let interval = WorkflowConfig::interval(Duration::from_secs(15), Duration::from_secs(5));
        let json = serde_json::to_value(&interval).unwrap();
        assert_eq!(json["poll_interval_secs"], 15);
        assert!(json.get("run_after_hour").is_none());
    }
}
