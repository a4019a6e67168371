//! Health check and readiness policy configuration.

use super::deserialize_opt_duration;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default interval between health check attempts.
pub const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(1);
/// Default per-attempt health check timeout.
pub const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(5);
/// Default number of health check attempts during a readiness wait.
pub const DEFAULT_HEALTH_RETRIES: u32 = 30;
/// Default bound for `port_open` and `log_match` readiness waits.
pub const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(60);

/// Kind of one-shot health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthKind {
    Http,
    Tcp,
    Command,
    LogMatch,
}

impl HealthKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthKind::Http => "http",
            HealthKind::Tcp => "tcp",
            HealthKind::Command => "command",
            HealthKind::LogMatch => "log_match",
        }
    }
}

/// Health check configuration for a service.
///
/// ```json
/// "health": {"type": "http", "port_name": "http", "path": "/health", "interval": "500ms"}
/// "health": {"type": "command", "command": ["bin/probe", "--quick"], "timeout": "2s"}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthPolicy {
    #[serde(rename = "type")]
    pub kind: HealthKind,

    /// HTTP path, defaults to `/`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Named port of the same service, used by `http` and `tcp` checks.
    /// Defaults to the service's first requested port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_name: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,

    /// Regex for `log_match` checks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    #[serde(
        default,
        deserialize_with = "deserialize_opt_duration",
        skip_serializing
    )]
    pub interval: Option<Duration>,

    #[serde(
        default,
        deserialize_with = "deserialize_opt_duration",
        skip_serializing
    )]
    pub timeout: Option<Duration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
}

impl HealthPolicy {
    pub fn interval(&self) -> Duration {
        self.interval.unwrap_or(DEFAULT_HEALTH_INTERVAL)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout.unwrap_or(DEFAULT_HEALTH_TIMEOUT)
    }

    /// Attempt budget, never below one.
    pub fn retries(&self) -> u32 {
        self.retries.unwrap_or(DEFAULT_HEALTH_RETRIES).max(1)
    }
}

/// Readiness wait type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessKind {
    HealthSuccess,
    PortOpen,
    LogMatch,
    DependenciesReady,
}

impl ReadinessKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadinessKind::HealthSuccess => "health_success",
            ReadinessKind::PortOpen => "port_open",
            ReadinessKind::LogMatch => "log_match",
            ReadinessKind::DependenciesReady => "dependencies_ready",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessPolicy {
    #[serde(rename = "type")]
    pub kind: ReadinessKind,

    #[serde(
        default,
        deserialize_with = "deserialize_opt_duration",
        skip_serializing
    )]
    pub timeout: Option<Duration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_name: Option<String>,
}

impl ReadinessPolicy {
    pub fn timeout(&self) -> Duration {
        self.timeout.unwrap_or(DEFAULT_READINESS_TIMEOUT)
    }

    /// The policy a service with only a health block gets.
    pub fn health_success() -> Self {
        Self {
            kind: ReadinessKind::HealthSuccess,
            timeout: None,
            pattern: None,
            port_name: None,
        }
    }
}
