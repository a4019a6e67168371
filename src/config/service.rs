//! Service configuration types.
//!
//! This module contains the [`Service`] struct and the per-service blocks
//! it owns: binaries, port requests, migrations, assets and GPU policy.

use super::{HealthPolicy, PortRange, ReadinessPolicy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single service in the bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: String,

    /// Binaries keyed by platform (`linux-x64`, `darwin`, `default`, ...).
    #[serde(default)]
    pub binaries: BTreeMap<String, Binary>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,

    #[serde(default)]
    pub ports: PortRequests,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness: Option<ReadinessPolicy>,

    /// IDs of secrets injected into this service.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub migrations: Vec<Migration>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assets: Vec<Asset>,

    /// Directories created under the data dir before start.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_dirs: Vec<String>,

    /// Log directory relative to the data dir. Defaults to `logs`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<String>,

    /// Service-level environment overrides; binary-level `env` wins.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu: Option<GpuPolicy>,
}

impl Service {
    /// Select the binary for the given platform keys, first match wins.
    pub fn binary_for<S: AsRef<str>>(&self, keys: &[S]) -> Option<&Binary> {
        keys.iter().find_map(|k| self.binaries.get(k.as_ref()))
    }

    pub fn log_dir(&self) -> &str {
        self.log_dir.as_deref().unwrap_or("logs")
    }

    pub fn has_readiness(&self) -> bool {
        self.readiness.is_some() || self.health.is_some()
    }
}

/// How to launch a service on one platform.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Binary {
    /// Bundle-relative executable path, or a bare command name looked up on PATH.
    pub path: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortRequests {
    #[serde(default)]
    pub requested: Vec<PortRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortRequest {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<PortRange>,
}

/// A versioned setup command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Migration {
    pub version: String,

    #[serde(default)]
    pub run_on: RunOn,

    /// Program and arguments; templates are expanded before spawning.
    pub command: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

/// Install phases a migration is eligible for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOn {
    #[default]
    Always,
    FirstInstall,
    Upgrade,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    /// Path relative to the bundle root.
    pub path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuRequirement {
    Required,
    Optional,
    #[default]
    None,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GpuPolicy {
    #[serde(default)]
    pub requirement: GpuRequirement,

    /// Applied when a GPU is available.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// Applied when no GPU is available.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fallback_env: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_lookup_order() {
        let service: Service = serde_json::from_str(
            r#"{
                "id": "api",
                "binaries": {
                    "default": {"path": "bin/api"},
                    "linux": {"path": "bin/api-linux"},
                    "linux-x64": {"path": "bin/api-linux-x64"}
                }
            }"#,
        )
        .unwrap();

        let pick = |keys: &[&str]| service.binary_for(keys).map(|b| b.path.clone());
        assert_eq!(
            pick(&["linux-x64", "linux", "default"]).as_deref(),
            Some("bin/api-linux-x64")
        );
        assert_eq!(
            pick(&["linux-arm64", "linux", "default"]).as_deref(),
            Some("bin/api-linux")
        );
        assert_eq!(
            pick(&["darwin-arm64", "darwin", "default"]).as_deref(),
            Some("bin/api")
        );
        assert_eq!(pick(&["win-x64", "win"]), None);
    }

    #[test]
    fn test_defaults() {
        let service: Service = serde_json::from_str(r#"{"id": "worker"}"#).unwrap();
        assert_eq!(service.log_dir(), "logs");
        assert!(!service.has_readiness());
        assert!(service.gpu.is_none());

        let m: Migration =
            serde_json::from_str(r#"{"version": "001", "command": ["true"]}"#).unwrap();
        assert_eq!(m.run_on, RunOn::Always);

        let m: Migration = serde_json::from_str(
            r#"{"version": "002", "run_on": "first_install", "command": ["true"]}"#,
        )
        .unwrap();
        assert_eq!(m.run_on, RunOn::FirstInstall);
    }
}
