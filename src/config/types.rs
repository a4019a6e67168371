//! Core manifest types.
//!
//! This module contains the root [`Manifest`] struct and the bundle-wide
//! sections (`app`, `ipc`, `telemetry`, `ports`).

use super::{Secret, Service};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Default port range used when a request names none.
pub const DEFAULT_PORT_RANGE: PortRange = PortRange {
    min: 47000,
    max: 48000,
};

/// Root structure of a bundle manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub app: AppInfo,

    #[serde(default)]
    pub ipc: IpcConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub ports: PortsConfig,

    #[serde(default)]
    pub services: Vec<Service>,

    #[serde(default)]
    pub secrets: Vec<Secret>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppInfo {
    pub name: String,
    pub version: String,
}

/// Control API listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcConfig {
    #[serde(default = "default_ipc_host")]
    pub host: String,

    /// Fixed control API port. `None` or `0` picks an ephemeral port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Token file location, relative to the data dir.
    #[serde(default = "default_auth_token_rel")]
    pub auth_token_rel: String,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            host: default_ipc_host(),
            port: None,
            auth_token_rel: default_auth_token_rel(),
        }
    }
}

fn default_ipc_host() -> String {
    "127.0.0.1".to_string()
}

fn default_auth_token_rel() -> String {
    "auth.token".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Event log file, relative to the data dir.
    #[serde(default = "default_telemetry_file")]
    pub file: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_url: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            file: default_telemetry_file(),
            upload_url: None,
        }
    }
}

fn default_telemetry_file() -> String {
    "telemetry.jsonl".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_range: Option<PortRange>,

    #[serde(default)]
    pub reserved: Vec<u16>,
}

/// Inclusive TCP port range.
///
/// Deserialized as `{"min": 47000, "max": 48000}`. Values are kept as `u32`
/// so malformed ranges survive parsing and are reported by the allocator
/// with the service and port name attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortRange {
    pub min: u32,
    pub max: u32,
}

impl PortRange {
    pub fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    /// Describe why the range cannot be scanned, if it can't.
    pub fn malformed_reason(&self) -> Option<&'static str> {
        if self.min == 0 || self.max == 0 {
            Some("range bounds must be non-zero")
        } else if self.max < self.min {
            Some("range max is below min")
        } else if self.max > u16::MAX as u32 {
            Some("range exceeds 65535")
        } else {
            None
        }
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.min..=self.max).contains(&(port as u32))
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.min, self.max)
    }
}

impl Manifest {
    pub fn service(&self, id: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.id == id)
    }

    pub fn secret(&self, id: &str) -> Option<&Secret> {
        self.secrets.iter().find(|s| s.id == id)
    }

    pub fn service_ids(&self) -> Vec<String> {
        self.services.iter().map(|s| s.id.clone()).collect()
    }

    /// The manifest default range, or the built-in 47000-48000.
    pub fn default_port_range(&self) -> PortRange {
        self.ports.default_range.unwrap_or(DEFAULT_PORT_RANGE)
    }

    /// Ports no service may be allocated: the manifest's reserved list plus
    /// the control API's own port when it is fixed.
    pub fn reserved_ports(&self) -> BTreeSet<u16> {
        let mut reserved: BTreeSet<u16> = self.ports.reserved.iter().copied().collect();
        if let Some(port) = self.ipc.port.filter(|p| *p != 0) {
            reserved.insert(port);
        }
        reserved
    }
}
