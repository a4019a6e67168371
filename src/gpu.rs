//! GPU availability and per-service GPU policy.

use crate::config::{GpuRequirement, Service};
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

/// Environment variable that forces detection on (`1`/`true`) or off (`0`/`false`).
pub const GPU_OVERRIDE_VAR: &str = "BUNDLE_GPU";
/// Set on every service with a GPU requirement other than `none`.
pub const GPU_AVAILABLE_VAR: &str = "BUNDLE_GPU_AVAILABLE";

const GPU_DEVICE_NODES: &[&str] = &["/dev/nvidia0", "/dev/dri/renderD128"];

pub trait GpuDetector: Send + Sync {
    fn gpu_available(&self) -> bool;
}

/// Detects a GPU from the override variable, `nvidia-smi` or device nodes.
/// The result is computed once per detector.
#[derive(Debug, Default)]
pub struct SystemGpuDetector {
    detected: OnceLock<bool>,
}

impl SystemGpuDetector {
    fn detect() -> bool {
        if let Some(forced) = std::env::var(GPU_OVERRIDE_VAR)
            .ok()
            .and_then(|v| parse_gpu_override(&v))
        {
            tracing::debug!("GPU availability forced to {} by {}", forced, GPU_OVERRIDE_VAR);
            return forced;
        }

        if which::which("nvidia-smi").is_ok() {
            return true;
        }

        GPU_DEVICE_NODES.iter().any(|node| Path::new(node).exists())
    }
}

impl GpuDetector for SystemGpuDetector {
    fn gpu_available(&self) -> bool {
        *self.detected.get_or_init(Self::detect)
    }
}

/// Parse `0/1/false/true` (case-insensitive).
pub fn parse_gpu_override(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
    }
}

/// What the GPU policy did to a service environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuDecision {
    /// No policy or `requirement: none`.
    NotRequested,
    Accelerated,
    /// Optional GPU missing; `fallback_env` applied.
    Fallback,
}

/// Apply the service's GPU policy to `env`.
///
/// A `required` GPU that is not available fails the service.
pub fn apply_gpu_policy(
    service: &Service,
    env: &mut BTreeMap<String, String>,
    detector: &dyn GpuDetector,
) -> Result<GpuDecision> {
    let Some(policy) = service.gpu.as_ref() else {
        return Ok(GpuDecision::NotRequested);
    };
    if policy.requirement == GpuRequirement::None {
        return Ok(GpuDecision::NotRequested);
    }

    let available = detector.gpu_available();
    env.insert(
        GPU_AVAILABLE_VAR.to_string(),
        if available { "1" } else { "0" }.to_string(),
    );

    if available {
        env.extend(policy.env.clone());
        return Ok(GpuDecision::Accelerated);
    }

    match policy.requirement {
        GpuRequirement::Required => Err(Error::service(
            &service.id,
            "gpu",
            "a GPU is required but none was detected",
        )),
        _ => {
            env.extend(policy.fallback_env.clone());
            Ok(GpuDecision::Fallback)
        }
    }
}
