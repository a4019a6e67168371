//! Host capabilities.
//!
//! The supervisor never touches processes, time, sockets or disk directly;
//! it goes through the traits here so tests can substitute fakes.

mod clock;
mod fs;
mod net;
mod process;

pub use clock::*;
pub use fs::*;
pub use net::*;
pub use process::*;

use crate::gpu::{GpuDetector, SystemGpuDetector};
use std::sync::Arc;

/// The set of capabilities a supervisor runs with.
#[derive(Clone)]
pub struct Capabilities {
    pub runner: Arc<dyn ProcessRunner>,
    pub clock: Arc<dyn Clock>,
    pub network: Arc<dyn NetworkDialer>,
    pub fs: Arc<dyn FileSystem>,
    pub gpu: Arc<dyn GpuDetector>,
}

impl Capabilities {
    /// Production implementations for the current host.
    pub fn system() -> Self {
        Self {
            runner: Arc::new(TokioProcessRunner),
            clock: Arc::new(SystemClock),
            network: Arc::new(TcpNetwork),
            fs: Arc::new(LocalFs),
            gpu: Arc::new(SystemGpuDetector::default()),
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::system()
    }
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities").finish_non_exhaustive()
    }
}

/// Operating system name as used in manifest binary keys.
pub fn os_key() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        "windows" => "win",
        other => other,
    }
}

/// CPU architecture as used in manifest binary keys.
pub fn arch_key() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "x64",
        "aarch64" => "arm64",
        "x86" => "ia32",
        other => other,
    }
}

/// Binary lookup keys for this host, most specific first.
pub fn platform_keys() -> [String; 3] {
    [
        format!("{}-{}", os_key(), arch_key()),
        os_key().to_string(),
        "default".to_string(),
    ]
}
