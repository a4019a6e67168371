use super::HealthChecker;
use crate::error::{Error, Result};
use async_trait::async_trait;
use regex::Regex;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Whether any part of the log at `path` matches `pattern`. A missing log
/// does not match.
pub fn log_matches(path: &Path, pattern: &Regex) -> io::Result<bool> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(pattern.is_match(&String::from_utf8_lossy(&bytes))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Compile a manifest pattern.
pub fn compile_pattern(service: &str, pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| {
        Error::service(service, "log pattern", format!("invalid regex '{}': {}", pattern, e))
    })
}

/// Synchronous regex match against the service log.
pub struct LogMatchChecker {
    log_path: PathBuf,
    pattern: Regex,
}

impl LogMatchChecker {
    pub fn new(log_path: PathBuf, pattern: Regex) -> Self {
        Self { log_path, pattern }
    }
}

#[async_trait]
impl HealthChecker for LogMatchChecker {
    async fn check(&self) -> Result<bool> {
        Ok(log_matches(&self.log_path, &self.pattern)?)
    }

    fn name(&self) -> &'static str {
        "log_match"
    }

    fn timeout(&self) -> Duration {
        Duration::ZERO
    }
}
