//! Readiness waits and one-shot health checks for running services.

use super::{
    check_with_retry, compile_pattern, log_matches, sleep_or_cancel, CommandChecker,
    HealthChecker, HttpChecker, LogMatchChecker, TcpChecker,
};
use crate::assets::resolve_program;
use crate::config::{HealthKind, HealthPolicy, ReadinessKind, ReadinessPolicy};
use crate::error::{Error, Result};
use crate::platform::{
    Capabilities, Clock, CommandSpec, FileSystem, NetworkDialer, ProcessRunner,
};
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Poll interval for `port_open`, `log_match` and dependency waits.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How long a service waits for its dependencies to become ready.
pub const DEPENDENCY_WAIT_TIMEOUT: Duration = Duration::from_secs(120);

/// Answers whether a service is currently ready.
pub trait ReadinessSource: Send + Sync {
    fn is_ready(&self, service_id: &str) -> bool;
}

/// Everything a check needs to know about one running service.
#[derive(Debug, Clone, Default)]
pub struct ProbeContext {
    pub service_id: String,
    /// This service's allocated ports by name.
    pub ports: BTreeMap<String, u16>,
    /// Port used when a policy names none: the first requested port.
    pub default_port: Option<u16>,
    pub log_path: PathBuf,
    pub bundle_root: PathBuf,
    /// Environment and working directory for command checks.
    pub env: BTreeMap<String, String>,
    pub cwd: PathBuf,
    pub dependencies: Vec<String>,
}

impl ProbeContext {
    fn port(&self, name: Option<&str>) -> Result<u16> {
        match name {
            Some(name) => self.ports.get(name).copied().ok_or_else(|| {
                Error::service(
                    &self.service_id,
                    "health check",
                    format!("no port named '{}' was allocated", name),
                )
            }),
            None => self.default_port.ok_or_else(|| {
                Error::service(
                    &self.service_id,
                    "health check",
                    "policy names no port and the service requests none",
                )
            }),
        }
    }
}

pub struct HealthMonitor {
    runner: Arc<dyn ProcessRunner>,
    network: Arc<dyn NetworkDialer>,
    clock: Arc<dyn Clock>,
    fs: Arc<dyn FileSystem>,
    /// Limit for `dependencies_ready` readiness.
    dependency_timeout: Duration,
}

impl HealthMonitor {
    pub fn new(caps: &Capabilities) -> Self {
        Self {
            runner: caps.runner.clone(),
            network: caps.network.clone(),
            clock: caps.clock.clone(),
            fs: caps.fs.clone(),
            dependency_timeout: DEPENDENCY_WAIT_TIMEOUT,
        }
    }

    pub fn with_dependency_timeout(mut self, timeout: Duration) -> Self {
        self.dependency_timeout = timeout;
        self
    }

    /// Build the checker for a health policy.
    pub fn checker(
        &self,
        policy: &HealthPolicy,
        ctx: &ProbeContext,
    ) -> Result<Box<dyn HealthChecker>> {
        let timeout = policy.timeout();
        let checker: Box<dyn HealthChecker> = match policy.kind {
            HealthKind::Http => {
                let port = ctx.port(policy.port_name.as_deref())?;
                Box::new(HttpChecker::local(
                    port,
                    policy.path.as_deref().unwrap_or("/"),
                    timeout,
                )?)
            }
            HealthKind::Tcp => {
                let port = ctx.port(policy.port_name.as_deref())?;
                Box::new(TcpChecker::new(port, self.network.clone(), timeout))
            }
            HealthKind::Command => {
                let (program, args) = policy.command.split_first().ok_or_else(|| {
                    Error::service(&ctx.service_id, "health check", "command is empty")
                })?;
                let mut spec = CommandSpec::new(
                    resolve_program(self.fs.as_ref(), &ctx.bundle_root, program)
                        .unwrap_or_else(|| PathBuf::from(program)),
                );
                spec.args = args.to_vec();
                spec.env = ctx.env.clone();
                spec.cwd = Some(ctx.cwd.clone());
                Box::new(CommandChecker::new(
                    spec,
                    self.runner.clone(),
                    self.clock.clone(),
                    timeout,
                ))
            }
            HealthKind::LogMatch => {
                let pattern = policy.pattern.as_deref().ok_or_else(|| {
                    Error::service(&ctx.service_id, "health check", "log_match needs a pattern")
                })?;
                Box::new(LogMatchChecker::new(
                    ctx.log_path.clone(),
                    compile_pattern(&ctx.service_id, pattern)?,
                ))
            }
        };
        Ok(checker)
    }

    /// Run one health check attempt.
    pub async fn check_once(&self, policy: &HealthPolicy, ctx: &ProbeContext) -> Result<bool> {
        self.checker(policy, ctx)?.check().await
    }

    /// Wait until the readiness policy is satisfied.
    pub async fn wait_ready(
        &self,
        readiness: &ReadinessPolicy,
        health: Option<&HealthPolicy>,
        ctx: &ProbeContext,
        source: &dyn ReadinessSource,
        cancel: &CancellationToken,
    ) -> Result<()> {
        tracing::debug!(
            "Waiting for '{}' readiness ({})",
            ctx.service_id,
            readiness.kind.as_str()
        );
        match readiness.kind {
            ReadinessKind::HealthSuccess => {
                let policy = health.ok_or_else(|| {
                    Error::service(
                        &ctx.service_id,
                        "readiness",
                        "health_success readiness needs a health policy",
                    )
                })?;
                let checker = self.checker(policy, ctx)?;
                check_with_retry(
                    checker.as_ref(),
                    &ctx.service_id,
                    policy.retries(),
                    policy.interval(),
                    self.clock.as_ref(),
                    cancel,
                )
                .await
                .map(|_| ())
            }
            ReadinessKind::PortOpen => {
                let port = ctx.port(readiness.port_name.as_deref())?;
                self.wait_port_open(&ctx.service_id, port, readiness.timeout(), cancel)
                    .await
            }
            ReadinessKind::LogMatch => {
                let pattern = readiness
                    .pattern
                    .as_deref()
                    .or_else(|| health.and_then(|h| h.pattern.as_deref()))
                    .ok_or_else(|| {
                        Error::service(&ctx.service_id, "readiness", "log_match needs a pattern")
                    })?;
                let pattern = compile_pattern(&ctx.service_id, pattern)?;
                self.wait_log_match(ctx, &pattern, readiness.timeout(), cancel)
                    .await
            }
            ReadinessKind::DependenciesReady => {
                self.wait_for_dependencies(
                    &ctx.service_id,
                    &ctx.dependencies,
                    source,
                    self.dependency_timeout,
                    cancel,
                )
                .await
            }
        }
    }

    /// Poll TCP connects until one succeeds or `timeout` passes.
    pub async fn wait_port_open(
        &self,
        service_id: &str,
        port: u16,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        let deadline = self.clock.now() + timeout;
        let mut attempts = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled(service_id.to_string()));
            }
            attempts += 1;
            let connect_timeout = deadline
                .saturating_duration_since(self.clock.now())
                .clamp(Duration::from_millis(100), Duration::from_secs(1));
            let connected = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled(service_id.to_string())),
                result = self.network.connect(addr, connect_timeout) => result.is_ok(),
            };
            if connected {
                return Ok(());
            }
            if self.clock.now() >= deadline {
                return Err(Error::HealthCheck {
                    service: service_id.to_string(),
                    check: "port_open".to_string(),
                    attempts,
                    cause: format!("port {} did not open within {:?}", port, timeout),
                });
            }
            sleep_or_cancel(self.clock.as_ref(), cancel, service_id, POLL_INTERVAL).await?;
        }
    }

    /// Poll the service log until `pattern` matches or `timeout` passes.
    pub async fn wait_log_match(
        &self,
        ctx: &ProbeContext,
        pattern: &regex::Regex,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let deadline = self.clock.now() + timeout;
        let mut attempts = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled(ctx.service_id.clone()));
            }
            attempts += 1;
            match log_matches(&ctx.log_path, pattern) {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(e) => tracing::debug!("Cannot read log for '{}': {}", ctx.service_id, e),
            }
            if self.clock.now() >= deadline {
                return Err(Error::HealthCheck {
                    service: ctx.service_id.clone(),
                    check: "log_match".to_string(),
                    attempts,
                    cause: format!(
                        "pattern '{}' not seen in {} within {:?}",
                        pattern.as_str(),
                        ctx.log_path.display(),
                        timeout
                    ),
                });
            }
            sleep_or_cancel(self.clock.as_ref(), cancel, &ctx.service_id, POLL_INTERVAL).await?;
        }
    }

    /// Poll `source` until every dependency is ready or `timeout` passes.
    pub async fn wait_for_dependencies(
        &self,
        service_id: &str,
        dependencies: &[String],
        source: &dyn ReadinessSource,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if dependencies.is_empty() {
            return Ok(());
        }
        let deadline = self.clock.now() + timeout;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled(service_id.to_string()));
            }
            let pending: Vec<&str> = dependencies
                .iter()
                .map(String::as_str)
                .filter(|dep| !source.is_ready(dep))
                .collect();
            if pending.is_empty() {
                return Ok(());
            }
            if self.clock.now() >= deadline {
                return Err(Error::service(
                    service_id,
                    "dependency wait",
                    format!(
                        "dependencies not ready after {:?}: {}",
                        timeout,
                        pending.join(", ")
                    ),
                ));
            }
            tracing::debug!("'{}' waiting for {}", service_id, pending.join(", "));
            sleep_or_cancel(self.clock.as_ref(), cancel, service_id, POLL_INTERVAL).await?;
        }
    }
}
