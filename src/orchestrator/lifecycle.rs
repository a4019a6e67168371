//! Launch sequence and per-service start and stop.

use super::core::Inner;
use super::migrations::MigrationExecutor;
use super::monitoring::{spawn_exit_watcher, spawn_readiness_watcher};
use crate::assets::resolve_program;
use crate::config::Service;
use crate::error::{Error, Result};
use crate::gpu::{apply_gpu_policy, GpuDecision};
use crate::healthcheck::ProbeContext;
use crate::parameter::EnvRenderer;
use crate::platform::{platform_keys, CommandSpec};
use crate::service::{log_path_for, ServiceProcess, ServiceStatus, StopOutcome};
use serde_json::json;
use std::sync::Arc;

/// Start every service in dependency order.
///
/// A failing service is recorded and the launch moves on; services that
/// depend on it then time out waiting for it.
pub(super) async fn run_launch(inner: Arc<Inner>) {
    inner.telemetry.record(
        "launch_started",
        None,
        Some(json!({ "order": inner.order })),
    );

    let mut migrations = MigrationExecutor::new(
        inner.ledger.clone(),
        inner.caps.runner.clone(),
        inner.caps.fs.clone(),
        inner.manifest.app.version.clone(),
        inner.paths.bundle_root.clone(),
    );
    let launcher = ServiceLauncher {
        inner: inner.clone(),
    };

    let mut started = 0;
    let mut failed = 0;
    for id in &inner.order {
        if inner.cancel.is_cancelled() {
            break;
        }
        let Some(service) = inner.manifest.service(id) else {
            continue;
        };

        match launcher.start_service(service, &mut migrations).await {
            Ok(()) => started += 1,
            Err(e) if e.is_cancelled() => {
                tracing::debug!("Launch cancelled while starting '{}'", id);
                break;
            }
            Err(e) => {
                failed += 1;
                tracing::warn!("Service '{}' failed to start: {}", id, e);
                inner.set_status(id, ServiceStatus::failed(e.to_string(), None));
                inner
                    .telemetry
                    .service_event("service_failed", id, json!({ "error": e.to_string() }));
            }
        }
    }

    if inner.cancel.is_cancelled() {
        return;
    }

    if let Err(e) = migrations.finalize(&inner.manifest) {
        tracing::warn!("Failed to advance migration ledger: {}", e);
    }
    tracing::info!("Launch finished: {} started, {} failed", started, failed);
    inner.telemetry.record(
        "launch_finished",
        None,
        Some(json!({ "started": started, "failed": failed })),
    );
}

/// Runs the start pipeline for one service.
pub(super) struct ServiceLauncher {
    inner: Arc<Inner>,
}

impl ServiceLauncher {
    /// Dependencies, binary, directories, environment, secrets, GPU, assets,
    /// migrations, spawn, watchers.
    #[tracing::instrument(skip(self, service, migrations), fields(service = %service.id))]
    pub(super) async fn start_service(
        &self,
        service: &Service,
        migrations: &mut MigrationExecutor,
    ) -> Result<()> {
        let inner = &self.inner;
        let id = service.id.as_str();
        let paths = &inner.paths;

        if !service.dependencies.is_empty() {
            inner.set_status(id, ServiceStatus::pending("waiting for dependencies"));
            inner
                .monitor
                .wait_for_dependencies(
                    id,
                    &service.dependencies,
                    &**inner,
                    inner.dependency_timeout,
                    &inner.cancel,
                )
                .await?;
        }
        inner.set_status(id, ServiceStatus::pending("starting"));

        let renderer = EnvRenderer::new(&paths.data_dir, &paths.bundle_root, &inner.ports);

        let keys = platform_keys();
        let binary = service.binary_for(&keys).ok_or_else(|| {
            Error::service(
                id,
                "binary selection",
                format!("no binary for platform {}", keys[0]),
            )
        })?;
        let binary_path = renderer.render_value(&binary.path);
        let program = resolve_program(inner.caps.fs.as_ref(), &paths.bundle_root, &binary_path)
            .ok_or_else(|| {
                Error::service(
                    id,
                    "binary selection",
                    format!("'{}' cannot be resolved to an executable", binary_path),
                )
            })?;

        let log_path = log_path_for(&paths.data_dir, service);
        let mut dirs: Vec<_> = service
            .data_dirs
            .iter()
            .map(|dir| paths.data_dir.join(renderer.render_value(dir)))
            .collect();
        if let Some(parent) = log_path.parent() {
            dirs.push(parent.to_path_buf());
        }
        for dir in &dirs {
            inner.caps.fs.create_dir_all(dir).map_err(|e| {
                Error::service(
                    id,
                    "prepare directories",
                    format!("{}: {}", dir.display(), e),
                )
            })?;
        }

        let mut env = renderer.render_env_map(service, binary);
        inner.secrets.apply(&mut env, service)?;

        if apply_gpu_policy(service, &mut env, inner.caps.gpu.as_ref())? == GpuDecision::Fallback {
            tracing::info!("No GPU detected, '{}' uses its fallback settings", id);
            inner.telemetry.service_event("gpu_fallback", id, json!({}));
        }

        for warning in inner.assets.ensure_assets(service)? {
            inner.telemetry.service_event(
                "asset_size_warning",
                id,
                json!({
                    "path": warning.path,
                    "expected": warning.expected,
                    "actual": warning.actual,
                }),
            );
        }

        let cwd = renderer.render_cwd(binary);
        let applied = migrations
            .run(&inner.cancel, service, &renderer, &env, &cwd, &log_path)
            .await?;
        if !applied.is_empty() {
            inner.telemetry.service_event(
                "migrations_applied",
                id,
                json!({ "versions": applied, "phase": migrations.phase().to_string() }),
            );
        }

        if inner.cancel.is_cancelled() {
            return Err(Error::Cancelled(id.to_string()));
        }

        let spec = CommandSpec {
            program,
            args: renderer.render_values(&binary.args),
            cwd: Some(cwd.clone()),
            env: env.clone(),
            log_path: Some(log_path.clone()),
        };
        let child = inner
            .caps
            .runner
            .spawn(&spec)
            .await
            .map_err(|e| Error::service(id, "spawn", e))?;

        let (process, driver) = ServiceProcess::attach(
            id,
            child,
            inner.caps.clock.wall_time(),
            log_path.clone(),
            inner.cancel.child_token(),
        );
        inner
            .processes
            .lock()
            .insert(id.to_string(), process.clone());
        tracing::info!("Started '{}' (pid {:?})", id, process.pid());
        inner
            .telemetry
            .service_event("service_started", id, json!({ "pid": process.pid() }));

        let service_ports = inner.ports.get(id).cloned().unwrap_or_default();
        let default_port = service
            .ports
            .requested
            .first()
            .and_then(|request| service_ports.get(&request.name).copied());
        let ctx = ProbeContext {
            service_id: id.to_string(),
            ports: service_ports,
            default_port,
            log_path,
            bundle_root: paths.bundle_root.clone(),
            env,
            cwd,
            dependencies: service.dependencies.clone(),
        };

        spawn_exit_watcher(inner.clone(), process.clone(), driver);
        spawn_readiness_watcher(inner.clone(), service.clone(), ctx, process);
        Ok(())
    }
}

/// SIGTERM, then SIGKILL after the grace period.
#[tracing::instrument(skip(inner, process), fields(service = %process.service_id()))]
pub(super) async fn stop_service(inner: &Inner, process: &ServiceProcess) -> StopOutcome {
    tracing::info!("Stopping service");
    let outcome = process
        .stop(inner.stop_grace, inner.caps.clock.as_ref())
        .await;
    inner.telemetry.service_event(
        "service_stopped",
        process.service_id(),
        json!({ "outcome": outcome.to_string() }),
    );
    outcome
}
