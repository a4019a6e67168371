//! Per-service migrations with a persisted ledger.
//!
//! The install phase is fixed for a launch: it compares the ledger's app
//! version with the manifest's. Every applied version is persisted as soon as
//! it succeeds so an interrupted launch never re-runs it.

use crate::assets::resolve_program;
use crate::config::{Manifest, Service};
use crate::error::{Error, Result};
use crate::parameter::EnvRenderer;
use crate::platform::{CommandSpec, FileSystem, ProcessRunner};
use crate::state::{InstallPhase, MigrationLedger, MigrationsState};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct MigrationExecutor {
    ledger: MigrationLedger,
    runner: Arc<dyn ProcessRunner>,
    fs: Arc<dyn FileSystem>,
    app_version: String,
    bundle_root: PathBuf,
    /// Ledger contents, or why it could not be read.
    state: std::result::Result<MigrationsState, String>,
    phase: InstallPhase,
    /// Services whose migrations all succeeded in this launch.
    completed: HashSet<String>,
}

impl MigrationExecutor {
    /// Load the ledger and fix the install phase for this launch.
    pub fn new(
        ledger: MigrationLedger,
        runner: Arc<dyn ProcessRunner>,
        fs: Arc<dyn FileSystem>,
        app_version: impl Into<String>,
        bundle_root: impl Into<PathBuf>,
    ) -> Self {
        let app_version = app_version.into();
        let state = ledger.load().map_err(|e| {
            tracing::warn!("{}", e);
            e.to_string()
        });
        let phase = match &state {
            Ok(state) => state.phase_for(&app_version),
            Err(_) => InstallPhase::FirstInstall,
        };
        tracing::debug!("Install phase: {}", phase);

        Self {
            ledger,
            runner,
            fs,
            app_version,
            bundle_root: bundle_root.into(),
            state,
            phase,
            completed: HashSet::new(),
        }
    }

    pub fn phase(&self) -> InstallPhase {
        self.phase
    }

    /// Run the service's pending migrations in order.
    ///
    /// Returns the versions applied by this call. The first failure aborts
    /// the remaining migrations of this service.
    pub async fn run(
        &mut self,
        cancel: &CancellationToken,
        service: &Service,
        renderer: &EnvRenderer<'_>,
        base_env: &BTreeMap<String, String>,
        cwd: &Path,
        log_path: &Path,
    ) -> Result<Vec<String>> {
        if service.migrations.is_empty() {
            return Ok(Vec::new());
        }

        let state = match &mut self.state {
            Ok(state) => state,
            Err(reason) => {
                return Err(Error::Migration {
                    service: service.id.clone(),
                    version: service.migrations[0].version.clone(),
                    cause: format!("migration ledger unavailable: {}", reason),
                })
            }
        };

        let mut applied = Vec::new();
        for migration in &service.migrations {
            if state.is_applied(&service.id, &migration.version) {
                tracing::debug!(
                    "Migration {}@{} already applied, skipping",
                    service.id,
                    migration.version
                );
                continue;
            }
            if !migration.run_on.matches(self.phase) {
                tracing::debug!(
                    "Migration {}@{} does not run on {}, skipping",
                    service.id,
                    migration.version,
                    self.phase
                );
                continue;
            }

            let migration_error = |cause: String| Error::Migration {
                service: service.id.clone(),
                version: migration.version.clone(),
                cause,
            };

            let command = renderer.render_values(&migration.command);
            let (program, args) = command
                .split_first()
                .ok_or_else(|| migration_error("command is empty".to_string()))?;

            let mut env = base_env.clone();
            for (key, value) in &migration.env {
                env.insert(key.clone(), renderer.render_value(value));
            }

            let spec = CommandSpec {
                program: resolve_program(self.fs.as_ref(), &self.bundle_root, program)
                    .unwrap_or_else(|| PathBuf::from(program)),
                args: args.to_vec(),
                cwd: Some(cwd.to_path_buf()),
                env,
                log_path: Some(log_path.to_path_buf()),
            };

            tracing::info!("Running migration {}@{}", service.id, migration.version);
            let mut child = self
                .runner
                .spawn(&spec)
                .await
                .map_err(|e| migration_error(e.to_string()))?;

            let outcome = tokio::select! {
                outcome = child.wait() => Some(outcome),
                _ = cancel.cancelled() => None,
            };
            let Some(outcome) = outcome else {
                if let Err(e) = child.kill() {
                    tracing::debug!(
                        "Failed to kill migration {}@{}: {}",
                        service.id,
                        migration.version,
                        e
                    );
                }
                let _ = child.wait().await;
                return Err(Error::Cancelled(service.id.clone()));
            };
            let outcome = outcome.map_err(|e| migration_error(e.to_string()))?;
            if !outcome.success() {
                return Err(migration_error(format!("command failed with {}", outcome)));
            }

            state.mark_applied(&service.id, &migration.version);
            self.ledger
                .save(state)
                .map_err(|e| migration_error(e.to_string()))?;
            applied.push(migration.version.clone());
        }

        self.completed.insert(service.id.clone());
        Ok(applied)
    }

    /// Advance the ledger's app version if every service with migrations
    /// completed them in this launch. Returns whether it advanced.
    pub fn finalize(&mut self, manifest: &Manifest) -> Result<bool> {
        let Ok(state) = &mut self.state else {
            return Ok(false);
        };

        let pending: Vec<&str> = manifest
            .services
            .iter()
            .filter(|s| !s.migrations.is_empty() && !self.completed.contains(&s.id))
            .map(|s| s.id.as_str())
            .collect();
        if !pending.is_empty() {
            tracing::info!(
                "Keeping app version '{}' until migrations complete for: {}",
                state.app_version,
                pending.join(", ")
            );
            return Ok(false);
        }

        if state.app_version == self.app_version {
            return Ok(false);
        }
        state.app_version = self.app_version.clone();
        self.ledger.save(state)?;
        tracing::info!("Migration ledger advanced to {}", self.app_version);
        Ok(true)
    }
}
