use super::lifecycle::{run_launch, stop_service};
use crate::assets::AssetVerifier;
use crate::config::Manifest;
use crate::error::Result;
use crate::healthcheck::{HealthMonitor, ReadinessSource};
use crate::parameter::{PortMap, SecretStore, SecretSummary, SecretValues};
use crate::platform::Capabilities;
use crate::service::{ServiceProcess, ServiceStatus, WAITING_FOR_SECRETS};
use crate::state::MigrationLedger;
use crate::telemetry::TelemetryRecorder;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Time a service waits for SIGTERM to take effect before SIGKILL.
pub const STOP_GRACE_PERIOD: Duration = Duration::from_secs(3);

/// Where the runtime finds the bundle and keeps its state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimePaths {
    pub bundle_root: PathBuf,
    pub data_dir: PathBuf,
}

impl RuntimePaths {
    pub fn new(bundle_root: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            bundle_root: bundle_root.into(),
            data_dir: data_dir.into(),
        }
    }

    pub fn secrets_file(&self) -> PathBuf {
        self.data_dir.join("secrets.json")
    }

    pub fn migrations_file(&self) -> PathBuf {
        self.data_dir.join("migrations.json")
    }

    pub fn telemetry_file(&self, manifest: &Manifest) -> PathBuf {
        self.data_dir.join(&manifest.telemetry.file)
    }

    pub fn auth_token_file(&self, manifest: &Manifest) -> PathBuf {
        self.data_dir.join(&manifest.ipc.auth_token_rel)
    }
}

/// Shared supervisor state.
///
/// # Lock Ordering
///
/// `launch_task` is only taken on its own. `statuses` may be held while
/// reading a process's exit status, never while taking `processes`.
/// No lock is held across `.await`.
pub(super) struct Inner {
    pub(super) manifest: Manifest,
    pub(super) paths: RuntimePaths,
    pub(super) caps: Capabilities,
    /// Dependency order; stop runs it backwards.
    pub(super) order: Vec<String>,
    pub(super) ports: PortMap,
    pub(super) secrets: SecretStore,
    pub(super) assets: AssetVerifier,
    pub(super) telemetry: TelemetryRecorder,
    pub(super) ledger: MigrationLedger,
    pub(super) monitor: HealthMonitor,
    pub(super) statuses: RwLock<BTreeMap<String, ServiceStatus>>,
    pub(super) processes: Mutex<HashMap<String, ServiceProcess>>,
    pub(super) cancel: CancellationToken,
    pub(super) tasks: TaskTracker,
    pub(super) stop_grace: Duration,
    pub(super) dependency_timeout: Duration,
    launch_started: AtomicBool,
    launch_task: Mutex<Option<JoinHandle<()>>>,
    shutdown_started: AtomicBool,
    shutdown_requested: CancellationToken,
    shutdown_complete: CancellationToken,
}

impl Inner {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        manifest: Manifest,
        paths: RuntimePaths,
        caps: Capabilities,
        order: Vec<String>,
        ports: PortMap,
        stop_grace: Duration,
        dependency_timeout: Duration,
    ) -> Self {
        let secrets = SecretStore::new(
            paths.secrets_file(),
            paths.bundle_root.clone(),
            manifest.secrets.clone(),
            caps.fs.clone(),
        );
        let assets = AssetVerifier::new(paths.bundle_root.clone(), caps.fs.clone());
        let telemetry = TelemetryRecorder::new(
            paths.telemetry_file(&manifest),
            manifest.telemetry.upload_url.clone(),
            caps.fs.clone(),
            caps.clock.clone(),
        );
        let ledger = MigrationLedger::new(paths.migrations_file(), caps.fs.clone());
        let monitor = HealthMonitor::new(&caps).with_dependency_timeout(dependency_timeout);
        let statuses = manifest
            .services
            .iter()
            .map(|s| (s.id.clone(), ServiceStatus::pending("pending")))
            .collect();

        Self {
            manifest,
            paths,
            caps,
            order,
            ports,
            secrets,
            assets,
            telemetry,
            ledger,
            monitor,
            statuses: RwLock::new(statuses),
            processes: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
            stop_grace,
            dependency_timeout,
            launch_started: AtomicBool::new(false),
            launch_task: Mutex::new(None),
            shutdown_started: AtomicBool::new(false),
            shutdown_requested: CancellationToken::new(),
            shutdown_complete: CancellationToken::new(),
        }
    }

    pub(super) fn set_status(&self, service_id: &str, status: ServiceStatus) {
        let mut statuses = self.statuses.write();
        if let Some(slot) = statuses.get_mut(service_id) {
            *slot = status;
        }
    }

    /// Flip a service to ready unless its process has already exited.
    pub(super) fn mark_ready(&self, process: &ServiceProcess) -> bool {
        let mut statuses = self.statuses.write();
        if process.exit_status().is_some() || process.stop_requested() {
            return false;
        }
        match statuses.get_mut(process.service_id()) {
            Some(slot) => {
                *slot = ServiceStatus::ready();
                true
            }
            None => false,
        }
    }

    /// Record a readiness failure unless the exit watcher already has.
    pub(super) fn mark_not_ready(&self, process: &ServiceProcess, message: String) {
        let mut statuses = self.statuses.write();
        if process.exit_status().is_some() {
            return;
        }
        if let Some(slot) = statuses.get_mut(process.service_id()) {
            *slot = ServiceStatus::failed(message, None);
        }
    }
}

impl ReadinessSource for Inner {
    fn is_ready(&self, service_id: &str) -> bool {
        self.statuses
            .read()
            .get(service_id)
            .is_some_and(|status| status.ready)
    }
}

/// The bundle supervisor.
///
/// Owns every service process of one bundle: resolves the start order,
/// allocates ports, gates the launch on required secrets, starts services
/// in dependency order and stops them in reverse.
///
/// # Concurrency Model
///
/// - The launch runs on its own task and starts services one at a time
/// - Each started service gets a readiness watcher and an exit watcher
/// - Every task is tracked so [`Supervisor::shutdown`] can wait for all of them
/// - All methods take `&self`; state is behind short-lived `parking_lot` locks
///
/// # Example
///
/// ```no_run
/// use bundle_runtime::{Parser, Supervisor};
/// use bundle_runtime::orchestrator::RuntimePaths;
///
/// # async fn example() -> Result<(), bundle_runtime::Error> {
/// let manifest = Parser::new().load_manifest("bundle/manifest.json")?;
/// let supervisor = Supervisor::builder()
///     .manifest(manifest)
///     .paths(RuntimePaths::new("bundle", "/var/lib/app"))
///     .start()
///     .await?;
///
/// // When shutting down:
/// supervisor.shutdown().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Supervisor {
    pub(super) inner: Arc<Inner>,
}

impl Supervisor {
    pub fn builder() -> super::SupervisorBuilder {
        super::SupervisorBuilder::new()
    }

    /// Load secrets and launch, or defer the launch until required secrets
    /// arrive.
    pub(super) fn boot(inner: Inner) -> Self {
        let supervisor = Self {
            inner: Arc::new(inner),
        };
        let inner = &supervisor.inner;

        let values = match inner.secrets.load() {
            Ok(values) => values,
            Err(e) => {
                tracing::warn!("Ignoring unreadable secrets file: {}", e);
                SecretValues::new()
            }
        };

        let missing = inner.secrets.missing_required(&values);
        if missing.is_empty() {
            supervisor.launch();
        } else {
            tracing::info!(
                "Deferring launch until required secrets are set: {}",
                missing.join(", ")
            );
            for id in &inner.order {
                inner.set_status(id, ServiceStatus::pending(WAITING_FOR_SECRETS));
            }
            inner
                .telemetry
                .record("launch_deferred", None, Some(json!({ "missing": missing })));
        }
        supervisor
    }

    /// Start the launch sequence. Returns `false` if it was already started
    /// or the supervisor is shutting down.
    pub fn launch(&self) -> bool {
        let mut slot = self.inner.launch_task.lock();
        if self.inner.cancel.is_cancelled() || self.inner.launch_started.swap(true, Ordering::SeqCst)
        {
            return false;
        }
        tracing::info!("Launching {} services", self.inner.order.len());
        *slot = Some(self.inner.tasks.spawn(run_launch(self.inner.clone())));
        true
    }

    /// Whether the launch sequence has been started.
    pub fn launch_started(&self) -> bool {
        self.inner.launch_started.load(Ordering::SeqCst)
    }

    /// Store a secret update and launch if it was deferred.
    ///
    /// # Errors
    ///
    /// [`crate::Error::MissingSecrets`] if required secrets would still be missing;
    /// nothing is stored in that case.
    pub fn submit_secrets(&self, update: SecretValues) -> Result<()> {
        let ids: Vec<String> = update.keys().cloned().collect();
        self.inner.secrets.merge_and_persist(update)?;
        self.inner
            .telemetry
            .record("secrets_updated", None, Some(json!({ "ids": ids })));

        self.launch();
        Ok(())
    }

    /// Ask the owner of this supervisor to shut it down.
    pub fn request_shutdown(&self) {
        tracing::info!("Shutdown requested");
        self.inner.shutdown_requested.cancel();
    }

    /// Resolves once [`Supervisor::request_shutdown`] has been called.
    pub async fn shutdown_requested(&self) {
        self.inner.shutdown_requested.cancelled().await
    }

    /// Resolves once [`Supervisor::shutdown`] has finished.
    pub async fn shutdown_complete(&self) {
        self.inner.shutdown_complete.cancelled().await
    }

    /// Stop everything.
    ///
    /// This method:
    /// 1. Cancels every outstanding wait and the launch
    /// 2. Stops services in reverse dependency order
    /// 3. Waits for every tracked task to finish
    ///
    /// Concurrent calls wait for the first one to finish.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        if inner
            .shutdown_started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Shutdown already in progress or completed, waiting");
            inner.shutdown_complete.cancelled().await;
            return;
        }

        tracing::debug!("Shutdown: canceling in-progress operations");
        inner.cancel.cancel();

        let launch = inner.launch_task.lock().take();
        if let Some(handle) = launch {
            tracing::debug!("Shutdown: waiting for launch to unwind");
            if let Err(e) = handle.await {
                tracing::warn!("Launch task failed: {}", e);
            }
        }

        tracing::debug!("Shutdown: stopping services");
        for id in inner.order.iter().rev() {
            let process = inner.processes.lock().get(id).cloned();
            if let Some(process) = process {
                stop_service(inner, &process).await;
            }
        }

        tracing::debug!("Shutdown: waiting for {} tasks", inner.tasks.len());
        inner.tasks.close();
        inner.tasks.wait().await;

        inner.telemetry.record("shutdown_complete", None, None);
        tracing::info!("All services stopped");
        inner.shutdown_complete.cancel();
    }

    pub fn manifest(&self) -> &Manifest {
        &self.inner.manifest
    }

    pub fn paths(&self) -> &RuntimePaths {
        &self.inner.paths
    }

    /// Services in start order.
    pub fn start_order(&self) -> &[String] {
        &self.inner.order
    }

    pub fn statuses(&self) -> BTreeMap<String, ServiceStatus> {
        self.inner.statuses.read().clone()
    }

    pub fn status(&self, service_id: &str) -> Option<ServiceStatus> {
        self.inner.statuses.read().get(service_id).cloned()
    }

    pub fn is_ready(&self, service_id: &str) -> bool {
        self.inner.is_ready(service_id)
    }

    pub fn all_ready(&self) -> bool {
        self.inner.statuses.read().values().all(|s| s.ready)
    }

    pub fn ports(&self) -> PortMap {
        self.inner.ports.clone()
    }

    /// Log file of a known service, whether or not it exists yet.
    pub fn log_path(&self, service_id: &str) -> Option<PathBuf> {
        self.inner
            .manifest
            .service(service_id)
            .map(|s| crate::service::log_path_for(&self.inner.paths.data_dir, s))
    }

    /// PID of a running service.
    pub fn pid(&self, service_id: &str) -> Option<u32> {
        self.inner
            .processes
            .lock()
            .get(service_id)
            .filter(|p| p.exit_status().is_none())
            .and_then(ServiceProcess::pid)
    }

    pub fn secret_summaries(&self) -> Vec<SecretSummary> {
        self.inner.secrets.summaries()
    }

    pub fn telemetry_path(&self) -> &Path {
        self.inner.telemetry.path()
    }

    pub fn telemetry_upload_url(&self) -> Option<&str> {
        self.inner.telemetry.upload_url()
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("app", &self.inner.manifest.app.name)
            .field("paths", &self.inner.paths)
            .field("order", &self.inner.order)
            .field("launch_started", &self.launch_started())
            .field(
                "shutdown_started",
                &self.inner.shutdown_started.load(Ordering::Relaxed),
            )
            .field("is_cancelled", &self.inner.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}
