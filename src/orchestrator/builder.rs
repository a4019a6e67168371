use super::core::{Inner, RuntimePaths, STOP_GRACE_PERIOD};
use super::Supervisor;
use crate::config::Manifest;
use crate::dependency::Graph;
use crate::error::{Error, Result};
use crate::healthcheck::DEPENDENCY_WAIT_TIMEOUT;
use crate::parameter::PortAllocator;
use crate::platform::Capabilities;
use std::time::Duration;

/// Builder for constructing a [`Supervisor`] with a fluent API.
///
/// `start()` performs every fatal boot check before anything runs: the
/// manifest is validated, the dependency graph must be acyclic and every
/// requested port must be allocated.
///
/// # Example
///
/// ```no_run
/// use bundle_runtime::{Manifest, Supervisor};
/// use bundle_runtime::orchestrator::RuntimePaths;
/// use std::time::Duration;
///
/// # async fn example(manifest: Manifest) -> Result<(), bundle_runtime::Error> {
/// let supervisor = Supervisor::builder()
///     .manifest(manifest)
///     .paths(RuntimePaths::new("/opt/app", "/var/lib/app"))
///     .stop_grace(Duration::from_secs(5))
///     .start()
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct SupervisorBuilder {
    manifest: Option<Manifest>,
    paths: Option<RuntimePaths>,
    capabilities: Option<Capabilities>,
    stop_grace: Duration,
    dependency_timeout: Duration,
}

impl SupervisorBuilder {
    pub fn new() -> Self {
        Self {
            manifest: None,
            paths: None,
            capabilities: None,
            stop_grace: STOP_GRACE_PERIOD,
            dependency_timeout: DEPENDENCY_WAIT_TIMEOUT,
        }
    }

    /// Set the manifest. Required.
    pub fn manifest(mut self, manifest: Manifest) -> Self {
        self.manifest = Some(manifest);
        self
    }

    /// Set the bundle root and data dir. Required.
    pub fn paths(mut self, paths: RuntimePaths) -> Self {
        self.paths = Some(paths);
        self
    }

    /// Replace the host capabilities. Defaults to [`Capabilities::system`].
    pub fn capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    /// Grace period between SIGTERM and SIGKILL.
    pub fn stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    /// How long a service waits for its dependencies.
    pub fn dependency_timeout(mut self, timeout: Duration) -> Self {
        self.dependency_timeout = timeout;
        self
    }

    /// Run the boot checks, then launch or defer the launch on missing
    /// secrets.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Manifest or paths are not set
    /// - The manifest is invalid
    /// - The dependency graph has a cycle
    /// - A port request cannot be satisfied
    /// - The data dir cannot be created
    pub async fn start(self) -> Result<Supervisor> {
        let manifest = self
            .manifest
            .ok_or_else(|| Error::Manifest("manifest is required".to_string()))?;
        let paths = self
            .paths
            .ok_or_else(|| Error::Manifest("runtime paths are required".to_string()))?;
        let caps = self.capabilities.unwrap_or_default();

        manifest.validate()?;
        let order = Graph::from_manifest(&manifest).topological_sort()?;
        tracing::debug!("Start order: {}", order.join(" -> "));

        let ports = PortAllocator::new(&manifest, caps.network.clone()).allocate(&manifest)?;

        caps.fs.create_dir_all(&paths.data_dir).map_err(|e| {
            Error::Filesystem(format!(
                "Failed to create data dir '{}': {}",
                paths.data_dir.display(),
                e
            ))
        })?;

        tracing::info!(
            "Supervising {} {} ({} services)",
            manifest.app.name,
            manifest.app.version,
            order.len()
        );

        let inner = Inner::new(
            manifest,
            paths,
            caps,
            order,
            ports,
            self.stop_grace,
            self.dependency_timeout,
        );
        Ok(Supervisor::boot(inner))
    }
}

impl Default for SupervisorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_builder_requires_manifest() {
        let result = SupervisorBuilder::new().start().await;
        assert!(result.is_err());
        if let Err(e) = result {
            assert!(e.to_string().contains("manifest"));
        }
    }

    #[tokio::test]
    async fn test_builder_rejects_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let manifest: Manifest = serde_json::from_value(serde_json::json!({
            "app": {"name": "demo", "version": "1.0.0"},
            "services": [
                {"id": "a", "dependencies": ["b"]},
                {"id": "b", "dependencies": ["a"]}
            ]
        }))
        .unwrap();

        let result = SupervisorBuilder::new()
            .manifest(manifest)
            .paths(RuntimePaths::new(dir.path(), dir.path().join("data")))
            .start()
            .await;
        assert!(matches!(result, Err(Error::CircularDependency(_))));
        assert!(!dir.path().join("data").exists());
    }
}
