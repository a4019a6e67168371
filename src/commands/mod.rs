mod run;
mod validate;

pub use run::run_supervisor;
pub use validate::run_validate;

use bundle_runtime::orchestrator::RuntimePaths;
use bundle_runtime::Manifest;
use std::path::{Path, PathBuf};

/// Bundle root and data dir from the CLI, falling back to the manifest's
/// directory and the platform data dir.
pub fn resolve_paths(
    manifest_path: &Path,
    manifest: &Manifest,
    bundle_root: Option<PathBuf>,
    data_dir: Option<PathBuf>,
) -> anyhow::Result<RuntimePaths> {
    let bundle_root = match bundle_root {
        Some(root) => root,
        None => manifest_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
    };
    let bundle_root = std::fs::canonicalize(&bundle_root).map_err(|e| {
        anyhow::anyhow!("Bundle root '{}' is not accessible: {}", bundle_root.display(), e)
    })?;

    let data_dir = match data_dir {
        Some(dir) => dir,
        None => dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("No platform data directory; pass --data-dir"))?
            .join(&manifest.app.name),
    };

    Ok(RuntimePaths::new(bundle_root, data_dir))
}
