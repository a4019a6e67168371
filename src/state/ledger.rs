use super::MigrationsState;
use crate::error::{Error, Result};
use crate::platform::FileSystem;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Reads and writes `migrations.json` under the data dir.
#[derive(Clone)]
pub struct MigrationLedger {
    path: PathBuf,
    fs: Arc<dyn FileSystem>,
}

impl MigrationLedger {
    pub fn new(path: PathBuf, fs: Arc<dyn FileSystem>) -> Self {
        Self { path, fs }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the ledger. A missing file is an empty ledger; a corrupt one is
    /// an error.
    pub fn load(&self) -> Result<MigrationsState> {
        match self.fs.read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(MigrationsState::default()),
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                Error::Filesystem(format!(
                    "Migrations ledger '{}' is corrupt: {}",
                    self.path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(MigrationsState::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically replace the ledger.
    pub fn save(&self, state: &MigrationsState) -> Result<()> {
        let body = serde_json::to_vec_pretty(state)?;
        self.fs.write_private(&self.path, &body).map_err(|e| {
            Error::Filesystem(format!(
                "Failed to write migrations ledger '{}': {}",
                self.path.display(),
                e
            ))
        })
    }
}
