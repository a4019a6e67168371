//! Secret values: persistence, readiness checks and injection.
//!
//! Values are kept in memory and persisted to an owner-only JSON file,
//! never in the manifest.

use crate::config::{Secret, SecretTarget, Service};
use crate::error::{Error, Result};
use crate::platform::FileSystem;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// `secret id -> value`
pub type SecretValues = BTreeMap<String, String>;

/// Prefix of the variable that carries a file-target secret's path.
pub const SECRET_FILE_PREFIX: &str = "SECRET_FILE_";

#[derive(Deserialize)]
#[serde(untagged)]
enum SecretsFile {
    Wrapped { secrets: SecretValues },
    // older files store the map at the top level
    Flat(SecretValues),
}

#[derive(Serialize)]
struct SecretsFileOut<'a> {
    secrets: &'a SecretValues,
}

/// What the control API exposes about a secret. Never the value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretSummary {
    pub id: String,
    pub class: String,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub has_value: bool,
}

fn has_value(values: &SecretValues, id: &str) -> bool {
    values.get(id).is_some_and(|v| !v.trim().is_empty())
}

pub struct SecretStore {
    path: PathBuf,
    bundle_root: PathBuf,
    declarations: Vec<Secret>,
    fs: Arc<dyn FileSystem>,
    values: RwLock<SecretValues>,
}

impl SecretStore {
    pub fn new(
        path: PathBuf,
        bundle_root: PathBuf,
        declarations: Vec<Secret>,
        fs: Arc<dyn FileSystem>,
    ) -> Self {
        Self {
            path,
            bundle_root,
            declarations,
            fs,
            values: RwLock::new(SecretValues::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the secrets file into the cache. An absent file is empty.
    pub fn load(&self) -> Result<SecretValues> {
        let content = match self.fs.read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };

        let values = if content.trim().is_empty() {
            SecretValues::new()
        } else {
            match serde_json::from_str::<SecretsFile>(&content).map_err(|e| {
                Error::Filesystem(format!(
                    "Secrets file '{}' is corrupt: {}",
                    self.path.display(),
                    e
                ))
            })? {
                SecretsFile::Wrapped { secrets } => secrets,
                SecretsFile::Flat(secrets) => secrets,
            }
        };

        *self.values.write() = values.clone();
        Ok(values)
    }

    /// Atomically write `values` with owner-only permissions.
    pub fn persist(&self, values: &SecretValues) -> Result<()> {
        let body = serde_json::to_vec_pretty(&SecretsFileOut { secrets: values })?;
        self.fs.write_private(&self.path, &body).map_err(|e| {
            Error::Filesystem(format!(
                "Failed to write secrets file '{}': {}",
                self.path.display(),
                e
            ))
        })
    }

    /// IDs of required secrets without a non-blank value in `values`.
    pub fn missing_required(&self, values: &SecretValues) -> Vec<String> {
        self.declarations
            .iter()
            .filter(|s| s.required && !has_value(values, &s.id))
            .map(|s| s.id.clone())
            .collect()
    }

    /// Overlay `update` on the cached values, check required secrets and
    /// persist, all under the cache's write lock. The cache only changes
    /// once the file has been written.
    pub fn merge_and_persist(&self, update: SecretValues) -> Result<SecretValues> {
        let mut values = self.values.write();
        let mut merged = values.clone();
        merged.extend(update);

        let missing = self.missing_required(&merged);
        if !missing.is_empty() {
            return Err(Error::MissingSecrets(missing));
        }

        self.persist(&merged)?;
        *values = merged.clone();
        Ok(merged)
    }

    /// Merge `update` into the cache and return the result.
    pub fn merge(&self, update: SecretValues) -> SecretValues {
        let mut values = self.values.write();
        values.extend(update);
        values.clone()
    }

    pub fn values(&self) -> SecretValues {
        self.values.read().clone()
    }

    pub fn summaries(&self) -> Vec<SecretSummary> {
        let values = self.values.read();
        self.declarations
            .iter()
            .map(|s| SecretSummary {
                id: s.id.clone(),
                class: s.class.clone(),
                required: s.required,
                description: s.description.clone(),
                has_value: has_value(&values, &s.id),
            })
            .collect()
    }

    /// Inject the service's secrets into `env`, writing file targets.
    pub fn apply(&self, env: &mut BTreeMap<String, String>, service: &Service) -> Result<()> {
        for id in &service.secrets {
            let secret_error = |reason: String| Error::Secret {
                secret: id.clone(),
                service: service.id.clone(),
                reason,
            };

            let declaration = self
                .declarations
                .iter()
                .find(|s| &s.id == id)
                .ok_or_else(|| secret_error("is not declared in the manifest".to_string()))?;

            let value = {
                let values = self.values.read();
                values.get(id).filter(|v| !v.trim().is_empty()).cloned()
            };
            let Some(value) = value else {
                if declaration.required {
                    return Err(secret_error("required value is missing".to_string()));
                }
                tracing::debug!(
                    "Optional secret '{}' for service '{}' has no value, skipping",
                    id,
                    service.id
                );
                continue;
            };

            match &declaration.target {
                SecretTarget::Env { .. } => {
                    env.insert(declaration.env_name(), value);
                }
                SecretTarget::File { path } => {
                    let target = self.file_target(path).map_err(secret_error)?;
                    self.fs
                        .write_private(&target, value.as_bytes())
                        .map_err(|e| secret_error(format!("failed to write file: {}", e)))?;
                    env.insert(
                        format!("{}{}", SECRET_FILE_PREFIX, declaration.env_key()),
                        target.to_string_lossy().into_owned(),
                    );
                }
            }
        }
        Ok(())
    }

    /// Resolve a bundle-relative file target, refusing paths that leave the bundle.
    fn file_target(&self, path: &str) -> std::result::Result<PathBuf, String> {
        let relative = Path::new(path);
        let escapes = relative.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if relative.is_absolute() || escapes || path.trim().is_empty() {
            return Err(format!(
                "file target '{}' must be a relative path inside the bundle",
                path
            ));
        }
        Ok(self.bundle_root.join(relative))
    }
}
