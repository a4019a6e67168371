//! Bundle asset integrity.
//!
//! Every declared asset must exist, be a regular file, match its SHA-256
//! (when given) and stay inside its size budget (when given).

use crate::config::{Asset, Manifest, Service};
use crate::error::{Error, Result};
use crate::platform::{platform_keys, FileSystem};
use sha2::{Digest, Sha256};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Minimum tolerated growth over the declared size.
pub const MIN_SIZE_SLACK: u64 = 1024 * 1024;

/// Allowed growth over `expected`: 5% or 1 MiB, whichever is larger.
pub fn size_slack(expected: u64) -> u64 {
    (expected / 20).max(MIN_SIZE_SLACK)
}

/// Outcome of comparing an asset's size to its declared size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeVerdict {
    Within,
    /// Larger than declared but inside the slack.
    Grown { slack: u64 },
    Oversized { limit: u64 },
    Undersized { minimum: u64 },
}

impl SizeVerdict {
    pub fn is_violation(&self) -> bool {
        matches!(
            self,
            SizeVerdict::Oversized { .. } | SizeVerdict::Undersized { .. }
        )
    }
}

pub fn check_size(expected: u64, actual: u64) -> SizeVerdict {
    let slack = size_slack(expected);
    let limit = expected.saturating_add(slack);
    let minimum = expected / 2;

    if actual > limit {
        SizeVerdict::Oversized { limit }
    } else if actual < minimum {
        SizeVerdict::Undersized { minimum }
    } else if actual > expected {
        SizeVerdict::Grown { slack }
    } else {
        SizeVerdict::Within
    }
}

/// Hex SHA-256 of everything `reader` yields.
pub fn sha256_reader(mut reader: impl Read) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Case-insensitive hex comparison.
pub fn checksum_matches(expected: &str, actual: &str) -> bool {
    expected.trim().eq_ignore_ascii_case(actual.trim())
}

/// An asset that passed but grew inside its slack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetWarning {
    pub service: String,
    pub path: String,
    pub expected: u64,
    pub actual: u64,
}

/// Resolve a binary path: a file under the bundle root, or a bare command
/// name found on `PATH`.
pub fn resolve_program(
    fs: &dyn FileSystem,
    bundle_root: &Path,
    program: &str,
) -> Option<PathBuf> {
    let candidate = Path::new(program);
    let in_bundle = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        bundle_root.join(candidate)
    };
    if fs.stat(&in_bundle).is_ok_and(|stat| stat.is_file) {
        return Some(in_bundle);
    }

    let is_bare = candidate.components().count() == 1 && !candidate.is_absolute();
    if is_bare {
        return which::which(program).ok();
    }
    None
}

pub struct AssetVerifier {
    bundle_root: PathBuf,
    fs: Arc<dyn FileSystem>,
}

impl AssetVerifier {
    pub fn new(bundle_root: impl Into<PathBuf>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            bundle_root: bundle_root.into(),
            fs,
        }
    }

    /// Verify every asset of one service, stopping at the first failure.
    pub fn ensure_assets(&self, service: &Service) -> Result<Vec<AssetWarning>> {
        let mut warnings = Vec::new();
        for asset in &service.assets {
            if let Some(warning) = self.verify_asset(&service.id, asset)? {
                warnings.push(warning);
            }
        }
        Ok(warnings)
    }

    /// Verify every asset and platform binary in the bundle, collecting all
    /// failures.
    pub fn validate_bundle(&self, manifest: &Manifest) -> Result<Vec<AssetWarning>> {
        let keys = platform_keys();
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        for service in &manifest.services {
            match service.binary_for(&keys) {
                Some(binary) => {
                    let resolved =
                        resolve_program(self.fs.as_ref(), &self.bundle_root, &binary.path);
                    if resolved.is_none() {
                        errors.push(Error::Asset {
                            service: service.id.clone(),
                            path: binary.path.clone(),
                            reason: "cannot be resolved to an executable".to_string(),
                            expected: None,
                            actual: None,
                        });
                    }
                }
                None => errors.push(Error::service(
                    &service.id,
                    "binary selection",
                    format!("no binary for platform {}", keys[0]),
                )),
            }

            for asset in &service.assets {
                match self.verify_asset(&service.id, asset) {
                    Ok(Some(warning)) => warnings.push(warning),
                    Ok(None) => {}
                    Err(e) => errors.push(e),
                }
            }
        }

        Error::from_many(errors)?;
        Ok(warnings)
    }

    fn verify_asset(&self, service_id: &str, asset: &Asset) -> Result<Option<AssetWarning>> {
        let path = self.bundle_root.join(&asset.path);
        let fail = |reason: String, expected: Option<u64>, actual: Option<u64>| Error::Asset {
            service: service_id.to_string(),
            path: asset.path.clone(),
            reason,
            expected,
            actual,
        };

        let stat = match self.fs.stat(&path) {
            Ok(stat) => stat,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(fail("does not exist".to_string(), None, None))
            }
            Err(e) => return Err(fail(format!("cannot be read: {}", e), None, None)),
        };
        if stat.is_dir {
            return Err(fail("is a directory".to_string(), None, None));
        }
        if !stat.is_file {
            return Err(fail("is not a regular file".to_string(), None, None));
        }

        if let Some(expected_hash) = &asset.sha256 {
            let reader = self
                .fs
                .open(&path)
                .map_err(|e| fail(format!("cannot be read: {}", e), None, None))?;
            let actual_hash = sha256_reader(reader)
                .map_err(|e| fail(format!("cannot be read: {}", e), None, None))?;
            if !checksum_matches(expected_hash, &actual_hash) {
                return Err(fail(
                    format!(
                        "failed checksum verification (expected sha256 {}, found {})",
                        expected_hash.trim().to_ascii_lowercase(),
                        actual_hash
                    ),
                    None,
                    None,
                ));
            }
        }

        let Some(expected) = asset.size_bytes else {
            return Ok(None);
        };
        match check_size(expected, stat.len) {
            SizeVerdict::Within => Ok(None),
            SizeVerdict::Grown { .. } => {
                tracing::warn!(
                    "Asset '{}' of service '{}' is {} bytes, larger than the declared {} bytes",
                    asset.path,
                    service_id,
                    stat.len,
                    expected
                );
                Ok(Some(AssetWarning {
                    service: service_id.to_string(),
                    path: asset.path.clone(),
                    expected,
                    actual: stat.len,
                }))
            }
            SizeVerdict::Oversized { limit } => Err(fail(
                format!("exceeds its size budget of {} bytes", limit),
                Some(expected),
                Some(stat.len),
            )),
            SizeVerdict::Undersized { minimum } => Err(fail(
                format!("is below its minimum size of {} bytes", minimum),
                Some(expected),
                Some(stat.len),
            )),
        }
    }
}
