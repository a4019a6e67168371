// Allow unused_assignments at module level because thiserror's generated code
// for struct variants triggers false positive warnings - the fields ARE used
// in the Display impl but rustc's lint pass doesn't see this.
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::io;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    #[error("Manifest error: {0}")]
    #[diagnostic(
        code(bundle::manifest::invalid),
        help("Check the bundle manifest for syntax errors and missing fields")
    )]
    Manifest(String),

    #[error("Circular dependency detected: {}", .0.join(" -> "))]
    #[diagnostic(
        code(bundle::dependency::circular),
        help("Services cannot depend on each other in a cycle. Review the dependencies fields")
    )]
    CircularDependency(Vec<String>),

    #[error("Service '{service}' failed during {operation}: {cause}")]
    #[diagnostic(code(bundle::service::failed))]
    Service {
        service: String,
        operation: String,
        cause: String,
    },

    #[error("Secret '{secret}' for service '{service}': {reason}")]
    #[diagnostic(
        code(bundle::secret::error),
        help("Provide the secret through the control API: POST /secrets")
    )]
    Secret {
        secret: String,
        service: String,
        reason: String,
    },

    #[error("Missing required secrets: {}", .0.join(", "))]
    #[diagnostic(code(bundle::secret::missing))]
    MissingSecrets(Vec<String>),

    #[error("Port allocation failed for '{service}.{port_name}' in range {range}: {reason}")]
    #[diagnostic(
        code(bundle::port::allocation_failed),
        help("Widen the port range in the manifest or free ports inside it")
    )]
    Port {
        service: String,
        port_name: String,
        range: String,
        reason: String,
    },

    #[error("Asset '{path}' for service '{service}' {reason}{}",
        .expected
            .zip(*.actual)
            .map(|(expected, actual)| format!(" (expected {} bytes, found {} bytes)", expected, actual))
            .unwrap_or_default()
    )]
    #[diagnostic(
        code(bundle::asset::invalid),
        help("The bundle may be corrupt or incomplete. Reinstall the application")
    )]
    Asset {
        service: String,
        path: String,
        reason: String,
        expected: Option<u64>,
        actual: Option<u64>,
    },

    #[error("Migration '{version}' for service '{service}' failed: {cause}")]
    #[diagnostic(code(bundle::migration::failed))]
    Migration {
        service: String,
        version: String,
        cause: String,
    },

    #[error("Health check '{check}' for service '{service}' failed after {attempts} attempt(s): {cause}")]
    #[diagnostic(code(bundle::service::health_check_failed))]
    HealthCheck {
        service: String,
        check: String,
        attempts: u32,
        cause: String,
    },

    #[error("Timeout waiting for service '{0}'")]
    #[diagnostic(code(bundle::service::timeout))]
    Timeout(String),

    #[error("Operation cancelled for service '{0}'")]
    Cancelled(String),

    #[error("Filesystem error: {0}")]
    #[diagnostic(code(bundle::filesystem::error))]
    Filesystem(String),

    #[error("Process error: {0}")]
    #[diagnostic(
        code(bundle::process::error),
        help("Check that the command exists and is executable")
    )]
    Process(String),

    #[error("Invalid PID {pid}: {reason}")]
    InvalidPid { pid: u32, reason: String },

    #[error("Multiple errors occurred:\n{}", .0.iter().map(|e| format!("  - {}", e)).collect::<Vec<_>>().join("\n"))]
    Multiple(Vec<Error>),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Build a [`Error::Service`] for a failing startup step.
    pub fn service(
        service: impl Into<String>,
        operation: impl Into<String>,
        cause: impl std::fmt::Display,
    ) -> Self {
        Error::Service {
            service: service.into(),
            operation: operation.into(),
            cause: cause.to_string(),
        }
    }

    /// Whether this error is a cancellation rather than a real failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled(_))
    }

    /// Collapse a list of errors into a single error, or `Ok` when empty.
    pub fn from_many(mut errors: Vec<Error>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Error::Multiple(errors)),
        }
    }

    /// Returns a helpful suggestion for resolving this error, if available.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Error::CircularDependency(path) => Some(format!(
                "Services cannot depend on each other in a cycle. Review the dependencies of: {}",
                path.join(", ")
            )),
            Error::MissingSecrets(ids) => Some(format!(
                "Submit values for {} with: POST /secrets {{\"secrets\": {{\"{}\": \"...\"}}}}",
                ids.join(", "),
                ids.first().map(String::as_str).unwrap_or("ID")
            )),
            Error::Port { range, .. } => Some(format!(
                "Every port in {} is reserved, claimed or in use. Widen the range or stop the process holding it.",
                range
            )),
            Error::Asset { .. } => Some(
                "The bundle failed its integrity check. Reinstall the application to restore the original files."
                    .to_string(),
            ),
            Error::Migration { service, .. } => Some(format!(
                "Check the log of service '{}' for the migration's output. The migration is retried on next start.",
                service
            )),
            Error::HealthCheck { service, .. } => Some(format!(
                "Check the log of service '{}' and verify its health policy in the manifest.",
                service
            )),
            Error::Manifest(_) => {
                Some("Run `bundle-runtime validate` to check the manifest and bundle.".to_string())
            }
            Error::Process(_) => Some("Check that the command exists and is executable".to_string()),
            _ => None,
        }
    }

    /// Formats the error with its suggestion (if any) for user-friendly display.
    pub fn with_suggestion(&self) -> String {
        match self.suggestion() {
            Some(suggestion) => format!("{}\n\nHint: {}", self, suggestion),
            None => self.to_string(),
        }
    }
}

/// Validates and converts a u32 PID to nix::unistd::Pid safely.
/// Returns Err for PID 0 (process group), PID 1 (init), or values > i32::MAX.
#[cfg(unix)]
pub fn validate_pid(pid: u32, service_name: &str) -> Result<nix::unistd::Pid> {
    if pid == 0 {
        return Err(Error::InvalidPid {
            pid,
            reason: format!(
                "PID 0 is invalid for service '{}' (refers to process group, not a process)",
                service_name
            ),
        });
    }
    if pid == 1 {
        return Err(Error::InvalidPid {
            pid,
            reason: format!(
                "refusing to operate on PID 1 (init) for service '{}'",
                service_name
            ),
        });
    }
    if pid > i32::MAX as u32 {
        return Err(Error::InvalidPid {
            pid,
            reason: format!(
                "PID {} exceeds i32::MAX for service '{}', cannot convert safely",
                pid, service_name
            ),
        });
    }
    Ok(nix::unistd::Pid::from_raw(pid as i32))
}
