//! Child process spawning.
//!
//! Every service and migration process is spawned through [`ProcessRunner`]
//! so the supervisor can be driven by fakes in tests.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::{Child, Command};

/// Everything needed to spawn one process.
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Complete environment; the parent environment is not inherited.
    pub env: BTreeMap<String, String>,
    /// Both output streams are appended here when set, discarded otherwise.
    pub log_path: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn display_command(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExitOutcome {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitOutcome {
    pub fn code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn signaled(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => write!(f, "terminated by signal {}", signal),
            (None, None) => write!(f, "unknown exit status"),
        }
    }
}

impl From<std::process::ExitStatus> for ExitOutcome {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

/// Spawns child processes.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn spawn(&self, spec: &CommandSpec) -> Result<Box<dyn ChildProcess>>;
}

/// A running child process.
///
/// `terminate` and `kill` signal the whole process group where the platform
/// supports it.
#[async_trait]
pub trait ChildProcess: Send {
    fn pid(&self) -> Option<u32>;

    /// Wait for the process to exit. Cancel-safe.
    async fn wait(&mut self) -> Result<ExitOutcome>;

    /// Request graceful termination (SIGTERM).
    fn terminate(&mut self) -> Result<()>;

    /// Force termination (SIGKILL).
    fn kill(&mut self) -> Result<()>;
}

/// Production runner backed by `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn spawn(&self, spec: &CommandSpec) -> Result<Box<dyn ChildProcess>> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args).env_clear().envs(&spec.env);

        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }

        match &spec.log_path {
            Some(log_path) => {
                if let Some(parent) = log_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let stdout = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(log_path)?;
                let stderr = stdout.try_clone()?;
                cmd.stdout(Stdio::from(stdout)).stderr(Stdio::from(stderr));
            }
            None => {
                cmd.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }
        cmd.stdin(Stdio::null());

        // A dropped handle must not leave an orphan behind
        cmd.kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        tracing::debug!("Spawning '{}'", spec.display_command());

        let child = cmd.spawn().map_err(|e| {
            Error::Process(format!(
                "Failed to spawn '{}': {}",
                spec.program.display(),
                e
            ))
        })?;

        Ok(Box::new(TokioChild {
            label: spec.program.display().to_string(),
            pid: child.id(),
            child,
        }))
    }
}

struct TokioChild {
    label: String,
    pid: Option<u32>,
    child: Child,
}

impl TokioChild {
    #[cfg(unix)]
    fn signal_group(&mut self, signal: nix::sys::signal::Signal) -> Result<()> {
        use nix::sys::signal::{kill, killpg};

        let Some(raw_pid) = self.pid else {
            return Ok(());
        };
        let pid = crate::error::validate_pid(raw_pid, &self.label)?;
        // Fall back to the single process if the group is already gone
        killpg(pid, signal)
            .or_else(|_| kill(pid, signal))
            .map_err(|e| Error::Process(format!("Failed to signal PID {}: {}", raw_pid, e)))
    }
}

#[async_trait]
impl ChildProcess for TokioChild {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn wait(&mut self) -> Result<ExitOutcome> {
        let status = self.child.wait().await?;
        Ok(status.into())
    }

    #[cfg(unix)]
    fn terminate(&mut self) -> Result<()> {
        self.signal_group(nix::sys::signal::Signal::SIGTERM)
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) -> Result<()> {
        self.kill()
    }

    #[cfg(unix)]
    fn kill(&mut self) -> Result<()> {
        self.signal_group(nix::sys::signal::Signal::SIGKILL)
    }

    #[cfg(not(unix))]
    fn kill(&mut self) -> Result<()> {
        self.child.start_kill().map_err(Error::from)
    }
}
