//! Handle to a running service process.
//!
//! The OS child is owned by a [`ProcessDriver`] task that waits for exit and
//! delivers signals. The supervisor keeps a cloneable [`ServiceProcess`] that
//! talks to the driver over channels, so nothing holds a lock while a
//! process is being stopped.

use crate::platform::{ChildProcess, Clock, ExitOutcome};
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Signals the driver delivers to the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessSignal {
    Terminate,
    Kill,
}

/// How a stop request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Exited within the grace period after SIGTERM.
    Graceful,
    /// Needed SIGKILL.
    Forced,
    /// Had already exited before the stop.
    AlreadyExited,
}

impl fmt::Display for StopOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopOutcome::Graceful => write!(f, "graceful"),
            StopOutcome::Forced => write!(f, "forced"),
            StopOutcome::AlreadyExited => write!(f, "already exited"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceProcess {
    service_id: String,
    pid: Option<u32>,
    started_at: DateTime<Utc>,
    log_path: PathBuf,
    cancel: CancellationToken,
    signals: mpsc::UnboundedSender<ProcessSignal>,
    exit: watch::Receiver<Option<ExitOutcome>>,
    stop_requested: Arc<AtomicBool>,
}

impl ServiceProcess {
    /// Wrap a freshly spawned child. The returned driver must be run on a
    /// task for the process to be reaped.
    pub fn attach(
        service_id: impl Into<String>,
        child: Box<dyn ChildProcess>,
        started_at: DateTime<Utc>,
        log_path: PathBuf,
        cancel: CancellationToken,
    ) -> (Self, ProcessDriver) {
        let service_id = service_id.into();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = watch::channel(None);

        let process = Self {
            service_id: service_id.clone(),
            pid: child.pid(),
            started_at,
            log_path,
            cancel,
            signals: signal_tx,
            exit: exit_rx,
            stop_requested: Arc::new(AtomicBool::new(false)),
        };
        let driver = ProcessDriver {
            service_id,
            child,
            signals: signal_rx,
            exit: exit_tx,
        };
        (process, driver)
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Token cancelled when this process is being stopped.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Exit status, if the process has exited.
    pub fn exit_status(&self) -> Option<ExitOutcome> {
        *self.exit.borrow()
    }

    /// Whether the supervisor asked this process to stop.
    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Wait for the process to exit. `None` if its status could not be
    /// collected.
    pub async fn wait_exit(&self) -> Option<ExitOutcome> {
        let mut exit = self.exit.clone();
        match exit.wait_for(Option::is_some).await.map(|outcome| *outcome) {
            Ok(outcome) => outcome,
            Err(_) => *exit.borrow(),
        }
    }

    /// SIGTERM, wait up to `grace`, then SIGKILL.
    pub async fn stop(&self, grace: Duration, clock: &dyn Clock) -> StopOutcome {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.cancel.cancel();

        if self.exit_status().is_some() {
            return StopOutcome::AlreadyExited;
        }

        if self.signals.send(ProcessSignal::Terminate).is_err() {
            // Driver is gone, so the process has been reaped
            return StopOutcome::AlreadyExited;
        }

        tokio::select! {
            _ = self.wait_exit() => return StopOutcome::Graceful,
            _ = clock.sleep(grace) => {}
        }

        tracing::warn!(
            "Service '{}' did not exit after SIGTERM (grace period: {:?}), sending SIGKILL",
            self.service_id,
            grace
        );
        let _ = self.signals.send(ProcessSignal::Kill);
        self.wait_exit().await;
        StopOutcome::Forced
    }
}

enum DriverEvent {
    Exited(crate::error::Result<ExitOutcome>),
    Signal(Option<ProcessSignal>),
}

/// Owns the child until it exits.
pub struct ProcessDriver {
    service_id: String,
    child: Box<dyn ChildProcess>,
    signals: mpsc::UnboundedReceiver<ProcessSignal>,
    exit: watch::Sender<Option<ExitOutcome>>,
}

impl ProcessDriver {
    /// Run until the child exits, delivering signals as they arrive.
    pub async fn run(mut self) -> Option<ExitOutcome> {
        let mut signals_open = true;

        loop {
            let event = tokio::select! {
                result = self.child.wait() => DriverEvent::Exited(result),
                signal = self.signals.recv(), if signals_open => DriverEvent::Signal(signal),
            };

            match event {
                DriverEvent::Exited(Ok(outcome)) => {
                    self.exit.send_replace(Some(outcome));
                    return Some(outcome);
                }
                DriverEvent::Exited(Err(e)) => {
                    tracing::warn!("Failed to wait for '{}': {}", self.service_id, e);
                    return None;
                }
                DriverEvent::Signal(Some(ProcessSignal::Terminate)) => {
                    if let Err(e) = self.child.terminate() {
                        tracing::debug!("SIGTERM to '{}' failed: {}", self.service_id, e);
                    }
                }
                DriverEvent::Signal(Some(ProcessSignal::Kill)) => {
                    if let Err(e) = self.child.kill() {
                        tracing::debug!("SIGKILL to '{}' failed: {}", self.service_id, e);
                    }
                }
                // Every handle dropped; keep reaping
                DriverEvent::Signal(None) => signals_open = false,
            }
        }
    }
}
