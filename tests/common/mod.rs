//! Shared fakes and fixtures for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use bundle_runtime::error::{Error, Result};
use bundle_runtime::gpu::GpuDetector;
use bundle_runtime::orchestrator::RuntimePaths;
use bundle_runtime::platform::{
    Capabilities, ChildProcess, CommandSpec, ExitOutcome, LocalFs, NetworkDialer, ProcessRunner,
    SystemClock,
};
use bundle_runtime::{Manifest, Supervisor};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;

/// How a fake program behaves once spawned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Runs until terminated or killed.
    LongRunning,
    /// Ignores SIGTERM; only SIGKILL stops it.
    IgnoresTerm,
    /// Exits straight away with this code.
    Exits(i32),
}

/// Process runner that never spawns anything real.
///
/// Programs are matched by file name; unknown programs are long-running.
#[derive(Default)]
pub struct FakeRunner {
    behaviors: Mutex<HashMap<String, Behavior>>,
    spawned: Mutex<Vec<CommandSpec>>,
    signals: Arc<Mutex<Vec<String>>>,
}

impl FakeRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, program: &str, behavior: Behavior) {
        self.behaviors.lock().insert(program.to_string(), behavior);
    }

    /// File names of every spawned program, in spawn order.
    pub fn spawned_programs(&self) -> Vec<String> {
        self.spawned.lock().iter().map(program_name).collect()
    }

    pub fn spawned(&self) -> Vec<CommandSpec> {
        self.spawned.lock().clone()
    }

    /// `"term:<program>"` and `"kill:<program>"` entries, in order.
    pub fn signals(&self) -> Vec<String> {
        self.signals.lock().clone()
    }
}

fn program_name(spec: &CommandSpec) -> String {
    spec.program
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[async_trait]
impl ProcessRunner for FakeRunner {
    async fn spawn(&self, spec: &CommandSpec) -> Result<Box<dyn ChildProcess>> {
        let name = program_name(spec);
        let behavior = self
            .behaviors
            .lock()
            .get(&name)
            .copied()
            .unwrap_or(Behavior::LongRunning);
        self.spawned.lock().push(spec.clone());

        let initial = match behavior {
            Behavior::Exits(code) => Some(ExitOutcome::code(code)),
            _ => None,
        };
        let (tx, rx) = watch::channel(initial);
        Ok(Box::new(FakeChild {
            name,
            behavior,
            tx,
            rx,
            signals: self.signals.clone(),
        }))
    }
}

struct FakeChild {
    name: String,
    behavior: Behavior,
    tx: watch::Sender<Option<ExitOutcome>>,
    rx: watch::Receiver<Option<ExitOutcome>>,
    signals: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ChildProcess for FakeChild {
    fn pid(&self) -> Option<u32> {
        Some(4242)
    }

    async fn wait(&mut self) -> Result<ExitOutcome> {
        let outcome = *self
            .rx
            .wait_for(Option::is_some)
            .await
            .map_err(|e| Error::Process(e.to_string()))?;
        Ok(outcome.unwrap_or_default())
    }

    fn terminate(&mut self) -> Result<()> {
        self.signals.lock().push(format!("term:{}", self.name));
        if self.behavior != Behavior::IgnoresTerm {
            self.tx.send_if_modified(|slot| {
                slot.get_or_insert(ExitOutcome::signaled(15));
                true
            });
        }
        Ok(())
    }

    fn kill(&mut self) -> Result<()> {
        self.signals.lock().push(format!("kill:{}", self.name));
        self.tx.send_if_modified(|slot| {
            slot.get_or_insert(ExitOutcome::signaled(9));
            true
        });
        Ok(())
    }
}

/// Network where only the listed ports are taken.
#[derive(Default)]
pub struct FakeNetwork {
    pub busy: HashSet<u16>,
}

impl FakeNetwork {
    pub fn with_busy(ports: impl IntoIterator<Item = u16>) -> Arc<Self> {
        Arc::new(Self {
            busy: ports.into_iter().collect(),
        })
    }
}

#[async_trait]
impl NetworkDialer for FakeNetwork {
    fn try_bind(&self, addr: SocketAddr) -> io::Result<()> {
        if self.busy.contains(&addr.port()) {
            Err(io::Error::new(io::ErrorKind::AddrInUse, "busy"))
        } else {
            Ok(())
        }
    }

    async fn connect(&self, addr: SocketAddr, _timeout: Duration) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            format!("nothing listens on {}", addr),
        ))
    }
}

pub struct NoGpu;

impl GpuDetector for NoGpu {
    fn gpu_available(&self) -> bool {
        false
    }
}

pub fn capabilities(runner: Arc<FakeRunner>) -> Capabilities {
    Capabilities {
        runner,
        clock: Arc::new(SystemClock),
        network: FakeNetwork::with_busy([]),
        fs: Arc::new(LocalFs),
        gpu: Arc::new(NoGpu),
    }
}

/// A bundle directory plus a separate data dir.
pub struct TestBundle {
    pub dir: TempDir,
}

impl TestBundle {
    /// Create the bundle with an empty file for every `bin/<name>`.
    pub fn new(binaries: &[&str]) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        std::fs::create_dir_all(dir.path().join("bundle").join("bin"))
            .expect("Failed to create bin dir");
        for name in binaries {
            std::fs::write(dir.path().join("bundle").join("bin").join(name), b"#!/bin/sh\n")
                .expect("Failed to write binary");
        }
        Self { dir }
    }

    pub fn bundle_root(&self) -> PathBuf {
        self.dir.path().join("bundle")
    }

    pub fn data_dir(&self) -> PathBuf {
        self.dir.path().join("data")
    }

    pub fn paths(&self) -> RuntimePaths {
        RuntimePaths::new(self.bundle_root(), self.data_dir())
    }

    pub fn write(&self, rel: &str, contents: &[u8]) -> PathBuf {
        let path = self.bundle_root().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent");
        }
        std::fs::write(&path, contents).expect("Failed to write bundle file");
        path
    }

    /// Event names recorded in the telemetry file, in order.
    pub fn telemetry_events(&self) -> Vec<String> {
        read_events(&self.data_dir().join("telemetry.jsonl"))
    }
}

fn read_events(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
        .filter_map(|v| v["event"].as_str().map(str::to_string))
        .collect()
}

pub fn manifest(value: serde_json::Value) -> Manifest {
    serde_json::from_value(value).expect("Invalid test manifest")
}

/// A service running `bin/<binary>` on every platform.
pub fn service(id: &str, binary: &str, dependencies: &[&str]) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "binaries": {"default": {"path": format!("bin/{}", binary)}},
        "dependencies": dependencies,
    })
}

pub async fn start(
    bundle: &TestBundle,
    manifest: Manifest,
    runner: Arc<FakeRunner>,
) -> Result<Supervisor> {
    Supervisor::builder()
        .manifest(manifest)
        .paths(bundle.paths())
        .capabilities(capabilities(runner))
        .start()
        .await
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
