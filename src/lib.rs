//! # Bundle Runtime
//!
//! Supervises the local services of an application bundle: a manifest
//! declares the services, their platform binaries, dependencies, ports,
//! secrets, migrations, assets and health policies, and the runtime brings
//! them up in dependency order and down in reverse.
//!
//! ## Features
//!
//! - **Dependency Ordering**: Deterministic topological start order; cycles are rejected before anything runs
//! - **Port Allocation**: Named ports allocated from ranges, probed by binding
//! - **Template Rendering**: `${data}`, `${bundle}` and `${service.port}` in env values, args and commands
//! - **Secret Gating**: Launch is deferred until every required secret has a value
//! - **Migrations**: Per-service migrations tracked in a persisted ledger
//! - **Integrity Checks**: SHA-256 and size budgets for bundled assets
//! - **Readiness**: HTTP, TCP, command and log-pattern checks
//! - **Control API**: Local HTTP API guarded by a bearer token
//!
//! ## Quick Start
//!
//! ```no_run
//! use bundle_runtime::{Parser, Supervisor};
//! use bundle_runtime::orchestrator::RuntimePaths;
//!
//! # async fn example() -> Result<(), bundle_runtime::Error> {
//! let manifest = Parser::new().load_manifest("bundle/manifest.json")?;
//!
//! let supervisor = Supervisor::builder()
//!     .manifest(manifest)
//!     .paths(RuntimePaths::new("bundle", "/var/lib/demo"))
//!     .start()
//!     .await?;
//!
//! supervisor.shutdown_requested().await;
//! supervisor.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency Model
//!
//! - The launch, every readiness watcher and every exit watcher run on tracked tasks
//! - Shared state sits behind `parking_lot` locks that are never held across `.await`
//! - Every wait honours the supervisor's `CancellationToken`
//! - Shutdown cancels, stops services in reverse order, then waits for all tasks

pub mod api;
pub mod assets;
pub mod config;
pub mod dependency;
pub mod error;
pub mod gpu;
pub mod healthcheck;
pub mod orchestrator;
pub mod parameter;
pub mod platform;
pub mod service;
pub mod state;
pub mod telemetry;

// Re-export commonly used types
pub use config::{Manifest, Parser};
pub use error::{Error, Result};
pub use orchestrator::Supervisor;
pub use service::ServiceStatus;
