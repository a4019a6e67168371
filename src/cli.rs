use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "bundle-runtime")]
#[command(about = "Supervise the services of an application bundle", version)]
pub struct Cli {
    /// Bundle manifest (JSON, or YAML with a .yaml/.yml extension)
    #[arg(short, long, env = "BUNDLE_MANIFEST")]
    pub manifest: PathBuf,

    /// Bundle root (defaults to the manifest's directory)
    #[arg(short, long, env = "BUNDLE_ROOT")]
    pub bundle_root: Option<PathBuf>,

    /// Runtime data directory (defaults to the platform data dir plus the app name)
    #[arg(short, long, env = "BUNDLE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start every service and serve the control API until shutdown
    Run {
        /// Control API port, overriding the manifest's ipc.port
        #[arg(long)]
        ipc_port: Option<u16>,
    },
    /// Check the manifest, dependency graph, binaries and assets
    Validate,
}
