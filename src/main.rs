mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use bundle_runtime::{Error as RuntimeError, Parser as ManifestParser};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        if let Some(runtime_error) = e.downcast_ref::<RuntimeError>() {
            eprintln!("Error: {}", runtime_error.with_suggestion());
        } else {
            eprintln!("Error: {:#}", e);
        }
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing()?;

    let manifest = ManifestParser::new().load_manifest(&cli.manifest)?;
    let paths = commands::resolve_paths(&cli.manifest, &manifest, cli.bundle_root, cli.data_dir)?;

    match cli.command {
        Commands::Validate => commands::run_validate(&manifest, &paths),
        Commands::Run { ipc_port } => commands::run_supervisor(manifest, paths, ipc_port).await,
    }
}

fn init_tracing() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}
