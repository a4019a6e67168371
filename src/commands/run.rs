use bundle_runtime::api::{self, AuthToken};
use bundle_runtime::orchestrator::RuntimePaths;
use bundle_runtime::platform::Capabilities;
use bundle_runtime::{Manifest, Supervisor};

pub async fn run_supervisor(
    mut manifest: Manifest,
    paths: RuntimePaths,
    ipc_port: Option<u16>,
) -> anyhow::Result<()> {
    let caps = Capabilities::system();
    // A fixed control API port is kept out of service allocation
    if ipc_port.is_some() {
        manifest.ipc.port = ipc_port;
    }
    let ipc_host = manifest.ipc.host.clone();
    let ipc_port = manifest.ipc.port;
    let token_path = paths.auth_token_file(&manifest);

    // Listener and token exist before any service starts
    let token = AuthToken::load_or_create(&token_path, caps.fs.as_ref())?;
    let listener = api::bind(&ipc_host, ipc_port).await?;

    let supervisor = Supervisor::builder()
        .manifest(manifest)
        .paths(paths)
        .capabilities(caps)
        .start()
        .await?;

    let server = tokio::spawn(api::serve(listener, supervisor.clone(), token));

    tokio::select! {
        _ = supervisor.shutdown_requested() => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::warn!("Failed to listen for Ctrl+C: {}", e);
            }
            tracing::info!("Interrupted, shutting down");
        }
    }

    supervisor.shutdown().await;
    server.await??;
    Ok(())
}
