use std::convert::TryFrom;

use dbaas_registration::config::Config;
use dbaas_registration::Controller;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize the logger
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::new_from_flags(env!("CARGO_PKG_VERSION"))?;

    // Read the environment. Note that this tries a KubeConfig file first, then
    // falls back on an in-cluster configuration.
    let kubeconfig = kube::Config::infer().await?;
    let client = kube::Client::try_from(kubeconfig)?;

    let shutdown = CancellationToken::new();
    tokio::spawn(start_signal_task(shutdown.clone()));

    Controller::new(client, config).run(shutdown).await;
    info!("Shut down");
    Ok(())
}

/// Awaits SIGINT or SIGTERM and cancels every running reconciliation.
async fn start_signal_task(shutdown: CancellationToken) -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res?;
                warn!("Caught keyboard interrupt.");
            }
            _ = terminate.recv() => warn!("Caught termination signal."),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        warn!("Caught keyboard interrupt.");
    }
    shutdown.cancel();
    Ok(())
}
