use anyhow::Context;
use tokio::sync::watch;
use tracing::info;

use orderpush_infra::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = WorkerConfig::from_env().context("loading configuration")?;
    orderpush_observability::init(&config.log_settings()).context("opening log file")?;

    let mut worker = orderpush_worker::bootstrap::build(&config).context("building worker")?;

    let (shutdown, receiver) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("termination signal received; finishing current cycle");
        let _ = shutdown.send(true);
    });

    let reason = worker.run(receiver).await;
    info!(%reason, stats = ?worker.stats(), "worker exiting");
    std::process::exit(reason.exit_code());
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(err) => {
            tracing::warn!(error = %err, "cannot listen for SIGTERM; only Ctrl-C is honoured");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
