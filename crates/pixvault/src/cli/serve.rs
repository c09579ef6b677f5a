//! The `pixvault serve` command: run the Jobs API.

use clap::Args;
use std::sync::Arc;
use std::time::Duration;

use pixvault_core::{Config, Pixvault};

use crate::server;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Listen address (overrides `[server] bind`)
    #[arg(short, long, env = "PIXVAULT_BIND")]
    pub bind: Option<String>,

    /// Worker pool size (overrides config)
    #[arg(short, long)]
    pub parallel: Option<usize>,
}

pub async fn execute(args: ServeArgs) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(parallel) = args.parallel {
        config.workers.pool_size = parallel;
    }
    let bind = config.server.bind.clone();

    let pixvault = Arc::new(Pixvault::new(config).await?);
    let app = server::router(Arc::clone(&pixvault));

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(
        "pixvault v{} listening on {} ({} workers, {:?} storage)",
        pixvault_core::VERSION,
        listener.local_addr()?,
        pixvault.config().workers.pool_size,
        pixvault.config().storage.backend
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Running jobs observe cancellation and persist their final state.
    pixvault.shutdown();
    let drain = async {
        while pixvault.coordinator().active_jobs() > 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    };
    if tokio::time::timeout(DRAIN_TIMEOUT, drain).await.is_err() {
        tracing::warn!(
            "{} jobs still running after {:?}",
            pixvault.coordinator().active_jobs(),
            DRAIN_TIMEOUT
        );
    }
    tracing::info!("pixvault stopped");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = signal::ctrl_c() => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
