//! Fleet autoscaler entrypoint.

use anyhow::Context;
use clap::Parser;
use fleet_client::ServerClient;
use fleet_engine::{Autoscaler, ReconcileLoop};
use fleet_providers::new_provider;
use fleet_trace::{init_tracer, shutdown_tracer};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

mod args;

use args::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracer(&cli.tracing_config()).context("failed to initialize logging")?;

    let result = run(cli).await;
    if let Err(e) = &result {
        error!(error = %format!("{:#}", e), "Autoscaler stopped with an error");
    }

    shutdown_tracer();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let pool = cli.pool_config()?;
    pool.validate().context("invalid pool configuration")?;

    let client = ServerClient::new(&cli.server.server_url, cli.server_token()?)?
        .with_timeout(cli.server.server_timeout.into())?;

    let provider_config = cli.provider_config()?;
    let provider_name = provider_config.name();
    let provider = new_provider(provider_config, &pool, cli.user_data_template()?)
        .with_context(|| format!("failed to set up provider {}", provider_name))?;

    info!(
        provider = provider_name,
        pool_id = %pool.pool_id,
        min_agents = pool.min_agents,
        max_agents = pool.max_agents,
        workflows_per_agent = pool.workflows_per_agent,
        server = %cli.server.server_url,
        "Starting fleet autoscaler"
    );

    let autoscaler = Autoscaler::new(pool, Arc::new(client), provider);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        wait_for_shutdown().await;
        let _ = shutdown_tx.send(true);
    });

    ReconcileLoop::new(autoscaler, cli.pool.reconciliation_interval.into())
        .run(shutdown_rx)
        .await;

    info!("Fleet autoscaler stopped");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
