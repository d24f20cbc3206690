use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use victory_indexer::transport::sui::PollSettings;
use victory_indexer::transport::SuiRpcClient;
use victory_indexer::{
    build_filters, config::Config, db::init_db, DeliverySettings, Indexer, Repository,
    SuiEmissionSource, SuiEventTransport,
};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    let config = Config::from_env().context("Configuration error")?;

    let pool = init_db(&config.database_path, config.database_pool_size)
        .await
        .context("Failed to initialize database")?;
    let repo = Arc::new(Repository::new(pool));

    let rpc = SuiRpcClient::new(config.sui_rpc_url.clone());
    let emission_source =
        SuiEmissionSource::new(rpc.clone(), config.emission_controller_address.clone());
    let transport = Arc::new(SuiEventTransport::new(
        rpc,
        PollSettings {
            page_size: config.query_page_size,
            poll_interval: config.poll_interval(),
            idle_lag_ms: config.idle_watermark_lag_ms,
        },
    ));

    let indexer = Indexer::start(
        repo,
        &emission_source,
        transport,
        build_filters(&config.packages),
        DeliverySettings {
            max_attempts: config.max_delivery_attempts,
            retry_delay: config.retry_delay(),
        },
    )
    .await
    .context("Indexer failed to start")?;

    tracing::info!(rpc = %config.sui_rpc_url, "Indexer running");

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = heartbeat.tick() => indexer.log_heartbeat(),
        }
    }

    indexer.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl-C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
