pub mod cli;
pub mod config;
pub mod error;
pub mod storage;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands, ConfigArgs};
use config::{load_config, AppConfig};
use error::AppError;
use solana_client::nonblocking::rpc_client::RpcClient;
use solsniffer_connector::{
    retry::retry_notify,
    rpc::{ChainClient, RpcChainClient},
    storage::CheckpointStore,
    telemetry::PipelineStats,
    transport::WsDialer,
    workers::{BackfillEngine, BackfillReport, SnifferService, WorkerContext},
    SnifferError,
};
use std::sync::Arc;
use storage::SledStore;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// The main entry point for running the application logic.
/// This function handles CLI parsing, configuration, and dispatch to a subcommand.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            let config = prepare(&args, true)?;
            run_service(config).await
        }
        Commands::Backfill(args) => {
            let config = prepare(&args, true)?;
            let report = run_backfill(config).await?;
            println!("{}", render_report(&report));
            Ok(())
        }
        Commands::Checkpoint(args) => {
            let config = prepare(&args, false)?;
            let store = open_store(&config, &CancellationToken::new()).await?;
            println!("{}", store.get_checkpoint().await?);
            Ok(())
        }
    }
}

/// Loads (and optionally validates) the configuration, then installs logging.
fn prepare(args: &ConfigArgs, validate: bool) -> Result<AppConfig> {
    match &args.config {
        Some(path) => println!("Loading configuration from '{}'", path),
        None => println!("No config file provided, using defaults and environment overrides."),
    }
    let config = load_config(args.config.as_deref())?;
    if validate {
        config.validate()?;
    }
    solsniffer_logger::init(&config.app.log)?;

    let connector = &config.connector;
    tracing::info!(
        name = %config.app.name,
        environment = ?config.app.environment,
        rpc = %redacted_endpoint(&connector.solana.rpc_url),
        ws = %redacted_endpoint(&format!("{}://{}", connector.solana.ws.scheme, connector.solana.ws.host)),
        commitment = ?connector.solana.commitment,
        wallets = connector.monitor.wallets.len(),
        tokens = connector.monitor.tokens.len(),
        backfill = ?connector.backfill,
        "Configuration loaded."
    );
    Ok(config)
}

/// Reduces an endpoint to scheme, host and port, since paths, queries and
/// credentials commonly carry provider API keys.
pub fn redacted_endpoint(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(url) => match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{}://{}:{}", url.scheme(), host, port),
            (Some(host), None) => format!("{}://{}", url.scheme(), host),
            (None, _) => format!("{}://<redacted>", url.scheme()),
        },
        Err(_) => "<unparseable endpoint>".to_string(),
    }
}

/// Opens the `sled` database off the async workers, retrying under the `database` preset.
pub async fn open_store(config: &AppConfig, cancel: &CancellationToken) -> Result<SledStore, AppError> {
    let path = config.app.db_path.as_str();
    let policy = config.connector.retry.database.to_policy();

    let db = retry_notify(
        cancel,
        &policy,
        move || async move {
            let owned = path.to_owned();
            tokio::task::spawn_blocking(move || sled::open(owned))
                .await
                .map_err(|e| SnifferError::Persistence(format!("store open task failed: {}", e)))?
                .map_err(|e| SnifferError::Persistence(e.to_string()))
        },
        |attempt, e| tracing::warn!(attempt, path, "Failed to open the store: {}", e),
    )
    .await
    .map_err(|source| AppError::Store {
        path: path.to_owned(),
        source,
    })?;

    tracing::info!(path, "Store opened.");
    Ok(SledStore::new(db))
}

fn chain_client(config: &AppConfig) -> Arc<dyn ChainClient> {
    let solana = &config.connector.solana;
    let rpc_client = Arc::new(RpcClient::new_with_timeout(
        solana.rpc_url.clone(),
        solana.request_timeout(),
    ));
    Arc::new(RpcChainClient::new(rpc_client, solana.commitment))
}

/// Starts the sniffer service and handles graceful shutdown.
async fn run_service(config: AppConfig) -> Result<()> {
    let bootstrap = CancellationToken::new();
    let store = Arc::new(open_store(&config, &bootstrap).await?);
    let chain = chain_client(&config);
    let dialer = Arc::new(WsDialer::new(config.connector.solana.ws.url()?));

    let (service, handle) =
        SnifferService::new(Arc::new(config.connector), chain, store.clone(), store, dialer);
    let mut worker = tokio::spawn(service.run());

    tokio::select! {
        finished = &mut worker => {
            finished
                .context("Sniffer service task panicked")?
                .context("Sniffer service stopped")?;
            return Ok(());
        }
        _ = shutdown_signal() => {
            tracing::info!("Received shutdown signal, initiating graceful shutdown...");
            handle.stop();
        }
    }

    worker
        .await
        .context("Sniffer service task panicked")?
        .context("Sniffer service stopped with an error")?;
    tracing::info!(stats = ?handle.stats(), "Shutdown complete.");
    Ok(())
}

/// Runs one backfill pass; a shutdown signal cancels the remaining blocks.
async fn run_backfill(config: AppConfig) -> Result<BackfillReport> {
    let cancel = CancellationToken::new();
    let store = Arc::new(open_store(&config, &cancel).await?);
    let stats = Arc::new(PipelineStats::new());
    let ctx = WorkerContext::new(
        Arc::new(config.connector.clone()),
        chain_client(&config),
        store.clone(),
        store,
        stats.clone(),
    );
    let engine = BackfillEngine::new(ctx);

    let backfill = engine.backfill_missed_blocks(&cancel);
    tokio::pin!(backfill);
    let finished = tokio::select! {
        report = &mut backfill => Some(report),
        _ = shutdown_signal() => None,
    };
    let report = match finished {
        Some(report) => report,
        None => {
            tracing::info!("Received shutdown signal, cancelling the backfill...");
            cancel.cancel();
            backfill.await
        }
    }
    .context("Backfill failed")?;

    tracing::info!(stats = ?stats.snapshot(), "Backfill finished.");
    Ok(report)
}

/// Human-readable summary printed by the `backfill` subcommand.
pub fn render_report(report: &BackfillReport) -> String {
    let Some(from) = report.from else {
        return format!("Already up to date (checkpoint {}).", report.checkpoint);
    };
    let mut out = format!(
        "Scanned blocks {}..={}: {} processed, {} transactions saved, checkpoint {}.",
        from, report.to, report.blocks_processed, report.transactions_saved, report.checkpoint
    );
    if !report.failed_blocks.is_empty() {
        out.push_str(&format!("\nFailed blocks: {:?}", report.failed_blocks));
    }
    if report.skipped_blocks > 0 {
        out.push_str(&format!("\nSkipped {} blocks after cancellation.", report.skipped_blocks));
    }
    out
}

/// Resolves on Ctrl+C, or on SIGTERM where supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to listen for Ctrl+C.");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to listen for SIGTERM.");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_are_logged_without_keys() {
        assert_eq!(
            redacted_endpoint("https://mainnet.helius-rpc.com/?api-key=secret"),
            "https://mainnet.helius-rpc.com"
        );
        assert_eq!(
            redacted_endpoint("https://user:pw@solana.example.com:8443/abc123/"),
            "https://solana.example.com:8443"
        );
        assert_eq!(redacted_endpoint("not a url"), "<unparseable endpoint>");
    }

    #[test]
    fn report_for_an_up_to_date_store() {
        let report = BackfillReport {
            checkpoint: 200,
            to: 150,
            ..BackfillReport::default()
        };
        assert_eq!(render_report(&report), "Already up to date (checkpoint 200).");
    }

    #[test]
    fn report_lists_failures_and_skips() {
        let report = BackfillReport {
            from: Some(101),
            to: 105,
            blocks_processed: 3,
            failed_blocks: vec![102],
            skipped_blocks: 1,
            transactions_saved: 2,
            checkpoint: 101,
        };
        let text = render_report(&report);
        assert!(text.starts_with("Scanned blocks 101..=105: 3 processed, 2 transactions saved, checkpoint 101."));
        assert!(text.contains("Failed blocks: [102]"));
        assert!(text.contains("Skipped 1 blocks"));
    }
}
