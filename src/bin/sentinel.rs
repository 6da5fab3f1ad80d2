#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::Parser;
use sentinel::{
    analysis::TransactionAnalyzer,
    communication::{AlertSink, LogAlertSink},
    config::Config,
    liquidity::{LiquidityTracker, PoolRegistry},
    monitoring::{logging, metrics},
    pipeline::Pipeline,
    rpc::{ResilientLedgerClient, RpcLedgerClient},
};
use std::{sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Surveillance en temps réel des anomalies on-chain (wash trading, flux cycliques, retraits de liquidité).
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Première hauteur à ingérer (prioritaire sur START_HEIGHT).
    #[arg(long)]
    start_height: Option<u64>,

    /// Registre JSON des pools à suivre (prioritaire sur POOLS_FILE).
    #[arg(long)]
    pools_file: Option<String>,

    /// Active le sondage de la mempool.
    #[arg(long)]
    mempool: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load()?;
    logging::setup_logging(config.log_format);

    info!("--- Démarrage de Sentinel ---");
    if cli.start_height.is_some() {
        config.start_height = cli.start_height;
    }
    if cli.pools_file.is_some() {
        config.pools_file = cli.pools_file;
    }
    config.mempool_poll_enabled |= cli.mempool;

    if let Some(port) = config.metrics_port {
        tokio::spawn(metrics::start_metrics_server(port));
    }

    let registry = match &config.pools_file {
        Some(path) => PoolRegistry::load(path).with_context(|| format!("Chargement du registre '{}'", path))?,
        None => {
            warn!("[Main] Aucun POOLS_FILE : seuls les retraits par mint seront suivis.");
            PoolRegistry::default()
        }
    };

    let rpc = RpcLedgerClient::new(config.ledger_rpc_url.clone(), Duration::from_millis(config.ledger_timeout_ms));
    let ledger = ResilientLedgerClient::new(Arc::new(rpc), config.retry_policy());
    let analyzer = Arc::new(TransactionAnalyzer::new(config.analyzer_config()));
    let tracker = Arc::new(LiquidityTracker::from_registry(registry, config.tracker_config()));
    let sink: Arc<dyn AlertSink> = Arc::new(LogAlertSink);

    let pipeline = Pipeline::new(
        ledger,
        config.ingestor_config(),
        analyzer,
        tracker,
        sink,
        config.pipeline_config(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("[Main] Ctrl-C reçu, arrêt en cours..."),
            Err(e) => error!(error = %e, "[Main] Impossible d'écouter les signaux, arrêt."),
        }
        let _ = shutdown_tx.send(true);
    });

    let stats = pipeline.run(shutdown_rx).await?;
    info!(
        blocks = stats.blocks_processed,
        orphaned = stats.blocks_orphaned,
        alerts = stats.alerts_emitted,
        "--- Sentinel arrêté ---"
    );
    Ok(())
}
