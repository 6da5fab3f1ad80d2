// DANS : src/pipeline.rs

use anyhow::{Context, Result};
use std::{
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::{mpsc, watch, Semaphore},
    task::JoinSet,
    time::sleep,
};
use tracing::{debug, error, info, warn};

use crate::{
    analysis::{AnalysisResult, TransactionAnalyzer},
    communication::{Alert, AlertSink, TransactionAlert},
    errors::IngestionError,
    ingestion::{BlockIngestor, IngestorConfig},
    liquidity::LiquidityTracker,
    model::{unix_now, Block, Transaction},
    rpc::ResilientLedgerClient,
};

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub poll_interval: Duration,
    /// Première hauteur à ingérer. `None` : on part de la dernière hauteur connue.
    pub start_height: Option<u64>,
    pub block_buffer_size: usize,
    pub analysis_workers: usize,
    pub min_alert_score: f64,
    pub mempool_poll_enabled: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(400),
            start_height: None,
            block_buffer_size: 16,
            analysis_workers: 8,
            min_alert_score: 0.3,
            mempool_poll_enabled: false,
        }
    }
}

/// Compteurs retournés à l'arrêt du pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub blocks_processed: u64,
    pub blocks_orphaned: u64,
    pub alerts_emitted: u64,
}

/// Ce qui transite entre le producteur (ingestion) et le consommateur (analyse).
enum Batch {
    Block(Arc<Block>),
    Pending(Vec<Transaction>),
}

pub struct Pipeline {
    ledger: ResilientLedgerClient,
    ingestor: BlockIngestor,
    analyzer: Arc<TransactionAnalyzer>,
    tracker: Arc<LiquidityTracker>,
    sink: Arc<dyn AlertSink>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        ledger: ResilientLedgerClient,
        ingestor_config: IngestorConfig,
        analyzer: Arc<TransactionAnalyzer>,
        tracker: Arc<LiquidityTracker>,
        sink: Arc<dyn AlertSink>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            ingestor: BlockIngestor::new(ledger.clone(), ingestor_config),
            ledger,
            analyzer,
            tracker,
            sink,
            config,
        }
    }

    /// Tourne jusqu'à ce que `shutdown` passe à `true` (ou que son émetteur disparaisse),
    /// puis vide le buffer de blocs avant de rendre la main.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<PipelineStats> {
        let Self { ledger, ingestor, analyzer, tracker, sink, config } = self;
        let (sender, mut receiver) = mpsc::channel::<Batch>(config.block_buffer_size.max(1));

        info!(
            start_height = ?config.start_height,
            buffer = config.block_buffer_size,
            workers = config.analysis_workers,
            "[Pipeline] Démarrage."
        );
        let producer = tokio::spawn(produce(ingestor, ledger, config.clone(), sender, shutdown));

        let consumer = Consumer { analyzer, tracker, sink, config };
        let mut stats = PipelineStats::default();
        while let Some(batch) = receiver.recv().await {
            match batch {
                Batch::Block(block) => consumer.handle_block(block, &mut stats).await,
                Batch::Pending(transactions) => consumer.handle_pending(transactions, &mut stats).await,
            }
        }

        stats.blocks_orphaned = producer.await.context("La tâche d'ingestion s'est arrêtée anormalement")?;
        info!(?stats, "[Pipeline] Arrêt propre.");
        Ok(stats)
    }
}

/// Producteur : ingère les hauteurs dans l'ordre croissant. `send` attend quand
/// le buffer est plein, ce qui freine l'ingestion au rythme de l'analyse.
/// Retourne le nombre de blocs orphelins écartés.
async fn produce(
    mut ingestor: BlockIngestor,
    ledger: ResilientLedgerClient,
    config: PipelineConfig,
    sender: mpsc::Sender<Batch>,
    mut shutdown: watch::Receiver<bool>,
) -> u64 {
    let mut next_height = config.start_height;
    let mut orphaned = 0;

    'poll: loop {
        if *shutdown.borrow() {
            break;
        }

        match ledger.latest_height().await {
            Ok(latest) => {
                let from = *next_height.get_or_insert(latest);
                for height in from..=latest {
                    if *shutdown.borrow() {
                        break 'poll;
                    }
                    match ingestor.process_new_block(height).await {
                        Ok(block) => {
                            if sender.send(Batch::Block(block)).await.is_err() {
                                warn!("[Pipeline] Consommateur fermé, arrêt de l'ingestion.");
                                break 'poll;
                            }
                        }
                        Err(IngestionError::Orphaned { .. }) => {
                            orphaned += 1;
                            warn!(height, "[Pipeline] Bloc orphelin écarté avant analyse.");
                        }
                        Err(e) if e.is_expected_gap() => debug!(height, reason = %e, "[Pipeline] Hauteur ignorée."),
                        Err(e) => error!(height, error = %e, "[Pipeline] Bloc abandonné."),
                    }
                    next_height = Some(height + 1);
                }
            }
            Err(e) => warn!(error = %e, "[Pipeline] Impossible de lire la dernière hauteur."),
        }

        if config.mempool_poll_enabled {
            let pending = ingestor.fetch_mempool().await;
            if !pending.is_empty() && sender.send(Batch::Pending(pending)).await.is_err() {
                break;
            }
        }

        tokio::select! {
            _ = sleep(config.poll_interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    debug!(orphaned, "[Pipeline] Producteur arrêté.");
    orphaned
}

struct Consumer {
    analyzer: Arc<TransactionAnalyzer>,
    tracker: Arc<LiquidityTracker>,
    sink: Arc<dyn AlertSink>,
    config: PipelineConfig,
}

impl Consumer {
    /// Le bloc reçu a déjà passé le contrôle de validité de l'ingestor.
    async fn handle_block(&self, block: Arc<Block>, stats: &mut PipelineStats) {
        let results = self.analyze_concurrently(Arc::clone(&block), false).await;
        let pool_alerts = self.tracker.observe_block(&block).await;

        let fallback_time = block.block_time.unwrap_or_else(unix_now);
        for (index, result) in results {
            let tx = &block.transactions[index];
            self.emit_if_suspicious(tx, result, tx.block_time.unwrap_or(fallback_time), stats).await;
        }
        for alert in pool_alerts {
            self.emit(alert.into(), stats).await;
        }

        stats.blocks_processed += 1;
        debug!(height = block.block_height, "[Pipeline] Bloc traité.");
    }

    async fn handle_pending(&self, transactions: Vec<Transaction>, stats: &mut PipelineStats) {
        let batch = Arc::new(Block { transactions, ..Block::default() });
        let now = unix_now();
        for (index, result) in self.analyze_concurrently(Arc::clone(&batch), true).await {
            self.emit_if_suspicious(&batch.transactions[index], result, now, stats).await;
        }
    }

    /// Analyse les transactions en parallèle, au plus `analysis_workers` à la fois.
    /// Les résultats sont rendus dans l'ordre du bloc.
    async fn analyze_concurrently(&self, block: Arc<Block>, pending: bool) -> Vec<(usize, AnalysisResult)> {
        let semaphore = Arc::new(Semaphore::new(self.config.analysis_workers.max(1)));
        let mut tasks = JoinSet::new();

        for index in 0..block.transactions.len() {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else { break };
            let analyzer = Arc::clone(&self.analyzer);
            let block = Arc::clone(&block);
            tasks.spawn(async move {
                let _permit = permit;
                let tx = &block.transactions[index];
                let result = if pending { analyzer.analyze_pending(tx) } else { analyzer.analyze_transaction(tx) };
                (index, result)
            });
        }

        let mut results = Vec::with_capacity(block.transactions.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => error!(error = %e, "[Pipeline] Un worker d'analyse a échoué."),
            }
        }
        results.sort_by_key(|(index, _)| *index);
        results
    }

    async fn emit_if_suspicious(&self, tx: &Transaction, result: AnalysisResult, timestamp: i64, stats: &mut PipelineStats) {
        if !result.warrants_alert(self.config.min_alert_score) {
            return;
        }
        let alert = TransactionAlert {
            transaction_signature: tx.signature.clone(),
            risk_score: result.risk_score,
            detected_patterns: result.detected_patterns,
            timestamp,
        };
        self.emit(alert.into(), stats).await;
    }

    async fn emit(&self, alert: Alert, stats: &mut PipelineStats) {
        match self.sink.emit(alert).await {
            Ok(()) => stats.alerts_emitted += 1,
            Err(e) => error!(error = %e, "[Pipeline] Échec d'envoi d'une alerte."),
        }
    }
}
