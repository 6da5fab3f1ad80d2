// DANS : src/ingestion/block_ingestor.rs

use super::mempool_filter::check_fee_consistency;
use super::IngestorConfig;
use crate::errors::{IngestionError, LedgerError};
use crate::model::{Block, NormalizedBlock, RawTransaction, Transaction};
use crate::monitoring::metrics::{BLOCKS_INGESTED, BLOCKS_ORPHANED, BLOCKS_SKIPPED, LAST_ACCEPTED_HEIGHT, TRANSACTIONS_DROPPED};
use crate::rpc::ResilientLedgerClient;
use serde_json::Value;
use std::{
    collections::{BTreeMap, HashSet, VecDeque},
    sync::Arc,
};
use tracing::{debug, info, warn};

/// Fenêtre bornée des signatures déjà vues (la plus ancienne est évincée).
#[derive(Debug)]
pub struct SignatureWindow {
    capacity: usize,
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl SignatureWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            seen: HashSet::new(),
        }
    }

    /// `true` si la signature est nouvelle (elle est alors mémorisée).
    pub fn insert(&mut self, signature: &str) -> bool {
        if self.seen.contains(signature) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(signature.to_owned());
        self.seen.insert(signature.to_owned());
        true
    }

    pub fn contains(&self, signature: &str) -> bool {
        self.seen.contains(signature)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Consommateur séquentiel du flux de blocs : normalise, dédoublonne par hauteur
/// et par signature. Un seul propriétaire, donc pas de verrou.
pub struct BlockIngestor {
    ledger: ResilientLedgerClient,
    config: IngestorConfig,
    last_accepted: Option<u64>,
    recent_blocks: BTreeMap<u64, Arc<Block>>,
    block_signatures: SignatureWindow,
    mempool_signatures: SignatureWindow,
}

impl BlockIngestor {
    pub fn new(ledger: ResilientLedgerClient, config: IngestorConfig) -> Self {
        Self {
            block_signatures: SignatureWindow::new(config.seen_signature_capacity),
            mempool_signatures: SignatureWindow::new(config.seen_signature_capacity),
            ledger,
            config,
            last_accepted: None,
            recent_blocks: BTreeMap::new(),
        }
    }

    pub fn last_accepted_height(&self) -> Option<u64> {
        self.last_accepted
    }

    /// Récupère, normalise et accepte le bloc `height`.
    /// Idempotent : une hauteur déjà construite est resservie depuis le cache, sans appel au ledger.
    pub async fn process_new_block(&mut self, height: u64) -> Result<Arc<Block>, IngestionError> {
        if let Some(block) = self.recent_blocks.get(&height) {
            debug!(height, "[Ingestor] Bloc déjà construit, resservi depuis le cache.");
            return Ok(Arc::clone(block));
        }

        if let Some(last_accepted) = self.last_accepted {
            if height <= last_accepted {
                BLOCKS_SKIPPED.with_label_values(&["stale"]).inc();
                return Err(IngestionError::StaleHeight { height, last_accepted });
            }
        }

        let raw = self.ledger.get_block(height).await.map_err(|e| {
            let reason = match &e.source {
                LedgerError::SlotSkipped(_) => "slot_skipped",
                source if source.is_retryable() => "retries_exhausted",
                _ => "ledger_error",
            };
            BLOCKS_SKIPPED.with_label_values(&[reason]).inc();
            IngestionError::Ledger { height, attempts: e.attempts, source: e.source }
        })?;

        let NormalizedBlock { mut block, dropped } = raw.into_block(height).inspect_err(|_| {
            BLOCKS_SKIPPED.with_label_values(&["malformed"]).inc();
        })?;

        for reason in &dropped {
            TRANSACTIONS_DROPPED.with_label_values(&[reason.as_label()]).inc();
        }
        if !dropped.is_empty() {
            warn!(height, dropped = dropped.len(), "[Ingestor] Transactions illisibles écartées du bloc.");
        }

        let received = block.transactions.len();
        let seen = &self.block_signatures;
        let mut in_block = HashSet::new();
        block.transactions.retain(|tx| !seen.contains(&tx.signature) && in_block.insert(tx.signature.clone()));
        let duplicates = received - block.transactions.len();
        if duplicates > 0 {
            TRANSACTIONS_DROPPED.with_label_values(&["duplicate"]).inc_by(duplicates as u64);
            debug!(height, duplicates, "[Ingestor] Signatures déjà vues retirées du bloc.");
        }

        // Rien n'est mémorisé avant cette vérification : un bloc orphelin ne laisse aucune trace.
        match self.ledger.is_block_valid(height, block.blockhash.as_deref()).await {
            Ok(true) => {}
            Ok(false) => {
                BLOCKS_ORPHANED.inc();
                return Err(IngestionError::Orphaned { height });
            }
            Err(e) => warn!(height, error = %e, "[Ingestor] Validité du bloc non vérifiable, bloc accepté."),
        }
        for tx in &block.transactions {
            self.block_signatures.insert(&tx.signature);
        }

        let block = Arc::new(block);
        self.remember(height, Arc::clone(&block));
        self.last_accepted = Some(height);
        LAST_ACCEPTED_HEIGHT.set(height as i64);
        BLOCKS_INGESTED.inc();

        info!(height, transactions = block.transactions.len(), "[Ingestor] Bloc accepté.");
        Ok(block)
    }

    /// Ne garde que les transactions de mempool dont les variations de solde sont
    /// cohérentes avec les frais déclarés. Ne lève jamais d'erreur : tout ce qui est
    /// incohérent ou illisible est simplement écarté.
    pub fn filter_mempool_transactions(&mut self, transactions: Vec<Value>) -> Vec<Transaction> {
        let tolerance = self.config.fee_tolerance_lamports;
        let signatures = &mut self.mempool_signatures;

        transactions
            .into_iter()
            .filter_map(|value| {
                let tx = match RawTransaction::from_value(value).and_then(|raw| raw.normalize(None)) {
                    Ok(tx) => tx,
                    Err(reason) => {
                        TRANSACTIONS_DROPPED.with_label_values(&[reason.as_label()]).inc();
                        return None;
                    }
                };

                if let Err(failure) = check_fee_consistency(&tx.meta, tolerance) {
                    TRANSACTIONS_DROPPED.with_label_values(&[failure.as_label()]).inc();
                    debug!(signature = %tx.signature, reason = failure.as_label(), "[Ingestor] Transaction de mempool écartée.");
                    return None;
                }

                if !signatures.insert(&tx.signature) {
                    TRANSACTIONS_DROPPED.with_label_values(&["duplicate"]).inc();
                    return None;
                }
                Some(tx)
            })
            .collect()
    }

    pub async fn fetch_mempool(&mut self) -> Vec<Transaction> {
        match self.ledger.get_mempool_snapshot().await {
            Ok(snapshot) => self.filter_mempool_transactions(snapshot),
            Err(e) => {
                warn!(error = %e, "[Ingestor] Snapshot de mempool indisponible.");
                Vec::new()
            }
        }
    }

    fn remember(&mut self, height: u64, block: Arc<Block>) {
        self.recent_blocks.insert(height, block);
        while self.recent_blocks.len() > self.config.recent_block_cache.max(1) {
            self.recent_blocks.pop_first();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RawBlock;
    use crate::rpc::{LedgerClient, RetryPolicy};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct MockLedger {
        blocks: Mutex<HashMap<u64, Value>>,
        failures: Mutex<HashMap<u64, LedgerError>>,
        orphaned: Mutex<HashSet<u64>>,
        fetches: AtomicUsize,
    }

    impl MockLedger {
        fn with_block(self, height: u64, block: Value) -> Self {
            self.blocks.lock().unwrap().insert(height, block);
            self
        }

        fn with_failure(self, height: u64, error: LedgerError) -> Self {
            self.failures.lock().unwrap().insert(height, error);
            self
        }

        fn with_orphan(self, height: u64, block: Value) -> Self {
            self.orphaned.lock().unwrap().insert(height);
            self.with_block(height, block)
        }
    }

    #[async_trait]
    impl LedgerClient for MockLedger {
        async fn get_block(&self, height: u64) -> Result<RawBlock, LedgerError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if let Some(error) = self.failures.lock().unwrap().get(&height) {
                return Err(error.clone());
            }
            let value = self.blocks.lock().unwrap().get(&height).cloned();
            match value {
                Some(v) => serde_json::from_value(v).map_err(|e| LedgerError::Malformed(e.to_string())),
                None => Err(LedgerError::SlotSkipped(height)),
            }
        }

        async fn get_mempool_snapshot(&self) -> Result<Vec<Value>, LedgerError> {
            Ok(Vec::new())
        }

        async fn latest_height(&self) -> Result<u64, LedgerError> {
            Ok(self.blocks.lock().unwrap().keys().copied().max().unwrap_or_default())
        }

        async fn is_block_valid(&self, height: u64, _blockhash: Option<&str>) -> Result<bool, LedgerError> {
            Ok(!self.orphaned.lock().unwrap().contains(&height))
        }
    }

    fn ingestor_for(ledger: Arc<MockLedger>) -> BlockIngestor {
        let policy = RetryPolicy {
            timeout: Duration::from_millis(200),
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        };
        BlockIngestor::new(ResilientLedgerClient::new(ledger, policy), IngestorConfig::default())
    }

    fn single_tx_block(signature: &str) -> Value {
        json!({
            "blockHeight": 12345,
            "transactions": [{
                "transaction": {
                    "signatures": [signature],
                    "message": {
                        "accountKeys": ["Address1", "Address2"],
                        "instructions": [{ "programId": "Program1" }]
                    }
                }
            }],
            "blockTime": 1678901234
        })
    }

    #[tokio::test]
    async fn test_process_new_block() {
        let ledger = Arc::new(MockLedger::default().with_block(12345, single_tx_block("5KtPn1")));
        let mut ingestor = ingestor_for(ledger);

        let block = ingestor.process_new_block(12345).await.unwrap();

        assert_eq!(block.block_height, 12345);
        assert_eq!(block.transactions.len(), 1);
        assert_eq!(block.block_time, Some(1678901234));
        assert_eq!(block.transactions[0].instructions[0].program_id.as_deref(), Some("Program1"));
        assert_eq!(ingestor.last_accepted_height(), Some(12345));
    }

    #[tokio::test]
    async fn test_process_new_block_is_idempotent() {
        let ledger = Arc::new(MockLedger::default().with_block(12345, single_tx_block("5KtPn1")));
        let mut ingestor = ingestor_for(Arc::clone(&ledger));

        let first = ingestor.process_new_block(12345).await.unwrap();
        let second = ingestor.process_new_block(12345).await.unwrap();

        assert_eq!(*first, *second);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(ledger.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_older_uncached_height_is_stale() {
        let ledger = Arc::new(
            MockLedger::default()
                .with_block(10, single_tx_block("A"))
                .with_block(11, single_tx_block("B")),
        );
        let mut ingestor = BlockIngestor::new(
            ResilientLedgerClient::new(ledger.clone(), RetryPolicy::default()),
            IngestorConfig { recent_block_cache: 1, ..IngestorConfig::default() },
        );

        ingestor.process_new_block(10).await.unwrap();
        ingestor.process_new_block(11).await.unwrap();
        // 10 a été évincé du cache et 11 est déjà accepté : doublon écarté.
        let err = ingestor.process_new_block(10).await.unwrap_err();
        assert!(matches!(err, IngestionError::StaleHeight { height: 10, last_accepted: 11 }));
        assert_eq!(ledger.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_transactions_field_fails() {
        let ledger = Arc::new(MockLedger::default().with_block(3, json!({ "blockTime": 1 })));
        let mut ingestor = ingestor_for(ledger);

        let err = ingestor.process_new_block(3).await.unwrap_err();
        assert!(matches!(err, IngestionError::MalformedBlock { height: 3, .. }));
        assert_eq!(ingestor.last_accepted_height(), None);
    }

    #[tokio::test]
    async fn test_transport_errors_exhaust_retries() {
        let ledger = Arc::new(MockLedger::default().with_failure(4, LedgerError::Transport("503".into())));
        let mut ingestor = ingestor_for(Arc::clone(&ledger));

        let err = ingestor.process_new_block(4).await.unwrap_err();
        assert!(matches!(err, IngestionError::Ledger { height: 4, attempts: 3, .. }));
        assert_eq!(ledger.fetches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_resent_signatures_are_deduplicated_across_blocks() {
        let ledger = Arc::new(
            MockLedger::default()
                .with_block(20, single_tx_block("SameSig"))
                .with_block(21, single_tx_block("SameSig")),
        );
        let mut ingestor = ingestor_for(ledger);

        assert_eq!(ingestor.process_new_block(20).await.unwrap().transactions.len(), 1);
        assert!(ingestor.process_new_block(21).await.unwrap().transactions.is_empty());
    }

    #[tokio::test]
    async fn test_orphaned_block_leaves_no_trace() {
        let ledger = Arc::new(
            MockLedger::default()
                .with_orphan(30, single_tx_block("Reincluded"))
                .with_block(31, single_tx_block("Reincluded")),
        );
        let mut ingestor = ingestor_for(ledger);

        let err = ingestor.process_new_block(30).await.unwrap_err();
        assert!(matches!(err, IngestionError::Orphaned { height: 30 }));
        assert_eq!(ingestor.last_accepted_height(), None);

        // La même transaction, reprise dans le bloc canonique, n'est pas un doublon.
        let canonical = ingestor.process_new_block(31).await.unwrap();
        assert_eq!(canonical.transactions.len(), 1);
        assert_eq!(canonical.transactions[0].signature, "Reincluded");
    }

    #[tokio::test]
    async fn test_skipped_slot_is_counted_under_its_own_label() {
        let skipped = BLOCKS_SKIPPED.with_label_values(&["slot_skipped"]);
        let before = skipped.get();
        let mut ingestor = ingestor_for(Arc::new(MockLedger::default()));

        let err = ingestor.process_new_block(50).await.unwrap_err();

        assert!(err.is_expected_gap());
        assert!(skipped.get() > before);
    }

    #[tokio::test]
    async fn test_duplicate_signatures_within_a_block_are_dropped() {
        let mut block = single_tx_block("Twice");
        let tx = block["transactions"][0].clone();
        block["transactions"].as_array_mut().unwrap().push(tx);
        let ledger = Arc::new(MockLedger::default().with_block(40, block));
        let mut ingestor = ingestor_for(ledger);

        assert_eq!(ingestor.process_new_block(40).await.unwrap().transactions.len(), 1);
    }

    #[test]
    fn test_filter_mempool_transactions() {
        let ledger = Arc::new(MockLedger::default());
        let mut ingestor = ingestor_for(ledger);

        let mock_txs = vec![
            json!({ "signature": "5KtPn1", "meta": { "fee": 5000, "preBalances": [1000000, 2000000], "postBalances": [990000, 2010000] } }),
            json!({ "signature": "6LuQm2", "meta": { "fee": 5000, "preBalances": [500000, 1000000], "postBalances": [495000, 1005000] } }),
            json!({ "signature": "NoFee", "meta": { "preBalances": [10], "postBalances": [5] } }),
            json!({ "signature": "Skewed", "meta": { "fee": 5000, "preBalances": [10, 20], "postBalances": [5] } }),
            json!({ "signature": "Minted", "meta": { "fee": 5000, "preBalances": [100], "postBalances": [900000] } }),
            json!("not even an object"),
        ];

        let filtered = ingestor.filter_mempool_transactions(mock_txs);
        let kept: Vec<&str> = filtered.iter().map(|tx| tx.signature.as_str()).collect();
        assert_eq!(kept, vec!["5KtPn1", "6LuQm2"]);

        // Un second snapshot identique ne ré-émet rien.
        let again = ingestor.filter_mempool_transactions(vec![
            json!({ "signature": "5KtPn1", "meta": { "fee": 5000, "preBalances": [1000000, 2000000], "postBalances": [990000, 2010000] } }),
        ]);
        assert!(again.is_empty());
    }

    #[test]
    fn test_signature_window_evicts_oldest() {
        let mut window = SignatureWindow::new(2);
        assert!(window.insert("a"));
        assert!(window.insert("b"));
        assert!(!window.insert("a"));
        assert!(window.insert("c"));
        assert_eq!(window.len(), 2);
        // "a" a été évincé : il redevient nouveau.
        assert!(window.insert("a"));
    }
}
