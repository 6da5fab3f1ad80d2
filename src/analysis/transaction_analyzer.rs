// DANS : src/analysis/transaction_analyzer.rs

use super::cycle_detector::detect_cycle;
use super::scoring::{combine, wash_score, SignalScores};
use super::wash_window::{wash_key, WashWindow};
use super::{AnalysisResult, AnalyzerConfig, PATTERN_CYCLIC, PATTERN_LIQUIDITY_REMOVAL, PATTERN_WASH_TRADING};
use crate::liquidity::{detect_liquidity_removal, liquidity_events, removal_severity};
use crate::model::{unix_now, Transaction};
use crate::monitoring::metrics::TRANSACTIONS_ANALYZED;
use std::collections::BTreeSet;
use tracing::debug;

/// Détecteur par transaction. Partagé entre les workers via `Arc` :
/// seule la fenêtre glissante est mutable, et elle gère son propre verrouillage.
#[derive(Debug)]
pub struct TransactionAnalyzer {
    config: AnalyzerConfig,
    window: WashWindow,
}

impl TransactionAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        let window = WashWindow::new(config.wash_window_size, config.wash_window_secs, config.wash_max_tracked_keys);
        Self { config, window }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Analyse une transaction finalisée et l'enregistre dans la fenêtre glissante.
    /// Ne lève jamais d'erreur : un champ absent équivaut à "pas de signal".
    pub fn analyze_transaction(&self, tx: &Transaction) -> AnalysisResult {
        self.evaluate(tx, true)
    }

    /// Même verdict pour une transaction encore en mempool, sans toucher la fenêtre :
    /// elle y entrera une seule fois, à sa finalisation.
    pub fn analyze_pending(&self, tx: &Transaction) -> AnalysisResult {
        self.evaluate(tx, false)
    }

    fn evaluate(&self, tx: &Transaction, record: bool) -> AnalysisResult {
        let mut patterns = BTreeSet::new();
        let mut scores = SignalScores::default();

        // --- Wash trading ---
        if let Some(key) = wash_key(tx, self.config.wash_amount_significant_digits) {
            let timestamp = tx.block_time.unwrap_or_else(unix_now);
            let occurrences = if record {
                self.window.record(key, timestamp)
            } else {
                self.window.peek(&key, timestamp)
            };
            scores.wash_trading = wash_score(occurrences, self.config.wash_repeat_threshold);
            if occurrences > self.config.wash_repeat_threshold {
                patterns.insert(PATTERN_WASH_TRADING.to_string());
            }
        }

        // --- Flux cycliques ---
        if self.config.cycle_detection_enabled {
            if let Some(cycle) = detect_cycle(tx) {
                debug!(signature = %tx.signature, cycle = ?cycle, "[Analyzer] Flux cyclique détecté.");
                scores.cyclic = 1.0;
                patterns.insert(PATTERN_CYCLIC.to_string());
            }
        }

        // --- Liquidité ---
        let events = liquidity_events(tx);
        if !events.is_empty() {
            scores.liquidity = removal_severity(&events);
            if detect_liquidity_removal(&events, self.config.liquidity_removal_threshold) {
                patterns.insert(PATTERN_LIQUIDITY_REMOVAL.to_string());
            }
        }

        TRANSACTIONS_ANALYZED.inc();
        AnalysisResult {
            risk_score: combine(&self.config.weights, &scores),
            detected_patterns: patterns,
        }
    }
}
