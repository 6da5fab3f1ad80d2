pub mod cycle_detector;
pub mod scoring;
pub mod transaction_analyzer;
pub mod wash_window;

pub use transaction_analyzer::TransactionAnalyzer;

use serde::Serialize;
use std::collections::BTreeSet;

pub const PATTERN_CYCLIC: &str = "cyclic";
pub const PATTERN_WASH_TRADING: &str = "wash-trading";
pub const PATTERN_LIQUIDITY_REMOVAL: &str = "liquidity-removal";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskWeights {
    pub wash_trading: f64,
    pub cyclic: f64,
    pub liquidity: f64,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            wash_trading: 0.45,
            cyclic: 0.35,
            liquidity: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzerConfig {
    /// Occurrences gardées par clé dans la fenêtre glissante.
    pub wash_window_size: usize,
    pub wash_window_secs: u64,
    /// Le wash trading est signalé quand les occurrences (courante incluse) dépassent ce nombre.
    pub wash_repeat_threshold: usize,
    pub wash_amount_significant_digits: u32,
    pub wash_max_tracked_keys: usize,
    pub cycle_detection_enabled: bool,
    pub liquidity_removal_threshold: f64,
    pub weights: RiskWeights,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            wash_window_size: 64,
            wash_window_secs: 300,
            wash_repeat_threshold: 3,
            wash_amount_significant_digits: 2,
            wash_max_tracked_keys: 10_000,
            cycle_detection_enabled: true,
            liquidity_removal_threshold: 0.1,
            weights: RiskWeights::default(),
        }
    }
}

/// Verdict pour une transaction. Immuable une fois produit.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub risk_score: f64,
    pub detected_patterns: BTreeSet<String>,
}

impl AnalysisResult {
    pub fn has_pattern(&self, pattern: &str) -> bool {
        self.detected_patterns.contains(pattern)
    }

    pub fn is_clean(&self) -> bool {
        self.detected_patterns.is_empty() && self.risk_score == 0.0
    }

    /// Une alerte part si le score atteint `min_score`, ou dès qu'un motif comportemental
    /// (cycle, répétition) est présent. La baisse d'un solde de token seule n'y suffit pas :
    /// toute vente la produit, elle ne compte que dans le score.
    pub fn warrants_alert(&self, min_score: f64) -> bool {
        self.risk_score >= min_score
            || self.detected_patterns.iter().any(|pattern| pattern != PATTERN_LIQUIDITY_REMOVAL)
    }
}
