// DANS : src/analysis/scoring.rs

use super::RiskWeights;

/// Scores individuels, chacun dans [0,1].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SignalScores {
    pub wash_trading: f64,
    pub cyclic: f64,
    pub liquidity: f64,
}

/// 0 pour une première occurrence, puis croît linéairement jusqu'à 1
/// quand le nombre d'occurrences atteint deux fois le seuil.
pub fn wash_score(occurrences: usize, threshold: usize) -> f64 {
    if occurrences <= 1 {
        return 0.0;
    }
    let span = (2 * threshold.max(1)) as f64;
    ((occurrences - 1) as f64 / span).min(1.0)
}

/// Combinaison linéaire pondérée, bornée à [0,1]. Un NaN donne 0.
pub fn combine(weights: &RiskWeights, scores: &SignalScores) -> f64 {
    let raw = weights.wash_trading * scores.wash_trading
        + weights.cyclic * scores.cyclic
        + weights.liquidity * scores.liquidity;
    if raw.is_nan() {
        return 0.0;
    }
    raw.clamp(0.0, 1.0)
}
