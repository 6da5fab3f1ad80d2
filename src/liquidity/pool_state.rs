// DANS : src/liquidity/pool_state.rs

use crate::errors::{InvalidPoolStateError, PoolStateError};
use serde::{Deserialize, Serialize};

/// État d'un pool à produit constant, tel que suivi par le tracker.
/// Les réserves sont en unités "ui" (déjà divisées par les décimales).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolState {
    pub mint: String,
    pub token_a_reserve: f64,
    pub token_b_reserve: f64,
    pub pool_token_supply: f64,
    /// Comptes de réserve à surveiller dans les soldes de tokens.
    #[serde(default)]
    pub vault_a: Option<String>,
    #[serde(default)]
    pub vault_b: Option<String>,
}

/// Variation observée sur un pool (swap, dépôt, retrait).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PoolDelta {
    pub token_a: f64,
    pub token_b: f64,
    pub pool_token_supply: f64,
}

impl PoolState {
    pub fn new(
        mint: impl Into<String>,
        token_a_reserve: f64,
        token_b_reserve: f64,
        pool_token_supply: f64,
    ) -> Result<Self, InvalidPoolStateError> {
        let state = Self {
            mint: mint.into(),
            token_a_reserve,
            token_b_reserve,
            pool_token_supply,
            vault_a: None,
            vault_b: None,
        };
        state.validate()?;
        Ok(state)
    }

    pub fn with_vaults(mut self, vault_a: impl Into<String>, vault_b: impl Into<String>) -> Self {
        self.vault_a = Some(vault_a.into());
        self.vault_b = Some(vault_b.into());
        self
    }

    /// Réserves et supply doivent être finies et strictement positives.
    pub fn validate(&self) -> Result<(), InvalidPoolStateError> {
        for (field, value) in self.fields() {
            if !is_positive(value) {
                return Err(InvalidPoolStateError { mint: self.mint.clone(), field, value });
            }
        }
        Ok(())
    }

    /// Prix spot de A exprimé en B.
    pub fn spot_price(&self) -> f64 {
        self.token_b_reserve / self.token_a_reserve
    }

    /// Applique une variation. Tout ou rien : si une valeur résultante n'est pas
    /// strictement positive, l'état reste inchangé.
    pub fn apply_event(&mut self, delta: PoolDelta) -> Result<(), PoolStateError> {
        let next = [
            ("token_a_reserve", self.token_a_reserve + delta.token_a),
            ("token_b_reserve", self.token_b_reserve + delta.token_b),
            ("pool_token_supply", self.pool_token_supply + delta.pool_token_supply),
        ];
        if let Some((field, value)) = next.iter().copied().find(|(_, v)| !is_positive(*v)) {
            return Err(PoolStateError::NonPositiveReserve { mint: self.mint.clone(), field, value });
        }

        self.token_a_reserve = next[0].1;
        self.token_b_reserve = next[1].1;
        self.pool_token_supply = next[2].1;
        Ok(())
    }

    fn fields(&self) -> [(&'static str, f64); 3] {
        [
            ("token_a_reserve", self.token_a_reserve),
            ("token_b_reserve", self.token_b_reserve),
            ("pool_token_supply", self.pool_token_supply),
        ]
    }
}

fn is_positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}
