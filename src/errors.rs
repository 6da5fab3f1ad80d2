// DANS : src/errors.rs

use thiserror::Error;

/// Erreurs remontées par un `LedgerClient` (RPC, mock, etc.).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LedgerError {
    #[error("ledger request timed out after {0} ms")]
    Timeout(u64),

    #[error("ledger transport error: {0}")]
    Transport(String),

    #[error("malformed ledger payload: {0}")]
    Malformed(String),

    /// Le slot n'a jamais produit de bloc (ou n'est plus disponible).
    #[error("slot {0} was skipped or is unavailable")]
    SlotSkipped(u64),
}

impl LedgerError {
    /// Détermine si l'erreur est temporaire et si une nouvelle tentative doit être effectuée.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Transport(_))
    }
}

/// Échec final d'un appel au ledger, après toutes les tentatives autorisées.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("{source} (after {attempts} attempt(s))")]
pub struct RetryExhausted {
    pub attempts: u32,
    #[source]
    pub source: LedgerError,
}

#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("failed to fetch block {height} after {attempts} attempt(s): {source}")]
    Ledger {
        height: u64,
        attempts: u32,
        #[source]
        source: LedgerError,
    },

    #[error("malformed block {height}: {reason}")]
    MalformedBlock { height: u64, reason: String },

    /// Le ledger ne reconnaît plus ce bloc : il est écarté avant toute mise à jour d'état.
    #[error("block {height} was orphaned by the ledger")]
    Orphaned { height: u64 },

    /// Hauteur déjà dépassée et plus présente dans le cache : le bloc est écarté.
    #[error("block {height} is not newer than last accepted height {last_accepted}")]
    StaleHeight { height: u64, last_accepted: u64 },
}

impl IngestionError {
    pub fn height(&self) -> u64 {
        match self {
            Self::Ledger { height, .. }
            | Self::MalformedBlock { height, .. }
            | Self::Orphaned { height }
            | Self::StaleHeight { height, .. } => *height,
        }
    }

    /// Un slot sauté ou un doublon n'est pas un incident : on avance sans bruit.
    pub fn is_expected_gap(&self) -> bool {
        matches!(
            self,
            Self::StaleHeight { .. }
                | Self::Ledger { source: LedgerError::SlotSkipped(_), .. }
        )
    }
}

/// Réserves ou supply non strictement positives lors d'un calcul d'impact.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("invalid pool state for {mint}: {field} = {value}")]
pub struct InvalidPoolStateError {
    pub mint: String,
    pub field: &'static str,
    pub value: f64,
}

/// Mise à jour de pool rejetée (elle produirait une réserve négative ou nulle).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PoolStateError {
    #[error("update on pool {mint} would leave {field} at {value}")]
    NonPositiveReserve {
        mint: String,
        field: &'static str,
        value: f64,
    },

    #[error("unknown pool {0}")]
    UnknownPool(String),

    #[error(transparent)]
    Invalid(#[from] InvalidPoolStateError),
}
