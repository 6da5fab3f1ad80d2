pub mod block;
pub mod raw;

// On ré-exporte les éléments principaux pour un accès plus facile
pub use block::{Block, InnerInstructionGroup, Instruction, TokenBalance, Transaction, TransactionMeta};
pub use raw::{MalformedTransaction, NormalizedBlock, RawBlock, RawTransaction};

use std::time::{SystemTime, UNIX_EPOCH};

/// Horodatage courant (secondes epoch), utilisé quand le ledger n'en fournit pas.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
