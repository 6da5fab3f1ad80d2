pub mod block_ingestor;
pub mod mempool_filter;

pub use block_ingestor::{BlockIngestor, SignatureWindow};
pub use mempool_filter::{check_fee_consistency, FeeCheckFailure};

#[derive(Debug, Clone, PartialEq)]
pub struct IngestorConfig {
    /// Écart toléré entre lamports brûlés et frais déclarés.
    pub fee_tolerance_lamports: u64,
    /// Nombre de blocs gardés pour resservir une hauteur déjà construite.
    pub recent_block_cache: usize,
    pub seen_signature_capacity: usize,
}

impl Default for IngestorConfig {
    fn default() -> Self {
        Self {
            fee_tolerance_lamports: 10_000,
            recent_block_cache: 64,
            seen_signature_capacity: 50_000,
        }
    }
}
