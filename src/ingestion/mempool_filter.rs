// DANS : src/ingestion/mempool_filter.rs

use crate::model::TransactionMeta;

/// Pourquoi une transaction de mempool est jugée incohérente.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeCheckFailure {
    MissingFee,
    MissingBalances,
    MismatchedBalances,
    FeeMismatch,
}

impl FeeCheckFailure {
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::MissingFee => "missing_fee",
            Self::MissingBalances => "missing_balances",
            Self::MismatchedBalances => "mismatched_balances",
            Self::FeeMismatch => "fee_mismatch",
        }
    }
}

/// Les lamports "brûlés" par la transaction (somme des pre - somme des post)
/// doivent correspondre aux frais déclarés, à `tolerance_lamports` près.
pub fn check_fee_consistency(meta: &TransactionMeta, tolerance_lamports: u64) -> Result<(), FeeCheckFailure> {
    let fee = meta.fee.ok_or(FeeCheckFailure::MissingFee)?;
    let deltas = meta.lamport_deltas().ok_or(FeeCheckFailure::MismatchedBalances)?;
    if deltas.is_empty() {
        return Err(FeeCheckFailure::MissingBalances);
    }

    let burned: i128 = -deltas.iter().sum::<i128>();
    if (burned - fee as i128).abs() > tolerance_lamports as i128 {
        return Err(FeeCheckFailure::FeeMismatch);
    }
    Ok(())
}
