// DANS : src/rpc/ledger_client.rs

use crate::errors::LedgerError;
use crate::model::RawBlock;
use async_trait::async_trait;
use serde_json::{json, Value};
use solana_client::{
    client_error::{ClientError, ClientErrorKind},
    nonblocking::rpc_client::RpcClient,
    rpc_request::{RpcError, RpcRequest},
};
use solana_sdk::commitment_config::CommitmentConfig;
use std::{sync::Arc, time::Duration};

/// Codes JSON-RPC signalant un slot sans bloc (sauté, ou purgé du stockage long terme).
const SLOT_SKIPPED_CODES: [i64; 2] = [-32007, -32009];

/// Le contrat attendu de toute source de blocs (RPC, gRPC, mock de test...).
/// Les implémentations ne font PAS de ré-essai : c'est le rôle de `ResilientLedgerClient`.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn get_block(&self, height: u64) -> Result<RawBlock, LedgerError>;

    /// Transactions observées avant finalisation, sous leur forme JSON brute.
    async fn get_mempool_snapshot(&self) -> Result<Vec<Value>, LedgerError>;

    /// Dernière hauteur finalisée connue du ledger.
    async fn latest_height(&self) -> Result<u64, LedgerError>;

    /// `false` si le bloc a été réorganisé depuis sa récupération.
    async fn is_block_valid(&self, _height: u64, _blockhash: Option<&str>) -> Result<bool, LedgerError> {
        Ok(true)
    }
}

/// Implémentation au-dessus du `RpcClient` non-bloquant de Solana.
#[derive(Clone)]
pub struct RpcLedgerClient {
    client: Arc<RpcClient>,
}

impl RpcLedgerClient {
    pub fn new(rpc_url: String, request_timeout: Duration) -> Self {
        Self {
            client: Arc::new(RpcClient::new_with_timeout_and_commitment(
                rpc_url,
                request_timeout,
                CommitmentConfig::finalized(),
            )),
        }
    }

    fn block_params(slot: u64, commitment: &str) -> Value {
        json!([
            slot,
            {
                "encoding": "json",
                "transactionDetails": "full",
                "rewards": false,
                "maxSupportedTransactionVersion": 0,
                "commitment": commitment,
            }
        ])
    }

    fn map_error(slot: Option<u64>, error: ClientError) -> LedgerError {
        match error.kind() {
            ClientErrorKind::RpcError(RpcError::RpcResponseError { code, .. })
                if SLOT_SKIPPED_CODES.contains(code) =>
            {
                LedgerError::SlotSkipped(slot.unwrap_or_default())
            }
            ClientErrorKind::SerdeJson(e) => LedgerError::Malformed(e.to_string()),
            _ => LedgerError::Transport(error.to_string()),
        }
    }

    async fn fetch_block(&self, slot: u64, commitment: &str) -> Result<RawBlock, LedgerError> {
        let block: Option<RawBlock> = self
            .client
            .send(RpcRequest::GetBlock, Self::block_params(slot, commitment))
            .await
            .map_err(|e| Self::map_error(Some(slot), e))?;
        block.ok_or(LedgerError::SlotSkipped(slot))
    }
}

#[async_trait]
impl LedgerClient for RpcLedgerClient {
    async fn get_block(&self, height: u64) -> Result<RawBlock, LedgerError> {
        self.fetch_block(height, "finalized").await
    }

    /// Solana n'expose pas de mempool : on prend le bloc `confirmed` le plus récent,
    /// dont les transactions ne sont pas encore finalisées.
    async fn get_mempool_snapshot(&self) -> Result<Vec<Value>, LedgerError> {
        let slot = self
            .client
            .get_slot_with_commitment(CommitmentConfig::confirmed())
            .await
            .map_err(|e| Self::map_error(None, e))?;

        match self.fetch_block(slot, "confirmed").await {
            Ok(block) => Ok(block.transactions.unwrap_or_default()),
            Err(LedgerError::SlotSkipped(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    async fn latest_height(&self) -> Result<u64, LedgerError> {
        self.client
            .get_slot_with_commitment(CommitmentConfig::finalized())
            .await
            .map_err(|e| Self::map_error(None, e))
    }

    async fn is_block_valid(&self, height: u64, _blockhash: Option<&str>) -> Result<bool, LedgerError> {
        let slots = self
            .client
            .get_blocks_with_commitment(height, Some(height), CommitmentConfig::finalized())
            .await
            .map_err(|e| Self::map_error(Some(height), e))?;
        Ok(slots.contains(&height))
    }
}
