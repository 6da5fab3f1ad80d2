// DANS : src/model/raw.rs
//
// Formes "brutes" telles que renvoyées par le ledger (JSON getBlock, snapshots
// de mempool, fixtures). Tout est optionnel : la validation se fait ici, une
// seule fois, et le reste du crate ne manipule que les types stricts de `block.rs`.

use super::block::{Block, InnerInstructionGroup, Instruction, TokenBalance, Transaction, TransactionMeta};
use crate::errors::IngestionError;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct RawBlock {
    pub block_height: Option<u64>,
    pub block_time: Option<i64>,
    pub blockhash: Option<String>,
    pub parent_slot: Option<u64>,
    /// Gardé en `Value` : une transaction illisible ne doit pas faire tomber le bloc entier.
    pub transactions: Option<Vec<Value>>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct RawTransaction {
    /// Forme "aplatie" (snapshots de mempool).
    pub signature: Option<String>,
    pub transaction: Option<RawTransactionBody>,
    pub meta: Option<RawMeta>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct RawTransactionBody {
    pub signatures: Option<Vec<String>>,
    pub message: Option<RawMessage>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    pub account_keys: Option<Vec<RawAccountKey>>,
    pub instructions: Option<Vec<RawInstruction>>,
}

/// `accountKeys` : chaînes en encodage `json`, objets en `jsonParsed`.
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum RawAccountKey {
    Plain(String),
    Parsed { pubkey: String },
}

impl RawAccountKey {
    fn into_key(self) -> String {
        match self {
            Self::Plain(key) | Self::Parsed { pubkey: key } => key,
        }
    }
}

/// Un compte référencé par une instruction : index dans la table des clés, ou adresse directe.
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum RawAccountRef {
    Index(usize),
    Key(String),
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct RawInstruction {
    pub program_id_index: Option<usize>,
    pub program_id: Option<String>,
    pub accounts: Option<Vec<RawAccountRef>>,
    pub data: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct RawInnerInstructions {
    pub index: Option<u8>,
    pub instructions: Option<Vec<RawInstruction>>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct RawUiTokenAmount {
    pub ui_amount: Option<f64>,
    pub amount: Option<String>,
    pub decimals: Option<u8>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct RawTokenBalance {
    pub account_index: Option<usize>,
    pub mint: Option<String>,
    pub ui_token_amount: Option<RawUiTokenAmount>,
    pub ui_amount: Option<f64>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct RawLoadedAddresses {
    pub writable: Option<Vec<String>>,
    pub readonly: Option<Vec<String>>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct RawMeta {
    pub fee: Option<u64>,
    pub err: Option<Value>,
    pub pre_balances: Option<Vec<u64>>,
    pub post_balances: Option<Vec<u64>>,
    pub inner_instructions: Option<Vec<RawInnerInstructions>>,
    pub pre_token_balances: Option<Vec<RawTokenBalance>>,
    pub post_token_balances: Option<Vec<RawTokenBalance>>,
    pub loaded_addresses: Option<RawLoadedAddresses>,
}

/// Raison pour laquelle une transaction brute est écartée à la frontière.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedTransaction {
    Unparseable,
    MissingSignature,
}

impl MalformedTransaction {
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Unparseable => "unparseable",
            Self::MissingSignature => "missing_signature",
        }
    }
}

impl RawTokenBalance {
    fn resolve_amount(&self) -> Option<f64> {
        let from_ui_token = self.ui_token_amount.as_ref().and_then(|amount| {
            amount.ui_amount.or_else(|| {
                let raw: f64 = amount.amount.as_deref()?.parse().ok()?;
                Some(raw / 10f64.powi(amount.decimals.unwrap_or(0) as i32))
            })
        });
        from_ui_token
            .or(self.ui_amount)
            .filter(|value| value.is_finite() && *value >= 0.0)
    }

    fn normalize(self) -> Option<TokenBalance> {
        let ui_amount = self.resolve_amount()?;
        Some(TokenBalance {
            account_index: self.account_index,
            mint: self.mint,
            ui_amount,
        })
    }
}

fn resolve_instruction(raw: RawInstruction, keys: &[String]) -> Instruction {
    let program_id = raw
        .program_id
        .or_else(|| raw.program_id_index.and_then(|i| keys.get(i).cloned()));

    let accounts = raw
        .accounts
        .unwrap_or_default()
        .into_iter()
        .filter_map(|account| match account {
            RawAccountRef::Key(key) => Some(key),
            RawAccountRef::Index(i) => {
                let resolved = keys.get(i).cloned();
                if resolved.is_none() {
                    debug!(index = i, "Index de compte hors table, ignoré.");
                }
                resolved
            }
        })
        .collect();

    Instruction { program_id, accounts, data: raw.data }
}

impl RawTransaction {
    pub fn from_value(value: Value) -> Result<Self, MalformedTransaction> {
        serde_json::from_value(value).map_err(|_| MalformedTransaction::Unparseable)
    }

    /// Signature principale : champ aplati d'abord, sinon la première signature du message.
    pub fn primary_signature(&self) -> Option<&str> {
        self.signature.as_deref().or_else(|| {
            self.transaction
                .as_ref()?
                .signatures
                .as_ref()?
                .first()
                .map(String::as_str)
        })
    }

    /// Valide et convertit la transaction brute en `Transaction` stricte.
    pub fn normalize(self, block_time: Option<i64>) -> Result<Transaction, MalformedTransaction> {
        let signature = self
            .primary_signature()
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .ok_or(MalformedTransaction::MissingSignature)?;

        let message = self.transaction.and_then(|body| body.message).unwrap_or_default();
        let meta = self.meta.unwrap_or_default();

        // Table complète : clés statiques puis adresses chargées via les lookup tables.
        let mut keys: Vec<String> = message
            .account_keys
            .unwrap_or_default()
            .into_iter()
            .map(RawAccountKey::into_key)
            .collect();
        if let Some(loaded) = meta.loaded_addresses {
            keys.extend(loaded.writable.unwrap_or_default());
            keys.extend(loaded.readonly.unwrap_or_default());
        }

        let instructions = message
            .instructions
            .unwrap_or_default()
            .into_iter()
            .map(|ix| resolve_instruction(ix, &keys))
            .collect();

        let inner_instructions = meta
            .inner_instructions
            .unwrap_or_default()
            .into_iter()
            .map(|group| InnerInstructionGroup {
                index: group.index,
                instructions: group
                    .instructions
                    .unwrap_or_default()
                    .into_iter()
                    .map(|ix| resolve_instruction(ix, &keys))
                    .collect(),
            })
            .collect();

        let token_balances = |balances: Option<Vec<RawTokenBalance>>| -> Vec<TokenBalance> {
            balances
                .unwrap_or_default()
                .into_iter()
                .filter_map(RawTokenBalance::normalize)
                .collect()
        };

        let typed_meta = TransactionMeta {
            fee: meta.fee,
            pre_balances: meta.pre_balances.unwrap_or_default(),
            post_balances: meta.post_balances.unwrap_or_default(),
            pre_token_balances: token_balances(meta.pre_token_balances),
            post_token_balances: token_balances(meta.post_token_balances),
            failed: meta.err.is_some_and(|err| !err.is_null()),
        };

        Ok(Transaction {
            signature,
            accounts: keys,
            instructions,
            inner_instructions,
            meta: typed_meta,
            block_time,
        })
    }
}

/// Résultat de la normalisation d'un bloc : le bloc strict et les transactions écartées.
#[derive(Debug)]
pub struct NormalizedBlock {
    pub block: Block,
    pub dropped: Vec<MalformedTransaction>,
}

impl RawBlock {
    pub fn into_block(self, height: u64) -> Result<NormalizedBlock, IngestionError> {
        let raw_transactions = self.transactions.ok_or_else(|| IngestionError::MalformedBlock {
            height,
            reason: "missing transactions field".to_string(),
        })?;

        let mut transactions = Vec::with_capacity(raw_transactions.len());
        let mut dropped = Vec::new();
        for value in raw_transactions {
            match RawTransaction::from_value(value).and_then(|raw| raw.normalize(self.block_time)) {
                Ok(tx) => transactions.push(tx),
                Err(reason) => dropped.push(reason),
            }
        }

        Ok(NormalizedBlock {
            block: Block {
                block_height: height,
                block_time: self.block_time,
                blockhash: self.blockhash,
                parent_slot: self.parent_slot,
                transactions,
            },
            dropped,
        })
    }
}
