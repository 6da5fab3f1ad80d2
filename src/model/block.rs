// DANS : src/model/block.rs

use serde::{Deserialize, Serialize};

/// Une instruction (de premier niveau ou interne), avec les comptes qu'elle touche
/// déjà résolus en adresses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub program_id: Option<String>,
    pub accounts: Vec<String>,
    pub data: Option<String>,
}

impl Instruction {
    pub fn with_accounts<I, S>(accounts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            accounts: accounts.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InnerInstructionGroup {
    /// Index de l'instruction de premier niveau qui a produit ce groupe.
    pub index: Option<u8>,
    pub instructions: Vec<Instruction>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenBalance {
    pub account_index: Option<usize>,
    pub mint: Option<String>,
    pub ui_amount: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionMeta {
    pub fee: Option<u64>,
    pub pre_balances: Vec<u64>,
    pub post_balances: Vec<u64>,
    pub pre_token_balances: Vec<TokenBalance>,
    pub post_token_balances: Vec<TokenBalance>,
    pub failed: bool,
}

impl TransactionMeta {
    /// Variation de lamports par compte (post - pre).
    /// `None` si les deux tableaux ne sont pas alignés.
    pub fn lamport_deltas(&self) -> Option<Vec<i128>> {
        if self.pre_balances.len() != self.post_balances.len() {
            return None;
        }
        Some(
            self.pre_balances
                .iter()
                .zip(&self.post_balances)
                .map(|(pre, post)| *post as i128 - *pre as i128)
                .collect(),
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub signature: String,
    pub accounts: Vec<String>,
    pub instructions: Vec<Instruction>,
    pub inner_instructions: Vec<InnerInstructionGroup>,
    pub meta: TransactionMeta,
    /// Horodatage du bloc porteur, s'il est connu (absent pour le mempool).
    pub block_time: Option<i64>,
}

impl Transaction {
    pub fn fee_payer(&self) -> Option<&str> {
        self.accounts.first().map(String::as_str)
    }

    pub fn inner_instruction_iter(&self) -> impl Iterator<Item = &Instruction> {
        self.inner_instructions.iter().flat_map(|group| group.instructions.iter())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub block_height: u64,
    pub block_time: Option<i64>,
    pub blockhash: Option<String>,
    pub parent_slot: Option<u64>,
    pub transactions: Vec<Transaction>,
}
