// DANS : src/analysis/wash_window.rs

use crate::model::Transaction;
use std::{
    collections::{hash_map::DefaultHasher, HashMap, VecDeque},
    hash::{Hash, Hasher},
    sync::{Mutex, MutexGuard},
};

const SHARD_COUNT: usize = 16;

/// L'entité suivie par la fenêtre glissante.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WashKey {
    /// (émetteur, destinataire, montant arrondi) déduit des variations de lamports.
    Transfer { sender: String, receiver: String, amount: u128 },
    /// Empreinte du contenu (comptes + instructions), signature exclue.
    Content(u64),
}

/// Arrondi entier à `digits` chiffres significatifs (au plus proche).
pub fn round_significant(value: u128, digits: u32) -> u128 {
    let digits = digits.max(1);
    let magnitude = value.checked_ilog10().map_or(0, |m| m + 1);
    if magnitude <= digits {
        return value;
    }
    let scale = 10u128.pow(magnitude - digits);
    (value + scale / 2) / scale * scale
}

/// Clé de la transaction pour la détection de wash trading. `None` s'il n'y a rien à comparer.
pub fn wash_key(tx: &Transaction, significant_digits: u32) -> Option<WashKey> {
    if let Some(key) = transfer_key(tx, significant_digits) {
        return Some(key);
    }
    if tx.accounts.is_empty() && tx.instructions.is_empty() {
        return None;
    }

    let mut hasher = DefaultHasher::new();
    tx.accounts.hash(&mut hasher);
    for instruction in &tx.instructions {
        instruction.program_id.hash(&mut hasher);
        instruction.accounts.hash(&mut hasher);
        instruction.data.hash(&mut hasher);
    }
    Some(WashKey::Content(hasher.finish()))
}

fn transfer_key(tx: &Transaction, significant_digits: u32) -> Option<WashKey> {
    let deltas = tx.meta.lamport_deltas()?;
    let named = || deltas.iter().zip(&tx.accounts);

    let (amount, receiver) = named().filter(|(d, _)| **d > 0).max_by_key(|(d, _)| **d)?;
    let sender = named()
        .filter(|(d, _)| **d < 0)
        .min_by_key(|(d, _)| **d)
        .map(|(_, account)| account.as_str())
        .or_else(|| tx.fee_payer())?;
    if sender == receiver.as_str() {
        return None;
    }

    Some(WashKey::Transfer {
        sender: sender.to_string(),
        receiver: receiver.clone(),
        amount: round_significant(*amount as u128, significant_digits),
    })
}

#[derive(Debug, Default)]
struct WindowShard {
    occurrences: HashMap<WashKey, VecDeque<i64>>,
    /// Ordre d'insertion des clés, pour l'éviction quand la shard est pleine.
    order: VecDeque<WashKey>,
}

impl WindowShard {
    fn prune(&mut self, key: &WashKey, now: i64, max_age_secs: i64) {
        if let Some(timestamps) = self.occurrences.get_mut(key) {
            timestamps.retain(|ts| now.saturating_sub(*ts) <= max_age_secs);
        }
    }
}

/// Fenêtre glissante bornée (en nombre et en durée), partitionnée en shards
/// pour que les workers d'analyse ne se bloquent pas entre eux.
#[derive(Debug)]
pub struct WashWindow {
    shards: Vec<Mutex<WindowShard>>,
    per_key_capacity: usize,
    max_age_secs: i64,
    max_keys_per_shard: usize,
}

impl WashWindow {
    pub fn new(per_key_capacity: usize, max_age_secs: u64, max_tracked_keys: usize) -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(WindowShard::default())).collect(),
            per_key_capacity: per_key_capacity.max(1),
            max_age_secs: i64::try_from(max_age_secs).unwrap_or(i64::MAX),
            max_keys_per_shard: max_tracked_keys.div_ceil(SHARD_COUNT).max(1),
        }
    }

    /// Enregistre une occurrence et retourne le nombre d'occurrences dans la fenêtre, celle-ci incluse.
    pub fn record(&self, key: WashKey, timestamp: i64) -> usize {
        let mut shard = self.shard(&key);
        shard.prune(&key, timestamp, self.max_age_secs);

        if !shard.occurrences.contains_key(&key) {
            shard.order.push_back(key.clone());
            while shard.order.len() > self.max_keys_per_shard {
                if let Some(evicted) = shard.order.pop_front() {
                    shard.occurrences.remove(&evicted);
                }
            }
        }

        let timestamps = shard.occurrences.entry(key).or_default();
        timestamps.push_back(timestamp);
        while timestamps.len() > self.per_key_capacity {
            timestamps.pop_front();
        }
        timestamps.len()
    }

    /// Comme `record`, sans modifier la fenêtre.
    pub fn peek(&self, key: &WashKey, timestamp: i64) -> usize {
        let shard = self.shard(key);
        let in_window = shard.occurrences.get(key).map_or(0, |timestamps| {
            timestamps
                .iter()
                .filter(|ts| timestamp.saturating_sub(**ts) <= self.max_age_secs)
                .count()
        });
        (in_window + 1).min(self.per_key_capacity)
    }

    pub fn tracked_keys(&self) -> usize {
        self.shards.iter().map(|s| lock(s).occurrences.len()).sum()
    }

    fn shard(&self, key: &WashKey) -> MutexGuard<'_, WindowShard> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        lock(&self.shards[(hasher.finish() as usize) % self.shards.len()])
    }
}

/// Un worker qui a paniqué ne doit pas rendre la fenêtre inutilisable.
fn lock(shard: &Mutex<WindowShard>) -> MutexGuard<'_, WindowShard> {
    shard.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Instruction, TransactionMeta};
    use std::sync::Arc;
    use test_case::test_case;

    fn transfer(signature: &str, pre: Vec<u64>, post: Vec<u64>) -> Transaction {
        Transaction {
            signature: signature.into(),
            accounts: vec!["Alice".into(), "Bob".into(), "System".into()],
            meta: TransactionMeta { fee: Some(5000), pre_balances: pre, post_balances: post, ..Default::default() },
            ..Default::default()
        }
    }

    #[test_case(0, 2, 0)]
    #[test_case(7, 2, 7)]
    #[test_case(1_234_567, 2, 1_200_000)]
    #[test_case(1_250_000, 2, 1_300_000)]
    #[test_case(999_999, 3, 1_000_000)]
    #[test_case(42, 0, 40 ; "zero digits behaves like one")]
    fn test_round_significant(value: u128, digits: u32, expected: u128) {
        assert_eq!(round_significant(value, digits), expected);
    }

    #[test]
    fn test_similar_transfers_share_a_key() {
        let a = transfer("s1", vec![10_000_000, 0, 1], vec![8_995_000, 1_000_000, 1]);
        let b = transfer("s2", vec![20_000_000, 5, 1], vec![18_985_000, 1_010_005, 1]);

        let key = wash_key(&a, 2).unwrap();
        assert_eq!(key, wash_key(&b, 2).unwrap());
        assert_eq!(
            key,
            WashKey::Transfer { sender: "Alice".into(), receiver: "Bob".into(), amount: 1_000_000 }
        );
    }

    #[test]
    fn test_content_key_ignores_signature() {
        let tx = |sig: &str| Transaction {
            signature: sig.into(),
            accounts: vec!["P".into()],
            instructions: vec![Instruction { program_id: Some("Prog".into()), accounts: vec!["P".into()], data: Some("ab".into()) }],
            ..Default::default()
        };
        let first = wash_key(&tx("one"), 2).unwrap();
        assert!(matches!(first, WashKey::Content(_)));
        assert_eq!(first, wash_key(&tx("two"), 2).unwrap());
    }

    #[test]
    fn test_empty_transaction_has_no_key() {
        assert_eq!(wash_key(&Transaction::default(), 2), None);
    }

    #[test]
    fn test_window_counts_and_caps() {
        let window = WashWindow::new(3, 300, 100);
        let key = WashKey::Content(1);
        let counts: Vec<usize> = (0..5).map(|i| window.record(key.clone(), 1_000 + i)).collect();
        assert_eq!(counts, vec![1, 2, 3, 3, 3]);
    }

    #[test]
    fn test_window_expires_old_occurrences() {
        let window = WashWindow::new(10, 60, 100);
        let key = WashKey::Content(2);
        window.record(key.clone(), 1_000);
        window.record(key.clone(), 1_030);
        assert_eq!(window.peek(&key, 1_070), 2);
        assert_eq!(window.record(key, 1_080), 2);
    }

    #[test]
    fn test_peek_does_not_record() {
        let window = WashWindow::new(10, 60, 100);
        let key = WashKey::Content(3);
        assert_eq!(window.peek(&key, 0), 1);
        assert_eq!(window.peek(&key, 0), 1);
        assert_eq!(window.tracked_keys(), 0);
    }

    #[test]
    fn test_tracked_keys_are_bounded() {
        let window = WashWindow::new(4, 300, 32);
        for i in 0..1_000 {
            window.record(WashKey::Content(i), 0);
        }
        assert!(window.tracked_keys() <= 32);
    }

    #[test]
    fn test_concurrent_recording() {
        let window = Arc::new(WashWindow::new(1_000, 300, 100));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let window = Arc::clone(&window);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        window.record(WashKey::Content(7), 0);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(window.peek(&WashKey::Content(7), 0), 401);
    }
}
