// DANS : src/liquidity/impact.rs
//
// Fonctions pures : pas d'état, pas de verrou. Le tracker et l'analyseur les partagent.

use super::pool_state::PoolState;
use crate::errors::InvalidPoolStateError;
use crate::model::{TokenBalance, Transaction};
use std::collections::HashMap;

/// Variation d'un solde de token au sein d'une transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct LiquidityEvent {
    pub signature: String,
    pub account_index: Option<usize>,
    pub mint: Option<String>,
    pub pre_amount: f64,
    pub post_amount: f64,
}

impl LiquidityEvent {
    pub fn new(signature: impl Into<String>, pre_amount: f64, post_amount: f64) -> Self {
        Self {
            signature: signature.into(),
            account_index: None,
            mint: None,
            pre_amount,
            post_amount,
        }
    }

    /// Baisse fractionnaire `(pre - post) / pre`, `None` quand pre vaut 0.
    pub fn fractional_drop(&self) -> Option<f64> {
        (self.pre_amount > 0.0).then(|| (self.pre_amount - self.post_amount) / self.pre_amount)
    }

    pub fn delta(&self) -> f64 {
        self.post_amount - self.pre_amount
    }
}

/// Variation de prix (fractionnaire) causée par l'injection de `trade_amount`
/// dans la réserve A d'un pool à produit constant : `1 - (a / (a + x))²`.
pub fn calculate_liquidity_impact(trade_amount: f64, pool: &PoolState) -> Result<f64, InvalidPoolStateError> {
    pool.validate()?;
    // Montant négatif ou NaN : aucun signal.
    if trade_amount.is_nan() || trade_amount <= 0.0 {
        return Ok(0.0);
    }

    let ratio = pool.token_a_reserve / (pool.token_a_reserve + trade_amount);
    Ok((1.0 - ratio * ratio).clamp(0.0, 1.0))
}

/// Sévérité d'un lot de retraits, dans [0,1] : max(pire baisse individuelle, baisse cumulée).
/// La baisse cumulée compose les ratios `post / pre` : dix retraits de 5 % pèsent 40 %,
/// ce qu'aucun événement isolé ne montre.
pub fn removal_severity(events: &[LiquidityEvent]) -> f64 {
    let mut worst: f64 = 0.0;
    let mut remaining = 1.0;

    for event in events {
        let Some(drop) = event.fractional_drop() else { continue };
        if drop.is_nan() {
            continue;
        }
        worst = worst.max(drop);
        remaining *= (1.0 - drop).max(0.0);
    }

    let cumulative = 1.0 - remaining;
    worst.max(cumulative).clamp(0.0, 1.0)
}

/// `true` si une baisse individuelle OU la baisse cumulée du lot dépasse `threshold`.
pub fn detect_liquidity_removal(events: &[LiquidityEvent], threshold: f64) -> bool {
    !events.is_empty() && removal_severity(events) > threshold
}

/// Dérive les événements de liquidité d'une transaction à partir des soldes de tokens pre/post.
/// Appariement par `account_index` quand il est présent (post absent = solde à 0),
/// sinon par position.
pub fn liquidity_events(tx: &Transaction) -> Vec<LiquidityEvent> {
    let pre = &tx.meta.pre_token_balances;
    let post = &tx.meta.post_token_balances;

    let indexed = pre.iter().chain(post).all(|b| b.account_index.is_some());
    if !indexed {
        return pre
            .iter()
            .zip(post)
            .map(|(before, after)| event_for(tx, before.account_index, before, Some(after)))
            .collect();
    }

    let post_by_index: HashMap<usize, &TokenBalance> =
        post.iter().filter_map(|b| Some((b.account_index?, b))).collect();
    let mut events: Vec<LiquidityEvent> = pre
        .iter()
        .map(|before| {
            let after = before.account_index.and_then(|i| post_by_index.get(&i).copied());
            event_for(tx, before.account_index, before, after)
        })
        .collect();

    // Comptes qui n'existaient pas avant la transaction.
    for after in post {
        if !pre.iter().any(|b| b.account_index == after.account_index) {
            events.push(LiquidityEvent {
                signature: tx.signature.clone(),
                account_index: after.account_index,
                mint: after.mint.clone(),
                pre_amount: 0.0,
                post_amount: after.ui_amount,
            });
        }
    }
    events
}

fn event_for(
    tx: &Transaction,
    account_index: Option<usize>,
    before: &TokenBalance,
    after: Option<&TokenBalance>,
) -> LiquidityEvent {
    LiquidityEvent {
        signature: tx.signature.clone(),
        account_index,
        mint: before.mint.clone().or_else(|| after.and_then(|a| a.mint.clone())),
        pre_amount: before.ui_amount,
        post_amount: after.map_or(0.0, |a| a.ui_amount),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RawTransaction, TransactionMeta};
    use serde_json::json;
    use test_case::test_case;

    fn pool(a: f64) -> PoolState {
        PoolState {
            mint: "PoolTokenMint123".into(),
            token_a_reserve: a,
            token_b_reserve: 1_000_000.0,
            pool_token_supply: 2_000_000.0,
            vault_a: None,
            vault_b: None,
        }
    }

    #[test]
    fn test_impact_is_bounded_and_monotonic() {
        let pool = pool(1_000_000.0);
        let amounts = [0.0, 1.0, 1_000.0, 100_000.0, 1_000_000.0, 1e12, f64::INFINITY];

        let impacts: Vec<f64> = amounts
            .iter()
            .map(|x| calculate_liquidity_impact(*x, &pool).unwrap())
            .collect();

        for impact in &impacts {
            assert!((0.0..=1.0).contains(impact));
        }
        for pair in impacts.windows(2) {
            assert!(pair[0] <= pair[1], "impact must not decrease: {:?}", pair);
        }
        // 100k dans 1M : 1 - (1/1.1)² ≈ 0.1736
        assert!((impacts[3] - 0.173553).abs() < 1e-5);
    }

    #[test_case(-50.0 ; "negative amount")]
    #[test_case(f64::NAN ; "nan amount")]
    fn test_impact_without_signal(amount: f64) {
        assert_eq!(calculate_liquidity_impact(amount, &pool(1_000.0)).unwrap(), 0.0);
    }

    #[test]
    fn test_impact_rejects_empty_reserve() {
        let err = calculate_liquidity_impact(10.0, &pool(0.0)).unwrap_err();
        assert_eq!(err.field, "token_a_reserve");
        assert_eq!(err.mint, "PoolTokenMint123");
    }

    #[test]
    fn test_full_drain_is_a_removal() {
        let events = vec![LiquidityEvent::new("5KtPn1", 1000.0, 0.0)];
        assert!(detect_liquidity_removal(&events, 0.1));
        assert_eq!(removal_severity(&events), 1.0);
    }

    #[test]
    fn test_small_drops_are_not_a_removal() {
        let events = vec![
            LiquidityEvent::new("a", 1000.0, 950.0),
            LiquidityEvent::new("b", 2000.0, 1900.0),
            LiquidityEvent::new("c", 0.0, 0.0),
        ];
        assert!(!detect_liquidity_removal(&events, 0.1));
    }

    #[test]
    fn test_threshold_is_strict() {
        let events = vec![LiquidityEvent::new("a", 1000.0, 900.0)];
        assert!(!detect_liquidity_removal(&events, 0.1));
        assert!(detect_liquidity_removal(&events, 0.099));
    }

    #[test]
    fn test_chained_withdrawals_drain_the_pool() {
        // 5 %, puis ~5,3 %, puis 5 % : aucun retrait isolé ne dépasse 10 %.
        let events = vec![
            LiquidityEvent::new("w1", 1000.0, 950.0),
            LiquidityEvent::new("w2", 950.0, 900.0),
            LiquidityEvent::new("w3", 900.0, 855.0),
        ];
        assert!(events.iter().all(|e| e.fractional_drop().unwrap() < 0.1));

        assert!(detect_liquidity_removal(&events, 0.1));
        assert!((removal_severity(&events) - 0.145).abs() < 1e-9);
    }

    #[test]
    fn test_many_small_withdrawals_add_up() {
        let events: Vec<LiquidityEvent> = (0..5).map(|i| LiquidityEvent::new(format!("w{i}"), 1000.0, 950.0)).collect();

        assert!(detect_liquidity_removal(&events, 0.1));
        // 1 - 0.95^5
        assert!((removal_severity(&events) - 0.2262190625).abs() < 1e-9);
    }

    #[test]
    fn test_deposits_offset_withdrawals() {
        let events = vec![
            LiquidityEvent::new("out", 1000.0, 920.0),
            LiquidityEvent::new("in", 920.0, 1000.0),
            LiquidityEvent::new("out", 1000.0, 950.0),
        ];
        assert!(!detect_liquidity_removal(&events, 0.1));
    }

    #[test]
    fn test_empty_batch_is_not_a_removal() {
        assert!(!detect_liquidity_removal(&[], 0.0));
    }

    #[test]
    fn test_events_from_raw_transactions() {
        let raws = [
            json!({ "signature": "5KtPn1", "meta": { "preTokenBalances": [{ "uiAmount": 1000 }], "postTokenBalances": [{ "uiAmount": 0 }] } }),
            json!({ "signature": "6LuQm2", "meta": { "preTokenBalances": [{ "uiAmount": 2000 }], "postTokenBalances": [{ "uiAmount": 0 }] } }),
        ];
        let events: Vec<LiquidityEvent> = raws
            .into_iter()
            .map(|v| RawTransaction::from_value(v).and_then(|r| r.normalize(None)).unwrap())
            .flat_map(|tx| liquidity_events(&tx))
            .collect();

        assert_eq!(events.len(), 2);
        assert_eq!(events[1].pre_amount, 2000.0);
        assert!(detect_liquidity_removal(&events, 0.1));
    }

    #[test]
    fn test_events_match_by_account_index() {
        let balance = |idx: usize, amount: f64| TokenBalance {
            account_index: Some(idx),
            mint: Some("MintX".into()),
            ui_amount: amount,
        };
        let tx = Transaction {
            signature: "sig".into(),
            meta: TransactionMeta {
                pre_token_balances: vec![balance(1, 500.0), balance(3, 40.0)],
                post_token_balances: vec![balance(3, 10.0), balance(4, 7.0)],
                ..Default::default()
            },
            ..Default::default()
        };

        let events = liquidity_events(&tx);
        let by_index: HashMap<usize, (f64, f64)> = events
            .iter()
            .map(|e| (e.account_index.unwrap(), (e.pre_amount, e.post_amount)))
            .collect();

        assert_eq!(by_index[&1], (500.0, 0.0));
        assert_eq!(by_index[&3], (40.0, 10.0));
        assert_eq!(by_index[&4], (0.0, 7.0));
        assert!(events.iter().all(|e| e.mint.as_deref() == Some("MintX")));
    }
}
