// DANS : src/liquidity/tracker.rs

use arc_swap::ArcSwap;
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::cache::PoolRegistry;
use super::impact::{calculate_liquidity_impact, liquidity_events, removal_severity, LiquidityEvent};
use super::pool_state::{PoolDelta, PoolState};
use super::TrackerConfig;
use crate::communication::{PoolAlert, PoolEventType};
use crate::errors::{InvalidPoolStateError, PoolStateError};
use crate::model::{unix_now, Block, Transaction};
use crate::monitoring::metrics::POOLS_TRACKED;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VaultSide {
    A,
    B,
}

#[derive(Debug, Clone)]
struct WatchedVault {
    mint: String,
    side: VaultSide,
    /// Les deux vaults du pool sont suivis.
    paired: bool,
}

/// Événements d'un bloc sur les vaults d'un pool, séparés par côté.
#[derive(Debug, Default)]
struct VaultActivity {
    paired: bool,
    side_a: Vec<LiquidityEvent>,
    side_b: Vec<LiquidityEvent>,
}

impl VaultActivity {
    /// Un retrait de liquidité vide les deux réserves ; un swap n'en vide qu'une.
    /// Avec un seul vault suivi, on s'en tient à celui-là.
    fn severity(&self) -> f64 {
        let a = removal_severity(&self.side_a);
        let b = removal_severity(&self.side_b);
        if self.paired { a.min(b) } else { a.max(b) }
    }
}

/// Suivi de l'état des pools. La map est protégée par un RwLock (lectures parallèles),
/// chaque pool par son propre Mutex (mises à jour individuelles).
/// La table vault -> pool est remplacée d'un bloc via ArcSwap, lue sans verrou.
pub struct LiquidityTracker {
    pools: RwLock<HashMap<String, Arc<Mutex<PoolState>>>>,
    watch_map: ArcSwap<HashMap<String, WatchedVault>>,
    config: TrackerConfig,
}

impl LiquidityTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            pools: RwLock::new(HashMap::new()),
            watch_map: ArcSwap::from_pointee(HashMap::new()),
            config,
        }
    }

    pub fn from_registry(registry: PoolRegistry, config: TrackerConfig) -> Self {
        let watch_map = build_watch_map(registry.pools.values());
        let pools: HashMap<_, _> = registry
            .pools
            .into_iter()
            .map(|(mint, state)| (mint, Arc::new(Mutex::new(state))))
            .collect();
        POOLS_TRACKED.set(pools.len() as i64);

        Self {
            pools: RwLock::new(pools),
            watch_map: ArcSwap::from_pointee(watch_map),
            config,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Ajoute un pool, ou remplace l'état d'un pool déjà suivi.
    pub async fn upsert_pool(&self, state: PoolState) -> Result<(), InvalidPoolStateError> {
        state.validate()?;
        let mut pools = self.pools.write().await;
        match pools.get(&state.mint) {
            Some(existing) => *existing.lock().await = state,
            None => {
                pools.insert(state.mint.clone(), Arc::new(Mutex::new(state)));
            }
        }
        self.refresh_watch_map(&pools).await;
        POOLS_TRACKED.set(pools.len() as i64);
        Ok(())
    }

    /// Resynchronisation explicite : seul cas où l'état d'un pool connu est écrasé en bloc.
    pub async fn resync_pool(&self, state: PoolState) -> Result<(), PoolStateError> {
        state.validate()?;
        let pools = self.pools.read().await;
        let pool = pools
            .get(&state.mint)
            .cloned()
            .ok_or_else(|| PoolStateError::UnknownPool(state.mint.clone()))?;
        drop(pools);

        info!(mint = %state.mint, "[Liquidity] Resynchronisation du pool.");
        *pool.lock().await = state;
        let pools = self.pools.read().await;
        self.refresh_watch_map(&pools).await;
        Ok(())
    }

    pub async fn pool_state(&self, mint: &str) -> Option<PoolState> {
        let pool = self.pools.read().await.get(mint).cloned()?;
        let state = pool.lock().await.clone();
        Some(state)
    }

    pub async fn pool_count(&self) -> usize {
        self.pools.read().await.len()
    }

    /// Applique une variation observée au pool `mint`.
    pub async fn apply_event(&self, mint: &str, delta: PoolDelta) -> Result<(), PoolStateError> {
        let pool = self
            .pools
            .read()
            .await
            .get(mint)
            .cloned()
            .ok_or_else(|| PoolStateError::UnknownPool(mint.to_string()))?;
        let mut state = pool.lock().await;
        state.apply_event(delta)
    }

    /// Évalue un bloc sur les pools suivis : impact et mise à jour des réserves
    /// transaction par transaction, puis retraits suspects cumulés sur le bloc.
    /// Les comptes de tokens hors registre sont ignorés.
    pub async fn observe_block(&self, block: &Block) -> Vec<PoolAlert> {
        let timestamp = block.block_time.unwrap_or_else(unix_now);
        let watch_map = self.watch_map.load_full();
        if watch_map.is_empty() {
            return Vec::new();
        }

        let mut activity: BTreeMap<String, VaultActivity> = BTreeMap::new();
        let mut impacts = Vec::new();
        for tx in block.transactions.iter().filter(|tx| !tx.meta.failed) {
            for (mint, delta) in vault_deltas(&watch_map, tx, &mut activity) {
                if let Some(alert) = self.observe_pool_delta(&mint, delta, timestamp).await {
                    impacts.push(alert);
                }
            }
        }

        let mut alerts: Vec<PoolAlert> = activity
            .into_iter()
            .filter_map(|(mint, pool)| {
                let severity = pool.severity();
                (severity > self.config.removal_threshold).then(|| {
                    warn!(mint = %mint, severity, "[Liquidity] Retrait de liquidité suspect.");
                    PoolAlert { pool_mint: mint, event_type: PoolEventType::Removal, value: severity, timestamp }
                })
            })
            .collect();
        alerts.extend(impacts);
        alerts
    }

    async fn observe_pool_delta(&self, mint: &str, delta: PoolDelta, timestamp: i64) -> Option<PoolAlert> {
        let pool = self.pools.read().await.get(mint).cloned()?;
        let mut state = pool.lock().await;

        // Le montant injecté (côté A ou B) mesure l'impact sur le prix.
        let impact = if delta.token_a > 0.0 {
            calculate_liquidity_impact(delta.token_a, &state)
        } else {
            calculate_liquidity_impact(delta.token_b, &mirrored(&state))
        };

        let alert = match impact {
            Ok(value) if value > self.config.impact_alert_threshold => {
                info!(mint, impact = value, "[Liquidity] Impact de prix significatif.");
                Some(PoolAlert { pool_mint: mint.to_string(), event_type: PoolEventType::Impact, value, timestamp })
            }
            Ok(_) => None,
            Err(e) => {
                warn!(mint, error = %e, "[Liquidity] État de pool invalide, impact non calculé.");
                None
            }
        };

        if let Err(e) = state.apply_event(delta) {
            warn!(mint, error = %e, "[Liquidity] Mise à jour rejetée, état conservé.");
        } else {
            debug!(mint, a = state.token_a_reserve, b = state.token_b_reserve, "[Liquidity] Réserves mises à jour.");
        }
        alert
    }

    async fn refresh_watch_map(&self, pools: &HashMap<String, Arc<Mutex<PoolState>>>) {
        let mut states = Vec::with_capacity(pools.len());
        for pool in pools.values() {
            states.push(pool.lock().await.clone());
        }
        self.watch_map.store(Arc::new(build_watch_map(states.iter())));
    }
}

/// Cumule, par pool suivi, les variations de solde de ses vaults dans la transaction,
/// et range les événements correspondants dans `activity`.
fn vault_deltas(
    watch_map: &HashMap<String, WatchedVault>,
    tx: &Transaction,
    activity: &mut BTreeMap<String, VaultActivity>,
) -> BTreeMap<String, PoolDelta> {
    let mut deltas: BTreeMap<String, PoolDelta> = BTreeMap::new();
    for event in liquidity_events(tx) {
        let Some(account) = event.account_index.and_then(|i| tx.accounts.get(i)) else { continue };
        let Some(vault) = watch_map.get(account) else { continue };

        let delta = deltas.entry(vault.mint.clone()).or_default();
        let pool = activity.entry(vault.mint.clone()).or_default();
        pool.paired = vault.paired;
        match vault.side {
            VaultSide::A => {
                delta.token_a += event.delta();
                pool.side_a.push(event);
            }
            VaultSide::B => {
                delta.token_b += event.delta();
                pool.side_b.push(event);
            }
        }
    }
    deltas
}

fn build_watch_map<'a>(states: impl Iterator<Item = &'a PoolState>) -> HashMap<String, WatchedVault> {
    let mut map = HashMap::new();
    for state in states {
        let paired = state.vault_a.is_some() && state.vault_b.is_some();
        if let Some(vault) = &state.vault_a {
            map.insert(vault.clone(), WatchedVault { mint: state.mint.clone(), side: VaultSide::A, paired });
        }
        if let Some(vault) = &state.vault_b {
            map.insert(vault.clone(), WatchedVault { mint: state.mint.clone(), side: VaultSide::B, paired });
        }
    }
    map
}

/// Vue A/B inversée, pour mesurer une injection côté B.
fn mirrored(state: &PoolState) -> PoolState {
    PoolState {
        token_a_reserve: state.token_b_reserve,
        token_b_reserve: state.token_a_reserve,
        ..state.clone()
    }
}
