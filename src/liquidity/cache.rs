// DANS : src/liquidity/cache.rs

use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
};
use tracing::{info, warn};

use super::pool_state::PoolState;

/// Registre des pools suivis, chargé depuis un fichier JSON au démarrage.
#[derive(Debug, Default)]
pub struct PoolRegistry {
    /// Clé : mint du pool. Les vaults de chaque pool alimentent la table de suivi du tracker.
    pub pools: HashMap<String, PoolState>,
}

impl PoolRegistry {
    pub fn from_pools(states: impl IntoIterator<Item = PoolState>) -> Self {
        let mut pools = HashMap::new();

        for state in states {
            if let Err(e) = state.validate() {
                warn!(mint = %state.mint, error = %e, "[Registry] Pool ignoré : état initial invalide.");
                continue;
            }
            pools.insert(state.mint.clone(), state);
        }

        Self { pools }
    }

    /// Charge le registre. Si le fichier n'existe pas, retourne un registre vide.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "[Registry] Fichier absent. Démarrage sans pool suivi.");
            return Ok(Self::default());
        }

        let file = File::open(path)
            .with_context(|| format!("Impossible d'ouvrir le registre de pools '{}'", path.display()))?;
        let states: Vec<PoolState> = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Erreur de désérialisation du registre '{}'", path.display()))?;

        let registry = Self::from_pools(states);
        info!(
            pools = registry.pools.len(),
            vaults = registry.vault_count(),
            "[Registry] Prêt."
        );
        Ok(registry)
    }

    /// Nombre de comptes de réserve déclarés dans le registre.
    pub fn vault_count(&self) -> usize {
        self.pools
            .values()
            .map(|state| usize::from(state.vault_a.is_some()) + usize::from(state.vault_b.is_some()))
            .sum()
    }

    pub fn save(path: impl AsRef<Path>, states: &[PoolState]) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("Impossible de créer le registre de pools '{}'", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), states)
            .with_context(|| format!("Erreur de sérialisation vers '{}'", path.display()))?;
        info!(pools = states.len(), path = %path.display(), "[Registry] Sauvegarde terminée.");
        Ok(())
    }
}
