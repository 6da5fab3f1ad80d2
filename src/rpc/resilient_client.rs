use crate::errors::{LedgerError, RetryExhausted};
use crate::model::RawBlock;
use crate::monitoring::metrics::{LEDGER_REQUESTS_TOTAL, LEDGER_REQUEST_LATENCY};
use super::ledger_client::LedgerClient;
use serde_json::Value;
use std::{future::Future, sync::Arc, time::{Duration, Instant}};
use tokio::time::{sleep, timeout};
use tracing::warn;

/// Timeout par appel + ré-essais avec backoff exponentiel plafonné.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_retries: 5,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Délai avant la tentative `attempt + 1` (attempt commence à 0).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Exécute `op` avec timeout, et la ré-essaie tant que l'erreur est temporaire.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    method: &'static str,
    mut op: F,
) -> Result<T, RetryExhausted>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LedgerError>>,
{
    let mut attempt: u32 = 0;
    loop {
        let started = Instant::now();
        let outcome = match timeout(policy.timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(LedgerError::Timeout(policy.timeout.as_millis() as u64)),
        };
        LEDGER_REQUEST_LATENCY
            .with_label_values(&[method])
            .observe(started.elapsed().as_secs_f64());

        match outcome {
            Ok(value) => {
                LEDGER_REQUESTS_TOTAL.with_label_values(&[method, "success"]).inc();
                return Ok(value);
            }
            Err(e) => {
                LEDGER_REQUESTS_TOTAL.with_label_values(&[method, "failure"]).inc();
                if e.is_retryable() && attempt < policy.max_retries {
                    let delay = policy.delay_for(attempt);
                    warn!(method, attempt = attempt + 1, delay_ms = delay.as_millis() as u64, error = %e,
                        "[Ledger] Échec temporaire, nouvelle tentative.");
                    sleep(delay).await;
                    attempt += 1;
                } else {
                    return Err(RetryExhausted { attempts: attempt + 1, source: e });
                }
            }
        }
    }
}

/// Un "wrapper" autour d'un `LedgerClient` qui ajoute timeout et ré-essai automatique
/// pour les erreurs réseau temporaires.
#[derive(Clone)]
pub struct ResilientLedgerClient {
    client: Arc<dyn LedgerClient>,
    policy: RetryPolicy,
}

impl ResilientLedgerClient {
    pub fn new(client: Arc<dyn LedgerClient>, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn get_block(&self, height: u64) -> Result<RawBlock, RetryExhausted> {
        with_retry(&self.policy, "get_block", || self.client.get_block(height)).await
    }

    pub async fn get_mempool_snapshot(&self) -> Result<Vec<Value>, RetryExhausted> {
        with_retry(&self.policy, "get_mempool_snapshot", || self.client.get_mempool_snapshot()).await
    }

    pub async fn latest_height(&self) -> Result<u64, RetryExhausted> {
        with_retry(&self.policy, "latest_height", || self.client.latest_height()).await
    }

    pub async fn is_block_valid(&self, height: u64, blockhash: Option<&str>) -> Result<bool, RetryExhausted> {
        with_retry(&self.policy, "is_block_valid", || self.client.is_block_valid(height, blockhash)).await
    }
}
