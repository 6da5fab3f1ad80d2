use serde::Deserialize;
use anyhow::{Context, Result};
use std::time::Duration;

use crate::analysis::{AnalyzerConfig, RiskWeights};
use crate::ingestion::IngestorConfig;
use crate::liquidity::TrackerConfig;
use crate::monitoring::logging::LogFormat;
use crate::pipeline::PipelineConfig;
use crate::rpc::RetryPolicy;

/// Configuration plate, lue depuis l'environnement (et un éventuel `.env`).
/// Seul `LEDGER_RPC_URL` est obligatoire.
#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    pub ledger_rpc_url: String,

    // --- Ledger : timeout et politique de ré-essai ---
    #[serde(default = "default_ledger_timeout_ms")]
    pub ledger_timeout_ms: u64,
    #[serde(default = "default_ledger_max_retries")]
    pub ledger_max_retries: u32,
    #[serde(default = "default_ledger_backoff_base_ms")]
    pub ledger_backoff_base_ms: u64,
    #[serde(default = "default_ledger_backoff_max_ms")]
    pub ledger_backoff_max_ms: u64,

    // --- Ingestion ---
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub start_height: Option<u64>,
    #[serde(default = "default_block_buffer_size")]
    pub block_buffer_size: usize,
    #[serde(default = "default_recent_block_cache")]
    pub recent_block_cache: usize,
    #[serde(default = "default_seen_signature_capacity")]
    pub seen_signature_capacity: usize,
    #[serde(default = "default_fee_tolerance_lamports")]
    pub fee_tolerance_lamports: u64,
    #[serde(default)]
    pub mempool_poll_enabled: bool,

    // --- Analyse ---
    #[serde(default = "default_analysis_workers")]
    pub analysis_workers: usize,
    #[serde(default = "default_wash_window_size")]
    pub wash_window_size: usize,
    #[serde(default = "default_wash_window_secs")]
    pub wash_window_secs: u64,
    #[serde(default = "default_wash_repeat_threshold")]
    pub wash_repeat_threshold: usize,
    #[serde(default = "default_wash_amount_significant_digits")]
    pub wash_amount_significant_digits: u32,
    #[serde(default = "default_wash_max_tracked_keys")]
    pub wash_max_tracked_keys: usize,
    #[serde(default = "default_true")]
    pub cycle_detection_enabled: bool,

    // --- Liquidité ---
    #[serde(default = "default_liquidity_removal_threshold")]
    pub liquidity_removal_threshold: f64,
    #[serde(default = "default_liquidity_impact_alert_threshold")]
    pub liquidity_impact_alert_threshold: f64,
    #[serde(default)]
    pub pools_file: Option<String>,

    // --- Score de risque ---
    #[serde(default = "default_risk_weight_wash")]
    pub risk_weight_wash: f64,
    #[serde(default = "default_risk_weight_cycle")]
    pub risk_weight_cycle: f64,
    #[serde(default = "default_risk_weight_liquidity")]
    pub risk_weight_liquidity: f64,
    #[serde(default = "default_min_alert_score")]
    pub min_alert_score: f64,

    // --- Monitoring ---
    #[serde(default)]
    pub metrics_port: Option<u16>,
    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_ledger_timeout_ms() -> u64 { 10_000 }
fn default_ledger_max_retries() -> u32 { 5 }
fn default_ledger_backoff_base_ms() -> u64 { 250 }
fn default_ledger_backoff_max_ms() -> u64 { 8_000 }
fn default_poll_interval_ms() -> u64 { 400 }
fn default_block_buffer_size() -> usize { 16 }
fn default_recent_block_cache() -> usize { 64 }
fn default_seen_signature_capacity() -> usize { 50_000 }
fn default_fee_tolerance_lamports() -> u64 { 10_000 }
fn default_analysis_workers() -> usize { 8 }
fn default_wash_window_size() -> usize { 64 }
fn default_wash_window_secs() -> u64 { 300 }
fn default_wash_repeat_threshold() -> usize { 3 }
fn default_wash_amount_significant_digits() -> u32 { 2 }
fn default_wash_max_tracked_keys() -> usize { 10_000 }
fn default_true() -> bool { true }
fn default_liquidity_removal_threshold() -> f64 { 0.1 }
fn default_liquidity_impact_alert_threshold() -> f64 { 0.05 }
fn default_risk_weight_wash() -> f64 { 0.45 }
fn default_risk_weight_cycle() -> f64 { 0.35 }
fn default_risk_weight_liquidity() -> f64 { 0.2 }
fn default_min_alert_score() -> f64 { 0.3 }

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let config = envy::from_env::<Config>()
            .context("Configuration invalide (LEDGER_RPC_URL est obligatoire)")?;
        Ok(config)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(self.ledger_timeout_ms),
            max_retries: self.ledger_max_retries,
            base_delay: Duration::from_millis(self.ledger_backoff_base_ms),
            max_delay: Duration::from_millis(self.ledger_backoff_max_ms),
        }
    }

    pub fn ingestor_config(&self) -> IngestorConfig {
        IngestorConfig {
            fee_tolerance_lamports: self.fee_tolerance_lamports,
            recent_block_cache: self.recent_block_cache,
            seen_signature_capacity: self.seen_signature_capacity,
        }
    }

    pub fn analyzer_config(&self) -> AnalyzerConfig {
        AnalyzerConfig {
            wash_window_size: self.wash_window_size,
            wash_window_secs: self.wash_window_secs,
            wash_repeat_threshold: self.wash_repeat_threshold,
            wash_amount_significant_digits: self.wash_amount_significant_digits,
            wash_max_tracked_keys: self.wash_max_tracked_keys,
            cycle_detection_enabled: self.cycle_detection_enabled,
            liquidity_removal_threshold: self.liquidity_removal_threshold,
            weights: RiskWeights {
                wash_trading: self.risk_weight_wash,
                cyclic: self.risk_weight_cycle,
                liquidity: self.risk_weight_liquidity,
            },
        }
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            removal_threshold: self.liquidity_removal_threshold,
            impact_alert_threshold: self.liquidity_impact_alert_threshold,
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            start_height: self.start_height,
            block_buffer_size: self.block_buffer_size,
            analysis_workers: self.analysis_workers,
            min_alert_score: self.min_alert_score,
            mempool_poll_enabled: self.mempool_poll_enabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        let vars = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string()));
        envy::from_iter::<_, Config>(vars).expect("config should parse")
    }

    #[test]
    fn test_defaults_only_require_rpc_url() {
        let config = from_pairs(&[("LEDGER_RPC_URL", "http://127.0.0.1:8899")]);

        assert_eq!(config.ledger_rpc_url, "http://127.0.0.1:8899");
        assert_eq!(config.ledger_max_retries, 5);
        assert!(config.cycle_detection_enabled);
        assert!(config.start_height.is_none());
        assert_eq!(config.log_format, LogFormat::Json);
        assert!((config.liquidity_removal_threshold - 0.1).abs() < f64::EPSILON);

        let analyzer = config.analyzer_config();
        assert_eq!(analyzer.wash_repeat_threshold, 3);
        assert!((analyzer.weights.wash_trading - 0.45).abs() < f64::EPSILON);
    }

    #[test]
    fn test_overrides_flow_into_views() {
        let config = from_pairs(&[
            ("LEDGER_RPC_URL", "http://rpc"),
            ("LEDGER_TIMEOUT_MS", "2500"),
            ("LEDGER_MAX_RETRIES", "2"),
            ("CYCLE_DETECTION_ENABLED", "false"),
            ("START_HEIGHT", "12345"),
            ("RISK_WEIGHT_CYCLE", "0.9"),
            ("LOG_FORMAT", "pretty"),
        ]);

        let retry = config.retry_policy();
        assert_eq!(retry.timeout, Duration::from_millis(2500));
        assert_eq!(retry.max_retries, 2);
        assert_eq!(config.pipeline_config().start_height, Some(12345));
        assert!(!config.analyzer_config().cycle_detection_enabled);
        assert!((config.analyzer_config().weights.cyclic - 0.9).abs() < f64::EPSILON);
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn test_missing_rpc_url_is_an_error() {
        let vars: Vec<(String, String)> = vec![];
        assert!(envy::from_iter::<_, Config>(vars).is_err());
    }
}
