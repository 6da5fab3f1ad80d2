// DANS : src/monitoring/metrics.rs

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder,
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
};
use tracing::info;
use warp::Filter;

lazy_static! {
    // --- Ingestion ---
    pub static ref BLOCKS_INGESTED: IntCounter = register_int_counter!(
        "sentinel_blocks_ingested_total", "Nombre de blocs acceptés par l'ingestor"
    ).expect("metric registration");
    pub static ref BLOCKS_SKIPPED: IntCounterVec = register_int_counter_vec!(
        "sentinel_blocks_skipped_total",
        "Blocs abandonnés, par raison",
        &["reason"] // Labels: "slot_skipped", "retries_exhausted", "ledger_error", "malformed", "stale"
    ).expect("metric registration");
    pub static ref BLOCKS_ORPHANED: IntCounter = register_int_counter!(
        "sentinel_blocks_orphaned_total", "Blocs réorganisés, écartés avant analyse"
    ).expect("metric registration");
    pub static ref LAST_ACCEPTED_HEIGHT: IntGauge = register_int_gauge!(
        "sentinel_last_accepted_height", "Dernière hauteur de bloc acceptée"
    ).expect("metric registration");

    // --- Transactions ---
    pub static ref TRANSACTIONS_ANALYZED: IntCounter = register_int_counter!(
        "sentinel_transactions_analyzed_total", "Nombre de transactions passées dans l'analyseur"
    ).expect("metric registration");
    pub static ref TRANSACTIONS_DROPPED: IntCounterVec = register_int_counter_vec!(
        "sentinel_transactions_dropped_total",
        "Transactions écartées avant analyse, par raison",
        &["reason"] // Labels: "duplicate", "fee_mismatch", "missing_fee", ...
    ).expect("metric registration");

    // --- Sorties ---
    pub static ref ALERTS_EMITTED: IntCounterVec = register_int_counter_vec!(
        "sentinel_alerts_emitted_total",
        "Alertes envoyées au sink",
        &["kind"] // Labels: "transaction", "impact", "removal"
    ).expect("metric registration");
    pub static ref POOLS_TRACKED: IntGauge = register_int_gauge!(
        "sentinel_pools_tracked", "Nombre de pools suivis par le tracker de liquidité"
    ).expect("metric registration");

    // --- Ledger ---
    pub static ref LEDGER_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "sentinel_ledger_requests_total",
        "Compteur total des requêtes au ledger, segmenté par méthode et statut",
        &["method", "status"] // Labels: "get_block", "success" / "failure"
    ).expect("metric registration");
    pub static ref LEDGER_REQUEST_LATENCY: HistogramVec = register_histogram_vec!(
        "sentinel_ledger_request_latency_seconds",
        "Latence des appels au ledger",
        &["method"]
    ).expect("metric registration");
}

/// Rendu texte (format Prometheus) de toutes les métriques enregistrées.
pub fn render() -> Result<Vec<u8>> {
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    encoder
        .encode(&prometheus::gather(), &mut buffer)
        .context("Échec de l'encodage des métriques")?;
    Ok(buffer)
}

pub async fn start_metrics_server(port: u16) {
    let metrics_route = warp::path!("metrics").map(|| {
        let body = render().unwrap_or_default();
        warp::reply::with_header(body, "content-type", "text/plain; version=0.0.4")
    });
    info!(port, "[Monitoring] Serveur de métriques exposé sur /metrics");
    warp::serve(metrics_route).run(([0, 0, 0, 0], port)).await;
}
