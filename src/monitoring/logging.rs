// DANS : src/monitoring/logging.rs
use serde::Deserialize;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Filtre utilisé quand RUST_LOG n'est pas défini : nos modules en info, le reste en warn.
const DEFAULT_FILTER: &str = "warn,sentinel=info";

#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Une ligne JSON par événement (production, ingestion par un collecteur).
    #[default]
    Json,
    /// Lisible dans un terminal.
    Pretty,
}

pub fn setup_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true);

    // `try_init` : un second appel (tests, binaire embarqué) ne doit pas paniquer.
    let _ = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    };
}
