// DANS : src/monitoring/logging.rs
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

// hyper et reqwest sont très bavards en debug, on ne garde que leurs alertes.
const DEFAULT_FILTER: &str = "info,hyper=warn,reqwest=warn";

/// Logs JSON filtrés par `RUST_LOG`. La fermeture des spans `warp::trace`
/// donne la durée de chaque requête HTTP.
pub fn setup_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let installed = tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .try_init();

    if let Err(e) = installed {
        eprintln!("[Logging] Subscriber déjà installé : {}", e);
    }
}
