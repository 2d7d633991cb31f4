// DANS : src/monitoring/metrics.rs

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, TextEncoder, register_histogram_vec,
    register_int_counter, register_int_counter_vec,
};

lazy_static! {
    // --- Cache serveur ---
    pub static ref CACHE_EVENTS: IntCounterVec = register_int_counter_vec!(
        "camp_cache_events_total",
        "Événements du cache serveur (hit, miss, pending_wait, fetch_error)",
        &["cache", "event"]
    ).expect("enregistrement de camp_cache_events_total");
    pub static ref CACHE_INVALIDATED_ENTRIES: IntCounter = register_int_counter!(
        "camp_cache_invalidated_entries_total", "Entrées supprimées par invalidation explicite"
    ).expect("enregistrement de camp_cache_invalidated_entries_total");
    pub static ref CACHE_SWEPT_ENTRIES: IntCounter = register_int_counter!(
        "camp_cache_swept_entries_total", "Entrées expirées supprimées par le nettoyage périodique"
    ).expect("enregistrement de camp_cache_swept_entries_total");

    // --- Moteur de lots ---
    pub static ref BATCH_ENTITIES: IntCounterVec = register_int_counter_vec!(
        "camp_batch_entities_total",
        "Entités traitées par le moteur de lots, par issue",
        &["batch", "outcome"] // Labels: "token_balance", "resolved" / "failed" / "timeout" / "unsupported"
    ).expect("enregistrement de camp_batch_entities_total");
    pub static ref BATCH_DURATION: HistogramVec = register_histogram_vec!(
        "camp_batch_duration_seconds",
        "Durée totale d'un appel au moteur de lots",
        &["batch"]
    ).expect("enregistrement de camp_batch_duration_seconds");
    pub static ref ENDPOINT_PROBES: IntCounterVec = register_int_counter_vec!(
        "camp_endpoint_probes_total",
        "Sondes de capacité envoyées aux endpoints amont",
        &["outcome"]
    ).expect("enregistrement de camp_endpoint_probes_total");

    // --- RPC ---
    pub static ref RPC_RETRIES: IntCounterVec = register_int_counter_vec!(
        "camp_rpc_retries_total",
        "Nouvelles tentatives après un timeout, par méthode",
        &["method"]
    ).expect("enregistrement de camp_rpc_retries_total");
}

/// Sérialise le registre Prometheus au format texte.
pub fn gather_text() -> Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    encoder
        .encode(&prometheus::gather(), &mut buffer)
        .context("Échec de l'encodage des métriques")?;
    String::from_utf8(buffer).context("Métriques non UTF-8")
}
