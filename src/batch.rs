// DANS : src/batch.rs

use crate::monitoring::metrics;
use anyhow::Result;
use futures_util::future::join_all;
use serde::Serialize;
use std::{
    collections::{HashMap, HashSet},
    fmt::Display,
    future::Future,
    hash::Hash,
    time::Duration,
};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};

/// Réglages d'un type de lot. Les requêtes lourdes (métadonnées complètes)
/// utilisent des chunks plus petits et un délai plus long que les simples comptages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchProfile {
    pub chunk_size: usize,
    /// Délai maximum pour résoudre UNE entité.
    pub item_timeout: Duration,
    /// Pause entre deux chunks (pas entre deux appels).
    pub chunk_delay: Duration,
}

impl BatchProfile {
    pub const TOKEN_BALANCE: BatchProfile = BatchProfile {
        chunk_size: 10,
        item_timeout: Duration::from_secs(8),
        chunk_delay: Duration::from_millis(100),
    };
    pub const NFT_COUNT: BatchProfile = BatchProfile {
        chunk_size: 10,
        item_timeout: Duration::from_secs(5),
        chunk_delay: Duration::from_millis(100),
    };
    pub const NFT_METADATA: BatchProfile = BatchProfile {
        chunk_size: 3,
        item_timeout: Duration::from_secs(15),
        chunk_delay: Duration::from_millis(100),
    };
}

/// Résultat d'une entité. `Unknown` porte la valeur de repli (ex. 0) : elle
/// s'affiche comme une vraie valeur mais n'en est pas une, à l'appelant de
/// choisir le rendu.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Resolution<V> {
    Resolved(V),
    Unknown(V),
}

impl<V> Resolution<V> {
    pub fn value(&self) -> &V {
        match self {
            Resolution::Resolved(v) | Resolution::Unknown(v) => v,
        }
    }

    pub fn into_value(self) -> V {
        match self {
            Resolution::Resolved(v) | Resolution::Unknown(v) => v,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Resolution::Resolved(_))
    }

    pub fn resolved(&self) -> Option<&V> {
        match self {
            Resolution::Resolved(v) => Some(v),
            Resolution::Unknown(_) => None,
        }
    }
}

/// Pourquoi un endpoint a échoué à la sonde de capacité.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// L'endpoint répond mais ne supporte pas la requête voulue.
    #[error("capacité non supportée : {0}")]
    Unsupported(String),
    /// L'endpoint n'a pas pu être joint.
    #[error(transparent)]
    Unreachable(#[from] anyhow::Error),
}

#[derive(Debug)]
pub enum ProbeOutcome {
    Capable(usize),
    /// Au moins un endpoint a répondu, aucun ne supporte la requête (ou la liste est vide).
    Unsupported,
    /// Aucun endpoint joignable.
    Unreachable(anyhow::Error),
}

/// Sonde les candidats dans l'ordre de priorité et s'arrête au premier qui
/// supporte la requête.
pub async fn probe_endpoints<C, P, PFut>(candidates: &[C], probe: P) -> ProbeOutcome
where
    C: Clone + Display,
    P: Fn(C) -> PFut,
    PFut: Future<Output = Result<(), ProbeError>>,
{
    let mut answered = false;
    let mut last_transport_error = None;

    for (index, candidate) in candidates.iter().enumerate() {
        match probe(candidate.clone()).await {
            Ok(()) => {
                debug!("[Batch] Endpoint {} retenu (priorité {}).", candidate, index);
                metrics::ENDPOINT_PROBES.with_label_values(&["capable"]).inc();
                return ProbeOutcome::Capable(index);
            }
            Err(ProbeError::Unsupported(reason)) => {
                warn!("[Batch] Endpoint {} ne supporte pas la requête : {}", candidate, reason);
                metrics::ENDPOINT_PROBES.with_label_values(&["unsupported"]).inc();
                answered = true;
            }
            Err(ProbeError::Unreachable(e)) => {
                warn!("[Batch] Endpoint {} injoignable : {:#}", candidate, e);
                metrics::ENDPOINT_PROBES.with_label_values(&["unreachable"]).inc();
                last_transport_error = Some(e);
            }
        }
    }

    match last_transport_error {
        Some(e) if !answered => ProbeOutcome::Unreachable(e),
        _ => ProbeOutcome::Unsupported,
    }
}

/// Déduplique en gardant l'ordre de première apparition.
fn dedupe<E: Eq + Hash + Clone>(entities: &[E]) -> Vec<E> {
    let mut seen = HashSet::with_capacity(entities.len());
    entities.iter().filter(|e| seen.insert((*e).clone())).cloned().collect()
}

/// Moteur de résolution par lots : chunks traités l'un après l'autre, entités
/// d'un même chunk en parallèle, délai par entité, valeur de repli en cas
/// d'échec. Chaque entité en entrée a une entrée en sortie.
#[derive(Debug, Clone)]
pub struct BatchLookup {
    label: &'static str,
    profile: BatchProfile,
}

impl BatchLookup {
    pub fn new(label: &'static str, profile: BatchProfile) -> Self {
        Self { label, profile }
    }

    pub fn profile(&self) -> &BatchProfile {
        &self.profile
    }

    pub async fn resolve<E, V, D, F, Fut>(
        &self,
        entities: &[E],
        fallback: D,
        resolver: F,
    ) -> HashMap<E, Resolution<V>>
    where
        E: Eq + Hash + Clone + Display,
        D: Fn() -> V,
        F: Fn(E) -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let started = Instant::now();
        let unique = dedupe(entities);
        let chunk_size = self.profile.chunk_size.max(1);
        let total_chunks = unique.len().div_ceil(chunk_size);
        let mut results = HashMap::with_capacity(unique.len());
        let mut failures = 0usize;

        for (index, chunk) in unique.chunks(chunk_size).enumerate() {
            if index > 0 {
                sleep(self.profile.chunk_delay).await;
            }
            debug!(
                "[Batch:{}] Chunk {}/{} ({} entités)...",
                self.label,
                index + 1,
                total_chunks,
                chunk.len()
            );

            let item_timeout = self.profile.item_timeout;
            let calls = chunk.iter().map(|entity| {
                let call = resolver(entity.clone());
                async move { (entity, timeout(item_timeout, call).await) }
            });

            for (entity, outcome) in join_all(calls).await {
                let resolution = match outcome {
                    Ok(Ok(value)) => {
                        metrics::BATCH_ENTITIES.with_label_values(&[self.label, "resolved"]).inc();
                        Resolution::Resolved(value)
                    }
                    Ok(Err(e)) => {
                        warn!("[Batch:{}] Échec pour {} : {:#}", self.label, entity, e);
                        metrics::BATCH_ENTITIES.with_label_values(&[self.label, "failed"]).inc();
                        failures += 1;
                        Resolution::Unknown(fallback())
                    }
                    Err(_) => {
                        warn!(
                            "[Batch:{}] Timeout pour {} après {:?}.",
                            self.label, entity, item_timeout
                        );
                        metrics::BATCH_ENTITIES.with_label_values(&[self.label, "timeout"]).inc();
                        failures += 1;
                        Resolution::Unknown(fallback())
                    }
                };
                results.insert(entity.clone(), resolution);
            }
        }

        metrics::BATCH_DURATION
            .with_label_values(&[self.label])
            .observe(started.elapsed().as_secs_f64());
        info!(
            "[Batch:{}] {} entités résolues en {} chunk(s), {} en repli.",
            self.label,
            results.len(),
            total_chunks,
            failures
        );
        results
    }

    /// Sonde d'abord les endpoints candidats, puis résout tout le lot contre
    /// le premier endpoint capable (pas de nouvelle sonde par entité).
    ///
    /// Aucun endpoint capable → toutes les entités en repli. Aucun endpoint
    /// joignable → erreur.
    pub async fn resolve_with_probe<C, P, PFut, E, V, D, F, Fut>(
        &self,
        candidates: &[C],
        probe: P,
        entities: &[E],
        fallback: D,
        resolver: F,
    ) -> Result<HashMap<E, Resolution<V>>>
    where
        C: Clone + Display,
        P: Fn(C) -> PFut,
        PFut: Future<Output = Result<(), ProbeError>>,
        E: Eq + Hash + Clone + Display,
        D: Fn() -> V,
        F: Fn(C, E) -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        if entities.is_empty() {
            return Ok(HashMap::new());
        }

        match probe_endpoints(candidates, probe).await {
            ProbeOutcome::Capable(index) => {
                let endpoint = candidates[index].clone();
                Ok(self
                    .resolve(entities, fallback, |entity| resolver(endpoint.clone(), entity))
                    .await)
            }
            ProbeOutcome::Unsupported => {
                error!(
                    "[Batch:{}] Aucun des {} endpoint(s) ne supporte la requête. Repli pour {} entités.",
                    self.label,
                    candidates.len(),
                    entities.len()
                );
                let unique = dedupe(entities);
                metrics::BATCH_ENTITIES
                    .with_label_values(&[self.label, "unsupported"])
                    .inc_by(unique.len() as u64);
                Ok(unique
                    .into_iter()
                    .map(|entity| (entity, Resolution::Unknown(fallback())))
                    .collect())
            }
            ProbeOutcome::Unreachable(e) => Err(e.context(format!(
                "[Batch:{}] Aucun endpoint joignable parmi {} candidat(s)",
                self.label,
                candidates.len()
            ))),
        }
    }
}
