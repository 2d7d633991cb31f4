// DANS : src/rpc/retry.rs

use crate::monitoring::metrics;
use anyhow::Result;
use solana_client::client_error::{ClientError, ClientErrorKind};
use std::{future::Future, io, time::Duration};
use tokio::time::{error::Elapsed, sleep, timeout};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Nombre total de tentatives, la première comprise.
    pub max_attempts: u32,
    /// Délai avant la 2e tentative, doublé à chaque tentative suivante.
    pub base_delay: Duration,
    /// Délai maximum d'une tentative. Au-delà, la tentative compte comme un timeout.
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500))
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self { max_attempts: max_attempts.max(1), base_delay, attempt_timeout: None }
    }

    pub fn with_attempt_timeout(mut self, limit: Duration) -> Self {
        self.attempt_timeout = Some(limit);
        self
    }

    /// Attente après l'échec de la tentative `attempt` (numérotée à partir de 1).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }

    /// Durée maximale d'un appel complet : toutes les tentatives au délai
    /// maximum, plus les attentes entre elles. `None` sans délai par tentative.
    pub fn worst_case(&self) -> Option<Duration> {
        let limit = self.attempt_timeout?;
        let attempts = self.max_attempts.max(1);
        let waits = (1..attempts).fold(Duration::ZERO, |total, attempt| {
            total.saturating_add(self.delay_after(attempt))
        });
        Some(limit.saturating_mul(attempts).saturating_add(waits))
    }
}

/// Une tentative a dépassé son délai.
#[derive(Debug, thiserror::Error)]
#[error("{label} : aucune réponse après {after:?}")]
pub struct CallTimedOut {
    pub label: String,
    pub after: Duration,
}

fn client_error_is_timeout(error: &ClientError) -> bool {
    match error.kind() {
        ClientErrorKind::Reqwest(e) => e.is_timeout(),
        ClientErrorKind::Io(e) => e.kind() == io::ErrorKind::TimedOut,
        _ => false,
    }
}

/// Seules les erreurs de type timeout sont réessayées. Tout le reste
/// (adresse invalide, réponse malformée, erreur RPC) est définitif.
pub fn is_timeout(error: &anyhow::Error) -> bool {
    error.chain().any(|cause| {
        cause.is::<CallTimedOut>()
            || cause.is::<Elapsed>()
            || cause.downcast_ref::<reqwest::Error>().is_some_and(|e| e.is_timeout())
            || cause.downcast_ref::<ClientError>().is_some_and(client_error_is_timeout)
            || cause
                .downcast_ref::<io::Error>()
                .is_some_and(|e| e.kind() == io::ErrorKind::TimedOut)
    })
}

/// Exécute `operation` avec ré-essais sur timeout.
///
/// Un succès est retourné tel quel, même vide (`None`, liste vide) : une
/// transaction pas encore indexée n'est pas une erreur.
pub async fn with_retries<T, F, Fut>(policy: &RetryPolicy, label: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let outcome = match policy.attempt_timeout {
            Some(limit) => match timeout(limit, operation()).await {
                Ok(result) => result,
                Err(_) => Err(CallTimedOut { label: label.to_string(), after: limit }.into()),
            },
            None => operation().await,
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts && is_timeout(&e) => {
                let delay = policy.delay_after(attempt);
                warn!(
                    "[Retry] {} : timeout (tentative {}/{}), nouvel essai dans {:?}.",
                    label, attempt, max_attempts, delay
                );
                metrics::RPC_RETRIES.with_label_values(&[label]).inc();
                sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                return Err(e.context(format!(
                    "Échec final de {} après {} tentative(s)",
                    label, attempt
                )));
            }
        }
    }
}
