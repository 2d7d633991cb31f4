// DANS : src/cache/server_cache.rs

use super::keys::CacheKind;
use super::store::{CacheStats, EntryInfo, TtlCache};
use crate::monitoring::metrics;
use anyhow::{anyhow, Result};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::{
    collections::HashMap,
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, Weak,
    },
};
use tokio::task::AbortHandle;
use tracing::{debug, warn};

/// Erreur d'un fetch partagée entre tous les appelants qui l'attendaient.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0:#}")]
pub struct SharedFetchError(Arc<anyhow::Error>);

impl SharedFetchError {
    pub fn inner(&self) -> &anyhow::Error {
        &self.0
    }
}

type SharedFetch<T> = Shared<BoxFuture<'static, Result<T, SharedFetchError>>>;

/// Requête en vol pour une clé. Le fetch tourne dans sa propre tâche : il
/// avance même si aucun appelant ne le poll.
struct InFlight<T> {
    id: u64,
    shared: SharedFetch<T>,
    waiters: usize,
    abort: AbortHandle,
}

struct Inner<T> {
    name: &'static str,
    store: TtlCache<T>,
    // Au plus une requête en vol par clé.
    pending: Mutex<HashMap<String, InFlight<T>>>,
    pending_waits: AtomicU64,
    next_id: AtomicU64,
}

impl<T> Inner<T> {
    fn pending(&self) -> MutexGuard<'_, HashMap<String, InFlight<T>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Un appelant en attente d'une requête en vol. Quand le dernier appelant
/// abandonne (timeout du lot, client HTTP parti), la requête est annulée et
/// sa réponse tardive ne sera jamais mise en cache.
struct Waiter<T> {
    inner: Weak<Inner<T>>,
    key: String,
    id: u64,
}

impl<T> Drop for Waiter<T> {
    fn drop(&mut self) {
        let Some(inner) = self.inner.upgrade() else { return };
        let abandoned = {
            let mut pending = inner.pending();
            let last_waiter = match pending.get_mut(&self.key) {
                Some(entry) if entry.id == self.id => {
                    entry.waiters -= 1;
                    entry.waiters == 0
                }
                // La tâche a déjà terminé, ou la clé appartient à un fetch plus récent.
                _ => false,
            };
            if last_waiter { pending.remove(&self.key) } else { None }
        };
        // Hors du verrou : la libération du `Shared` ne doit pas le reprendre.
        if let Some(entry) = abandoned {
            entry.abort.abort();
            debug!("[Cache:{}] Fetch abandonné pour {}.", inner.name, self.key);
            metrics::CACHE_EVENTS.with_label_values(&[inner.name, "abandoned"]).inc();
        }
    }
}

/// Cache serveur : stockage TTL + coordination single-flight.
///
/// Construit une fois au démarrage puis cloné dans chaque service (les clones
/// partagent le même état).
pub struct ServerCache<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for ServerCache<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T> ServerCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                store: TtlCache::new(),
                pending: Mutex::new(HashMap::new()),
                pending_waits: AtomicU64::new(0),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    pub fn get(&self, key: &str) -> Option<T> {
        self.inner.store.get(key)
    }

    pub fn set(&self, key: impl Into<String>, data: T, kind: CacheKind) {
        self.inner.store.set(key, data, kind);
    }

    pub fn invalidate(&self, pattern: &str) -> usize {
        self.inner.store.invalidate(pattern)
    }

    pub fn cleanup(&self) -> usize {
        self.inner.store.cleanup()
    }

    pub fn entry_info(&self, key: &str) -> Option<EntryInfo> {
        self.inner.store.entry_info(key)
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending().len()
    }

    pub fn pending_waits(&self) -> u64 {
        self.inner.pending_waits.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            pending: self.pending_count(),
            ..self.inner.store.stats()
        }
    }

    /// Retourne la valeur en cache, attend la requête déjà en vol pour cette
    /// clé, ou lance `fetch`. Le résultat est stocké avec le TTL de `kind` ;
    /// une erreur n'est jamais mise en cache.
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, kind: CacheKind, fetch: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.get_or_fetch_classified(key, move |_| kind, fetch).await
    }

    /// Comme `get_or_fetch`, mais le type de cache est choisi d'après la
    /// valeur obtenue (ex. historique vide → TTL plus court).
    pub async fn get_or_fetch_classified<F, Fut, C>(
        &self,
        key: &str,
        classify: C,
        fetch: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        C: FnOnce(&T) -> CacheKind + Send + 'static,
    {
        let name = self.inner.name;

        if let Some(value) = self.inner.store.get(key) {
            debug!("[Cache:{}] HIT {}", name, key);
            metrics::CACHE_EVENTS.with_label_values(&[name, "hit"]).inc();
            return Ok(value);
        }

        // Vérification et enregistrement sous le même verrou, sans `.await`
        // entre les deux.
        let (shared, id) = {
            let mut pending = self.inner.pending();
            if let Some(in_flight) = pending.get_mut(key) {
                debug!("[Cache:{}] Requête déjà en vol pour {}, on l'attend.", name, key);
                self.inner.pending_waits.fetch_add(1, Ordering::Relaxed);
                metrics::CACHE_EVENTS.with_label_values(&[name, "pending_wait"]).inc();
                in_flight.waiters += 1;
                (in_flight.shared.clone(), in_flight.id)
            } else if let Some(value) = self.inner.store.get(key) {
                // Un fetch concurrent vient de se terminer.
                return Ok(value);
            } else {
                debug!("[Cache:{}] MISS {}. Fetching...", name, key);
                metrics::CACHE_EVENTS.with_label_values(&[name, "miss"]).inc();
                let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                let in_flight = Self::start_fetch(
                    Arc::downgrade(&self.inner),
                    key.to_string(),
                    id,
                    classify,
                    fetch,
                );
                let shared = in_flight.shared.clone();
                pending.insert(key.to_string(), in_flight);
                (shared, id)
            }
        };

        let _waiter = Waiter { inner: Arc::downgrade(&self.inner), key: key.to_string(), id };
        shared.await.map_err(anyhow::Error::new)
    }

    fn start_fetch<F, Fut, C>(
        inner: Weak<Inner<T>>,
        key: String,
        id: u64,
        classify: C,
        fetch: F,
    ) -> InFlight<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        C: FnOnce(&T) -> CacheKind + Send + 'static,
    {
        let request = fetch();
        let task = tokio::spawn(async move {
            let outcome = request.await;
            let Some(inner) = inner.upgrade() else {
                return outcome.map_err(|e| SharedFetchError(Arc::new(e)));
            };

            // La clé n'est libérée qu'ici, et la valeur stockée sous le même
            // verrou : un nouvel appelant voit soit la requête en vol, soit le cache.
            let mut pending = inner.pending();
            if pending.get(&key).is_some_and(|entry| entry.id == id) {
                pending.remove(&key);
            }
            match outcome {
                Ok(value) => {
                    let kind = classify(&value);
                    inner.store.set(key, value.clone(), kind);
                    Ok(value)
                }
                Err(e) => {
                    drop(pending);
                    warn!("[Cache:{}] Échec du fetch pour {} : {:#}", inner.name, key, e);
                    metrics::CACHE_EVENTS
                        .with_label_values(&[inner.name, "fetch_error"])
                        .inc();
                    Err(SharedFetchError(Arc::new(e)))
                }
            }
        });

        let abort = task.abort_handle();
        let shared = task
            .map(|joined| match joined {
                Ok(outcome) => outcome,
                Err(e) => Err(SharedFetchError(Arc::new(anyhow!("Fetch interrompu : {}", e)))),
            })
            .boxed()
            .shared();

        InFlight { id, shared, waiters: 1, abort }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use futures_util::future::join_all;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::time::{advance, sleep};

    fn counting_fetch(
        calls: &Arc<AtomicUsize>,
        value: u64,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<u64>> + use<> {
        let calls = calls.clone();
        move || {
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                sleep(Duration::from_millis(50)).await;
                Ok(value)
            }
            .boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_a_single_fetch() {
        let cache = ServerCache::<u64>::new("test");
        let calls = Arc::new(AtomicUsize::new(0));

        let callers = (0..8).map(|_| {
            let cache = cache.clone();
            let fetch = counting_fetch(&calls, 42);
            async move { cache.get_or_fetch("x", CacheKind::TokenBalance, fetch).await }
        });
        let results = join_all(callers).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| matches!(r, Ok(42))));
        assert_eq!(cache.pending_waits(), 7);
        assert_eq!(cache.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn second_call_within_ttl_is_a_hit() {
        let cache = ServerCache::<u64>::new("test");
        let calls = Arc::new(AtomicUsize::new(0));

        cache
            .get_or_fetch("x", CacheKind::TokenBalance, counting_fetch(&calls, 7))
            .await
            .unwrap();
        advance(Duration::from_secs(30)).await;
        let second = cache
            .get_or_fetch("x", CacheKind::TokenBalance, counting_fetch(&calls, 8))
            .await
            .unwrap();

        assert_eq!(second, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // 120 s après l'insertion, l'entrée a expiré.
        advance(Duration::from_secs(90)).await;
        let third = cache
            .get_or_fetch("x", CacheKind::TokenBalance, counting_fetch(&calls, 9))
            .await
            .unwrap();
        assert_eq!(third, 9);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_history_kind_uses_its_short_ttl() {
        let cache = ServerCache::<Vec<String>>::new("history");
        let calls = Arc::new(AtomicUsize::new(0));
        let fetch = |calls: &Arc<AtomicUsize>| {
            let calls = calls.clone();
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, anyhow::Error>(Vec::new())
            }
        };

        let first = cache
            .get_or_fetch("y", CacheKind::TransactionHistoryEmpty, fetch(&calls))
            .await
            .unwrap();
        assert!(first.is_empty());
        assert_eq!(cache.entry_info("y").unwrap().kind, CacheKind::TransactionHistoryEmpty);

        advance(Duration::from_secs(29)).await;
        cache
            .get_or_fetch("y", CacheKind::TransactionHistoryEmpty, fetch(&calls))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        advance(Duration::from_secs(1)).await;
        cache
            .get_or_fetch("y", CacheKind::TransactionHistoryEmpty, fetch(&calls))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn classified_fetch_picks_kind_from_value() {
        let cache = ServerCache::<Vec<u8>>::new("test");
        let classify = |v: &Vec<u8>| {
            if v.is_empty() { CacheKind::TransactionHistoryEmpty } else { CacheKind::TransactionHistory }
        };

        cache
            .get_or_fetch_classified("empty", classify, || async { Ok::<_, anyhow::Error>(Vec::new()) })
            .await
            .unwrap();
        cache
            .get_or_fetch_classified("full", classify, || async { Ok::<_, anyhow::Error>(vec![1]) })
            .await
            .unwrap();

        assert_eq!(cache.entry_info("empty").unwrap().kind, CacheKind::TransactionHistoryEmpty);
        assert_eq!(cache.entry_info("full").unwrap().kind, CacheKind::TransactionHistory);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_reach_every_waiter_and_are_not_cached() {
        let cache = ServerCache::<u64>::new("test");
        let calls = Arc::new(AtomicUsize::new(0));

        let callers = (0..3).map(|_| {
            let cache = cache.clone();
            let calls = calls.clone();
            async move {
                cache
                    .get_or_fetch("z", CacheKind::TokenBalance, move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        sleep(Duration::from_millis(10)).await;
                        Err::<u64, _>(anyhow!("rpc indisponible"))
                    })
                    .await
            }
        });
        let results = join_all(callers).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for result in &results {
            let err = result.as_ref().unwrap_err();
            assert!(err.to_string().contains("rpc indisponible"));
        }
        assert_eq!(cache.pending_count(), 0);
        assert!(cache.get("z").is_none());

        // La clé n'est pas bloquée : le prochain appel relance le fetch.
        let value = cache
            .get_or_fetch("z", CacheKind::TokenBalance, counting_fetch(&calls, 5))
            .await
            .unwrap();
        assert_eq!(value, 5);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    fn slow_fetch(
        calls: &Arc<AtomicUsize>,
        value: u64,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<u64>> + use<> {
        let calls = calls.clone();
        move || {
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                sleep(Duration::from_secs(20)).await;
                Ok(value)
            }
            .boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_fetch_releases_the_key_and_its_late_value_is_dropped() {
        let cache = ServerCache::<u64>::new("test");
        let calls = Arc::new(AtomicUsize::new(0));

        let gave_up = tokio::time::timeout(
            Duration::from_secs(8),
            cache.get_or_fetch("a", CacheKind::TokenBalance, slow_fetch(&calls, 100)),
        )
        .await;
        assert!(gave_up.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.pending_count(), 0);
        assert_eq!(cache.stats().pending, 0);

        // La réponse tardive (t = 20 s) n'est jamais stockée.
        advance(Duration::from_secs(3600)).await;
        assert!(cache.get("a").is_none());

        let fresh = cache
            .get_or_fetch("a", CacheKind::TokenBalance, counting_fetch(&calls, 200))
            .await
            .unwrap();
        assert_eq!(fresh, 200);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_survives_while_one_waiter_remains() {
        let cache = ServerCache::<u64>::new("test");
        let calls = Arc::new(AtomicUsize::new(0));

        let patient = {
            let cache = cache.clone();
            let fetch = slow_fetch(&calls, 100);
            tokio::spawn(async move { cache.get_or_fetch("b", CacheKind::TokenBalance, fetch).await })
        };
        while cache.pending_count() == 0 {
            tokio::task::yield_now().await;
        }

        let impatient = tokio::time::timeout(
            Duration::from_secs(8),
            cache.get_or_fetch("b", CacheKind::TokenBalance, counting_fetch(&calls, 1)),
        )
        .await;
        assert!(impatient.is_err());
        assert_eq!(cache.pending_count(), 1);

        assert_eq!(patient.await.unwrap().unwrap(), 100);
        assert_eq!(cache.get("b"), Some(100));
        assert_eq!(cache.pending_count(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_a_refetch() {
        let cache = ServerCache::<u64>::new("test");
        cache.set("token-balance:wallet=wallet123", 1, CacheKind::TokenBalance);
        cache.set("token-balance:wallet=other", 2, CacheKind::TokenBalance);

        assert_eq!(cache.invalidate("wallet123"), 1);
        let refreshed = cache
            .get_or_fetch("token-balance:wallet=wallet123", CacheKind::TokenBalance, || async {
                Ok::<_, anyhow::Error>(10)
            })
            .await
            .unwrap();
        assert_eq!(refreshed, 10);
        assert_eq!(cache.get("token-balance:wallet=other"), Some(2));
    }
}
