// DANS : src/cache/store.rs

use super::keys::CacheKind;
use serde::Serialize;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct CacheEntry<T> {
    data: T,
    kind: CacheKind,
    inserted_at: Instant,
    ttl: Duration,
    // Observabilité uniquement, jamais utilisé pour l'éviction.
    access_count: u64,
    last_access: Instant,
}

impl<T> CacheEntry<T> {
    fn is_valid(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) < self.ttl
    }
}

/// Vue en lecture seule d'une entrée, pour le diagnostic.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryInfo {
    pub kind: CacheKind,
    pub age: Duration,
    pub access_count: u64,
    pub since_last_access: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    /// Entrées expirées mais pas encore balayées par `cleanup`.
    pub expired: usize,
    pub pending: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Stockage clé → valeur avec expiration par entrée. Pas de limite de taille :
/// seule l'expiration fait sortir une entrée.
pub struct TtlCache<T> {
    entries: Mutex<HashMap<String, CacheEntry<T>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<T> Default for TtlCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TtlCache<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<T>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Écrase l'entrée existante et repart de zéro pour le TTL.
    pub fn set(&self, key: impl Into<String>, data: T, kind: CacheKind) {
        let now = Instant::now();
        let entry = CacheEntry {
            data,
            kind,
            inserted_at: now,
            ttl: kind.ttl(),
            access_count: 0,
            last_access: now,
        };
        self.lock().insert(key.into(), entry);
    }

    /// Supprime toutes les clés contenant `pattern`. Retourne le nombre supprimé.
    pub fn invalidate(&self, pattern: &str) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|key, _| !key.contains(pattern));
        before - entries.len()
    }

    /// Supprime les entrées expirées. Retourne le nombre supprimé.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_valid(now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn entry_info(&self, key: &str) -> Option<EntryInfo> {
        let now = Instant::now();
        self.lock().get(key).map(|entry| EntryInfo {
            kind: entry.kind,
            age: now.saturating_duration_since(entry.inserted_at),
            access_count: entry.access_count,
            since_last_access: now.saturating_duration_since(entry.last_access),
        })
    }

    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let entries = self.lock();
        CacheStats {
            entries: entries.len(),
            expired: entries.values().filter(|entry| !entry.is_valid(now)).count(),
            pending: 0,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl<T: Clone> TtlCache<T> {
    /// Retourne la valeur si elle n'a pas expiré. Une entrée expirée est
    /// considérée absente mais reste en place jusqu'au prochain `cleanup`.
    pub fn get(&self, key: &str) -> Option<T> {
        let now = Instant::now();
        let mut entries = self.lock();
        match entries.get_mut(key) {
            Some(entry) if entry.is_valid(now) => {
                entry.access_count += 1;
                entry.last_access = now;
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.data.clone())
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    #[tokio::test(start_paused = true)]
    async fn entry_expires_exactly_at_ttl() {
        let cache = TtlCache::new();
        cache.set("balance:A", 10u64, CacheKind::TokenBalance);

        advance(CacheKind::TokenBalance.ttl() - Duration::from_millis(1)).await;
        assert_eq!(cache.get("balance:A"), Some(10));

        advance(Duration::from_millis(1)).await;
        assert_eq!(cache.get("balance:A"), None);
        // Absente logiquement, mais toujours stockée.
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn set_overwrites_and_restarts_ttl() {
        let cache = TtlCache::new();
        cache.set("k", 1u64, CacheKind::EmptyResult);
        advance(Duration::from_secs(10)).await;
        cache.set("k", 2u64, CacheKind::EmptyResult);
        advance(Duration::from_secs(10)).await;
        assert_eq!(cache.get("k"), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn hits_update_access_stats() {
        let cache = TtlCache::new();
        cache.set("k", "v".to_string(), CacheKind::NftMetadata);
        cache.get("k");
        advance(Duration::from_secs(5)).await;
        cache.get("k");
        cache.get("absent");

        let info = cache.entry_info("k").unwrap();
        assert_eq!(info.access_count, 2);
        assert_eq!(info.since_last_access, Duration::ZERO);
        assert_eq!(info.age, Duration::from_secs(5));

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn invalidate_only_touches_matching_keys() {
        let cache = TtlCache::new();
        cache.set("token-balance:wallet=wallet123", 1u64, CacheKind::TokenBalance);
        cache.set("nft-count:wallet=wallet123", 2u64, CacheKind::NftCount);
        cache.set("token-balance:wallet=wallet456", 3u64, CacheKind::TokenBalance);

        assert_eq!(cache.invalidate("wallet123"), 2);
        assert_eq!(cache.get("token-balance:wallet=wallet456"), Some(3));
        assert_eq!(cache.get("token-balance:wallet=wallet123"), None);
        assert_eq!(cache.invalidate("wallet123"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_removes_only_expired_entries() {
        let cache = TtlCache::new();
        cache.set("short", 1u64, CacheKind::EmptyResult);
        cache.set("long", 2u64, CacheKind::NftMetadata);

        advance(CacheKind::EmptyResult.ttl()).await;
        assert_eq!(cache.stats().expired, 1);
        assert_eq!(cache.cleanup(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("long"), Some(2));
    }
}
