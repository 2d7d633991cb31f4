// src/cache/mod.rs

pub mod keys;
pub mod server_cache;
pub mod store;

pub use keys::{cache_key, CacheKind};
pub use server_cache::{ServerCache, SharedFetchError};
pub use store::{CacheStats, TtlCache};

use crate::das::Asset;
use crate::monitoring::metrics;
use crate::tokens::history::SignatureSummary;
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize)]
pub struct NamedStats {
    pub cache: &'static str,
    #[serde(flatten)]
    pub stats: CacheStats,
}

/// Regroupe les caches typés du service. Les services reçoivent un clone de
/// leur cache ; invalidation et nettoyage passent par ici pour tout couvrir.
#[derive(Clone)]
pub struct CacheRegistry {
    pub balances: ServerCache<u64>,
    pub nft_counts: ServerCache<u64>,
    pub nft_metadata: ServerCache<Vec<Asset>>,
    pub transactions: ServerCache<Vec<SignatureSummary>>,
}

impl Default for CacheRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self {
            balances: ServerCache::new("token_balance"),
            nft_counts: ServerCache::new("nft_count"),
            nft_metadata: ServerCache::new("nft_metadata"),
            transactions: ServerCache::new("transaction_history"),
        }
    }

    /// Appelé quand une entité est modifiée (ex. wallet d'une équipe édité dans
    /// l'admin) : la prochaine lecture repartira du réseau.
    pub fn invalidate(&self, pattern: &str) -> usize {
        let removed = self.balances.invalidate(pattern)
            + self.nft_counts.invalidate(pattern)
            + self.nft_metadata.invalidate(pattern)
            + self.transactions.invalidate(pattern);
        metrics::CACHE_INVALIDATED_ENTRIES.inc_by(removed as u64);
        info!("[Cache] Invalidation '{}' : {} entrée(s) supprimée(s).", pattern, removed);
        removed
    }

    pub fn cleanup(&self) -> usize {
        let removed = self.balances.cleanup()
            + self.nft_counts.cleanup()
            + self.nft_metadata.cleanup()
            + self.transactions.cleanup();
        metrics::CACHE_SWEPT_ENTRIES.inc_by(removed as u64);
        removed
    }

    pub fn stats(&self) -> Vec<NamedStats> {
        vec![
            NamedStats { cache: self.balances.name(), stats: self.balances.stats() },
            NamedStats { cache: self.nft_counts.name(), stats: self.nft_counts.stats() },
            NamedStats { cache: self.nft_metadata.name(), stats: self.nft_metadata.stats() },
            NamedStats { cache: self.transactions.name(), stats: self.transactions.stats() },
        ]
    }

    /// Lance le balayage périodique des entrées expirées, indépendant du
    /// trafic. `abort()` sur le handle pour l'arrêter.
    pub fn start_cleanup_task(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            // Le premier tick est immédiat.
            interval.tick().await;
            loop {
                interval.tick().await;
                let removed = self.cleanup();
                if removed > 0 {
                    info!("[Cache] Nettoyage : {} entrée(s) expirée(s) supprimée(s).", removed);
                } else {
                    debug!("[Cache] Nettoyage : rien à supprimer.");
                }
            }
        })
    }
}
