// DANS : src/tokens/nfts.rs

use super::ata::parse_address;
use crate::batch::{probe_endpoints, BatchLookup, ProbeOutcome, Resolution};
use crate::cache::{cache_key, CacheKind, ServerCache};
use crate::das::{Asset, AssetIndex};
use anyhow::{anyhow, Result};
use solana_sdk::pubkey::Pubkey;
use std::{collections::HashMap, sync::Arc};
use tracing::{debug, warn};

const PAGE_LIMIT: u32 = 1000;
// Au-delà, le wallet est anormal pour un dashboard de camp.
const MAX_PAGES: u32 = 10;

/// Comptage et liste des NFTs des wallets, via l'API d'indexation DAS.
#[derive(Clone)]
pub struct NftService {
    index: Arc<dyn AssetIndex>,
    collection: Option<String>,
    counts: ServerCache<u64>,
    metadata: ServerCache<Vec<Asset>>,
    count_lookup: BatchLookup,
    metadata_lookup: BatchLookup,
}

impl NftService {
    pub fn new(
        index: Arc<dyn AssetIndex>,
        collection: Option<String>,
        counts: ServerCache<u64>,
        metadata: ServerCache<Vec<Asset>>,
        count_lookup: BatchLookup,
        metadata_lookup: BatchLookup,
    ) -> Self {
        Self { index, collection, counts, metadata, count_lookup, metadata_lookup }
    }

    fn key(&self, namespace: &str, owner: &Pubkey) -> String {
        let collection = self.collection.as_deref().unwrap_or("*");
        cache_key(namespace, &[("wallet", &owner.to_string()), ("collection", collection)])
    }

    /// Entrée fraîche du cache, pour un wallet qui est bien une adresse.
    fn cached<V: Clone + Send + Sync + 'static>(
        &self,
        cache: &ServerCache<V>,
        namespace: &str,
        wallet: &str,
    ) -> Option<V> {
        let owner = parse_address("wallet", wallet).ok()?;
        cache.get(&self.key(namespace, &owner))
    }

    /// Nombre de NFTs par wallet. Les endpoints sont sondés une fois pour tout
    /// le lot. Aucun endpoint capable → `Unknown(0)` partout ; aucun endpoint
    /// joignable → erreur.
    pub async fn nft_counts(&self, wallets: &[String]) -> Result<HashMap<String, Resolution<u64>>> {
        let (mut results, misses) = split_hits(wallets, |w| self.cached(&self.counts, "nft-count", w));
        if misses.is_empty() {
            return Ok(results);
        }

        let endpoints = self.index.endpoints();
        let fetched = self
            .count_lookup
            .resolve_with_probe(
                &endpoints,
                |endpoint: String| async move { self.index.probe(&endpoint).await },
                &misses,
                || 0u64,
                |endpoint: String, wallet: String| async move { self.count_on(endpoint, &wallet).await },
            )
            .await?;

        results.extend(fetched);
        Ok(results)
    }

    async fn count_on(&self, endpoint: String, wallet: &str) -> Result<u64> {
        let address = parse_address("wallet", wallet)?;
        let index = self.index.clone();
        let owner = address.to_string();
        let collection = self.collection.clone();

        self.counts
            .get_or_fetch(&self.key("nft-count", &address), CacheKind::NftCount, move || async move {
                if collection.is_some() {
                    let assets = fetch_assets(index, endpoint, owner, collection).await?;
                    return Ok::<_, anyhow::Error>(assets.len() as u64);
                }
                // Sans filtre, le `grand_total` d'une page de 1 suffit ; sinon on pagine.
                let page = index.assets_by_owner(&endpoint, &owner, 1, 1).await?;
                match page.grand_total {
                    Some(total) => Ok(total),
                    None => {
                        debug!("[Nfts] Pas de grand_total pour {}, pagination complète.", owner);
                        let assets = fetch_assets(index, endpoint, owner, None).await?;
                        Ok(assets.len() as u64)
                    }
                }
            })
            .await
    }

    /// Liste complète des NFTs d'un wallet, gardée longtemps en cache.
    pub async fn nft_metadata(&self, wallet: &str) -> Result<Vec<Asset>> {
        let address = parse_address("wallet", wallet)?;
        let key = self.key("nft-metadata", &address);
        let index = self.index.clone();
        let owner = address.to_string();
        let collection = self.collection.clone();

        self.metadata
            .get_or_fetch_classified(&key, classify_assets, move || async move {
                let endpoints = index.endpoints();
                let endpoint = match probe_endpoints(&endpoints, |e: String| {
                    let index = index.clone();
                    async move { index.probe(&e).await }
                })
                .await
                {
                    ProbeOutcome::Capable(i) => endpoints[i].clone(),
                    ProbeOutcome::Unsupported => {
                        return Err(anyhow!("Aucun endpoint ne supporte getAssetsByOwner"));
                    }
                    ProbeOutcome::Unreachable(e) => return Err(e),
                };
                fetch_assets(index, endpoint, owner, collection).await
            })
            .await
    }

    /// Variante par lots de `nft_metadata`, avec des chunks plus petits.
    pub async fn nft_metadata_batch(
        &self,
        wallets: &[String],
    ) -> Result<HashMap<String, Resolution<Vec<Asset>>>> {
        let (mut results, misses) =
            split_hits(wallets, |w| self.cached(&self.metadata, "nft-metadata", w));
        if misses.is_empty() {
            return Ok(results);
        }

        let endpoints = self.index.endpoints();
        let fetched = self
            .metadata_lookup
            .resolve_with_probe(
                &endpoints,
                |endpoint: String| async move { self.index.probe(&endpoint).await },
                &misses,
                Vec::new,
                |endpoint: String, wallet: String| async move { self.metadata_on(endpoint, &wallet).await },
            )
            .await?;

        results.extend(fetched);
        Ok(results)
    }

    async fn metadata_on(&self, endpoint: String, wallet: &str) -> Result<Vec<Asset>> {
        let address = parse_address("wallet", wallet)?;
        let index = self.index.clone();
        let owner = address.to_string();
        let collection = self.collection.clone();

        self.metadata
            .get_or_fetch_classified(&self.key("nft-metadata", &address), classify_assets, move || {
                fetch_assets(index, endpoint, owner, collection)
            })
            .await
    }
}

#[allow(clippy::ptr_arg)]
fn classify_assets(assets: &Vec<Asset>) -> CacheKind {
    if assets.is_empty() {
        CacheKind::EmptyResult
    } else {
        CacheKind::NftMetadata
    }
}

/// Sépare les wallets déjà en cache (`Resolved`) de ceux à interroger, sans doublons.
fn split_hits<V>(
    wallets: &[String],
    cached: impl Fn(&str) -> Option<V>,
) -> (HashMap<String, Resolution<V>>, Vec<String>) {
    let mut hits = HashMap::new();
    let mut misses: Vec<String> = Vec::new();
    for wallet in wallets {
        if hits.contains_key(wallet) || misses.contains(wallet) {
            continue;
        }
        match cached(wallet) {
            Some(value) => {
                hits.insert(wallet.clone(), Resolution::Resolved(value));
            }
            None => misses.push(wallet.clone()),
        }
    }
    debug!("[Nfts] {} wallet(s) en cache, {} à interroger.", hits.len(), misses.len());
    (hits, misses)
}

async fn fetch_assets(
    index: Arc<dyn AssetIndex>,
    endpoint: String,
    owner: String,
    collection: Option<String>,
) -> Result<Vec<Asset>> {
    let mut assets = Vec::new();
    for page in 1..=MAX_PAGES {
        let batch = index.assets_by_owner(&endpoint, &owner, page, PAGE_LIMIT).await?;
        let full_page = batch.items.len() as u32 >= PAGE_LIMIT;
        assets.extend(
            batch
                .items
                .into_iter()
                .filter(|asset| collection.is_none() || asset.collection == collection),
        );
        if !full_page {
            return Ok(assets);
        }
    }
    warn!("[Nfts] {} possède plus de {} pages d'assets, liste tronquée.", owner, MAX_PAGES);
    Ok(assets)
}
