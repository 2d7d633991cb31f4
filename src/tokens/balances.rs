// DANS : src/tokens/balances.rs

use super::account::decode_token_amount;
use super::ata::{parse_address, TokenProgramTable};
use super::TokenAccountSource;
use crate::batch::{BatchLookup, Resolution};
use crate::cache::{cache_key, CacheKind, ServerCache};
use anyhow::Result;
use solana_sdk::pubkey::Pubkey;
use std::{collections::HashMap, sync::Arc};
use tracing::{debug, info};

/// Soldes du jeton CAMP, un wallet ou un lot de wallets.
#[derive(Clone)]
pub struct BalanceService {
    source: Arc<dyn TokenAccountSource>,
    programs: Arc<TokenProgramTable>,
    mint: Pubkey,
    cache: ServerCache<u64>,
    lookup: BatchLookup,
}

impl BalanceService {
    pub fn new(
        source: Arc<dyn TokenAccountSource>,
        programs: Arc<TokenProgramTable>,
        mint: Pubkey,
        cache: ServerCache<u64>,
        lookup: BatchLookup,
    ) -> Self {
        Self { source, programs, mint, cache, lookup }
    }

    pub fn mint(&self) -> &Pubkey {
        &self.mint
    }

    fn key(&self, owner: &Pubkey) -> String {
        cache_key(
            "token-balance",
            &[("wallet", &owner.to_string()), ("mint", &self.mint.to_string())],
        )
    }

    /// Solde d'un wallet, via le cache. Un wallet sans compte de jetons a un
    /// solde de 0 ; une adresse malformée est une erreur.
    pub async fn token_balance(&self, wallet: &str) -> Result<u64> {
        let owner = parse_address("wallet", wallet)?;
        let account = self.programs.derive_account_address(&owner, &self.mint);
        let source = self.source.clone();

        self.cache
            .get_or_fetch(&self.key(&owner), CacheKind::TokenBalance, move || {
                fetch_amount(source, account)
            })
            .await
    }

    /// Soldes d'un lot de wallets. Les entrées fraîches du cache sont servies
    /// directement, le reste passe par le moteur de lots. Chaque wallet a une
    /// entrée dans le résultat ; un échec donne `Unknown(0)`.
    pub async fn token_balances(&self, wallets: &[String]) -> HashMap<String, Resolution<u64>> {
        let mut results = HashMap::with_capacity(wallets.len());
        let mut misses = Vec::new();

        for wallet in wallets {
            if results.contains_key(wallet) {
                continue;
            }
            // Une adresse malformée part au moteur de lots, qui la rend `Unknown`.
            let cached = parse_address("wallet", wallet)
                .ok()
                .and_then(|owner| self.cache.get(&self.key(&owner)));
            match cached {
                Some(amount) => {
                    results.insert(wallet.clone(), Resolution::Resolved(amount));
                }
                None => misses.push(wallet.clone()),
            }
        }

        debug!(
            "[Balances] {} wallet(s) servis par le cache, {} à interroger.",
            results.len(),
            misses.len()
        );
        if misses.is_empty() {
            return results;
        }

        // Le résolveur repasse par la façade : les succès sont mis en cache,
        // une requête déjà en vol pour le même wallet est partagée.
        let fetched = self
            .lookup
            .resolve(&misses, || 0u64, |wallet: String| async move {
                self.token_balance(&wallet).await
            })
            .await;

        let unknown = fetched.values().filter(|r| !r.is_resolved()).count();
        if unknown > 0 {
            info!("[Balances] {} solde(s) inconnu(s) sur {} demandés.", unknown, wallets.len());
        }
        results.extend(fetched);
        results
    }
}

async fn fetch_amount(source: Arc<dyn TokenAccountSource>, account: Pubkey) -> Result<u64> {
    match source.token_account_data(&account).await? {
        Some(data) => decode_token_amount(&data),
        // Le wallet n'a jamais détenu ce jeton.
        None => Ok(0),
    }
}
