// src/tokens/history.rs

use super::ata::parse_address;
use crate::cache::{cache_key, CacheKind, ServerCache};
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;
use tracing::debug;

/// Une signature de l'historique d'un wallet, réduite à ce que le dashboard affiche.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignatureSummary {
    pub signature: String,
    pub slot: u64,
    pub block_time: Option<i64>,
    pub failed: bool,
    pub memo: Option<String>,
}

#[async_trait]
pub trait SignatureSource: Send + Sync {
    async fn signatures_for_address(&self, address: &Pubkey, limit: usize) -> Result<Vec<SignatureSummary>>;
}

#[derive(Clone)]
pub struct HistoryService {
    source: Arc<dyn SignatureSource>,
    cache: ServerCache<Vec<SignatureSummary>>,
}

impl HistoryService {
    pub fn new(source: Arc<dyn SignatureSource>, cache: ServerCache<Vec<SignatureSummary>>) -> Self {
        Self { source, cache }
    }

    /// Dernières signatures du wallet. Un historique vide est gardé moins
    /// longtemps : la transaction peut ne pas être encore indexée.
    pub async fn transaction_history(&self, wallet: &str, limit: usize) -> Result<Vec<SignatureSummary>> {
        let address = parse_address("wallet", wallet)?;
        let key = cache_key(
            "tx-history",
            &[("wallet", &address.to_string()), ("limit", &limit.to_string())],
        );
        let source = self.source.clone();

        self.cache
            .get_or_fetch_classified(
                &key,
                |history: &Vec<SignatureSummary>| {
                    if history.is_empty() {
                        CacheKind::TransactionHistoryEmpty
                    } else {
                        CacheKind::TransactionHistory
                    }
                },
                move || async move {
                    let history = source.signatures_for_address(&address, limit).await?;
                    debug!("[History] {} signature(s) pour {}.", history.len(), address);
                    Ok::<_, anyhow::Error>(history)
                },
            )
            .await
    }
}
