// Doublures des sources réseau pour les tests des services et de l'API.

use crate::batch::ProbeError;
use crate::das::{Asset, AssetIndex, AssetPage};
use crate::tokens::ata::TokenProgramTable;
use crate::tokens::history::{SignatureSource, SignatureSummary};
use crate::tokens::TokenAccountSource;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use solana_sdk::pubkey::Pubkey;
use std::{
    collections::{HashMap, HashSet},
    str::FromStr,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

pub const WALLET_A: &str = "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM";
pub const WALLET_B: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";
pub const WALLET_C: &str = "ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL";
pub const CAMP_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

pub fn camp_mint() -> Pubkey {
    Pubkey::from_str(CAMP_MINT).unwrap()
}

/// Compte SPL legacy initialisé (165 octets) portant `amount`.
pub fn token_account_data(amount: u64) -> Vec<u8> {
    let mut data = vec![0u8; 165];
    data[0..32].copy_from_slice(camp_mint().as_ref());
    data[32..64].copy_from_slice(&[2u8; 32]);
    data[64..72].copy_from_slice(&amount.to_le_bytes());
    data[108] = 1;
    data
}

pub fn asset(id: &str, collection: Option<&str>) -> Asset {
    Asset {
        id: id.to_string(),
        name: Some(format!("Badge {}", id)),
        symbol: Some("CAMP".to_string()),
        image: None,
        collection: collection.map(str::to_string),
        compressed: false,
    }
}

fn ata_of(wallet: &str) -> Pubkey {
    let owner = Pubkey::from_str(wallet).unwrap();
    TokenProgramTable::default().derive_account_address(&owner, &camp_mint())
}

#[derive(Default)]
pub struct MockAccounts {
    accounts: Mutex<HashMap<Pubkey, Vec<u8>>>,
    failing: Mutex<HashSet<Pubkey>>,
    requested: Mutex<Vec<Pubkey>>,
    calls: AtomicUsize,
    delay_ms: AtomicU64,
}

impl MockAccounts {
    pub fn set_balance(&self, wallet: &str, amount: u64) {
        let account = ata_of(wallet);
        self.failing.lock().unwrap().remove(&account);
        self.accounts.lock().unwrap().insert(account, token_account_data(amount));
    }

    pub fn fail_for(&self, wallet: &str) {
        self.failing.lock().unwrap().insert(ata_of(wallet));
    }

    /// Latence simulée du RPC, appliquée avant chaque lecture.
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requested(&self) -> Vec<Pubkey> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl TokenAccountSource for MockAccounts {
    async fn token_account_data(&self, account: &Pubkey) -> Result<Option<Vec<u8>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requested.lock().unwrap().push(*account);
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.failing.lock().unwrap().contains(account) {
            return Err(anyhow!("rpc indisponible"));
        }
        Ok(self.accounts.lock().unwrap().get(account).cloned())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeBehavior {
    Capable,
    Unsupported,
    Unreachable,
}

pub struct MockAssetIndex {
    endpoints: Vec<(String, ProbeBehavior)>,
    assets: Mutex<HashMap<String, Vec<Asset>>>,
    failing: Mutex<HashSet<String>>,
    queried: Mutex<Vec<String>>,
    probes: AtomicUsize,
    without_grand_total: AtomicBool,
}

impl MockAssetIndex {
    pub fn new(endpoints: &[(&str, ProbeBehavior)]) -> Self {
        Self {
            endpoints: endpoints.iter().map(|(url, b)| (url.to_string(), *b)).collect(),
            assets: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            queried: Mutex::new(Vec::new()),
            probes: AtomicUsize::new(0),
            without_grand_total: AtomicBool::new(false),
        }
    }

    /// Simule un indexeur qui ignore `showGrandTotal`.
    pub fn hide_grand_total(&self) {
        self.without_grand_total.store(true, Ordering::SeqCst);
    }

    pub fn give(&self, owner: &str, assets: Vec<Asset>) {
        self.assets.lock().unwrap().insert(owner.to_string(), assets);
    }

    pub fn fail_for(&self, owner: &str) {
        self.failing.lock().unwrap().insert(owner.to_string());
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn page_calls(&self) -> usize {
        self.queried.lock().unwrap().len()
    }

    pub fn queried_endpoints(&self) -> Vec<String> {
        self.queried.lock().unwrap().clone()
    }
}

#[async_trait]
impl AssetIndex for MockAssetIndex {
    fn endpoints(&self) -> Vec<String> {
        self.endpoints.iter().map(|(url, _)| url.clone()).collect()
    }

    async fn probe(&self, endpoint: &str) -> Result<(), ProbeError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let behavior = self
            .endpoints
            .iter()
            .find(|(url, _)| url == endpoint)
            .map(|(_, b)| *b)
            .unwrap_or(ProbeBehavior::Unreachable);
        match behavior {
            ProbeBehavior::Capable => Ok(()),
            ProbeBehavior::Unsupported => Err(ProbeError::Unsupported("Method not found".to_string())),
            ProbeBehavior::Unreachable => Err(ProbeError::Unreachable(anyhow!("connexion refusée"))),
        }
    }

    async fn assets_by_owner(&self, endpoint: &str, owner: &str, page: u32, limit: u32) -> Result<AssetPage> {
        self.queried.lock().unwrap().push(endpoint.to_string());
        if self.failing.lock().unwrap().contains(owner) {
            return Err(anyhow!("getAssetsByOwner en erreur pour {}", owner));
        }
        let all = self.assets.lock().unwrap().get(owner).cloned().unwrap_or_default();
        let start = ((page.max(1) - 1) * limit) as usize;
        let items: Vec<Asset> = all.iter().skip(start).take(limit as usize).cloned().collect();
        let grand_total = if self.without_grand_total.load(Ordering::SeqCst) {
            None
        } else {
            Some(all.len() as u64)
        };
        Ok(AssetPage { total: items.len() as u64, grand_total, items })
    }
}

#[derive(Default)]
pub struct MockSignatures {
    history: Mutex<HashMap<Pubkey, Vec<SignatureSummary>>>,
    calls: AtomicUsize,
}

impl MockSignatures {
    /// Ajoute une signature, la plus récente en tête.
    pub fn push(&self, wallet: &str, signature: &str) {
        let address = Pubkey::from_str(wallet).unwrap();
        let mut history = self.history.lock().unwrap();
        let entries = history.entry(address).or_default();
        let slot = 1_000 + entries.len() as u64;
        entries.insert(
            0,
            SignatureSummary {
                signature: signature.to_string(),
                slot,
                block_time: Some(1_700_000_000 + slot as i64),
                failed: false,
                memo: None,
            },
        );
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignatureSource for MockSignatures {
    async fn signatures_for_address(&self, address: &Pubkey, limit: usize) -> Result<Vec<SignatureSummary>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let history = self.history.lock().unwrap();
        Ok(history
            .get(address)
            .map(|entries| entries.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}
