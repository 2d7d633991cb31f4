// src/tokens/mod.rs

pub mod account;
pub mod ata;
pub mod balances;
pub mod history;
pub mod nfts;

use anyhow::Result;
use async_trait::async_trait;
use solana_sdk::pubkey::Pubkey;

pub use balances::BalanceService;
pub use history::HistoryService;
pub use nfts::NftService;

/// Lecture des comptes de jetons. `None` = compte inexistant.
#[async_trait]
pub trait TokenAccountSource: Send + Sync {
    async fn token_account_data(&self, account: &Pubkey) -> Result<Option<Vec<u8>>>;
}
