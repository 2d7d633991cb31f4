use crate::batch::BatchProfile;
use crate::rpc::RetryPolicy;
use crate::tokens::ata::{parse_address, TokenProgramTable};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use solana_sdk::pubkey::Pubkey;
use std::time::Duration;

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    pub solana_rpc_url: String,
    /// Endpoints DAS par ordre de priorité (séparés par des virgules).
    /// Vide = on retombe sur `solana_rpc_url`.
    #[serde(default)]
    pub das_rpc_urls: Vec<String>,
    pub camp_token_mint: String,
    /// Mints migrés vers Token-2022. Tous les autres utilisent le programme legacy.
    #[serde(default)]
    pub token_2022_mints: Vec<String>,
    /// Si défini, seuls les NFTs de cette collection sont comptés.
    #[serde(default)]
    pub nft_collection: Option<String>,
    #[serde(default = "default_probe_owner")]
    pub das_probe_owner: String,

    #[serde(default = "default_max_retries")]
    pub rpc_max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub rpc_retry_delay_ms: u64,
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
    /// Délai HTTP d'une requête à l'API DAS.
    #[serde(default = "default_das_timeout_ms")]
    pub das_timeout_ms: u64,

    #[serde(default = "default_balance_chunk_size")]
    pub balance_chunk_size: usize,
    #[serde(default = "default_nft_count_chunk_size")]
    pub nft_count_chunk_size: usize,
    #[serde(default = "default_nft_metadata_chunk_size")]
    pub nft_metadata_chunk_size: usize,
    #[serde(default = "default_chunk_delay_ms")]
    pub batch_chunk_delay_ms: u64,

    #[serde(default = "default_cleanup_interval_secs")]
    pub cache_cleanup_interval_secs: u64,
    #[serde(default = "default_api_port")]
    pub api_port: u16,
}

// Le System Program : une adresse valide qui ne possède aucun NFT.
fn default_probe_owner() -> String {
    "11111111111111111111111111111111".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    500
}
// 3 tentatives de 2 s + 0,5 s + 1 s d'attente tiennent dans les 8 s d'un solde.
fn default_rpc_timeout_ms() -> u64 {
    2_000
}
fn default_das_timeout_ms() -> u64 {
    4_000
}
fn default_balance_chunk_size() -> usize {
    BatchProfile::TOKEN_BALANCE.chunk_size
}
fn default_nft_count_chunk_size() -> usize {
    BatchProfile::NFT_COUNT.chunk_size
}
fn default_nft_metadata_chunk_size() -> usize {
    BatchProfile::NFT_METADATA.chunk_size
}
fn default_chunk_delay_ms() -> u64 {
    BatchProfile::TOKEN_BALANCE.chunk_delay.as_millis() as u64
}
fn default_cleanup_interval_secs() -> u64 {
    300
}
fn default_api_port() -> u16 {
    8080
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let config = envy::from_env::<Config>()
            .context("Configuration invalide (variables d'environnement)")?;
        config.validate()?;
        Ok(config)
    }

    /// Un appel RPC doit pouvoir aller au bout de ses ré-essais avant que le
    /// moteur de lots n'abandonne l'entité, sinon chaque ralentissement se
    /// termine en repli au lieu d'être réessayé.
    pub fn validate(&self) -> Result<()> {
        let balance_limit = self.balance_profile().item_timeout;
        if let Some(worst) = self.retry_policy().worst_case() {
            if worst > balance_limit {
                bail!(
                    "RPC_TIMEOUT_MS={} avec {} tentative(s) peut durer {:?}, au-delà des {:?} accordés à un solde",
                    self.rpc_timeout_ms,
                    self.rpc_max_retries,
                    worst,
                    balance_limit
                );
            }
        }

        let count_limit = self.nft_count_profile().item_timeout;
        if self.das_timeout() > count_limit {
            bail!(
                "DAS_TIMEOUT_MS={} dépasse les {:?} accordés à un comptage de NFTs",
                self.das_timeout_ms,
                count_limit
            );
        }
        Ok(())
    }

    pub fn camp_mint(&self) -> Result<Pubkey> {
        parse_address("camp_token_mint", &self.camp_token_mint)
            .context("CAMP_TOKEN_MINT n'est pas une adresse valide")
    }

    pub fn token_programs(&self) -> Result<TokenProgramTable> {
        TokenProgramTable::with_token_2022_mints(self.token_2022_mints.as_slice())
            .context("TOKEN_2022_MINTS contient une adresse invalide")
    }

    pub fn das_endpoints(&self) -> Vec<String> {
        let endpoints: Vec<String> = self
            .das_rpc_urls
            .iter()
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .collect();
        if endpoints.is_empty() {
            vec![self.solana_rpc_url.clone()]
        } else {
            endpoints
        }
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn das_timeout(&self) -> Duration {
        Duration::from_millis(self.das_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.rpc_max_retries, Duration::from_millis(self.rpc_retry_delay_ms))
            .with_attempt_timeout(self.rpc_timeout())
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cache_cleanup_interval_secs)
    }

    pub fn balance_profile(&self) -> BatchProfile {
        BatchProfile {
            chunk_size: self.balance_chunk_size,
            chunk_delay: Duration::from_millis(self.batch_chunk_delay_ms),
            ..BatchProfile::TOKEN_BALANCE
        }
    }

    pub fn nft_count_profile(&self) -> BatchProfile {
        BatchProfile {
            chunk_size: self.nft_count_chunk_size,
            chunk_delay: Duration::from_millis(self.batch_chunk_delay_ms),
            ..BatchProfile::NFT_COUNT
        }
    }

    pub fn nft_metadata_profile(&self) -> BatchProfile {
        BatchProfile {
            chunk_size: self.nft_metadata_chunk_size,
            chunk_delay: Duration::from_millis(self.batch_chunk_delay_ms),
            ..BatchProfile::NFT_METADATA
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        config_with(&[])
    }

    fn config_with(extra: &[(&str, &str)]) -> Config {
        let mut vars = vec![
            ("SOLANA_RPC_URL".to_string(), "http://localhost:8899".to_string()),
            (
                "CAMP_TOKEN_MINT".to_string(),
                "So11111111111111111111111111111111111111112".to_string(),
            ),
        ];
        vars.extend(extra.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        envy::from_iter::<_, Config>(vars).unwrap()
    }

    #[test]
    fn defaults_are_applied() {
        let config = base_config();
        assert_eq!(config.rpc_max_retries, 3);
        assert_eq!(config.cache_cleanup_interval_secs, 300);
        assert_eq!(config.balance_profile().chunk_size, BatchProfile::TOKEN_BALANCE.chunk_size);
        assert!(config.nft_collection.is_none());
        assert!(config.camp_mint().is_ok());
    }

    #[test]
    fn das_endpoints_fall_back_to_main_rpc() {
        let config = base_config();
        assert_eq!(config.das_endpoints(), vec!["http://localhost:8899".to_string()]);
    }

    #[test]
    fn das_endpoints_are_parsed_in_order() {
        let config = envy::from_iter::<_, Config>(vec![
            ("SOLANA_RPC_URL".to_string(), "http://localhost:8899".to_string()),
            ("CAMP_TOKEN_MINT".to_string(), "So11111111111111111111111111111111111111112".to_string()),
            ("DAS_RPC_URLS".to_string(), "https://a.example,https://b.example".to_string()),
        ])
        .unwrap();
        assert_eq!(
            config.das_endpoints(),
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
    }

    #[test]
    fn default_timeouts_fit_the_batch_budgets() {
        let config = base_config();
        assert!(config.validate().is_ok());
        let worst = config.retry_policy().worst_case().unwrap();
        assert!(worst <= BatchProfile::TOKEN_BALANCE.item_timeout);
        assert!(config.das_timeout() <= BatchProfile::NFT_COUNT.item_timeout);
    }

    #[test]
    fn rpc_timeout_longer_than_a_balance_is_rejected() {
        let config = config_with(&[("RPC_TIMEOUT_MS", "10000")]);
        let error = config.validate().unwrap_err();
        assert!(error.to_string().contains("RPC_TIMEOUT_MS=10000"));

        // Moins de tentatives : le même délai passe.
        let single = config_with(&[("RPC_TIMEOUT_MS", "7000"), ("RPC_MAX_RETRIES", "1")]);
        assert!(single.validate().is_ok());
    }

    #[test]
    fn das_timeout_longer_than_a_count_is_rejected() {
        let config = config_with(&[("DAS_TIMEOUT_MS", "6000")]);
        assert!(config.validate().is_err());
    }
}
