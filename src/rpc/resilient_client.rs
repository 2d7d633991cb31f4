use super::retry::{with_retries, RetryPolicy};
use crate::tokens::history::{SignatureSource, SignatureSummary};
use crate::tokens::TokenAccountSource;
use anyhow::{Context, Result};
use async_trait::async_trait;
use solana_client::{
    nonblocking::rpc_client::RpcClient, rpc_client::GetConfirmedSignaturesForAddress2Config,
};
use solana_sdk::{commitment_config::CommitmentConfig, pubkey::Pubkey};
use std::{sync::Arc, time::Duration};

/// Un "wrapper" autour du RpcClient de Solana : chaque appel passe par
/// `with_retries`, qui ne réessaie que les timeouts.
#[derive(Clone)]
pub struct ResilientRpcClient {
    client: Arc<RpcClient>,
    retry: RetryPolicy,
}

impl ResilientRpcClient {
    /// `request_timeout` borne chaque requête HTTP côté client Solana ;
    /// la politique de ré-essai ajoute son propre délai par tentative.
    pub fn new(rpc_url: String, retry: RetryPolicy, request_timeout: Duration) -> Self {
        Self {
            client: Arc::new(RpcClient::new_with_timeout_and_commitment(
                rpc_url,
                request_timeout,
                CommitmentConfig::confirmed(),
            )),
            retry,
        }
    }

    pub fn commitment(&self) -> CommitmentConfig {
        self.client.commitment()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Données brutes d'un compte de jetons. `None` si le compte n'existe pas
    /// (le wallet n'a jamais reçu ce jeton), ce qui n'est pas une erreur.
    pub async fn get_token_account_data(&self, account: &Pubkey) -> Result<Option<Vec<u8>>> {
        let commitment = self.client.commitment();
        with_retries(&self.retry, "getAccountInfo", move || async move {
            let response = self.client.get_account_with_commitment(account, commitment).await?;
            Ok::<_, anyhow::Error>(response.value.map(|found| found.data))
        })
        .await
        .with_context(|| format!("Impossible de lire le compte de jetons {}", account))
    }

    /// Dernières signatures impliquant `address`, de la plus récente à la plus ancienne.
    pub async fn get_signatures_for_address(
        &self,
        address: &Pubkey,
        limit: usize,
    ) -> Result<Vec<SignatureSummary>> {
        let commitment = self.client.commitment();
        let statuses = with_retries(&self.retry, "getSignaturesForAddress", move || async move {
            let config = GetConfirmedSignaturesForAddress2Config {
                before: None,
                until: None,
                limit: Some(limit),
                commitment: Some(commitment),
            };
            let statuses = self.client.get_signatures_for_address_with_config(address, config).await?;
            Ok::<_, anyhow::Error>(statuses)
        })
        .await
        .with_context(|| format!("Impossible de lire l'historique de {}", address))?;

        Ok(statuses
            .into_iter()
            .map(|status| SignatureSummary {
                signature: status.signature,
                slot: status.slot,
                block_time: status.block_time,
                failed: status.err.is_some(),
                memo: status.memo,
            })
            .collect())
    }
}

#[async_trait]
impl TokenAccountSource for ResilientRpcClient {
    async fn token_account_data(&self, account: &Pubkey) -> Result<Option<Vec<u8>>> {
        self.get_token_account_data(account).await
    }
}

#[async_trait]
impl SignatureSource for ResilientRpcClient {
    async fn signatures_for_address(
        &self,
        address: &Pubkey,
        limit: usize,
    ) -> Result<Vec<SignatureSummary>> {
        self.get_signatures_for_address(address, limit).await
    }
}
