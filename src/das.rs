// src/das.rs

use crate::batch::ProbeError;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

// Codes JSON-RPC qui signifient "l'endpoint ne sait pas faire ça".
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;

/// NFT simplifié, tel que renvoyé au dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub image: Option<String>,
    pub collection: Option<String>,
    pub compressed: bool,
}

/// Une page de `getAssetsByOwner`. `total` compte les éléments de CETTE page ;
/// le total du wallet est `grand_total`, quand l'indexeur le fournit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetPage {
    pub total: u64,
    pub grand_total: Option<u64>,
    pub items: Vec<Asset>,
}

// --- Structures de la réponse getAssetsByOwner ---

#[derive(Debug, Deserialize)]
struct RpcEnvelope<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RawAssetPage {
    #[serde(default)]
    total: u64,
    #[serde(default, alias = "grandTotal")]
    grand_total: Option<u64>,
    #[serde(default)]
    items: Vec<RawAsset>,
}

#[derive(Debug, Deserialize)]
struct RawAsset {
    id: String,
    #[serde(default)]
    content: Option<RawContent>,
    #[serde(default)]
    grouping: Vec<RawGroup>,
    #[serde(default)]
    compression: Option<RawCompression>,
}

#[derive(Debug, Deserialize)]
struct RawContent {
    #[serde(default)]
    metadata: Option<RawMetadata>,
    #[serde(default)]
    links: Option<RawLinks>,
}

#[derive(Debug, Deserialize)]
struct RawMetadata {
    name: Option<String>,
    symbol: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawLinks {
    image: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawGroup {
    group_key: String,
    group_value: String,
}

#[derive(Debug, Deserialize)]
struct RawCompression {
    #[serde(default)]
    compressed: bool,
}

impl From<RawAsset> for Asset {
    fn from(raw: RawAsset) -> Self {
        let (name, symbol, image) = match raw.content {
            Some(content) => {
                let (name, symbol) = content
                    .metadata
                    .map(|m| (m.name, m.symbol))
                    .unwrap_or((None, None));
                (name, symbol, content.links.and_then(|l| l.image))
            }
            None => (None, None, None),
        };
        let collection = raw
            .grouping
            .into_iter()
            .find(|g| g.group_key == "collection")
            .map(|g| g.group_value);
        Asset {
            id: raw.id,
            name,
            symbol,
            image,
            collection,
            compressed: raw.compression.is_some_and(|c| c.compressed),
        }
    }
}

impl From<RawAssetPage> for AssetPage {
    fn from(raw: RawAssetPage) -> Self {
        AssetPage {
            total: raw.total,
            grand_total: raw.grand_total,
            items: raw.items.into_iter().map(Asset::from).collect(),
        }
    }
}

/// API d'indexation "qui possède quels NFTs", interrogeable sur plusieurs endpoints.
#[async_trait]
pub trait AssetIndex: Send + Sync {
    /// Endpoints candidats, par ordre de priorité.
    fn endpoints(&self) -> Vec<String>;

    /// Requête légère pour savoir si `endpoint` supporte l'API.
    async fn probe(&self, endpoint: &str) -> Result<(), ProbeError>;

    async fn assets_by_owner(
        &self,
        endpoint: &str,
        owner: &str,
        page: u32,
        limit: u32,
    ) -> Result<AssetPage>;
}

#[derive(Clone)]
pub struct DasClient {
    http: reqwest::Client,
    endpoints: Vec<String>,
    probe_owner: String,
}

enum CallError {
    Transport(anyhow::Error),
    Rpc { code: i64, message: String },
}

impl DasClient {
    pub fn new(endpoints: Vec<String>, probe_owner: String, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Impossible de construire le client HTTP DAS")?;
        Ok(Self { http, endpoints, probe_owner })
    }

    async fn get_assets_by_owner(
        &self,
        endpoint: &str,
        owner: &str,
        page: u32,
        limit: u32,
    ) -> Result<RawAssetPage, CallError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": "camp-dashboard",
            "method": "getAssetsByOwner",
            "params": {
                "ownerAddress": owner,
                "page": page,
                "limit": limit,
                "displayOptions": { "showGrandTotal": true },
            },
        });

        let response = self
            .http
            .post(endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| CallError::Transport(e.into()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::METHOD_NOT_ALLOWED {
            // L'endpoint existe mais n'expose pas cette API.
            return Err(CallError::Rpc { code: METHOD_NOT_FOUND, message: format!("HTTP {}", status) });
        }
        if !status.is_success() {
            // 429, 401/403, 5xx : l'endpoint sait peut-être répondre, mais pas maintenant.
            return Err(CallError::Transport(anyhow!("Erreur HTTP {} de {}", status, endpoint)));
        }

        let envelope: RpcEnvelope<RawAssetPage> = response
            .json()
            .await
            .map_err(|e| CallError::Transport(anyhow!(e).context("Réponse DAS illisible")))?;

        match (envelope.result, envelope.error) {
            (Some(page), _) => Ok(page),
            (None, Some(err)) => Err(CallError::Rpc { code: err.code, message: err.message }),
            (None, None) => Err(CallError::Transport(anyhow!("Réponse DAS vide de {}", endpoint))),
        }
    }
}

#[async_trait]
impl AssetIndex for DasClient {
    fn endpoints(&self) -> Vec<String> {
        self.endpoints.clone()
    }

    async fn probe(&self, endpoint: &str) -> Result<(), ProbeError> {
        match self.get_assets_by_owner(endpoint, &self.probe_owner, 1, 1).await {
            Ok(_) => Ok(()),
            Err(CallError::Rpc { code, message }) if code == METHOD_NOT_FOUND || code == INVALID_PARAMS => {
                Err(ProbeError::Unsupported(format!("{} ({})", message, code)))
            }
            // Limite de débit, erreur interne... : la méthode existe, l'endpoint est indisponible.
            Err(CallError::Rpc { code, message }) => {
                Err(ProbeError::Unreachable(anyhow!("erreur RPC {} de {} : {}", code, endpoint, message)))
            }
            Err(CallError::Transport(e)) => Err(ProbeError::Unreachable(e)),
        }
    }

    async fn assets_by_owner(
        &self,
        endpoint: &str,
        owner: &str,
        page: u32,
        limit: u32,
    ) -> Result<AssetPage> {
        match self.get_assets_by_owner(endpoint, owner, page, limit).await {
            Ok(raw) => Ok(raw.into()),
            Err(CallError::Rpc { code, message }) => {
                Err(anyhow!("getAssetsByOwner({}) a échoué : {} ({})", owner, message, code))
            }
            Err(CallError::Transport(e)) => Err(e.context(format!("getAssetsByOwner({})", owner))),
        }
    }
}
