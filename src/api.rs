// src/api.rs

use crate::batch::{BatchLookup, Resolution};
use crate::cache::CacheRegistry;
use crate::config::Config;
use crate::das::{Asset, DasClient};
use crate::monitoring::metrics;
use crate::rpc::ResilientRpcClient;
use crate::tokens::ata::DeriveError;
use crate::tokens::{BalanceService, HistoryService, NftService};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{collections::HashMap, convert::Infallible, sync::Arc};
use tracing::{error, info, warn};
use warp::{
    http::StatusCode,
    reply::{self, Response},
    Filter, Rejection, Reply,
};

const MAX_BODY_BYTES: u64 = 64 * 1024;
const MAX_BATCH_WALLETS: usize = 500;
const DEFAULT_HISTORY_LIMIT: usize = 20;
// Limite imposée par getSignaturesForAddress.
const MAX_HISTORY_LIMIT: usize = 1000;

/// Tout ce dont les routes ont besoin, cloné dans chaque requête.
#[derive(Clone)]
pub struct AppState {
    pub balances: BalanceService,
    pub nfts: NftService,
    pub history: HistoryService,
    pub caches: Arc<CacheRegistry>,
}

impl AppState {
    pub fn new(
        balances: BalanceService,
        nfts: NftService,
        history: HistoryService,
        caches: Arc<CacheRegistry>,
    ) -> Self {
        Self { balances, nfts, history, caches }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let caches = Arc::new(CacheRegistry::new());
        let rpc = Arc::new(ResilientRpcClient::new(
            config.solana_rpc_url.clone(),
            config.retry_policy(),
            config.rpc_timeout(),
        ));
        let das = Arc::new(DasClient::new(
            config.das_endpoints(),
            config.das_probe_owner.clone(),
            config.das_timeout(),
        )?);

        let balances = BalanceService::new(
            rpc.clone(),
            Arc::new(config.token_programs()?),
            config.camp_mint()?,
            caches.balances.clone(),
            BatchLookup::new("token_balance", config.balance_profile()),
        );
        let nfts = NftService::new(
            das,
            config.nft_collection.clone(),
            caches.nft_counts.clone(),
            caches.nft_metadata.clone(),
            BatchLookup::new("nft_count", config.nft_count_profile()),
            BatchLookup::new("nft_metadata", config.nft_metadata_profile()),
        );
        let history = HistoryService::new(rpc, caches.transactions.clone());

        info!(
            "[API] Services prêts (RPC : {}, {} endpoint(s) DAS).",
            config.solana_rpc_url,
            config.das_endpoints().len()
        );
        Ok(Self::new(balances, nfts, history, caches))
    }
}

#[derive(Debug, Deserialize)]
struct WalletsRequest {
    wallets: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct InvalidateRequest {
    pattern: String,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

/// Rendu d'une valeur résolue ou de repli : le dashboard affiche `amount`
/// dans les deux cas, `resolved` lui permet de signaler la valeur douteuse.
#[derive(Debug, Serialize)]
struct AmountView {
    amount: u64,
    resolved: bool,
}

impl From<Resolution<u64>> for AmountView {
    fn from(resolution: Resolution<u64>) -> Self {
        let resolved = resolution.is_resolved();
        AmountView { amount: resolution.into_value(), resolved }
    }
}

fn to_views(results: HashMap<String, Resolution<u64>>) -> HashMap<String, AmountView> {
    results.into_iter().map(|(wallet, r)| (wallet, r.into())).collect()
}

#[derive(Debug, Serialize)]
struct AssetsView {
    assets: Vec<Asset>,
    resolved: bool,
}

impl From<Resolution<Vec<Asset>>> for AssetsView {
    fn from(resolution: Resolution<Vec<Asset>>) -> Self {
        let resolved = resolution.is_resolved();
        AssetsView { assets: resolution.into_value(), resolved }
    }
}

fn with_state(state: AppState) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

fn json_body<T>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone
where
    T: for<'de> Deserialize<'de> + Send,
{
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

pub fn routes(state: AppState) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let token_balance = warp::path!("api" / "token-balance" / String)
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handle_token_balance);

    let token_balances = warp::path!("api" / "token-balances")
        .and(warp::post())
        .and(json_body::<WalletsRequest>())
        .and(with_state(state.clone()))
        .and_then(handle_token_balances);

    let nft_counts = warp::path!("api" / "nft-count" / "batch")
        .and(warp::post())
        .and(json_body::<WalletsRequest>())
        .and(with_state(state.clone()))
        .and_then(handle_nft_counts);

    let nfts_batch = warp::path!("api" / "nfts" / "batch")
        .and(warp::post())
        .and(json_body::<WalletsRequest>())
        .and(with_state(state.clone()))
        .and_then(handle_nfts_batch);

    let nfts = warp::path!("api" / "nfts" / String)
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handle_nfts);

    let transactions = warp::path!("api" / "transactions" / String)
        .and(warp::get())
        .and(warp::query::<HistoryQuery>())
        .and(with_state(state.clone()))
        .and_then(handle_transactions);

    let invalidate = warp::path!("api" / "cache" / "invalidate")
        .and(warp::post())
        .and(json_body::<InvalidateRequest>())
        .and(with_state(state.clone()))
        .and_then(handle_invalidate);

    let stats = warp::path!("api" / "cache" / "stats")
        .and(warp::get())
        .and(with_state(state))
        .and_then(handle_cache_stats);

    let metrics_route = warp::path!("metrics").and(warp::get()).and_then(handle_metrics);

    token_balance
        .or(token_balances)
        .or(nft_counts)
        .or(nfts_batch)
        .or(nfts)
        .or(transactions)
        .or(invalidate)
        .or(stats)
        .or(metrics_route)
        .recover(handle_rejection)
        .with(warp::trace::request())
}

pub async fn serve(state: AppState, port: u16) {
    info!("[API] Serveur HTTP démarré sur le port {}.", port);
    warp::serve(routes(state)).run(([0, 0, 0, 0], port)).await;
}

fn error_reply(status: StatusCode, message: impl Into<String>) -> Response {
    reply::with_status(reply::json(&json!({ "error": message.into() })), status).into_response()
}

/// Adresse malformée → 400, tout le reste vient du réseau → 502.
fn failure_reply(context: &str, e: anyhow::Error) -> Response {
    if let Some(invalid) = e.chain().find_map(|cause| cause.downcast_ref::<DeriveError>()) {
        return error_reply(StatusCode::BAD_REQUEST, invalid.to_string());
    }
    error!("[API] {} : {:#}", context, e);
    error_reply(StatusCode::BAD_GATEWAY, format!("{} : {}", context, e))
}

fn check_batch(request: &WalletsRequest) -> Option<Response> {
    if request.wallets.len() > MAX_BATCH_WALLETS {
        warn!("[API] Lot refusé : {} wallets.", request.wallets.len());
        return Some(error_reply(
            StatusCode::BAD_REQUEST,
            format!("au plus {} wallets par requête", MAX_BATCH_WALLETS),
        ));
    }
    None
}

async fn handle_token_balance(wallet: String, state: AppState) -> Result<Response, Rejection> {
    Ok(match state.balances.token_balance(&wallet).await {
        Ok(amount) => {
            reply::json(&json!({ "wallet": wallet, "amount": amount, "resolved": true })).into_response()
        }
        Err(e) => failure_reply("Lecture du solde impossible", e),
    })
}

async fn handle_token_balances(request: WalletsRequest, state: AppState) -> Result<Response, Rejection> {
    if let Some(rejected) = check_batch(&request) {
        return Ok(rejected);
    }
    let balances = state.balances.token_balances(&request.wallets).await;
    Ok(reply::json(&json!({ "balances": to_views(balances) })).into_response())
}

async fn handle_nft_counts(request: WalletsRequest, state: AppState) -> Result<Response, Rejection> {
    if let Some(rejected) = check_batch(&request) {
        return Ok(rejected);
    }
    Ok(match state.nfts.nft_counts(&request.wallets).await {
        Ok(counts) => reply::json(&json!({ "counts": to_views(counts) })).into_response(),
        Err(e) => failure_reply("Comptage des NFTs impossible", e),
    })
}

async fn handle_nfts(wallet: String, state: AppState) -> Result<Response, Rejection> {
    Ok(match state.nfts.nft_metadata(&wallet).await {
        Ok(assets) => reply::json(&assets).into_response(),
        Err(e) => failure_reply("Lecture des NFTs impossible", e),
    })
}

async fn handle_nfts_batch(request: WalletsRequest, state: AppState) -> Result<Response, Rejection> {
    if let Some(rejected) = check_batch(&request) {
        return Ok(rejected);
    }
    Ok(match state.nfts.nft_metadata_batch(&request.wallets).await {
        Ok(lists) => {
            let views: HashMap<String, AssetsView> =
                lists.into_iter().map(|(wallet, r)| (wallet, r.into())).collect();
            reply::json(&json!({ "nfts": views })).into_response()
        }
        Err(e) => failure_reply("Lecture des NFTs impossible", e),
    })
}

async fn handle_transactions(
    wallet: String,
    query: HistoryQuery,
    state: AppState,
) -> Result<Response, Rejection> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, MAX_HISTORY_LIMIT);
    Ok(match state.history.transaction_history(&wallet, limit).await {
        Ok(history) => reply::json(&history).into_response(),
        Err(e) => failure_reply("Lecture de l'historique impossible", e),
    })
}

async fn handle_invalidate(request: InvalidateRequest, state: AppState) -> Result<Response, Rejection> {
    let pattern = request.pattern.trim();
    // Un motif vide correspondrait à toutes les clés.
    if pattern.is_empty() {
        return Ok(error_reply(StatusCode::BAD_REQUEST, "motif d'invalidation vide"));
    }
    let removed = state.caches.invalidate(pattern);
    Ok(reply::json(&json!({ "pattern": pattern, "removed": removed })).into_response())
}

async fn handle_cache_stats(state: AppState) -> Result<Response, Rejection> {
    Ok(reply::json(&json!({ "caches": state.caches.stats() })).into_response())
}

async fn handle_metrics() -> Result<Response, Rejection> {
    Ok(match metrics::gather_text() {
        Ok(body) => {
            reply::with_header(body, "content-type", "text/plain; version=0.0.4").into_response()
        }
        Err(e) => {
            error!("[API] Export des métriques impossible : {:#}", e);
            error_reply(StatusCode::INTERNAL_SERVER_ERROR, "export des métriques impossible")
        }
    })
}

async fn handle_rejection(rejection: Rejection) -> Result<Response, Infallible> {
    let (status, message) = if rejection.is_not_found() {
        (StatusCode::NOT_FOUND, "route inconnue".to_string())
    } else if let Some(e) = rejection.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, format!("corps JSON invalide : {}", e))
    } else if rejection.find::<warp::reject::InvalidQuery>().is_some() {
        (StatusCode::BAD_REQUEST, "paramètres de requête invalides".to_string())
    } else if rejection.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "corps de requête trop volumineux".to_string())
    } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "méthode non autorisée".to_string())
    } else {
        warn!("[API] Rejet non géré : {:?}", rejection);
        (StatusCode::INTERNAL_SERVER_ERROR, "erreur interne".to_string())
    };
    Ok(error_reply(status, message))
}
