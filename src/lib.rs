// src/lib.rs

// Cœur du dashboard : cache serveur, coordination des requêtes en lot
// et accès aux données on-chain (soldes, NFTs, historique).
pub mod api;
pub mod batch;
pub mod cache;
pub mod config;
pub mod das;
pub mod monitoring;
pub mod rpc;
pub mod tokens;

#[cfg(test)]
pub(crate) mod test_support;
