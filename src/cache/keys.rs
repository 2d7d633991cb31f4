use anyhow::{anyhow, Result};
use serde::Serialize;
use std::{fmt, str::FromStr, time::Duration};

/// Nature d'une donnée mise en cache. Chaque variante fixe sa durée de vie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CacheKind {
    TokenBalance,
    NftCount,
    NftMetadata,
    TransactionHistory,
    /// Historique vide : la transaction n'est peut-être pas encore indexée.
    TransactionHistoryEmpty,
    EmptyResult,
}

impl CacheKind {
    pub const ALL: [CacheKind; 6] = [
        CacheKind::TokenBalance,
        CacheKind::NftCount,
        CacheKind::NftMetadata,
        CacheKind::TransactionHistory,
        CacheKind::TransactionHistoryEmpty,
        CacheKind::EmptyResult,
    ];

    pub const fn ttl(self) -> Duration {
        match self {
            CacheKind::TokenBalance => Duration::from_secs(120),
            CacheKind::NftCount => Duration::from_secs(300),
            CacheKind::NftMetadata => Duration::from_secs(30 * 60),
            CacheKind::TransactionHistory => Duration::from_secs(120),
            CacheKind::TransactionHistoryEmpty => Duration::from_secs(30),
            CacheKind::EmptyResult => Duration::from_secs(15),
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            CacheKind::TokenBalance => "TOKEN_BALANCE",
            CacheKind::NftCount => "NFT_COUNT",
            CacheKind::NftMetadata => "NFT_METADATA",
            CacheKind::TransactionHistory => "TRANSACTION_HISTORY",
            CacheKind::TransactionHistoryEmpty => "TRANSACTION_HISTORY_EMPTY",
            CacheKind::EmptyResult => "EMPTY_RESULT",
        }
    }
}

impl fmt::Display for CacheKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for CacheKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        CacheKind::ALL
            .into_iter()
            .find(|kind| kind.label().eq_ignore_ascii_case(s))
            .ok_or_else(|| anyhow!("Type de cache inconnu : '{}'", s))
    }
}

/// Construit une clé `namespace:k1=v1&k2=v2`. Les paramètres sont triés,
/// deux jeux de paramètres équivalents donnent donc la même clé.
pub fn cache_key(namespace: &str, params: &[(&str, &str)]) -> String {
    let mut sorted: Vec<&(&str, &str)> = params.iter().collect();
    sorted.sort();
    let joined = sorted
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join("&");
    format!("{}:{}", namespace, joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_independent_of_parameter_order() {
        let a = cache_key("token-balance", &[("wallet", "W1"), ("mint", "M1")]);
        let b = cache_key("token-balance", &[("mint", "M1"), ("wallet", "W1")]);
        assert_eq!(a, b);
        assert_eq!(a, "token-balance:mint=M1&wallet=W1");
    }

    #[test]
    fn namespaces_do_not_collide() {
        let a = cache_key("nft-count", &[("wallet", "W1")]);
        let b = cache_key("nft-metadata", &[("wallet", "W1")]);
        assert_ne!(a, b);
    }

    #[test]
    fn empty_history_lives_shorter_than_history() {
        assert_eq!(CacheKind::TransactionHistoryEmpty.ttl(), Duration::from_secs(30));
        assert_eq!(CacheKind::TransactionHistory.ttl(), Duration::from_secs(120));
        assert!(CacheKind::NftMetadata.ttl() > CacheKind::TokenBalance.ttl());
    }

    #[test]
    fn kind_parses_from_label() {
        assert_eq!(
            "TRANSACTION_HISTORY_EMPTY".parse::<CacheKind>().unwrap(),
            CacheKind::TransactionHistoryEmpty
        );
        assert_eq!("token_balance".parse::<CacheKind>().unwrap(), CacheKind::TokenBalance);
        assert!("BOGUS".parse::<CacheKind>().is_err());
    }
}
