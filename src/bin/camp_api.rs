#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::Result;
use camp_dashboard::{
    api::{self, AppState},
    config::Config,
    monitoring::logging,
};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Lance l'API HTTP du dashboard (avec le nettoyage périodique du cache).
    Serve,
    /// Affiche les soldes CAMP d'une liste de wallets.
    Balances { wallets: Vec<String> },
    /// Affiche le nombre de NFTs d'une liste de wallets.
    NftCounts { wallets: Vec<String> },
    /// Affiche les NFTs d'une liste de wallets.
    Nfts { wallets: Vec<String> },
    /// Affiche les dernières signatures d'un wallet.
    History {
        wallet: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::setup_logging();
    let cli = Cli::parse();
    let config = Config::load()?;
    let state = AppState::from_config(&config)?;

    match cli.command {
        Commands::Serve => {
            let cleanup = Arc::clone(&state.caches).start_cleanup_task(config.cleanup_interval());
            info!(
                "[Main] Nettoyage du cache toutes les {:?}.",
                config.cleanup_interval()
            );
            api::serve(state, config.api_port).await;
            cleanup.abort();
        }
        Commands::Balances { wallets } => {
            let balances = state.balances.token_balances(&wallets).await;
            for wallet in &wallets {
                if let Some(balance) = balances.get(wallet) {
                    let marker = if balance.is_resolved() { "" } else { " (inconnu)" };
                    println!("{:<44} {}{}", wallet, balance.value(), marker);
                }
            }
        }
        Commands::NftCounts { wallets } => {
            let counts = state.nfts.nft_counts(&wallets).await?;
            for wallet in &wallets {
                if let Some(count) = counts.get(wallet) {
                    let marker = if count.is_resolved() { "" } else { " (inconnu)" };
                    println!("{:<44} {}{}", wallet, count.value(), marker);
                }
            }
        }
        Commands::Nfts { wallets } => {
            let lists = state.nfts.nft_metadata_batch(&wallets).await?;
            for wallet in &wallets {
                if let Some(list) = lists.get(wallet) {
                    let marker = if list.is_resolved() { "" } else { " (inconnu)" };
                    println!("{:<44} {} NFT(s){}", wallet, list.value().len(), marker);
                    for asset in list.value() {
                        println!("    {} {}", asset.id, asset.name.as_deref().unwrap_or("-"));
                    }
                }
            }
        }
        Commands::History { wallet, limit } => {
            let history = state.history.transaction_history(&wallet, limit).await?;
            info!("[Main] {} signature(s) pour {}.", history.len(), wallet);
            println!("{}", serde_json::to_string_pretty(&history)?);
        }
    }

    Ok(())
}
