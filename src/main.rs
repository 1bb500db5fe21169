mod accumulator;
mod address;
mod cli;
mod config;
mod decoder;
mod error;
mod ethereum;
mod holdings;
mod indexer;
mod metadata;
mod models;
mod signatures;
mod summary;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use log::{error, warn};
use serde::Serialize;

use cli::{Cli, Commands};
use config::Config;
use ethereum::EthereumClient;
use indexer::{scan_account, scan_holders, ScanSettings};
use metadata::{HttpMetadataFetcher, MetadataEnricher};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config = Config::load()?;
    let client = EthereumClient::new(&config)?;

    let stop = Arc::new(AtomicBool::new(false));
    let stop_on_signal = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current batch");
            stop_on_signal.store(true, Ordering::SeqCst);
        }
    });

    match cli.command {
        Commands::Scan {
            address,
            from_block,
            pretty,
        } => {
            if let Err(e) = address::normalize(&address) {
                error!("{}", e);
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }

            let enricher = build_enricher(&config, &client);
            let settings = ScanSettings {
                from_block,
                has_indexed_to_and_from_topics: config.has_indexed_to_and_from_topics,
                stop,
            };
            let report = scan_account(client, &address, enricher, settings).await?;
            print_json(&report, pretty)?;
        }
        Commands::Holders {
            contract,
            threshold,
            from_block,
            pretty,
        } => {
            if let Err(e) = address::normalize(&contract) {
                error!("{}", e);
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }

            let settings = ScanSettings {
                from_block,
                has_indexed_to_and_from_topics: config.has_indexed_to_and_from_topics,
                stop,
            };
            let threshold = threshold.unwrap_or(config.hold_display_threshold);
            let holders = scan_holders(client, &contract, threshold, settings).await?;
            print_json(&holders, pretty)?;
        }
    }

    Ok(())
}

fn build_enricher(config: &Config, client: &EthereumClient) -> MetadataEnricher {
    if !config.resolve_token_uris {
        return MetadataEnricher::disabled();
    }

    MetadataEnricher::new(Arc::new(client.clone()), Arc::new(HttpMetadataFetcher::new()))
        .with_timeout(config.metadata_timeout())
        .with_ipfs_gateway(config.ipfs_gateway.clone())
        .with_concurrency(config.metadata_concurrency)
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", json);
    Ok(())
}
