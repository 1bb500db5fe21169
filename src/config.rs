use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;

use crate::metadata::{DEFAULT_IPFS_GATEWAY, DEFAULT_METADATA_TIMEOUT};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub ethereum_rpc_url: String,
    pub blocks_per_request: u64,
    pub max_retries: u32,
    pub request_timeout_ms: u64,
    pub include_traces: bool,
    pub has_indexed_to_and_from_topics: bool,
    pub hold_display_threshold: usize,
    pub resolve_token_uris: bool,
    pub metadata_timeout_secs: u64,
    pub metadata_concurrency: usize,
    pub ipfs_gateway: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ethereum_rpc_url: "https://testnet-rpc.monad.xyz".to_string(),
            blocks_per_request: 1000,
            max_retries: 5,
            request_timeout_ms: 60_000,
            include_traces: false,
            has_indexed_to_and_from_topics: true,
            hold_display_threshold: 0,
            resolve_token_uris: false,
            metadata_timeout_secs: DEFAULT_METADATA_TIMEOUT.as_secs(),
            metadata_concurrency: 8,
            ipfs_gateway: DEFAULT_IPFS_GATEWAY.to_string(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let defaults = Config::default();
        let config = Config {
            ethereum_rpc_url: std::env::var("ETHEREUM_RPC_URL").unwrap_or(defaults.ethereum_rpc_url),
            blocks_per_request: env_or("BLOCKS_PER_REQUEST", defaults.blocks_per_request),
            max_retries: env_or("MAX_RETRIES", defaults.max_retries),
            request_timeout_ms: env_or("REQUEST_TIMEOUT_MS", defaults.request_timeout_ms),
            include_traces: env_or("INCLUDE_TRACES", defaults.include_traces),
            has_indexed_to_and_from_topics: env_or(
                "HAS_INDEXED_TO_AND_FROM_TOPICS",
                defaults.has_indexed_to_and_from_topics,
            ),
            hold_display_threshold: env_or("HOLD_DISPLAY_THRESHOLD", defaults.hold_display_threshold),
            resolve_token_uris: env_or("RESOLVE_TOKEN_URIS", defaults.resolve_token_uris),
            metadata_timeout_secs: env_or("METADATA_TIMEOUT_SECS", defaults.metadata_timeout_secs),
            metadata_concurrency: env_or("METADATA_CONCURRENCY", defaults.metadata_concurrency),
            ipfs_gateway: std::env::var("IPFS_GATEWAY").unwrap_or(defaults.ipfs_gateway),
        };

        Ok(config)
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout_secs)
    }
}

/// Unset or unparsable values fall back to the default.
fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}
