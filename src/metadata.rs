use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers_core::types::{H160, U256};
use futures::stream::{self, StreamExt};
use log::{debug, warn};
use reqwest::header::ACCEPT;

use crate::error::EnrichmentError;
use crate::models::{NftMetadata, NftTransferRecord};
use crate::signatures::TokenType;

pub const DEFAULT_IPFS_GATEWAY: &str = "https://ipfs.io/ipfs/";
pub const DEFAULT_METADATA_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionLabels {
    pub name: Option<String>,
    pub symbol: Option<String>,
}

/// Source of a token's metadata URI.
#[async_trait]
pub trait TokenUriResolver: Send + Sync {
    async fn token_uri(&self, contract: H160, token_id: U256, token_type: TokenType) -> Option<String>;

    async fn collection_labels(&self, _contract: H160) -> CollectionLabels {
        CollectionLabels::default()
    }
}

/// Token URIs are never available; enrichment is a no-op.
pub struct NoTokenUri;

#[async_trait]
impl TokenUriResolver for NoTokenUri {
    async fn token_uri(&self, _contract: H160, _token_id: U256, _token_type: TokenType) -> Option<String> {
        None
    }
}

#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    async fn fetch(&self, uri: &str, timeout: Duration) -> Result<serde_json::Value, EnrichmentError>;
}

pub struct HttpMetadataFetcher {
    client: reqwest::Client,
}

impl HttpMetadataFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpMetadataFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetadataFetcher for HttpMetadataFetcher {
    async fn fetch(&self, uri: &str, timeout: Duration) -> Result<serde_json::Value, EnrichmentError> {
        let response = self
            .client
            .get(uri)
            .header(ACCEPT, "application/json")
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EnrichmentError::Timeout
                } else {
                    EnrichmentError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(EnrichmentError::Http(status.as_u16()));
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| EnrichmentError::Decode(e.to_string()))
    }
}

/// Best-effort metadata lookup for NFT transfers. A failure leaves the
/// transfer without metadata; nothing is retried.
pub struct MetadataEnricher {
    resolver: Arc<dyn TokenUriResolver>,
    fetcher: Arc<dyn MetadataFetcher>,
    timeout: Duration,
    ipfs_gateway: String,
    concurrency: usize,
}

impl MetadataEnricher {
    pub fn new(resolver: Arc<dyn TokenUriResolver>, fetcher: Arc<dyn MetadataFetcher>) -> Self {
        Self {
            resolver,
            fetcher,
            timeout: DEFAULT_METADATA_TIMEOUT,
            ipfs_gateway: DEFAULT_IPFS_GATEWAY.to_string(),
            concurrency: 8,
        }
    }

    pub fn disabled() -> Self {
        Self::new(Arc::new(NoTokenUri), Arc::new(HttpMetadataFetcher::new()))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_ipfs_gateway(mut self, gateway: impl Into<String>) -> Self {
        self.ipfs_gateway = gateway.into();
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Enriches transfers concurrently; output keeps input order.
    pub async fn enrich_all(&self, transfers: Vec<NftTransferRecord>) -> Vec<NftTransferRecord> {
        stream::iter(transfers)
            .map(|transfer| self.enrich(transfer))
            .buffered(self.concurrency)
            .collect()
            .await
    }

    async fn enrich(&self, mut transfer: NftTransferRecord) -> NftTransferRecord {
        transfer.metadata = self
            .metadata_for(transfer.contract_address, transfer.token_id, transfer.token_type)
            .await;
        transfer
    }

    pub async fn metadata_for(&self, contract: H160, token_id: U256, token_type: TokenType) -> Option<NftMetadata> {
        let uri = self.resolver.token_uri(contract, token_id, token_type).await?;
        let url = resolve_uri(&uri, &self.ipfs_gateway, token_id, token_type);

        match self.fetch_document(&url).await {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                warn!("Failed to fetch metadata for NFT 0x{:x}:{} from {}: {}", contract, token_id, url, e);
                None
            }
        }
    }

    async fn fetch_document(&self, url: &str) -> Result<NftMetadata, EnrichmentError> {
        let document = tokio::time::timeout(self.timeout, self.fetcher.fetch(url, self.timeout))
            .await
            .map_err(|_| EnrichmentError::Timeout)??;

        if !document.is_object() {
            return Err(EnrichmentError::Decode("metadata is not a JSON object".to_string()));
        }

        serde_json::from_value(document).map_err(|e| EnrichmentError::Decode(e.to_string()))
    }

    pub async fn collection_labels(&self, contract: H160) -> CollectionLabels {
        let labels = self.resolver.collection_labels(contract).await;
        debug!("Collection 0x{:x} labels: {:?}", contract, labels);
        labels
    }
}

/// Rewrites `ipfs://` to the HTTP gateway and fills the ERC-1155 `{id}`
/// placeholder with the 64-digit hex token id.
pub fn resolve_uri(uri: &str, ipfs_gateway: &str, token_id: U256, token_type: TokenType) -> String {
    let mut url = match uri.strip_prefix("ipfs://") {
        Some(path) => format!("{}{}", ipfs_gateway, path.strip_prefix("ipfs/").unwrap_or(path)),
        None => uri.to_string(),
    };

    if token_type == TokenType::Erc1155 && url.contains("{id}") {
        let mut word = [0u8; 32];
        token_id.to_big_endian(&mut word);
        url = url.replace("{id}", &hex::encode(word));
    }

    url
}
