use anyhow::Result;
use async_trait::async_trait;
use ethers::abi::{self, ParamType, Token};
use ethers_core::types::transaction::eip2718::TypedTransaction;
use ethers_core::types::{
    Action, Block, BlockId, BlockNumber, Filter, Log, TraceFilter, Transaction, TransactionRequest, H160,
    U256, U64,
};
use ethers_providers::{
    Http, HttpRateLimitRetryPolicy, Middleware, Provider, RetryClient, RetryClientBuilder,
};
use futures::stream::{self, StreamExt, TryStreamExt};
use log::{debug, info};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::StreamError;
use crate::indexer::{BatchSource, BatchStream, StreamQuery};
use crate::metadata::{CollectionLabels, TokenUriResolver};
use crate::models::{Batch, RawBlock, RawLog, RawTrace, RawTransaction};
use crate::signatures::TokenType;

const BLOCK_FETCH_CONCURRENCY: usize = 8;

type RpcProvider = Provider<RetryClient<Http>>;

/// JSON-RPC backed batch source. Each batch covers `blocks_per_request`
/// blocks; retries and timeouts are handled by the transport.
#[derive(Clone)]
pub struct EthereumClient {
    provider: Arc<RpcProvider>,
    blocks_per_request: u64,
    include_traces: bool,
}

impl EthereumClient {
    pub fn new(config: &Config) -> Result<Self> {
        let url = reqwest::Url::parse(&config.ethereum_rpc_url)?;
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        let http = Http::new_with_client(url, http_client);

        let transport = RetryClientBuilder::default()
            .rate_limit_retries(config.max_retries)
            .timeout_retries(config.max_retries)
            .initial_backoff(Duration::from_millis(500))
            .build(http, Box::new(HttpRateLimitRetryPolicy));

        Ok(Self {
            provider: Arc::new(Provider::new(transport)),
            blocks_per_request: config.blocks_per_request.max(1),
            include_traces: config.include_traces,
        })
    }

    pub async fn get_latest_block_number(&self) -> Result<u64, StreamError> {
        let block_number = self.provider.get_block_number().await.map_err(StreamError::rpc)?;
        Ok(block_number.as_u64())
    }

    async fn fetch_range(&self, query: &StreamQuery, from_block: u64, to_block: u64) -> Result<Batch, StreamError> {
        let mut blocks = BTreeMap::new();
        let mut transactions = Vec::new();

        if !query.transactions.is_empty() {
            let fetched: Vec<Option<Block<Transaction>>> = stream::iter(from_block..=to_block)
                .map(|number| self.get_block_with_txs(number))
                .buffered(BLOCK_FETCH_CONCURRENCY)
                .try_collect()
                .await?;

            for block in fetched.into_iter().flatten() {
                let Some(number) = block.number.map(|n| n.as_u64()) else {
                    continue;
                };
                for tx in &block.transactions {
                    if query.transactions.iter().any(|s| s.matches(Some(tx.from), tx.to)) {
                        transactions.push(self.to_raw_transaction(tx, query.fields.receipts).await?);
                    }
                }
                blocks.insert(
                    number,
                    RawBlock {
                        number,
                        hash: block.hash,
                        timestamp: Some(block.timestamp.low_u64()),
                    },
                );
            }
        }

        let logs = self.get_matching_logs(query, from_block, to_block).await?;

        if query.fields.block_timestamps {
            let missing: Vec<u64> = logs
                .iter()
                .filter_map(|log| log.block_number)
                .filter(|number| !blocks.contains_key(number))
                .collect::<HashSet<_>>()
                .into_iter()
                .collect();
            for number in missing {
                if let Some(block) = self.get_block_header(number).await? {
                    blocks.insert(number, block);
                }
            }
        }

        let traces = if self.include_traces && !query.traces.is_empty() {
            self.get_matching_traces(query, from_block, to_block).await?
        } else {
            Vec::new()
        };

        Ok(Batch {
            blocks: blocks.into_values().collect(),
            transactions,
            traces,
            logs,
            next_block: to_block + 1,
        })
    }

    async fn get_block_with_txs(&self, number: u64) -> Result<Option<Block<Transaction>>, StreamError> {
        self.provider
            .get_block_with_txs(BlockId::Number(BlockNumber::Number(U64::from(number))))
            .await
            .map_err(StreamError::rpc)
    }

    async fn get_block_header(&self, number: u64) -> Result<Option<RawBlock>, StreamError> {
        let block = self
            .provider
            .get_block(BlockId::Number(BlockNumber::Number(U64::from(number))))
            .await
            .map_err(StreamError::rpc)?;

        Ok(block.map(|block| RawBlock {
            number,
            hash: block.hash,
            timestamp: Some(block.timestamp.low_u64()),
        }))
    }

    async fn to_raw_transaction(&self, tx: &Transaction, with_receipt: bool) -> Result<RawTransaction, StreamError> {
        let mut raw = RawTransaction {
            hash: Some(tx.hash),
            nonce: Some(tx.nonce),
            block_hash: tx.block_hash,
            block_number: tx.block_number.map(|n| n.as_u64()),
            transaction_index: tx.transaction_index.map(|i| i.as_u64()),
            from: Some(tx.from),
            to: tx.to,
            value: Some(tx.value),
            ..Default::default()
        };

        if with_receipt {
            let receipt = self
                .provider
                .get_transaction_receipt(tx.hash)
                .await
                .map_err(StreamError::rpc)?;
            if let Some(receipt) = receipt {
                raw.gas_used = receipt.gas_used;
                raw.effective_gas_price = receipt.effective_gas_price.or(tx.gas_price);
                raw.status = receipt.status.map(|s| s.as_u64());
            }
        }

        Ok(raw)
    }

    /// One `eth_getLogs` per selection; overlapping selections are merged on
    /// (transaction hash, log index).
    async fn get_matching_logs(&self, query: &StreamQuery, from_block: u64, to_block: u64) -> Result<Vec<RawLog>, StreamError> {
        let mut seen = HashSet::new();
        let mut logs = Vec::new();

        for selection in &query.logs {
            let mut filter = Filter::new()
                .from_block(BlockNumber::Number(U64::from(from_block)))
                .to_block(BlockNumber::Number(U64::from(to_block)));
            if !selection.address.is_empty() {
                filter = filter.address(selection.address.clone());
            }
            let [topic0, topic1, topic2, topic3] = &selection.topics;
            if !topic0.is_empty() {
                filter = filter.topic0(topic0.clone());
            }
            if !topic1.is_empty() {
                filter = filter.topic1(topic1.clone());
            }
            if !topic2.is_empty() {
                filter = filter.topic2(topic2.clone());
            }
            if !topic3.is_empty() {
                filter = filter.topic3(topic3.clone());
            }

            let found = self.provider.get_logs(&filter).await.map_err(StreamError::rpc)?;
            for log in found {
                if seen.insert((log.transaction_hash, log.log_index)) {
                    logs.push(log);
                }
            }
        }

        logs.sort_by_key(|log| (log.block_number, log.log_index));
        Ok(logs.into_iter().map(to_raw_log).collect())
    }

    /// Plain value calls only; the same call can match both selections.
    async fn get_matching_traces(&self, query: &StreamQuery, from_block: u64, to_block: u64) -> Result<Vec<RawTrace>, StreamError> {
        let mut seen = HashSet::new();
        let mut traces = Vec::new();

        for selection in &query.traces {
            let mut filter = TraceFilter::default()
                .from_block(BlockNumber::Number(U64::from(from_block)))
                .to_block(BlockNumber::Number(U64::from(to_block)));
            if !selection.from.is_empty() {
                filter = filter.from_address(selection.from.clone());
            }
            if !selection.to.is_empty() {
                filter = filter.to_address(selection.to.clone());
            }

            let found = self.provider.trace_filter(filter).await.map_err(StreamError::rpc)?;
            for trace in found {
                let Action::Call(call) = &trace.action else {
                    continue;
                };
                if !seen.insert((trace.transaction_hash, trace.trace_address.clone())) {
                    continue;
                }
                traces.push(RawTrace {
                    from: Some(call.from),
                    to: Some(call.to),
                    value: Some(call.value),
                    transaction_hash: trace.transaction_hash,
                });
            }
        }

        Ok(traces)
    }

    async fn call_string(&self, contract: H160, signature: &str, args: &[Token]) -> Option<String> {
        let mut data = ethers::utils::id(signature).to_vec();
        data.extend(abi::encode(args));

        let tx: TypedTransaction = TransactionRequest::new().to(contract).data(data).into();
        let output = match self.provider.call(&tx, None).await {
            Ok(output) => output,
            Err(e) => {
                debug!("{} call on 0x{:x} failed: {}", signature, contract, e);
                return None;
            }
        };

        abi::decode(&[ParamType::String], &output)
            .ok()?
            .into_iter()
            .next()?
            .into_string()
            .filter(|value| !value.is_empty())
    }
}

fn to_raw_log(log: Log) -> RawLog {
    RawLog {
        address: Some(log.address),
        topics: log.topics,
        data: log.data,
        transaction_hash: log.transaction_hash,
        block_number: log.block_number.map(|n| n.as_u64()),
        log_index: log.log_index.map(|i| i.as_u64()),
    }
}

#[async_trait]
impl BatchSource for EthereumClient {
    type Stream = RpcBatchStream;

    async fn open(&self, query: &StreamQuery) -> Result<RpcBatchStream, StreamError> {
        let latest = self.get_latest_block_number().await?;
        info!(
            "Streaming blocks {} to {} in ranges of {}",
            query.from_block, latest, self.blocks_per_request
        );

        Ok(RpcBatchStream {
            client: self.clone(),
            query: query.clone(),
            cursor: query.from_block,
            latest,
        })
    }
}

/// Walks `[from_block, latest]` at the time the stream was opened.
pub struct RpcBatchStream {
    client: EthereumClient,
    query: StreamQuery,
    cursor: u64,
    latest: u64,
}

#[async_trait]
impl BatchStream for RpcBatchStream {
    async fn recv(&mut self) -> Result<Option<Batch>, StreamError> {
        if self.cursor > self.latest {
            return Ok(None);
        }

        let end = self
            .cursor
            .saturating_add(self.client.blocks_per_request - 1)
            .min(self.latest);
        let batch = self.client.fetch_range(&self.query, self.cursor, end).await?;
        self.cursor = end + 1;
        Ok(Some(batch))
    }
}

#[async_trait]
impl TokenUriResolver for EthereumClient {
    async fn token_uri(&self, contract: H160, token_id: U256, token_type: TokenType) -> Option<String> {
        let signature = match token_type {
            TokenType::Erc721 => "tokenURI(uint256)",
            TokenType::Erc1155 => "uri(uint256)",
        };
        self.call_string(contract, signature, &[Token::Uint(token_id)]).await
    }

    async fn collection_labels(&self, contract: H160) -> CollectionLabels {
        CollectionLabels {
            name: self.call_string(contract, "name()", &[]).await,
            symbol: self.call_string(contract, "symbol()", &[]).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers_core::types::H256;

    fn config(rpc_url: &str) -> Config {
        Config {
            ethereum_rpc_url: rpc_url.to_string(),
            ..Config::default()
        }
    }

    #[test]
    fn test_client_rejects_bad_url() {
        assert!(EthereumClient::new(&config("not a url")).is_err());
    }

    #[test]
    fn test_client_clamps_range_size() {
        let mut cfg = config("http://localhost:8545");
        cfg.blocks_per_request = 0;
        let client = EthereumClient::new(&cfg).unwrap();
        assert_eq!(client.blocks_per_request, 1);
    }

    #[test]
    fn test_raw_log_conversion() {
        let log = Log {
            address: H160::repeat_byte(0x77),
            topics: vec![H256::repeat_byte(0x01)],
            block_number: Some(U64::from(12u64)),
            log_index: Some(U256::from(3u64)),
            transaction_hash: Some(H256::repeat_byte(0x02)),
            ..Default::default()
        };

        let raw = to_raw_log(log);
        assert_eq!(raw.address, Some(H160::repeat_byte(0x77)));
        assert_eq!(raw.block_number, Some(12));
        assert_eq!(raw.log_index, Some(3));
        assert_eq!(raw.topics.len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_range_ends_stream() {
        let client = EthereumClient::new(&config("http://localhost:8545")).unwrap();
        let mut stream = RpcBatchStream {
            client,
            query: StreamQuery::default(),
            cursor: 11,
            latest: 10,
        };
        assert!(stream.recv().await.unwrap().is_none());
    }
}
