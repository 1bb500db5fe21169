use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use ethers_core::types::{H160, H256};
use log::{debug, info};

use crate::accumulator::BatchAccumulator;
use crate::address;
use crate::decoder::LogDecoder;
use crate::error::{AggregationError, StreamError};
use crate::holdings::{HolderEntry, HoldingsView};
use crate::metadata::MetadataEnricher;
use crate::models::Batch;
use crate::signatures::{EventKind, EventSignatureRegistry};
use crate::summary::{build_report, AccountReport};

/// Transactions matching every non-empty list. An empty list matches anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionSelection {
    pub from: Vec<H160>,
    pub to: Vec<H160>,
}

impl TransactionSelection {
    pub fn matches(&self, from: Option<H160>, to: Option<H160>) -> bool {
        list_matches(&self.from, from) && list_matches(&self.to, to)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceSelection {
    pub from: Vec<H160>,
    pub to: Vec<H160>,
}

/// Topic positions 0..=3; an empty position matches any topic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogSelection {
    pub address: Vec<H160>,
    pub topics: [Vec<H256>; 4],
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldSelection {
    pub block_timestamps: bool,
    /// `gasUsed`, `effectiveGasPrice` and `status`.
    pub receipts: bool,
}

fn list_matches(list: &[H160], value: Option<H160>) -> bool {
    list.is_empty() || value.map_or(false, |value| list.contains(&value))
}

/// Description of one historical query. Selections of the same kind are OR'd;
/// the source never joins in records a selection did not match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamQuery {
    pub from_block: u64,
    pub transactions: Vec<TransactionSelection>,
    pub traces: Vec<TraceSelection>,
    pub logs: Vec<LogSelection>,
    pub fields: FieldSelection,
}

impl StreamQuery {
    /// Everything touching `target`: transactions and traces by sender or
    /// receiver, and each transfer event with `target` in either endpoint topic.
    pub fn for_account(target: H160, from_block: u64) -> Self {
        let participant = H256::from(target);
        let transfer = EventSignatureRegistry::topic0(EventKind::Erc721Transfer);
        let single = EventSignatureRegistry::topic0(EventKind::Erc1155TransferSingle);
        let batch = EventSignatureRegistry::topic0(EventKind::Erc1155TransferBatch);

        let selection = |topics: [Vec<H256>; 4]| LogSelection {
            address: Vec::new(),
            topics,
        };

        Self {
            from_block,
            transactions: vec![
                TransactionSelection {
                    from: vec![target],
                    to: Vec::new(),
                },
                TransactionSelection {
                    from: Vec::new(),
                    to: vec![target],
                },
            ],
            traces: vec![
                TraceSelection {
                    from: Vec::new(),
                    to: vec![target],
                },
                TraceSelection {
                    from: vec![target],
                    to: Vec::new(),
                },
            ],
            logs: vec![
                selection([vec![transfer], vec![], vec![participant], vec![]]),
                selection([vec![transfer], vec![participant], vec![], vec![]]),
                selection([vec![single], vec![], vec![participant], vec![]]),
                selection([vec![single], vec![], vec![], vec![participant]]),
                selection([vec![batch], vec![], vec![participant], vec![]]),
                selection([vec![batch], vec![], vec![], vec![participant]]),
            ],
            fields: FieldSelection {
                block_timestamps: true,
                receipts: true,
            },
        }
    }

    /// Every ERC-721 `Transfer` emitted by `contract`.
    pub fn for_collection(contract: H160, from_block: u64) -> Self {
        Self {
            from_block,
            logs: vec![LogSelection {
                address: vec![contract],
                topics: [
                    vec![EventSignatureRegistry::topic0(EventKind::Erc721Transfer)],
                    vec![],
                    vec![],
                    vec![],
                ],
            }],
            fields: FieldSelection {
                block_timestamps: true,
                receipts: false,
            },
            ..Default::default()
        }
    }
}

/// An open historical stream. `None` marks the end.
#[async_trait]
pub trait BatchStream: Send {
    async fn recv(&mut self) -> Result<Option<Batch>, StreamError>;
}

/// The opaque indexing source. Retry and timeout policy live here.
#[async_trait]
pub trait BatchSource: Send + Sync {
    type Stream: BatchStream;

    async fn open(&self, query: &StreamQuery) -> Result<Self::Stream, StreamError>;
}

#[async_trait]
pub trait BatchFolder: Send {
    async fn fold(&mut self, batch: Batch) -> Result<(), AggregationError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    Streaming,
    Done,
}

/// Pulls batches one at a time and hands each to a folder. The stop flag is
/// checked between batches only.
pub struct StreamDriver<S> {
    source: S,
    state: DriverState,
    stop: Arc<AtomicBool>,
    batch_count: u64,
    highest_block: u64,
}

impl<S: BatchSource> StreamDriver<S> {
    pub fn new(source: S, stop: Arc<AtomicBool>) -> Self {
        Self {
            source,
            state: DriverState::Idle,
            stop,
            batch_count: 0,
            highest_block: 0,
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Streams to exhaustion and returns the highest block reported.
    pub async fn run<F: BatchFolder>(&mut self, query: &StreamQuery, folder: &mut F) -> Result<u64, AggregationError> {
        let result = self.drive(query, folder).await;
        self.state = DriverState::Done;
        result
    }

    async fn drive<F: BatchFolder>(&mut self, query: &StreamQuery, folder: &mut F) -> Result<u64, AggregationError> {
        info!("Running the query from block {}", query.from_block);
        let mut stream = self.source.open(query).await?;
        self.state = DriverState::Streaming;

        loop {
            if self.stop.load(Ordering::SeqCst) {
                return Err(AggregationError::Cancelled {
                    highest_block: self.highest_block,
                });
            }

            let batch = match stream.recv().await? {
                Some(batch) => batch,
                None => break,
            };

            self.batch_count += 1;
            self.highest_block = self.highest_block.max(batch.next_block);
            debug!(
                "Batch {}: next block {}, {} blocks, {} transactions, {} traces, {} logs",
                self.batch_count,
                batch.next_block,
                batch.blocks.len(),
                batch.transactions.len(),
                batch.traces.len(),
                batch.logs.len()
            );

            folder.fold(batch).await?;
        }

        info!(
            "Stream finished after {} batches, highest block {}",
            self.batch_count, self.highest_block
        );
        Ok(self.highest_block)
    }
}

pub struct ScanSettings {
    pub from_block: u64,
    pub has_indexed_to_and_from_topics: bool,
    pub stop: Arc<AtomicBool>,
}

/// Validates `address`, streams its full history and builds the report.
/// An invalid address is rejected before the source is touched.
pub async fn scan_account<S: BatchSource>(
    source: S,
    address: &str,
    enricher: MetadataEnricher,
    settings: ScanSettings,
) -> Result<AccountReport, AggregationError> {
    let target = address::parse(address)?;
    info!("Fetching blockchain data for address: {}", address::to_canonical(&target));

    let decoder = LogDecoder::new(EventSignatureRegistry::new(settings.has_indexed_to_and_from_topics));
    let mut accumulator = BatchAccumulator::new(target, decoder, enricher);
    let query = StreamQuery::for_account(target, settings.from_block);

    let mut driver = StreamDriver::new(source, settings.stop);
    driver.run(&query, &mut accumulator).await?;
    debug!("Driver {:?}, final totals: {:?}", driver.state(), accumulator.totals());

    let report = build_report(accumulator.finish());
    info!(
        "Found {} transactions, {} NFT transfers, {} NFT collections; scanned to block {}",
        report.summary.total_transactions,
        report.summary.total_nft_transfers,
        report.summary.total_nft_collections,
        report.summary.scanned_blocks
    );
    Ok(report)
}

/// Derived holder list for one ERC-721 contract.
pub async fn scan_holders<S: BatchSource>(
    source: S,
    contract: &str,
    threshold: usize,
    settings: ScanSettings,
) -> Result<Vec<HolderEntry>, AggregationError> {
    let contract = address::parse(contract)?;
    info!("Fetching NFT interactions for contract: {}", address::to_canonical(&contract));

    let decoder = LogDecoder::new(EventSignatureRegistry::new(settings.has_indexed_to_and_from_topics));
    let mut holdings = HoldingsView::new(contract, decoder);
    let query = StreamQuery::for_collection(contract, settings.from_block);

    let mut driver = StreamDriver::new(source, settings.stop);
    driver.run(&query, &mut holdings).await?;
    debug!("Driver {:?} after holdings scan", driver.state());

    let report = holdings.into_report(threshold);
    info!("Found {} holders above threshold {}", report.len(), threshold);
    Ok(report)
}
