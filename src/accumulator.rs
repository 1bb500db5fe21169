use std::collections::HashMap;

use async_trait::async_trait;
use ethers_core::types::{H160, H256};
use log::{debug, info};

use crate::decoder::{LogDecoder, LogOutcome};
use crate::error::AggregationError;
use crate::indexer::BatchFolder;
use crate::metadata::{CollectionLabels, MetadataEnricher};
use crate::models::{
    AggregateTotals, Batch, CollectionEntry, NftTransferRecord, RawBlock, RawLog, RawTrace,
    RawTransaction, Timestamp, TransactionRecord,
};

/// Block timestamps available inside one batch.
struct BlockIndex {
    by_hash: HashMap<H256, u64>,
    by_number: HashMap<u64, u64>,
}

impl BlockIndex {
    fn new(blocks: &[RawBlock]) -> Self {
        let mut by_hash = HashMap::new();
        let mut by_number = HashMap::new();
        for block in blocks {
            if let Some(ts) = block.timestamp {
                if let Some(hash) = block.hash {
                    by_hash.insert(hash, ts);
                }
                by_number.insert(block.number, ts);
            }
        }
        Self { by_hash, by_number }
    }

    /// Block hash first, then block number, then the block-number proxy.
    fn resolve(&self, tx: &RawTransaction) -> Option<Timestamp> {
        if let Some(ts) = tx.block_hash.and_then(|hash| self.by_hash.get(&hash)) {
            return Some(Timestamp::Block(*ts));
        }
        let number = tx.block_number?;
        match self.by_number.get(&number) {
            Some(ts) => Some(Timestamp::Block(*ts)),
            None => Some(Timestamp::proxy_for(number)),
        }
    }

    fn timestamp_of(&self, number: u64) -> Option<u64> {
        self.by_number.get(&number).copied()
    }
}

/// Everything one batch contributes, merged into the running state only once
/// the whole batch has been staged.
#[derive(Default)]
struct StagedBatch {
    transactions: Vec<TransactionRecord>,
    nft_transfers: Vec<NftTransferRecord>,
    totals: AggregateTotals,
}

/// Per-request scan state owned by exactly one driver.
pub struct ScanState {
    pub target: H160,
    pub transactions: Vec<TransactionRecord>,
    pub nft_transfers: Vec<NftTransferRecord>,
    pub collections: Vec<CollectionEntry>,
    pub totals: AggregateTotals,
}

pub struct BatchAccumulator {
    target: H160,
    decoder: LogDecoder,
    enricher: MetadataEnricher,
    transactions: Vec<TransactionRecord>,
    nft_transfers: Vec<NftTransferRecord>,
    collections: Vec<CollectionEntry>,
    collection_index: HashMap<H160, usize>,
    totals: AggregateTotals,
}

impl BatchAccumulator {
    pub fn new(target: H160, decoder: LogDecoder, enricher: MetadataEnricher) -> Self {
        Self {
            target,
            decoder,
            enricher,
            transactions: Vec::new(),
            nft_transfers: Vec::new(),
            collections: Vec::new(),
            collection_index: HashMap::new(),
            totals: AggregateTotals::default(),
        }
    }

    pub fn totals(&self) -> &AggregateTotals {
        &self.totals
    }

    pub fn finish(self) -> ScanState {
        ScanState {
            target: self.target,
            transactions: self.transactions,
            nft_transfers: self.nft_transfers,
            collections: self.collections,
            totals: self.totals,
        }
    }

    /// Folds one batch: transactions, then traces, then logs.
    pub async fn fold_batch(&mut self, batch: Batch) -> Result<(), AggregationError> {
        let blocks = BlockIndex::new(&batch.blocks);
        let mut staged = StagedBatch::default();

        for tx in &batch.transactions {
            if let Some(record) = self.stage_transaction(tx, &blocks, &mut staged.totals) {
                staged.transactions.push(record);
            }
        }

        for trace in &batch.traces {
            self.stage_trace(trace, &mut staged.totals);
        }

        let drafts: Vec<NftTransferRecord> = batch
            .logs
            .iter()
            .filter_map(|log| self.stage_log(log, &blocks))
            .collect();
        staged.nft_transfers = self.enricher.enrich_all(drafts).await;

        let labels = self.new_collection_labels(&staged.nft_transfers).await;

        staged.totals.highest_block_scanned = batch.next_block;
        self.commit(staged, labels);
        Ok(())
    }

    fn stage_transaction(
        &self,
        tx: &RawTransaction,
        blocks: &BlockIndex,
        totals: &mut AggregateTotals,
    ) -> Option<TransactionRecord> {
        let hash = tx.hash?;
        let sent_by_target = tx.from == Some(self.target);
        let received_by_target = tx.to == Some(self.target);

        let gas_fee = match (tx.gas_used, tx.effective_gas_price) {
            (Some(gas_used), Some(price)) => Some(gas_used.full_mul(price)),
            _ => None,
        };
        if let (Some(fee), true) = (gas_fee, sent_by_target) {
            totals.record_gas(fee);
        }

        if let Some(value) = tx.value.filter(|value| !value.is_zero()) {
            if sent_by_target {
                totals.record_outgoing(value);
            }
            if received_by_target {
                totals.record_incoming(value);
            }
        }

        Some(TransactionRecord {
            hash,
            block_hash: tx.block_hash,
            block_number: tx.block_number,
            transaction_index: tx.transaction_index,
            nonce: tx.nonce,
            from: tx.from,
            to: tx.to,
            value: tx.value,
            gas_used: tx.gas_used,
            effective_gas_price: tx.effective_gas_price,
            gas_fee,
            status: tx.status,
            timestamp: blocks.resolve(tx),
        })
    }

    /// Traces carry one directional leg, so in and out are exclusive here.
    fn stage_trace(&self, trace: &RawTrace, totals: &mut AggregateTotals) {
        let (Some(from), Some(to), Some(value)) = (trace.from, trace.to, trace.value) else {
            return;
        };
        if value.is_zero() {
            return;
        }

        if from == self.target {
            totals.record_outgoing(value);
        } else if to == self.target {
            totals.record_incoming(value);
        }
    }

    fn stage_log(&self, log: &RawLog, blocks: &BlockIndex) -> Option<NftTransferRecord> {
        let (Some(contract), Some(tx_hash)) = (log.address, log.transaction_hash) else {
            return None;
        };

        let transfer = match self.decoder.decode(log) {
            Ok(LogOutcome::Transfer(transfer)) => transfer,
            Ok(LogOutcome::Skipped(kind)) => {
                info!("{} detected but not decoded, skipping log in tx {:#x}", kind, tx_hash);
                return None;
            }
            Ok(LogOutcome::Unrecognized) => return None,
            Err(e) => {
                debug!("Skipping malformed log in tx {:#x}: {}", tx_hash, e);
                return None;
            }
        };

        if !transfer.involves(&self.target) {
            return None;
        }

        let block_number = log.block_number.unwrap_or(0);
        Some(NftTransferRecord {
            transaction_hash: tx_hash,
            block_number,
            timestamp: blocks.timestamp_of(block_number),
            contract_address: contract,
            token_id: transfer.token_id,
            from: transfer.from,
            to: transfer.to,
            token_type: transfer.kind.token_type(),
            amount: transfer.amount,
            metadata: None,
        })
    }

    async fn new_collection_labels(&self, transfers: &[NftTransferRecord]) -> HashMap<H160, CollectionLabels> {
        let mut labels = HashMap::new();
        for transfer in transfers {
            let contract = transfer.contract_address;
            if self.collection_index.contains_key(&contract) || labels.contains_key(&contract) {
                continue;
            }
            labels.insert(contract, self.enricher.collection_labels(contract).await);
        }
        labels
    }

    fn commit(&mut self, staged: StagedBatch, mut labels: HashMap<H160, CollectionLabels>) {
        self.transactions.extend(staged.transactions);

        for transfer in &staged.nft_transfers {
            let contract = transfer.contract_address;
            let index = match self.collection_index.get(&contract) {
                Some(index) => *index,
                None => {
                    let label = labels.remove(&contract).unwrap_or_default();
                    self.collections.push(CollectionEntry {
                        contract_address: contract,
                        name: label.name,
                        symbol: label.symbol,
                        token_count: 0,
                    });
                    self.collection_index.insert(contract, self.collections.len() - 1);
                    self.collections.len() - 1
                }
            };
            self.collections[index].token_count += 1;
        }
        self.nft_transfers.extend(staged.nft_transfers);

        self.totals.absorb(&staged.totals);
    }
}

#[async_trait]
impl BatchFolder for BatchAccumulator {
    async fn fold(&mut self, batch: Batch) -> Result<(), AggregationError> {
        self.fold_batch(batch).await
    }
}
