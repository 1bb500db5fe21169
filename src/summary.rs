use std::fmt::Display;

use chrono::{DateTime, Utc};
use ethers_core::types::{H160, H256, U256, U512};
use serde::Serialize;

use crate::accumulator::ScanState;
use crate::address;
use crate::models::{decimal, CollectionEntry, NftTransferRecord, TimestampSource, TransactionRecord};

pub const ETHER_DECIMALS: usize = 18;
pub const GWEI_DECIMALS: usize = 9;

/// Fixed-point rendering of a base-unit integer. Trailing fractional zeros are
/// dropped and a zero fraction is omitted: 10^18 wei is "1", 1.5 ether is "1.5".
pub fn format_units(value: impl Display, decimals: usize) -> String {
    let digits = value.to_string();
    let digits = format!("{:0>width$}", digits, width = decimals + 1);
    let (integer, fraction) = digits.split_at(digits.len() - decimals);
    let fraction = fraction.trim_end_matches('0');

    if fraction.is_empty() {
        integer.to_string()
    } else {
        format!("{}.{}", integer, fraction)
    }
}

pub fn format_ether(value: impl Display) -> String {
    format_units(value, ETHER_DECIMALS)
}

pub fn format_gwei(value: impl Display) -> String {
    format_units(value, GWEI_DECIMALS)
}

/// Ordering inputs shared by transactions and NFT transfers.
pub trait Chronological {
    /// Real block time only; proxies do not count.
    fn block_time(&self) -> Option<u64>;
    fn block_number(&self) -> u64;
}

impl Chronological for TransactionRecord {
    fn block_time(&self) -> Option<u64> {
        self.timestamp.and_then(|ts| ts.block_time())
    }

    fn block_number(&self) -> u64 {
        self.block_number.unwrap_or(0)
    }
}

impl Chronological for NftTransferRecord {
    fn block_time(&self) -> Option<u64> {
        self.timestamp
    }

    fn block_number(&self) -> u64 {
        self.block_number
    }
}

/// Newest first. Two timestamped records compare by timestamp (then block
/// number); any other pair compares by block number. Timestamped and untimed
/// records are each sorted, then merged on block number, so the order stays
/// total. Exact ties keep insertion order.
pub fn sort_newest_first<T: Chronological>(items: Vec<T>) -> Vec<T> {
    let (mut timed, mut untimed): (Vec<(usize, T)>, Vec<(usize, T)>) = items
        .into_iter()
        .enumerate()
        .partition(|(_, item)| item.block_time().is_some());

    timed.sort_by(|(ia, a), (ib, b)| {
        b.block_time()
            .cmp(&a.block_time())
            .then_with(|| b.block_number().cmp(&a.block_number()))
            .then_with(|| ia.cmp(ib))
    });
    untimed.sort_by(|(ia, a), (ib, b)| {
        b.block_number()
            .cmp(&a.block_number())
            .then_with(|| ia.cmp(ib))
    });

    let mut sorted = Vec::with_capacity(timed.len() + untimed.len());
    let mut timed = timed.into_iter().peekable();
    let mut untimed = untimed.into_iter().peekable();

    loop {
        let take_untimed = match (timed.peek(), untimed.peek()) {
            (Some((ti, t)), Some((ui, u))) => {
                u.block_number() > t.block_number()
                    || (u.block_number() == t.block_number() && ui < ti)
            }
            (Some(_), None) => false,
            (None, Some(_)) => true,
            (None, None) => break,
        };

        let next = if take_untimed { untimed.next() } else { timed.next() };
        if let Some((_, item)) = next {
            sorted.push(item);
        }
    }

    sorted
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionView {
    pub hash: H256,
    pub block_hash: Option<H256>,
    #[serde(serialize_with = "decimal::option")]
    pub block_number: Option<u64>,
    #[serde(serialize_with = "decimal::option")]
    pub transaction_index: Option<u64>,
    #[serde(serialize_with = "decimal::option")]
    pub nonce: Option<U256>,
    pub from: Option<H160>,
    pub to: Option<H160>,
    #[serde(serialize_with = "decimal::option")]
    pub value: Option<U256>,
    #[serde(serialize_with = "decimal::option")]
    pub gas_used: Option<U256>,
    #[serde(serialize_with = "decimal::option")]
    pub effective_gas_price: Option<U256>,
    #[serde(serialize_with = "decimal::option")]
    pub gas_fee: Option<U512>,
    pub status: Option<u32>,
    #[serde(serialize_with = "decimal::option")]
    pub timestamp: Option<u64>,
    pub timestamp_source: Option<TimestampSource>,
    pub datetime: Option<DateTime<Utc>>,
    pub value_formatted: String,
    pub gas_used_formatted: String,
    pub gas_price_formatted: String,
    pub gas_fee_formatted: String,
}

impl From<TransactionRecord> for TransactionView {
    fn from(tx: TransactionRecord) -> Self {
        let datetime = tx
            .timestamp
            .and_then(|ts| ts.block_time())
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(|secs| DateTime::from_timestamp(secs, 0));

        Self {
            hash: tx.hash,
            block_hash: tx.block_hash,
            block_number: tx.block_number,
            transaction_index: tx.transaction_index,
            nonce: tx.nonce,
            from: tx.from,
            to: tx.to,
            value: tx.value,
            value_formatted: tx.value.map(format_ether).unwrap_or_else(|| "0".to_string()),
            gas_used_formatted: tx.gas_used.map(|gas| gas.to_string()).unwrap_or_else(|| "0".to_string()),
            gas_price_formatted: tx
                .effective_gas_price
                .map(format_gwei)
                .unwrap_or_else(|| "0".to_string()),
            gas_fee_formatted: tx.gas_fee.map(format_ether).unwrap_or_else(|| "0".to_string()),
            gas_used: tx.gas_used,
            effective_gas_price: tx.effective_gas_price,
            gas_fee: tx.gas_fee,
            status: tx.status.and_then(|status| u32::try_from(status).ok()),
            timestamp: tx.timestamp.map(|ts| ts.value()),
            timestamp_source: tx.timestamp.map(|ts| ts.source()),
            datetime,
        }
    }
}

/// Plain native-value transfer. Never populated; kept for a stable shape.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EthTransfer {
    pub tx_hash: H256,
    pub value_formatted: String,
    pub from: H160,
    pub to: H160,
}

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    #[serde(rename = "totalTransactions")]
    pub total_transactions: u32,
    #[serde(rename = "totalETHTransfers")]
    pub total_eth_transfers: u32,
    #[serde(rename = "totalEthTransfersIn")]
    pub total_eth_transfers_in: u32,
    #[serde(rename = "totalEthTransfersOut")]
    pub total_eth_transfers_out: u32,
    #[serde(rename = "totalNFTTransfers")]
    pub total_nft_transfers: u32,
    #[serde(rename = "totalNFTCollections")]
    pub total_nft_collections: u32,
    #[serde(rename = "totalERC20Transfers")]
    pub total_erc20_transfers: u32,
    #[serde(rename = "totalERC20Approvals")]
    pub total_erc20_approvals: u32,
    #[serde(rename = "totalERC20Tokens")]
    pub total_erc20_tokens: u32,
    #[serde(rename = "totalGasPaid")]
    pub total_gas_paid: String,
    #[serde(rename = "totalGasPaidWei", serialize_with = "decimal::serialize")]
    pub total_gas_paid_wei: U512,
    #[serde(rename = "totalEthVolumeIn")]
    pub total_eth_volume_in: String,
    #[serde(rename = "totalEthVolumeInWei", serialize_with = "decimal::serialize")]
    pub total_eth_volume_in_wei: U512,
    #[serde(rename = "totalEthVolumeOut")]
    pub total_eth_volume_out: String,
    #[serde(rename = "totalEthVolumeOutWei", serialize_with = "decimal::serialize")]
    pub total_eth_volume_out_wei: U512,
    #[serde(rename = "totalEoaTransactionsSent")]
    pub total_eoa_transactions_sent: u32,
    #[serde(rename = "scannedBlocks", serialize_with = "decimal::serialize")]
    pub scanned_blocks: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountReport {
    pub address: String,
    pub summary: Summary,
    pub transactions: Vec<TransactionView>,
    pub nft_transfers: Vec<NftTransferRecord>,
    pub nft_collections: Vec<CollectionEntry>,
    pub eth_transfers: Vec<EthTransfer>,
    pub erc20_transfers: Vec<serde_json::Value>,
    pub erc20_approvals: Vec<serde_json::Value>,
}

fn count<T>(items: &[T]) -> u32 {
    u32::try_from(items.len()).unwrap_or(u32::MAX)
}

pub fn build_report(state: ScanState) -> AccountReport {
    let totals = state.totals;
    let transactions: Vec<TransactionView> = sort_newest_first(state.transactions)
        .into_iter()
        .map(TransactionView::from)
        .collect();
    let nft_transfers = sort_newest_first(state.nft_transfers);

    let summary = Summary {
        total_transactions: count(&transactions),
        total_eth_transfers: totals.count_in.saturating_add(totals.count_out),
        total_eth_transfers_in: totals.count_in,
        total_eth_transfers_out: totals.count_out,
        total_nft_transfers: count(&nft_transfers),
        total_nft_collections: count(&state.collections),
        total_erc20_transfers: 0,
        total_erc20_approvals: 0,
        total_erc20_tokens: 0,
        total_gas_paid: format_ether(totals.total_gas_paid),
        total_gas_paid_wei: totals.total_gas_paid,
        total_eth_volume_in: format_ether(totals.total_volume_in),
        total_eth_volume_in_wei: totals.total_volume_in,
        total_eth_volume_out: format_ether(totals.total_volume_out),
        total_eth_volume_out_wei: totals.total_volume_out,
        total_eoa_transactions_sent: totals.eoa_sent_count,
        scanned_blocks: totals.highest_block_scanned,
    };

    AccountReport {
        address: address::to_canonical(&state.target),
        summary,
        transactions,
        nft_transfers,
        nft_collections: state.collections,
        eth_transfers: Vec::new(),
        erc20_transfers: Vec::new(),
        erc20_approvals: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AggregateTotals, Timestamp};
    use crate::signatures::TokenType;

    fn nft(timestamp: Option<u64>, block_number: u64) -> NftTransferRecord {
        NftTransferRecord {
            transaction_hash: H256::from_low_u64_be(block_number),
            block_number,
            timestamp,
            contract_address: H160::repeat_byte(0x77),
            token_id: U256::from(block_number),
            from: H160::zero(),
            to: H160::repeat_byte(0x11),
            token_type: TokenType::Erc721,
            amount: None,
            metadata: None,
        }
    }

    fn order(items: &[NftTransferRecord]) -> Vec<(Option<u64>, u64)> {
        items.iter().map(|t| (t.timestamp, t.block_number)).collect()
    }

    #[test]
    fn test_format_units() {
        assert_eq!(format_ether(U256::exp10(18)), "1");
        assert_eq!(format_ether(U256::zero()), "0");
        assert_eq!(format_ether(U256::from(1_500_000_000_000_000_000u64)), "1.5");
        assert_eq!(format_ether(U256::from(1u64)), "0.000000000000000001");
        assert_eq!(format_ether(U512::from(21_000u64) * U512::from(1_000_000_000u64)), "0.000021");
        assert_eq!(format_gwei(U256::from(1_000_000_000u64)), "1");
        assert_eq!(format_gwei(U256::from(52_500_000_000u64)), "52.5");
    }

    #[test]
    fn test_sort_timestamps_descending() {
        let sorted = sort_newest_first(vec![nft(Some(100), 1), nft(Some(300), 3), nft(Some(200), 2)]);
        assert_eq!(order(&sorted), vec![(Some(300), 3), (Some(200), 2), (Some(100), 1)]);
    }

    #[test]
    fn test_sort_untimed_record_between_timed_neighbours() {
        let sorted = sort_newest_first(vec![nft(Some(100), 1), nft(None, 5), nft(Some(300), 9)]);
        assert_eq!(order(&sorted), vec![(Some(300), 9), (None, 5), (Some(100), 1)]);
    }

    #[test]
    fn test_sort_untimed_outranks_older_blocks() {
        // The untimed record has the highest block, so block-number comparison
        // places it ahead of both timed records.
        let sorted = sort_newest_first(vec![nft(Some(100), 1), nft(None, 5), nft(Some(300), 2)]);
        assert_eq!(order(&sorted), vec![(None, 5), (Some(300), 2), (Some(100), 1)]);
    }

    #[test]
    fn test_sort_ties_keep_insertion_order() {
        let mut first = nft(None, 4);
        first.token_id = U256::from(1u64);
        let mut second = nft(None, 4);
        second.token_id = U256::from(2u64);
        let mut third = nft(Some(50), 4);
        third.token_id = U256::from(3u64);

        let sorted = sort_newest_first(vec![first, third, second]);
        let ids: Vec<U256> = sorted.iter().map(|t| t.token_id).collect();
        assert_eq!(ids, vec![U256::from(1u64), U256::from(3u64), U256::from(2u64)]);
    }

    #[test]
    fn test_proxy_timestamps_sort_by_block() {
        let record = |block: u64, timestamp: Timestamp| TransactionRecord {
            hash: H256::from_low_u64_be(block),
            block_hash: None,
            block_number: Some(block),
            transaction_index: None,
            nonce: None,
            from: None,
            to: None,
            value: None,
            gas_used: None,
            effective_gas_price: None,
            gas_fee: None,
            status: None,
            timestamp: Some(timestamp),
        };

        let sorted = sort_newest_first(vec![
            record(10, Timestamp::proxy_for(10)),
            record(30, Timestamp::Block(1_700_000_000)),
            record(20, Timestamp::proxy_for(20)),
        ]);
        let blocks: Vec<Option<u64>> = sorted.iter().map(|t| t.block_number).collect();
        assert_eq!(blocks, vec![Some(30), Some(20), Some(10)]);
    }

    #[test]
    fn test_report_shape_and_wire_format() {
        let state = ScanState {
            target: "0xabcabcabcabcabcabcabcabcabcabcabcabcabca".parse().unwrap(),
            transactions: vec![],
            nft_transfers: vec![nft(Some(1_700_000_000), 12)],
            collections: vec![CollectionEntry {
                contract_address: H160::repeat_byte(0x77),
                name: None,
                symbol: None,
                token_count: 1,
            }],
            totals: AggregateTotals {
                total_volume_in: U512::from(U256::exp10(18)),
                count_in: 1,
                highest_block_scanned: 12_345,
                ..Default::default()
            },
        };

        let json = serde_json::to_value(build_report(state)).unwrap();
        assert_eq!(json["address"], "0xabcabcabcabcabcabcabcabcabcabcabcabcabca");
        assert_eq!(json["summary"]["totalEthVolumeIn"], "1");
        assert_eq!(json["summary"]["totalEthVolumeInWei"], "1000000000000000000");
        assert_eq!(json["summary"]["totalETHTransfers"], 1);
        assert_eq!(json["summary"]["scannedBlocks"], "12345");
        assert_eq!(json["summary"]["totalNFTCollections"], 1);
        assert_eq!(json["nftTransfers"][0]["blockNumber"], "12");
        assert_eq!(json["nftTransfers"][0]["tokenId"], "12");
        assert_eq!(json["nftTransfers"][0]["tokenType"], "ERC-721");
        assert_eq!(json["nftCollections"][0]["tokenCount"], 1);
        assert_eq!(json["ethTransfers"], serde_json::json!([]));
        assert_eq!(json["erc20Transfers"], serde_json::json!([]));
        assert_eq!(json["erc20Approvals"], serde_json::json!([]));
    }

    #[test]
    fn test_counts_and_status_are_plain_numbers() {
        let state = ScanState {
            target: H160::repeat_byte(0xab),
            transactions: vec![TransactionRecord {
                hash: H256::repeat_byte(0x01),
                block_hash: None,
                block_number: Some(9),
                transaction_index: Some(0),
                nonce: None,
                from: None,
                to: None,
                value: Some(U256::exp10(18)),
                gas_used: None,
                effective_gas_price: None,
                gas_fee: None,
                status: Some(1),
                timestamp: Some(Timestamp::Block(1_700_000_000)),
            }],
            nft_transfers: vec![nft(None, 3), nft(None, 4)],
            collections: vec![],
            totals: AggregateTotals::default(),
        };

        let json = serde_json::to_value(build_report(state)).unwrap();
        assert_eq!(json["summary"]["totalTransactions"], serde_json::json!(1));
        assert_eq!(json["summary"]["totalNFTTransfers"], serde_json::json!(2));
        assert_eq!(json["summary"]["totalNFTCollections"], serde_json::json!(0));
        assert_eq!(json["transactions"][0]["status"], serde_json::json!(1));
        assert_eq!(json["transactions"][0]["blockNumber"], "9");
        assert_eq!(json["transactions"][0]["timestamp"], "1700000000");
        assert_eq!(json["transactions"][0]["timestampSource"], "block");
    }
}
