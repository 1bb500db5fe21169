use ethers_core::types::{Bytes, H160, H256, U256, U512};
use serde::{Deserialize, Serialize};

use crate::signatures::TokenType;

/// Large integers go over the wire as decimal strings.
pub mod decimal {
    use serde::Serializer;
    use std::fmt::Display;

    pub fn serialize<T: Display, S: Serializer>(value: &T, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn option<T: Display, S: Serializer>(
        value: &Option<T>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(value) => serializer.collect_str(value),
            None => serializer.serialize_none(),
        }
    }
}

/// Off-type metadata fields degrade to something usable instead of failing
/// the whole document.
mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
        Ok(match Value::deserialize(deserializer)? {
            Value::String(value) => Some(value),
            Value::Number(value) => Some(value.to_string()),
            Value::Bool(value) => Some(value.to_string()),
            _ => None,
        })
    }

    pub fn array<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Value>, D::Error> {
        Ok(match Value::deserialize(deserializer)? {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => vec![other],
        })
    }
}

// Records as the streaming source hands them over. Every field the source may
// omit is optional.

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawBlock {
    pub number: u64,
    pub hash: Option<H256>,
    pub timestamp: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTransaction {
    pub hash: Option<H256>,
    pub nonce: Option<U256>,
    pub block_hash: Option<H256>,
    pub block_number: Option<u64>,
    pub transaction_index: Option<u64>,
    pub from: Option<H160>,
    pub to: Option<H160>,
    pub value: Option<U256>,
    pub gas_used: Option<U256>,
    pub effective_gas_price: Option<U256>,
    pub status: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTrace {
    pub from: Option<H160>,
    pub to: Option<H160>,
    pub value: Option<U256>,
    pub transaction_hash: Option<H256>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawLog {
    pub address: Option<H160>,
    pub topics: Vec<H256>,
    pub data: Bytes,
    pub transaction_hash: Option<H256>,
    pub block_number: Option<u64>,
    pub log_index: Option<u64>,
}

/// One resume of the streaming query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    pub blocks: Vec<RawBlock>,
    pub transactions: Vec<RawTransaction>,
    pub traces: Vec<RawTrace>,
    pub logs: Vec<RawLog>,
    pub next_block: u64,
}

pub const PROXY_TIMESTAMP_MULTIPLIER: u64 = 100_000;

/// A display timestamp. `BlockNumberProxy` only preserves block ordering and
/// is not a Unix time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timestamp {
    Block(u64),
    BlockNumberProxy(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TimestampSource {
    Block,
    BlockNumberProxy,
}

impl Timestamp {
    pub fn proxy_for(block_number: u64) -> Self {
        Timestamp::BlockNumberProxy(block_number.saturating_mul(PROXY_TIMESTAMP_MULTIPLIER))
    }

    pub fn value(&self) -> u64 {
        match self {
            Timestamp::Block(ts) | Timestamp::BlockNumberProxy(ts) => *ts,
        }
    }

    pub fn block_time(&self) -> Option<u64> {
        match self {
            Timestamp::Block(ts) => Some(*ts),
            Timestamp::BlockNumberProxy(_) => None,
        }
    }

    pub fn source(&self) -> TimestampSource {
        match self {
            Timestamp::Block(_) => TimestampSource::Block,
            Timestamp::BlockNumberProxy(_) => TimestampSource::BlockNumberProxy,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    pub hash: H256,
    pub block_hash: Option<H256>,
    pub block_number: Option<u64>,
    pub transaction_index: Option<u64>,
    pub nonce: Option<U256>,
    pub from: Option<H160>,
    pub to: Option<H160>,
    pub value: Option<U256>,
    pub gas_used: Option<U256>,
    pub effective_gas_price: Option<U256>,
    pub gas_fee: Option<U512>,
    pub status: Option<u64>,
    pub timestamp: Option<Timestamp>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NftMetadata {
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient::string", skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(
        default,
        alias = "animation_url",
        deserialize_with = "lenient::string",
        skip_serializing_if = "Option::is_none"
    )]
    pub animation_url: Option<String>,
    #[serde(default, deserialize_with = "lenient::array", skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NftTransferRecord {
    pub transaction_hash: H256,
    #[serde(serialize_with = "decimal::serialize")]
    pub block_number: u64,
    #[serde(serialize_with = "decimal::option")]
    pub timestamp: Option<u64>,
    pub contract_address: H160,
    #[serde(serialize_with = "decimal::serialize")]
    pub token_id: U256,
    pub from: H160,
    pub to: H160,
    pub token_type: TokenType,
    #[serde(serialize_with = "decimal::option", skip_serializing_if = "Option::is_none")]
    pub amount: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<NftMetadata>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionEntry {
    pub contract_address: H160,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    pub token_count: u32,
}

/// Running totals. Every field only grows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateTotals {
    pub total_gas_paid: U512,
    pub total_volume_in: U512,
    pub total_volume_out: U512,
    pub count_in: u32,
    pub count_out: u32,
    pub eoa_sent_count: u32,
    pub highest_block_scanned: u64,
}

impl AggregateTotals {
    pub fn record_outgoing(&mut self, value: U256) {
        self.total_volume_out = self.total_volume_out.saturating_add(U512::from(value));
        self.count_out = self.count_out.saturating_add(1);
    }

    pub fn record_incoming(&mut self, value: U256) {
        self.total_volume_in = self.total_volume_in.saturating_add(U512::from(value));
        self.count_in = self.count_in.saturating_add(1);
    }

    pub fn record_gas(&mut self, fee: U512) {
        self.total_gas_paid = self.total_gas_paid.saturating_add(fee);
        self.eoa_sent_count = self.eoa_sent_count.saturating_add(1);
    }

    /// Adds the deltas of one staged batch.
    pub fn absorb(&mut self, delta: &AggregateTotals) {
        self.total_gas_paid = self.total_gas_paid.saturating_add(delta.total_gas_paid);
        self.total_volume_in = self.total_volume_in.saturating_add(delta.total_volume_in);
        self.total_volume_out = self.total_volume_out.saturating_add(delta.total_volume_out);
        self.count_in = self.count_in.saturating_add(delta.count_in);
        self.count_out = self.count_out.saturating_add(delta.count_out);
        self.eoa_sent_count = self.eoa_sent_count.saturating_add(delta.eoa_sent_count);
        self.highest_block_scanned = self.highest_block_scanned.max(delta.highest_block_scanned);
    }
}
