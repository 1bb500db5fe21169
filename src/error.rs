use thiserror::Error;

use crate::signatures::EventKind;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("Invalid Ethereum address provided: {0:?}")]
    Invalid(String),
}

/// Per-log failure. The log is skipped, the batch carries on.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Log has no topic0")]
    MissingTopic0,

    #[error("{kind} log needs {expected} topics, found {found}")]
    TooFewTopics {
        kind: EventKind,
        expected: usize,
        found: usize,
    },

    #[error("{kind} log needs a {expected}-byte payload, found {found}")]
    BadPayloadLength {
        kind: EventKind,
        expected: usize,
        found: usize,
    },

    #[error("ABI decode error: {0}")]
    AbiDecode(String),
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("RPC error: {0}")]
    Rpc(String),
}

impl StreamError {
    pub fn rpc(err: impl std::fmt::Display) -> Self {
        Self::Rpc(err.to_string())
    }
}

/// Metadata side-channel failure. Never leaves the enricher.
#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error("Metadata fetch timed out")]
    Timeout,

    #[error("HTTP error! status: {0}")]
    Http(u16),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Decode error: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum AggregationError {
    #[error(transparent)]
    InvalidAddress(#[from] AddressError),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Scan cancelled after block {highest_block}")]
    Cancelled { highest_block: u64 },
}
