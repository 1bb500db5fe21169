use std::collections::HashMap;
use std::fmt;

use ethers::utils::keccak256;
use ethers_core::types::H256;
use serde::Serialize;

#[cfg(test)]
pub const ERC721_TRANSFER_SIGNATURE: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";
#[cfg(test)]
pub const ERC1155_TRANSFER_SINGLE_SIGNATURE: &str =
    "0xc3d58168c5ae7397731d063d5bbf3d657854427343f4c083240f7aacaa2d0f62";
#[cfg(test)]
pub const ERC1155_TRANSFER_BATCH_SIGNATURE: &str =
    "0x4a39dc06d4c0dbc64b70af90fd698a233a518aa5d07e595d983b8c0526c8f7fb";

const TRANSFER_EVENT: &str = "Transfer(address,address,uint256)";
const TRANSFER_SINGLE_EVENT: &str = "TransferSingle(address,address,address,uint256,uint256)";
const TRANSFER_BATCH_EVENT: &str = "TransferBatch(address,address,address,uint256[],uint256[])";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Erc721Transfer,
    Erc1155TransferSingle,
    Erc1155TransferBatch,
}

impl EventKind {
    pub fn token_type(&self) -> TokenType {
        match self {
            EventKind::Erc721Transfer => TokenType::Erc721,
            EventKind::Erc1155TransferSingle | EventKind::Erc1155TransferBatch => TokenType::Erc1155,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Erc721Transfer => "ERC-721 Transfer",
            EventKind::Erc1155TransferSingle => "ERC-1155 TransferSingle",
            EventKind::Erc1155TransferBatch => "ERC-1155 TransferBatch",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TokenType {
    #[serde(rename = "ERC-721")]
    Erc721,
    #[serde(rename = "ERC-1155")]
    Erc1155,
}

/// Where each semantic field of an event lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldLayout {
    /// `from`, `to`, `tokenId` are topics 1..=3.
    IndexedTransfer,
    /// `from`, `to` are topics 1..=2, `tokenId` is the single payload word.
    IndexedParticipants,
    /// `operator`, `from`, `to` are topics 1..=3, `id` and `value` are payload words.
    OperatorSingle,
    /// `operator`, `from`, `to` are topics 1..=3, `ids[]` and `values[]` are in the payload.
    OperatorBatch,
}

impl FieldLayout {
    /// Topic count including topic0.
    pub fn topic_count(&self) -> usize {
        match self {
            FieldLayout::IndexedParticipants => 3,
            FieldLayout::IndexedTransfer
            | FieldLayout::OperatorSingle
            | FieldLayout::OperatorBatch => 4,
        }
    }

    /// Exact payload size for static layouts; `None` for dynamic arrays.
    pub fn payload_len(&self) -> Option<usize> {
        match self {
            FieldLayout::IndexedTransfer => Some(0),
            FieldLayout::IndexedParticipants => Some(32),
            FieldLayout::OperatorSingle => Some(64),
            FieldLayout::OperatorBatch => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodingRule {
    pub kind: EventKind,
    pub layout: FieldLayout,
}

/// Maps topic0 hashes to decoding rules. The ERC-721 layout is fixed at
/// construction from `has_indexed_to_and_from_topics`, never inferred per log.
#[derive(Debug, Clone)]
pub struct EventSignatureRegistry {
    rules: HashMap<H256, DecodingRule>,
}

impl EventSignatureRegistry {
    pub fn new(has_indexed_to_and_from_topics: bool) -> Self {
        let transfer_layout = if has_indexed_to_and_from_topics {
            FieldLayout::IndexedTransfer
        } else {
            FieldLayout::IndexedParticipants
        };

        let mut rules = HashMap::new();
        rules.insert(
            Self::topic0(EventKind::Erc721Transfer),
            DecodingRule {
                kind: EventKind::Erc721Transfer,
                layout: transfer_layout,
            },
        );
        rules.insert(
            Self::topic0(EventKind::Erc1155TransferSingle),
            DecodingRule {
                kind: EventKind::Erc1155TransferSingle,
                layout: FieldLayout::OperatorSingle,
            },
        );
        rules.insert(
            Self::topic0(EventKind::Erc1155TransferBatch),
            DecodingRule {
                kind: EventKind::Erc1155TransferBatch,
                layout: FieldLayout::OperatorBatch,
            },
        );

        Self { rules }
    }

    pub fn topic0(kind: EventKind) -> H256 {
        let signature = match kind {
            EventKind::Erc721Transfer => TRANSFER_EVENT,
            EventKind::Erc1155TransferSingle => TRANSFER_SINGLE_EVENT,
            EventKind::Erc1155TransferBatch => TRANSFER_BATCH_EVENT,
        };
        H256::from(keccak256(signature))
    }

    pub fn rule_for(&self, topic0: &H256) -> Option<&DecodingRule> {
        self.rules.get(topic0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_hashes_match_known_constants() {
        assert_eq!(
            format!("{:#x}", EventSignatureRegistry::topic0(EventKind::Erc721Transfer)),
            ERC721_TRANSFER_SIGNATURE
        );
        assert_eq!(
            format!("{:#x}", EventSignatureRegistry::topic0(EventKind::Erc1155TransferSingle)),
            ERC1155_TRANSFER_SINGLE_SIGNATURE
        );
        assert_eq!(
            format!("{:#x}", EventSignatureRegistry::topic0(EventKind::Erc1155TransferBatch)),
            ERC1155_TRANSFER_BATCH_SIGNATURE
        );
    }

    #[test]
    fn test_transfer_layout_follows_flag() {
        let topic = EventSignatureRegistry::topic0(EventKind::Erc721Transfer);

        let indexed = EventSignatureRegistry::new(true);
        assert_eq!(indexed.rule_for(&topic).unwrap().layout, FieldLayout::IndexedTransfer);

        let body = EventSignatureRegistry::new(false);
        assert_eq!(body.rule_for(&topic).unwrap().layout, FieldLayout::IndexedParticipants);
    }

    #[test]
    fn test_unknown_topic_has_no_rule() {
        let registry = EventSignatureRegistry::new(true);
        assert!(registry.rule_for(&H256::zero()).is_none());
    }
}
