use ethers::abi::{self, ParamType, Token};
use ethers_core::types::{H160, H256, U256};

use crate::error::DecodeError;
use crate::models::RawLog;
use crate::signatures::{DecodingRule, EventKind, EventSignatureRegistry, FieldLayout};

/// A transfer decoded from one log, before attribution to any address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTransfer {
    pub kind: EventKind,
    pub operator: Option<H160>,
    pub from: H160,
    pub to: H160,
    pub token_id: U256,
    pub amount: Option<U256>,
}

impl DecodedTransfer {
    pub fn involves(&self, target: &H160) -> bool {
        self.from == *target || self.to == *target
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutcome {
    Transfer(DecodedTransfer),
    /// Recognized by signature but deliberately not decoded.
    Skipped(EventKind),
    Unrecognized,
}

#[derive(Debug, Clone)]
pub struct LogDecoder {
    registry: EventSignatureRegistry,
}

impl LogDecoder {
    pub fn new(registry: EventSignatureRegistry) -> Self {
        Self { registry }
    }

    pub fn decode(&self, log: &RawLog) -> Result<LogOutcome, DecodeError> {
        let topic0 = log.topics.first().ok_or(DecodeError::MissingTopic0)?;
        let rule = match self.registry.rule_for(topic0) {
            Some(rule) => *rule,
            None => return Ok(LogOutcome::Unrecognized),
        };

        let expected = rule.layout.topic_count();
        if log.topics.len() < expected {
            return Err(DecodeError::TooFewTopics {
                kind: rule.kind,
                expected,
                found: log.topics.len(),
            });
        }

        if rule.layout == FieldLayout::OperatorBatch {
            return Ok(LogOutcome::Skipped(rule.kind));
        }

        if let Some(expected) = rule.layout.payload_len() {
            if log.data.len() != expected {
                return Err(DecodeError::BadPayloadLength {
                    kind: rule.kind,
                    expected,
                    found: log.data.len(),
                });
            }
        }

        decode_transfer(&rule, &log.topics, &log.data).map(LogOutcome::Transfer)
    }
}

fn decode_transfer(rule: &DecodingRule, topics: &[H256], data: &[u8]) -> Result<DecodedTransfer, DecodeError> {
    match rule.layout {
        FieldLayout::IndexedTransfer => Ok(DecodedTransfer {
            kind: rule.kind,
            operator: None,
            from: topic_to_address(&topics[1]),
            to: topic_to_address(&topics[2]),
            token_id: topic_to_uint(&topics[3]),
            amount: None,
        }),
        FieldLayout::IndexedParticipants => {
            let mut words = decode_words(data, 1)?.into_iter();
            Ok(DecodedTransfer {
                kind: rule.kind,
                operator: None,
                from: topic_to_address(&topics[1]),
                to: topic_to_address(&topics[2]),
                token_id: next_word(&mut words)?,
                amount: None,
            })
        }
        FieldLayout::OperatorSingle => {
            let mut words = decode_words(data, 2)?.into_iter();
            Ok(DecodedTransfer {
                kind: rule.kind,
                operator: Some(topic_to_address(&topics[1])),
                from: topic_to_address(&topics[2]),
                to: topic_to_address(&topics[3]),
                token_id: next_word(&mut words)?,
                amount: Some(next_word(&mut words)?),
            })
        }
        FieldLayout::OperatorBatch => Err(DecodeError::AbiDecode(format!(
            "{} payloads are not decoded",
            rule.kind
        ))),
    }
}

/// Low 20 bytes of the word.
pub fn topic_to_address(topic: &H256) -> H160 {
    H160::from(*topic)
}

pub fn topic_to_uint(topic: &H256) -> U256 {
    U256::from_big_endian(topic.as_bytes())
}

fn decode_words(data: &[u8], count: usize) -> Result<Vec<Token>, DecodeError> {
    let params = vec![ParamType::Uint(256); count];
    abi::decode(&params, data).map_err(|e| DecodeError::AbiDecode(e.to_string()))
}

fn next_word(words: &mut impl Iterator<Item = Token>) -> Result<U256, DecodeError> {
    words
        .next()
        .and_then(Token::into_uint)
        .ok_or_else(|| DecodeError::AbiDecode("expected uint256 word".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signatures::{ERC1155_TRANSFER_BATCH_SIGNATURE, ERC1155_TRANSFER_SINGLE_SIGNATURE, ERC721_TRANSFER_SIGNATURE};
    use ethers_core::types::Bytes;

    fn h256(s: &str) -> H256 {
        s.parse().unwrap()
    }

    fn address_topic(address: &str) -> H256 {
        h256(&format!("0x000000000000000000000000{}", &address[2..]))
    }

    fn uint_word(value: u64) -> [u8; 32] {
        let mut word = [0u8; 32];
        U256::from(value).to_big_endian(&mut word);
        word
    }

    fn log(topics: Vec<H256>, data: Vec<u8>) -> RawLog {
        RawLog {
            address: Some(H160::repeat_byte(0x77)),
            topics,
            data: Bytes::from(data),
            transaction_hash: Some(H256::repeat_byte(0x01)),
            block_number: Some(10),
            log_index: Some(0),
        }
    }

    const ALICE: &str = "0x1111111111111111111111111111111111111111";
    const BOB: &str = "0x2222222222222222222222222222222222222222";

    #[test]
    fn test_topic_address_is_lowercased_low_bytes() {
        let topic = h256("0x000000000000000000000000AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA");
        assert_eq!(
            format!("0x{:x}", topic_to_address(&topic)),
            "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
        );
    }

    #[test]
    fn test_token_id_topic_decodes_to_decimal() {
        let topic = h256("0x000000000000000000000000000000000000000000000000000000000000002a");
        assert_eq!(topic_to_uint(&topic).to_string(), "42");
    }

    #[test]
    fn test_erc721_all_indexed() {
        let decoder = LogDecoder::new(EventSignatureRegistry::new(true));
        let raw = log(
            vec![
                h256(ERC721_TRANSFER_SIGNATURE),
                address_topic(ALICE),
                address_topic(BOB),
                h256("0x000000000000000000000000000000000000000000000000000000000000002a"),
            ],
            vec![],
        );

        let LogOutcome::Transfer(transfer) = decoder.decode(&raw).unwrap() else {
            panic!("expected transfer");
        };
        assert_eq!(transfer.kind, EventKind::Erc721Transfer);
        assert_eq!(transfer.from, ALICE.parse().unwrap());
        assert_eq!(transfer.to, BOB.parse().unwrap());
        assert_eq!(transfer.token_id, U256::from(42u64));
        assert_eq!(transfer.amount, None);
    }

    #[test]
    fn test_erc721_with_three_topics_is_malformed_under_indexed_layout() {
        let decoder = LogDecoder::new(EventSignatureRegistry::new(true));
        // ERC-20 style Transfer: value lives in the payload.
        let raw = log(
            vec![h256(ERC721_TRANSFER_SIGNATURE), address_topic(ALICE), address_topic(BOB)],
            uint_word(1_000).to_vec(),
        );

        assert_eq!(
            decoder.decode(&raw),
            Err(DecodeError::TooFewTopics {
                kind: EventKind::Erc721Transfer,
                expected: 4,
                found: 3,
            })
        );
    }

    #[test]
    fn test_erc721_token_id_from_payload() {
        let decoder = LogDecoder::new(EventSignatureRegistry::new(false));
        let raw = log(
            vec![h256(ERC721_TRANSFER_SIGNATURE), address_topic(ALICE), address_topic(BOB)],
            uint_word(7).to_vec(),
        );

        let LogOutcome::Transfer(transfer) = decoder.decode(&raw).unwrap() else {
            panic!("expected transfer");
        };
        assert_eq!(transfer.token_id, U256::from(7u64));
        assert_eq!(transfer.to, BOB.parse().unwrap());
    }

    #[test]
    fn test_erc721_payload_layout_rejects_short_payload() {
        let decoder = LogDecoder::new(EventSignatureRegistry::new(false));
        let raw = log(
            vec![h256(ERC721_TRANSFER_SIGNATURE), address_topic(ALICE), address_topic(BOB)],
            vec![0u8; 16],
        );

        assert!(matches!(
            decoder.decode(&raw),
            Err(DecodeError::BadPayloadLength { expected: 32, found: 16, .. })
        ));
    }

    #[test]
    fn test_erc1155_transfer_single() {
        let decoder = LogDecoder::new(EventSignatureRegistry::new(true));
        let operator = "0x3333333333333333333333333333333333333333";
        let mut data = uint_word(5).to_vec();
        data.extend_from_slice(&uint_word(12));
        let raw = log(
            vec![
                h256(ERC1155_TRANSFER_SINGLE_SIGNATURE),
                address_topic(operator),
                address_topic(ALICE),
                address_topic(BOB),
            ],
            data,
        );

        let LogOutcome::Transfer(transfer) = decoder.decode(&raw).unwrap() else {
            panic!("expected transfer");
        };
        assert_eq!(transfer.kind, EventKind::Erc1155TransferSingle);
        assert_eq!(transfer.operator, Some(operator.parse().unwrap()));
        assert_eq!(transfer.from, ALICE.parse().unwrap());
        assert_eq!(transfer.to, BOB.parse().unwrap());
        assert_eq!(transfer.token_id, U256::from(5u64));
        assert_eq!(transfer.amount, Some(U256::from(12u64)));
    }

    #[test]
    fn test_erc1155_transfer_single_rejects_odd_payload() {
        let decoder = LogDecoder::new(EventSignatureRegistry::new(true));
        let raw = log(
            vec![
                h256(ERC1155_TRANSFER_SINGLE_SIGNATURE),
                address_topic(ALICE),
                address_topic(ALICE),
                address_topic(BOB),
            ],
            uint_word(5).to_vec(),
        );

        assert!(matches!(
            decoder.decode(&raw),
            Err(DecodeError::BadPayloadLength { expected: 64, found: 32, .. })
        ));
    }

    #[test]
    fn test_transfer_batch_is_detected_but_skipped() {
        let decoder = LogDecoder::new(EventSignatureRegistry::new(true));
        let raw = log(
            vec![
                h256(ERC1155_TRANSFER_BATCH_SIGNATURE),
                address_topic(ALICE),
                address_topic(ALICE),
                address_topic(BOB),
            ],
            vec![0u8; 256],
        );

        assert_eq!(
            decoder.decode(&raw),
            Ok(LogOutcome::Skipped(EventKind::Erc1155TransferBatch))
        );
    }

    #[test]
    fn test_unknown_and_empty_topics() {
        let decoder = LogDecoder::new(EventSignatureRegistry::new(true));
        assert_eq!(
            decoder.decode(&log(vec![H256::repeat_byte(0x09)], vec![])),
            Ok(LogOutcome::Unrecognized)
        );
        assert_eq!(decoder.decode(&log(vec![], vec![])), Err(DecodeError::MissingTopic0));
    }

    #[test]
    fn test_involves_checks_both_endpoints() {
        let transfer = DecodedTransfer {
            kind: EventKind::Erc721Transfer,
            operator: None,
            from: ALICE.parse().unwrap(),
            to: BOB.parse().unwrap(),
            token_id: U256::one(),
            amount: None,
        };
        assert!(transfer.involves(&ALICE.parse().unwrap()));
        assert!(transfer.involves(&BOB.parse().unwrap()));
        assert!(!transfer.involves(&H160::zero()));
    }
}
