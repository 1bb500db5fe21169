//! Derived token holdings for one ERC-721 contract.
//!
//! Holdings are inferred purely from transfer direction within the scanned
//! block range. They are not verified balances: a token can still show up
//! under an address that moved it out in a block this view never saw.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use ethers_core::types::{H160, U256};
use log::debug;
use serde::Serialize;

use crate::decoder::{DecodedTransfer, LogDecoder, LogOutcome};
use crate::error::AggregationError;
use crate::indexer::BatchFolder;
use crate::models::Batch;
use crate::signatures::EventKind;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HoldingState {
    pub token_ids: BTreeSet<U256>,
    pub transfers_in: u32,
    pub transfers_out: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HolderEntry {
    pub address: H160,
    pub token_ids: Vec<String>,
    pub transfers_in: u32,
    pub transfers_out: u32,
}

pub struct HoldingsView {
    contract: H160,
    decoder: LogDecoder,
    holders: BTreeMap<H160, HoldingState>,
}

impl HoldingsView {
    pub fn new(contract: H160, decoder: LogDecoder) -> Self {
        Self {
            contract,
            decoder,
            holders: BTreeMap::new(),
        }
    }

    pub fn apply(&mut self, transfer: &DecodedTransfer) {
        let sender = self.holders.entry(transfer.from).or_default();
        sender.token_ids.remove(&transfer.token_id);
        sender.transfers_out += 1;

        let receiver = self.holders.entry(transfer.to).or_default();
        receiver.token_ids.insert(transfer.token_id);
        receiver.transfers_in += 1;
    }

    /// Holders with strictly more than `threshold` token ids, by address.
    pub fn into_report(self, threshold: usize) -> Vec<HolderEntry> {
        self.holders
            .into_iter()
            .filter(|(_, state)| state.token_ids.len() > threshold)
            .map(|(address, state)| HolderEntry {
                address,
                token_ids: state.token_ids.iter().map(|id| id.to_string()).collect(),
                transfers_in: state.transfers_in,
                transfers_out: state.transfers_out,
            })
            .collect()
    }
}

#[async_trait]
impl BatchFolder for HoldingsView {
    async fn fold(&mut self, batch: Batch) -> Result<(), AggregationError> {
        for log in &batch.logs {
            if log.address != Some(self.contract) {
                continue;
            }
            match self.decoder.decode(log) {
                Ok(LogOutcome::Transfer(transfer)) if transfer.kind == EventKind::Erc721Transfer => {
                    self.apply(&transfer)
                }
                Ok(_) => {}
                Err(e) => debug!("Skipping malformed transfer log: {}", e),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawLog;
    use crate::signatures::EventSignatureRegistry;
    use ethers_core::types::{Bytes, H256};

    fn transfer(from: H160, to: H160, token_id: u64) -> DecodedTransfer {
        DecodedTransfer {
            kind: EventKind::Erc721Transfer,
            operator: None,
            from,
            to,
            token_id: U256::from(token_id),
            amount: None,
        }
    }

    fn view(contract: H160) -> HoldingsView {
        HoldingsView::new(contract, LogDecoder::new(EventSignatureRegistry::new(true)))
    }

    #[test]
    fn test_mint_and_move() {
        let alice = H160::repeat_byte(0x11);
        let bob = H160::repeat_byte(0x22);
        let mut holdings = view(H160::repeat_byte(0x77));

        holdings.apply(&transfer(H160::zero(), alice, 1));
        holdings.apply(&transfer(H160::zero(), alice, 2));
        holdings.apply(&transfer(alice, bob, 1));

        let alice_state = holdings.holders.get(&alice).unwrap();
        assert_eq!(alice_state.token_ids, BTreeSet::from([U256::from(2u64)]));
        assert_eq!(alice_state.transfers_in, 2);
        assert_eq!(alice_state.transfers_out, 1);

        let bob_state = holdings.holders.get(&bob).unwrap();
        assert_eq!(bob_state.token_ids, BTreeSet::from([U256::from(1u64)]));

        let zero_state = holdings.holders.get(&H160::zero()).unwrap();
        assert!(zero_state.token_ids.is_empty());
        assert_eq!(zero_state.transfers_out, 2);
    }

    #[test]
    fn test_unseen_sender_removal_is_a_no_op() {
        let alice = H160::repeat_byte(0x11);
        let bob = H160::repeat_byte(0x22);
        let mut holdings = view(H160::repeat_byte(0x77));

        holdings.apply(&transfer(alice, bob, 9));

        assert!(holdings.holders.get(&alice).unwrap().token_ids.is_empty());
        assert_eq!(holdings.holders.get(&alice).unwrap().transfers_out, 1);
    }

    #[test]
    fn test_report_applies_threshold() {
        let alice = H160::repeat_byte(0x11);
        let bob = H160::repeat_byte(0x22);
        let mut holdings = view(H160::repeat_byte(0x77));
        holdings.apply(&transfer(H160::zero(), alice, 1));
        holdings.apply(&transfer(H160::zero(), alice, 2));
        holdings.apply(&transfer(H160::zero(), bob, 3));

        let report = holdings.into_report(1);
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].address, alice);
        assert_eq!(report[0].token_ids, vec!["1".to_string(), "2".to_string()]);
    }

    #[tokio::test]
    async fn test_fold_ignores_other_contracts() {
        let contract = H160::repeat_byte(0x77);
        let alice = H160::repeat_byte(0x11);
        let log = |address: H160| RawLog {
            address: Some(address),
            topics: vec![
                EventSignatureRegistry::topic0(EventKind::Erc721Transfer),
                H256::from(H160::zero()),
                H256::from(alice),
                H256::from_low_u64_be(5),
            ],
            data: Bytes::default(),
            transaction_hash: Some(H256::repeat_byte(0x01)),
            block_number: Some(1),
            log_index: Some(0),
        };

        let mut holdings = view(contract);
        holdings
            .fold(Batch {
                logs: vec![log(contract), log(H160::repeat_byte(0x99))],
                next_block: 2,
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(holdings.holders.get(&alice).unwrap().transfers_in, 1);
    }
}
