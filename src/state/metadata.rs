/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use super::sibling::Sibling;
use crate::types::{Balance, CryptoHash, Entropy, QUORUM_SIZE};
use borsh::{BorshDeserialize, BorshSerialize};

/// All single-valued state of a quorum. Small enough to travel over the wire in one message.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Metadata {
    pub siblings: [Sibling; QUORUM_SIZE],
    /// Hash of the sibling entropy of the most recent block.
    pub germ: Entropy,
    pub seed: Entropy,
    /// Next counter handed to a scheduled event.
    pub event_counter: u32,
    pub storage_price: Balance,
    pub parent_block: CryptoHash,
    pub height: u32,
    /// Height of the most recent snapshot, or `u32::MAX` before the first one.
    pub recent_snapshot: u32,
    pub po_storage_seed: CryptoHash,
}

impl Default for Metadata {
    fn default() -> Self {
        Metadata {
            siblings: Default::default(),
            germ: [0; 32],
            seed: [0; 32],
            // Counter 0 is reserved for "no committed update" in sector chains.
            event_counter: 1,
            storage_price: Balance::new(0),
            parent_block: CryptoHash::default(),
            height: 0,
            recent_snapshot: u32::MAX,
            po_storage_seed: CryptoHash::default(),
        }
    }
}

impl Metadata {
    pub fn active_siblings(&self) -> usize {
        self.siblings.iter().filter(|s| s.is_active()).count()
    }
}
