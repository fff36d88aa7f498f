/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Blocks: everything the siblings agreed on during one round.

use crate::merkle::StorageProof;
use crate::state::{ScriptInput, UpdateAdvancement};
use crate::types::crypto_primitives::hash;
use crate::types::{CryptoHash, Entropy, SignatureBytes, WalletID, QUORUM_SIZE};
use borsh::{BorshDeserialize, BorshSerialize};

/// A sibling's proof of liveness for one block.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Heartbeat {
    /// Hash of the block the sibling last compiled.
    pub parent_block: CryptoHash,
    pub entropy: Entropy,
    pub storage_proof: StorageProof,
}

impl Heartbeat {
    /// The bytes a sibling signs.
    pub fn signing_bytes(&self) -> Vec<u8> {
        self.try_to_vec().unwrap_or_default()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Block {
    pub height: u32,
    pub parent_block: CryptoHash,
    /// Indexed by sibling. A sibling whose heartbeat is missing has a default heartbeat and an
    /// all-zero signature.
    pub heartbeats: [Heartbeat; QUORUM_SIZE],
    pub heartbeat_signatures: [SignatureBytes; QUORUM_SIZE],
    pub script_inputs: Vec<ScriptInput>,
    pub update_advancements: Vec<UpdateAdvancement>,
    /// One per advancement, by the advancing sibling.
    pub advancement_signatures: Vec<SignatureBytes>,
}

impl Block {
    pub fn hash(&self) -> CryptoHash {
        hash(&self.try_to_vec().unwrap_or_default())
    }
}

/// A sibling's segment for a pending sector update, sent by the uploader.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct SegmentUpload {
    pub wallet_id: WalletID,
    /// Event counter of the update.
    pub update_index: u32,
    pub new_segment: Vec<u8>,
}
