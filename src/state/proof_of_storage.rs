/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Storage proofs carried by heartbeats.
//!
//! Every block, `po_storage_seed` picks one unit of weight in the whole quorum. If that unit is a
//! sector atom, every sibling proves it holds its own segment's copy of the atom. Units that fall
//! on wallet or script data select nothing.

use super::State;
use crate::encoding::decode_u64;
use crate::merkle::{build_proof, verify_proof, StorageProof};
use crate::types::WalletID;
use std::fs::File;
use std::io::BufReader;

impl State {
    /// The sector atom that the current block must prove, if any.
    pub fn proof_location(&self) -> Option<(WalletID, u16)> {
        let total = self.wallet_tree.total_weight();
        if total == 0 {
            return None;
        }
        let seed = decode_u64(&self.metadata.po_storage_seed.as_bytes()[..8]) % total;
        let (id, offset) = self.wallet_tree.select(seed)?;
        let wallet = self.load_wallet(id).ok()?;
        if offset < wallet.sector.atoms as u64 {
            Some((id, offset as u16))
        } else {
            None
        }
    }

    /// Build this sibling's proof for the current location. An empty proof is returned when
    /// nothing is selected or the segment is not held locally.
    pub fn build_storage_proof(&self) -> StorageProof {
        let Some((id, index)) = self.proof_location() else {
            return StorageProof::default();
        };
        let atoms = match self.load_wallet(id) {
            Ok(wallet) => wallet.sector.atoms,
            Err(_) => return StorageProof::default(),
        };
        let proof = File::open(self.sector_filename(id))
            .map_err(Into::into)
            .and_then(|file| build_proof(&mut BufReader::new(file), atoms as u64, index as u64));
        match proof {
            Ok(proof) => proof,
            Err(err) => {
                log::warn!("cannot prove storage of wallet {}: {}", id, err);
                StorageProof::default()
            }
        }
    }

    /// Check `proof` from `sibling_index` against the segment root recorded for it. A block that
    /// selects no atom accepts any proof.
    pub fn verify_storage_proof(
        &self,
        location: Option<(WalletID, u16)>,
        sibling_index: u8,
        proof: &StorageProof,
    ) -> bool {
        let Some((id, index)) = location else {
            return true;
        };
        match self.load_wallet(id) {
            Ok(wallet) => match wallet.sector.hash_set.get(sibling_index as usize) {
                Some(root) => verify_proof(root, index as u64, proof),
                None => false,
            },
            Err(_) => false,
        }
    }
}
