/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use super::{DeltaError, Engine, SegmentUpload};
use crate::merkle::segment_hash;
use crate::types::ATOM_SIZE;
use std::fs;

impl Engine {
    /// Accept this sibling's segment of a pending sector update.
    ///
    /// Returns `Ok(false)` when the segment does not hash to the root the update committed to for
    /// this sibling. On `Ok(true)` the segment is stored, and the sibling may advance the update.
    pub fn process_segment_upload(&self, upload: &SegmentUpload) -> Result<bool, DeltaError> {
        let index = self.sibling_index().ok_or(DeltaError::NotSibling)?;
        let wallet = self.state.load_wallet(upload.wallet_id)?;
        let update = wallet
            .sector
            .update(upload.update_index)
            .ok_or(DeltaError::UnknownUpdate {
                wallet_id: upload.wallet_id,
                counter: upload.update_index,
            })?;
        if update.parent_counter != wallet.sector.recent_update_counter {
            return Err(DeltaError::ParentNotCommitted);
        }
        let expected = update.atoms as usize * ATOM_SIZE;
        if upload.new_segment.len() != expected {
            return Err(DeltaError::WrongSegmentLength {
                expected,
                actual: upload.new_segment.len(),
            });
        }
        if segment_hash(&upload.new_segment)? != update.hash_set[index as usize] {
            return Ok(false);
        }

        fs::write(
            self.state.update_filename(upload.wallet_id, upload.update_index),
            &upload.new_segment,
        )?;
        Ok(true)
    }
}
