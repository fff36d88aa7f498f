/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Sectors, and the chain of pending updates that replace their contents.
//!
//! Every wallet owns one sector. Each sibling stores its own erasure-coded segment of the sector
//! in a flat file of `atoms * ATOM_SIZE` bytes. A change to the sector is proposed as a
//! [`SectorUpdate`], chained to a parent by event counter: either the most recently committed
//! update, or another update still pending. Siblings that have stored their new segment send an
//! [`UpdateAdvancement`]. When the update's deadline passes it is committed if enough siblings
//! confirmed it and its parent is the committed head, and dropped together with all of its
//! descendants otherwise.

use super::event_list::event_key;
use super::{State, StateError};
use crate::types::crypto_primitives::hash;
use crate::types::{CryptoHash, WalletID, QUORUM_SIZE};
use borsh::{BorshDeserialize, BorshSerialize};
use std::{fs, path::Path};

#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Sector {
    pub atoms: u16,
    /// Total atoms of all pending updates.
    pub update_atoms: u32,
    pub k: u8,
    pub d: u8,
    /// Merkle root of each sibling's segment.
    pub hash_set: [CryptoHash; QUORUM_SIZE],
    /// Event counter of the most recently committed update, 0 for a sector that never changed.
    pub recent_update_counter: u32,
    pub active_updates: Vec<SectorUpdate>,
}

impl Sector {
    pub fn hash(&self) -> CryptoHash {
        hash_of_set(&self.hash_set)
    }

    pub fn update(&self, counter: u32) -> Option<&SectorUpdate> {
        self.active_updates.iter().find(|u| u.event_counter == counter)
    }

    pub fn update_mut(&mut self, counter: u32) -> Option<&mut SectorUpdate> {
        self.active_updates
            .iter_mut()
            .find(|u| u.event_counter == counter)
    }

    /// Whether a new update may be chained onto `parent_counter`.
    pub fn parent_available(&self, parent_counter: u32) -> bool {
        parent_counter == self.recent_update_counter || self.update(parent_counter).is_some()
    }
}

fn hash_of_set(hash_set: &[CryptoHash; QUORUM_SIZE]) -> CryptoHash {
    let mut bytes = Vec::with_capacity(32 * QUORUM_SIZE);
    for h in hash_set {
        bytes.extend_from_slice(h.as_bytes());
    }
    hash(&bytes)
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct SectorUpdate {
    pub wallet_id: WalletID,
    pub parent_counter: u32,
    pub atoms: u16,
    pub k: u8,
    pub d: u8,
    pub hash_set: [CryptoHash; QUORUM_SIZE],
    pub confirmations_required: u8,
    pub confirmations: [bool; QUORUM_SIZE],
    pub event_counter: u32,
    pub event_expiration: u32,
}

impl SectorUpdate {
    pub fn counter(&self) -> u32 {
        self.event_counter
    }

    pub fn id(&self) -> UpdateID {
        UpdateID {
            wallet_id: self.wallet_id,
            counter: self.event_counter,
        }
    }

    pub fn hash(&self) -> CryptoHash {
        hash_of_set(&self.hash_set)
    }

    pub fn confirmation_count(&self) -> usize {
        self.confirmations.iter().filter(|c| **c).count()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize)]
pub struct UpdateID {
    pub wallet_id: WalletID,
    pub counter: u32,
}

/// A sibling's statement that it has stored its segment of a pending update.
#[derive(Clone, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct UpdateAdvancement {
    pub sibling_index: u8,
    pub wallet_id: WalletID,
    /// Event counter of the update.
    pub update_index: u32,
}

/// Operands of the `prop_upload` instruction.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct UpdateSectorArgs {
    pub parent_counter: u32,
    pub atoms: u16,
    pub k: u8,
    pub d: u8,
    pub hash_set: [CryptoHash; QUORUM_SIZE],
    pub confirmations_required: u8,
    pub deadline: u32,
}

/// What happened to an update whose deadline passed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    Committed { repair_needed: bool },
    /// The update and these descendants (by counter) were discarded.
    Dropped(Vec<u32>),
    /// The update was already gone, e.g. dropped with its parent.
    Unknown,
}

impl State {
    pub fn sector_filename(&self, id: WalletID) -> String {
        format!("{}.sector", self.wallet_filename(id))
    }

    pub fn update_filename(&self, id: WalletID, counter: u32) -> String {
        format!("{}.sectorupdate.{}", self.wallet_filename(id), counter)
    }

    /// Record the confirmation carried by `advancement`. Returns `false` when no such update is
    /// pending.
    pub fn advance_update(&mut self, advancement: &UpdateAdvancement) -> Result<bool, StateError> {
        if advancement.sibling_index as usize >= QUORUM_SIZE {
            return Ok(false);
        }
        let mut wallet = self.load_wallet(advancement.wallet_id)?;
        match wallet.sector.update_mut(advancement.update_index) {
            Some(update) => update.confirmations[advancement.sibling_index as usize] = true,
            None => return Ok(false),
        }
        self.save_wallet(&wallet)?;
        Ok(true)
    }

    /// Settle the update with event counter `counter` once its deadline passed.
    pub fn expire_sector_update(
        &mut self,
        wallet_id: WalletID,
        counter: u32,
    ) -> Result<UpdateOutcome, StateError> {
        let mut wallet = self.load_wallet(wallet_id)?;
        let Some(position) = wallet
            .sector
            .active_updates
            .iter()
            .position(|u| u.event_counter == counter)
        else {
            return Ok(UpdateOutcome::Unknown);
        };
        let update = wallet.sector.active_updates.remove(position);
        wallet.sector.update_atoms = wallet.sector.update_atoms.saturating_sub(update.atoms as u32);

        let confirmed = update.confirmation_count() >= update.confirmations_required as usize;
        if confirmed && update.parent_counter == wallet.sector.recent_update_counter {
            wallet.sector.atoms = update.atoms;
            wallet.sector.k = update.k;
            wallet.sector.d = update.d;
            wallet.sector.hash_set = update.hash_set;
            wallet.sector.recent_update_counter = counter;

            let update_file = self.update_filename(wallet_id, counter);
            let sector_file = self.sector_filename(wallet_id);
            let mut repair_needed = false;
            if Path::new(&update_file).exists() {
                fs::rename(&update_file, &sector_file)?;
            } else if update.atoms == 0 {
                let _ = fs::remove_file(&sector_file);
            } else if self.sibling_index.is_some() {
                repair_needed = true;
            }

            self.save_wallet(&wallet)?;
            if repair_needed {
                self.request_repair(wallet_id);
            }
            return Ok(UpdateOutcome::Committed { repair_needed });
        }

        let _ = fs::remove_file(self.update_filename(wallet_id, counter));
        let mut dropped = vec![counter];
        loop {
            let Some(position) = wallet
                .sector
                .active_updates
                .iter()
                .position(|u| dropped.contains(&u.parent_counter))
            else {
                break;
            };
            let descendant = wallet.sector.active_updates.remove(position);
            wallet.sector.update_atoms = wallet
                .sector
                .update_atoms
                .saturating_sub(descendant.atoms as u32);
            let _ = fs::remove_file(self.update_filename(wallet_id, descendant.event_counter));
            self.event_list.remove(event_key(
                descendant.event_expiration,
                descendant.event_counter,
            ));
            dropped.push(descendant.event_counter);
        }
        self.save_wallet(&wallet)?;
        Ok(UpdateOutcome::Dropped(dropped))
    }

    pub(crate) fn request_repair(&self, wallet_id: WalletID) {
        if let Some(sender) = &self.repair_sender {
            if sender.send(wallet_id).is_err() {
                log::warn!("repair worker is gone, wallet {} stays unrepaired", wallet_id);
            }
        }
    }
}
