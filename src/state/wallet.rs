/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Wallets: balance, sector, and script of an account, plus their persistence.
//!
//! Each wallet lives in its own file, `{prefix}wallet.{hex id}`, holding one length-prefixed
//! record. The wallet tree mirrors every wallet on disk together with its compensation weight.

use super::event_list::{Event, EventKind};
use super::sector::Sector;
use super::{State, StateError, Undo};
use crate::encoding::{read_prefixed, write_prefixed};
use crate::types::crypto_primitives::hash;
use crate::types::{
    Balance, CryptoHash, WalletID, ATOMS_PER_QUORUM, ATOM_SIZE, MAX_DEADLINE, WALLET_ATOM_MULTIPLIER,
};
use borsh::{BorshDeserialize, BorshSerialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Wallet {
    pub id: WalletID,
    pub balance: Balance,
    pub sector: Sector,
    pub script: Vec<u8>,
    /// Hashes of script inputs already executed, kept until their deadline passes so that a
    /// replayed input is not run twice.
    pub known_scripts: BTreeMap<CryptoHash, KnownScript>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct KnownScript {
    pub deadline: u32,
    pub counter: u32,
}

impl Wallet {
    pub fn new(id: WalletID, balance: Balance, script: Vec<u8>) -> Wallet {
        Wallet {
            id,
            balance,
            sector: Sector::default(),
            script,
            known_scripts: BTreeMap::new(),
        }
    }

    /// Atoms this wallet is billed for. Wallet and script data live in every snapshot and are
    /// billed `WALLET_ATOM_MULTIPLIER` times, sector data once.
    pub fn compensation_weight(&self) -> u64 {
        let script_atoms = (self.script.len() + ATOM_SIZE - 1) / ATOM_SIZE;
        WALLET_ATOM_MULTIPLIER * (script_atoms as u64 + 1)
            + self.sector.atoms as u64
            + self.sector.update_atoms as u64
    }
}

/// A request to run a wallet's script with caller-supplied input.
#[derive(Clone, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct ScriptInput {
    pub wallet_id: WalletID,
    pub input: Vec<u8>,
    /// Last height at which the input may execute.
    pub deadline: u32,
}

impl ScriptInput {
    pub fn hash(&self) -> CryptoHash {
        // Serializing a struct of plain fields into a Vec cannot fail.
        hash(&self.try_to_vec().unwrap_or_default())
    }

    /// Whether the input may still run at `height`: its deadline has not passed, and is at most
    /// `MAX_DEADLINE` blocks ahead.
    pub fn deadline_in_window(&self, height: u32) -> bool {
        self.deadline >= height && self.deadline <= height.saturating_add(MAX_DEADLINE)
    }
}

impl State {
    pub fn wallet_filename(&self, id: WalletID) -> String {
        format!("{}.{}", self.wallet_prefix, id.hex())
    }

    pub fn wallet_list(&self) -> Vec<WalletID> {
        self.wallet_tree.ids_in_order()
    }

    pub fn load_wallet(&self, id: WalletID) -> Result<Wallet, StateError> {
        if !self.wallet_tree.contains(id) {
            return Err(StateError::WalletNotFound(id));
        }
        let file = File::open(self.wallet_filename(id))?;
        Ok(read_prefixed(&mut BufReader::new(file))?)
    }

    /// Persist `wallet` and re-weigh it in the wallet tree.
    pub fn save_wallet(&mut self, wallet: &Wallet) -> Result<(), StateError> {
        let Some(old_weight) = self.wallet_tree.get_weight(wallet.id) else {
            return Err(StateError::WalletNotFound(wallet.id));
        };
        let new_weight = wallet.compensation_weight();
        if self.wallet_tree.total_weight() - old_weight + new_weight > ATOMS_PER_QUORUM {
            return Err(StateError::QuorumFull);
        }

        if self.journal.is_some() {
            let previous = self.load_wallet(wallet.id)?;
            self.record(Undo::WalletReplaced(previous));
        }
        self.wallet_tree.update_weight(wallet.id, new_weight);
        self.write_wallet_file(wallet)
    }

    pub(super) fn write_wallet_file(&self, wallet: &Wallet) -> Result<(), StateError> {
        let mut writer = BufWriter::new(File::create(self.wallet_filename(wallet.id))?);
        write_prefixed(&mut writer, wallet)?;
        writer.flush()?;
        Ok(())
    }

    /// Add a wallet to the quorum and schedule the events it carries.
    ///
    /// A `fresh` wallet is one created by a script: its pending events get new counters. Wallets
    /// copied from a snapshot keep the counters they had.
    pub fn insert_wallet(&mut self, mut wallet: Wallet, fresh: bool) -> Result<(), StateError> {
        if self.wallet_tree.contains(wallet.id) {
            return Err(StateError::WalletExists(wallet.id));
        }
        let weight = wallet.compensation_weight();
        if self.wallet_tree.total_weight() + weight > ATOMS_PER_QUORUM {
            return Err(StateError::QuorumFull);
        }
        self.wallet_tree.insert(wallet.id, weight);
        self.record(Undo::WalletCreated(wallet.id));

        let id = wallet.id;
        for (script_hash, known) in wallet.known_scripts.iter_mut() {
            let kind = EventKind::ScriptInputExpiry {
                wallet_id: id,
                hash: *script_hash,
            };
            if fresh {
                known.counter = self.schedule_event(known.deadline, kind);
            } else {
                self.schedule_event_with_counter(known.deadline, known.counter, kind);
            }
        }
        for update in wallet.sector.active_updates.iter_mut() {
            let kind = EventKind::SectorUpdateExpiry { wallet_id: id };
            if fresh {
                update.event_counter = self.schedule_event(update.event_expiration, kind);
            } else {
                self.schedule_event_with_counter(update.event_expiration, update.event_counter, kind);
            }
        }

        self.write_wallet_file(&wallet)
    }

    /// Delete a wallet with its files and its pending events.
    pub fn remove_wallet(&mut self, id: WalletID) -> Result<(), StateError> {
        let wallet = self.load_wallet(id)?;
        for update in &wallet.sector.active_updates {
            let _ = fs::remove_file(self.update_filename(id, update.event_counter));
        }
        let _ = fs::remove_file(self.sector_filename(id));
        let _ = fs::remove_file(self.wallet_filename(id));
        self.wallet_tree.remove(id);
        self.event_list.remove_wallet(id);
        Ok(())
    }

    /// Remember that the input hashed `script_hash` ran, until `deadline`.
    pub fn learn_script(&mut self, wallet: &mut Wallet, script_hash: CryptoHash, deadline: u32) {
        let counter = self.schedule_event(
            deadline,
            EventKind::ScriptInputExpiry {
                wallet_id: wallet.id,
                hash: script_hash,
            },
        );
        wallet
            .known_scripts
            .insert(script_hash, KnownScript { deadline, counter });
    }

    pub fn forget_script(&mut self, wallet_id: WalletID, script_hash: &CryptoHash) -> Result<(), StateError> {
        let mut wallet = self.load_wallet(wallet_id)?;
        if wallet.known_scripts.remove(script_hash).is_some() {
            self.save_wallet(&wallet)?;
        }
        Ok(())
    }

    pub(crate) fn schedule_event_with_counter(&mut self, expiration: u32, counter: u32, kind: EventKind) {
        let event = Event {
            expiration,
            counter,
            kind,
        };
        let key = event.key();
        if self.event_list.insert(event) {
            self.record(Undo::EventInserted(key));
        }
    }

    /// Schedule an event with the next counter, returning that counter.
    pub fn schedule_event(&mut self, expiration: u32, kind: EventKind) -> u32 {
        let counter = self.metadata.event_counter;
        self.metadata.event_counter = counter.wrapping_add(1);
        self.schedule_event_with_counter(expiration, counter, kind);
        counter
    }
}
