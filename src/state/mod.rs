/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The replicated state of a quorum.
//!
//! # State variables
//!
//! |Variable|Kept in|Description|
//! |---|---|---|
//! |Metadata|memory ([`Metadata`])|Siblings, entropy, counters, price, and the hash of the last block.|
//! |Wallets|one file per wallet|Balance, script, sector descriptor, and known script inputs of every account.|
//! |Wallet tree|memory ([`WalletTree`])|Every wallet id with its compensation weight, for capacity checks and storage proofs.|
//! |Events|memory ([`EventList`])|Script-input and sector-update deadlines, in firing order.|
//! |Segments|one file per wallet, plus one per pending update|This sibling's erasure-coded share of each sector.|
//!
//! All mutations happen while a block compiles, or while a participant bootstraps. Script
//! execution may open a journal ([`State::begin_journal`]) so that the effects of a rejected
//! script can be undone.

pub mod compensation;
pub mod event_list;
pub mod metadata;
pub mod proof_of_storage;
pub mod sector;
pub mod sibling;
pub mod wallet;
pub mod wallet_tree;

pub use event_list::{Event, EventKind, EventList};
pub use metadata::Metadata;
pub use sector::{Sector, SectorUpdate, UpdateAdvancement, UpdateID, UpdateOutcome, UpdateSectorArgs};
pub use sibling::Sibling;
pub use wallet::{KnownScript, ScriptInput, Wallet};
pub use wallet_tree::WalletTree;

use crate::encoding::EncodingError;
use crate::merkle::MerkleError;
use crate::types::{Address, PublicKeyBytes, WalletID, QUORUM_SIZE, SIBLING_PASSIVE_WINDOW};
use std::fmt::{self, Display, Formatter};
use std::fs;
use std::io;
use std::sync::mpsc::Sender;

#[derive(Debug)]
pub enum StateError {
    WalletExists(WalletID),
    WalletNotFound(WalletID),
    QuorumFull,
    NoEmptySiblings,
    InsufficientBalance,
    NonCurrentParent,
    TooFewAtoms,
    TooManyAtoms,
    InvalidK(u8),
    /// The distribution `d` is below `k` or above the quorum size.
    InvalidD(u8),
    TooManyConfirmations,
    TooFewConfirmations,
    DeadlineTooEarly,
    DeadlineTooFar,
    TooManyUpdates,
    InsufficientAtoms,
    Io(io::Error),
    Encoding(EncodingError),
    Merkle(MerkleError),
}

impl Display for StateError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StateError::WalletExists(id) => write!(f, "wallet {} already exists", id),
            StateError::WalletNotFound(id) => write!(f, "no wallet of id {}", id),
            StateError::QuorumFull => write!(f, "quorum has no room for the wallet"),
            StateError::NoEmptySiblings => write!(f, "no empty sibling slot"),
            StateError::InsufficientBalance => write!(f, "insufficient balance"),
            StateError::NonCurrentParent => write!(f, "parent update is neither committed nor pending"),
            StateError::TooFewAtoms => write!(f, "a sector needs more than {} atoms", QUORUM_SIZE),
            StateError::TooManyAtoms => write!(f, "sector allocates too many atoms"),
            StateError::InvalidK(k) => write!(f, "k of {} is outside the allowed range", k),
            StateError::InvalidD(d) => write!(f, "d of {} is outside k..=QUORUM_SIZE", d),
            StateError::TooManyConfirmations => write!(f, "more confirmations required than siblings"),
            StateError::TooFewConfirmations => write!(f, "fewer confirmations required than k"),
            StateError::DeadlineTooEarly => write!(f, "an update needs at least two blocks"),
            StateError::DeadlineTooFar => write!(f, "deadline too far in the future"),
            StateError::TooManyUpdates => write!(f, "sector already has the maximum of pending updates"),
            StateError::InsufficientAtoms => write!(f, "quorum lacks the atoms for this update"),
            StateError::Io(err) => write!(f, "state i/o failed: {}", err),
            StateError::Encoding(err) => write!(f, "state record unreadable: {}", err),
            StateError::Merkle(err) => write!(f, "{}", err),
        }
    }
}

impl From<io::Error> for StateError {
    fn from(value: io::Error) -> Self {
        StateError::Io(value)
    }
}

impl From<EncodingError> for StateError {
    fn from(value: EncodingError) -> Self {
        StateError::Encoding(value)
    }
}

impl From<MerkleError> for StateError {
    fn from(value: MerkleError) -> Self {
        StateError::Merkle(value)
    }
}

/// One reversible effect of a script.
#[derive(Debug)]
pub(crate) enum Undo {
    WalletCreated(WalletID),
    WalletReplaced(Wallet),
    EventInserted(u64),
    SegmentReplaced {
        path: String,
        previous: Option<Vec<u8>>,
    },
}

#[derive(Debug)]
struct Journal {
    metadata: Metadata,
    entries: Vec<Undo>,
}

pub struct State {
    wallet_prefix: String,
    pub(crate) metadata: Metadata,
    pub(crate) wallet_tree: WalletTree,
    pub(crate) event_list: EventList,
    pub(crate) sibling_index: Option<u8>,
    repair_sender: Option<Sender<WalletID>>,
    journal: Option<Journal>,
}

impl State {
    /// An empty state whose files are named `{file_prefix}wallet.*`.
    pub fn new(file_prefix: &str) -> State {
        State {
            wallet_prefix: format!("{}wallet", file_prefix),
            metadata: Metadata::default(),
            wallet_tree: WalletTree::new(),
            event_list: EventList::new(),
            sibling_index: None,
            repair_sender: None,
            journal: None,
        }
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn wallet_tree(&self) -> &WalletTree {
        &self.wallet_tree
    }

    pub fn event_list(&self) -> &EventList {
        &self.event_list
    }

    pub fn sibling_index(&self) -> Option<u8> {
        self.sibling_index
    }

    pub fn set_repair_sender(&mut self, sender: Sender<WalletID>) {
        self.repair_sender = Some(sender);
    }

    /// Find the slot held by the host at `address` with `public_key`, and remember it as ours.
    pub fn identify(&mut self, address: &Address, public_key: &PublicKeyBytes) -> Option<u8> {
        self.sibling_index = self
            .metadata
            .siblings
            .iter()
            .position(|s| s.is_identity(address, public_key))
            .map(|i| i as u8);
        self.sibling_index
    }

    pub fn toss_sibling(&mut self, index: u8) {
        if let Some(sibling) = self.metadata.siblings.get_mut(index as usize) {
            *sibling = Sibling::default();
        }
    }

    /// Place `sibling` in the first inactive slot, tethered to `wallet_id`. Returns the slot.
    pub fn add_sibling(&mut self, wallet_id: WalletID, mut sibling: Sibling) -> Result<u8, StateError> {
        let slot = self
            .metadata
            .siblings
            .iter()
            .position(Sibling::is_inactive)
            .ok_or(StateError::NoEmptySiblings)?;
        sibling.status = SIBLING_PASSIVE_WINDOW;
        sibling.index = slot as u8;
        sibling.wallet_id = wallet_id;
        self.metadata.siblings[slot] = sibling;
        Ok(slot as u8)
    }

    /// Move every passive sibling one compile closer to becoming active.
    pub fn countdown_passive_siblings(&mut self) {
        for sibling in self.metadata.siblings.iter_mut().filter(|s| s.is_passive()) {
            sibling.status -= 1;
        }
    }

    pub(crate) fn begin_journal(&mut self) {
        self.journal = Some(Journal {
            metadata: self.metadata.clone(),
            entries: Vec::new(),
        });
    }

    pub(crate) fn commit_journal(&mut self) {
        self.journal = None;
    }

    pub(crate) fn record(&mut self, undo: Undo) {
        if let Some(journal) = self.journal.as_mut() {
            journal.entries.push(undo);
        }
    }

    /// Undo everything recorded since [`begin_journal`](Self::begin_journal).
    pub(crate) fn rollback_journal(&mut self) -> Result<(), StateError> {
        let Some(journal) = self.journal.take() else {
            return Ok(());
        };
        for undo in journal.entries.into_iter().rev() {
            match undo {
                Undo::WalletCreated(id) => {
                    if self.wallet_tree.contains(id) {
                        self.remove_wallet(id)?;
                    }
                }
                Undo::WalletReplaced(wallet) => {
                    self.wallet_tree
                        .update_weight(wallet.id, wallet.compensation_weight());
                    self.write_wallet_file(&wallet)?;
                }
                Undo::EventInserted(key) => {
                    self.event_list.remove(key);
                }
                Undo::SegmentReplaced { path, previous } => match previous {
                    Some(bytes) => fs::write(&path, bytes)?,
                    None => {
                        let _ = fs::remove_file(&path);
                    }
                },
            }
        }
        self.metadata = journal.metadata;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_utilities {
    use super::State;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    /// Directory removed when dropped.
    pub(crate) struct TempDir(pub(crate) PathBuf);

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }

    pub(crate) fn temp_dir(name: &str) -> TempDir {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);
        let dir = std::env::temp_dir().join(format!(
            "quorum_rs_{}_{}_{}",
            name,
            std::process::id(),
            nanos
        ));
        std::fs::create_dir_all(&dir).unwrap();
        TempDir(dir)
    }

    pub(crate) fn prefix(dir: &TempDir) -> String {
        format!("{}/", dir.0.display())
    }

    pub(crate) fn temp_state(name: &str) -> (State, TempDir) {
        let dir = temp_dir(name);
        (State::new(&prefix(&dir)), dir)
    }
}

#[cfg(test)]
mod tests {
    use super::test_utilities::temp_state;
    use super::*;
    use crate::types::Balance;

    #[test]
    fn sibling_slots_fill_in_order() {
        let (mut state, _dir) = temp_state("sibling_slots");
        for expected in 0..QUORUM_SIZE as u8 {
            let slot = state
                .add_sibling(WalletID::new(expected as u64), Sibling::candidate(Address::new("h", 1), [expected; 32]))
                .unwrap();
            assert_eq!(slot, expected);
            assert!(state.metadata().siblings[slot as usize].is_passive());
        }
        assert!(matches!(
            state.add_sibling(WalletID::new(9), Sibling::default()),
            Err(StateError::NoEmptySiblings)
        ));

        state.toss_sibling(2);
        assert!(state.metadata().siblings[2].is_inactive());
        assert_eq!(state.add_sibling(WalletID::new(9), Sibling::default()).unwrap(), 2);
    }

    #[test]
    fn passive_siblings_become_active() {
        let (mut state, _dir) = temp_state("passive_countdown");
        state
            .add_sibling(WalletID::new(1), Sibling::candidate(Address::new("h", 1), [1; 32]))
            .unwrap();
        for _ in 0..SIBLING_PASSIVE_WINDOW {
            assert!(!state.metadata().siblings[0].is_active());
            state.countdown_passive_siblings();
        }
        assert!(state.metadata().siblings[0].is_active());
        state.countdown_passive_siblings();
        assert!(state.metadata().siblings[0].is_active());
        assert!(state.metadata().siblings[1].is_inactive());
    }

    #[test]
    fn rollback_undoes_journaled_effects() {
        let (mut state, _dir) = temp_state("rollback");
        state
            .insert_wallet(Wallet::new(WalletID::new(1), Balance::new(100), vec![]), true)
            .unwrap();

        // 1. Journal a new wallet, a replaced wallet, a new sibling, and an event.
        state.begin_journal();
        state
            .insert_wallet(Wallet::new(WalletID::new(2), Balance::new(5), vec![]), true)
            .unwrap();
        let mut one = state.load_wallet(WalletID::new(1)).unwrap();
        one.balance = Balance::new(1);
        state.save_wallet(&one).unwrap();
        state.add_sibling(WalletID::new(1), Sibling::default()).unwrap();
        state.schedule_event(
            10,
            EventKind::SectorUpdateExpiry {
                wallet_id: WalletID::new(1),
            },
        );

        // 2. Roll everything back.
        state.rollback_journal().unwrap();
        assert!(state.load_wallet(WalletID::new(2)).is_err());
        assert_eq!(state.load_wallet(WalletID::new(1)).unwrap().balance, Balance::new(100));
        assert!(state.metadata().siblings[0].is_inactive());
        assert!(state.event_list().is_empty());
        assert_eq!(state.metadata().event_counter, 1);
        assert_eq!(state.wallet_list(), vec![WalletID::new(1)]);
    }
}
