/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The delta engine: the deterministic state machine every sibling replicates.
//!
//! An [`Engine`] owns the quorum [`State`] and the on-disk history of compiled blocks. Given the
//! same sequence of [blocks](Block), every engine reaches the same state, which is what lets a
//! quorum of siblings agree on it.
//!
//! ## Files
//!
//! Everything an engine writes is named after its `file_prefix`:
//!
//! |File|Contents|
//! |---|---|
//! |`{prefix}wallet.{id}`|One wallet record.|
//! |`{prefix}wallet.{id}.sector`|This sibling's segment of the wallet's sector.|
//! |`{prefix}wallet.{id}.sectorupdate.{counter}`|This sibling's segment of a pending update.|
//! |`{prefix}blockHistory.{height}`|Up to `SNAPSHOT_LENGTH` blocks starting at `height`.|
//! |`{prefix}snapshot.{height}`|The state as of the start of block `height`.|

pub mod block;
pub mod block_history;
pub mod bootstrap;
pub mod compile;
pub mod script_api;
pub mod scripts;
pub mod snapshot;
pub mod upload;

pub use block::{Block, Heartbeat, SegmentUpload};

use crate::encoding::EncodingError;
use crate::events::Event;
use crate::merkle::MerkleError;
use crate::state::{Metadata, State, StateError, Wallet};
use crate::types::{Address, PublicKeyBytes, WalletID};
use std::fmt::{self, Display, Formatter};
use std::io;
use std::sync::mpsc::Sender;

#[derive(Debug)]
pub enum DeltaError {
    State(StateError),
    Encoding(EncodingError),
    Merkle(MerkleError),
    Io(io::Error),
    HeightMismatch { expected: u32, got: u32 },
    BlockNotFound(u32),
    SnapshotNotFound(u32),
    WalletNotInSnapshot { height: u32, wallet_id: WalletID },
    CorruptSnapshot(&'static str),
    NotSibling,
    UnknownUpdate { wallet_id: WalletID, counter: u32 },
    ParentNotCommitted,
    WrongSegmentLength { expected: usize, actual: usize },
}

impl Display for DeltaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            DeltaError::State(err) => write!(f, "{}", err),
            DeltaError::Encoding(err) => write!(f, "{}", err),
            DeltaError::Merkle(err) => write!(f, "{}", err),
            DeltaError::Io(err) => write!(f, "engine i/o failed: {}", err),
            DeltaError::HeightMismatch { expected, got } => {
                write!(f, "expected a block at height {}, got {}", expected, got)
            }
            DeltaError::BlockNotFound(height) => write!(f, "block {} not in available history", height),
            DeltaError::SnapshotNotFound(height) => write!(f, "no snapshot at height {}", height),
            DeltaError::WalletNotInSnapshot { height, wallet_id } => {
                write!(f, "wallet {} not in snapshot {}", wallet_id, height)
            }
            DeltaError::CorruptSnapshot(what) => write!(f, "corrupt snapshot: {}", what),
            DeltaError::NotSibling => write!(f, "this participant is not a sibling"),
            DeltaError::UnknownUpdate { wallet_id, counter } => {
                write!(f, "wallet {} has no pending update {}", wallet_id, counter)
            }
            DeltaError::ParentNotCommitted => write!(f, "the update's parent is not yet committed"),
            DeltaError::WrongSegmentLength { expected, actual } => {
                write!(f, "segment is {} bytes, expected {}", actual, expected)
            }
        }
    }
}

impl std::error::Error for DeltaError {}

impl From<StateError> for DeltaError {
    fn from(value: StateError) -> Self {
        DeltaError::State(value)
    }
}

impl From<EncodingError> for DeltaError {
    fn from(value: EncodingError) -> Self {
        DeltaError::Encoding(value)
    }
}

impl From<MerkleError> for DeltaError {
    fn from(value: MerkleError) -> Self {
        DeltaError::Merkle(value)
    }
}

impl From<io::Error> for DeltaError {
    fn from(value: io::Error) -> Self {
        DeltaError::Io(value)
    }
}

pub struct Engine {
    pub(crate) state: State,
    file_prefix: String,
    /// First height of the history file blocks are appended to. `None` until the first
    /// compile after bootstrap or join.
    active_history_head: Option<u32>,
    active_history_length: u32,
    /// First height of the previous, complete history file.
    recent_history_head: Option<u32>,
    /// Address and key this engine's participant is known by, used to find its sibling slot.
    identity: Option<(Address, PublicKeyBytes)>,
    event_publisher: Option<Sender<Event>>,
}

impl Engine {
    pub fn new(file_prefix: &str) -> Engine {
        Engine {
            state: State::new(file_prefix),
            file_prefix: file_prefix.to_string(),
            active_history_head: None,
            active_history_length: 0,
            recent_history_head: None,
            identity: None,
            event_publisher: None,
        }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn metadata(&self) -> &Metadata {
        self.state.metadata()
    }

    pub fn height(&self) -> u32 {
        self.state.metadata().height
    }

    pub fn sibling_index(&self) -> Option<u8> {
        self.state.sibling_index()
    }

    pub fn load_wallet(&self, id: WalletID) -> Result<Wallet, DeltaError> {
        Ok(self.state.load_wallet(id)?)
    }

    pub fn wallet_list(&self) -> Vec<WalletID> {
        self.state.wallet_list()
    }

    /// The bytes of this sibling's segment of `id`'s sector.
    pub fn load_segment(&self, id: WalletID) -> Result<Vec<u8>, DeltaError> {
        self.state.load_wallet(id)?;
        Ok(std::fs::read(self.state.sector_filename(id))?)
    }

    /// Remember who this engine runs for and look up its sibling slot.
    pub fn set_identity(&mut self, address: Address, public_key: PublicKeyBytes) -> Option<u8> {
        let index = self.state.identify(&address, &public_key);
        self.identity = Some((address, public_key));
        index
    }

    pub(crate) fn identify(&mut self) -> Option<u8> {
        match &self.identity {
            Some((address, public_key)) => {
                let (address, public_key) = (address.clone(), *public_key);
                self.state.identify(&address, &public_key)
            }
            None => None,
        }
    }

    pub fn set_repair_sender(&mut self, sender: Sender<WalletID>) {
        self.state.set_repair_sender(sender);
    }

    pub fn set_event_publisher(&mut self, publisher: Sender<Event>) {
        self.event_publisher = Some(publisher);
    }

    pub(crate) fn publish(&self, event: Event) {
        Event::publish(&self.event_publisher, event);
    }

    pub(crate) fn file_prefix(&self) -> &str {
        &self.file_prefix
    }
}
