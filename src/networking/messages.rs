/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Exhaustive enumerations around every message variant participants exchange.

use crate::delta::{Block, SegmentUpload};
use crate::participant::update::SignedUpdate;
use crate::state::{Metadata, ScriptInput, Wallet};
use crate::types::WalletID;
use borsh::{BorshDeserialize, BorshSerialize};

/// All message variants sent over the [`Network`](super::network::Network).
///
/// Every request carries an id chosen by the caller, and the response to it echoes the id back.
#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub enum Message {
    Request { id: u64, request: RpcRequest },
    Response { id: u64, response: RpcResponse },
}

/// Operations a participant serves to its peers.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum RpcRequest {
    Ping,
    /// The current [`Metadata`].
    Metadata,
    /// A block from the available history, by height.
    Block(u32),
    Wallet(WalletID),
    WalletIDs,
    RecentSnapshotHeight,
    SnapshotMetadata(u32),
    SnapshotWalletList(u32),
    SnapshotWallet { head: u32, id: WalletID },
    /// The serving sibling's segment of a wallet's sector.
    DownloadSegment(WalletID),
    /// Hand the serving sibling its segment of a pending update.
    UploadSegment(SegmentUpload),
    /// Queue a script input for the next block.
    AddScriptInput(ScriptInput),
    /// Consensus traffic between siblings.
    HandleSignedUpdate(SignedUpdate),
    /// Where the serving participant is in the current round.
    ConsensusProgress,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum RpcResponse {
    Pong,
    Metadata(Metadata),
    Block(Block),
    Wallet(Wallet),
    WalletIDs(Vec<WalletID>),
    RecentSnapshotHeight(u32),
    SnapshotMetadata(Metadata),
    SnapshotWalletList(Vec<WalletID>),
    SnapshotWallet(Wallet),
    Segment(Vec<u8>),
    /// Whether the uploaded segment matched the update.
    UploadAccepted(bool),
    /// The request was queued for processing.
    Received,
    ConsensusProgress(ConsensusProgress),
    Error(String),
}

/// A participant's position in the consensus round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ConsensusProgress {
    /// Height of the block being agreed on.
    pub height: u32,
    pub current_step: u8,
    /// Milliseconds since the current step began.
    pub step_progress: u64,
}
