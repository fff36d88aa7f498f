/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Calling other participants.

use crate::delta::{Block, SegmentUpload};
use crate::networking::messages::{ConsensusProgress, Message, RpcRequest, RpcResponse};
use crate::networking::network::Network;
use crate::networking::receiving::PendingResponses;
use crate::networking::sending::SenderHandle;
use crate::state::{Metadata, ScriptInput, Wallet};
use crate::types::{Address, WalletID};
use std::fmt::{self, Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// No response arrived within the configured timeout.
    Timeout,
    /// The local poller is gone, e.g. because the participant is shutting down.
    Disconnected,
    /// The peer answered with an error.
    Remote(String),
    /// The peer answered with a response of the wrong kind.
    UnexpectedResponse,
}

impl Display for RpcError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            RpcError::Timeout => write!(f, "peer did not respond in time"),
            RpcError::Disconnected => write!(f, "participant is shutting down"),
            RpcError::Remote(reason) => write!(f, "peer failed the request: {}", reason),
            RpcError::UnexpectedResponse => write!(f, "peer sent a response of the wrong kind"),
        }
    }
}

impl std::error::Error for RpcError {}

/// A handle for sending requests to peers and waiting for their responses.
///
/// Clones share the id counter and the table of pending requests, so responses always reach the
/// clone that asked.
#[derive(Clone)]
pub struct RpcClient<N: Network> {
    sender: SenderHandle<N>,
    pending: PendingResponses,
    next_id: Arc<AtomicU64>,
    timeout: Duration,
}

impl<N: Network> RpcClient<N> {
    pub(crate) fn new(network: N, pending: PendingResponses, timeout: Duration) -> RpcClient<N> {
        RpcClient {
            sender: SenderHandle::new(network),
            pending,
            next_id: Arc::new(AtomicU64::new(0)),
            timeout,
        }
    }

    /// Send `request` to `peer` and block until it responds or the timeout passes.
    pub fn call(&mut self, peer: &Address, request: RpcRequest) -> Result<RpcResponse, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (to_caller, response) = mpsc::channel();
        self.pending
            .lock()
            .map_err(|_| RpcError::Disconnected)?
            .insert(id, to_caller);
        self.sender.send(peer, Message::Request { id, request });

        let result = match response.recv_timeout(self.timeout) {
            Ok(RpcResponse::Error(reason)) => Err(RpcError::Remote(reason)),
            Ok(response) => Ok(response),
            Err(RecvTimeoutError::Timeout) => Err(RpcError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(RpcError::Disconnected),
        };
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&id);
        }
        result
    }

    /// Send `request` to `peer` without waiting for the response.
    pub fn notify(&mut self, peer: &Address, request: RpcRequest) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.sender.send(peer, Message::Request { id, request });
    }

    pub fn ping(&mut self, peer: &Address) -> Result<(), RpcError> {
        match self.call(peer, RpcRequest::Ping)? {
            RpcResponse::Pong => Ok(()),
            _ => Err(RpcError::UnexpectedResponse),
        }
    }

    pub fn metadata(&mut self, peer: &Address) -> Result<Metadata, RpcError> {
        match self.call(peer, RpcRequest::Metadata)? {
            RpcResponse::Metadata(metadata) => Ok(metadata),
            _ => Err(RpcError::UnexpectedResponse),
        }
    }

    pub fn block(&mut self, peer: &Address, height: u32) -> Result<Block, RpcError> {
        match self.call(peer, RpcRequest::Block(height))? {
            RpcResponse::Block(block) => Ok(block),
            _ => Err(RpcError::UnexpectedResponse),
        }
    }

    pub fn wallet(&mut self, peer: &Address, id: WalletID) -> Result<Wallet, RpcError> {
        match self.call(peer, RpcRequest::Wallet(id))? {
            RpcResponse::Wallet(wallet) => Ok(wallet),
            _ => Err(RpcError::UnexpectedResponse),
        }
    }

    pub fn wallet_ids(&mut self, peer: &Address) -> Result<Vec<WalletID>, RpcError> {
        match self.call(peer, RpcRequest::WalletIDs)? {
            RpcResponse::WalletIDs(ids) => Ok(ids),
            _ => Err(RpcError::UnexpectedResponse),
        }
    }

    pub fn recent_snapshot_height(&mut self, peer: &Address) -> Result<u32, RpcError> {
        match self.call(peer, RpcRequest::RecentSnapshotHeight)? {
            RpcResponse::RecentSnapshotHeight(height) => Ok(height),
            _ => Err(RpcError::UnexpectedResponse),
        }
    }

    pub fn snapshot_metadata(&mut self, peer: &Address, head: u32) -> Result<Metadata, RpcError> {
        match self.call(peer, RpcRequest::SnapshotMetadata(head))? {
            RpcResponse::SnapshotMetadata(metadata) => Ok(metadata),
            _ => Err(RpcError::UnexpectedResponse),
        }
    }

    pub fn snapshot_wallet_list(
        &mut self,
        peer: &Address,
        head: u32,
    ) -> Result<Vec<WalletID>, RpcError> {
        match self.call(peer, RpcRequest::SnapshotWalletList(head))? {
            RpcResponse::SnapshotWalletList(ids) => Ok(ids),
            _ => Err(RpcError::UnexpectedResponse),
        }
    }

    pub fn snapshot_wallet(
        &mut self,
        peer: &Address,
        head: u32,
        id: WalletID,
    ) -> Result<Wallet, RpcError> {
        match self.call(peer, RpcRequest::SnapshotWallet { head, id })? {
            RpcResponse::SnapshotWallet(wallet) => Ok(wallet),
            _ => Err(RpcError::UnexpectedResponse),
        }
    }

    pub fn download_segment(&mut self, peer: &Address, id: WalletID) -> Result<Vec<u8>, RpcError> {
        match self.call(peer, RpcRequest::DownloadSegment(id))? {
            RpcResponse::Segment(segment) => Ok(segment),
            _ => Err(RpcError::UnexpectedResponse),
        }
    }

    pub fn upload_segment(
        &mut self,
        peer: &Address,
        upload: SegmentUpload,
    ) -> Result<bool, RpcError> {
        match self.call(peer, RpcRequest::UploadSegment(upload))? {
            RpcResponse::UploadAccepted(accepted) => Ok(accepted),
            _ => Err(RpcError::UnexpectedResponse),
        }
    }

    pub fn add_script_input(&mut self, peer: &Address, input: ScriptInput) -> Result<(), RpcError> {
        match self.call(peer, RpcRequest::AddScriptInput(input))? {
            RpcResponse::Received => Ok(()),
            _ => Err(RpcError::UnexpectedResponse),
        }
    }

    pub fn consensus_progress(&mut self, peer: &Address) -> Result<ConsensusProgress, RpcError> {
        match self.call(peer, RpcRequest::ConsensusProgress)? {
            RpcResponse::ConsensusProgress(progress) => Ok(progress),
            _ => Err(RpcError::UnexpectedResponse),
        }
    }
}
