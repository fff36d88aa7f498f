/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The operations a participant serves, and the thread that serves them to peers.
//!
//! Readers take the engine read lock. Only [`Consensus::upload_segment`] writes, since it stores
//! a segment file the engine later commits.

use super::consensus::Consensus;
use super::update::SignedUpdate;
use super::ParticipantError;
use crate::delta::SegmentUpload;
use crate::networking::messages::{RpcRequest, RpcResponse};
use crate::networking::network::Network;
use crate::networking::receiving::{RpcRequestReceiveError, RpcServerStub};
use crate::networking::sending::SenderHandle;
use crate::state::{ScriptInput, UpdateAdvancement};
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

impl<N: Network> Consensus<N> {
    /// Store this sibling's segment of a pending update. On success the sibling announces the
    /// segment in its next update.
    pub(crate) fn upload_segment(&self, upload: &SegmentUpload) -> Result<bool, ParticipantError> {
        let engine = self.engine_mut();
        if !engine.process_segment_upload(upload)? {
            return Ok(false);
        }
        let sibling_index = engine.sibling_index().ok_or(ParticipantError::NotSibling)?;
        self.buffers().update_advancements.push(UpdateAdvancement {
            sibling_index,
            wallet_id: upload.wallet_id,
            update_index: upload.update_index,
        });
        Ok(true)
    }

    /// Queue `input` for this sibling's next update. Inputs the next block would skip are dropped.
    pub(crate) fn add_script_input(&self, input: ScriptInput) {
        let height = self.engine().height();
        if !input.deadline_in_window(height) {
            log::debug!(
                "dropping script input for wallet {} with deadline {} at height {}",
                input.wallet_id,
                input.deadline,
                height
            );
            return;
        }
        self.buffers().script_inputs.push(input);
    }

    /// Answer `request`. Signed updates are passed to the stepper.
    pub(crate) fn serve(
        &self,
        request: RpcRequest,
        signed_updates: &Sender<SignedUpdate>,
    ) -> Result<RpcResponse, ParticipantError> {
        Ok(match request {
            RpcRequest::Ping => RpcResponse::Pong,
            RpcRequest::Metadata => RpcResponse::Metadata(self.engine().metadata().clone()),
            RpcRequest::Block(height) => RpcResponse::Block(self.engine().load_block(height)?),
            RpcRequest::Wallet(id) => RpcResponse::Wallet(self.engine().load_wallet(id)?),
            RpcRequest::WalletIDs => RpcResponse::WalletIDs(self.engine().wallet_list()),
            RpcRequest::RecentSnapshotHeight => {
                RpcResponse::RecentSnapshotHeight(self.engine().recent_snapshot())
            }
            RpcRequest::SnapshotMetadata(head) => {
                RpcResponse::SnapshotMetadata(self.engine().load_snapshot_metadata(head)?)
            }
            RpcRequest::SnapshotWalletList(head) => {
                RpcResponse::SnapshotWalletList(self.engine().load_snapshot_wallet_list(head)?)
            }
            RpcRequest::SnapshotWallet { head, id } => {
                RpcResponse::SnapshotWallet(self.engine().load_snapshot_wallet(head, id)?)
            }
            RpcRequest::DownloadSegment(id) => {
                RpcResponse::Segment(self.engine().load_segment(id)?)
            }
            RpcRequest::UploadSegment(upload) => {
                RpcResponse::UploadAccepted(self.upload_segment(&upload)?)
            }
            RpcRequest::AddScriptInput(input) => {
                self.add_script_input(input);
                RpcResponse::Received
            }
            RpcRequest::HandleSignedUpdate(signed_update) => {
                signed_updates
                    .send(signed_update)
                    .map_err(|_| ParticipantError::ShuttingDown)?;
                RpcResponse::Received
            }
            RpcRequest::ConsensusProgress => RpcResponse::ConsensusProgress(self.progress()),
        })
    }
}

/// Spawn the RPC server thread, which answers the requests the poller takes off the network.
pub(crate) fn start_rpc_server<N: Network + 'static>(
    consensus: Consensus<N>,
    mut sender: SenderHandle<N>,
    requests: RpcServerStub,
    signed_updates: Sender<SignedUpdate>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("RPC server thread disconnected from main thread")
            }
        }

        match requests.recv_request(Instant::now() + Duration::from_millis(50)) {
            Ok((origin, id, request)) => {
                let response = consensus
                    .serve(request, &signed_updates)
                    .unwrap_or_else(|err| RpcResponse::Error(err.to_string()));
                sender.respond(&origin, id, response);
            }
            Err(RpcRequestReceiveError::NotAvailable) => (),
            // The poller stops last, so this only happens during shutdown.
            Err(RpcRequestReceiveError::Disconnected) => thread::sleep(Duration::from_millis(50)),
        }
    })
}
